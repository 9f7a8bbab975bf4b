//! Chunk planning
//!
//! Splits `[0, total_rows)` into contiguous offset/limit windows.

use serde::Serialize;

use crate::error::{ExtractError, Result};

/// One `[offset, offset + limit)` slice of the result set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ChunkWindow {
    /// Zero-based position in the plan
    pub index: usize,
    pub offset: u64,
    /// Always greater than zero
    pub limit: u64,
}

impl ChunkWindow {
    /// Exclusive end offset
    pub fn end(&self) -> u64 {
        self.offset + self.limit
    }
}

/// Plan the windows covering `total_rows` rows
///
/// # Arguments
/// * `total_rows` - Row count probed from the source
/// * `chunk_size` - Maximum rows per window
///
/// # Returns
/// * `Result<Vec<ChunkWindow>>` - `ceil(total_rows / chunk_size)` windows in
///   ascending offset order; empty when there are no rows
pub fn plan(total_rows: u64, chunk_size: u64) -> Result<Vec<ChunkWindow>> {
    if chunk_size == 0 {
        return Err(ExtractError::invalid_value(
            "export.chunk_size",
            chunk_size,
            "must be greater than zero",
        ));
    }

    let count = total_rows.div_ceil(chunk_size);
    let windows = (0..count)
        .map(|i| {
            let offset = i * chunk_size;
            ChunkWindow {
                index: i as usize,
                offset,
                limit: chunk_size.min(total_rows - offset),
            }
        })
        .collect();

    Ok(windows)
}
