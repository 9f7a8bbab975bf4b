//! Access token resolution for the BigQuery adapter
//!
//! Tokens are resolved from the process environment only; nothing is passed
//! in by the pipeline. Resolution order:
//!
//! 1. `BQPULL_ACCESS_TOKEN`
//! 2. `GOOGLE_OAUTH_ACCESS_TOKEN`
//! 3. `gcloud auth print-access-token` (cached for a while)

use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{ExtractError, Result};

/// Environment variables checked for a ready-made bearer token
const TOKEN_ENV_VARS: &[&str] = &["BQPULL_ACCESS_TOKEN", "GOOGLE_OAUTH_ACCESS_TOKEN"];

/// gcloud tokens live for an hour; refresh well before that
const GCLOUD_TOKEN_TTL: Duration = Duration::from_secs(45 * 60);

/// Source of bearer tokens for API calls
pub enum TokenProvider {
    /// A fixed token (from the environment or supplied by the caller)
    Static(String),
    /// Tokens minted by the gcloud CLI
    Gcloud {
        cached: Mutex<Option<(String, Instant)>>,
    },
}

impl TokenProvider {
    /// Resolve the provider from the environment
    pub fn from_env() -> Self {
        for var in TOKEN_ENV_VARS {
            if let Ok(token) = std::env::var(var)
                && !token.trim().is_empty()
            {
                debug!("Using access token from {}", var);
                return TokenProvider::Static(token.trim().to_string());
            }
        }

        if std::env::var_os("GOOGLE_APPLICATION_CREDENTIALS").is_none() {
            warn!("GOOGLE_APPLICATION_CREDENTIALS not set, using gcloud authentication instead");
        }
        TokenProvider::Gcloud {
            cached: Mutex::new(None),
        }
    }

    /// Get a token valid for the next request
    pub async fn token(&self) -> Result<String> {
        match self {
            TokenProvider::Static(token) => Ok(token.clone()),
            TokenProvider::Gcloud { cached } => {
                let mut guard = cached.lock().await;
                if let Some((token, minted)) = guard.as_ref()
                    && minted.elapsed() < GCLOUD_TOKEN_TTL
                {
                    return Ok(token.clone());
                }
                let token = gcloud_access_token().await?;
                *guard = Some((token.clone(), Instant::now()));
                Ok(token)
            }
        }
    }

    /// Drop a cached token after the API rejected it
    pub async fn invalidate(&self) {
        if let TokenProvider::Gcloud { cached } = self {
            *cached.lock().await = None;
        }
    }
}

async fn gcloud_access_token() -> Result<String> {
    debug!("Requesting access token from gcloud");
    let output = Command::new("gcloud")
        .args(["auth", "print-access-token"])
        .output()
        .await
        .map_err(|e| {
            ExtractError::SourceUnavailable(format!(
                "no access token in environment and gcloud could not be run: {e}"
            ))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ExtractError::SourceUnavailable(format!(
            "gcloud auth print-access-token failed: {}. Run `gcloud auth application-default login`",
            stderr.trim()
        )));
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Err(ExtractError::SourceUnavailable(
            "gcloud returned an empty access token".to_string(),
        ));
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token() {
        let provider = TokenProvider::Static("ya29.test".into());
        assert_eq!(provider.token().await.unwrap(), "ya29.test");
        provider.invalidate().await;
        assert_eq!(provider.token().await.unwrap(), "ya29.test");
    }

    #[tokio::test]
    async fn test_cached_gcloud_token_is_reused() {
        let provider = TokenProvider::Gcloud {
            cached: Mutex::new(Some(("cached".into(), Instant::now()))),
        };
        assert_eq!(provider.token().await.unwrap(), "cached");
    }
}
