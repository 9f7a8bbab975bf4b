//! Shell completion generation for bqpull
//!
//! Generates completion scripts for bash, zsh, fish, PowerShell and elvish
//! straight from the clap command definition.

use clap::CommandFactory;
use clap_complete::{Shell, generate};
use std::io::{self, Write};

use crate::cli::CliArgs;
use crate::error::{ExtractError, Result};

const SUPPORTED_SHELLS: &str = "bash, zsh, fish, powershell, elvish";

/// Generate shell completion script on stdout
///
/// # Arguments
/// * `shell_name` - Shell type (bash, zsh, fish, powershell, elvish)
///
/// # Returns
/// * `Result<()>` - Success or error
pub fn generate_completion(shell_name: &str) -> Result<()> {
    let shell = parse_shell(shell_name)?;
    let script = render_completion(shell);

    let mut stdout = io::stdout().lock();
    stdout.write_all(&script).map_err(ExtractError::Io)?;
    stdout.flush().map_err(ExtractError::Io)
}

/// Render the completion script for a shell into memory
fn render_completion(shell: Shell) -> Vec<u8> {
    let mut cmd = CliArgs::command();
    let mut buffer = Vec::new();
    generate(shell, &mut cmd, "bqpull", &mut buffer);
    buffer
}

/// Parse shell name string to Shell enum
fn parse_shell(shell_name: &str) -> Result<Shell> {
    match shell_name.to_lowercase().as_str() {
        "bash" => Ok(Shell::Bash),
        "zsh" => Ok(Shell::Zsh),
        "fish" => Ok(Shell::Fish),
        "powershell" | "pwsh" => Ok(Shell::PowerShell),
        "elvish" => Ok(Shell::Elvish),
        _ => Err(ExtractError::invalid_value(
            "shell",
            shell_name,
            format!("supported shells: {SUPPORTED_SHELLS}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shell() {
        assert!(matches!(parse_shell("bash"), Ok(Shell::Bash)));
        assert!(matches!(parse_shell("zsh"), Ok(Shell::Zsh)));
        assert!(matches!(parse_shell("fish"), Ok(Shell::Fish)));
        assert!(matches!(parse_shell("pwsh"), Ok(Shell::PowerShell)));
        assert!(matches!(
            parse_shell("invalid"),
            Err(ExtractError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_parse_shell_case_insensitive() {
        assert!(matches!(parse_shell("BASH"), Ok(Shell::Bash)));
        assert!(matches!(parse_shell("Zsh"), Ok(Shell::Zsh)));
        assert!(matches!(parse_shell("PowerShell"), Ok(Shell::PowerShell)));
    }

    #[test]
    fn test_bash_script_mentions_subcommands() {
        let script = String::from_utf8(render_completion(Shell::Bash)).unwrap();
        assert!(script.contains("bqpull"));
        assert!(script.contains("import"));
        assert!(script.contains("--chunk-size"));
    }
}
