//! Verification of nft scripts before they are applied
//!
//! Used for the bootstrap script: a broken template should stop startup with
//! readable errors instead of leaving the table half-created.

use crate::core::error::Result;
use crate::core::executor::NftExecutor;
use tracing::{info, warn};

/// Result of a script verification operation
#[derive(Debug, Clone)]
pub struct VerifyResult {
    pub success: bool,
    pub errors: Vec<String>,
}

impl VerifyResult {
    /// Creates a successful verification result
    pub fn success() -> Self {
        Self {
            success: true,
            errors: Vec::new(),
        }
    }

    /// Creates a failed verification result with errors
    pub fn failure(errors: Vec<String>) -> Self {
        Self {
            success: false,
            errors,
        }
    }
}

/// Verifies a script without applying it using `nft --check`
///
/// # Errors
///
/// Returns `Err` if the nft process cannot be spawned or fed.
pub async fn verify_script(executor: &NftExecutor, script: &str) -> Result<VerifyResult> {
    info!("Verifying script via {} --check", executor.command_line());

    let output = executor.check(script).await?;

    if output.status.success() {
        info!("Script verification passed");
        Ok(VerifyResult::success())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!("Script verification failed: {}", stderr);
        Ok(VerifyResult::failure(parse_nft_errors(&stderr)))
    }
}

/// Parses nft error output into user-friendly messages
///
/// Attempts to extract meaningful error information from nft's
/// stderr output, falling back to raw output if parsing fails.
fn parse_nft_errors(stderr: &str) -> Vec<String> {
    // Try to parse JSON error format first
    if let Ok(json_err) = serde_json::from_str::<serde_json::Value>(stderr)
        && let Some(errors) = json_err.get("errors").and_then(|e| e.as_array())
    {
        return errors
            .iter()
            .filter_map(|e| e.get("message").and_then(|m| m.as_str()))
            .map(String::from)
            .collect();
    }

    // nft prints the offending line and a caret marker under each error
    stderr
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !line.trim_start().starts_with('^'))
        .map(|line| {
            line.trim()
                .trim_start_matches("Error: ")
                .trim_start_matches("nft: ")
                .to_string()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nft_errors_plain_text() {
        let stderr = "Error: syntax error, unexpected $end\nError: invalid expression\n";
        let errors = parse_nft_errors(stderr);

        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0], "syntax error, unexpected $end");
        assert_eq!(errors[1], "invalid expression");
    }

    #[test]
    fn test_parse_nft_errors_skips_caret_lines() {
        let stderr = "/dev/stdin:3:9-12: Error: syntax error\n    tabel inet x\n    ^^^^^\n";
        let errors = parse_nft_errors(stderr);

        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("syntax error"));
        assert_eq!(errors[1], "tabel inet x");
    }

    #[test]
    fn test_parse_nft_errors_json() {
        let stderr = r#"{"errors":[{"message":"No such file or directory"}]}"#;
        assert_eq!(parse_nft_errors(stderr), vec!["No such file or directory"]);
    }

    #[test]
    fn test_parse_nft_errors_empty() {
        assert!(parse_nft_errors("").is_empty());
    }

    #[tokio::test]
    async fn test_verify_script_passes_check_flag() {
        // The fake nft only succeeds when invoked with --check
        let exec = NftExecutor::new(
            [
                "sh",
                "-c",
                "cat >/dev/null; [ \"$1\" = --check ] || { echo 'Error: not a dry run' >&2; exit 1; }",
                "nft",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
        )
        .unwrap();

        let result = verify_script(&exec, "table inet t {}").await.unwrap();
        assert!(result.success, "{:?}", result.errors);
    }

    #[tokio::test]
    async fn test_verify_script_reports_errors() {
        let exec = NftExecutor::new(
            [
                "sh",
                "-c",
                "cat >/dev/null; echo 'Error: syntax error' >&2; exit 1",
                "nft",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
        )
        .unwrap();

        let result = verify_script(&exec, "garbage").await.unwrap();
        assert!(!result.success);
        assert_eq!(result.errors, vec!["syntax error"]);
    }
}
