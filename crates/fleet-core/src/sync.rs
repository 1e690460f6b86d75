//! Benchmark catalog synchronisation
//!
//! Materialises the benchmarks directory from its upstream repository on
//! first use and fast-forwards it afterwards. Both paths report the same
//! [`SyncOutcome`] shape.

use crate::auth::AuthenticatedPrincipal;
use crate::observability::StructuredLogger;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use tokio::fs;
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Upstream repository; only needed when no checkout exists yet
    pub repo_url: Option<String>,
    pub target_dir: PathBuf,
    pub git_command: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            repo_url: None,
            target_dir: PathBuf::from("./benchmarks"),
            git_command: "git".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Cloned,
    Pulled,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub success: bool,
    pub action: SyncAction,
    /// Combined stdout and stderr of the git invocation
    pub output: String,
}

pub struct CatalogSync {
    config: SyncConfig,
    logger: StructuredLogger,
}

impl CatalogSync {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            logger: StructuredLogger::new("sync"),
        }
    }

    /// Clone when there is no checkout yet, otherwise pull fast-forward only
    pub async fn refresh(&self, _principal: &AuthenticatedPrincipal) -> SyncOutcome {
        let dir = self.config.target_dir.to_string_lossy().to_string();
        let has_checkout = fs::metadata(self.config.target_dir.join(".git"))
            .await
            .is_ok();

        let (action, args) = if has_checkout {
            (
                SyncAction::Pulled,
                vec!["-C".to_string(), dir, "pull".to_string(), "--ff-only".to_string()],
            )
        } else {
            match &self.config.repo_url {
                Some(url) => (
                    SyncAction::Cloned,
                    vec![
                        "clone".to_string(),
                        "--depth".to_string(),
                        "1".to_string(),
                        url.clone(),
                        dir,
                    ],
                ),
                None => {
                    let outcome = SyncOutcome {
                        success: false,
                        action: SyncAction::Cloned,
                        output: format!(
                            "no repository URL configured and no checkout at {}",
                            self.config.target_dir.display()
                        ),
                    };
                    self.logger.log_sync(&outcome);
                    return outcome;
                }
            }
        };

        let outcome = match run_git(&self.config.git_command, &args).await {
            Ok((success, output)) => SyncOutcome {
                success,
                action,
                output,
            },
            Err(e) => SyncOutcome {
                success: false,
                action,
                output: format!("{:#}", e),
            },
        };

        self.logger.log_sync(&outcome);
        outcome
    }
}

async fn run_git(program: &str, args: &[String]) -> Result<(bool, String)> {
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .with_context(|| format!("Failed to run {}", program))?;

    let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok((output.status.success(), combined))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal() -> AuthenticatedPrincipal {
        AuthenticatedPrincipal::from_session("tester")
    }

    // `echo` stands in for git so the argv can be asserted
    fn sync(dir: &std::path::Path, url: Option<&str>, git: &str) -> CatalogSync {
        CatalogSync::new(SyncConfig {
            repo_url: url.map(String::from),
            target_dir: dir.to_path_buf(),
            git_command: git.to_string(),
        })
    }

    #[tokio::test]
    async fn test_clone_when_no_checkout() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("benchmarks");

        let outcome = sync(&target, Some("https://example.com/bench.git"), "echo")
            .refresh(&principal())
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.action, SyncAction::Cloned);
        assert_eq!(
            outcome.output.trim(),
            format!("clone --depth 1 https://example.com/bench.git {}", target.display())
        );
    }

    #[tokio::test]
    async fn test_pull_when_checkout_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();

        let outcome = sync(dir.path(), None, "echo").refresh(&principal()).await;

        assert!(outcome.success);
        assert_eq!(outcome.action, SyncAction::Pulled);
        assert!(outcome.output.trim().ends_with("pull --ff-only"));
    }

    #[tokio::test]
    async fn test_failures_are_reported() {
        let dir = tempfile::tempdir().unwrap();

        let no_url = sync(dir.path(), None, "echo").refresh(&principal()).await;
        assert!(!no_url.success);
        assert!(no_url.output.contains("no repository URL"));

        let nonzero = sync(dir.path(), Some("u"), "false").refresh(&principal()).await;
        assert!(!nonzero.success);

        let missing = sync(dir.path(), Some("u"), "/nonexistent/git")
            .refresh(&principal())
            .await;
        assert!(!missing.success);
        assert!(missing.output.starts_with("Failed to run /nonexistent/git"));
    }
}
