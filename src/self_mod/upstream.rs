//! Upstream Tracking
//!
//! Source-control collaborator backed by the local `git` binary. Reports
//! how far the agent's checkout is behind its origin so the upstream
//! heartbeat task can decide whether to raise a wake.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use crate::types::{SourceControlClient, UpstreamStatus};

/// `SourceControlClient` implementation over a git checkout on disk.
pub struct GitSourceControl {
    repo_dir: PathBuf,
}

impl GitSourceControl {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }

    /// Run a git command in the repository and return trimmed stdout.
    async fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .output()
            .await
            .with_context(|| format!("Failed to execute git {}", args.join(" ")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("git {} failed: {}", args.join(" "), stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl SourceControlClient for GitSourceControl {
    /// Fetch from origin and count how far behind the local branch is.
    ///
    /// A failing fetch is folded into `fetch_error` rather than raised:
    /// the caller's edge-trigger needs the error value, and a flaky
    /// network must not look like a broken task.
    async fn check_upstream(&self) -> Result<UpstreamStatus> {
        if let Err(e) = self.git(&["fetch", "origin", "--quiet"]).await {
            return Ok(UpstreamStatus {
                behind: 0,
                commits: Vec::new(),
                fetch_error: Some(format!("{e:#}")),
            });
        }

        let behind: u32 = self
            .git(&["rev-list", "--count", "HEAD..@{u}"])
            .await
            .unwrap_or_else(|_| "0".to_string())
            .parse()
            .unwrap_or(0);

        let commits = if behind > 0 {
            self.git(&["log", "--oneline", "HEAD..@{u}"])
                .await
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        } else {
            Vec::new()
        };

        Ok(UpstreamStatus {
            behind,
            commits,
            fetch_error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_failure_is_reported_not_raised() {
        // An empty directory is not a git repository; whatever goes
        // wrong must land in fetch_error, never in Err.
        let dir = tempfile::tempdir().unwrap();
        let client = GitSourceControl::new(dir.path());

        let status = client.check_upstream().await.unwrap();
        assert_eq!(status.behind, 0);
        assert!(status.fetch_error.is_some());
    }
}
