//! Shell command collaborator backend
//!
//! Each role maps to a shell command run through `sh -c`. The request is written as
//! JSON to stdin and the raw response is read as JSON from stdout. Exit code 75
//! (EX_TEMPFAIL) means "pending, ask again later".

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::types::*;
use super::{CiRunner, CodeGenerator, PullRequestHost, Reviewer};
use crate::error::{CyclrError, Result};

/// Exit code signalling a pending result
pub const PENDING_EXIT_CODE: i32 = 75;

/// Command backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandBackendConfig {
    pub generate: Option<String>,
    pub create_pull_request: Option<String>,
    pub apply_fix: Option<String>,
    pub close_pull_request: Option<String>,
    /// Optional; comments are skipped when unset
    pub post_comment: Option<String>,
    pub trigger_ci: Option<String>,
    pub request_review: Option<String>,
    /// Directory the commands run in (default: current directory)
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables
    pub env: BTreeMap<String, String>,
    /// Per-command timeout in milliseconds (default: 600000)
    pub timeout_ms: u64,
}

impl Default for CommandBackendConfig {
    fn default() -> Self {
        Self {
            generate: None,
            create_pull_request: None,
            apply_fix: None,
            close_pull_request: None,
            post_comment: None,
            trigger_ci: None,
            request_review: None,
            working_dir: None,
            env: BTreeMap::new(),
            timeout_ms: 600_000,
        }
    }
}

/// Collaborator backend that shells out
#[derive(Debug)]
pub struct CommandBackend {
    config: CommandBackendConfig,
}

impl CommandBackend {
    /// Create a backend; every role except close_pull_request and post_comment needs a command
    pub fn new(config: CommandBackendConfig) -> Result<Self> {
        let required = [
            ("generate", &config.generate),
            ("create_pull_request", &config.create_pull_request),
            ("apply_fix", &config.apply_fix),
            ("trigger_ci", &config.trigger_ci),
            ("request_review", &config.request_review),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, cmd)| cmd.as_deref().is_none_or(|c| c.trim().is_empty()))
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(CyclrError::Collaborator(format!(
                "command backend missing commands for: {}",
                missing.join(", ")
            )));
        }
        Ok(Self { config })
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    async fn run<Req, Resp>(&self, role: &str, command: Option<&str>, request: &Req) -> CollabResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let command = command
            .ok_or_else(|| CollaboratorError::Rejected(format!("no {} command configured", role)))?;
        let input = serde_json::to_vec(request)
            .map_err(|e| CollaboratorError::Malformed(format!("cannot encode {} request: {}", role, e)))?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        log::debug!("{}: running `{}`", role, command);

        let mut child = cmd
            .spawn()
            .map_err(|e| CollaboratorError::Rejected(format!("failed to spawn {}: {}", role, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A command that ignores stdin may close it early; that is not an error
            if let Err(e) = stdin.write_all(&input).await {
                log::debug!("{}: stdin closed early: {}", role, e);
            }
        }

        let timeout = self.timeout();
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(CollaboratorError::Network(format!("{} failed: {}", role, e))),
            Err(_) => return Err(CollaboratorError::Timeout(timeout)),
        };

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        match output.status.code() {
            Some(0) => {}
            Some(PENDING_EXIT_CODE) => {
                let reason = if stderr.is_empty() { format!("{} pending", role) } else { stderr };
                return Err(CollaboratorError::Pending(reason));
            }
            Some(code) => {
                return Err(CollaboratorError::Rejected(format!(
                    "{} exited with {}: {}",
                    role, code, stderr
                )));
            }
            None => {
                return Err(CollaboratorError::Rejected(format!(
                    "{} terminated by signal: {}",
                    role, stderr
                )));
            }
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let body = if stdout.trim().is_empty() { "{}" } else { stdout.trim() };
        serde_json::from_str(body)
            .map_err(|e| CollaboratorError::Malformed(format!("{} returned invalid JSON: {}", role, e)))
    }
}

#[async_trait]
impl CodeGenerator for CommandBackend {
    async fn generate(&self, request: &GenerationRequest) -> CollabResult<RawGeneration> {
        self.run("generate", self.config.generate.as_deref(), request).await
    }
}

#[async_trait]
impl PullRequestHost for CommandBackend {
    async fn create_pull_request(&self, request: &PullRequestRequest) -> CollabResult<RawPullRequest> {
        self.run(
            "create_pull_request",
            self.config.create_pull_request.as_deref(),
            request,
        )
        .await
    }

    async fn apply_fix(&self, request: &FixRequest) -> CollabResult<RawAck> {
        self.run("apply_fix", self.config.apply_fix.as_deref(), request).await
    }

    async fn close_pull_request(&self, request: &CloseRequest) -> CollabResult<RawAck> {
        self.run(
            "close_pull_request",
            self.config.close_pull_request.as_deref(),
            request,
        )
        .await
    }

    async fn post_comment(&self, request: &CommentRequest) -> CollabResult<RawAck> {
        match self.config.post_comment.as_deref() {
            Some(command) => self.run("post_comment", Some(command), request).await,
            None => Ok(RawAck::ok()),
        }
    }
}

#[async_trait]
impl CiRunner for CommandBackend {
    async fn trigger_ci(&self, request: &PullRequestRef) -> CollabResult<RawCiStatus> {
        self.run("trigger_ci", self.config.trigger_ci.as_deref(), request).await
    }
}

#[async_trait]
impl Reviewer for CommandBackend {
    async fn request_review(&self, request: &PullRequestRef) -> CollabResult<RawReview> {
        self.run("request_review", self.config.request_review.as_deref(), request).await
    }
}
