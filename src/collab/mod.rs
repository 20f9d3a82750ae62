//! Collaborator layer - one capability trait per external role
//!
//! This module provides:
//! - Request/raw response types and CollaboratorError
//! - CodeGenerator, PullRequestHost, CiRunner, Reviewer traits
//! - Backends: shell commands, HTTP, and a scripted in-memory fake
//! - Collaborators bundle selected by configuration

pub mod command;
pub mod http;
pub mod scripted;
pub mod types;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use command::{CommandBackend, CommandBackendConfig};
pub use http::{HttpBackend, HttpBackendConfig};
pub use scripted::{ScriptedBackend, ScriptedCall};
pub use types::{
    CloseRequest, CollabResult, CollaboratorError, CommentKind, CommentRequest, FixRequest, GenerationRequest, PullRequestRef,
    PullRequestRequest, RawAck, RawCheck, RawCiStatus, RawGeneration, RawPullRequest, RawReview,
    RawReviewComment,
};

use crate::error::Result;

/// Turns an issue (plus feedback on loop-back) into a change
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> CollabResult<RawGeneration>;
}

/// Hosting-platform pull request operations
#[async_trait]
pub trait PullRequestHost: Send + Sync {
    /// Ensure a PR exists for the issue. Re-calling for an issue with an open PR
    /// must return the existing identifier.
    async fn create_pull_request(&self, request: &PullRequestRequest) -> CollabResult<RawPullRequest>;

    /// Push a new commit onto the existing PR branch
    async fn apply_fix(&self, request: &FixRequest) -> CollabResult<RawAck>;

    async fn close_pull_request(&self, request: &CloseRequest) -> CollabResult<RawAck>;

    /// Post a comment on the PR. Best effort; the lifecycle never depends on it.
    async fn post_comment(&self, request: &CommentRequest) -> CollabResult<RawAck>;
}

/// Runs (or polls) CI for a PR head. Pending runs report `CollaboratorError::Pending`.
#[async_trait]
pub trait CiRunner: Send + Sync {
    async fn trigger_ci(&self, request: &PullRequestRef) -> CollabResult<RawCiStatus>;
}

/// Requests an automated review of a PR
#[async_trait]
pub trait Reviewer: Send + Sync {
    async fn request_review(&self, request: &PullRequestRef) -> CollabResult<RawReview>;
}

/// Which backend implements the collaborator roles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Command,
    Http,
    /// In-memory fake; every call succeeds. Dry runs only.
    Scripted,
}

/// Collaborator configuration section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorConfig {
    pub backend: BackendKind,
    pub command: CommandBackendConfig,
    pub http: HttpBackendConfig,
}

/// The four collaborator roles a driver talks to
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn CodeGenerator>,
    pub pull_requests: Arc<dyn PullRequestHost>,
    pub ci: Arc<dyn CiRunner>,
    pub reviewer: Arc<dyn Reviewer>,
}

impl Collaborators {
    pub fn new(
        generator: Arc<dyn CodeGenerator>,
        pull_requests: Arc<dyn PullRequestHost>,
        ci: Arc<dyn CiRunner>,
        reviewer: Arc<dyn Reviewer>,
    ) -> Self {
        Self {
            generator,
            pull_requests,
            ci,
            reviewer,
        }
    }

    /// Use one backend for every role
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: CodeGenerator + PullRequestHost + CiRunner + Reviewer + 'static,
    {
        Self {
            generator: backend.clone(),
            pull_requests: backend.clone(),
            ci: backend.clone(),
            reviewer: backend,
        }
    }

    /// Build the configured backend
    pub fn from_config(config: &CollaboratorConfig) -> Result<Self> {
        log::info!("Using {:?} collaborator backend", config.backend);
        match config.backend {
            BackendKind::Command => Ok(Self::from_backend(Arc::new(CommandBackend::new(
                config.command.clone(),
            )?))),
            BackendKind::Http => Ok(Self::from_backend(Arc::new(HttpBackend::new(
                config.http.clone(),
            )?))),
            BackendKind::Scripted => Ok(Self::from_backend(Arc::new(ScriptedBackend::new()))),
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
