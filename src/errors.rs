//! Typed error hierarchy for the cadence coordinator.
//!
//! Four top-level enums cover the four collaborator seams:
//! - `WorkspaceError`: exclusive workspace creation and merge failures
//! - `AgentError`: phase agent execution failures
//! - `TrackerError`: issue-tracker call failures
//! - `GateError`: checkpoint prompt failures
//!
//! None of these are retried anywhere in the core: every failure surfaces in
//! the run's `Aborted` outcome with enough structure for a manual resume.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the workspace pool.
///
/// `AlreadyExists` and `NotFound` are contract outcomes the state machine
/// matches on; merge conflicts are not errors at all (see
/// `workspace::MergeOutcome`) because no destructive action is taken and the
/// conflicted state is left inspectable.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("workspace for branch '{0}' already exists")]
    AlreadyExists(String),

    #[error("no live workspace for branch '{0}'")]
    NotFound(String),

    #[error("workspace path {path} already present on disk")]
    PathOccupied { path: PathBuf },

    #[error("invalid workspace state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("workspace table lock poisoned")]
    TablePoisoned,

    #[error(transparent)]
    Git(#[from] git2::Error),

    #[error("workspace io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from a phase agent execution. Fatal for the current run.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to spawn agent command '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("agent exited with non-zero code {exit_code}")]
    NonZeroExit { exit_code: i32, stderr: String },

    #[error("agent io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the issue tracker collaborator.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("issue {0} not found")]
    IssueNotFound(u64),

    #[error("issue tracker request failed: {0}")]
    Request(String),

    #[error("issue tracker returned unexpected payload: {0}")]
    BadPayload(String),
}

/// Errors from the checkpoint gate itself (the prompt machinery failing, not
/// the human saying no; rejection is a normal `CheckpointDecision`).
#[derive(Debug, Error)]
pub enum GateError {
    #[error("checkpoint prompt failed: {0}")]
    Prompt(String),

    #[error("scripted gate exhausted: no decision left for phase '{0}'")]
    ScriptExhausted(String),
}
