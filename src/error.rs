// src/error.rs
//! Error taxonomy shared by the fetcher, the notifier, the checkpoint store
//! and the poll loop.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures of the listing fetch. Both are retried on the next cycle.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network failure or non-2xx response.
    #[error("listing transport error: {0}")]
    Transport(String),

    /// Response body was not the expected shape.
    #[error("listing decode error: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FetchError::Decode(e.to_string())
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

/// Failures of a single notification delivery.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Credentials rejected. Fatal for the rest of the process.
    #[error("notifier rejected credentials: {0}")]
    Auth(String),

    /// Destination asked us to slow down.
    #[error("notifier rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Network failure or unexpected response.
    #[error("notifier transport error: {0}")]
    Transport(String),

    /// Destination already holds an identical post, so an earlier delivery
    /// went through even though its checkpoint write did not.
    #[error("notifier rejected duplicate post: {0}")]
    Duplicate(String),
}

impl NotifyError {
    /// Whether the item this error belongs to counts as delivered.
    pub fn is_already_delivered(&self) -> bool {
        matches!(self, NotifyError::Duplicate(_))
    }
}

impl From<reqwest::Error> for NotifyError {
    fn from(e: reqwest::Error) -> Self {
        NotifyError::Transport(e.to_string())
    }
}

/// Failures of the checkpoint store.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Persisted state exists but cannot be parsed. Never fall back to a
    /// zero-value checkpoint on this error.
    #[error("corrupt checkpoint at {path}: {source}")]
    CorruptState {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("checkpoint IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint encode error: {0}")]
    Encode(String),
}

/// Outcomes that stop the poll loop for good.
#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Auth(NotifyError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}
