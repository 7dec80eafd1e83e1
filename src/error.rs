//! Error types shared by every zonechaos module

use std::time::Duration;

use thiserror::Error;

/// Result alias used across the crate
pub type AppResult<T> = Result<T, AppError>;

/// Everything that can go wrong while driving the external CLIs
#[derive(Debug, Error)]
pub enum AppError {
    /// A Kubernetes object name does not follow the DNS-1123 label rules
    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// A required binary is not on PATH
    #[error("{0} is not installed or not on PATH")]
    ToolMissing(String),

    /// An external command exited non-zero
    #[error("command `{command}` failed (exit {status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("failed to parse JSON output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to handle YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A polled condition did not hold before the deadline
    #[error("timed out after {}s waiting for {what}", .after.as_secs())]
    Timeout { what: String, after: Duration },

    /// The target is not in a state the experiment can run against
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid experiment plan: {0}")]
    InvalidPlan(String),

    /// Undoing an injected fault failed; the fault may still be active
    #[error("cleanup of {what} failed, remove it manually: {source}")]
    Cleanup {
        what: String,
        #[source]
        source: Box<AppError>,
    },
}

impl AppError {
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    pub fn invalid_plan(msg: impl Into<String>) -> Self {
        Self::InvalidPlan(msg.into())
    }

    pub fn invalid_name(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn cleanup(what: impl Into<String>, source: AppError) -> Self {
        Self::Cleanup {
            what: what.into(),
            source: Box::new(source),
        }
    }

    /// True when the failure came from an external command whose stderr mentions `needle`
    pub fn stderr_contains(&self, needle: &str) -> bool {
        matches!(self, Self::CommandFailed { stderr, .. } if stderr.contains(needle))
    }
}
