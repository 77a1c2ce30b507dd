//! Pipeline error taxonomy.

use thiserror::Error;

/// How the trigger layer should treat a failed invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Network, storage or budget failure; the scheduler or queue retries.
    Transient,
    /// Unexpected payload shape; retrying cannot fix it.
    Malformed,
    /// A dataset the stage depends on is not (yet) readable.
    MissingDependency,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("upstream fetch failed for {url}: {message}")]
    Upstream { url: String, message: String },

    #[error("storage error on {key}: {message}")]
    Storage { key: String, message: String },

    #[error("malformed {what}: {message}")]
    Malformed { what: String, message: String },

    #[error("missing dependency: object {key} (version {}) not found", .version_id.as_deref().unwrap_or("latest"))]
    MissingDependency {
        key: String,
        version_id: Option<String>,
    },

    #[error("invocation exceeded its budget of {budget_ms}ms")]
    Timeout { budget_ms: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn malformed(what: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            what: what.into(),
            message: message.into(),
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            Self::Malformed { .. } => FailureClass::Malformed,
            Self::MissingDependency { .. } => FailureClass::MissingDependency,
            Self::Upstream { .. }
            | Self::Storage { .. }
            | Self::Timeout { .. }
            | Self::Internal(_) => FailureClass::Transient,
        }
    }

    /// Whether redelivering the same input can plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        self.class() != FailureClass::Malformed
    }

    /// Short machine-readable code used in logs and dead-letter envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Upstream { .. } => "upstream_error",
            Self::Storage { .. } => "storage_error",
            Self::Malformed { .. } => "malformed_data",
            Self::MissingDependency { .. } => "missing_dependency",
            Self::Timeout { .. } => "timeout",
            Self::Internal(_) => "internal_error",
        }
    }
}
