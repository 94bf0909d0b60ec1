//! ---
//! prflow_section: "02-orchestration-core"
//! prflow_subsection: "module"
//! prflow_type: "source"
//! prflow_scope: "code"
//! prflow_description: "Error taxonomy shared by all orchestration components."
//! prflow_version: "v0.1.0-prealpha"
//! prflow_owner: "tbd"
//! ---

/// Result alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Error type for orchestration steps.
///
/// Absence of an external resource is never an error; lookups return `Option`.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    /// Malformed input rejected at the boundary. Never retried.
    #[error("validation error: {0}")]
    Validation(String),
    /// A single external call failed. Retry policy belongs to the invoking step.
    #[error("{service} {operation} failed: {message}")]
    Service {
        /// External collaborator that failed (e.g. `cloudformation`).
        service: &'static str,
        /// Operation that was attempted.
        operation: &'static str,
        /// Error text reported by the client.
        message: String,
    },
    /// A bounded poll loop ended without reaching the success status.
    #[error("stack {stack} did not reach {expected} (last status {last_status}): {}", .reasons.join("; "))]
    LifecycleTimeout {
        /// Stack being waited on.
        stack: String,
        /// Status that would have ended the wait successfully.
        expected: String,
        /// Last status observed, `ABSENT` when the stack vanished.
        last_status: String,
        /// Failure reasons collected from the stack event history.
        reasons: Vec<String>,
    },
    /// Archive could not be interpreted.
    #[error("malformed archive {path}: {reason}")]
    MalformedArchive {
        /// Archive on local disk.
        path: String,
        /// What was wrong with it.
        reason: String,
    },
    /// A field an earlier step should have produced is missing from the snapshot.
    #[error("snapshot is missing {0}")]
    MissingState(&'static str),
    /// Local filesystem failure in scratch space.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// ZIP encoding/decoding failure.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    /// Snapshot (de)serialization failure.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OrchestrationError {
    /// Build a [`OrchestrationError::Service`] from any displayable client error.
    pub fn service(
        service: &'static str,
        operation: &'static str,
        err: impl std::fmt::Display,
    ) -> Self {
        OrchestrationError::Service {
            service,
            operation,
            message: err.to_string(),
        }
    }

    /// True for failures the invoking step may reasonably retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, OrchestrationError::Service { .. })
    }
}
