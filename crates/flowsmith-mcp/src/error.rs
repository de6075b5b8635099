//! Phase error kinds and the structured payload they are reported as.

use std::path::{Path, PathBuf};

use serde::Serialize;

/// Failure of one phase operation.
///
/// Phase boundaries convert every internal failure into one of these, and the
/// server converts these into an [`ErrorReport`] instead of an RPC fault.
#[derive(Debug, thiserror::Error)]
pub enum PhaseError {
    /// Missing or malformed input; raised before any I/O.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Session creation, transport or timeout failure.
    #[error("connection to '{service}' failed: {cause:#}")]
    Connection {
        service: String,
        cause: anyhow::Error,
    },

    /// Connected, but enumerating or transforming the tools failed.
    #[error("tool discovery for '{service}' failed: {cause:#}")]
    Discovery {
        service: String,
        cause: anyhow::Error,
    },

    /// Reading or writing an artifact failed.
    #[error("persistence failure at {}: {cause:#}", path.display())]
    Persistence { path: PathBuf, cause: anyhow::Error },

    /// An artifact does not satisfy its schema or invariants.
    #[error("validation failed for {}: {reason}", path.display())]
    Validation { path: PathBuf, reason: String },

    /// The LLM agent loop failed or timed out.
    #[error("agent run failed: {cause:#}")]
    Agent { cause: anyhow::Error },
}

impl PhaseError {
    pub fn persistence(path: &Path, cause: impl Into<anyhow::Error>) -> Self {
        PhaseError::Persistence {
            path: path.to_path_buf(),
            cause: cause.into(),
        }
    }

    /// Stable machine-readable tag for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            PhaseError::Configuration(_) => "configuration_error",
            PhaseError::Connection { .. } => "connection_error",
            PhaseError::Discovery { .. } => "discovery_error",
            PhaseError::Persistence { .. } => "persistence_error",
            PhaseError::Validation { .. } => "validation_error",
            PhaseError::Agent { .. } => "agent_error",
        }
    }

    /// Full diagnostic text: the cause chain, plus a backtrace when one was
    /// captured (`RUST_BACKTRACE=1`).
    pub fn traceback(&self) -> Option<String> {
        let cause = match self {
            PhaseError::Connection { cause, .. }
            | PhaseError::Discovery { cause, .. }
            | PhaseError::Persistence { cause, .. }
            | PhaseError::Agent { cause } => cause,
            PhaseError::Configuration(_) | PhaseError::Validation { .. } => return None,
        };
        Some(format!("{}: {cause:?}", self.kind()))
    }

    pub fn to_report(&self) -> ErrorReport {
        ErrorReport {
            status: Status::Error,
            kind: self.kind(),
            error: self.to_string(),
            traceback: self.traceback(),
        }
    }
}

/// Outcome tag shared by every report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Partial,
    Error,
}

/// Well-formed error result returned in place of a raw fault.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub status: Status,
    pub kind: &'static str,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

/// Serialize a phase result into the JSON payload callers receive.
pub fn into_payload<T: Serialize>(result: Result<T, PhaseError>) -> serde_json::Value {
    let value = match result {
        Ok(report) => serde_json::to_value(&report),
        Err(e) => {
            tracing::error!(kind = e.kind(), "{e}");
            serde_json::to_value(e.to_report())
        }
    };
    value.unwrap_or_else(|e| {
        serde_json::json!({
            "status": "error",
            "kind": "serialization_error",
            "error": format!("failed to serialize result: {e}"),
        })
    })
}
