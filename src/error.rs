use std::fmt;

use thiserror::Error;

/// Which inference service a proposal call went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Reasoner,
    Pointer,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Service::Reasoner => write!(f, "Reasoner"),
            Service::Pointer => write!(f, "Pointer"),
        }
    }
}

/// Missing setup the user has to fix by hand. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("Select a screen before asking.")]
    NoDisplay,
    #[error("Failed to capture screen frame.")]
    NoFrame,
    #[error("Missing {0}")]
    MissingSetting(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProposalError {
    #[error("{service} request failed ({status}): {body}")]
    Status {
        service: Service,
        status: u16,
        body: String,
    },
    #[error("{service} request could not be sent: {message}")]
    Transport { service: Service, message: String },
    #[error("{service} returned an unusable response: {reason}")]
    Malformed { service: Service, reason: String },
}

impl ProposalError {
    pub fn malformed(service: Service, reason: impl Into<String>) -> Self {
        Self::Malformed {
            service,
            reason: reason.into(),
        }
    }

    /// Server-side (5xx) failures are the only ones worth a second attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProposalError::Status { status, .. } if *status >= 500)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("invalid mapping input: {0}")]
    InvalidInput(String),
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// Element lookups are best-effort; callers log and drop these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntrospectionError {
    #[error("element helper unavailable: {0}")]
    Unavailable(String),
    #[error("element helper returned garbage: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history file: {0}")]
    Io(#[from] std::io::Error),
    #[error("history encoding: {0}")]
    Json(#[from] serde_json::Error),
}

/// Anything that aborts a guidance cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Proposal(#[from] ProposalError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    /// The cycle task panicked or was cancelled before it could report.
    #[error("Guidance cycle aborted: {0}")]
    Aborted(String),
}
