use crate::config::ConfigError;

/// Error type shared by the normalizer, the turn runner and the transport seam.
#[derive(Debug, thiserror::Error)]
pub enum NormalizerError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("{provider} returned empty response body")]
    EmptyBody { provider: String },
    #[error("Protocol drift: {count} consecutive unparseable payload lines")]
    ProtocolDrift { count: usize },
    #[error("Request aborted")]
    Aborted,
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category used to pick the stop reason of an error record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Setup,
    Upstream,
    Protocol,
    Cancelled,
}

impl NormalizerError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            NormalizerError::Config(_)
            | NormalizerError::InvalidRequest(_)
            | NormalizerError::EmptyBody { .. }
            | NormalizerError::Internal(_) => ErrorCategory::Setup,
            NormalizerError::Upstream { .. } | NormalizerError::Transport(_) => {
                ErrorCategory::Upstream
            }
            NormalizerError::ProtocolDrift { .. } => ErrorCategory::Protocol,
            NormalizerError::Aborted => ErrorCategory::Cancelled,
        }
    }

    /// True when the turn ended because the caller cancelled it.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self.category(), ErrorCategory::Cancelled)
    }
}

impl From<reqwest::Error> for NormalizerError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => NormalizerError::Upstream {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => NormalizerError::Transport(err.to_string()),
        }
    }
}

impl From<std::io::Error> for NormalizerError {
    fn from(err: std::io::Error) -> Self {
        NormalizerError::Transport(err.to_string())
    }
}
