//! Runtime error types.

use serde::Serialize;

/// Coarse error classification reported at the engine/client boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Generic,
    InvalidArgument,
    InvalidGraph,
    Closed,
    Timeout,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generic => write!(f, "generic"),
            Self::InvalidArgument => write!(f, "invalid_argument"),
            Self::InvalidGraph => write!(f, "invalid_graph"),
            Self::Closed => write!(f, "closed"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Runtime errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unable to find {addon}")]
    AddonNotFound { addon: String },

    #[error("Addon already registered: {0}")]
    AddonAlreadyRegistered(String),

    #[error("Extension group creation failed: {0}")]
    GroupCreationFailed(String),

    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    #[error("Graph topology already installed")]
    TopologyAlreadyInstalled,

    #[error("Graph not found: {0}")]
    GraphNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Closed: {0}")]
    Closed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// The code surfaced to whoever issued the failing request.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidGraph(_) | Self::GraphNotFound(_) => ErrorCode::InvalidGraph,
            Self::InvalidArgument(_) | Self::Config(_) | Self::Toml(_) | Self::Json(_) => {
                ErrorCode::InvalidArgument
            }
            Self::Closed(_) => ErrorCode::Closed,
            Self::Timeout(_) => ErrorCode::Timeout,
            _ => ErrorCode::Generic,
        }
    }
}

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addon_not_found_message() {
        let err = Error::AddonNotFound {
            addon: "nonexistent_addon".to_string(),
        };
        assert_eq!(err.to_string(), "Unable to find nonexistent_addon");
        assert_eq!(err.code(), ErrorCode::Generic);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::InvalidGraph("x".into()).code(), ErrorCode::InvalidGraph);
        assert_eq!(Error::Closed("x".into()).code(), ErrorCode::Closed);
        assert_eq!(Error::Timeout("x".into()).code(), ErrorCode::Timeout);
        assert_eq!(Error::TopologyAlreadyInstalled.code(), ErrorCode::Generic);
        assert_eq!(ErrorCode::InvalidArgument.to_string(), "invalid_argument");
    }
}
