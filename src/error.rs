//! Error types for ReorgWatch

use thiserror::Error;

/// RPC error code a node returns for an unknown transaction or block hash.
pub const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;
/// RPC error code a node returns for a height outside the active chain.
pub const RPC_INVALID_PARAMETER: i64 = -8;

#[derive(Debug, Clone, Error)]
pub enum ReorgError {
    /// The node could not be reached or its HTTP response was unusable.
    #[error("Transport error: {0}")]
    Transport(String),
    /// The node answered but rejected the request.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ReorgError {
    /// True when the error means "the node or store does not know this item",
    /// as opposed to the lookup itself failing.
    pub fn is_not_found(&self) -> bool {
        match self {
            ReorgError::NotFound(_) => true,
            ReorgError::Rpc { code, .. } => {
                *code == RPC_INVALID_ADDRESS_OR_KEY || *code == RPC_INVALID_PARAMETER
            }
            _ => false,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ReorgError::Transport(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ReorgError::Transport(_) => "transport",
            ReorgError::Rpc { .. } => "rpc",
            ReorgError::NotFound(_) => "not_found",
            ReorgError::Validation(_) => "validation",
            ReorgError::Persistence(_) => "persistence",
            ReorgError::Config(_) => "config",
            ReorgError::Serialization(_) => "serialization",
        }
    }

    /// HTTP status an API layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            ReorgError::Validation(_) => 400,
            ReorgError::NotFound(_) => 404,
            ReorgError::Rpc { .. } if self.is_not_found() => 404,
            ReorgError::Transport(_) | ReorgError::Rpc { .. } => 502,
            ReorgError::Persistence(_) | ReorgError::Config(_) | ReorgError::Serialization(_) => {
                500
            }
        }
    }
}

impl From<rusqlite::Error> for ReorgError {
    fn from(err: rusqlite::Error) -> Self {
        ReorgError::Persistence(err.to_string())
    }
}

impl From<reqwest::Error> for ReorgError {
    fn from(err: reqwest::Error) -> Self {
        ReorgError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for ReorgError {
    fn from(err: serde_json::Error) -> Self {
        ReorgError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ReorgError {
    fn from(err: toml::de::Error) -> Self {
        ReorgError::Config(err.to_string())
    }
}

impl From<std::io::Error> for ReorgError {
    fn from(err: std::io::Error) -> Self {
        ReorgError::Persistence(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ReorgError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(ReorgError::NotFound("tx".to_string()).is_not_found());
        assert!(ReorgError::Rpc {
            code: RPC_INVALID_ADDRESS_OR_KEY,
            message: "No such mempool or blockchain transaction".to_string(),
        }
        .is_not_found());
        assert!(!ReorgError::Rpc {
            code: -26,
            message: "bad-txns-inputs-missingorspent".to_string(),
        }
        .is_not_found());
        assert!(!ReorgError::Transport("connection refused".to_string()).is_not_found());
    }

    #[test]
    fn test_display_includes_node_payload() {
        let err = ReorgError::Rpc {
            code: -25,
            message: "Missing inputs".to_string(),
        };
        assert_eq!(err.to_string(), "RPC error -25: Missing inputs");
    }
}
