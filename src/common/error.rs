//! Error types for shardkv

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Connectivity Errors ===
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Protocol error from {node}: {reason}")]
    Protocol { node: String, reason: String },

    #[error("Node {node} rejected command: {reason}")]
    CommandRejected { node: String, reason: String },

    // === Quorum Errors ===
    #[error("Liveness vote for {node} is indeterminate: {reason}")]
    QuorumIndeterminate { node: String, reason: String },

    #[error("Monitor {monitor} answered for {actual}, expected {expected}")]
    MonitorMismatch {
        monitor: String,
        expected: String,
        actual: String,
    },

    // === Cluster Configuration Errors ===
    #[error("No primary node registered yet")]
    NoPrimaries,

    #[error("Node not found: {0}")]
    NotFound(String),

    #[error("Node already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Unknown primary: {0}")]
    UnknownPrimary(String),

    #[error("No standby assigned to primary {0}")]
    StandbyNotAssigned(String),

    #[error("No hash range is assigned to {0}")]
    NoRangeAssigned(String),

    #[error("No surviving primary to take over the slots of {0}")]
    NoSurvivingPrimaries(String),

    #[error("Slot {0} is not assigned to any node")]
    SlotUnassigned(u16),

    // === Modification Log Errors ===
    #[error("Modification log of {node} corrupted at line {line}: {reason}")]
    LogCorrupted {
        node: String,
        line: usize,
        reason: String,
    },

    #[error("Invalid log token: {0}")]
    InvalidToken(String),

    // === Network Errors ===
    #[error("HTTP error: {0}")]
    Http(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a transient error worth retrying on the next attempt?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_)
                | Error::ConnectionFailed(_)
                | Error::Protocol { .. }
                | Error::QuorumIndeterminate { .. }
                | Error::MonitorMismatch { .. }
                | Error::Http(_)
        )
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::NotFound(_) | Error::UnknownPrimary(_) => StatusCode::NOT_FOUND,
            Error::InvalidConfig(_) | Error::InvalidToken(_) | Error::AlreadyRegistered(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::NoPrimaries | Error::SlotUnassigned(_) | Error::NoSurvivingPrimaries(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else {
            Error::Http(e.to_string())
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::ConnectionFailed("x".into()).is_retryable());
        assert!(Error::QuorumIndeterminate {
            node: "a".into(),
            reason: "b".into()
        }
        .is_retryable());
        assert!(!Error::NoPrimaries.is_retryable());
        assert!(!Error::LogCorrupted {
            node: "a".into(),
            line: 1,
            reason: "bad".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_http_status() {
        assert_eq!(
            Error::NotFound("n".into()).to_http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::NoPrimaries.to_http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::ConnectionFailed("n".into()).to_http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
