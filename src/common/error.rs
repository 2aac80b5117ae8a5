//! Error types for replikv

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Recovery Log Errors ===
    #[error("Corrupted snapshot: {0}")]
    Corrupted(String),

    #[error("Checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("Codec error: {0}")]
    Codec(String),

    // === 2PC Errors ===
    /// A cohort failed while processing a protocol message.
    #[error("Transaction aborted on {node}: {reason}")]
    Abort { node: String, reason: String },

    // === Network Errors ===
    /// The peer could not be reached or did not answer sensibly.
    #[error("Peer {node} unreachable: {reason}")]
    Unreachable { node: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(String),

    // === Membership Errors ===
    #[error("Server already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Server not registered: {0}")]
    NotRegistered(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    /// Unrecoverable condition. The serve loop shuts the process down on it.
    #[error("Fatal: {0}")]
    Fatal(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Did the transport fail (peer gone) rather than the peer refusing?
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Unreachable { .. })
    }

    /// Must this error terminate the process?
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }

    /// Promote any error to a fatal one, keeping its message.
    pub fn into_fatal(self) -> Self {
        match self {
            Error::Fatal(_) => self,
            other => Error::Fatal(other.to_string()),
        }
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::Abort { .. } | Error::AlreadyRegistered(_) => StatusCode::CONFLICT,
            Error::NotRegistered(_) => StatusCode::NOT_FOUND,
            Error::InvalidConfig(_) | Error::Codec(_) => StatusCode::BAD_REQUEST,
            Error::Unreachable { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let gone = Error::Unreachable {
            node: "10.0.0.2_5000".into(),
            reason: "connection refused".into(),
        };
        assert!(gone.is_transport());
        assert!(!gone.is_fatal());

        let abort = Error::Abort {
            node: "10.0.0.2_5000".into(),
            reason: "disk full".into(),
        };
        assert!(!abort.is_transport());
        assert_eq!(abort.to_http_status(), axum::http::StatusCode::CONFLICT);

        let fatal = abort.into_fatal();
        assert!(fatal.is_fatal());
        assert!(fatal.to_string().contains("disk full"));
    }
}
