//! # Remote Error Types
//!
//! Transient I/O failures never leave the request executor: they are retried
//! and, once the attempt budget is spent, surface as
//! [`RemoteError::NetworkExhausted`]. Everything else is reported as-is.

use crate::version::ProtocolVersion;
use bridge_traits::error::BridgeError;
use std::fmt;
use thiserror::Error;

/// Error codes defined by the protocol's `error` element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorCode {
    Generic,
    MissingParameter,
    ClientTooOld,
    ServerTooOld,
    WrongCredentials,
    TokenAuthUnsupported,
    NotAuthorized,
    TrialExpired,
    NotFound,
    Other(i32),
}

impl ServiceErrorCode {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Generic,
            10 => Self::MissingParameter,
            20 => Self::ClientTooOld,
            30 => Self::ServerTooOld,
            40 => Self::WrongCredentials,
            41 => Self::TokenAuthUnsupported,
            50 => Self::NotAuthorized,
            60 => Self::TrialExpired,
            70 => Self::NotFound,
            other => Self::Other(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Generic => 0,
            Self::MissingParameter => 10,
            Self::ClientTooOld => 20,
            Self::ServerTooOld => 30,
            Self::WrongCredentials => 40,
            Self::TokenAuthUnsupported => 41,
            Self::NotAuthorized => 50,
            Self::TrialExpired => 60,
            Self::NotFound => 70,
            Self::Other(code) => *code,
        }
    }
}

impl fmt::Display for ServiceErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Error, Debug)]
pub enum RemoteError {
    /// Every attempt failed at the I/O level.
    #[error("{endpoint}: network error after {attempts} attempts: {source}")]
    NetworkExhausted {
        endpoint: String,
        attempts: u32,
        source: BridgeError,
    },

    /// The caller's cancellation token fired.
    #[error("Request cancelled")]
    Cancelled,

    /// The server answered with a well-formed error payload.
    #[error("Server error {code}: {message}")]
    Service {
        code: ServiceErrorCode,
        message: String,
    },

    /// Detected locally from the cached server version; no request was sent.
    #[error("{feature} requires server version {required} (server is {actual})")]
    UnsupportedVersion {
        feature: String,
        required: ProtocolVersion,
        actual: ProtocolVersion,
    },

    #[error("{0} is not licensed on this server")]
    NotLicensed(String),

    #[error("{endpoint}: unexpected HTTP status {status}")]
    Http { endpoint: String, status: u16 },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl RemoteError {
    pub fn service(code: i32, message: impl Into<String>) -> Self {
        RemoteError::Service {
            code: ServiceErrorCode::from_code(code),
            message: message.into(),
        }
    }

    /// Transient failures are consumed by the executor, so only a bridge
    /// error raised outside of it can still be worth another try.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Bridge(e) if e.is_transient())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RemoteError::Cancelled)
    }

    /// Short text fit for a status line, without transport details.
    pub fn user_message(&self) -> String {
        match self {
            RemoteError::NetworkExhausted { .. } => {
                "Could not reach the server. Check your connection.".to_string()
            }
            RemoteError::Cancelled => "Cancelled".to_string(),
            RemoteError::Service { code, message } => match code {
                ServiceErrorCode::WrongCredentials => "Wrong username or password.".to_string(),
                ServiceErrorCode::NotAuthorized => "You are not allowed to do that.".to_string(),
                ServiceErrorCode::NotFound => "Not found on the server.".to_string(),
                _ => message.clone(),
            },
            RemoteError::UnsupportedVersion {
                feature, required, ..
            } => format!("{} needs server version {} or newer.", feature, required),
            RemoteError::NotLicensed(feature) => format!("{} is not licensed.", feature),
            RemoteError::Http { status, .. } => format!("Server responded with HTTP {}.", status),
            RemoteError::InvalidResponse(_) => "The server sent an unexpected response.".to_string(),
            RemoteError::Cache(_) | RemoteError::Bridge(_) => {
                "A local storage error occurred.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_codes_round_trip() {
        for code in [0, 10, 20, 30, 40, 41, 50, 60, 70, 99] {
            assert_eq!(ServiceErrorCode::from_code(code).code(), code);
        }
        assert_eq!(ServiceErrorCode::from_code(40), ServiceErrorCode::WrongCredentials);
    }

    #[test]
    fn user_messages_hide_transport_details() {
        let err = RemoteError::NetworkExhausted {
            endpoint: "stream".into(),
            attempts: 5,
            source: BridgeError::Timeout("read timed out after 45s".into()),
        };
        assert!(!err.user_message().contains("45s"));
        assert!(err.to_string().contains("5 attempts"));
        assert!(!err.is_retryable());
    }
}
