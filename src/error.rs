//! Error types for device sessions, vendor profiles and request handling.
//!
//! Every failure the engine can produce is a [`ConnectError`]. The dispatcher
//! folds them into a [`RetCode`] so nothing escapes the request boundary as an
//! unhandled fault.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::error::SendError;

/// Errors that can occur while connecting to or driving a device CLI.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// No registered profile pattern matches the device identity.
    #[error("no profile matches {0}")]
    ProfileNotFound(String),

    /// A profile pattern was registered twice.
    #[error("profile pattern {0} already registered")]
    ProfileAlreadyRegistered(String),

    /// A profile definition is inconsistent or carries an invalid regex.
    #[error("invalid profile: {0}")]
    InvalidProfile(String),

    /// The session is in a mode the profile declares no prompts for.
    ///
    /// Returned instead of waiting for a prompt that can never be recognized.
    #[error("no prompt patterns for mode {0}")]
    NoPromptsForMode(String),

    /// Dialing, authentication or shell channel setup failed.
    #[error("connect failure: {0}")]
    ConnectFailure(String),

    /// The request asked for a protocol the engine cannot dial.
    #[error("protocol {0} not supported")]
    UnsupportedProtocol(String),

    /// No prompt was seen before the deadline.
    ///
    /// Carries a description of what was being waited for.
    #[error("protocol timeout: {0}")]
    ProtocolTimeout(String),

    /// A profile error pattern matched a line of device output.
    #[error("device rejected command: {0}")]
    DeviceRejected(String),

    /// The transport went away while reading or writing.
    #[error("transport closed")]
    TransportClosed,

    /// An error occurred in the async-ssh2-tokio library.
    #[error("async ssh2 error: {0}")]
    Ssh2Error(#[from] async_ssh2_tokio::Error),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    RusshError(#[from] russh::Error),

    /// Socket level I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A regex supplied at runtime failed to compile.
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to hand data to the transport writer.
    #[error("failed to send data: {0}")]
    SendDataError(#[from] SendError<String>),
}

impl ConnectError {
    /// Result code reported to callers for this error.
    pub fn code(&self) -> RetCode {
        match self {
            ConnectError::ProfileNotFound(_) => RetCode::ProfileNotFound,
            ConnectError::ProtocolTimeout(_) => RetCode::Timeout,
            ConnectError::ConnectFailure(_)
            | ConnectError::UnsupportedProtocol(_)
            | ConnectError::Ssh2Error(_)
            | ConnectError::RusshError(_)
            | ConnectError::Io(_) => RetCode::AcquireFailed,
            ConnectError::ProfileAlreadyRegistered(_)
            | ConnectError::InvalidProfile(_)
            | ConnectError::NoPromptsForMode(_)
            | ConnectError::DeviceRejected(_)
            | ConnectError::TransportClosed
            | ConnectError::Pattern(_)
            | ConnectError::Serialization(_)
            | ConnectError::SendDataError(_) => RetCode::ExecFailed,
        }
    }

    /// Whether the session that produced this error can no longer be trusted.
    ///
    /// A rejected command leaves the device idle at its prompt; timeouts and
    /// transport failures leave unread bytes or a dead channel behind.
    pub fn invalidates_session(&self) -> bool {
        !matches!(
            self,
            ConnectError::DeviceRejected(_) | ConnectError::ProfileNotFound(_)
        )
    }
}

/// Numeric result codes carried by every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum RetCode {
    Ok,
    /// No profile pattern matched the vendor/type/version identity.
    ProfileNotFound,
    /// Connecting or initializing the session failed.
    AcquireFailed,
    /// Running transitions or commands failed.
    ExecFailed,
    /// A read or the whole request exceeded its deadline.
    Timeout,
}

impl From<RetCode> for i32 {
    fn from(code: RetCode) -> i32 {
        match code {
            RetCode::Ok => 0,
            RetCode::ProfileNotFound => 1001,
            RetCode::AcquireFailed => 1002,
            RetCode::ExecFailed => 1003,
            RetCode::Timeout => 1005,
        }
    }
}

impl TryFrom<i32> for RetCode {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RetCode::Ok),
            1001 => Ok(RetCode::ProfileNotFound),
            1002 => Ok(RetCode::AcquireFailed),
            1003 => Ok(RetCode::ExecFailed),
            1005 => Ok(RetCode::Timeout),
            other => Err(format!("unknown result code {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_failure_class() {
        assert_eq!(
            ConnectError::ProfileNotFound("x".into()).code(),
            RetCode::ProfileNotFound
        );
        assert_eq!(
            ConnectError::ConnectFailure("dial".into()).code(),
            RetCode::AcquireFailed
        );
        assert_eq!(
            ConnectError::ProtocolTimeout("prompt".into()).code(),
            RetCode::Timeout
        );
        assert_eq!(
            ConnectError::DeviceRejected("ERROR: bad".into()).code(),
            RetCode::ExecFailed
        );
        assert_eq!(ConnectError::TransportClosed.code(), RetCode::ExecFailed);
    }

    #[test]
    fn rejected_command_keeps_session() {
        assert!(!ConnectError::DeviceRejected("% Invalid".into()).invalidates_session());
        assert!(ConnectError::ProtocolTimeout("x".into()).invalidates_session());
        assert!(ConnectError::TransportClosed.invalidates_session());
    }

    #[test]
    fn retcode_serializes_as_number() {
        let json = serde_json::to_string(&RetCode::Timeout).expect("encode");
        assert_eq!(json, "1005");
        let code: RetCode = serde_json::from_str("1002").expect("decode");
        assert_eq!(code, RetCode::AcquireFailed);
    }
}
