//! Error handling for AMQP 0-9-1 operations.
//!
//! A single [`AmqpError`] enum covers every failure surface of the crate:
//! codec failures, protocol violations, broker-initiated closes, transport
//! failures and local deadlines. Convenience constructors keep call sites
//! short, and [`AmqpError::recoverable`] encodes the reconnect policy the
//! cluster layer follows.

use thiserror::Error;

use crate::methods::{ACCESS_REFUSED, HARD_ERROR, INVALID_PATH, NOT_ALLOWED};

/// Errors raised by the AMQP client.
#[derive(Error, Debug)]
pub enum AmqpError {
    /// A value could not be serialized to its wire form.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Inbound bytes could not be parsed.
    #[error("decoding error: {0}")]
    Decoding(String),

    /// The broker closed the connection with `connection.close`.
    #[error("connection closed by broker: {code} {text} (method {class_id}.{method_id})")]
    RemoteConnection {
        code: u16,
        text: String,
        class_id: u16,
        method_id: u16,
    },

    /// The broker closed a channel with `channel.close`.
    #[error("channel closed by broker: {code} {text} (method {class_id}.{method_id})")]
    RemoteChannel {
        code: u16,
        text: String,
        class_id: u16,
        method_id: u16,
    },

    /// The TCP transport failed or the peer went away.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A local deadline expired before the operation completed.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The peer violated the framing or method sequencing rules. `code` is
    /// one of the connection-fatal AMQP reply codes (501/502/503/505/...).
    #[error("protocol violation ({code}): {text}")]
    Protocol { code: u16, text: String },

    /// An operation was attempted in a state that does not permit it.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Raw I/O error from the transport.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate.
pub type AmqpResult<T> = Result<T, AmqpError>;

impl AmqpError {
    /// Create an encoding error.
    pub fn encoding(msg: impl Into<String>) -> Self {
        AmqpError::Encoding(msg.into())
    }

    /// Create a decoding error.
    pub fn decoding(msg: impl Into<String>) -> Self {
        AmqpError::Decoding(msg.into())
    }

    /// Create a transport failure error.
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        AmqpError::ConnectionFailed(msg.into())
    }

    /// Create a timeout error.
    pub fn timeout(msg: impl Into<String>) -> Self {
        AmqpError::Timeout(msg.into())
    }

    /// Create a protocol violation with the given AMQP reply code.
    pub fn protocol(code: u16, text: impl Into<String>) -> Self {
        AmqpError::Protocol {
            code,
            text: text.into(),
        }
    }

    /// Create an invalid-state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        AmqpError::InvalidState(msg.into())
    }

    /// The AMQP reply code attached to this error, if any.
    pub fn reply_code(&self) -> Option<u16> {
        match self {
            AmqpError::RemoteConnection { code, .. }
            | AmqpError::RemoteChannel { code, .. }
            | AmqpError::Protocol { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether `code` is fatal for the whole connection.
    pub fn is_hard_error(code: u16) -> bool {
        HARD_ERROR.contains(&code)
    }

    /// An equivalent error for delivering the same failure to more than
    /// one waiter. I/O errors collapse into `ConnectionFailed` since
    /// `std::io::Error` does not clone.
    pub fn replicate(&self) -> AmqpError {
        match self {
            AmqpError::Encoding(m) => AmqpError::Encoding(m.clone()),
            AmqpError::Decoding(m) => AmqpError::Decoding(m.clone()),
            AmqpError::RemoteConnection {
                code,
                text,
                class_id,
                method_id,
            } => AmqpError::RemoteConnection {
                code: *code,
                text: text.clone(),
                class_id: *class_id,
                method_id: *method_id,
            },
            AmqpError::RemoteChannel {
                code,
                text,
                class_id,
                method_id,
            } => AmqpError::RemoteChannel {
                code: *code,
                text: text.clone(),
                class_id: *class_id,
                method_id: *method_id,
            },
            AmqpError::ConnectionFailed(m) => AmqpError::ConnectionFailed(m.clone()),
            AmqpError::Timeout(m) => AmqpError::Timeout(m.clone()),
            AmqpError::Protocol { code, text } => AmqpError::Protocol {
                code: *code,
                text: text.clone(),
            },
            AmqpError::InvalidState(m) => AmqpError::InvalidState(m.clone()),
            AmqpError::Io(e) => AmqpError::ConnectionFailed(e.to_string()),
        }
    }

    /// Whether the cluster layer should attempt a reconnect after this
    /// error. Authentication and vhost failures are final: retrying them
    /// would loop forever against the same credentials.
    pub fn recoverable(&self) -> bool {
        match self {
            AmqpError::RemoteConnection { code, .. } => {
                !matches!(*code, ACCESS_REFUSED | NOT_ALLOWED | INVALID_PATH)
            }
            AmqpError::ConnectionFailed(_) | AmqpError::Io(_) => true,
            AmqpError::Protocol { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::methods::{FRAME_ERROR, NOT_FOUND, UNEXPECTED_FRAME};

    #[test]
    fn test_constructors() {
        assert!(matches!(
            AmqpError::encoding("too long"),
            AmqpError::Encoding(_)
        ));
        assert!(matches!(
            AmqpError::decoding("truncated"),
            AmqpError::Decoding(_)
        ));
        assert!(matches!(AmqpError::timeout("rpc"), AmqpError::Timeout(_)));
    }

    #[test]
    fn test_reply_code() {
        let err = AmqpError::protocol(FRAME_ERROR, "bad terminator");
        assert_eq!(err.reply_code(), Some(FRAME_ERROR));
        assert_eq!(AmqpError::timeout("x").reply_code(), None);
    }

    #[test]
    fn test_hard_error_classification() {
        assert!(AmqpError::is_hard_error(FRAME_ERROR));
        assert!(AmqpError::is_hard_error(UNEXPECTED_FRAME));
        assert!(!AmqpError::is_hard_error(NOT_FOUND));
    }

    #[test]
    fn test_auth_errors_are_final() {
        let auth = AmqpError::RemoteConnection {
            code: ACCESS_REFUSED,
            text: "ACCESS_REFUSED".into(),
            class_id: 0,
            method_id: 0,
        };
        assert!(!auth.recoverable());

        let forced = AmqpError::RemoteConnection {
            code: 320,
            text: "CONNECTION_FORCED".into(),
            class_id: 0,
            method_id: 0,
        };
        assert!(forced.recoverable());
        assert!(AmqpError::connection_failed("reset by peer").recoverable());
        assert!(!AmqpError::timeout("rpc").recoverable());
    }
}
