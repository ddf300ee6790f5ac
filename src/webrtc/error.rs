//! Error taxonomy for the discovery/signaling services.
//!
//! Bind and address-resolution failures surface to the caller with a
//! machine-readable code. Malformed packets and transient receive errors are
//! recovered inside the loops and never reach this module.

use thiserror::Error;

/// Failures surfaced by service operations.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The requested port is already bound or the bind was denied.
    #[error("failed to bind UDP port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// The send destination could not be resolved to a socket address.
    #[error("cannot resolve address: {0}")]
    UnresolvableAddress(String),

    /// A datagram send failed outright.
    #[error("send to {dest} failed: {source}")]
    Send {
        dest: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RelayError {
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::Bind { .. } => "BIND_ERROR",
            RelayError::UnresolvableAddress(_) => "ADDRESS_RESOLUTION_ERROR",
            RelayError::Send { .. } => "SEND_ERROR",
            RelayError::Io(_) => "IO_ERROR",
        }
    }
}

/// Structured failure returned by every controller command.
///
/// `code` identifies the failed command family so the application can route
/// the error without parsing the message.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct CommandError {
    pub code: &'static str,
    pub message: String,
}

impl CommandError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn wrap(code: &'static str, err: &RelayError) -> Self {
        Self {
            code,
            message: format!("{} ({})", err, err.code()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let bind = RelayError::Bind {
            port: 7777,
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert_eq!(bind.code(), "BIND_ERROR");
        assert_eq!(
            RelayError::UnresolvableAddress("nope".into()).code(),
            "ADDRESS_RESOLUTION_ERROR"
        );
    }

    #[test]
    fn command_error_carries_family_code() {
        let err = RelayError::UnresolvableAddress("bad-host".into());
        let cmd = CommandError::wrap("SIGNALING_SEND_ERROR", &err);
        assert_eq!(cmd.code, "SIGNALING_SEND_ERROR");
        assert!(cmd.message.contains("bad-host"));
        assert!(cmd.message.contains("ADDRESS_RESOLUTION_ERROR"));
    }
}
