//! Error types for Hermes hardware access

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Hermes operations
pub type Result<T> = std::result::Result<T, HalError>;

/// Errors that can occur while talking to the board
#[derive(Debug, Error)]
pub enum HalError {
    /// Register name not present in the address table
    #[error("Unknown register: {name}")]
    UnknownRegister {
        /// Name that was looked up
        name: String,
    },

    /// Word access outside the mapped window
    #[error("Address {addr:#x} (+{count} words) out of range (window is {limit:#x} words)")]
    OutOfRange {
        /// First word address of the access
        addr: u64,
        /// Number of words accessed
        count: usize,
        /// Window length in words
        limit: usize,
    },

    /// RPC message is not a JSON object
    #[error("Invalid encoding: {reason}")]
    InvalidEncoding {
        /// Parser diagnostic
        reason: String,
    },

    /// RPC message has the wrong field set
    #[error("Invalid message: {reason}")]
    InvalidMessage {
        /// What was wrong with the fields
        reason: String,
    },

    /// Address or mask is not an integer in `[0, 0xFFFFFFFF]`
    #[error("Invalid {field}: {value}")]
    InvalidAddress {
        /// Offending field (`addr` or `mask`)
        field: &'static str,
        /// Raw value as received
        value: String,
    },

    /// RPC command other than `read` or `write`
    #[error("Invalid command: {cmd}")]
    InvalidCommand {
        /// Command as received
        cmd: String,
    },

    /// RPC server did not answer in time
    #[error("No reply from register server after {duration_ms}ms")]
    ServerReplyTimeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// Firmware did not produce a mailbox reply in time
    #[error("Mailbox reply timeout after {duration_ms}ms (num_replies stuck at {num_replies})")]
    MailboxTimeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
        /// Counter value that never changed
        num_replies: u32,
    },

    /// Datagram cannot be placed in a mailbox page
    #[error("Invalid datagram: {reason}")]
    InvalidDatagram {
        /// Reason for rejection
        reason: String,
    },

    /// Mailbox page header is missing its flag bit
    #[error("Invalid page header {word:#010x} at word {addr:#x}")]
    InvalidPageHeader {
        /// Word address of the header
        addr: u32,
        /// Raw header word
        word: u32,
    },

    /// Register descriptor with an empty mask
    #[error("Register {name} has an empty mask")]
    InvalidRegister {
        /// Register name
        name: String,
    },

    /// Address table could not be loaded
    #[error("Invalid address table {path}: {reason}")]
    InvalidAddressTable {
        /// Source of the table
        path: PathBuf,
        /// Reason for failure
        reason: String,
    },

    /// Mapping the AXI window failed
    #[error("Failed to map memory window: {reason}")]
    MappingFailed {
        /// Reason for failure
        reason: String,
    },

    /// Error reported by a remote register server
    #[error("Register server reported {kind}")]
    Remote {
        /// Error kind from the reply
        kind: ErrorKind,
    },

    /// I/O error on a socket or device file
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl HalError {
    /// Create an unknown register error
    pub fn unknown_register(name: impl Into<String>) -> Self {
        Self::UnknownRegister { name: name.into() }
    }

    /// Create an out of range error
    pub fn out_of_range(addr: u64, count: usize, limit: usize) -> Self {
        Self::OutOfRange { addr, count, limit }
    }

    /// Create an invalid encoding error
    pub fn invalid_encoding(reason: impl Into<String>) -> Self {
        Self::InvalidEncoding {
            reason: reason.into(),
        }
    }

    /// Create an invalid message error
    pub fn invalid_message(reason: impl Into<String>) -> Self {
        Self::InvalidMessage {
            reason: reason.into(),
        }
    }

    /// Create an invalid address error
    pub fn invalid_address(field: &'static str, value: impl fmt::Display) -> Self {
        Self::InvalidAddress {
            field,
            value: value.to_string(),
        }
    }

    /// Create an invalid datagram error
    pub fn invalid_datagram(reason: impl Into<String>) -> Self {
        Self::InvalidDatagram {
            reason: reason.into(),
        }
    }

    /// Create a mapping failed error
    pub fn mapping_failed(reason: impl Into<String>) -> Self {
        Self::MappingFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid address table error
    pub fn invalid_address_table(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidAddressTable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Wire-level kind of this error, if it has one
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::UnknownRegister { .. } => Some(ErrorKind::UnknownRegister),
            Self::OutOfRange { .. } => Some(ErrorKind::OutOfRange),
            Self::InvalidEncoding { .. } => Some(ErrorKind::InvalidEncoding),
            Self::InvalidMessage { .. } => Some(ErrorKind::InvalidMessage),
            Self::InvalidAddress { .. } => Some(ErrorKind::InvalidAddress),
            Self::InvalidCommand { .. } => Some(ErrorKind::InvalidCommand),
            Self::ServerReplyTimeout { .. } => Some(ErrorKind::ServerReplyTimeout),
            Self::MailboxTimeout { .. } => Some(ErrorKind::MailboxTimeout),
            Self::Remote { kind } => Some(*kind),
            _ => None,
        }
    }
}

/// Error names carried on the RPC wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Register name not in the address table
    UnknownRegister,
    /// Access outside the mapped window
    OutOfRange,
    /// Request is not a JSON object
    InvalidEncoding,
    /// Request has the wrong field set
    InvalidMessage,
    /// Address or mask out of range
    InvalidAddress,
    /// Unrecognised command
    InvalidCommand,
    /// Server did not reply in time
    ServerReplyTimeout,
    /// Firmware did not reply in time
    MailboxTimeout,
    /// Any other failure on the server side
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_distinguishable() {
        assert_eq!(
            HalError::unknown_register("x").kind(),
            Some(ErrorKind::UnknownRegister)
        );
        assert_eq!(
            HalError::out_of_range(0x10, 1, 4).kind(),
            Some(ErrorKind::OutOfRange)
        );
        assert_eq!(HalError::mapping_failed("nope").kind(), None);
    }

    #[test]
    fn kind_serializes_as_bare_name() {
        let json = serde_json::to_string(&ErrorKind::InvalidMessage).unwrap();
        assert_eq!(json, "\"InvalidMessage\"");
        assert_eq!(ErrorKind::InvalidCommand.to_string(), "InvalidCommand");
    }
}
