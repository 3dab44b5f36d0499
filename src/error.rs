//! All possible non-I/O errors, plus the handshake abort report.
//!
use core::{
    error,
    fmt::{Display, Formatter},
};
use std::io::{self, ErrorKind};

use crate::initiator::HandshakeState;

/// Enumeration of all possible non-I/O errors.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum Error {
    /// The process configuration is missing or malformed.
    ///
    /// # Suggested error handling strategy
    ///
    /// This error is fatal at startup. The process cannot bind its listener
    /// or compose handshakes without a complete configuration.
    Config(ConfigError),

    /// A record received from the remote server does not follow the record
    /// layer framing.
    ///
    /// # Suggested error handling strategy
    ///
    /// This error is fatal for the relay pair that observed it. A framed
    /// stream cannot be resynchronised mid-session.
    BadRecord(BadRecord),
}

/// Errors raised while reading the configuration source.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum ConfigError {
    /// A required environment variable is absent or empty.
    MissingVariable {
        /// Name of the variable.
        name: &'static str,
    },

    /// A port variable does not hold a number in `0..=65535`.
    InvalidPort {
        /// Name of the variable.
        name: &'static str,
        /// The received value.
        value: String,
    },

    /// A required plugin option is absent.
    MissingOption {
        /// Name of the option.
        name: &'static str,
    },

    /// A plugin option holds a value that cannot be used.
    InvalidOption {
        /// Name of the option.
        name: &'static str,
        /// The received value.
        value: String,
    },

    /// The plugin options string is not a valid `key=value` list.
    MalformedOptions {
        /// The offending fragment.
        fragment: String,
    },

    /// The plugin options named a file that cannot be read or parsed.
    OptionsFile {
        /// Path of the file.
        path: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Ways a received record can violate the framing.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum BadRecord {
    /// Fewer bytes than a record header.
    Truncated {
        /// Number of bytes received.
        received: usize,
    },

    /// The `length` field disagrees with the bytes that follow the header.
    LengthMismatch {
        /// The `length` field of the header.
        declared: usize,
        /// The number of body bytes present.
        actual: usize,
    },

    /// The `length` field exceeds the largest record a TLS peer may send.
    Oversized {
        /// The `length` field of the header.
        declared: usize,
    },
}

/// A handshake initiation that stopped before the relay started.
///
/// Both the local connection and, if it was opened, the remote connection
/// have been closed by the time this value is observed.
#[derive(Debug)]
pub struct HandshakeAborted {
    state: HandshakeState,
    source: io::Error,
}

impl HandshakeAborted {
    pub(crate) fn new(state: HandshakeState, source: io::Error) -> Self {
        Self { state, source }
    }

    /// The state the initiator was in when the failing step ran.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// The I/O failure that stopped the sequence.
    pub fn io_error(&self) -> &io::Error {
        &self.source
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Config(err) => write!(f, "Config: {}", err),
            Error::BadRecord(err) => write!(f, "BadRecord: {}", err),
        }
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::MissingVariable { name } => {
                write!(f, "MissingVariable: {} is not set", name)
            }
            ConfigError::InvalidPort { name, value } => {
                write!(f, "InvalidPort: {}={:?}", name, value)
            }
            ConfigError::MissingOption { name } => write!(f, "MissingOption: {}", name),
            ConfigError::InvalidOption { name, value } => {
                write!(f, "InvalidOption: {}={:?}", name, value)
            }
            ConfigError::MalformedOptions { fragment } => {
                write!(f, "MalformedOptions: {:?}", fragment)
            }
            ConfigError::OptionsFile { path, reason } => {
                write!(f, "OptionsFile: {}: {}", path, reason)
            }
        }
    }
}

impl Display for BadRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            BadRecord::Truncated { received } => {
                write!(f, "Truncated: received {} bytes", received)
            }
            BadRecord::LengthMismatch { declared, actual } => write!(
                f,
                "LengthMismatch: declared {}, actual {}",
                declared, actual
            ),
            BadRecord::Oversized { declared } => write!(f, "Oversized: declared {}", declared),
        }
    }
}

impl Display for HandshakeAborted {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "handshake aborted in state {}: {}", self.state, self.source)
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Config(err) => Some(err),
            Error::BadRecord(err) => Some(err),
        }
    }
}

impl error::Error for ConfigError {}

impl error::Error for BadRecord {}

impl error::Error for HandshakeAborted {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        Some(&self.source)
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        let kind = match e {
            Error::Config(_) => ErrorKind::InvalidInput,
            Error::BadRecord(_) => ErrorKind::InvalidData,
        };
        io::Error::new(kind, e)
    }
}

impl From<BadRecord> for io::Error {
    fn from(e: BadRecord) -> Self {
        Error::from(e).into()
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<BadRecord> for Error {
    fn from(e: BadRecord) -> Self {
        Error::BadRecord(e)
    }
}
