//! Error types for the JSSh client.
//!
//! This module defines the closed error taxonomy used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use firefox_jssh::{Connection, Error, Result};
//!
//! async fn example(connection: &Connection) -> Result<()> {
//!     match connection.evaluate("document.title").await {
//!         Ok(title) => println!("{title}"),
//!         Err(e) if e.is_undefined() => println!("no document"),
//!         Err(e) => return Err(e),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants | Recovery |
//! |----------|----------|----------|
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`] | reconnect |
//! | Framing | [`Error::Framing`], [`Error::Timeout`] | connection marked possibly desynced |
//! | Remote | [`Error::RemoteScript`] | fix the evaluated script |
//! | Absence | [`Error::UndefinedReference`] | treat as missing value |
//! | Caller | [`Error::InvalidArgument`], [`Error::Serialization`], [`Error::Config`] | fix the call |
//! | External | [`Error::Json`] | |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// RemoteErrorKind
// ============================================================================

/// Kind of exception raised by remote JavaScript.
///
/// Well-known ECMAScript error names map to dedicated variants; anything
/// else is preserved verbatim in [`RemoteErrorKind::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RemoteErrorKind {
    /// `ReferenceError`.
    ReferenceError,
    /// `TypeError`.
    TypeError,
    /// `SyntaxError`.
    SyntaxError,
    /// `RangeError`.
    RangeError,
    /// `EvalError`.
    EvalError,
    /// `URIError`.
    UriError,
    /// `InternalError` (SpiderMonkey specific, e.g. "too much recursion").
    InternalError,
    /// Plain `Error`.
    Error,
    /// Any other name, e.g. a DOM exception or a user-defined error class.
    Other(String),
}

impl RemoteErrorKind {
    /// Maps a remote error `name` to its kind.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "ReferenceError" => Self::ReferenceError,
            "TypeError" => Self::TypeError,
            "SyntaxError" => Self::SyntaxError,
            "RangeError" => Self::RangeError,
            "EvalError" => Self::EvalError,
            "URIError" => Self::UriError,
            "InternalError" => Self::InternalError,
            "Error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns the remote error name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::ReferenceError => "ReferenceError",
            Self::TypeError => "TypeError",
            Self::SyntaxError => "SyntaxError",
            Self::RangeError => "RangeError",
            Self::EvalError => "EvalError",
            Self::UriError => "URIError",
            Self::InternalError => "InternalError",
            Self::Error => "Error",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Use the `is_*` predicates to pick a recovery path.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when connection options are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Socket failure or handshake mismatch.
    ///
    /// Fatal to the connection. Callers must open a new one.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// The connection was closed or broken by an earlier failure.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Framing Errors
    // ========================================================================
    /// Response bytes did not match the expected framing.
    ///
    /// Marks the connection as possibly desynced.
    #[error("Framing error: {message}")]
    Framing {
        /// Description of the mismatch.
        message: String,
    },

    /// No response arrived in time.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Remote Errors
    // ========================================================================
    /// Remote JavaScript raised an exception.
    #[error("{kind}: {message}")]
    RemoteScript {
        /// Exception kind.
        kind: RemoteErrorKind,
        /// Exception message.
        message: String,
        /// Remote stack trace, if the engine provided one.
        stack: Option<String>,
        /// The script that was evaluated.
        script: String,
    },

    /// The evaluated expression is `undefined` but a value was required.
    #[error("Undefined reference: {expression}")]
    UndefinedReference {
        /// The expression that evaluated to `undefined`.
        expression: String,
    },

    // ========================================================================
    // Caller Errors
    // ========================================================================
    /// Invalid argument passed to an operation.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    /// A native value has no JavaScript source representation.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the value that could not be serialized.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Wraps a socket-level I/O failure as a connection error.
    #[inline]
    pub fn io(context: &str, err: IoError) -> Self {
        Self::Connection {
            message: format!("{context}: {err}"),
        }
    }

    /// Creates a framing error.
    #[inline]
    pub fn framing(message: impl Into<String>) -> Self {
        Self::Framing {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a remote script error.
    #[inline]
    pub fn remote_script(
        kind: RemoteErrorKind,
        message: impl Into<String>,
        stack: Option<String>,
        script: impl Into<String>,
    ) -> Self {
        Self::RemoteScript {
            kind,
            message: message.into(),
            stack,
            script: script.into(),
        }
    }

    /// Creates an undefined reference error.
    #[inline]
    pub fn undefined_reference(expression: impl Into<String>) -> Self {
        Self::UndefinedReference {
            expression: expression.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a serialization error.
    #[inline]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if the connection is unusable after this error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::ConnectionClosed)
    }

    /// Returns `true` if the response stream did not match expectations.
    #[inline]
    #[must_use]
    pub fn is_framing_error(&self) -> bool {
        matches!(self, Self::Framing { .. } | Self::Timeout { .. })
    }

    /// Returns `true` if remote JavaScript raised an exception.
    #[inline]
    #[must_use]
    pub fn is_remote_error(&self) -> bool {
        matches!(self, Self::RemoteScript { .. })
    }

    /// Returns `true` if this is an undefined reference error.
    #[inline]
    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::UndefinedReference { .. })
    }

    /// Returns the remote error kind, if this is a remote script error.
    #[inline]
    #[must_use]
    pub fn remote_kind(&self) -> Option<&RemoteErrorKind> {
        match self {
            Self::RemoteScript { kind, .. } => Some(kind),
            _ => None,
        }
    }

    /// Returns `true` if the same connection can be used for another request.
    ///
    /// Connection errors require a new connection. Everything else leaves
    /// the connection usable, framing errors after a drain-and-verify step.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !self.is_connection_error()
    }
}

// ============================================================================
// Tests
// ============================================================================
