//! Connection configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use firefox_jssh::ConnectionOptions;
//!
//! let options = ConnectionOptions::new()
//!     .with_port(9997)
//!     .with_read_timeout(Duration::from_secs(10))
//!     .with_extension();
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default JSSh host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default JSSh port.
pub const DEFAULT_PORT: u16 = 9997;

/// Default timeout waiting for the first byte of a response.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Default timeout once a response has started arriving.
pub const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_secs(1);

/// Default global holding stored temporary values.
pub const DEFAULT_SCRATCH: &str = "__jsshScratch";

// ============================================================================
// ConnectionOptions
// ============================================================================

/// Options for opening a [`Connection`](super::Connection).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Host the shell listens on.
    pub host: String,

    /// Port the shell listens on.
    pub port: u16,

    /// Maximum wait for the first byte of a response.
    pub read_timeout: Duration,

    /// Maximum wait between chunks once a response has started.
    ///
    /// Also bounds the trailing-prompt and desync-drain reads.
    pub settle_timeout: Duration,

    /// Send the bundled helper script during the handshake.
    pub load_extension: bool,

    /// Name of the remote global used as the scratch container.
    pub scratch: String,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ConnectionOptions {
    /// Creates options pointing at `127.0.0.1:9997` without the helper script.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            settle_timeout: DEFAULT_SETTLE_TIMEOUT,
            load_extension: false,
            scratch: DEFAULT_SCRATCH.to_string(),
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ConnectionOptions {
    /// Sets the host.
    #[inline]
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the port.
    #[inline]
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the first-byte timeout.
    #[inline]
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the between-chunks timeout.
    #[inline]
    #[must_use]
    pub fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = timeout;
        self
    }

    /// Loads the bundled helper script during the handshake.
    #[inline]
    #[must_use]
    pub fn with_extension(mut self) -> Self {
        self.load_extension = true;
        self
    }

    /// Sets the scratch container global.
    #[inline]
    #[must_use]
    pub fn with_scratch(mut self, name: impl Into<String>) -> Self {
        self.scratch = name.into();
        self
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl ConnectionOptions {
    /// Returns `host:port`.
    #[inline]
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Checks that the options describe a usable connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an empty host, zero timeouts, or a
    /// scratch name that is not a JavaScript identifier.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::config("host must not be empty"));
        }
        if self.read_timeout.is_zero() || self.settle_timeout.is_zero() {
            return Err(Error::config("timeouts must be non-zero"));
        }
        if !crate::protocol::is_identifier(&self.scratch) {
            return Err(Error::config(format!(
                "scratch container {:?} is not a JavaScript identifier",
                self.scratch
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
