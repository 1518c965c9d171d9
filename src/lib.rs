//! Firefox JSSh client - remote JavaScript objects over the JavaScript shell.
//!
//! This library connects to the JSSh TCP shell inside a running Firefox
//! (or any Mozilla application embedding it) and exposes remote
//! JavaScript values as local handles.
//!
//! # Architecture
//!
//! - **Transport**: one TCP socket, a welcome-line handshake, and
//!   length-prefixed replies read with timeouts
//! - **Protocol**: requests are JavaScript source; values come back
//!   wrapped in a `{errored, value}` JSON envelope
//! - **Remote**: [`RemoteRef`] names a value by expression and only talks
//!   to the shell when resolved, read, assigned or stored
//!
//! Key design principles:
//!
//! - One request in flight per connection; concurrent callers queue
//! - Every expression is evaluated exactly once per request
//! - Call results are captured in a scratch slot before reuse
//! - A connection that lost sync is closed, never silently repaired
//!
//! # Quick Start
//!
//! ```no_run
//! use firefox_jssh::{Connection, ConnectionOptions, Resolved, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let connection = Connection::connect(ConnectionOptions::new().with_port(9997)).await?;
//!     let root = connection.root();
//!
//!     let sum = connection.evaluate("2+2").await?;
//!     println!("2+2 = {sum}");
//!
//!     let window = root.binding("window")?;
//!     let title = window.property("document")?.property("title")?.value().await?;
//!     println!("Title: {title}");
//!
//!     if let Resolved::Value(agent) = root.invoke("eval", &[&"navigator.userAgent"]).await? {
//!         println!("User agent: {agent}");
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`assets`] | Handshake scripts |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Scratch slot keys |
//! | [`protocol`] | Request scripts, marshaling, reply decoding |
//! | [`remote`] | [`Root`], [`RemoteRef`] |
//! | [`transport`] | Socket, framing, [`Connection`] |

// ============================================================================
// Modules
// ============================================================================

/// Scripts sent during the handshake.
pub mod assets;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Request scripts, value marshaling and reply decoding.
pub mod protocol;

/// Handles to remote values.
pub mod remote;

/// Socket, framing and connection management.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, RemoteErrorKind, Result};

// Identifier types
pub use identifiers::SlotKey;

// Protocol types
pub use protocol::{JsType, Symbol, ToJs};

// Remote types
pub use remote::{RemoteRef, Resolved, Root, StoreTarget};

// Transport types
pub use transport::{Connection, ConnectionOptions, ShellStream};
