//! Socket transport.
//!
//! This module handles the byte-level conversation with the JSSh shell.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Connection     │          TCP                 │  Firefox        │
//! │  (Rust)         │◄────────────────────────────►│  JSSh shell     │
//! │                 │     127.0.0.1:9997           │                 │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Connection::connect` - Open the socket, verify the welcome line
//! 2. Optionally install the helper scripts (`done!` twice)
//! 3. `Connection::exchange` - One request, one framed reply, serialized
//! 4. `Connection::close` - Shut down; or drop after a connection error
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Handshake, exchange lock, desync tracking |
//! | `framing` | Prompt-delimited and length-prefixed reply decoding |
//! | `options` | Connection configuration |

// ============================================================================
// Submodules
// ============================================================================

/// Connection handle and exchange discipline.
pub mod connection;

/// Reply framing.
pub mod framing;

/// Connection configuration.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Connection, ShellStream};
pub use framing::{Frame, FrameDecoder, FrameMode, FrameState, PROMPT, Progress};
pub use options::ConnectionOptions;
