//! Handles to remote values.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Root`] | Global scope accessor |
//! | [`RemoteRef`] | Lazily evaluated handle to a remote value |
//! | [`Resolved`] | Native value, living reference, or `undefined` |
//! | [`StoreTarget`] | Where a value is captured |

// ============================================================================
// Submodules
// ============================================================================

/// Remote value handles.
pub mod reference;

/// Global scope accessor.
pub mod root;

// ============================================================================
// Re-exports
// ============================================================================

pub use reference::{RemoteRef, Resolved, StoreTarget};
pub use root::Root;
