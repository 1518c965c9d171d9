//! JSSh scripting protocol.
//!
//! The shell has no message types of its own: requests are JavaScript
//! source and responses are whatever the shell prints. This module owns
//! the scripts the client sends and the interpretation of what comes back.
//!
//! # Protocol Overview
//!
//! | Piece | Direction | Purpose |
//! |-------|-----------|---------|
//! | [`ToJs`] | Local → Remote | native value as JavaScript source |
//! | value envelope | Local → Remote | evaluate once, report `{errored, value}` with a length prefix |
//! | [`Envelope`] | Remote → Local | decoded `{errored, value}` |
//! | translation | Remote → Local | remote exceptions and raw error lines as [`Error`](crate::Error) |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `envelope` | Request scripts and envelope decoding |
//! | `js_type` | `typeof` tags |
//! | `marshal` | Native → JavaScript source conversion |
//! | `translate` | Error classification |

// ============================================================================
// Imports
// ============================================================================

use std::sync::LazyLock;

use regex::Regex;

// ============================================================================
// Submodules
// ============================================================================

/// Request scripts and envelope decoding.
pub mod envelope;

/// Remote `typeof` tags.
pub mod js_type;

/// Native value to JavaScript source conversion.
pub mod marshal;

/// Error classification.
pub mod translate;

// ============================================================================
// Re-exports
// ============================================================================

pub use envelope::Envelope;
pub use js_type::JsType;
pub use marshal::{Symbol, ToJs};

// ============================================================================
// Identifiers
// ============================================================================

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").expect("identifier pattern is valid")
});

/// Returns `true` if `name` is a plain JavaScript identifier.
///
/// Only ASCII identifiers are accepted.
#[inline]
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// Identifier chains with dotted or literal subscripts, e.g.
/// `a.b["c"][0]`. These take `.name`, `[key]` or `(args)` without
/// parentheses and evaluate without running any call.
static MEMBER_CHAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^[A-Za-z_$][A-Za-z0-9_$]*(?:\.[A-Za-z_$][A-Za-z0-9_$]*|\["(?:[^"\\]|\\.)*"\]|\[\d+\])*$"#,
    )
    .expect("member chain pattern is valid")
});

/// Returns `true` if `expr` is a plain member chain.
#[inline]
#[must_use]
pub fn is_member_chain(expr: &str) -> bool {
    MEMBER_CHAIN.is_match(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("document"));
        assert!(is_identifier("_private"));
        assert!(is_identifier("$"));
        assert!(is_identifier("a1"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("1a"));
        assert!(!is_identifier("a.b"));
        assert!(!is_identifier("a b"));
        assert!(!is_identifier("a;alert(1)"));
    }
}
