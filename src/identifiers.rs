//! Type-safe identifiers.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use uuid::Uuid;

use crate::error::Result;
use crate::protocol::ToJs;
use crate::protocol::marshal::string_literal;

// ============================================================================
// SlotKey
// ============================================================================

/// Key of a temporary slot in a remote container.
///
/// Keys are random; a collision with an existing slot is resolved by the
/// caller drawing a new key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotKey(String);

impl SlotKey {
    /// Generates a new random key.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("s{}", Uuid::new_v4().simple()))
    }

    /// Returns the key as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl ToJs for SlotKey {
    fn to_js(&self) -> Result<String> {
        string_literal(&self.0)
    }

    fn to_js_key(&self) -> Result<String> {
        self.to_js()
    }
}

// ============================================================================
// Tests
// ============================================================================
