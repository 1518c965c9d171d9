//! Request scripts and envelope decoding.
//!
//! Every value-returning request is wrapped so the remote side evaluates
//! the expression exactly once, catches any exception, and prints
//!
//! ```text
//! <length>\n{"errored":false,"value":...}
//! ```
//!
//! `JSON.stringify` drops keys whose value is `undefined`, so an envelope
//! without a `value` key means the expression evaluated to `undefined`.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::{Error, Result};

use super::translate;

// ============================================================================
// Script Fragments
// ============================================================================

/// Opening of the plain value envelope. The expression follows directly.
pub const VALUE_OPEN: &str = "(function(){var r;try{r=JSON.stringify({errored:false,value:(";

/// Closing of the plain value envelope.
pub const VALUE_CLOSE: &str = concat!(
    ")});}catch(e){r=JSON.stringify({errored:true,value:{",
    "name:(e&&e.name)||\"Error\",",
    "message:(e&&e.message!==undefined)?String(e.message):String(e),",
    "stack:(e&&e.stack)||null}});}",
    "return r.length+\"\\n\"+r;})()"
);

/// Opening of the helper-backed value envelope.
pub const HELPER_VALUE_OPEN: &str = "__jsshHelper.envelope(function(){return (";

/// Closing of the helper-backed value envelope.
pub const HELPER_VALUE_CLOSE: &str = ");})";

/// Opening of the `typeof` check. The expression follows directly.
pub const TYPE_OPEN: &str = "(function(){var v=(";

/// Closing of the `typeof` check.
pub const TYPE_CLOSE: &str = ");var t=typeof v;return t==\"object\"&&v===null?\"null\":t;})()";

/// Opening of an assignment. The target expression follows directly.
pub const ASSIGN_OPEN: &str = "(function(v){";

/// Between the assignment target and the assigned value.
pub const ASSIGN_MIDDLE: &str = " = v; return null;})(";

/// Closing of an assignment.
pub const ASSIGN_CLOSE: &str = ")";

/// Opening of a store into a container slot. The stored expression follows.
pub const STORE_OPEN: &str = "(function(c,k){if(k in c)return false;c[k]=(";

/// Between the stored expression and the container argument.
pub const STORE_MIDDLE: &str = ");return true;})(";

/// Closing of a store.
pub const STORE_CLOSE: &str = ")";

// ============================================================================
// Script Builders
// ============================================================================

/// Wraps `expr` in the value envelope.
///
/// With the helper loaded the shorter helper call is used; both produce
/// the same reply.
#[must_use]
pub fn value_script(expr: &str, helper_loaded: bool) -> String {
    if helper_loaded {
        format!("{HELPER_VALUE_OPEN}{expr}{HELPER_VALUE_CLOSE}")
    } else {
        format!("{VALUE_OPEN}{expr}{VALUE_CLOSE}")
    }
}

/// Builds an expression yielding the `typeof` tag of `expr`, with `"null"`
/// for `null`.
///
/// `expr` is evaluated exactly once. An undeclared root binding throws a
/// `ReferenceError`, which the caller reads as `undefined`.
#[must_use]
pub fn type_script(expr: &str) -> String {
    format!("{TYPE_OPEN}{expr}{TYPE_CLOSE}")
}

/// Builds an expression assigning `value` to the target `expr`.
///
/// The assignment happens inside a function returning `null`, so the
/// reply never depends on what the assignment expression itself yields.
#[must_use]
pub fn assign_script(expr: &str, value: &str) -> String {
    format!("{ASSIGN_OPEN}{expr}{ASSIGN_MIDDLE}{value}{ASSIGN_CLOSE}")
}

/// Builds an expression storing `expr` under `key` in `container`.
///
/// Yields `false` without evaluating `expr` if the key is taken.
#[must_use]
pub fn store_script(expr: &str, container: &str, key: &str) -> String {
    format!("{STORE_OPEN}{expr}{STORE_MIDDLE}{container},{key}{STORE_CLOSE}")
}

/// Builds an expression yielding the scratch container, creating it first
/// if needed.
#[must_use]
pub fn scratch_container(name: &str) -> String {
    format!("(typeof {name}==\"object\"&&{name}!==null?{name}:({name}={{}}))")
}

// ============================================================================
// Envelope
// ============================================================================

/// Decoded `{errored, value}` reply.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Envelope {
    /// `true` if the remote evaluation threw.
    pub errored: bool,

    /// Evaluated value, or the caught exception. `None` for `undefined`.
    #[serde(default, deserialize_with = "present")]
    pub value: Option<Value>,
}

/// Keeps an explicit `null` as `Some(Value::Null)`.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Envelope {
    /// Parses an envelope payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the payload is not an envelope.
    pub fn parse(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Converts the envelope into the evaluated value.
    ///
    /// Returns `Ok(None)` for `undefined` (including a missing root
    /// binding) unless `error_on_undefined` is set.
    ///
    /// # Errors
    ///
    /// - [`Error::RemoteScript`] if the evaluation threw
    /// - [`Error::UndefinedReference`] for `undefined` when a value is required
    pub fn into_value(self, expression: &str, error_on_undefined: bool) -> Result<Option<Value>> {
        if self.errored {
            let err = translate::exception(self.value.as_ref().unwrap_or(&Value::Null), expression);
            if translate::is_missing_binding(&err, expression) {
                return absent(expression, error_on_undefined);
            }
            return Err(err);
        }

        match self.value {
            Some(value) => Ok(Some(value)),
            None => absent(expression, error_on_undefined),
        }
    }
}

fn absent(expression: &str, error_on_undefined: bool) -> Result<Option<Value>> {
    if error_on_undefined {
        Err(Error::undefined_reference(expression))
    } else {
        Ok(None)
    }
}

// ============================================================================
// Tests
// ============================================================================
