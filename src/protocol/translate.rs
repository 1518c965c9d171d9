//! Classification of remote failures.
//!
//! | Observation | Result |
//! |-------------|--------|
//! | envelope with `errored: true` | [`Error::RemoteScript`] |
//! | bare `SyntaxError: syntax error` line | [`Error::RemoteScript`] with [`RemoteErrorKind::SyntaxError`] |
//! | other bare `<Name>Error: message` line | [`Error::RemoteScript`] |
//! | unrecognised unframed text | [`Error::Framing`] |
//! | `ReferenceError` for the expression's own root binding | [`Error::UndefinedReference`] when a value is required |

// ============================================================================
// Imports
// ============================================================================

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::{Error, RemoteErrorKind};

use super::is_member_chain;

// ============================================================================
// Constants
// ============================================================================

/// Reply printed by the shell when a request fails to parse.
pub const SYNTAX_ERROR_REPLY: &str = "SyntaxError: syntax error";

static RAW_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\A([A-Za-z_$][A-Za-z0-9_$]*(?:Error|Exception)): (.*)\z")
        .expect("raw error pattern is valid")
});

static ROOT_BINDING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\A\s*([A-Za-z_$][A-Za-z0-9_$]*)").expect("root binding pattern is valid")
});

// ============================================================================
// Envelope Errors
// ============================================================================

/// Converts the `value` of an errored envelope into a remote script error.
///
/// `value` is expected to look like `{name, message, stack?}`; anything
/// else is reported as a plain `Error` with its JSON text as the message.
#[must_use]
pub fn exception(value: &Value, source: &str) -> Error {
    let Some(fields) = value.as_object() else {
        return Error::remote_script(RemoteErrorKind::Error, value.to_string(), None, source);
    };

    let name = fields
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("Error");
    let message = match fields.get("message") {
        Some(Value::String(message)) => message.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    let stack = fields
        .get("stack")
        .and_then(Value::as_str)
        .filter(|stack| !stack.is_empty())
        .map(str::to_string);

    Error::remote_script(RemoteErrorKind::from_name(name), message, stack, source)
}

// ============================================================================
// Raw Replies
// ============================================================================

/// Recognises a bare error line printed by the shell itself.
///
/// Returns `None` if `text` is not an error line.
#[must_use]
pub fn raw_error(text: &str, source: &str) -> Option<Error> {
    let text = text.trim_end();
    if text == SYNTAX_ERROR_REPLY {
        return Some(Error::remote_script(
            RemoteErrorKind::SyntaxError,
            "syntax error",
            None,
            source,
        ));
    }

    let captures = RAW_ERROR.captures(text)?;
    Some(Error::remote_script(
        RemoteErrorKind::from_name(&captures[1]),
        &captures[2],
        None,
        source,
    ))
}

/// Classifies a reply that arrived without the expected length prefix.
#[must_use]
pub fn unframed(text: &str, source: &str) -> Error {
    raw_error(text, source).unwrap_or_else(|| {
        Error::framing(format!(
            "expected a length-prefixed reply, got {:?}",
            text.chars().take(64).collect::<String>()
        ))
    })
}

// ============================================================================
// Undefined Bindings
// ============================================================================

/// Returns `true` if `err` reports that the root binding of `expression`
/// does not exist (`ReferenceError: foo is not defined` for `foo.bar`).
///
/// Only member chains qualify: calling an undeclared function stays a
/// script error. Such errors mean "no value" rather than "broken script".
#[must_use]
pub fn is_missing_binding(err: &Error, expression: &str) -> bool {
    let Error::RemoteScript {
        kind: RemoteErrorKind::ReferenceError,
        message,
        ..
    } = err
    else {
        return false;
    };
    if !is_member_chain(expression.trim()) {
        return false;
    }
    let Some(root) = ROOT_BINDING.captures(expression) else {
        return false;
    };
    let root = &root[1];

    message == &format!("{root} is not defined")
        || message == &format!("'{root}' is not defined")
        || message == &format!("Can't find variable: {root}")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_exception_fields() {
        let value = json!({
            "name": "TypeError",
            "message": "x is null",
            "stack": "@line 1"
        });
        let err = exception(&value, "x.y");
        match err {
            Error::RemoteScript {
                kind,
                message,
                stack,
                script,
            } => {
                assert_eq!(kind, RemoteErrorKind::TypeError);
                assert_eq!(message, "x is null");
                assert_eq!(stack.as_deref(), Some("@line 1"));
                assert_eq!(script, "x.y");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_exception_unknown_name_is_preserved() {
        let err = exception(&json!({"name": "NS_ERROR_NOT_AVAILABLE", "message": ""}), "f()");
        assert_eq!(
            err.remote_kind(),
            Some(&RemoteErrorKind::Other("NS_ERROR_NOT_AVAILABLE".into()))
        );
    }

    #[test]
    fn test_exception_non_object() {
        let err = exception(&json!("boom"), "throw 'boom'");
        assert_eq!(err.remote_kind(), Some(&RemoteErrorKind::Error));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_syntax_error_reply() {
        let err = raw_error("SyntaxError: syntax error\n", "2+").expect("error");
        assert_eq!(err.remote_kind(), Some(&RemoteErrorKind::SyntaxError));
    }

    #[test]
    fn test_raw_reference_error() {
        let err = raw_error("ReferenceError: foo is not defined", "foo").expect("error");
        assert_eq!(err.remote_kind(), Some(&RemoteErrorKind::ReferenceError));
    }

    #[test]
    fn test_plain_text_is_not_error() {
        assert!(raw_error("4", "2+2").is_none());
        assert!(raw_error("hello: world", "x").is_none());
    }

    #[test]
    fn test_unframed_garbage_is_framing_error() {
        assert!(matches!(unframed("garbage", "x"), Error::Framing { .. }));
    }

    #[test]
    fn test_missing_binding() {
        let err = Error::remote_script(
            RemoteErrorKind::ReferenceError,
            "undefinedGlobalXyz is not defined",
            None,
            "undefinedGlobalXyz",
        );
        assert!(is_missing_binding(&err, "undefinedGlobalXyz"));
        assert!(is_missing_binding(&err, "undefinedGlobalXyz.foo"));
        assert!(!is_missing_binding(&err, "other.undefinedGlobalXyz"));
        assert!(!is_missing_binding(&err, "f(undefinedGlobalXyz)"));
        assert!(is_missing_binding(&err, "undefinedGlobalXyz[\"a b\"][0]"));

        let call = Error::remote_script(
            RemoteErrorKind::ReferenceError,
            "missingFn is not defined",
            None,
            "missingFn(1)",
        );
        assert!(!is_missing_binding(&call, "missingFn(1)"));
        assert!(!is_missing_binding(&call, "missingFn.bind(null)(1)"));
        assert!(is_missing_binding(&call, "missingFn"));

        let type_err = Error::remote_script(
            RemoteErrorKind::TypeError,
            "undefinedGlobalXyz is not defined",
            None,
            "undefinedGlobalXyz",
        );
        assert!(!is_missing_binding(&type_err, "undefinedGlobalXyz"));
    }
}
