//! Remote `typeof` tags.

use std::fmt;

// ============================================================================
// JsType
// ============================================================================

/// Type of a remote value as reported by `typeof`.
///
/// Unlike native `typeof`, `null` has its own tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JsType {
    /// `undefined`.
    Undefined,
    /// `null`.
    Null,
    /// `boolean`.
    Boolean,
    /// `number`.
    Number,
    /// `string`.
    String,
    /// `symbol`.
    Symbol,
    /// `bigint`.
    BigInt,
    /// `object` (non-null).
    Object,
    /// `function`.
    Function,
    /// Host-specific tag (e.g. `xml` in old SpiderMonkey).
    Other(String),
}

impl JsType {
    /// Parses a `typeof` result.
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "undefined" => Self::Undefined,
            "null" => Self::Null,
            "boolean" => Self::Boolean,
            "number" => Self::Number,
            "string" => Self::String,
            "symbol" => Self::Symbol,
            "bigint" => Self::BigInt,
            "object" => Self::Object,
            "function" => Self::Function,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns the tag string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Number => "number",
            Self::String => "string",
            Self::Symbol => "symbol",
            Self::BigInt => "bigint",
            Self::Object => "object",
            Self::Function => "function",
            Self::Other(tag) => tag,
        }
    }

    /// Returns `true` for values that are copied by value rather than
    /// referenced: booleans, numbers, strings and `null`.
    #[inline]
    #[must_use]
    pub fn is_simple(&self) -> bool {
        matches!(self, Self::Boolean | Self::Number | Self::String | Self::Null)
    }
}

impl fmt::Display for JsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tag() {
        assert_eq!(JsType::from_tag("null"), JsType::Null);
        assert_eq!(JsType::from_tag("function"), JsType::Function);
        assert_eq!(JsType::from_tag("xml"), JsType::Other("xml".into()));
        assert_eq!(JsType::from_tag("xml").as_str(), "xml");
    }

    #[test]
    fn test_is_simple() {
        assert!(JsType::Null.is_simple());
        assert!(JsType::String.is_simple());
        assert!(!JsType::Object.is_simple());
        assert!(!JsType::Undefined.is_simple());
        assert!(!JsType::Symbol.is_simple());
    }
}
