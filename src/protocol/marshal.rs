//! Native value to JavaScript source conversion.
//!
//! Values are rendered as JavaScript literals that can be spliced into a
//! request script:
//!
//! | Native | JavaScript |
//! |--------|------------|
//! | `bool`, numbers, strings, [`Symbol`], `None`, `()` | JSON literal |
//! | slices, `Vec`, sets | `[a,b,...]` |
//! | maps | `{k:v,...}` |
//! | [`serde_json::Value`] | JSON literal |
//! | [`regex::Regex`] | `/source/flags` |
//! | [`RemoteRef`](crate::RemoteRef) | its expression, verbatim |
//!
//! # Example
//!
//! ```ignore
//! use std::collections::BTreeMap;
//! use firefox_jssh::protocol::{Symbol, ToJs};
//!
//! let mut map = BTreeMap::new();
//! map.insert(Symbol::new("ids"), vec![1, 2]);
//! assert_eq!(map.to_js()?, r#"{"ids":[1,2]}"#);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::hash::BuildHasher;

use regex::Regex;
use serde_json::Value;

use crate::error::{Error, Result};

// ============================================================================
// ToJs
// ============================================================================

/// Conversion of a native value into JavaScript source text.
///
/// Implementors are `Sync` so argument lists (`&[&dyn ToJs]`) can be held
/// across an await in a `Send` future.
pub trait ToJs: Sync {
    /// Renders the value as a JavaScript expression.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if the value has no JavaScript
    /// representation.
    fn to_js(&self) -> Result<String>;

    /// Renders the value as an object literal key.
    ///
    /// Defaults to a computed key (`[expr]`); strings, numbers and symbols
    /// render as plain literal keys.
    ///
    /// # Errors
    ///
    /// Same as [`to_js`](Self::to_js).
    fn to_js_key(&self) -> Result<String> {
        Ok(format!("[{}]", self.to_js()?))
    }
}

// ============================================================================
// Symbol
// ============================================================================

/// A symbolic name, rendered as a JavaScript string.
///
/// Useful as a map key when the key is a name rather than data.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(String);

impl Symbol {
    /// Creates a symbol.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the symbol name.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl ToJs for Symbol {
    fn to_js(&self) -> Result<String> {
        string_literal(&self.0)
    }

    fn to_js_key(&self) -> Result<String> {
        self.to_js()
    }
}

// ============================================================================
// Primitives
// ============================================================================

impl ToJs for bool {
    fn to_js(&self) -> Result<String> {
        Ok(if *self { "true" } else { "false" }.to_string())
    }
}

/// Largest integer a JavaScript number holds exactly (`2^53 - 1`).
pub const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

macro_rules! impl_to_js_integer {
    ($($ty:ty),*) => {
        $(
            impl ToJs for $ty {
                fn to_js(&self) -> Result<String> {
                    Ok(self.to_string())
                }

                fn to_js_key(&self) -> Result<String> {
                    self.to_js()
                }
            }
        )*
    };
}

impl_to_js_integer!(i8, i16, i32, u8, u16, u32);

macro_rules! impl_to_js_wide_integer {
    ($($ty:ty),*) => {
        $(
            impl ToJs for $ty {
                fn to_js(&self) -> Result<String> {
                    let exact = i128::try_from(*self)
                        .is_ok_and(|v| v.unsigned_abs() <= u128::from(MAX_SAFE_INTEGER));
                    if !exact {
                        return Err(unsafe_integer(*self));
                    }
                    Ok(self.to_string())
                }

                fn to_js_key(&self) -> Result<String> {
                    self.to_js()
                }
            }
        )*
    };
}

impl_to_js_wide_integer!(i64, i128, isize, u64, u128, usize);

macro_rules! impl_to_js_float {
    ($($ty:ty),*) => {
        $(
            impl ToJs for $ty {
                fn to_js(&self) -> Result<String> {
                    if !self.is_finite() {
                        return Err(Error::serialization(format!(
                            "non-finite number {self} has no JSON form"
                        )));
                    }
                    Ok(serde_json::to_string(self)?)
                }

                fn to_js_key(&self) -> Result<String> {
                    self.to_js()
                }
            }
        )*
    };
}

impl_to_js_float!(f32, f64);

impl ToJs for str {
    fn to_js(&self) -> Result<String> {
        string_literal(self)
    }

    fn to_js_key(&self) -> Result<String> {
        self.to_js()
    }
}

impl ToJs for String {
    fn to_js(&self) -> Result<String> {
        string_literal(self)
    }

    fn to_js_key(&self) -> Result<String> {
        self.to_js()
    }
}

impl ToJs for char {
    fn to_js(&self) -> Result<String> {
        string_literal(self.encode_utf8(&mut [0; 4]))
    }

    fn to_js_key(&self) -> Result<String> {
        self.to_js()
    }
}

impl ToJs for () {
    fn to_js(&self) -> Result<String> {
        Ok("null".to_string())
    }
}

impl<T: ToJs> ToJs for Option<T> {
    fn to_js(&self) -> Result<String> {
        match self {
            Some(value) => value.to_js(),
            None => Ok("null".to_string()),
        }
    }
}

impl<T: ToJs + ?Sized> ToJs for &T {
    fn to_js(&self) -> Result<String> {
        (**self).to_js()
    }

    fn to_js_key(&self) -> Result<String> {
        (**self).to_js_key()
    }
}

impl<T: ToJs + ?Sized> ToJs for Box<T> {
    fn to_js(&self) -> Result<String> {
        (**self).to_js()
    }

    fn to_js_key(&self) -> Result<String> {
        (**self).to_js_key()
    }
}

// ============================================================================
// Collections
// ============================================================================

impl<T: ToJs> ToJs for [T] {
    fn to_js(&self) -> Result<String> {
        array_literal(self.iter())
    }
}

impl<T: ToJs, const N: usize> ToJs for [T; N] {
    fn to_js(&self) -> Result<String> {
        array_literal(self.iter())
    }
}

impl<T: ToJs> ToJs for Vec<T> {
    fn to_js(&self) -> Result<String> {
        array_literal(self.iter())
    }
}

impl<T: ToJs, S: BuildHasher + Sync> ToJs for HashSet<T, S> {
    fn to_js(&self) -> Result<String> {
        array_literal(self.iter())
    }
}

impl<T: ToJs> ToJs for BTreeSet<T> {
    fn to_js(&self) -> Result<String> {
        array_literal(self.iter())
    }
}

impl<K: ToJs, V: ToJs, S: BuildHasher + Sync> ToJs for HashMap<K, V, S> {
    fn to_js(&self) -> Result<String> {
        object_literal(self.iter())
    }
}

impl<K: ToJs, V: ToJs> ToJs for BTreeMap<K, V> {
    fn to_js(&self) -> Result<String> {
        object_literal(self.iter())
    }
}

impl ToJs for Value {
    fn to_js(&self) -> Result<String> {
        match self {
            Value::String(s) => string_literal(s),
            Value::Array(items) => array_literal(items.iter()),
            Value::Object(map) => {
                let mut pairs = Vec::with_capacity(map.len());
                for (key, value) in map {
                    pairs.push(format!("{}:{}", string_literal(key)?, value.to_js()?));
                }
                Ok(format!("{{{}}}", pairs.join(",")))
            }
            Value::Number(n) => {
                if let Some(v) = n.as_i64() {
                    v.to_js()
                } else if let Some(v) = n.as_u64() {
                    v.to_js()
                } else {
                    Ok(serde_json::to_string(n)?)
                }
            }
            other => Ok(serde_json::to_string(other)?),
        }
    }
}

// ============================================================================
// Regular Expressions
// ============================================================================

impl ToJs for Regex {
    /// Renders a regex literal.
    ///
    /// Only the leading inline `i` and `m` flags survive; every other flag
    /// is dropped, and the pattern body is passed through unchanged, so
    /// Rust-only syntax will not work remotely.
    fn to_js(&self) -> Result<String> {
        Ok(regex_literal(self.as_str()))
    }
}

/// Converts a Rust regex pattern into a JavaScript regex literal.
#[must_use]
pub fn regex_literal(pattern: &str) -> String {
    let (flags, body) = split_inline_flags(pattern);

    let mut source = String::with_capacity(body.len() + 2);
    let mut escaped = false;
    for ch in body.chars() {
        match ch {
            '/' if !escaped => source.push_str("\\/"),
            '\n' => source.push_str("\\n"),
            _ => source.push(ch),
        }
        escaped = ch == '\\' && !escaped;
    }
    if source.is_empty() {
        source.push_str("(?:)");
    }

    format!("/{source}/{flags}")
}

/// Strips a leading `(?flags)` group, returning the JavaScript flags it
/// carries and the remaining pattern.
fn split_inline_flags(pattern: &str) -> (String, &str) {
    let Some(rest) = pattern.strip_prefix("(?") else {
        return (String::new(), pattern);
    };
    let Some(end) = rest.find(')') else {
        return (String::new(), pattern);
    };
    let group = &rest[..end];
    if group.is_empty() || !group.chars().all(|c| "imsxuUR-".contains(c)) {
        // `(?:...)`, `(?P<..>...)` and friends are not flag groups
        return (String::new(), pattern);
    }

    let enabled = group.split('-').next().unwrap_or_default();
    let mut flags = String::new();
    if enabled.contains('i') {
        flags.push('i');
    }
    if enabled.contains('m') {
        flags.push('m');
    }
    (flags, &rest[end + 1..])
}

// ============================================================================
// Helpers
// ============================================================================

/// Renders a JavaScript string literal.
///
/// U+2028 and U+2029 are valid in JSON strings but terminate lines in
/// older JavaScript engines, so they are escaped.
pub(crate) fn string_literal(s: &str) -> Result<String> {
    let json = serde_json::to_string(s)?;
    if json.contains(['\u{2028}', '\u{2029}']) {
        return Ok(json.replace('\u{2028}', "\\u2028").replace('\u{2029}', "\\u2029"));
    }
    Ok(json)
}

/// Renders a comma-separated argument list.
pub(crate) fn argument_list(args: &[&dyn ToJs]) -> Result<String> {
    let rendered = args.iter().map(|arg| arg.to_js()).collect::<Result<Vec<_>>>()?;
    Ok(rendered.join(","))
}

fn array_literal<'a, T, I>(items: I) -> Result<String>
where
    T: ToJs + 'a + ?Sized,
    I: Iterator<Item = &'a T>,
{
    let rendered = items.map(ToJs::to_js).collect::<Result<Vec<_>>>()?;
    Ok(format!("[{}]", rendered.join(",")))
}

fn object_literal<'a, K, V, I>(pairs: I) -> Result<String>
where
    K: ToJs + 'a,
    V: ToJs + 'a,
    I: Iterator<Item = (&'a K, &'a V)>,
{
    let rendered = pairs
        .map(|(key, value)| Ok(format!("{}:{}", key.to_js_key()?, value.to_js()?)))
        .collect::<Result<Vec<_>>>()?;
    Ok(format!("{{{}}}", rendered.join(",")))
}

/// Error for an integer JavaScript would round.
fn unsafe_integer(value: impl fmt::Display) -> Error {
    Error::serialization(format!(
        "integer {value} is outside the exact JavaScript number range"
    ))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use rustc_hash::FxHashMap;
    use serde_json::json;

    #[test]
    fn test_primitives() {
        assert_eq!(true.to_js().unwrap(), "true");
        assert_eq!(42i32.to_js().unwrap(), "42");
        assert_eq!((-1.5f64).to_js().unwrap(), "-1.5");
        assert_eq!("a\"b".to_js().unwrap(), r#""a\"b""#);
        assert_eq!(None::<i32>.to_js().unwrap(), "null");
        assert_eq!(().to_js().unwrap(), "null");
        assert_eq!(Symbol::new("name").to_js().unwrap(), r#""name""#);
    }

    #[test]
    fn test_non_finite_is_error() {
        assert!(matches!(f64::NAN.to_js(), Err(Error::Serialization { .. })));
        assert!(f64::INFINITY.to_js().is_err());
    }

    #[test]
    fn test_integers_beyond_safe_range_are_errors() {
        assert_eq!(9_007_199_254_740_991i64.to_js().unwrap(), "9007199254740991");
        assert_eq!((-9_007_199_254_740_991i64).to_js().unwrap(), "-9007199254740991");
        assert!(matches!(i64::MAX.to_js(), Err(Error::Serialization { .. })));
        assert!(matches!(i64::MIN.to_js(), Err(Error::Serialization { .. })));
        assert!(u64::MAX.to_js().is_err());
        assert!(u128::MAX.to_js().is_err());
        assert!(json!(u64::MAX).to_js().is_err());
        assert!(vec![1u64, 1 << 53].to_js().is_err());
    }

    #[test]
    fn test_line_separators_escaped() {
        let js = "a\u{2028}b\u{2029}".to_js().unwrap();
        assert_eq!(js, r#""a\u2028b\u2029""#);
    }

    #[test]
    fn test_nested_collections() {
        let mut map = BTreeMap::new();
        map.insert(Symbol::new("a"), vec![json!(1), json!("x"), Value::Null]);
        assert_eq!(map.to_js().unwrap(), r#"{"a":[1,"x",null]}"#);
    }

    #[test]
    fn test_hash_map_with_custom_hasher() {
        let mut map: FxHashMap<u32, &str> = FxHashMap::default();
        map.insert(7, "seven");
        assert_eq!(map.to_js().unwrap(), r#"{7:"seven"}"#);
    }

    #[test]
    fn test_non_literal_keys_are_computed() {
        let mut map = BTreeMap::new();
        map.insert(true, 1);
        assert_eq!(map.to_js().unwrap(), "{[true]:1}");
    }

    #[test]
    fn test_set_renders_array() {
        let set: BTreeSet<i32> = [3, 1, 2].into_iter().collect();
        assert_eq!(set.to_js().unwrap(), "[1,2,3]");
    }

    #[test]
    fn test_args_list() {
        let args: [&dyn ToJs; 3] = [&1, &"two", &None::<bool>];
        assert_eq!(argument_list(&args).unwrap(), r#"1,"two",null"#);
        assert_eq!(argument_list(&[]).unwrap(), "");
    }

    #[test]
    fn test_regex_keeps_case_and_multiline() {
        let re = Regex::new("(?im)^foo/bar$").unwrap();
        assert_eq!(re.to_js().unwrap(), r"/^foo\/bar$/im");
    }

    #[test]
    fn test_regex_drops_other_flags() {
        assert_eq!(regex_literal("(?sx)a b"), "/a b/");
        assert_eq!(regex_literal("(?i-m)x"), "/x/i");
        assert_eq!(regex_literal("(?:ab)+"), "/(?:ab)+/");
        assert_eq!(regex_literal(r"a\/b"), r"/a\/b/");
        assert_eq!(regex_literal(""), "/(?:)/");
    }

    fn json_value() -> impl Strategy<Value = Value> {
        let max_safe = i64::try_from(MAX_SAFE_INTEGER).unwrap();
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            (-max_safe..=max_safe).prop_map(Value::from),
            any::<f64>()
                .prop_filter("finite", |f| f.is_finite())
                .prop_map(Value::from),
            any::<String>().prop_map(Value::String),
        ];
        leaf.prop_recursive(4, 64, 8, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..8).prop_map(Value::Array),
                prop::collection::btree_map(any::<String>(), inner, 0..8)
                    .prop_map(|map| Value::Object(map.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn test_json_values_survive_rendering(value in json_value()) {
            let js = value.to_js().unwrap();
            let decoded: Value = serde_json::from_str(&js).unwrap();
            prop_assert_eq!(decoded, value);
        }

        #[test]
        fn test_symbol_keyed_maps_survive_rendering(
            map in prop::collection::btree_map("[a-z_]{1,8}", any::<i32>(), 0..8)
        ) {
            let keyed: BTreeMap<Symbol, i32> =
                map.iter().map(|(k, v)| (Symbol::new(k.clone()), *v)).collect();
            let decoded: BTreeMap<String, i32> = serde_json::from_str(&keyed.to_js().unwrap()).unwrap();
            prop_assert_eq!(decoded, map);
        }
    }
}
