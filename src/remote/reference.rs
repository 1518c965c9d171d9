//! Handles to values living in the remote process.
//!
//! A [`RemoteRef`] names a remote value by JavaScript source text instead
//! of copying it. Building a property or call reference is free; only
//! resolving, reading, assigning or storing talks to the shell.
//!
//! # Function-Call Results
//!
//! A reference built by [`RemoteRef::pass`] wraps a call that has not run
//! yet. Every evaluation of it runs the call again, so such references
//! are first captured with [`RemoteRef::store`]; [`RemoteRef::resolve`]
//! does this automatically.
//!
//! # Example
//!
//! ```ignore
//! let document = connection.root().binding("document")?;
//! let title = document.property("title")?.value().await?;
//!
//! let element = document.invoke("getElementById", &[&"submit"]).await?;
//! if let Resolved::Reference(element) = element {
//!     element.set("value", "hello").await?;
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::SlotKey;
use crate::protocol::marshal::argument_list;
use crate::protocol::{JsType, ToJs, envelope, is_identifier, is_member_chain};
use crate::transport::Connection;

// ============================================================================
// Constants
// ============================================================================

/// Attempts at finding a free scratch slot before giving up.
const MAX_STORE_ATTEMPTS: usize = 8;

// ============================================================================
// Types
// ============================================================================

/// Outcome of resolving a reference.
#[derive(Debug, Clone)]
pub enum Resolved {
    /// A boolean, number, string or `null`, copied by value.
    Value(Value),
    /// An object or function, kept remote.
    Reference(RemoteRef),
    /// The expression is `undefined`.
    Undefined,
}

impl Resolved {
    /// Returns the value, if this is one.
    #[inline]
    #[must_use]
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the reference, if this is one.
    #[inline]
    #[must_use]
    pub fn into_reference(self) -> Option<RemoteRef> {
        match self {
            Self::Reference(reference) => Some(reference),
            _ => None,
        }
    }

    /// Returns `true` for [`Resolved::Undefined`].
    #[inline]
    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }
}

/// Where [`RemoteRef::store`] puts a value.
#[derive(Debug, Clone)]
pub enum StoreTarget {
    /// A named global binding.
    Global(String),
    /// A fresh random slot in the connection's scratch container.
    Scratch,
    /// A fresh random slot in the given container object.
    Within(RemoteRef),
}

/// Shared reference state.
struct RefInner {
    /// JavaScript source naming the value.
    expr: String,
    connection: Connection,
    /// Evaluating `expr` runs a call.
    function_result: bool,
    /// Cleared on assignment.
    cached_type: Mutex<Option<JsType>>,
    /// Diagnostic name; never sent to the shell.
    label: Option<String>,
}

// ============================================================================
// RemoteRef
// ============================================================================

/// Handle to a value in the remote process.
///
/// Cloning is cheap and clones share the cached type tag.
#[derive(Clone)]
pub struct RemoteRef {
    inner: Arc<RefInner>,
}

impl fmt::Debug for RemoteRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteRef")
            .field("expr", &self.inner.expr)
            .field("function_result", &self.inner.function_result)
            .field("label", &self.inner.label)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for RemoteRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.inner.label.as_deref().unwrap_or(&self.inner.expr))
    }
}

impl ToJs for RemoteRef {
    /// Inserts the expression verbatim.
    fn to_js(&self) -> Result<String> {
        Ok(self.inner.expr.clone())
    }
}

// ============================================================================
// RemoteRef - Construction
// ============================================================================

impl RemoteRef {
    /// Creates a reference to `expr`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `expr` is empty.
    pub fn new(expr: impl Into<String>, connection: &Connection) -> Result<Self> {
        Self::build(expr.into(), connection.clone(), false, None)
    }

    /// Creates a reference to a not-yet-run call expression.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `expr` is empty.
    pub fn function_result(expr: impl Into<String>, connection: &Connection) -> Result<Self> {
        Self::build(expr.into(), connection.clone(), true, None)
    }

    fn build(
        expr: String,
        connection: Connection,
        function_result: bool,
        label: Option<String>,
    ) -> Result<Self> {
        if expr.trim().is_empty() {
            return Err(Error::invalid_argument("remote expression must not be empty"));
        }
        Ok(Self {
            inner: Arc::new(RefInner {
                expr,
                connection,
                function_result,
                cached_type: Mutex::new(None),
                label,
            }),
        })
    }

    /// Returns a copy carrying a diagnostic label.
    #[must_use]
    pub fn with_label(self, label: impl Into<String>) -> Self {
        let cached = self.inner.cached_type.lock().clone();
        Self {
            inner: Arc::new(RefInner {
                expr: self.inner.expr.clone(),
                connection: self.inner.connection.clone(),
                function_result: self.inner.function_result,
                cached_type: Mutex::new(cached),
                label: Some(label.into()),
            }),
        }
    }

    /// Builds a child reference inheriting the call flag and label.
    fn derive(&self, expr: String, suffix: &str) -> Result<Self> {
        let label = self.inner.label.as_ref().map(|label| format!("{label}{suffix}"));
        Self::build(
            expr,
            self.inner.connection.clone(),
            self.inner.function_result,
            label,
        )
    }

    /// The expression, parenthesized unless it is a plain member chain.
    fn operand(&self) -> String {
        if is_member_chain(&self.inner.expr) {
            self.inner.expr.clone()
        } else {
            format!("({})", self.inner.expr)
        }
    }
}

// ============================================================================
// RemoteRef - Accessors
// ============================================================================

impl RemoteRef {
    /// Returns the expression.
    #[inline]
    #[must_use]
    pub fn expr(&self) -> &str {
        &self.inner.expr
    }

    /// Returns the diagnostic label.
    #[inline]
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.inner.label.as_deref()
    }

    /// Returns `true` if evaluating this reference runs a call.
    #[inline]
    #[must_use]
    pub fn is_function_result(&self) -> bool {
        self.inner.function_result
    }

    /// Returns the owning connection.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    /// Returns the cached type tag without querying.
    #[inline]
    #[must_use]
    pub fn cached_type(&self) -> Option<JsType> {
        self.inner.cached_type.lock().clone()
    }

    /// Drops the cached type tag.
    #[inline]
    pub fn refresh_type(&self) {
        *self.inner.cached_type.lock() = None;
    }
}

// ============================================================================
// RemoteRef - Type and Resolution
// ============================================================================

impl RemoteRef {
    /// Returns the remote type, querying once and caching the result.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for a function-call result; querying
    ///   it would run the call. Resolve or store it first.
    /// - evaluation errors, see [`Connection::type_of`]
    pub async fn js_type(&self) -> Result<JsType> {
        if self.inner.function_result {
            return Err(Error::invalid_argument(format!(
                "type of call result {self} is unknown until it is stored"
            )));
        }

        let cached = self.cached_type();
        if let Some(ty) = cached {
            return Ok(ty);
        }

        let ty = self.inner.connection.type_of(&self.inner.expr).await?;
        trace!(expr = %self.inner.expr, %ty, "Type queried");
        *self.inner.cached_type.lock() = Some(ty.clone());
        Ok(ty)
    }

    /// Returns `true` if the remote value is `null`.
    ///
    /// # Errors
    ///
    /// See [`js_type`](Self::js_type).
    pub async fn is_null(&self) -> Result<bool> {
        Ok(self.js_type().await? == JsType::Null)
    }

    /// Returns `true` if the remote value is `undefined`.
    ///
    /// # Errors
    ///
    /// See [`js_type`](Self::js_type).
    pub async fn is_undefined(&self) -> Result<bool> {
        Ok(self.js_type().await? == JsType::Undefined)
    }

    /// Resolves to a native value for simple types, or to a living
    /// reference for objects and functions.
    ///
    /// A function-call result is stored in a scratch slot first, so the
    /// call runs exactly once; `undefined` from such a call resolves to
    /// [`Resolved::Undefined`] regardless of `error_on_undefined`.
    ///
    /// # Errors
    ///
    /// - [`Error::UndefinedReference`] for `undefined` when
    ///   `error_on_undefined` is set
    /// - evaluation errors
    pub async fn resolve(&self, error_on_undefined: bool) -> Result<Resolved> {
        if self.inner.function_result {
            let stored = self.store(StoreTarget::Scratch).await?;
            return stored.resolve_stored(false).await;
        }
        self.resolve_stored(error_on_undefined).await
    }

    async fn resolve_stored(&self, error_on_undefined: bool) -> Result<Resolved> {
        let ty = self.js_type().await?;
        if ty.is_simple() {
            let value = self.inner.connection.evaluate(&self.inner.expr).await?;
            return Ok(Resolved::Value(value));
        }

        match ty {
            JsType::Undefined if error_on_undefined => {
                Err(Error::undefined_reference(self.inner.expr.clone()))
            }
            JsType::Undefined => Ok(Resolved::Undefined),
            _ => Ok(Resolved::Reference(self.clone())),
        }
    }

    /// Evaluates the expression and decodes its value.
    ///
    /// The value must be JSON-safe. For a function-call result the call
    /// runs on every invocation.
    ///
    /// # Errors
    ///
    /// See [`Connection::evaluate`].
    pub async fn value(&self) -> Result<Value> {
        self.inner.connection.evaluate(&self.inner.expr).await
    }

    /// Like [`value`](Self::value), mapping `undefined` to `None`.
    ///
    /// # Errors
    ///
    /// See [`Connection::evaluate_optional`].
    pub async fn value_optional(&self) -> Result<Option<Value>> {
        self.inner.connection.evaluate_optional(&self.inner.expr).await
    }

    /// Evaluates the expression and deserializes its value.
    ///
    /// # Errors
    ///
    /// See [`Connection::evaluate_as`].
    pub async fn value_as<T: DeserializeOwned>(&self) -> Result<T> {
        self.inner.connection.evaluate_as(&self.inner.expr).await
    }
}

// ============================================================================
// RemoteRef - Member Access
// ============================================================================

impl RemoteRef {
    /// Returns a reference to `expr.name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `name` is not an identifier.
    pub fn property(&self, name: &str) -> Result<RemoteRef> {
        if !is_identifier(name) {
            return Err(Error::invalid_argument(format!(
                "{name:?} is not a valid property name"
            )));
        }
        self.derive(format!("{}.{name}", self.operand()), &format!(".{name}"))
    }

    /// Returns a reference to `expr[key]`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if `key` cannot be rendered.
    pub fn get<K: ToJs>(&self, key: K) -> Result<RemoteRef> {
        let key = key.to_js()?;
        let suffix = format!("[{key}]");
        self.derive(format!("{}{suffix}", self.operand()), &suffix)
    }

    /// Assigns `value` to `expr[key]`.
    ///
    /// # Errors
    ///
    /// See [`assign`](Self::assign).
    pub async fn set<K: ToJs, V: ToJs>(&self, key: K, value: V) -> Result<()> {
        self.get(key)?.assign(value).await
    }

    /// Assigns `value` to the expression.
    ///
    /// Clears the cached type tag.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for a function-call result
    /// - [`Error::Serialization`] if `value` cannot be rendered
    /// - evaluation errors
    pub async fn assign<V: ToJs>(&self, value: V) -> Result<()> {
        if self.inner.function_result {
            return Err(Error::invalid_argument(format!(
                "cannot assign to call result {self}"
            )));
        }

        let script = envelope::assign_script(&self.inner.expr, &value.to_js()?);
        self.refresh_type();
        self.inner.connection.evaluate(&script).await?;

        debug!(target = %self, "Assigned");
        Ok(())
    }
}

// ============================================================================
// RemoteRef - Invocation
// ============================================================================

impl RemoteRef {
    /// Returns a reference to the call `expr(args...)` without running it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if an argument cannot be rendered.
    pub fn pass(&self, args: &[&dyn ToJs]) -> Result<RemoteRef> {
        let args = argument_list(args)?;
        let label = self.inner.label.as_ref().map(|label| format!("{label}(...)"));
        Self::build(
            format!("{}({args})", self.operand()),
            self.inner.connection.clone(),
            true,
            label,
        )
    }

    /// Calls the referenced function and resolves the result.
    ///
    /// # Errors
    ///
    /// See [`pass`](Self::pass) and [`resolve`](Self::resolve).
    pub async fn call(&self, args: &[&dyn ToJs]) -> Result<Resolved> {
        self.pass(args)?.resolve(true).await
    }

    /// Resolves member `name`, calling it with `args` if it is a function.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `name` is not an identifier, or the
    ///   member is not a function but `args` is non-empty
    /// - [`Error::UndefinedReference`] if the member is `undefined`
    pub async fn invoke(&self, name: &str, args: &[&dyn ToJs]) -> Result<Resolved> {
        let member = self.member(name).await?;
        invoke_member(&member, args, true).await
    }

    /// Like [`invoke`](Self::invoke), resolving `undefined` to
    /// [`Resolved::Undefined`] instead of failing.
    ///
    /// # Errors
    ///
    /// See [`invoke`](Self::invoke).
    pub async fn invoke_optional(&self, name: &str, args: &[&dyn ToJs]) -> Result<Resolved> {
        let member = self.member(name).await?;
        invoke_member(&member, args, false).await
    }

    /// Like [`invoke`](Self::invoke), but decodes the result as a native
    /// value instead of resolving it.
    ///
    /// # Errors
    ///
    /// See [`invoke`](Self::invoke) and [`value`](Self::value).
    pub async fn invoke_raw(&self, name: &str, args: &[&dyn ToJs]) -> Result<Value> {
        let member = self.member(name).await?;
        match member.js_type().await? {
            JsType::Function => member.pass(args)?.value().await,
            ty if !args.is_empty() => Err(not_a_function(&member, &ty, args.len())),
            _ => member.value().await,
        }
    }

    /// Member reference, with a call result stored first so the call does
    /// not run again for every member access.
    async fn member(&self, name: &str) -> Result<RemoteRef> {
        if self.inner.function_result {
            return self.store(StoreTarget::Scratch).await?.property(name);
        }
        self.property(name)
    }
}

/// Calls `member` if it is a function, otherwise resolves it.
pub(crate) async fn invoke_member(
    member: &RemoteRef,
    args: &[&dyn ToJs],
    error_on_undefined: bool,
) -> Result<Resolved> {
    match member.js_type().await? {
        JsType::Function => member.pass(args)?.resolve(error_on_undefined).await,
        ty if !args.is_empty() => Err(not_a_function(member, &ty, args.len())),
        _ => member.resolve(error_on_undefined).await,
    }
}

fn not_a_function(member: &RemoteRef, ty: &JsType, arg_count: usize) -> Error {
    Error::invalid_argument(format!(
        "{member} is {ty}, not a function, but {arg_count} arguments were given"
    ))
}

// ============================================================================
// RemoteRef - Storage
// ============================================================================

impl RemoteRef {
    /// Evaluates the expression once and stores the value, returning a
    /// stable reference to the stored slot.
    ///
    /// For [`StoreTarget::Scratch`] and [`StoreTarget::Within`] a random
    /// key is drawn; if it is already taken, another is drawn without
    /// evaluating the expression.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for a non-identifier global name, a
    ///   function-call result as container, or no free slot
    /// - evaluation errors
    pub async fn store(&self, target: StoreTarget) -> Result<RemoteRef> {
        match target {
            StoreTarget::Global(name) => {
                if !is_identifier(&name) {
                    return Err(Error::invalid_argument(format!(
                        "{name:?} is not a valid global name"
                    )));
                }
                let slot = Self::build(
                    name,
                    self.inner.connection.clone(),
                    false,
                    self.inner.label.clone(),
                )?;
                slot.assign(self).await?;
                Ok(slot)
            }
            StoreTarget::Scratch => {
                let name = self.inner.connection.scratch().to_string();
                let container = envelope::scratch_container(&name);
                self.store_in(&container, &name).await
            }
            StoreTarget::Within(container) => {
                if container.is_function_result() {
                    return Err(Error::invalid_argument(format!(
                        "container {container} is a call result; store it first"
                    )));
                }
                let operand = container.operand();
                self.store_in(&operand, &operand).await
            }
        }
    }

    async fn store_in(&self, container: &str, slot_base: &str) -> Result<RemoteRef> {
        for attempt in 1..=MAX_STORE_ATTEMPTS {
            let key = SlotKey::generate();
            let key_js = key.to_js()?;
            let script = envelope::store_script(&self.inner.expr, container, &key_js);

            match self.inner.connection.evaluate(&script).await? {
                Value::Bool(true) => {
                    trace!(source = %self, %key, "Stored");
                    return Self::build(
                        format!("{slot_base}[{key_js}]"),
                        self.inner.connection.clone(),
                        false,
                        self.inner.label.clone(),
                    );
                }
                Value::Bool(false) => {
                    debug!(attempt, %key, "Slot taken, drawing another key");
                }
                other => {
                    return Err(Error::framing(format!("store replied {other}")));
                }
            }
        }

        Err(Error::invalid_argument(format!(
            "no free slot in {slot_base} after {MAX_STORE_ATTEMPTS} attempts"
        )))
    }
}

// ============================================================================
// Tests
// ============================================================================
