//! Entry point for global bindings.

// ============================================================================
// Imports
// ============================================================================

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::protocol::{ToJs, envelope, is_identifier};
use crate::transport::Connection;

use super::reference::{RemoteRef, Resolved, StoreTarget, invoke_member};

// ============================================================================
// Root
// ============================================================================

/// Accessor for the shell's global scope.
///
/// Obtained from [`Connection::root`].
///
/// # Example
///
/// ```ignore
/// let root = connection.root();
/// root.assign("answer", 42).await?;
/// let answer = root.get("answer").await?;
/// ```
#[derive(Debug, Clone)]
pub struct Root {
    connection: Connection,
}

impl Root {
    pub(crate) fn new(connection: Connection) -> Self {
        Self { connection }
    }

    /// Returns the owning connection.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Returns a reference to the global `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `name` is not an identifier.
    pub fn binding(&self, name: &str) -> Result<RemoteRef> {
        if !is_identifier(name) {
            return Err(Error::invalid_argument(format!(
                "{name:?} is not a valid global name"
            )));
        }
        Ok(RemoteRef::new(name, &self.connection)?.with_label(name))
    }

    /// Returns a reference to an arbitrary expression.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `expr` is empty.
    pub fn expression(&self, expr: &str) -> Result<RemoteRef> {
        RemoteRef::new(expr, &self.connection)
    }

    /// Resolves the global `name`.
    ///
    /// # Errors
    ///
    /// [`Error::UndefinedReference`] if it does not exist, otherwise see
    /// [`RemoteRef::resolve`].
    pub async fn get(&self, name: &str) -> Result<Resolved> {
        self.binding(name)?.resolve(true).await
    }

    /// Resolves the global `name`, yielding [`Resolved::Undefined`] if it
    /// does not exist.
    ///
    /// # Errors
    ///
    /// See [`RemoteRef::resolve`].
    pub async fn get_optional(&self, name: &str) -> Result<Resolved> {
        self.binding(name)?.resolve(false).await
    }

    /// Calls the global function `name`, or resolves `name` if it is not a
    /// function and no arguments are given.
    ///
    /// # Errors
    ///
    /// See [`RemoteRef::invoke`].
    pub async fn invoke(&self, name: &str, args: &[&dyn ToJs]) -> Result<Resolved> {
        invoke_member(&self.binding(name)?, args, true).await
    }

    /// Like [`invoke`](Self::invoke), resolving `undefined` to
    /// [`Resolved::Undefined`].
    ///
    /// # Errors
    ///
    /// See [`RemoteRef::invoke`].
    pub async fn invoke_optional(&self, name: &str, args: &[&dyn ToJs]) -> Result<Resolved> {
        invoke_member(&self.binding(name)?, args, false).await
    }

    /// Assigns `value` to the global `name`.
    ///
    /// # Errors
    ///
    /// See [`RemoteRef::assign`].
    pub async fn assign<V: ToJs>(&self, name: &str, value: V) -> Result<()> {
        self.binding(name)?.assign(value).await
    }

    /// Evaluates `expr` once and stores it under the global `name`.
    ///
    /// # Errors
    ///
    /// See [`RemoteRef::store`].
    pub async fn store(&self, name: &str, expr: &str) -> Result<RemoteRef> {
        self.expression(expr)?
            .store(StoreTarget::Global(name.to_string()))
            .await
    }

    /// Returns a reference to the scratch container, created on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the scratch name is empty.
    pub fn scratch(&self) -> Result<RemoteRef> {
        let name = self.connection.scratch();
        Ok(RemoteRef::new(envelope::scratch_container(name), &self.connection)?.with_label(name))
    }

    /// Empties the scratch container, releasing every stored slot.
    ///
    /// References to earlier slots resolve to `undefined` afterwards.
    ///
    /// # Errors
    ///
    /// See [`RemoteRef::assign`].
    pub async fn clear_scratch(&self) -> Result<()> {
        self.binding(self.connection.scratch())?
            .assign(Value::Object(Map::new()))
            .await
    }
}
