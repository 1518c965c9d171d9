//! Connection to the JSSh shell.
//!
//! This module owns the socket, the handshake, and the request/response
//! discipline on top of [`framing`](super::framing).
//!
//! # Exchange Discipline
//!
//! The protocol carries no request identifiers. A reply can only be
//! matched to its request by order, so:
//!
//! - one request is in flight at a time; the wire sits behind an async
//!   mutex held from send until the reply is fully read
//! - a failed exchange leaves the connection *possibly desynced*; the
//!   next exchange drains and verifies the stream after its own reply
//! - a connection error is final; the connection is never reopened
//!   behind the caller's back (see [`Connection::reconnect`])

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::assets::{self, DONE_REPLY, WELCOME_LINE};
use crate::error::{Error, Result};
use crate::protocol::{Envelope, JsType, envelope, translate};
use crate::remote::{RemoteRef, Root};

use super::framing::{self, Frame, FrameMode, PROMPT, ReadTimeouts};
use super::options::ConnectionOptions;

// ============================================================================
// Types
// ============================================================================

/// Byte stream a connection can run over.
///
/// Implemented for every tokio stream, e.g. [`TcpStream`] or
/// [`tokio::io::DuplexStream`].
pub trait ShellStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> ShellStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Socket plus framing state. Only touched with the exchange lock held.
struct Wire {
    stream: Box<dyn ShellStream>,
    /// Prompt text owed by the previous reply.
    awaiting_prompt: String,
    /// The previous exchange failed or was abandoned; verify the stream
    /// after the next reply.
    possible_desync: bool,
    /// Verification found stray data; the stream cannot be trusted.
    poisoned: bool,
}

/// Shared connection state.
struct ConnectionInner {
    options: ConnectionOptions,
    extension_loaded: bool,
    wire: Mutex<Wire>,
    broken: AtomicBool,
}

// ============================================================================
// Connection
// ============================================================================

/// Connection to a JSSh shell.
///
/// Cloning is cheap; clones share the socket.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync`, but the protocol is strictly
/// half-duplex. Concurrent calls from several tasks are serialized on an
/// internal lock, one full request/response exchange at a time; they are
/// never interleaved. Dropping a call mid-exchange leaves its reply on
/// the wire, which the next exchange detects as a desync.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.inner.options.address())
            .field("extension_loaded", &self.inner.extension_loaded)
            .field("broken", &self.is_broken())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Connection - Lifecycle
// ============================================================================

impl Connection {
    /// Connects to the shell described by `options`.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the options are invalid
    /// - [`Error::Connection`] if the socket cannot be opened or the
    ///   handshake does not match
    pub async fn connect(options: ConnectionOptions) -> Result<Self> {
        options.validate()?;
        let address = options.address();

        let stream = timeout(options.read_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| Error::connection(format!("timed out connecting to {address}")))?
            .map_err(|e| Error::io(&format!("connect to {address}"), e))?;
        stream
            .set_nodelay(true)
            .map_err(|e| Error::io("set TCP_NODELAY", e))?;

        debug!(%address, "TCP connection established");
        Self::from_stream(stream, options).await
    }

    /// Connects to `127.0.0.1:9997` with default options.
    ///
    /// # Errors
    ///
    /// See [`connect`](Self::connect).
    pub async fn connect_default() -> Result<Self> {
        Self::connect(ConnectionOptions::default()).await
    }

    /// Runs the handshake over an already open stream.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the options are invalid
    /// - [`Error::Connection`] if the handshake does not match
    pub async fn from_stream<S: ShellStream>(stream: S, options: ConnectionOptions) -> Result<Self> {
        options.validate()?;

        let mut wire = Wire {
            stream: Box::new(stream),
            awaiting_prompt: String::new(),
            possible_desync: false,
            poisoned: false,
        };
        let timeouts = ReadTimeouts {
            first_byte: options.read_timeout,
            settle: options.settle_timeout,
        };

        let welcome = wire
            .read(FrameMode::PromptDelimited, timeouts)
            .await
            .map_err(|e| Error::connection(format!("no welcome line: {e}")))?;
        if welcome.payload.trim_end_matches('\n') != WELCOME_LINE {
            return Err(Error::connection(format!(
                "unexpected welcome line {:?}",
                welcome.payload
            )));
        }
        trace!("Welcome line verified");

        if options.load_extension {
            for script in assets::handshake_scripts(&options.scratch) {
                let reply = wire
                    .exchange(&script, FrameMode::PromptDelimited, timeouts)
                    .await
                    .map_err(|e| Error::connection(format!("helper script failed: {e}")))?;
                if reply.payload != DONE_REPLY {
                    return Err(Error::connection(format!(
                        "helper script replied {:?}, expected {DONE_REPLY:?}",
                        reply.payload
                    )));
                }
            }
            debug!("Helper scripts loaded");
        }

        info!(
            address = %options.address(),
            extension_loaded = options.load_extension,
            "JSSh connection ready"
        );

        Ok(Self {
            inner: Arc::new(ConnectionInner {
                extension_loaded: options.load_extension,
                options,
                wire: Mutex::new(wire),
                broken: AtomicBool::new(false),
            }),
        })
    }

    /// Opens a fresh connection with the same options.
    ///
    /// This connection is left untouched; the caller decides when to drop it.
    ///
    /// # Errors
    ///
    /// See [`connect`](Self::connect).
    pub async fn reconnect(&self) -> Result<Self> {
        Self::connect(self.inner.options.clone()).await
    }

    /// Closes the connection. Later exchanges fail with
    /// [`Error::ConnectionClosed`].
    pub async fn close(&self) {
        if self.inner.broken.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut wire = self.inner.wire.lock().await;
        if let Err(e) = wire.stream.shutdown().await {
            debug!(error = %e, "Shutdown failed");
        }
        debug!("Connection closed");
    }
}

// ============================================================================
// Connection - Accessors
// ============================================================================

impl Connection {
    /// Returns the options this connection was opened with.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ConnectionOptions {
        &self.inner.options
    }

    /// Returns `true` if the helper library was loaded at handshake.
    #[inline]
    #[must_use]
    pub fn extension_loaded(&self) -> bool {
        self.inner.extension_loaded
    }

    /// Returns the name of the remote scratch container.
    #[inline]
    #[must_use]
    pub fn scratch(&self) -> &str {
        &self.inner.options.scratch
    }

    /// Returns `true` once the connection is closed or failed.
    #[inline]
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.inner.broken.load(Ordering::SeqCst)
    }

    /// Returns the root accessor for global bindings.
    #[inline]
    #[must_use]
    pub fn root(&self) -> Root {
        Root::new(self.clone())
    }

    /// Returns a reference to an arbitrary expression.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `expr` is empty.
    pub fn reference(&self, expr: impl Into<String>) -> Result<RemoteRef> {
        RemoteRef::new(expr, self)
    }
}

// ============================================================================
// Connection - Evaluation
// ============================================================================

impl Connection {
    /// Evaluates `source` with legacy prompt-delimited framing and returns
    /// the text the shell printed.
    ///
    /// # Errors
    ///
    /// - [`Error::RemoteScript`] if the shell printed an error line
    /// - transport errors, see [`exchange`](Self::exchange)
    pub async fn eval_raw(&self, source: &str) -> Result<String> {
        let frame = self.exchange(source, FrameMode::PromptDelimited).await?;
        if let Some(err) = translate::raw_error(&frame.payload, source) {
            return Err(err);
        }
        Ok(frame.payload)
    }

    /// Evaluates `expr` exactly once and decodes its value.
    ///
    /// Returns `Ok(None)` if the value is `undefined` and
    /// `error_on_undefined` is not set.
    ///
    /// # Errors
    ///
    /// - [`Error::RemoteScript`] if the evaluation threw
    /// - [`Error::UndefinedReference`] for `undefined` when a value is required
    /// - transport errors, see [`exchange`](Self::exchange)
    pub async fn evaluate_to_value(
        &self,
        expr: &str,
        error_on_undefined: bool,
    ) -> Result<Option<Value>> {
        self.evaluate_wrapped(expr, expr, error_on_undefined).await
    }

    /// Evaluates `script`, reporting errors against `expr`.
    async fn evaluate_wrapped(
        &self,
        script: &str,
        expr: &str,
        error_on_undefined: bool,
    ) -> Result<Option<Value>> {
        let script = envelope::value_script(script, self.inner.extension_loaded);
        let frame = self.exchange(&script, FrameMode::LengthPrefixed).await?;
        if frame.unframed {
            return Err(translate::unframed(&frame.payload, expr));
        }

        Envelope::parse(&frame.payload)?.into_value(expr, error_on_undefined)
    }

    /// Evaluates `expr`, requiring a value.
    ///
    /// # Errors
    ///
    /// See [`evaluate_to_value`](Self::evaluate_to_value).
    pub async fn evaluate(&self, expr: &str) -> Result<Value> {
        self.evaluate_to_value(expr, true)
            .await?
            .ok_or_else(|| Error::undefined_reference(expr))
    }

    /// Evaluates `expr`, mapping `undefined` to `None`.
    ///
    /// # Errors
    ///
    /// See [`evaluate_to_value`](Self::evaluate_to_value).
    pub async fn evaluate_optional(&self, expr: &str) -> Result<Option<Value>> {
        self.evaluate_to_value(expr, false).await
    }

    /// Evaluates `expr` and deserializes the value.
    ///
    /// # Errors
    ///
    /// [`Error::Json`] if the value does not fit `T`, otherwise see
    /// [`evaluate_to_value`](Self::evaluate_to_value).
    pub async fn evaluate_as<T: DeserializeOwned>(&self, expr: &str) -> Result<T> {
        Ok(serde_json::from_value(self.evaluate(expr).await?)?)
    }

    /// Returns the `typeof` tag of `expr`, reporting `null` as
    /// [`JsType::Null`].
    ///
    /// A missing root binding (`missing.foo`) yields [`JsType::Undefined`]
    /// like a bare undeclared identifier does.
    ///
    /// # Errors
    ///
    /// See [`evaluate_to_value`](Self::evaluate_to_value).
    pub async fn type_of(&self, expr: &str) -> Result<JsType> {
        let tag = self
            .evaluate_wrapped(&envelope::type_script(expr), expr, false)
            .await?;
        match tag {
            None => Ok(JsType::Undefined),
            Some(Value::String(tag)) => Ok(JsType::from_tag(&tag)),
            Some(other) => Err(Error::framing(format!("typeof returned {other}"))),
        }
    }
}

// ============================================================================
// Connection - Exchange
// ============================================================================

impl Connection {
    /// Sends `source` and reads one framed reply.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the connection already failed
    /// - [`Error::Connection`] on socket failure (the connection is then
    ///   broken)
    /// - [`Error::Framing`] / [`Error::Timeout`] on a framing problem (the
    ///   connection is then possibly desynced)
    pub async fn exchange(&self, source: &str, mode: FrameMode) -> Result<Frame> {
        if self.is_broken() {
            return Err(Error::ConnectionClosed);
        }

        let timeouts = ReadTimeouts {
            first_byte: self.inner.options.read_timeout,
            settle: self.inner.options.settle_timeout,
        };

        let mut wire = self.inner.wire.lock().await;
        if self.is_broken() {
            return Err(Error::ConnectionClosed);
        }

        let result = wire.exchange(source, mode, timeouts).await;
        if let Err(ref e) = result {
            if e.is_connection_error() || wire.poisoned {
                warn!(error = %e, "Connection broken");
                self.inner.broken.store(true, Ordering::SeqCst);
            } else {
                debug!(error = %e, "Exchange failed; connection possibly desynced");
            }
        }
        result
    }
}

// ============================================================================
// Wire
// ============================================================================

impl Wire {
    /// Writes `source`, newline-terminated.
    async fn send(&mut self, source: &str) -> Result<()> {
        self.stream
            .write_all(source.as_bytes())
            .await
            .map_err(|e| Error::io("write", e))?;
        if !source.ends_with('\n') {
            self.stream
                .write_all(b"\n")
                .await
                .map_err(|e| Error::io("write", e))?;
        }
        self.stream.flush().await.map_err(|e| Error::io("flush", e))?;

        trace!(len = source.len(), "Request sent");
        Ok(())
    }

    /// Reads one reply and records any prompt text it still owes.
    async fn read(&mut self, mode: FrameMode, timeouts: ReadTimeouts) -> Result<Frame> {
        let leading = std::mem::take(&mut self.awaiting_prompt);
        let frame = framing::read_frame(&mut self.stream, mode, &leading, timeouts).await?;
        self.awaiting_prompt.clone_from(&frame.pending_prompt);
        Ok(frame)
    }

    async fn exchange(
        &mut self,
        source: &str,
        mode: FrameMode,
        timeouts: ReadTimeouts,
    ) -> Result<Frame> {
        let was_desynced = self.possible_desync;
        // stays set if this future is dropped before the reply is read
        self.possible_desync = true;

        self.send(source).await?;
        let frame = match self.read(mode, timeouts).await {
            Ok(frame) => frame,
            Err(e) => {
                if was_desynced && matches!(e, Error::Framing { .. }) {
                    // second framing failure in a row
                    self.poisoned = true;
                }
                return Err(e);
            }
        };

        if was_desynced {
            self.verify_quiet(timeouts).await?;
        }
        self.possible_desync = false;
        Ok(frame)
    }

    /// Checks that nothing but prompt text follows the last reply.
    async fn verify_quiet(&mut self, timeouts: ReadTimeouts) -> Result<()> {
        let stray = framing::drain(&mut self.stream, timeouts.settle).await?;
        if stray.is_empty() {
            return Ok(());
        }
        if stray == self.awaiting_prompt || (self.awaiting_prompt.is_empty() && stray == PROMPT) {
            debug!("Absorbed stray prompt");
            self.awaiting_prompt.clear();
            return Ok(());
        }

        self.poisoned = true;
        Err(Error::framing(format!(
            "connection desynchronized, unexpected data after reply: {:?}",
            stray.chars().take(64).collect::<String>()
        )))
    }
}

// ============================================================================
// Tests
// ============================================================================
