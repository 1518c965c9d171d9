//! Response framing for the JSSh byte stream.
//!
//! The shell answers every request with text followed by its prompt
//! (`"\n> "`). Two framings are layered on top of that:
//!
//! | Mode | Shape | Delimited by |
//! |------|-------|--------------|
//! | [`FrameMode::PromptDelimited`] | `<text>\n> ` | prompt, or silence |
//! | [`FrameMode::LengthPrefixed`] | `<len>\n<payload>[\n> ]` | exact length |
//!
//! Lengths count UTF-16 code units, since the remote side computes them
//! with `String.length`.
//!
//! # States
//!
//! ```text
//! AwaitingFirstByte ─► StrippingLeadingPrompt ─┬─► ReadingLengthLine ─► ReadingBody ─► StrippingTrailingPrompt ─► Done
//!                                              └─► Accumulating ──────────────────────────────────────────────► Done
//! any mismatch ─► Desynced
//! ```
//!
//! [`FrameDecoder`] is the sans-IO state machine; [`read_frame`] drives it
//! from an [`AsyncRead`] with the long/short timeout policy.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Prompt printed by the shell after every response.
pub const PROMPT: &str = "\n> ";

/// Size of a single socket read.
const READ_CHUNK_SIZE: usize = 8192;

/// Consecutive empty reads after which the peer is considered gone.
const MAX_EMPTY_READS: u32 = 3;

// ============================================================================
// Types
// ============================================================================

/// Framing applied to one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMode {
    /// Legacy framing: text terminated by the prompt.
    PromptDelimited,
    /// `<decimal length>\n<payload>` with an optional trailing prompt.
    LengthPrefixed,
}

/// Decoder state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Nothing received yet.
    AwaitingFirstByte,
    /// Removing the remainder of the previous response's prompt.
    StrippingLeadingPrompt,
    /// Prompt-delimited text (or an unframed reply) is being collected.
    Accumulating,
    /// Waiting for the `<len>\n` line.
    ReadingLengthLine,
    /// Counting payload code units.
    ReadingBody,
    /// Payload complete; only (part of) a prompt may follow.
    StrippingTrailingPrompt,
    /// A full frame has been decoded.
    Done,
    /// Bytes did not match the framing.
    Desynced,
}

/// Result of feeding bytes to the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// More bytes are required.
    NeedMore,
    /// The frame is complete.
    Complete,
}

/// A decoded response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Response text with framing removed.
    pub payload: String,
    /// `true` when a length prefix was expected but the shell replied with
    /// plain text (e.g. a parse error reported before evaluation).
    pub unframed: bool,
    /// Part of the prompt not yet received; it leads the next response.
    pub pending_prompt: String,
}

// ============================================================================
// FrameDecoder
// ============================================================================

/// Incremental decoder for one response.
#[derive(Debug)]
pub struct FrameDecoder {
    mode: FrameMode,
    state: FrameState,
    /// Prompt text still expected at the start of the stream.
    leading: String,
    /// Incomplete UTF-8 sequence carried over to the next chunk.
    partial: Vec<u8>,
    /// Decoded text not consumed by the current state.
    buf: String,
    /// Declared payload length in UTF-16 code units.
    expected: usize,
    body: String,
    body_units: usize,
    /// Length prefix was missing; collecting raw text instead.
    unframed: bool,
}

impl FrameDecoder {
    /// Creates a decoder. `leading` is the prompt remainder left over from
    /// the previous response, if any.
    #[must_use]
    pub fn new(mode: FrameMode, leading: impl Into<String>) -> Self {
        Self {
            mode,
            state: FrameState::AwaitingFirstByte,
            leading: leading.into(),
            partial: Vec::new(),
            buf: String::new(),
            expected: 0,
            body: String::new(),
            body_units: 0,
            unframed: false,
        }
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Returns `true` once any byte has been fed.
    #[inline]
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.state != FrameState::AwaitingFirstByte
    }

    /// Returns `true` if the payload is complete and only an optional
    /// prompt is outstanding.
    #[inline]
    #[must_use]
    pub fn payload_complete(&self) -> bool {
        self.state == FrameState::StrippingTrailingPrompt
    }

    /// Feeds a chunk of bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Framing`] on invalid UTF-8, a prompt mismatch, a
    /// bad length line, or bytes beyond the frame.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Progress> {
        if bytes.is_empty() {
            return Ok(self.progress());
        }
        if matches!(self.state, FrameState::Done | FrameState::Desynced) {
            return Err(self.desync("bytes received after frame end"));
        }
        if self.state == FrameState::AwaitingFirstByte {
            self.state = FrameState::StrippingLeadingPrompt;
        }

        self.decode_utf8(bytes)?;
        self.advance()
    }

    /// Completes the frame after the peer went quiet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Framing`] if the frame is not complete.
    pub fn finish(mut self) -> Result<Frame> {
        if !self.partial.is_empty() {
            return Err(self.desync("response ended inside a UTF-8 sequence"));
        }

        match self.state {
            FrameState::Accumulating => {
                let (payload, pending_prompt) = split_partial_prompt(&self.buf);
                self.state = FrameState::Done;
                Ok(Frame {
                    payload: payload.to_string(),
                    unframed: self.unframed,
                    pending_prompt: pending_prompt.to_string(),
                })
            }
            FrameState::StrippingTrailingPrompt => {
                // buf is a proper prefix of the prompt here
                let pending_prompt = PROMPT[self.buf.len()..].to_string();
                self.state = FrameState::Done;
                Ok(Frame {
                    payload: std::mem::take(&mut self.body),
                    unframed: false,
                    pending_prompt,
                })
            }
            FrameState::ReadingLengthLine => {
                Err(self.desync(format!("incomplete length line {:?}", self.buf)))
            }
            FrameState::ReadingBody => Err(self.desync(format!(
                "expected {} code units, received {}",
                self.expected, self.body_units
            ))),
            FrameState::StrippingLeadingPrompt => {
                Err(self.desync("response ended inside the leading prompt"))
            }
            FrameState::AwaitingFirstByte => Err(Error::framing("no response received")),
            FrameState::Done | FrameState::Desynced => {
                Err(Error::framing("frame already consumed"))
            }
        }
    }

    /// Takes the completed frame.
    ///
    /// Only valid after [`feed`](Self::feed) returned [`Progress::Complete`];
    /// use [`finish`](Self::finish) for a frame cut short by silence.
    #[must_use]
    pub fn into_frame(mut self) -> Frame {
        let payload = if self.mode == FrameMode::LengthPrefixed && !self.unframed {
            std::mem::take(&mut self.body)
        } else {
            std::mem::take(&mut self.buf)
        };
        Frame {
            payload,
            unframed: self.unframed,
            pending_prompt: String::new(),
        }
    }

    fn progress(&self) -> Progress {
        if self.state == FrameState::Done {
            Progress::Complete
        } else {
            Progress::NeedMore
        }
    }

    fn decode_utf8(&mut self, bytes: &[u8]) -> Result<()> {
        self.partial.extend_from_slice(bytes);
        match std::str::from_utf8(&self.partial) {
            Ok(text) => {
                self.buf.push_str(text);
                self.partial.clear();
            }
            Err(e) if e.error_len().is_none() => {
                // Trailing sequence is incomplete; wait for its continuation.
                let valid = e.valid_up_to();
                let text = std::str::from_utf8(&self.partial[..valid])
                    .map_err(|e| Error::framing(e.to_string()))?;
                self.buf.push_str(text);
                self.partial.drain(..valid);
            }
            Err(e) => return Err(self.desync(format!("invalid UTF-8: {e}"))),
        }
        Ok(())
    }

    fn advance(&mut self) -> Result<Progress> {
        loop {
            match self.state {
                FrameState::StrippingLeadingPrompt => {
                    if self.leading.is_empty() {
                        self.state = match self.mode {
                            FrameMode::PromptDelimited => FrameState::Accumulating,
                            FrameMode::LengthPrefixed => FrameState::ReadingLengthLine,
                        };
                        continue;
                    }
                    if self.buf.len() >= self.leading.len() {
                        if !self.buf.starts_with(self.leading.as_str()) {
                            return Err(self.desync(format!(
                                "expected prompt {:?} before response, got {:?}",
                                self.leading,
                                preview(&self.buf)
                            )));
                        }
                        self.buf.drain(..self.leading.len());
                        self.leading.clear();
                        continue;
                    }
                    if !self.leading.starts_with(self.buf.as_str()) {
                        return Err(self.desync(format!(
                            "expected prompt {:?} before response, got {:?}",
                            self.leading,
                            preview(&self.buf)
                        )));
                    }
                    self.leading.drain(..self.buf.len());
                    self.buf.clear();
                    return Ok(Progress::NeedMore);
                }

                FrameState::Accumulating => {
                    if self.buf.ends_with(PROMPT) {
                        let len = self.buf.len() - PROMPT.len();
                        self.buf.truncate(len);
                        self.state = FrameState::Done;
                        return Ok(Progress::Complete);
                    }
                    return Ok(Progress::NeedMore);
                }

                FrameState::ReadingLengthLine => {
                    let Some(newline) = self.buf.find('\n') else {
                        if self.buf.bytes().all(|b| b.is_ascii_digit()) {
                            return Ok(Progress::NeedMore);
                        }
                        self.fall_back_to_unframed();
                        continue;
                    };
                    let line = &self.buf[..newline];
                    if line.is_empty() || !line.bytes().all(|b| b.is_ascii_digit()) {
                        self.fall_back_to_unframed();
                        continue;
                    }
                    self.expected = line.parse().map_err(|_| {
                        Error::framing(format!("length prefix {line:?} out of range"))
                    })?;
                    trace!(expected = self.expected, "Length prefix read");
                    self.buf.drain(..=newline);
                    self.state = FrameState::ReadingBody;
                }

                FrameState::ReadingBody => {
                    let mut cut = self.buf.len();
                    let mut overrun = false;
                    for (index, ch) in self.buf.char_indices() {
                        if self.body_units == self.expected {
                            cut = index;
                            break;
                        }
                        let units = ch.len_utf16();
                        if self.body_units + units > self.expected {
                            overrun = true;
                            break;
                        }
                        self.body_units += units;
                    }
                    if overrun {
                        let message =
                            format!("length {} ends inside a surrogate pair", self.expected);
                        return Err(self.desync(message));
                    }
                    self.body.push_str(&self.buf[..cut]);
                    self.buf.drain(..cut);

                    if self.body_units < self.expected {
                        return Ok(Progress::NeedMore);
                    }
                    self.state = FrameState::StrippingTrailingPrompt;
                }

                FrameState::StrippingTrailingPrompt => {
                    if self.buf == PROMPT {
                        self.buf.clear();
                        self.state = FrameState::Done;
                        return Ok(Progress::Complete);
                    }
                    if PROMPT.starts_with(self.buf.as_str()) {
                        return Ok(Progress::NeedMore);
                    }
                    return Err(self.desync(format!(
                        "unexpected bytes after {}-unit payload: {:?}",
                        self.expected,
                        preview(&self.buf)
                    )));
                }

                FrameState::AwaitingFirstByte | FrameState::Done | FrameState::Desynced => {
                    return Ok(self.progress());
                }
            }
        }
    }

    fn fall_back_to_unframed(&mut self) {
        debug!(text = %preview(&self.buf), "Response has no length prefix");
        self.unframed = true;
        self.state = FrameState::Accumulating;
    }

    fn desync(&mut self, message: impl Into<String>) -> Error {
        self.state = FrameState::Desynced;
        let message = message.into();
        warn!(%message, "Response framing mismatch");
        Error::framing(message)
    }
}

// ============================================================================
// Reading
// ============================================================================

/// Timeouts applied while reading one response.
#[derive(Debug, Clone, Copy)]
pub struct ReadTimeouts {
    /// Wait for the first byte.
    pub first_byte: Duration,
    /// Wait between chunks once data has arrived.
    pub settle: Duration,
}

/// Reads one framed response from `reader`.
///
/// Waits up to `timeouts.first_byte` for data, then `timeouts.settle`
/// between chunks. In prompt-delimited mode silence after data ends the
/// frame; in length-prefixed mode it is an error unless only the optional
/// trailing prompt is missing.
///
/// # Errors
///
/// - [`Error::Timeout`] if nothing arrives before the first-byte timeout
/// - [`Error::Connection`] on I/O failure or three consecutive empty reads
/// - [`Error::Framing`] on any framing mismatch
pub async fn read_frame<R>(
    reader: &mut R,
    mode: FrameMode,
    leading: &str,
    timeouts: ReadTimeouts,
) -> Result<Frame>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut decoder = FrameDecoder::new(mode, leading);
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    let mut empty_reads = 0u32;

    loop {
        let wait = if decoder.has_data() {
            timeouts.settle
        } else {
            timeouts.first_byte
        };

        let read = match timeout(wait, reader.read(&mut chunk)).await {
            Ok(read) => read.map_err(|e| Error::io("read", e))?,
            Err(_) if decoder.has_data() => {
                trace!(state = ?decoder.state(), "Peer went quiet");
                return decoder.finish();
            }
            Err(_) => {
                return Err(Error::timeout(
                    "waiting for response",
                    whole_millis(wait),
                ));
            }
        };

        if read == 0 {
            if decoder.payload_complete() {
                return decoder.finish();
            }
            empty_reads += 1;
            if empty_reads >= MAX_EMPTY_READS {
                return Err(Error::connection("peer closed the connection"));
            }
            continue;
        }
        empty_reads = 0;

        trace!(bytes = read, "Chunk received");
        if decoder.feed(&chunk[..read])? == Progress::Complete {
            let frame = decoder.into_frame();
            trace!(len = frame.payload.len(), "Frame complete");
            return Ok(frame);
        }
    }
}

/// Reads whatever arrives within `settle`.
///
/// Used to verify the stream is quiet after a failed exchange.
///
/// # Errors
///
/// Returns [`Error::Connection`] on I/O failure, [`Error::Framing`] on
/// invalid UTF-8.
pub async fn drain<R>(reader: &mut R, settle: Duration) -> Result<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut collected = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    let mut empty_reads = 0u32;

    loop {
        match timeout(settle, reader.read(&mut chunk)).await {
            Ok(Ok(0)) => {
                empty_reads += 1;
                if empty_reads >= MAX_EMPTY_READS {
                    return Err(Error::connection("peer closed the connection"));
                }
            }
            Ok(Ok(read)) => {
                empty_reads = 0;
                collected.extend_from_slice(&chunk[..read]);
            }
            Ok(Err(e)) => return Err(Error::io("read", e)),
            Err(_) => break,
        }
    }

    String::from_utf8(collected).map_err(|e| Error::framing(format!("invalid UTF-8: {e}")))
}

// ============================================================================
// Helpers
// ============================================================================

/// Splits `text` into the payload and the unseen rest of a trailing prompt.
///
/// The longest suffix of `text` that starts the prompt is removed; the
/// returned remainder is the part of the prompt still to come.
fn split_partial_prompt(text: &str) -> (&str, &str) {
    if let Some(payload) = text.strip_suffix(PROMPT) {
        return (payload, "");
    }
    for len in (1..PROMPT.len()).rev() {
        if text.ends_with(&PROMPT[..len]) {
            return (&text[..text.len() - len], &PROMPT[len..]);
        }
    }
    (text, PROMPT)
}

/// Milliseconds in `duration`, saturating at `u64::MAX`.
fn whole_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Shortens text for diagnostics.
fn preview(text: &str) -> String {
    const MAX: usize = 64;
    match text.char_indices().nth(MAX) {
        Some((index, _)) => format!("{}...", &text[..index]),
        None => text.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================
