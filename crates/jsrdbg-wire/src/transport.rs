//! Message framing for the jsrdbg byte stream.
//!
//! Socket reads hand over arbitrary chunks; [`Transport`] reassembles them into
//! newline-terminated messages and parses each one into a [`Response`]. It
//! knows nothing about correlation ids or contexts.

use crate::codec::{decode_response, MESSAGE_TERMINATOR};
use crate::types::{JsrdbgError, Response, Result};

const INITIAL_CAPACITY: usize = 4 * 1024;

/// Upper bound for a single buffered message. The engine's largest replies
/// are source dumps of merged scripts, which stay far below this.
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Default)]
pub struct Transport {
    buf: Vec<u8>,
}

impl Transport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes of an incomplete message waiting for its terminator.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Feed one chunk, calling `emit` once per complete message in arrival
    /// order. Malformed messages are emitted as errors and do not affect the
    /// messages around them.
    pub fn push(&mut self, chunk: &[u8], mut emit: impl FnMut(Result<Response>)) {
        let mut rest = chunk;
        while !rest.is_empty() {
            let Some(pos) = rest.iter().position(|&b| b == MESSAGE_TERMINATOR) else {
                self.append(rest, &mut emit);
                return;
            };

            let (message, tail) = rest.split_at(pos + 1);
            if self.buf.is_empty() {
                // The whole message is inside this chunk: parse it in place.
                emit_message(message, &mut emit);
            } else {
                self.append(message, &mut emit);
                if !self.buf.is_empty() {
                    emit_message(&self.buf, &mut emit);
                    self.buf.clear();
                }
            }
            rest = tail;
        }
    }

    fn append(&mut self, bytes: &[u8], emit: &mut impl FnMut(Result<Response>)) {
        let needed = self.buf.len() + bytes.len();
        if needed > MAX_MESSAGE_BYTES {
            emit(Err(JsrdbgError::Protocol(format!(
                "message exceeds maximum size ({MAX_MESSAGE_BYTES} bytes); dropping it"
            ))));
            self.buf = Vec::new();
            return;
        }

        if needed > self.buf.capacity() {
            let grown = (self.buf.capacity() * 2).max(needed).max(INITIAL_CAPACITY);
            self.buf.reserve_exact(grown - self.buf.len());
        }
        self.buf.extend_from_slice(bytes);
    }
}

fn emit_message(message: &[u8], emit: &mut impl FnMut(Result<Response>)) {
    if message.iter().all(u8::is_ascii_whitespace) {
        return;
    }
    tracing::trace!(
        target: "jsrdbg.wire",
        message = %String::from_utf8_lossy(message).trim_end(),
        "<- engine"
    );
    emit(decode_response(message));
}
