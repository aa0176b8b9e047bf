//! Turning raw session events into protocol events.
//!
//! Terminal output arrives in arbitrary byte chunks, so a multi-byte UTF-8
//! character can be split across two chunks. Each session keeps its own
//! [`Utf8Decoder`] that holds back an incomplete trailing sequence until the
//! next chunk arrives.

use std::collections::HashMap;

use devterm_core::{SessionEvent, SessionId};

use crate::messages::Event;

/// Incremental UTF-8 decoder for one byte stream.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Create a decoder with nothing buffered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `chunk`, prefixed by any bytes held back from the previous call.
    ///
    /// Invalid sequences become U+FFFD. An incomplete sequence at the very end
    /// is kept for the next call.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut buffer = std::mem::take(&mut self.pending);
        buffer.extend_from_slice(chunk);

        let mut text = String::with_capacity(buffer.len());
        let mut rest = buffer.as_slice();

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        self.pending = rest.to_vec();
        text
    }

    /// Flush held-back bytes, replacing them with U+FFFD.
    pub fn finish(&mut self) -> String {
        let pending = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&pending).into_owned()
    }

    /// Number of bytes held back.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Maps [`SessionEvent`]s to protocol [`Event`]s, one decoder per session.
#[derive(Debug, Default)]
pub struct EventEncoder {
    decoders: HashMap<SessionId, Utf8Decoder>,
}

impl EventEncoder {
    /// Create an encoder with no session state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode one session event.
    ///
    /// Output that decodes to nothing yet yields no event. An exit first
    /// flushes whatever the session's decoder still held back.
    pub fn encode(&mut self, event: SessionEvent) -> Vec<Event> {
        match event {
            SessionEvent::Output { id, data } => {
                let text = self.decoders.entry(id).or_default().decode(&data);
                if text.is_empty() {
                    Vec::new()
                } else {
                    vec![Event::TerminalData {
                        terminal_id: id,
                        data: text,
                    }]
                }
            }
            SessionEvent::Exit { id, status } => {
                let mut events = Vec::with_capacity(2);
                if let Some(mut decoder) = self.decoders.remove(&id) {
                    let tail = decoder.finish();
                    if !tail.is_empty() {
                        events.push(Event::TerminalData {
                            terminal_id: id,
                            data: tail,
                        });
                    }
                }
                events.push(Event::TerminalExit {
                    terminal_id: id,
                    exit_code: status.exit_code,
                    signal: status.signal,
                });
                events
            }
        }
    }

    /// Number of sessions with decoder state.
    pub fn tracked_sessions(&self) -> usize {
        self.decoders.len()
    }
}
