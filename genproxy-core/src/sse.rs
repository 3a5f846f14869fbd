//! Incremental SSE reassembly.
//!
//! Upstream bodies arrive in arbitrary chunks: a chunk may end in the
//! middle of a UTF-8 sequence, in the middle of a line, or between a line
//! and the blank line that terminates its event. `SseReassembler` keeps
//! just enough state to turn that into text fragments in arrival order.
//!
//! Framing rules:
//! - lines end with `\n`; a trailing `\r` is dropped;
//! - an empty line closes the event assembled so far;
//! - inside an event, only `data:` lines matter; everything else (comments,
//!   `event:`, keep-alives) is ignored;
//! - a `data:` value equal to the sentinel ends the stream; nothing after
//!   it is processed;
//! - a `data:` value that does not parse is dropped on its own.

use crate::model::PayloadFormat;

const DATA_PREFIX: &str = "data:";

#[derive(Debug)]
pub struct SseReassembler {
    decoder: Utf8Decoder,
    tail: String,
    pending_lines: Vec<String>,
    terminal: bool,
    format: PayloadFormat,
    sentinel: String,
    malformed: usize,
}

impl SseReassembler {
    pub fn new(format: PayloadFormat, sentinel: impl Into<String>) -> Self {
        Self {
            decoder: Utf8Decoder::default(),
            tail: String::new(),
            pending_lines: Vec::new(),
            terminal: false,
            format,
            sentinel: sentinel.into(),
            malformed: 0,
        }
    }

    /// Feed one upstream chunk; returns the non-empty fragments completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        if self.terminal {
            return out;
        }
        let decoded = self.decoder.decode(chunk);
        self.tail.push_str(&decoded);

        let Some(last_nl) = self.tail.rfind('\n') else {
            return out;
        };
        let rest = self.tail.split_off(last_nl + 1);
        let complete = std::mem::replace(&mut self.tail, rest);
        self.consume_lines(complete.split_terminator('\n'), &mut out);
        out
    }

    /// Upstream ended: treat whatever is buffered as a final event.
    pub fn finish(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        if self.terminal {
            return out;
        }
        let rest = self.decoder.flush();
        self.tail.push_str(&rest);
        let tail = std::mem::take(&mut self.tail);
        self.consume_lines(tail.split('\n'), &mut out);
        if !self.terminal {
            self.flush_event(&mut out);
        }
        out
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Count of `data:` payloads dropped because they did not parse.
    pub fn malformed(&self) -> usize {
        self.malformed
    }

    fn consume_lines<'a>(&mut self, lines: impl Iterator<Item = &'a str>, out: &mut Vec<String>) {
        for raw in lines {
            let line = raw.strip_suffix('\r').unwrap_or(raw);
            if line.is_empty() {
                self.flush_event(out);
                if self.terminal {
                    self.tail.clear();
                    self.pending_lines.clear();
                    return;
                }
            } else {
                self.pending_lines.push(line.to_string());
            }
        }
    }

    fn flush_event(&mut self, out: &mut Vec<String>) {
        let lines = std::mem::take(&mut self.pending_lines);
        for line in lines {
            let Some(value) = line.trim().strip_prefix(DATA_PREFIX) else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            if value == self.sentinel {
                self.terminal = true;
                return;
            }
            match self.format.extract_text(value) {
                Some(text) if !text.is_empty() => out.push(text),
                Some(_) => {}
                None => {
                    self.malformed += 1;
                    tracing::trace!(len = value.len(), "dropping unparsable sse payload");
                }
            }
        }
    }
}

/// Streaming UTF-8 decoder: an incomplete trailing sequence waits for the
/// next chunk, invalid bytes become U+FFFD.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, chunk: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);

        let mut out = String::with_capacity(buf.len());
        let mut rest: &[u8] = &buf;
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    fn flush(&mut self) -> String {
        let pending = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&pending).into_owned()
    }
}
