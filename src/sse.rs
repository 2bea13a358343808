//! Framing and decoding of the `/chat` event stream.
//!
//! The body is a sequence of `\n`-terminated lines; lines starting with `data: ` carry one
//! JSON payload each. Framing ([`SseDecoder`]) is kept apart from payload decoding
//! ([`decode_line`]) so a bad payload costs one frame and never the stream.

use serde::Deserialize;

const DATA_PREFIX: &str = "data: ";

/// Splits an incoming byte stream into complete lines.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one network chunk and returns every line it completed.
    ///
    /// Bytes are only decoded once their line is complete, so a multi-byte character split
    /// across two chunks comes out intact.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            lines.push(decode(&self.pending[start..end]));
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }

    /// Flushes an unterminated final line, if the stream ended mid-line.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = decode(&self.pending);
        self.pending.clear();
        Some(line)
    }
}

fn decode(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ChatPayload {
    #[serde(default)]
    pub chunk: Option<String>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: bool,
    #[serde(default)]
    pub full_response: Option<String>,
    #[serde(default)]
    pub agent_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Chunk(String),
    Done { full_response: Option<String> },
    /// Server-side failure; carries the message to show, if the server sent one.
    Error(Option<String>),
    /// Not a data line, or a payload that carries nothing to render.
    Ignored,
    Malformed(String),
}

pub fn decode_line(line: &str) -> Frame {
    let Some(data) = line.strip_prefix(DATA_PREFIX) else {
        return Frame::Ignored;
    };
    match serde_json::from_str::<ChatPayload>(data) {
        Ok(payload) => classify(payload),
        Err(e) => Frame::Malformed(e.to_string()),
    }
}

fn classify(payload: ChatPayload) -> Frame {
    if payload.error {
        return Frame::Error(payload.chunk.filter(|c| !c.is_empty()));
    }
    if payload.done {
        return Frame::Done {
            full_response: payload.full_response,
        };
    }
    match payload.chunk {
        Some(chunk) if !chunk.is_empty() => Frame::Chunk(chunk),
        _ => Frame::Ignored,
    }
}
