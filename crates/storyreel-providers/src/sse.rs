//! Incremental decoder for `text/event-stream` bodies.
//!
//! Only `data:` fields are surfaced; comments, `event:` and `id:` lines are
//! ignored. Chunks may split lines anywhere, including inside a UTF-8
//! sequence, so bytes are buffered until a full line is available.

/// Terminal payload sent by chat completion streams.
pub const DONE_SIGNAL: &str = "[DONE]";

/// A decoded stream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Data(String),
    Done,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a body chunk and return the events completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = parse_line(&line[..line.len() - 1]) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let line = std::mem::take(&mut self.buffer);
        parse_line(&line)
    }
}

fn parse_line(raw: &[u8]) -> Option<SseEvent> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches('\r');
    let payload = line.strip_prefix("data:")?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);

    if payload.trim() == DONE_SIGNAL {
        Some(SseEvent::Done)
    } else {
        Some(SseEvent::Data(payload.to_string()))
    }
}
