//! SSE (Server-Sent Events) parser
//!
//! Parses the SSE wire format into raw events. Payload interpretation is left
//! to the caller: the stream transport looks at `endpoint` and `message`
//! events only.

use bytes::Bytes;
use tracing::trace;

/// One dispatched SSE event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event type; `None` means the default `message` type
    pub event: Option<String>,
    /// Data lines joined with `\n`
    pub data: String,
}

impl SseEvent {
    /// Event type with the SSE default applied
    pub fn event_type(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }
}

/// SSE parser state
#[derive(Debug, Default)]
pub struct SseParser {
    /// Buffer for incomplete lines
    buffer: Vec<u8>,
    /// Current event data being accumulated
    data_buffer: String,
    /// Whether any data line was seen for the current event
    has_data: bool,
    /// Current event type (if any)
    event_type: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes into the parser and extract any complete events
    pub fn feed(&mut self, bytes: &Bytes) -> Vec<SseEvent> {
        let mut events = Vec::new();

        self.buffer.extend_from_slice(bytes);

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = self.buffer.drain(..=pos).collect::<Vec<_>>();
            let line = &line[..line.len() - 1];

            // Handle \r\n line endings
            let line = line.strip_suffix(b"\r").unwrap_or(line);

            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }

        events
    }

    fn process_line(&mut self, line: &[u8]) -> Option<SseEvent> {
        // Empty line signals end of event
        if line.is_empty() {
            return self.dispatch_event();
        }

        // Comment line (keepalive)
        if line.starts_with(b":") {
            trace!("SSE keepalive/comment");
            return None;
        }

        let line_str = String::from_utf8_lossy(line);

        let (field, value) = match line_str.find(':') {
            Some(colon_pos) => {
                let (f, v) = line_str.split_at(colon_pos);
                let v = &v[1..];
                (f, v.strip_prefix(' ').unwrap_or(v))
            }
            None => (&*line_str, ""),
        };

        match field {
            "data" => {
                if self.has_data {
                    self.data_buffer.push('\n');
                }
                self.data_buffer.push_str(value);
                self.has_data = true;
            }
            "event" => {
                self.event_type = Some(value.to_string());
            }
            "id" | "retry" => {
                trace!("SSE {}: {}", field, value);
            }
            _ => {
                trace!("SSE unknown field: {}", field);
            }
        }

        None
    }

    fn dispatch_event(&mut self) -> Option<SseEvent> {
        let event = self.event_type.take();
        if !self.has_data {
            return None;
        }

        self.has_data = false;
        Some(SseEvent {
            event,
            data: std::mem::take(&mut self.data_buffer),
        })
    }
}
