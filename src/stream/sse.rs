//! Line-delimited transports: Server-Sent Events and NDJSON.

use crate::error::LLMError;

use super::{FrameParser, StreamFrame};

/// How lines are grouped into frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineMode {
    /// `event:`/`data:` fields terminated by a blank line.
    Sse,
    /// One JSON document per non-empty line; the type tag lives in the payload.
    Ndjson,
}

/// Incremental line decoder. Bytes may arrive split at any position.
#[derive(Debug)]
pub struct SseParser {
    mode: LineMode,
    provider: &'static str,
    buffer: Vec<u8>,
    event: Option<String>,
    data_lines: Vec<Vec<u8>>,
}

impl SseParser {
    pub fn new(provider: &'static str) -> Self {
        Self::with_mode(provider, LineMode::Sse)
    }

    pub fn ndjson(provider: &'static str) -> Self {
        Self::with_mode(provider, LineMode::Ndjson)
    }

    pub fn with_mode(provider: &'static str, mode: LineMode) -> Self {
        Self {
            mode,
            provider,
            buffer: Vec::new(),
            event: None,
            data_lines: Vec::new(),
        }
    }

    fn drain_line(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
        buffer.iter().position(|b| *b == b'\n').map(|pos| {
            let mut line: Vec<u8> = buffer.drain(..=pos).collect();
            if line.last() == Some(&b'\n') {
                line.pop();
            }
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            line
        })
    }

    fn decode_utf8(&self, bytes: Vec<u8>) -> Result<String, LLMError> {
        String::from_utf8(bytes).map_err(|err| {
            LLMError::decode(self.provider, format!("invalid UTF-8 in stream chunk: {err}"))
        })
    }

    fn handle_line(&mut self, line: Vec<u8>, out: &mut Vec<StreamFrame>) -> Result<(), LLMError> {
        match self.mode {
            LineMode::Ndjson => {
                if line.iter().all(u8::is_ascii_whitespace) {
                    return Ok(());
                }
                let data = self.decode_utf8(line)?;
                out.push(StreamFrame {
                    event: None,
                    data: data.trim().to_string(),
                });
                Ok(())
            }
            LineMode::Sse => {
                if line.is_empty() {
                    return self.flush_event(out);
                }
                if line.starts_with(b":") {
                    return Ok(());
                }
                let (field, value) = match line.iter().position(|b| *b == b':') {
                    Some(pos) => {
                        let mut value = &line[pos + 1..];
                        if value.first() == Some(&b' ') {
                            value = &value[1..];
                        }
                        (&line[..pos], value.to_vec())
                    }
                    None => (&line[..], Vec::new()),
                };
                match field {
                    b"data" => self.data_lines.push(value),
                    b"event" => {
                        let name = self.decode_utf8(value)?;
                        self.event = Some(name.trim().to_string());
                    }
                    _ => {}
                }
                Ok(())
            }
        }
    }

    fn flush_event(&mut self, out: &mut Vec<StreamFrame>) -> Result<(), LLMError> {
        let event = self.event.take();
        if self.data_lines.is_empty() {
            return Ok(());
        }

        let mut joined = Vec::new();
        for (idx, mut segment) in self.data_lines.drain(..).enumerate() {
            if idx > 0 {
                joined.push(b'\n');
            }
            joined.append(&mut segment);
        }

        if joined.is_empty() {
            return Ok(());
        }

        let data = self.decode_utf8(joined)?;
        out.push(StreamFrame { event, data });
        Ok(())
    }
}

impl FrameParser for SseParser {
    fn push(&mut self, bytes: &[u8]) -> Result<Vec<StreamFrame>, LLMError> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(line) = Self::drain_line(&mut self.buffer) {
            self.handle_line(line, &mut out)?;
        }
        Ok(out)
    }

    fn finish(&mut self) -> Result<Vec<StreamFrame>, LLMError> {
        let mut out = Vec::new();
        if !self.buffer.is_empty() {
            let mut line = std::mem::take(&mut self.buffer);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.handle_line(line, &mut out)?;
        }
        if self.mode == LineMode::Sse {
            self.flush_event(&mut out)?;
        }
        Ok(out)
    }
}
