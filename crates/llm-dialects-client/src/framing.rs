//! Stream framing: turns response bytes into provider frames.
//!
//! Both decoders carry incomplete UTF-8 sequences and incomplete frames
//! across chunk boundaries, and abort once either buffer grows past
//! [`MAX_BUF`].

use llm_dialects::LlmError;

/// Maximum size for buffers before we abort the stream.
pub(crate) const MAX_BUF: usize = 16 * 1024 * 1024; // 16 MiB

/// How a provider delimits stream frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Server-sent events: `event:`/`data:` lines, blank-line separated.
    Sse,
    /// One JSON document per line.
    JsonLines,
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The SSE `event:` name, if present.
    pub event: Option<String>,
    /// The payload (SSE `data:` lines joined with `\n`, or one JSON line).
    pub data: String,
}

/// Incremental frame decoder for one response.
#[derive(Debug)]
pub(crate) struct FrameDecoder {
    framing: Framing,
    utf8_buf: Vec<u8>,
    buffer: String,
}

impl FrameDecoder {
    pub(crate) fn new(framing: Framing) -> Self {
        Self {
            framing,
            utf8_buf: Vec::new(),
            buffer: String::new(),
        }
    }

    /// Feeds raw bytes and returns every frame they complete.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Result<Vec<Frame>, LlmError> {
        self.utf8_buf.extend_from_slice(bytes);
        if self.utf8_buf.len() > MAX_BUF || self.buffer.len() > MAX_BUF {
            self.utf8_buf.clear();
            self.buffer.clear();
            return Err(LlmError::ResponseFormat {
                message: "stream buffer exceeded 16 MiB".into(),
                raw: String::new(),
            });
        }

        match std::str::from_utf8(&self.utf8_buf) {
            Ok(text) => {
                self.buffer.push_str(text);
                self.utf8_buf.clear();
            }
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                if let Ok(valid) = std::str::from_utf8(&self.utf8_buf[..valid_up_to]) {
                    self.buffer.push_str(valid);
                }
                // An incomplete trailing sequence waits for the next chunk;
                // permanently invalid bytes are skipped.
                let skip = match e.error_len() {
                    Some(len) => valid_up_to + len,
                    None => valid_up_to,
                };
                self.utf8_buf.drain(..skip);
            }
        }

        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut frames = Vec::new();
        match self.framing {
            Framing::Sse => {
                while let Some(pos) = self.buffer.find("\n\n") {
                    let block: String = self.buffer.drain(..pos + 2).collect();
                    frames.extend(parse_sse_block(&block));
                }
            }
            Framing::JsonLines => {
                while let Some(pos) = self.buffer.find('\n') {
                    let line: String = self.buffer.drain(..=pos).collect();
                    frames.extend(json_line(&line));
                }
            }
        }
        Ok(frames)
    }

    /// Returns the final frame when the body ended without a terminator.
    pub(crate) fn finish(&mut self) -> Vec<Frame> {
        let rest = std::mem::take(&mut self.buffer);
        self.utf8_buf.clear();
        match self.framing {
            Framing::Sse => parse_sse_block(&rest).into_iter().collect(),
            Framing::JsonLines => json_line(&rest).into_iter().collect(),
        }
    }
}

fn parse_sse_block(block: &str) -> Option<Frame> {
    let mut event = None;
    let mut data: Option<String> = None;
    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event = Some(value.to_owned()),
            "data" => match &mut data {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_owned()),
            },
            _ => {}
        }
    }
    data.filter(|d| !d.is_empty()).map(|data| Frame { event, data })
}

fn json_line(line: &str) -> Option<Frame> {
    let line = line.trim();
    (!line.is_empty()).then(|| Frame {
        event: None,
        data: line.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_frames_split_across_chunks() {
        let mut decoder = FrameDecoder::new(Framing::Sse);
        assert!(decoder.push(b"event: ping\nda").unwrap().is_empty());
        let frames = decoder.push(b"ta: {\"a\":1}\n\ndata: [DONE]\n\n").unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event.as_deref(), Some("ping"));
        assert_eq!(frames[0].data, "{\"a\":1}");
        assert_eq!(frames[1].data, "[DONE]");
    }

    #[test]
    fn test_sse_crlf_and_comments() {
        let mut decoder = FrameDecoder::new(Framing::Sse);
        let frames = decoder.push(b": keep-alive\r\n\r\ndata: x\r\n\r\n").unwrap();
        assert_eq!(frames, vec![Frame {
            event: None,
            data: "x".into()
        }]);
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let mut decoder = FrameDecoder::new(Framing::JsonLines);
        let bytes = "{\"t\":\"h\u{e9}\"}\n".as_bytes();
        let split = bytes.iter().position(|&b| b == 0xC3).unwrap() + 1;
        assert!(decoder.push(&bytes[..split]).unwrap().is_empty());
        let frames = decoder.push(&bytes[split..]).unwrap();
        assert_eq!(frames[0].data, "{\"t\":\"h\u{e9}\"}");
    }

    #[test]
    fn test_json_lines_skip_blank_and_flush_tail() {
        let mut decoder = FrameDecoder::new(Framing::JsonLines);
        let frames = decoder.push(b"{\"a\":1}\n\n{\"b\"").unwrap();
        assert_eq!(frames.len(), 1);
        decoder.push(b":2}").unwrap();
        let tail = decoder.finish();
        assert_eq!(tail[0].data, "{\"b\":2}");
    }
}
