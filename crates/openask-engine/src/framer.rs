//! Incremental stream framer
//!
//! Turns arbitrarily fragmented response bytes into complete protocol
//! frames. Fragment boundaries may fall anywhere, including inside a UTF-8
//! sequence or a JSON payload; a trailing incomplete frame is held until
//! the next read and discarded at end of stream.

use std::pin::Pin;

use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::config::Protocol;
use crate::error::{ChatError, Result};
use crate::transport::ByteStream;

/// One complete, JSON-decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `event:`/`data:` block from the line-event grammar
    Event { name: String, data: Value },
    /// Payload of a `0:` tagged line
    Chunk(Value),
}

/// Lazy, ordered stream of frames.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

/// Streaming UTF-8 decoder that carries split multi-byte sequences across
/// calls. Invalid bytes decode to U+FFFD instead of failing.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(bytes);

        let mut out = String::with_capacity(buf.len());
        let mut input: &[u8] = &buf;
        loop {
            match std::str::from_utf8(input) {
                Ok(valid) => {
                    out.push_str(valid);
                    input = &[];
                    break;
                }
                Err(e) => {
                    let (valid, rest) = input.split_at(e.valid_up_to());
                    if let Ok(valid) = std::str::from_utf8(valid) {
                        out.push_str(valid);
                    }
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            input = &rest[len..];
                        }
                        None => {
                            // Incomplete sequence at the end; wait for more bytes.
                            input = rest;
                            break;
                        }
                    }
                }
            }
        }

        self.pending = input.to_vec();
        out
    }

    /// Flush state at end of input. A dangling partial sequence becomes U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            char::REPLACEMENT_CHARACTER.to_string()
        }
    }
}

/// Line-event frame being assembled across reads.
#[derive(Debug, Default)]
struct PendingEvent {
    name: Option<String>,
    data: Option<String>,
}

impl PendingEvent {
    fn is_empty(&self) -> bool {
        self.name.is_none() && self.data.is_none()
    }
}

/// Stateful frame extractor for one response body.
#[derive(Debug)]
pub struct FrameDecoder {
    protocol: Protocol,
    utf8: Utf8Decoder,
    buffer: String,
    pending: PendingEvent,
}

impl FrameDecoder {
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            utf8: Utf8Decoder::new(),
            buffer: String::new(),
            pending: PendingEvent::default(),
        }
    }

    /// Feed one read's worth of bytes, returning every frame it completes.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        let text = self.utf8.decode(bytes);
        self.buffer.push_str(&text);
        self.drain_lines()
    }

    /// End of stream. Anything not terminated by a frame delimiter is dropped.
    pub fn finish(&mut self) {
        let tail = self.utf8.finish();
        self.buffer.push_str(&tail);
        if !self.buffer.trim().is_empty() || !self.pending.is_empty() {
            tracing::debug!(
                protocol = %self.protocol,
                leftover_len = self.buffer.len(),
                "Discarding incomplete frame at end of stream"
            );
        }
        self.buffer.clear();
        self.pending = PendingEvent::default();
    }

    fn drain_lines(&mut self) -> Vec<Frame> {
        let buffer = std::mem::take(&mut self.buffer);
        let mut frames = Vec::new();
        let mut consumed = 0;

        while let Some(rel) = buffer[consumed..].find('\n') {
            let line_end = consumed + rel;
            let line = buffer[consumed..line_end].trim_end_matches('\r');
            consumed = line_end + 1;

            let frame = match self.protocol {
                Protocol::Session => self.line_event(line),
                Protocol::ChunkStream => tagged_line(line),
            };
            if let Some(frame) = frame {
                frames.push(frame);
            }
        }

        self.buffer = buffer[consumed..].to_string();
        frames
    }

    fn line_event(&mut self, line: &str) -> Option<Frame> {
        if line.is_empty() {
            let pending = std::mem::take(&mut self.pending);
            let (Some(name), Some(data)) = (pending.name, pending.data) else {
                return None;
            };
            return parse_payload(&data).map(|data| Frame::Event { name, data });
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.pending.name = Some(value.trim().to_string()),
            "data" => match &mut self.pending.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.pending.data = Some(value.to_string()),
            },
            _ => {}
        }
        None
    }
}

fn tagged_line(line: &str) -> Option<Frame> {
    if line.trim().is_empty() {
        return None;
    }

    let Some((tag, payload)) = line.split_once(':') else {
        tracing::debug!(line_len = line.len(), "Ignoring untagged line");
        return None;
    };

    if tag.is_empty() || !tag.bytes().all(|b| b.is_ascii_digit()) {
        tracing::debug!(tag, "Ignoring line with invalid tag");
        return None;
    }

    if tag != "0" {
        tracing::debug!(tag, "Ignoring unsupported stream tag");
        return None;
    }

    parse_payload(payload).map(Frame::Chunk)
}

fn parse_payload(data: &str) -> Option<Value> {
    match serde_json::from_str(data) {
        Ok(value) => Some(value),
        Err(e) => {
            let err = ChatError::MalformedFrame(e.to_string());
            tracing::warn!(data_len = data.len(), error = %err, "Skipping frame");
            None
        }
    }
}

/// Frame a byte stream lazily, in arrival order.
pub fn frame_stream(mut bytes: ByteStream, protocol: Protocol) -> FrameStream {
    Box::pin(async_stream::stream! {
        let mut decoder = FrameDecoder::new(protocol);

        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => {
                    for frame in decoder.push(&chunk) {
                        yield Ok(frame);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }

        decoder.finish();
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;

    const SSE_BODY: &str = "event: connected\ndata: {\"type\":\"connected\"}\n\n\
event: answer\ndata: {\"type\":\"answer\",\"text\":\"Héllo 世界 🦀\",\"sessionId\":\"s1\"}\n\n\
event: tool\ndata: {\"type\":\"tool\",\"tool\":\"search\",\"callID\":\"c1\",\"status\":\"running\",\"sessionId\":\"s1\"}\n\n\
event: done\ndata: {\"type\":\"done\"}\n\n";

    const CHUNK_BODY: &str = "0:{\"type\":\"text-start\",\"id\":\"t1\"}\n\
0:{\"type\":\"text-delta\",\"id\":\"t1\",\"delta\":\"naïve ✓\"}\n\
2:[{\"annotation\":true}]\n\
0:{\"type\":\"text-end\",\"id\":\"t1\"}\n";

    fn decode_all(protocol: Protocol, pieces: &[&[u8]]) -> Vec<Frame> {
        let mut decoder = FrameDecoder::new(protocol);
        let mut frames = Vec::new();
        for piece in pieces {
            frames.extend(decoder.push(piece));
        }
        decoder.finish();
        frames
    }

    #[test]
    fn test_utf8_decoder_split_multibyte() {
        let bytes = "a🦀b".as_bytes();
        let mut decoder = Utf8Decoder::new();
        let mut out = String::new();
        for byte in bytes {
            out.push_str(&decoder.decode(std::slice::from_ref(byte)));
        }
        out.push_str(&decoder.finish());
        assert_eq!(out, "a🦀b");
    }

    #[test]
    fn test_utf8_decoder_invalid_bytes_replaced() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&[b'a', 0xff, b'b']), "a\u{FFFD}b");
        assert_eq!(decoder.decode(&[0xe4, 0xb8]), "");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }

    #[test]
    fn test_line_event_frames() {
        let frames = decode_all(Protocol::Session, &[SSE_BODY.as_bytes()]);
        assert_eq!(frames.len(), 4);
        assert_eq!(
            frames[0],
            Frame::Event {
                name: "connected".to_string(),
                data: json!({"type": "connected"}),
            }
        );
        match &frames[1] {
            Frame::Event { name, data } => {
                assert_eq!(name, "answer");
                assert_eq!(data["text"], "Héllo 世界 🦀");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_line_event_fragmentation_invariant() {
        let bytes = SSE_BODY.as_bytes();
        let whole = decode_all(Protocol::Session, &[bytes]);

        for split in 0..=bytes.len() {
            let (a, b) = bytes.split_at(split);
            assert_eq!(decode_all(Protocol::Session, &[a, b]), whole, "split at {split}");
        }

        let singles: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(decode_all(Protocol::Session, &singles), whole);

        for size in [2, 3, 5, 7, 13] {
            let chunks: Vec<&[u8]> = bytes.chunks(size).collect();
            assert_eq!(decode_all(Protocol::Session, &chunks), whole, "chunk size {size}");
        }
    }

    #[test]
    fn test_tagged_line_fragmentation_invariant() {
        let bytes = CHUNK_BODY.as_bytes();
        let whole = decode_all(Protocol::ChunkStream, &[bytes]);
        assert_eq!(whole.len(), 3);

        for split in 0..=bytes.len() {
            for second in split..=bytes.len() {
                let pieces = [&bytes[..split], &bytes[split..second], &bytes[second..]];
                assert_eq!(decode_all(Protocol::ChunkStream, &pieces), whole);
            }
        }
    }

    #[test]
    fn test_line_event_missing_field_dropped() {
        let body = "event: answer\n\ndata: {\"type\":\"done\"}\n\nevent: done\ndata: {}\n\n";
        let frames = decode_all(Protocol::Session, &[body.as_bytes()]);
        assert_eq!(
            frames,
            vec![Frame::Event {
                name: "done".to_string(),
                data: json!({}),
            }]
        );
    }

    #[test]
    fn test_line_event_crlf_and_comments() {
        let body = ": keep-alive\r\nevent: done\r\ndata: {\"type\":\"done\"}\r\n\r\n";
        let frames = decode_all(Protocol::Session, &[body.as_bytes()]);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_malformed_payload_skipped() {
        let body = "event: answer\ndata: {not json\n\nevent: done\ndata: {\"type\":\"done\"}\n\n";
        let frames = decode_all(Protocol::Session, &[body.as_bytes()]);
        assert_eq!(frames.len(), 1);

        let body = "0:{oops\n0:{\"type\":\"text-start\"}\n";
        let frames = decode_all(Protocol::ChunkStream, &[body.as_bytes()]);
        assert_eq!(frames, vec![Frame::Chunk(json!({"type": "text-start"}))]);
    }

    #[test]
    fn test_trailing_partial_frame_discarded() {
        let body = "event: done\ndata: {\"type\":\"done\"}\n\nevent: answer\ndata: {\"type\":\"answer\"";
        assert_eq!(decode_all(Protocol::Session, &[body.as_bytes()]).len(), 1);

        // Complete JSON but no terminating newline: still incomplete.
        let body = "0:{\"type\":\"text-start\"}\n0:{\"type\":\"text-end\"}";
        assert_eq!(decode_all(Protocol::ChunkStream, &[body.as_bytes()]).len(), 1);
    }

    #[test]
    fn test_unknown_tags_ignored() {
        let body = "1:{\"a\":1}\nd:{\"finishReason\":\"stop\"}\nnot a frame\n0:{\"type\":\"text-end\"}\n";
        let frames = decode_all(Protocol::ChunkStream, &[body.as_bytes()]);
        assert_eq!(frames, vec![Frame::Chunk(json!({"type": "text-end"}))]);
    }

    #[tokio::test]
    async fn test_frame_stream_passes_errors_through() {
        let chunks: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"0:{\"type\":\"text-start\"}\n0:{\"ty")),
            Ok(Bytes::from_static(b"pe\":\"text-end\"}\n")),
            Err(ChatError::Stream("connection reset".to_string())),
            Ok(Bytes::from_static(b"0:{\"type\":\"text-start\"}\n")),
        ];
        let mut frames = frame_stream(
            Box::pin(futures::stream::iter(chunks)),
            Protocol::ChunkStream,
        );

        assert!(matches!(frames.next().await, Some(Ok(Frame::Chunk(_)))));
        assert!(matches!(frames.next().await, Some(Ok(Frame::Chunk(_)))));
        assert!(matches!(frames.next().await, Some(Err(ChatError::Stream(_)))));
        assert!(frames.next().await.is_none());
    }
}
