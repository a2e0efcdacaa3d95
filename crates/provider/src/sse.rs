//! Server-sent-events framing shared by both backends: Anthropic's native
//! SSE stream and OpenAI's chat-completions SSE dialect both delimit frames
//! with a blank line and carry an `event:`/`data:` pair, so the framing
//! lives here once and each backend only interprets its own payload shape.

use anyhow::Result;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Response;

/// One decoded frame, with the trailing blank-line separator already
/// consumed and `[DONE]` sentinels already filtered out.
#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    /// Parses `data` as JSON. Malformed payloads are swallowed here so both
    /// backends can `continue` their loop on a bad frame without repeating
    /// the same match arm.
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_str(&self.data).ok()
    }

    pub fn is_kind(&self, kind: &str) -> bool {
        self.event.as_deref() == Some(kind)
    }
}

/// Accumulates raw bytes until a full `\n\n`-terminated frame is available.
struct FrameBuffer {
    raw: String,
}

impl FrameBuffer {
    fn new() -> Self {
        Self { raw: String::new() }
    }

    fn push(&mut self, bytes: &[u8]) {
        self.raw.push_str(&String::from_utf8_lossy(bytes));
    }

    /// Pulls the next complete frame off the front of the buffer, leaving
    /// any trailing partial frame in place for the next `push`.
    fn take_frame(&mut self) -> Option<String> {
        let pos = self.raw.find("\n\n")?;
        let frame = self.raw[..pos].to_string();
        self.raw = self.raw[pos + 2..].to_string();
        Some(frame)
    }
}

fn decode_frame(text: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data_lines = Vec::new();

    for line in text.lines() {
        if let Some(value) = line.strip_prefix("event: ") {
            event = Some(value.to_string());
        } else if let Some(value) = line.strip_prefix("data: ") {
            data_lines.push(value);
        } else if line == "data:" {
            data_lines.push("");
        }
    }

    if data_lines.is_empty() {
        return None;
    }

    let data = data_lines.join("\n");
    if data == "[DONE]" {
        return None;
    }

    Some(SseEvent { event, data })
}

/// Turns a streaming HTTP response into a stream of decoded frames,
/// buffering partial frames across chunk boundaries.
pub fn parse_sse_stream(response: Response) -> BoxStream<'static, Result<SseEvent>> {
    let byte_stream = response.bytes_stream();
    let buffer = FrameBuffer::new();

    let stream = futures::stream::unfold((byte_stream, buffer), |(mut byte_stream, mut buffer)| async move {
        loop {
            if let Some(frame) = buffer.take_frame() {
                if let Some(event) = decode_frame(&frame) {
                    return Some((Ok(event), (byte_stream, buffer)));
                }
                continue;
            }

            match byte_stream.next().await {
                Some(Ok(bytes)) => buffer.push(&bytes),
                Some(Err(e)) => return Some((Err(e.into()), (byte_stream, buffer))),
                None => return None,
            }
        }
    });

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_frame_extracts_event_and_data() {
        let text = "event: content_block_delta\ndata: {\"type\":\"text_delta\"}";
        let event = decode_frame(text).unwrap();
        assert_eq!(event.event.as_deref(), Some("content_block_delta"));
        assert_eq!(event.data, "{\"type\":\"text_delta\"}");
    }

    #[test]
    fn decode_frame_done_sentinel_is_none() {
        assert!(decode_frame("data: [DONE]").is_none());
    }

    #[test]
    fn json_parses_the_data_payload() {
        let event = SseEvent { event: None, data: "{\"id\": 7}".to_string() };
        assert_eq!(event.json().unwrap()["id"], 7);
    }

    #[test]
    fn json_is_none_for_malformed_data() {
        let event = SseEvent { event: None, data: "not json".to_string() };
        assert!(event.json().is_none());
    }

    #[test]
    fn is_kind_matches_the_event_name() {
        let event = SseEvent { event: Some("message_start".to_string()), data: "{}".to_string() };
        assert!(event.is_kind("message_start"));
        assert!(!event.is_kind("message_stop"));
    }

    #[test]
    fn frame_buffer_holds_partial_frames_across_pushes() {
        let mut buf = FrameBuffer::new();
        buf.push(b"event: x\ndata: a");
        assert!(buf.take_frame().is_none());
        buf.push(b"\n\n");
        let frame = buf.take_frame().unwrap();
        assert_eq!(frame, "event: x\ndata: a");
    }
}
