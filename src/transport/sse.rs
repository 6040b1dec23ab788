//! Server-Sent Events framing for the assistant reply stream.
//!
//! The server sends one JSON object per `data:` line, an `event: error`
//! frame on failure, and `data: [DONE]` at the end.

use super::StreamChunk;
use crate::error::TransportError;

/// One complete SSE event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental decoder: feed raw bytes, get complete events back.
///
/// Bytes are buffered undecoded until an event is complete, so a multibyte
/// character split across two reads survives intact.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and drain every event terminated by a blank line.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        if self.buffer.contains(&b'\r') {
            strip_crlf(&mut self.buffer);
        }

        let mut events = Vec::new();
        while let Some(event_end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let raw: Vec<u8> = self.buffer.drain(..event_end + 2).collect();
            if let Some(event) = parse_event(&String::from_utf8_lossy(&raw[..event_end])) {
                events.push(event);
            }
        }
        events
    }

    /// Whatever is left once the connection closes.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        parse_event(String::from_utf8_lossy(&rest).trim_end())
    }
}

/// Turn `\r\n` into `\n`. A trailing `\r` is left for the next read.
fn strip_crlf(buffer: &mut Vec<u8>) {
    let mut out = Vec::with_capacity(buffer.len());
    let mut bytes = buffer.iter().copied().peekable();
    while let Some(b) = bytes.next() {
        if b == b'\r' && bytes.peek() == Some(&b'\n') {
            continue;
        }
        out.push(b);
    }
    *buffer = out;
}

fn parse_event(raw: &str) -> Option<SseEvent> {
    let mut event = SseEvent::default();
    let mut data_lines = Vec::new();

    for line in raw.lines() {
        if line.starts_with(':') {
            continue;
        }
        if let Some(name) = line.strip_prefix("event:") {
            event.event = Some(name.trim().to_string());
        } else if let Some(data) = line.strip_prefix("data:") {
            data_lines.push(data.strip_prefix(' ').unwrap_or(data));
        }
    }

    if data_lines.is_empty() && event.event.is_none() {
        return None;
    }
    event.data = data_lines.join("\n");
    Some(event)
}

/// Turn an SSE event into a stream item. `None` for events that carry no
/// reply content (keep-alives, metadata).
pub fn interpret(event: &SseEvent) -> Option<Result<StreamChunk, TransportError>> {
    if event.event.as_deref() == Some("error") {
        let message = serde_json::from_str::<serde_json::Value>(&event.data)
            .ok()
            .and_then(|v| v["error"].as_str().or(v["message"].as_str()).map(str::to_string))
            .unwrap_or_else(|| event.data.clone());
        return Some(Err(TransportError::Stream(message)));
    }

    let data = event.data.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(Ok(StreamChunk::Done));
    }

    let json: serde_json::Value = match serde_json::from_str(data) {
        Ok(json) => json,
        Err(e) => return Some(Err(TransportError::Malformed(format!("bad SSE payload: {}", e)))),
    };

    if let Some(err) = json.get("error").and_then(|e| e.as_str()) {
        return Some(Err(TransportError::Stream(err.to_string())));
    }
    if json.get("done").and_then(|d| d.as_bool()) == Some(true) {
        return Some(Ok(StreamChunk::Done));
    }

    ["delta", "text", "content"]
        .iter()
        .find_map(|key| json.get(*key).and_then(|v| v.as_str()))
        .map(|text| Ok(StreamChunk::Text(text.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_split_across_reads_are_reassembled() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"delta\":\"Hel").is_empty());
        let events = decoder.push(b"lo\"}\n\ndata: [DONE]\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(
            interpret(&events[0]).unwrap().unwrap(),
            StreamChunk::Text("Hello".into())
        );
        assert_eq!(interpret(&events[1]).unwrap().unwrap(), StreamChunk::Done);
    }

    #[test]
    fn multibyte_character_split_across_reads_is_kept() {
        let payload = "data: {\"delta\":\"é\"}\n\n".as_bytes();
        let split = payload.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&payload[..split]).is_empty());
        let events = decoder.push(&payload[split..]);
        assert_eq!(
            interpret(&events[0]).unwrap().unwrap(),
            StreamChunk::Text("é".into())
        );
    }

    #[test]
    fn crlf_split_between_reads_is_accepted() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"text\":\"a\"}\r\n\r").is_empty());
        let events = decoder.push(b"\ndata: [DONE]\r\n\r\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "{\"text\":\"a\"}");
        assert_eq!(interpret(&events[1]).unwrap().unwrap(), StreamChunk::Done);
    }

    #[test]
    fn crlf_framing_is_accepted() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: {\"text\":\"a\"}\r\n\r\n");
        assert_eq!(events[0].data, "{\"text\":\"a\"}");
    }

    #[test]
    fn error_events_become_stream_errors() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"event: error\ndata: {\"error\":\"overloaded\"}\n\n");
        match interpret(&events[0]).unwrap() {
            Err(TransportError::Stream(msg)) => assert_eq!(msg, "overloaded"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn comments_and_metadata_are_skipped() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keep-alive\n\ndata: {\"usage\":{\"tokens\":3}}\n\n");
        assert_eq!(events.len(), 1);
        assert!(interpret(&events[0]).is_none());
    }

    #[test]
    fn garbage_payload_is_malformed() {
        let event = SseEvent {
            event: None,
            data: "<html>".into(),
        };
        assert!(matches!(
            interpret(&event),
            Some(Err(TransportError::Malformed(_)))
        ));
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: [DONE]").is_empty());
        let last = decoder.finish().unwrap();
        assert_eq!(interpret(&last).unwrap().unwrap(), StreamChunk::Done);
        assert!(decoder.finish().is_none());
    }
}
