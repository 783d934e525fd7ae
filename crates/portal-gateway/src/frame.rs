use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use portal_core::messages::ModelMetadata;
use portal_core::stream::{
    ContentDelta, DocSummary, GraphragMetadata, ResearchProgress, StreamEvent, ToolCallFrame,
    ToolResultFrame,
};
use portal_core::tokens::TokenUsage;

const DATA_PREFIX: &str = "data:";
const DONE_MARKER: &str = "[DONE]";

/// Events decoded from one chunk.
#[derive(Debug, Default, PartialEq)]
pub struct FrameBatch {
    pub events: Vec<StreamEvent>,
    /// The terminal marker was seen in this chunk or earlier.
    pub done: bool,
}

enum Line {
    Event(StreamEvent),
    Done,
    Skip,
}

/// Incremental decoder for the gateway's `data: <json>` line stream.
///
/// Holds raw bytes until a full line is available so that neither a record
/// nor a UTF-8 sequence split across chunks is lost.
#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: Vec<u8>,
    /// Leading bytes of `buffer` already known to hold no newline.
    scanned: usize,
    done: bool,
    dropped: usize,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Frames discarded because their payload did not decode.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn push(&mut self, chunk: &[u8]) -> FrameBatch {
        let mut batch = FrameBatch {
            events: Vec::new(),
            done: self.done,
        };
        if self.done {
            return batch;
        }

        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.extend_from_slice(chunk);
        let mut line_start = 0;
        let mut search_from = self.scanned;
        while let Some(offset) = buffer[search_from..].iter().position(|b| *b == b'\n') {
            let end = search_from + offset;
            if self.take_line(&buffer[line_start..end], &mut batch.events) {
                // Anything after the terminal marker is ignored, buffered or not.
                buffer.clear();
                line_start = 0;
                break;
            }
            line_start = end + 1;
            search_from = line_start;
        }
        buffer.drain(..line_start);
        self.scanned = buffer.len();
        self.buffer = buffer;
        batch.done = self.done;
        batch
    }

    /// Decode whatever is left once the body has closed.
    pub fn finish(&mut self) -> FrameBatch {
        let mut batch = FrameBatch {
            events: Vec::new(),
            done: self.done,
        };
        if !self.done && !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            self.scanned = 0;
            let _ = self.take_line(&rest, &mut batch.events);
        }
        batch.done = self.done;
        batch
    }

    /// Returns true when the line was the terminal marker.
    fn take_line(&mut self, raw: &[u8], out: &mut Vec<StreamEvent>) -> bool {
        let line = String::from_utf8_lossy(raw);
        match self.parse_line(line.trim_end_matches('\r')) {
            Line::Event(event) => {
                out.push(event);
                false
            }
            Line::Done => {
                self.done = true;
                out.push(StreamEvent::Done);
                true
            }
            Line::Skip => false,
        }
    }

    fn parse_line(&mut self, line: &str) -> Line {
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            // blank separators, `event:`/`id:` fields and `:` comments
            return Line::Skip;
        };
        let payload = payload.trim();
        if payload.is_empty() {
            return Line::Skip;
        }
        if payload == DONE_MARKER {
            return Line::Done;
        }

        let value: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                self.dropped += 1;
                debug!(error = %e, len = payload.len(), "dropping malformed frame");
                return Line::Skip;
            }
        };

        match decode_payload(value) {
            Some(event) => Line::Event(event),
            None => {
                self.dropped += 1;
                Line::Skip
            }
        }
    }
}

fn decode_payload(value: Value) -> Option<StreamEvent> {
    let kind = value.get("type").and_then(Value::as_str).map(str::to_owned);
    let event = match kind.as_deref() {
        Some("graphrag_metadata") => StreamEvent::GraphragMetadata(decode::<GraphragMetadata>(value)?),
        Some("model_metadata") => StreamEvent::ModelMetadata(decode::<ModelMetadata>(value)?),
        Some("tool_call") => StreamEvent::ToolCall(decode::<ToolCallFrame>(value)?),
        Some("tool_result") => StreamEvent::ToolResult(decode::<ToolResultFrame>(value)?),
        Some("token_usage") => {
            // Counts may sit at the top level or under `usage`.
            let body = if value.get("usage").is_some_and(Value::is_object) {
                value["usage"].clone()
            } else {
                value
            };
            StreamEvent::TokenUsage(decode::<TokenUsage>(body)?)
        }
        Some("research_progress") => StreamEvent::ResearchProgress(decode::<ResearchProgress>(value)?),
        Some("doc_summary") => StreamEvent::DocSummary(decode::<DocSummary>(value)?),
        Some(other) => {
            debug!(frame_type = other, "ignoring unknown frame type");
            return None;
        }
        None if value.get("content").is_some() => StreamEvent::ContentDelta(decode::<ContentDelta>(value)?),
        None => {
            debug!("ignoring untyped frame without content");
            return None;
        }
    };
    Some(event)
}

fn decode<T: DeserializeOwned>(value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            debug!(error = %e, "frame payload has unexpected shape");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_core::stream::ResearchStatus;

    fn contents(events: &[StreamEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ContentDelta(d) => Some(d.content.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn content_frames_in_one_chunk() {
        let mut parser = FrameParser::new();
        let batch = parser.push(b"data: {\"content\":\"Hel\"}\n\ndata: {\"content\":\"lo\"}\n\n");
        assert_eq!(contents(&batch.events), "Hello");
        assert!(!batch.done);
    }

    #[test]
    fn record_split_across_chunks() {
        let mut parser = FrameParser::new();
        let first = parser.push(b"data: {\"cont");
        assert!(first.events.is_empty());
        let second = parser.push(b"ent\":\"4\"}\n");
        assert_eq!(contents(&second.events), "4");
    }

    #[test]
    fn utf8_sequence_split_across_chunks() {
        let bytes = "data: {\"content\":\"héllo\"}\n".as_bytes();
        // split inside the two-byte 'é'
        let cut = bytes.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut parser = FrameParser::new();
        let mut events = parser.push(&bytes[..cut]).events;
        events.extend(parser.push(&bytes[cut..]).events);
        assert_eq!(contents(&events), "héllo");
        assert_eq!(parser.dropped(), 0);
    }

    #[test]
    fn long_frame_fed_byte_by_byte() {
        let text = "x".repeat(20_000);
        let frame = format!("data: {{\"content\":\"{text}\"}}\n\ndata: {{\"content\":\"!\"}}\n");
        let mut parser = FrameParser::new();
        let mut events = Vec::new();
        for byte in frame.as_bytes() {
            events.extend(parser.push(std::slice::from_ref(byte)).events);
            // the unterminated tail is never rescanned from the start
            assert_eq!(parser.scanned, parser.buffer.len());
        }
        assert_eq!(contents(&events), format!("{text}!"));
        assert!(parser.buffer.is_empty());
    }

    #[test]
    fn many_lines_in_one_chunk_keep_the_tail() {
        let mut chunk = "data: {\"content\":\"a\"}\n".repeat(1_000);
        chunk.push_str("data: {\"content\":\"b");
        let mut parser = FrameParser::new();
        let batch = parser.push(chunk.as_bytes());
        assert_eq!(contents(&batch.events), "a".repeat(1_000));
        assert_eq!(parser.buffer, b"data: {\"content\":\"b");
        let rest = parser.push(b"c\"}\n");
        assert_eq!(contents(&rest.events), "bc");
    }

    #[test]
    fn corrupted_frame_between_valid_frames_is_dropped() {
        let mut parser = FrameParser::new();
        let batch = parser.push(
            b"data: {\"content\":\"Hello \"}\n\ndata: {\"content\": oops\n\ndata: {\"content\":\"world\"}\n\n",
        );
        assert_eq!(contents(&batch.events), "Hello world");
        assert_eq!(parser.dropped(), 1);
    }

    #[test]
    fn done_ends_parsing_and_discards_partial_frame() {
        let mut parser = FrameParser::new();
        let batch = parser.push(b"data: {\"content\":\"a\"}\ndata: [DONE]\ndata: {\"content\":\"late\"}\ndata: {\"con");
        assert_eq!(contents(&batch.events), "a");
        assert!(batch.done);
        assert!(matches!(batch.events.last(), Some(StreamEvent::Done)));

        let after = parser.push(b"tent\":\"ignored\"}\n");
        assert!(after.events.is_empty());
        assert!(after.done);
        assert!(parser.finish().events.is_empty());
    }

    #[test]
    fn crlf_and_non_data_lines_are_ignored() {
        let mut parser = FrameParser::new();
        let batch = parser.push(b": keepalive\r\nevent: message\r\nid: 7\r\ndata: {\"content\":\"x\"}\r\n\r\n");
        assert_eq!(batch.events.len(), 1);
        assert_eq!(contents(&batch.events), "x");
    }

    #[test]
    fn finish_drains_unterminated_line() {
        let mut parser = FrameParser::new();
        assert!(parser.push(b"data: {\"content\":\"tail\"}").events.is_empty());
        let batch = parser.finish();
        assert_eq!(contents(&batch.events), "tail");
        assert!(!batch.done);
    }

    #[test]
    fn typed_frames_dispatch() {
        let mut parser = FrameParser::new();
        let input = concat!(
            "data: {\"type\":\"model_metadata\",\"modelId\":\"gpt-4o\",\"provider\":\"openai\"}\n",
            "data: {\"type\":\"token_usage\",\"usage\":{\"input_tokens\":12,\"output_tokens\":3}}\n",
            "data: {\"type\":\"graphrag_metadata\",\"graphragTokens\":40}\n",
            "data: {\"type\":\"research_progress\",\"status\":\"started\",\"jobId\":\"job_9\"}\n",
            "data: {\"type\":\"tool_call\",\"name\":\"web_search\",\"arguments\":{\"q\":\"x\"}}\n",
            "data: {\"type\":\"tool_result\",\"name\":\"web_search\",\"result\":\"ok\"}\n",
            "data: {\"type\":\"doc_summary\",\"documentId\":\"d1\",\"summary\":\"short\"}\n",
            "data: {\"type\":\"heartbeat\"}\n",
        );
        let events = parser.push(input.as_bytes()).events;
        let kinds: Vec<_> = events.iter().map(StreamEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![
                "model_metadata",
                "token_usage",
                "graphrag_metadata",
                "research_progress",
                "tool_call",
                "tool_result",
                "doc_summary",
            ]
        );
        assert_eq!(
            events[1],
            StreamEvent::TokenUsage(TokenUsage { input_tokens: 12, output_tokens: 3 })
        );
        match &events[3] {
            StreamEvent::ResearchProgress(p) => {
                assert_eq!(p.status, ResearchStatus::Started);
                assert_eq!(p.job_id.as_deref(), Some("job_9"));
            }
            other => panic!("expected research progress, got {other:?}"),
        }
    }

    #[test]
    fn flat_token_usage() {
        let mut parser = FrameParser::new();
        let events = parser
            .push(b"data: {\"type\":\"token_usage\",\"inputTokens\":5,\"outputTokens\":2}\n")
            .events;
        assert_eq!(
            events,
            vec![StreamEvent::TokenUsage(TokenUsage { input_tokens: 5, output_tokens: 2 })]
        );
    }

    #[test]
    fn content_delta_carries_citations() {
        let mut parser = FrameParser::new();
        let events = parser
            .push(b"data: {\"content\":\"see\",\"citations\":[{\"url\":\"https://a\"}]}\n")
            .events;
        match &events[0] {
            StreamEvent::ContentDelta(d) => assert_eq!(d.citations.len(), 1),
            other => panic!("expected content delta, got {other:?}"),
        }
    }
}
