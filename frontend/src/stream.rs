//! Decoding of the chat response body into [`StreamEvent`]s.

use crate::models::StreamEvent;

const FRAME_MARKER: &str = "data: ";
const FRAME_DELIMITER: &[u8] = b"\n\n";

/// Splits a byte stream into `data: <json>\n\n` frames.
///
/// A single network read may carry half a frame, several frames, or split a
/// multi-byte character; undecoded bytes are kept until the frame is
/// complete. Frames that fail to decode are logged and skipped.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` and returns the events of every frame they complete,
    /// in arrival order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        self.buf.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(end) = self.buf.windows(FRAME_DELIMITER.len()).position(|w| w == FRAME_DELIMITER) {
            let frame: Vec<u8> = self.buf.drain(..end + FRAME_DELIMITER.len()).take(end).collect();
            match decode_frame(&frame) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(reason) => log::warn!("Skipping malformed stream frame: {reason}"),
            }
        }
        events
    }

    /// Discards any trailing partial frame, returning whether there was one.
    pub fn finish(&mut self) -> bool {
        let had_partial = self.buf.iter().any(|b| !b.is_ascii_whitespace());
        if had_partial {
            log::warn!("Stream ended with {} undecoded bytes", self.buf.len());
        }
        self.buf.clear();
        had_partial
    }
}

fn decode_frame(frame: &[u8]) -> Result<Option<StreamEvent>, String> {
    let text = std::str::from_utf8(frame).map_err(|e| format!("invalid UTF-8: {e}"))?;
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let json = text
        .strip_prefix(FRAME_MARKER)
        .or_else(|| text.strip_prefix("data:"))
        .ok_or_else(|| format!("missing frame marker in {text:?}"))?;
    serde_json::from_str(json)
        .map(Some)
        .map_err(|e| format!("{e}: {json}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[test]
    fn decodes_frames_split_across_reads() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"data: {\"type\":\"con").is_empty());
        assert!(decoder.push(b"tent\",\"content\":\"Hel\"}\n").is_empty());
        let events = decoder.push(b"\ndata: {\"type\":\"content\",\"content\":\"lo\"}\n\n");
        assert_eq!(
            events,
            vec![
                StreamEvent::Content { content: "Hel".into() },
                StreamEvent::Content { content: "lo".into() },
            ]
        );
        assert!(!decoder.finish());
    }

    #[test]
    fn decodes_merged_frames_in_order() {
        let mut decoder = FrameDecoder::new();
        let body = concat!(
            "data: {\"type\":\"content\",\"content\":\"a\"}\n\n",
            "data: {\"type\":\"content\",\"content\":\"b\"}\n\n",
            "data: {\"type\":\"complete\",\"message\":{\"role\":\"assistant\",\"content\":\"ab\",",
            "\"timestamp\":\"2024-05-01T10:00:00Z\"},\"timestamp\":\"2024-05-01T10:00:00Z\",",
            "\"messageCount\":2}\n\n",
        );
        let events = decoder.push(body.as_bytes());
        assert_eq!(events.len(), 3);
        match &events[2] {
            StreamEvent::Complete { message, message_count, .. } => {
                assert_eq!(message.role, Role::Assistant);
                assert_eq!(message.content, "ab");
                assert_eq!(*message_count, 2);
            }
            other => panic!("expected complete, got {other:?}"),
        }
    }

    #[test]
    fn keeps_multibyte_characters_split_across_reads() {
        let body = "data: {\"type\":\"content\",\"content\":\"caf\u{e9}\"}\n\n".as_bytes();
        let split = body.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(&body[..split]).is_empty());
        assert_eq!(
            decoder.push(&body[split..]),
            vec![StreamEvent::Content { content: "caf\u{e9}".into() }]
        );
    }

    #[test]
    fn malformed_frames_are_skipped() {
        let mut decoder = FrameDecoder::new();
        let body = concat!(
            "data: {not json}\n\n",
            "garbage without marker\n\n",
            "data: {\"type\":\"unknown\"}\n\n",
            "data: {\"type\":\"content\",\"content\":\"still here\"}\n\n",
        );
        assert_eq!(
            decoder.push(body.as_bytes()),
            vec![StreamEvent::Content { content: "still here".into() }]
        );
    }

    #[test]
    fn finish_reports_a_truncated_frame() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"data: {\"type\":\"content\"").is_empty());
        assert!(decoder.finish());
        assert!(!decoder.finish());
    }
}
