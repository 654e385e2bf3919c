//! Frame decoder for the research event stream
//!
//! Chunks arrive with arbitrary split points. The codec keeps one growable
//! buffer across calls, cuts it on the blank-line delimiter, and hands back
//! every complete frame that decoded cleanly. Whatever follows the last
//! delimiter stays buffered until the next chunk.

use super::{DecodeError, Event};

/// Prefix every data frame starts with
pub const DATA_PREFIX: &str = "data: ";

/// Blank line between frames
const DELIMITER: &[u8] = b"\n\n";

/// Incremental decoder, one per stream session.
#[derive(Debug, Default)]
pub struct EventCodec {
    // Bytes, not text: a chunk may end in the middle of a UTF-8 sequence.
    buffer: Vec<u8>,
    /// No delimiter starts before this offset of `buffer`
    scanned: usize,
}

impl EventCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return the events completed by it, in arrival order.
    ///
    /// A frame that fails to decode is logged and skipped; the codec keeps
    /// going with the next one.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Event> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;
        while let Some(offset) = find_delimiter(&self.buffer[self.scanned..]) {
            let end = self.scanned + offset;
            match decode_frame(&self.buffer[start..end]) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed stream frame");
                }
            }
            start = end + DELIMITER.len();
            self.scanned = start;
        }

        self.buffer.drain(..start);
        // The last byte may still open a delimiter completed by the next chunk.
        self.scanned = self.buffer.len().saturating_sub(DELIMITER.len() - 1);
        events
    }

    /// Bytes held back waiting for a delimiter
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any incomplete trailing frame, returning how many bytes were discarded
    pub fn discard_pending(&mut self) -> usize {
        let len = self.buffer.len();
        self.buffer.clear();
        self.scanned = 0;
        len
    }
}

fn find_delimiter(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(DELIMITER.len())
        .position(|window| window == DELIMITER)
}

/// Decode one frame block (delimiter excluded).
///
/// Blocks without the data prefix (comments, keep-alives) yield `Ok(None)`.
pub fn decode_frame(block: &[u8]) -> Result<Option<Event>, DecodeError> {
    let text = std::str::from_utf8(block)?;
    let Some(json) = text.strip_prefix(DATA_PREFIX) else {
        if !text.trim().is_empty() {
            tracing::debug!("Ignoring non-data frame: {}", text);
        }
        return Ok(None);
    };
    Event::from_json(json).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{AgentKind, FinalReport};

    const AGENT_START: &str = "data: {\"event\":\"agent_start\",\"data\":{\"task_id\":1,\"agent\":\"ResearcherAgent\",\"prompt\":\"p\"}}\n\n";

    #[test]
    fn test_single_frame() {
        let mut codec = EventCodec::new();
        let events = codec.feed(AGENT_START.as_bytes());

        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::AgentStart(start) => assert_eq!(start.agent, AgentKind::ResearcherAgent),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(codec.pending_len(), 0);
    }

    #[test]
    fn test_split_at_every_offset_yields_same_event() {
        let mut whole = EventCodec::new();
        let expected = whole.feed(AGENT_START.as_bytes());

        let bytes = AGENT_START.as_bytes();
        for split in 1..bytes.len() {
            let mut codec = EventCodec::new();
            let mut events = codec.feed(&bytes[..split]);
            events.extend(codec.feed(&bytes[split..]));
            assert_eq!(events, expected, "split at byte {}", split);
        }
    }

    #[test]
    fn test_delimiter_split_across_chunks() {
        let frame = AGENT_START.trim_end_matches('\n');
        let mut codec = EventCodec::new();

        assert!(codec.feed(format!("{}\n", frame).as_bytes()).is_empty());
        let events = codec.feed(b"\n");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let frame = "data: {\"event\":\"code_executing\",\"data\":{\"code\":\"print('héllo')\"}}\n\n";
        let bytes = frame.as_bytes();
        let cut = frame.find('é').unwrap() + 1;

        let mut codec = EventCodec::new();
        assert!(codec.feed(&bytes[..cut]).is_empty());
        let events = codec.feed(&bytes[cut..]);
        assert_eq!(
            events,
            vec![Event::CodeExecuting {
                code: "print('héllo')".to_string()
            }]
        );
    }

    #[test]
    fn test_malformed_frame_is_skipped() {
        let mut codec = EventCodec::new();
        let input = format!(
            "data: {{not json}}\n\n{}data: {{\"event\":\"complete\",\"data\":{{\"report\":\"R\",\"image_urls\":[]}}}}\n\n",
            AGENT_START
        );
        let events = codec.feed(input.as_bytes());

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Event::AgentStart(_)));
        assert_eq!(
            events[1],
            Event::Complete(FinalReport {
                report: "R".to_string(),
                image_urls: vec![],
            })
        );
    }

    #[test]
    fn test_many_frames_in_one_chunk_keep_order() {
        let mut codec = EventCodec::new();
        let input = concat!(
            "data: {\"event\":\"queries_generated\",\"data\":{\"queries\":[\"a\"]}}\n\n",
            "data: {\"event\":\"urls_found\",\"data\":{\"urls\":[\"u\"]}}\n\n",
            "data: {\"event\":\"code_executing\",\"data\":{\"code\":\"x\"}}\n\n",
        );
        let names: Vec<String> = codec
            .feed(input.as_bytes())
            .iter()
            .map(|e| e.name().to_string())
            .collect();
        assert_eq!(names, vec!["queries_generated", "urls_found", "code_executing"]);
    }

    #[test]
    fn test_non_data_frames_are_ignored() {
        let mut codec = EventCodec::new();
        let input = format!(": keep-alive\n\n{}", AGENT_START);
        assert_eq!(codec.feed(input.as_bytes()).len(), 1);
    }

    #[test]
    fn test_trailing_partial_frame_stays_buffered() {
        let mut codec = EventCodec::new();
        let events = codec.feed(b"data: {\"event\":\"log\"");
        assert!(events.is_empty());
        assert!(codec.pending_len() > 0);
        assert_eq!(codec.discard_pending(), 20);
        assert_eq!(codec.pending_len(), 0);
    }

    #[test]
    fn test_large_frame_fed_bytewise_is_scanned_once() {
        let code = "x".repeat(64 * 1024);
        let frame = format!(
            "data: {{\"event\":\"code_executing\",\"data\":{{\"code\":\"{}\"}}}}\n\n",
            code
        );
        let bytes = frame.as_bytes();
        let mut codec = EventCodec::new();

        let mut events = Vec::new();
        for (i, byte) in bytes.iter().enumerate() {
            events.extend(codec.feed(std::slice::from_ref(byte)));
            if i + 1 < bytes.len() {
                assert_eq!(codec.scanned, i);
            }
        }

        assert_eq!(events, vec![Event::CodeExecuting { code }]);
        assert_eq!(codec.pending_len(), 0);
        assert_eq!(codec.scanned, 0);
    }
}
