//! Incremental decoder for `text/event-stream` bodies.

/// Buffers raw bytes across network reads and yields the `data` payload of
/// each complete event.
///
/// Only `data` fields are interpreted; comments and other fields are
/// ignored. Multiple `data` lines in one event are joined with `\n`.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` and returns every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some((end, delim_len)) = find_event_end(&self.buf) {
            let block: Vec<u8> = self.buf.drain(..end + delim_len).take(end).collect();
            if let Some(data) = parse_block(&String::from_utf8_lossy(&block)) {
                events.push(data);
            }
        }
        events
    }

    /// Bytes received but not yet part of a complete event.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn find_event_end(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_block(block: &str) -> Option<String> {
    let mut data: Option<String> = None;
    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        let Some(rest) = line.strip_prefix("data:") else {
            continue;
        };
        let value = rest.strip_prefix(' ').unwrap_or(rest);
        match &mut data {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(value);
            }
            None => data = Some(value.to_string()),
        }
    }
    data
}
