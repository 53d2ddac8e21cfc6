//! Incremental decoder for `text/event-stream` bodies carrying one JSON
//! envelope per event.

use crate::transport::TransportError;

/// Splits a byte stream into event payloads. `:` lines are comments,
/// `data:` lines are joined, and a blank line ends the event.
#[derive(Debug)]
pub struct SseDecoder {
    line:     Vec<u8>,
    data:     Vec<u8>,
    max_size: usize,
    failed:   bool,
}

impl SseDecoder {
    pub fn new(max_size: usize) -> Self {
        Self {
            line: Vec::new(),
            data: Vec::new(),
            max_size,
            failed: false,
        }
    }

    /// Feeds the next chunk and returns the events it completed. After a
    /// `MessageTooLarge` error the decoder yields nothing more.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<Vec<u8>, TransportError>> {
        let mut events = Vec::new();
        for &byte in chunk {
            if self.failed {
                break;
            }
            if byte != b'\n' {
                self.line.push(byte);
                if self.line.len() > self.max_size {
                    self.fail(&mut events);
                }
                continue;
            }
            match self.finish_line() {
                Ok(Some(event)) => events.push(Ok(event)),
                Ok(None) => {}
                Err(_) => self.fail(&mut events),
            }
        }
        events
    }

    fn fail(&mut self, events: &mut Vec<Result<Vec<u8>, TransportError>>) {
        self.failed = true;
        self.line.clear();
        self.data.clear();
        events.push(Err(TransportError::MessageTooLarge(self.max_size)));
    }

    fn finish_line(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut line = std::mem::take(&mut self.line);
        if line.last() == Some(&b'\r') {
            line.pop();
        }

        if line.is_empty() {
            if self.data.is_empty() {
                return Ok(None);
            }
            return Ok(Some(std::mem::take(&mut self.data)));
        }
        if line[0] == b':' {
            return Ok(None);
        }

        if let Some(chunk) = line.strip_prefix(b"data:") {
            let chunk = trim(chunk);
            if self.data.len() + chunk.len() > self.max_size {
                return Err(TransportError::MessageTooLarge(self.max_size));
            }
            self.data.extend_from_slice(chunk);
        }
        Ok(None)
    }
}

fn trim(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &bytes[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payloads(events: Vec<Result<Vec<u8>, TransportError>>) -> Vec<String> {
        events
            .into_iter()
            .map(|e| String::from_utf8(e.unwrap()).unwrap())
            .collect()
    }

    #[test]
    fn test_events_across_chunks() {
        let mut decoder = SseDecoder::new(1024);
        assert!(decoder.feed(b": ping\n\ndata: {\"ok\":").is_empty());
        let events = payloads(decoder.feed(b"true,\"output\":1}\r\n\r\ndata: {\"ok\":true,\n"));
        assert_eq!(events, vec![r#"{"ok":true,"output":1}"#]);

        let events = payloads(decoder.feed(b"data: \"output\":2}\nevent: ignored\n\n"));
        assert_eq!(events, vec![r#"{"ok":true,"output":2}"#]);
    }

    #[test]
    fn test_message_size_limit() {
        let mut decoder = SseDecoder::new(8);
        let events = decoder.feed(b"data: 12345\ndata: 6789\n\n");
        assert!(matches!(events.as_slice(), [Err(TransportError::MessageTooLarge(8))]));
        assert!(decoder.feed(b"data: 1\n\n").is_empty());

        let mut decoder = SseDecoder::new(8);
        let events = decoder.feed(b"data: 123456789012");
        assert!(matches!(events.as_slice(), [Err(TransportError::MessageTooLarge(8))]));
    }
}
