//! Server-sent-events decoding for per-job result streams.
//!
//! - `data:` lines accumulate (joined with `\n`), with or without a space after the colon
//! - `event:` and `id:` lines are captured
//! - lines starting with `:` are keepalive comments
//! - an empty line terminates the event

use std::io::BufRead;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub event_type: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Line-fed event accumulator.
#[derive(Debug, Default)]
pub struct EventStreamParser {
    current_event_type: Option<String>,
    current_data: Vec<String>,
    current_id: Option<String>,
}

impl EventStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one line (without or with its trailing newline). Returns the
    /// event completed by this line, if any.
    pub fn feed_line(&mut self, line: &str) -> Option<StreamEvent> {
        let line = line.trim_end_matches('\n').trim_end_matches('\r');
        if line.is_empty() {
            return self.take_event();
        }
        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            self.current_data.push(value.to_string());
        } else if let Some(value) = line.strip_prefix("event:") {
            self.current_event_type = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("id:") {
            self.current_id = Some(value.trim().to_string());
        }
        None
    }

    /// Flushes a trailing event when the stream ends without a blank line.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        self.take_event()
    }

    fn take_event(&mut self) -> Option<StreamEvent> {
        if self.current_data.is_empty() && self.current_event_type.is_none() {
            self.current_id = None;
            return None;
        }
        let event = StreamEvent {
            event_type: self.current_event_type.take(),
            data: self.current_data.join("\n"),
            id: self.current_id.take(),
        };
        self.current_data.clear();
        Some(event)
    }
}

/// Iterator of events read from a blocking stream body.
pub struct EventStreamReader<R> {
    reader: R,
    parser: EventStreamParser,
    line: Vec<u8>,
    finished: bool,
}

impl<R: BufRead> EventStreamReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            parser: EventStreamParser::new(),
            line: Vec::new(),
            finished: false,
        }
    }
}

impl<R: BufRead> Iterator for EventStreamReader<R> {
    type Item = std::io::Result<StreamEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            self.line.clear();
            // Invalid UTF-8 is replaced rather than failing the whole stream.
            match self.reader.read_until(b'\n', &mut self.line) {
                Ok(0) => {
                    self.finished = true;
                    return self.parser.finish().map(Ok);
                }
                Ok(_) => {
                    let line = String::from_utf8_lossy(&self.line);
                    if let Some(event) = self.parser.feed_line(&line) {
                        return Some(Ok(event));
                    }
                }
                Err(error) => {
                    self.finished = true;
                    return Some(Err(error));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufReader, Cursor, Read};

    use super::{EventStreamParser, EventStreamReader};

    fn collect_data(input: &str) -> Vec<String> {
        EventStreamReader::new(Cursor::new(input.as_bytes().to_vec()))
            .map(|event| event.expect("cursor reads never fail").data)
            .collect()
    }

    #[test]
    fn test_parses_consecutive_data_events() {
        assert_eq!(
            collect_data("data: {\"1\":{}}\n\ndata:{\"2\":{}}\n\n"),
            vec!["{\"1\":{}}".to_string(), "{\"2\":{}}".to_string()]
        );
    }

    #[test]
    fn test_joins_multiline_data_and_captures_fields() {
        let mut parser = EventStreamParser::new();
        assert_eq!(parser.feed_line("id: 4\n"), None);
        assert_eq!(parser.feed_line("event: title\n"), None);
        assert_eq!(parser.feed_line("data: a\n"), None);
        assert_eq!(parser.feed_line("data: b\r\n"), None);
        let event = parser.feed_line("\r\n").expect("blank line ends event");
        assert_eq!(event.data, "a\nb");
        assert_eq!(event.event_type.as_deref(), Some("title"));
        assert_eq!(event.id.as_deref(), Some("4"));
    }

    #[test]
    fn test_ignores_keepalive_comments_and_stray_blank_lines() {
        assert_eq!(
            collect_data(": keep-alive\n\n\n: again\ndata: x\n\n"),
            vec!["x".to_string()]
        );
    }

    #[test]
    fn test_invalid_utf8_line_is_decoded_lossily() {
        let mut body = b"data: {\"9\":\"".to_vec();
        body.extend_from_slice(b"\xff\xfe");
        body.extend_from_slice(b"\"}\n\ndata: next\n\n");
        let data: Vec<String> = EventStreamReader::new(Cursor::new(body))
            .map(|event| event.expect("invalid bytes should not fail the stream").data)
            .collect();
        assert_eq!(
            data,
            vec!["{\"9\":\"\u{FFFD}\u{FFFD}\"}".to_string(), "next".to_string()]
        );
    }

    #[test]
    fn test_flushes_unterminated_trailing_event() {
        assert_eq!(collect_data("data: tail"), vec!["tail".to_string()]);
    }

    struct FailingReader {
        served: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.served {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset",
                ));
            }
            self.served = true;
            let chunk = b"data: first\n\n";
            buf[..chunk.len()].copy_from_slice(chunk);
            Ok(chunk.len())
        }
    }

    #[test]
    fn test_read_error_is_reported_once_then_stream_ends() {
        let mut reader = EventStreamReader::new(BufReader::new(FailingReader { served: false }));
        assert_eq!(
            reader.next().expect("event").expect("first event ok").data,
            "first"
        );
        assert!(reader.next().expect("error item").is_err());
        assert!(reader.next().is_none());
    }
}
