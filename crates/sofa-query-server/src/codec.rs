//! Line-delimited JSON framing between the host and the worker.
//!
//! Each input line carries one message and each response is one encoded
//! value followed by `\n`. Queued function log lines are written ahead of
//! every response so the host sees them before the answer they belong to.

use std::io::{BufRead, Write};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::QueryServerError;
use crate::protocol::LogSink;

const CODEC_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::codec");

/// Bidirectional message channel used by the dispatcher and by list
/// functions that pull rows mid-response.
pub trait Channel {
    /// Blocks for the next message; `None` once the host closes its stream.
    fn receive(&mut self) -> Option<Result<Value, QueryServerError>>;

    /// Writes one response line. `None` writes nothing but still flushes
    /// queued log lines.
    ///
    /// # Errors
    ///
    /// Returns [`QueryServerError::Encode`] when the stream rejects the write.
    fn respond(&mut self, value: Option<&Value>) -> Result<(), QueryServerError>;
}

/// Lazily decodes one JSON value per input line.
pub struct MessageReader<R> {
    input: R,
    line: String,
}

impl<R: BufRead> MessageReader<R> {
    /// Wraps a buffered input stream.
    #[must_use]
    pub fn new(input: R) -> Self {
        Self {
            input,
            line: String::new(),
        }
    }
}

impl<R: BufRead> Iterator for MessageReader<R> {
    type Item = Result<Value, QueryServerError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.line.clear();
        match self.input.read_line(&mut self.line) {
            Ok(0) => None,
            Ok(_) => {
                debug!(target: CODEC_TARGET, line = %self.line.trim_end(), "received message");
                Some(serde_json::from_str(&self.line).map_err(|error| {
                    warn!(target: CODEC_TARGET, line = %self.line.trim_end(), %error, "malformed message");
                    QueryServerError::decode(self.line.as_str(), error.to_string())
                }))
            }
            Err(error) => Some(Err(QueryServerError::decode(
                self.line.as_str(),
                error.to_string(),
            ))),
        }
    }
}

/// Serialises responses as JSON lines.
pub struct ResponseWriter<W> {
    output: W,
    log: LogSink,
}

impl<W: Write> ResponseWriter<W> {
    /// Wraps an output stream, draining `log` before each response.
    #[must_use]
    pub fn new(output: W, log: LogSink) -> Self {
        Self { output, log }
    }

    /// Flushes queued log lines, then writes `value` when present.
    ///
    /// # Errors
    ///
    /// Returns [`QueryServerError::Encode`] when writing fails.
    pub fn respond(&mut self, value: Option<&Value>) -> Result<(), QueryServerError> {
        for line in self.log.drain() {
            self.write_line(&line)?;
        }
        match value {
            Some(value) => self.write_line(value),
            None => {
                debug!(target: CODEC_TARGET, "nothing to respond");
                self.flush()
            }
        }
    }

    fn write_line(&mut self, value: &Value) -> Result<(), QueryServerError> {
        serde_json::to_writer(&mut self.output, value)
            .map_err(|error| QueryServerError::encode(error.to_string()))?;
        self.output
            .write_all(b"\n")
            .map_err(|error| QueryServerError::encode(error.to_string()))?;
        debug!(target: CODEC_TARGET, %value, "sent response");
        self.flush()
    }

    fn flush(&mut self) -> Result<(), QueryServerError> {
        self.output
            .flush()
            .map_err(|error| QueryServerError::encode(error.to_string()))
    }

    /// Returns the wrapped stream.
    #[must_use]
    pub fn into_inner(self) -> W {
        self.output
    }
}

/// [`Channel`] over a buffered reader and a writer.
pub struct JsonLines<R, W> {
    reader: MessageReader<R>,
    writer: ResponseWriter<W>,
}

impl<R: BufRead, W: Write> JsonLines<R, W> {
    /// Joins an input and an output stream into one channel.
    #[must_use]
    pub fn new(input: R, output: W, log: LogSink) -> Self {
        Self {
            reader: MessageReader::new(input),
            writer: ResponseWriter::new(output, log),
        }
    }

    /// Returns the output stream, consuming the channel.
    #[must_use]
    pub fn into_output(self) -> W {
        self.writer.into_inner()
    }
}

impl<R: BufRead, W: Write> Channel for JsonLines<R, W> {
    fn receive(&mut self) -> Option<Result<Value, QueryServerError>> {
        self.reader.next()
    }

    fn respond(&mut self, value: Option<&Value>) -> Result<(), QueryServerError> {
        self.writer.respond(value)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor};

    use serde_json::json;

    use super::*;
    use crate::protocol::ResponseStyle;

    fn written(writer: ResponseWriter<Vec<u8>>) -> String {
        String::from_utf8(writer.into_inner()).expect("utf-8 output")
    }

    #[test]
    fn reads_one_value_per_line_until_eof() {
        let reader = MessageReader::new(Cursor::new("[\"reset\"]\n[\"add_fun\", \"f\"]\n"));
        let messages: Vec<_> = reader.collect::<Result<_, _>>().expect("valid lines");
        assert_eq!(messages, vec![json!(["reset"]), json!(["add_fun", "f"])]);
    }

    #[test]
    fn malformed_line_is_a_decode_fault_with_the_raw_line() {
        let mut reader = MessageReader::new(Cursor::new("[\"reset\"\n"));
        let error = reader
            .next()
            .expect("one item")
            .expect_err("line should not decode");
        match error {
            QueryServerError::Decode { line, detail } => {
                assert_eq!(line, "[\"reset\"\n");
                assert!(!detail.is_empty());
            }
            other => panic!("expected decode fault, got {other:?}"),
        }
    }

    #[test]
    fn writes_line_terminated_values() {
        let mut writer = ResponseWriter::new(Vec::new(), LogSink::new(ResponseStyle::Tagged));
        writer.respond(Some(&json!(true))).expect("write");
        writer.respond(Some(&json!([[["foo", "bar"]]]))).expect("write");
        assert_eq!(written(writer), "true\n[[[\"foo\",\"bar\"]]]\n");
    }

    #[test]
    fn none_writes_nothing() {
        let mut writer = ResponseWriter::new(Vec::new(), LogSink::new(ResponseStyle::Tagged));
        writer.respond(None).expect("no-op");
        assert_eq!(written(writer), "");
    }

    #[test]
    fn queued_log_lines_precede_the_response() {
        let log = LogSink::new(ResponseStyle::Legacy);
        let mut writer = ResponseWriter::new(Vec::new(), log.clone());
        log.log(&json!("mapping"));
        writer.respond(Some(&json!(1))).expect("write");
        assert_eq!(written(writer), "{\"log\":\"mapping\"}\n1\n");
    }

    #[test]
    fn round_trips_through_the_channel() {
        let value = json!({"nested": [1, 2.5, null, "x"], "flag": false});
        let input = format!("{value}\n");
        let mut channel = JsonLines::new(
            Cursor::new(input),
            Vec::new(),
            LogSink::new(ResponseStyle::Tagged),
        );
        let decoded = channel.receive().expect("one message").expect("valid");
        channel.respond(Some(&decoded)).expect("write");
        assert!(channel.receive().is_none());
        let output = String::from_utf8(channel.into_output()).expect("utf-8");
        let reparsed: Value = serde_json::from_str(output.trim_end()).expect("json");
        assert_eq!(reparsed, value);
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_failure_is_an_encode_fault() {
        let mut writer = ResponseWriter::new(BrokenPipe, LogSink::new(ResponseStyle::Tagged));
        let error = writer.respond(Some(&json!(true))).expect_err("write should fail");
        assert_eq!(error.error_id(), "json_encode");
    }
}
