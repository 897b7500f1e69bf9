//! Stream-JSON tool events and the writer plumbing around agent stdout.
//!
//! The agent emits one JSON object per stdout line. [`ObservingWriter`]
//! decorates any byte sink with a line buffer that surfaces
//! `tool_call` started/ended lines as [`ToolEvent`]s while forwarding
//! the raw bytes unchanged. [`MultiWriter`] and [`SharedBuffer`] give
//! the executor its capture-plus-live-tee split over a single writer,
//! so both sides see identical byte sequences.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::Value;

/// One tool lifecycle moment parsed from the agent's stream-JSON.
///
/// Arguments of any JSON type are coerced to strings at this boundary;
/// `ended` events additionally carry a `duration_ms` attribute. Pairing
/// of started/ended is best-effort by name; nothing blocks on a missing
/// partner.
#[derive(Debug, Clone)]
pub struct ToolEvent {
    pub name: String,
    pub started: bool,
    pub timestamp: Instant,
    pub attributes: HashMap<String, String>,
}

fn coerce_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse one stream-JSON line into a [`ToolEvent`].
///
/// Only `{"type":"tool_call","subtype":"started"|"ended"}` objects with
/// a non-empty `name` qualify. Anything else, including invalid JSON,
/// returns `None`.
pub fn parse_tool_event(line: &str) -> Option<ToolEvent> {
    let value: Value = serde_json::from_str(line.trim()).ok()?;
    if value.get("type").and_then(Value::as_str) != Some("tool_call") {
        return None;
    }
    let started = match value.get("subtype").and_then(Value::as_str) {
        Some("started") => true,
        Some("ended") => false,
        _ => return None,
    };
    let name = value.get("name").and_then(Value::as_str)?;
    if name.is_empty() {
        return None;
    }

    let mut attributes = HashMap::new();
    if let Some(args) = value.get("arguments").and_then(Value::as_object) {
        for (key, val) in args {
            attributes.insert(key.clone(), coerce_to_string(val));
        }
    }
    if !started {
        if let Some(ms) = value.get("duration_ms").and_then(Value::as_u64) {
            attributes.insert("duration_ms".to_string(), ms.to_string());
        }
    }

    Some(ToolEvent {
        name: name.to_string(),
        started,
        timestamp: Instant::now(),
        attributes,
    })
}

/// Writer decorator that emits [`ToolEvent`]s for complete lines.
///
/// Bytes pass through to the inner writer untouched. Partial trailing
/// bytes stay buffered until a newline arrives, so the event sequence
/// is identical across any chunking of the same input. Callers that
/// have no observer skip the decorator entirely and use the inner
/// writer as-is.
pub struct ObservingWriter<W: Write> {
    inner: W,
    buf: Vec<u8>,
    on_event: Box<dyn FnMut(ToolEvent) + Send>,
}

impl<W: Write> ObservingWriter<W> {
    pub fn new(inner: W, on_event: Box<dyn FnMut(ToolEvent) + Send>) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            on_event,
        }
    }

    fn drain_complete_lines(&mut self) {
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Ok(text) = std::str::from_utf8(&line) {
                if let Some(event) = parse_tool_event(text) {
                    (self.on_event)(event);
                }
            }
        }
    }
}

impl<W: Write> Write for ObservingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write_all(buf)?;
        self.buf.extend_from_slice(buf);
        self.drain_complete_lines();
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Fan a single byte stream out to several writers.
///
/// Every write goes to every writer in order; a short write in one sink
/// is promoted to `write_all` so all sinks observe the same bytes.
pub struct MultiWriter {
    writers: Vec<Box<dyn Write + Send>>,
}

impl MultiWriter {
    pub fn new(writers: Vec<Box<dyn Write + Send>>) -> Self {
        Self { writers }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        for w in &mut self.writers {
            w.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        for w in &mut self.writers {
            w.flush()?;
        }
        Ok(())
    }
}

/// A clonable in-memory capture buffer.
///
/// The executor hands one clone to the reader task and keeps another to
/// read the captured bytes back after the process exits.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn into_string(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_events(input: &[&[u8]]) -> (Vec<(String, bool)>, Vec<u8>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let mut inner = Vec::new();
        {
            let mut writer = ObservingWriter::new(
                &mut inner,
                Box::new(move |e: ToolEvent| {
                    sink.lock().unwrap().push((e.name, e.started));
                }),
            );
            for chunk in input {
                writer.write_all(chunk).unwrap();
            }
        }
        let collected = events.lock().unwrap().clone();
        (collected, inner)
    }

    #[test]
    fn parses_started_and_ended_events() {
        let started = parse_tool_event(
            r#"{"type":"tool_call","subtype":"started","name":"bash","arguments":{"command":"ls","timeout":30}}"#,
        )
        .unwrap();
        assert_eq!(started.name, "bash");
        assert!(started.started);
        assert_eq!(started.attributes["command"], "ls");
        assert_eq!(started.attributes["timeout"], "30");

        let ended = parse_tool_event(
            r#"{"type":"tool_call","subtype":"ended","name":"bash","duration_ms":125}"#,
        )
        .unwrap();
        assert!(!ended.started);
        assert_eq!(ended.attributes["duration_ms"], "125");
    }

    #[test]
    fn rejects_everything_else() {
        for line in [
            r#"{"type":"system","subtype":"init"}"#,
            r#"{"type":"tool_call","subtype":"started","name":""}"#,
            r#"{"type":"tool_call","subtype":"started"}"#,
            r#"{"type":"tool_call","subtype":"progress","name":"bash"}"#,
            r#"{"type":"result","chatId":"c1"}"#,
            "not json at all",
            "",
        ] {
            assert!(parse_tool_event(line).is_none(), "accepted: {line}");
        }
    }

    #[test]
    fn events_fire_only_on_complete_lines() {
        let line = br#"{"type":"tool_call","subtype":"started","name":"read"}"#;
        let (events, _) = collect_events(&[line]);
        assert!(events.is_empty(), "no newline yet, no event");

        let mut with_newline = line.to_vec();
        with_newline.push(b'\n');
        let (events, _) = collect_events(&[&with_newline]);
        assert_eq!(events, vec![("read".to_string(), true)]);
    }

    #[test]
    fn chunking_does_not_change_event_sequence() {
        let input = concat!(
            r#"{"type":"tool_call","subtype":"started","name":"edit"}"#,
            "\n",
            r#"{"type":"system","noise":true}"#,
            "\n",
            r#"{"type":"tool_call","subtype":"ended","name":"edit","duration_ms":10}"#,
            "\n",
        )
        .as_bytes()
        .to_vec();

        let (whole, bytes_whole) = collect_events(&[&input]);

        // One byte at a time.
        let chunks: Vec<&[u8]> = input.chunks(1).collect();
        let (byte_by_byte, bytes_split) = collect_events(&chunks);

        // Awkward split in the middle of a JSON object.
        let (left, right) = input.split_at(17);
        let (split, _) = collect_events(&[left, right]);

        let expected = vec![("edit".to_string(), true), ("edit".to_string(), false)];
        assert_eq!(whole, expected);
        assert_eq!(byte_by_byte, expected);
        assert_eq!(split, expected);
        assert_eq!(bytes_whole, input);
        assert_eq!(bytes_split, input);
    }

    #[test]
    fn inner_writer_sees_bytes_verbatim() {
        let input = b"partial line without newline";
        let (_, inner) = collect_events(&[input]);
        assert_eq!(inner, input);
    }

    #[test]
    fn multi_writer_duplicates_bytes() {
        let a = SharedBuffer::new();
        let b = SharedBuffer::new();
        let mut multi =
            MultiWriter::new(vec![Box::new(a.clone()), Box::new(b.clone())]);
        multi.write_all(b"hello ").unwrap();
        multi.write_all(b"world").unwrap();
        multi.flush().unwrap();
        assert_eq!(a.contents(), b"hello world");
        assert_eq!(a.contents(), b.contents());
    }
}
