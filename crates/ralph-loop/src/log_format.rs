//! Terse progress lines out of the agent's stream-JSON firehose.
//!
//! [`StreamFormatter`] is a `Write` sink meant to sit on the live side
//! of the executor's tee. It classifies each complete JSON line into a
//! one-line action summary, counts actions per category, and suppresses
//! the noisy ones (reads, greps) entirely. Search results are never
//! echoed; only tool arguments are ever inspected. Verbose mode skips
//! classification and forwards raw bytes unchanged.

use std::io::Write;

use serde_json::Value;

/// Nested tool-call payload keys, checked in precedence order.
const NESTED_TOOL_KEYS: [&str; 6] = [
    "semSearchToolCall",
    "editToolCall",
    "readToolCall",
    "grepToolCall",
    "shellToolCall",
    "writeToolCall",
];

const SEARCH_QUERY_MAX: usize = 50;
const SHELL_COMMAND_MAX: usize = 60;
const ERROR_CONTENT_MAX: usize = 100;

/// Per-category action counters for one agent run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCounters {
    pub reads: u64,
    pub searches: u64,
    pub edits: u64,
    pub writes: u64,
    pub shells: u64,
    pub errors: u64,
}

impl ToolCounters {
    /// Non-zero counters joined by commas, e.g. `3 reads, 1 edit`.
    /// `None` when nothing was counted.
    pub fn render(&self) -> Option<String> {
        let pairs: [(u64, &str, &str); 6] = [
            (self.reads, "read", "reads"),
            (self.searches, "search", "searches"),
            (self.edits, "edit", "edits"),
            (self.writes, "write", "writes"),
            (self.shells, "shell", "shells"),
            (self.errors, "error", "errors"),
        ];
        let parts: Vec<String> = pairs
            .iter()
            .filter(|(n, _, _)| *n > 0)
            .map(|(n, one, many)| {
                format!("{n} {}", if *n == 1 { one } else { many })
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

/// Truncate to `max` characters on a char boundary, appending `...`
/// when anything was cut.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    format!("{cut}...")
}

fn first_str<'a>(args: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| args.get(k).and_then(Value::as_str))
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Line-buffered formatter over the stream-JSON protocol.
pub struct StreamFormatter<W: Write> {
    inner: W,
    buf: Vec<u8>,
    verbose: bool,
    counters: ToolCounters,
    summary_emitted: bool,
}

impl<W: Write> StreamFormatter<W> {
    pub fn new(inner: W, verbose: bool) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            verbose,
            counters: ToolCounters::default(),
            summary_emitted: false,
        }
    }

    pub fn counters(&self) -> &ToolCounters {
        &self.counters
    }

    /// Classify one line; the returned string, if any, is the progress
    /// line to print. Only `started` tool calls count; `ended` and
    /// `completed` subtypes must not double-count.
    fn classify(&mut self, line: &str) -> Option<String> {
        let value: Value = serde_json::from_str(line.trim()).ok()?;
        match value.get("type").and_then(Value::as_str)? {
            "tool_call" => self.classify_tool_call(&value),
            "tool_result" => self.classify_tool_result(&value),
            _ => None,
        }
    }

    fn classify_tool_call(&mut self, value: &Value) -> Option<String> {
        if let Some(subtype) = value.get("subtype").and_then(Value::as_str) {
            if subtype != "started" {
                return None;
            }
        }

        // Nested shape first: tool_call.<category>ToolCall.args.
        if let Some(nested) = value.get("tool_call").and_then(Value::as_object) {
            for key in NESTED_TOOL_KEYS {
                if let Some(call) = nested.get(key) {
                    let args = call.get("args").cloned().unwrap_or(Value::Null);
                    return self.classify_named(key, &args);
                }
            }
            return None;
        }

        // Flat legacy shape: top-level name + arguments.
        let name = value.get("name").and_then(Value::as_str)?;
        let args = value.get("arguments").cloned().unwrap_or(Value::Null);
        self.classify_named(name, &args)
    }

    fn classify_named(&mut self, name: &str, args: &Value) -> Option<String> {
        match name {
            "read" | "readToolCall" => {
                self.counters.reads += 1;
                None
            }
            "grep" | "grepToolCall" | "codebase_search" => {
                self.counters.searches += 1;
                None
            }
            "semSearchToolCall" => {
                self.counters.searches += 1;
                let query = first_str(args, &["query"]).unwrap_or_default();
                Some(format!("[search] {}", truncate(query, SEARCH_QUERY_MAX)))
            }
            "editToolCall" | "search_replace" => {
                self.counters.edits += 1;
                let path =
                    first_str(args, &["path", "file_path", "target_file"]).unwrap_or("?");
                Some(format!("[edit] {path}"))
            }
            "writeToolCall" | "write" => {
                self.counters.writes += 1;
                let contents = first_str(args, &["contents"])?;
                let path =
                    first_str(args, &["path", "file_path", "target_file"]).unwrap_or("?");
                Some(format!(
                    "[write] {} ({} lines)",
                    basename(path),
                    contents.lines().count()
                ))
            }
            "shellToolCall" | "run_terminal_cmd" | "bash" => {
                self.counters.shells += 1;
                let command = first_str(args, &["command"]).unwrap_or_default();
                Some(format!(
                    "[shell] {}",
                    truncate(command, SHELL_COMMAND_MAX)
                ))
            }
            _ => None,
        }
    }

    fn classify_tool_result(&mut self, value: &Value) -> Option<String> {
        if value.get("is_error").and_then(Value::as_bool) != Some(true) {
            return None;
        }
        self.counters.errors += 1;
        let content = match value.get("content") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        Some(format!("[error] {}", truncate(&content, ERROR_CONTENT_MAX)))
    }

    fn drain_complete_lines(&mut self) -> std::io::Result<()> {
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line).into_owned();
            if let Some(msg) = self.classify(&text) {
                writeln!(self.inner, "{msg}")?;
            }
        }
        Ok(())
    }

    /// The executor flushes exactly once at end of stream; that flush
    /// renders the per-bead summary.
    fn emit_summary(&mut self) -> std::io::Result<()> {
        if self.summary_emitted {
            return Ok(());
        }
        self.summary_emitted = true;
        if let Some(rendered) = self.counters.render() {
            writeln!(self.inner, "[ralph] Completed: {rendered}")?;
        }
        Ok(())
    }
}

impl<W: Write> Write for StreamFormatter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.verbose {
            self.inner.write_all(buf)?;
            return Ok(buf.len());
        }
        self.buf.extend_from_slice(buf);
        self.drain_complete_lines()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.verbose {
            self.emit_summary()?;
        }
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_lines(lines: &[&str], verbose: bool) -> (String, ToolCounters) {
        let mut out = Vec::new();
        let mut fmt = StreamFormatter::new(&mut out, verbose);
        for line in lines {
            fmt.write_all(line.as_bytes()).unwrap();
            fmt.write_all(b"\n").unwrap();
        }
        fmt.flush().unwrap();
        let counters = fmt.counters().clone();
        drop(fmt);
        (String::from_utf8(out).unwrap(), counters)
    }

    #[test]
    fn reads_and_greps_are_counted_but_suppressed() {
        let (out, counters) = run_lines(
            &[
                r#"{"type":"tool_call","subtype":"started","name":"read","arguments":{"path":"src/a.rs"}}"#,
                r#"{"type":"tool_call","subtype":"started","name":"grep","arguments":{"pattern":"fn main"}}"#,
                r#"{"type":"tool_call","subtype":"started","name":"codebase_search","arguments":{"query":"loop"}}"#,
            ],
            false,
        );
        assert_eq!(counters.reads, 1);
        assert_eq!(counters.searches, 2);
        assert_eq!(
            out, "[ralph] Completed: 1 read, 2 searches\n",
            "suppressed tools emit only the summary"
        );
    }

    #[test]
    fn ended_events_do_not_double_count() {
        let (_, counters) = run_lines(
            &[
                r#"{"type":"tool_call","subtype":"started","name":"bash","arguments":{"command":"cargo test"}}"#,
                r#"{"type":"tool_call","subtype":"ended","name":"bash","duration_ms":1200}"#,
                r#"{"type":"tool_call","subtype":"completed","name":"bash"}"#,
            ],
            false,
        );
        assert_eq!(counters.shells, 1);
    }

    #[test]
    fn nested_edit_and_search_shapes() {
        let (out, counters) = run_lines(
            &[
                r#"{"type":"tool_call","tool_call":{"editToolCall":{"args":{"path":"src/lib.rs"},"result":{"ok":true}}}}"#,
                r#"{"type":"tool_call","tool_call":{"semSearchToolCall":{"args":{"query":"where is the retry guard implemented in the orchestrator loop"},"result":{"hits":["SECRET_PAYLOAD"]}}}}"#,
            ],
            false,
        );
        assert_eq!(counters.edits, 1);
        assert_eq!(counters.searches, 1);
        assert!(out.contains("[edit] src/lib.rs\n"));
        assert!(out.contains("[search] where is the retry guard implemented in the orches...\n"));
        assert!(
            !out.contains("SECRET_PAYLOAD"),
            "search result payloads must never be displayed"
        );
    }

    #[test]
    fn nested_read_is_suppressed_and_counted() {
        let (out, counters) = run_lines(
            &[r#"{"type":"tool_call","tool_call":{"readToolCall":{"args":{"path":"a"},"result":{"contents":"TOP_SECRET"}}}}"#],
            false,
        );
        assert_eq!(counters.reads, 1);
        assert!(!out.contains("TOP_SECRET"));
    }

    #[test]
    fn shell_commands_are_truncated() {
        let long = "x".repeat(80);
        let line = format!(
            r#"{{"type":"tool_call","subtype":"started","name":"run_terminal_cmd","arguments":{{"command":"{long}"}}}}"#
        );
        let (out, counters) = run_lines(&[&line], false);
        assert_eq!(counters.shells, 1);
        let expected = format!("[shell] {}...", "x".repeat(60));
        assert!(out.contains(&expected));
    }

    #[test]
    fn write_reports_basename_and_line_count() {
        let (out, counters) = run_lines(
            &[r#"{"type":"tool_call","tool_call":{"writeToolCall":{"args":{"path":"src/deep/mod.rs","contents":"a\nb\nc"}}}}"#],
            false,
        );
        assert_eq!(counters.writes, 1);
        assert!(out.contains("[write] mod.rs (3 lines)\n"));
    }

    #[test]
    fn error_results_are_surfaced() {
        let (out, counters) = run_lines(
            &[
                r#"{"type":"tool_result","is_error":true,"content":"compile failed: expected `;`"}"#,
                r#"{"type":"tool_result","is_error":false,"content":"fine"}"#,
            ],
            false,
        );
        assert_eq!(counters.errors, 1);
        assert!(out.contains("[error] compile failed: expected `;`\n"));
        assert!(!out.contains("fine"));
    }

    #[test]
    fn summary_skipped_when_nothing_counted() {
        let (out, _) = run_lines(&[r#"{"type":"system","subtype":"init"}"#], false);
        assert!(out.is_empty());
    }

    #[test]
    fn verbose_mode_passes_bytes_through() {
        let raw = r#"{"type":"tool_call","subtype":"started","name":"read"}"#;
        let (out, counters) = run_lines(&[raw], true);
        assert_eq!(out, format!("{raw}\n"));
        assert_eq!(counters, ToolCounters::default());
    }

    #[test]
    fn malformed_lines_are_skipped_silently() {
        let (out, counters) = run_lines(
            &[
                "{truncated",
                r#"{"type":"tool_call","subtype":"started","name":"bash","arguments":{"command":"ls"}}"#,
            ],
            false,
        );
        assert_eq!(counters.shells, 1);
        assert!(out.contains("[shell] ls\n"));
    }
}
