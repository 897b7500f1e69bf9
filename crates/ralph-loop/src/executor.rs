//! Agent subprocess executor.
//!
//! Spawns the external coding agent against a working directory,
//! enforces the per-invocation deadline, and captures both streams.
//! stdout is fanned out through one multi-writer to an in-memory
//! capture buffer and the live tee sink, optionally decorated with the
//! tool-event observer, so every consumer sees the same bytes in the
//! same order. Only launch failures are errors; every other way the
//! process can die produces a well-formed [`AgentResult`].

use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::context::{ContextCause, RunContext};
use crate::stream_events::{MultiWriter, ObservingWriter, SharedBuffer, ToolEvent};
use crate::types::AgentType;

/// Deadline applied when the caller does not set one.
pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(600);

/// Agent binary name when not overridden through config.
pub const DEFAULT_AGENT_BIN: &str = "agent";

/// Builds the command for one invocation: `(work_dir, model, prompt)`.
/// Tests inject scripts here; production uses the standard shape.
pub type CommandFactory = Box<dyn Fn(&Path, &str, &str) -> Command + Send + Sync>;

/// Everything captured about one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    /// True exactly when the deadline elapsed and the process was
    /// killed for it.
    pub timed_out: bool,
    pub chat_id: Option<String>,
    pub error_message: Option<String>,
}

/// Per-invocation knobs for [`run_agent`].
pub struct AgentOptions {
    pub timeout: Duration,
    pub agent_type: AgentType,
    /// Overrides the agent type's default model.
    pub model: Option<String>,
    pub binary: String,
    /// Live tee sink; defaults to process stdout.
    pub stdout_writer: Option<Box<dyn Write + Send>>,
    /// When present, complete stream-JSON lines surface as tool events.
    pub tool_events: Option<Box<dyn FnMut(ToolEvent) + Send>>,
    pub command_factory: Option<CommandFactory>,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_AGENT_TIMEOUT,
            agent_type: AgentType::Coder,
            model: None,
            binary: DEFAULT_AGENT_BIN.to_string(),
            stdout_writer: None,
            tool_events: None,
            command_factory: None,
        }
    }
}

/// Scan captured stdout for the last `{"type":"result"}` line and pull
/// out the chat id and error message. Malformed lines are skipped.
fn extract_result_event(stdout: &str) -> (Option<String>, Option<String>) {
    let mut chat_id = None;
    let mut error_message = None;
    for line in stdout.lines() {
        let Ok(value) = serde_json::from_str::<Value>(line.trim()) else {
            continue;
        };
        if value.get("type").and_then(Value::as_str) != Some("result") {
            continue;
        }
        chat_id = value
            .get("chatId")
            .or_else(|| value.get("chat_id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        error_message = match value.get("error") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Object(obj)) => obj
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        };
    }
    (chat_id, error_message)
}

/// Run the agent once against `work_dir`.
///
/// Returns `Err` only when the process could not be launched. A killed
/// or failing agent still yields an `AgentResult`; signal-killed
/// processes carry exit code `-1`.
pub async fn run_agent(
    ctx: &RunContext,
    work_dir: &Path,
    prompt: &str,
    options: AgentOptions,
) -> Result<AgentResult> {
    let AgentOptions {
        timeout,
        agent_type,
        model,
        binary,
        stdout_writer,
        tool_events,
        command_factory,
    } = options;
    let model = model.unwrap_or_else(|| agent_type.default_model().to_string());

    let mut command = match &command_factory {
        Some(factory) => factory(work_dir, &model, prompt),
        None => {
            let mut cmd = Command::new(&binary);
            cmd.args([
                "--model",
                &model,
                "--print",
                "--force",
                "--output-format",
                "stream-json",
            ])
            .arg(prompt)
            .current_dir(work_dir);
            cmd
        }
    };
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let ctx = ctx.with_deadline(timeout);
    let started = Instant::now();
    let mut child = command
        .spawn()
        .with_context(|| format!("failed to launch agent `{binary}`"))?;

    let stdout = child.stdout.take().context("agent stdout not piped")?;
    let stderr = child.stderr.take().context("agent stderr not piped")?;

    // One multi-writer feeds the capture buffer and the (possibly
    // observed) live tee, so both see identical byte sequences.
    let capture = SharedBuffer::new();
    let tee: Box<dyn Write + Send> =
        stdout_writer.unwrap_or_else(|| Box::new(std::io::stdout()));
    let tee: Box<dyn Write + Send> = match tool_events {
        Some(on_event) => Box::new(ObservingWriter::new(tee, on_event)),
        None => tee,
    };
    let mut writer = MultiWriter::new(vec![Box::new(capture.clone()), tee]);

    let stdout_task = tokio::spawn(async move {
        let mut reader = stdout;
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    // Capture sits first in the multi-writer, so a dead
                    // live sink never costs us the transcript.
                    if let Err(err) = writer.write_all(&chunk[..n]) {
                        warn!(%err, "live stdout sink failed");
                    }
                }
                Err(err) => {
                    warn!(%err, "reading agent stdout failed");
                    break;
                }
            }
        }
        let _ = writer.flush();
    });

    let stderr_capture = SharedBuffer::new();
    let stderr_task = tokio::spawn({
        let mut sink = stderr_capture.clone();
        async move {
            let mut reader = stderr;
            let mut chunk = [0u8; 8192];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let _ = sink.write_all(&chunk[..n]);
                    }
                    Err(_) => break,
                }
            }
        }
    });

    let mut timed_out = false;
    let status = tokio::select! {
        res = child.wait() => res.context("wait for agent")?,
        cause = ctx.done() => {
            timed_out = matches!(cause, ContextCause::DeadlineExceeded);
            debug!(?cause, "killing agent");
            let _ = child.kill().await;
            child.wait().await.context("wait for agent after kill")?
        }
    };

    let _ = stdout_task.await;
    let _ = stderr_task.await;

    let duration = started.elapsed();
    let stdout_text = capture.into_string();
    let stderr_text = stderr_capture.into_string();
    let (chat_id, error_message) = extract_result_event(&stdout_text);
    let exit_code = status.code().unwrap_or(-1);

    debug!(
        exit_code,
        timed_out,
        duration_ms = duration.as_millis() as u64,
        "agent finished"
    );

    Ok(AgentResult {
        exit_code,
        stdout: stdout_text,
        stderr: stderr_text,
        duration,
        timed_out,
        chat_id,
        error_message,
    })
}
