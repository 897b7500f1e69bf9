//! Core value types shared across the loop: string-backed enums with
//! round-trip JSON, per-bead results, and the aggregate run summary.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::beads_bridge::Bead;

/// Parse error for the string-backed enums in this module.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {0}: {1}")]
pub struct UnknownVariant(pub &'static str, pub String);

/// Outcome of one agent invocation, as decided by the assessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    /// The tracker shows the bead closed.
    Success,
    /// The bead is blocked on a `needs-human` dependency or dependent.
    Question,
    /// The bead is still open and nothing is waiting on a human.
    Failure,
    /// The agent hit its deadline and was killed.
    Timeout,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Question => "question",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
        }
    }

    /// Whether this outcome feeds the consecutive-failure guard.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failure | Self::Timeout)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "question" => Ok(Self::Question),
            "failure" => Ok(Self::Failure),
            "timeout" => Ok(Self::Timeout),
            other => Err(UnknownVariant("Outcome", other.to_string())),
        }
    }
}

/// Why an orchestrator run ended.
///
/// The loop and the wave share this set; each variant maps to a distinct
/// process exit code so scripts can branch on the cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    /// No more ready beads.
    Normal,
    /// The configured iteration cap was reached.
    MaxIterations,
    /// The consecutive-failure guard fired.
    ConsecutiveFailures,
    /// The run-wide wall-clock deadline elapsed.
    WallClockTimeout,
    /// The caller's context was cancelled.
    ContextCancelled,
    /// Every remaining ready bead was already skipped this run.
    AllBeadsSkipped,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::MaxIterations => "max-iterations",
            Self::ConsecutiveFailures => "consecutive-failures",
            Self::WallClockTimeout => "wall-clock-timeout",
            Self::ContextCancelled => "context-cancelled",
            Self::AllBeadsSkipped => "all-beads-skipped",
        }
    }

    /// Process exit code for this stop reason. Exit code 1 is reserved
    /// for errors that never produced a summary.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Normal => 0,
            Self::MaxIterations => 2,
            Self::ConsecutiveFailures => 3,
            Self::WallClockTimeout => 4,
            Self::ContextCancelled => 5,
            Self::AllBeadsSkipped => 6,
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StopReason {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "max-iterations" => Ok(Self::MaxIterations),
            "consecutive-failures" => Ok(Self::ConsecutiveFailures),
            "wall-clock-timeout" => Ok(Self::WallClockTimeout),
            "context-cancelled" => Ok(Self::ContextCancelled),
            "all-beads-skipped" => Ok(Self::AllBeadsSkipped),
            other => Err(UnknownVariant("StopReason", other.to_string())),
        }
    }
}

/// Which agent variant an invocation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentType {
    /// Implements the bead.
    Coder,
    /// Double-checks a landed bead.
    Verifier,
}

impl AgentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Coder => "coder",
            Self::Verifier => "verifier",
        }
    }

    /// Model used when the caller does not override one.
    pub fn default_model(self) -> &'static str {
        match self {
            Self::Coder => "composer-1",
            Self::Verifier => "claude-4.5-opus-high-thinking",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coder" => Ok(Self::Coder),
            "verifier" => Ok(Self::Verifier),
            other => Err(UnknownVariant("AgentType", other.to_string())),
        }
    }
}

/// Everything the loop keeps about one finished bead: the outcome plus
/// the agent forensics needed to debug a bad run after the fact.
#[derive(Debug, Clone)]
pub struct BeadResult {
    pub bead: Bead,
    pub outcome: Outcome,
    /// Human-readable assessment line, e.g. "still open after agent run".
    pub summary: String,
    pub duration: Duration,
    pub chat_id: Option<String>,
    pub error_message: Option<String>,
    pub exit_code: i32,
    pub stderr: String,
}

/// Aggregate counters for one orchestrator run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub iterations: u32,
    pub succeeded: u32,
    pub questions: u32,
    pub failed: u32,
    pub timed_out: u32,
    pub skipped: u32,
    pub stop_reason: StopReason,
    pub duration: Duration,
}

impl Default for RunSummary {
    fn default() -> Self {
        Self {
            iterations: 0,
            succeeded: 0,
            questions: 0,
            failed: 0,
            timed_out: 0,
            skipped: 0,
            stop_reason: StopReason::Normal,
            duration: Duration::ZERO,
        }
    }
}

impl RunSummary {
    /// Bump the counter matching an outcome.
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Success => self.succeeded += 1,
            Outcome::Question => self.questions += 1,
            Outcome::Failure => self.failed += 1,
            Outcome::Timeout => self.timed_out += 1,
        }
    }
}
