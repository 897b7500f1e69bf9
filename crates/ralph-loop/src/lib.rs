//! ralph-loop: an autonomous bead executor.
//!
//! The loop repeatedly picks a ready bead from the beads tracker
//! (`bd`), runs a coding agent subprocess against a git checkout,
//! parses the agent's stream-JSON output live, assesses the result by
//! re-inspecting tracker state, and advances under guard rails
//! (consecutive failures, same-bead skip, wall clock). The wave variant
//! dispatches every ready bead at once, each in an isolated git
//! worktree.
//!
//! External collaborators are subprocesses: the `bd` tracker CLI, the
//! agent binary, and git. Each one sits behind a bridge module, and the
//! orchestrators reach all of them through the [`config::LoopSeams`]
//! trait so tests can run entire scenarios without a single subprocess.

pub mod assess;
pub mod beads_bridge;
pub mod config;
pub mod context;
pub mod executor;
pub mod log_format;
pub mod observer;
pub mod orchestrator;
pub mod picker;
pub mod prompts;
pub mod report;
pub mod stream_events;
pub mod types;
pub mod wave;
pub mod worktree_bridge;

pub use assess::{assess, Assessment};
pub use beads_bridge::{Bead, BeadRef, BeadShow, BeadsBridge, Tracker};
pub use config::{LoopConfig, LoopSeams, ProductionSeams};
pub use context::{ContextCause, RunContext};
pub use executor::{run_agent, AgentOptions, AgentResult};
pub use observer::{MultiObserver, ProgressObserver};
pub use orchestrator::SequentialLoop;
pub use report::ProgressReporter;
pub use stream_events::ToolEvent;
pub use types::{AgentType, BeadResult, Outcome, RunSummary, StopReason};
pub use wave::WaveOrchestrator;
pub use worktree_bridge::WorktreeBridge;
