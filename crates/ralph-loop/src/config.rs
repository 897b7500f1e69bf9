//! Loop configuration and the capability seams.
//!
//! Everything the orchestrators consult lives in [`LoopConfig`];
//! environment overrides (`RALPH_BD_BIN`, `RALPH_AGENT_BIN`,
//! `RALPH_CODER_MODEL`, `RALPH_VERIFIER_MODEL`) are read exactly once
//! at construction, and nothing downstream reaches for env or globals
//! again. The [`LoopSeams`] trait is the injection surface: production
//! wires the real tracker, executor, and assessor; tests substitute
//! fakes per method.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::assess::{assess, Assessment};
use crate::beads_bridge::{Bead, BeadsBridge, Tracker};
use crate::context::RunContext;
use crate::executor::{
    run_agent, AgentOptions, AgentResult, DEFAULT_AGENT_BIN, DEFAULT_AGENT_TIMEOUT,
};
use crate::log_format::StreamFormatter;
use crate::observer::{tool_event_dispatcher, ProgressObserver};
use crate::picker::BeadPicker;
use crate::prompts;
use crate::types::AgentType;

/// Default cap on loop iterations.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Default consecutive-failure limit before the loop gives up.
pub const DEFAULT_CONSECUTIVE_FAILURE_LIMIT: u32 = 3;

/// Default wall-clock budget for a whole run.
pub const DEFAULT_WALL_CLOCK_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

/// Bundled configuration for one orchestrator run.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Git checkout the tracker and (sequential) agent run in.
    pub work_dir: PathBuf,
    /// Restrict picking to this epic.
    pub epic: Option<String>,
    /// Run exactly this bead instead of picking.
    pub target_bead: Option<String>,
    pub max_iterations: u32,
    /// Log what would run without executing anything.
    pub dry_run: bool,
    pub verbose: bool,
    /// Which agent variant to invoke.
    pub agent_type: AgentType,
    /// Per-invocation deadline for the agent subprocess.
    pub agent_timeout: Duration,
    pub consecutive_failure_limit: u32,
    pub wall_clock_timeout: Duration,
    /// Max parallel agents in a wave; 0 means one per ready bead.
    pub concurrency: usize,
    /// Downgrade a success whose work did not land in git.
    pub strict_landing: bool,
    /// Tracker binary, from `RALPH_BD_BIN`.
    pub bd_bin: String,
    /// Agent binary, from `RALPH_AGENT_BIN`.
    pub agent_bin: String,
    /// Model override for coder runs, from `RALPH_CODER_MODEL`.
    pub coder_model: Option<String>,
    /// Model override for verifier runs, from `RALPH_VERIFIER_MODEL`.
    pub verifier_model: Option<String>,
}

impl LoopConfig {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            epic: None,
            target_bead: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            dry_run: false,
            verbose: false,
            agent_type: AgentType::Coder,
            agent_timeout: DEFAULT_AGENT_TIMEOUT,
            consecutive_failure_limit: DEFAULT_CONSECUTIVE_FAILURE_LIMIT,
            wall_clock_timeout: DEFAULT_WALL_CLOCK_TIMEOUT,
            concurrency: 0,
            strict_landing: false,
            bd_bin: std::env::var("RALPH_BD_BIN").unwrap_or_else(|_| "bd".into()),
            agent_bin: std::env::var("RALPH_AGENT_BIN")
                .unwrap_or_else(|_| DEFAULT_AGENT_BIN.into()),
            coder_model: std::env::var("RALPH_CODER_MODEL").ok(),
            verifier_model: std::env::var("RALPH_VERIFIER_MODEL").ok(),
        }
    }

    /// Model override for the configured agent type, if any.
    pub fn model_override(&self) -> Option<String> {
        match self.agent_type {
            AgentType::Coder => self.coder_model.clone(),
            AgentType::Verifier => self.verifier_model.clone(),
        }
    }
}

/// The seven injection points the orchestrators run through.
///
/// Production wires the real collaborators; tests implement this trait
/// with scripted fakes and never touch a subprocess.
#[async_trait]
pub trait LoopSeams: Send + Sync {
    /// Next bead for the sequential loop; `None` means done.
    async fn pick_next(&self) -> Result<Option<Bead>>;

    /// One-shot snapshot of every ready bead, for the wave.
    async fn ready(&self) -> Result<Vec<Bead>>;

    /// Prompt template for a bead.
    async fn fetch_prompt(&self, bead: &Bead) -> Result<String>;

    /// Template plus bead to final prompt.
    async fn render_prompt(&self, bead: &Bead, template: &str) -> Result<String>;

    /// Run the agent in `work_dir`. `Err` means the process never
    /// launched.
    async fn execute(
        &self,
        ctx: &RunContext,
        work_dir: &Path,
        prompt: &str,
    ) -> Result<AgentResult>;

    /// Map a finished invocation to an outcome.
    async fn assess(&self, bead: &Bead, result: &AgentResult) -> Assessment;

    /// Best-effort tracker sync.
    async fn sync(&self) -> Result<()>;
}

/// Real collaborators behind the seams.
pub struct ProductionSeams {
    config: LoopConfig,
    tracker: Arc<BeadsBridge>,
    picker: BeadPicker,
    observer: Arc<dyn ProgressObserver>,
}

impl ProductionSeams {
    pub fn new(config: LoopConfig, observer: Arc<dyn ProgressObserver>) -> Self {
        let tracker = Arc::new(BeadsBridge::with_binary(&config.work_dir, &config.bd_bin));
        let picker = match (&config.target_bead, &config.epic) {
            (Some(id), _) => BeadPicker::target(tracker.clone(), id.clone()),
            (None, Some(epic)) => BeadPicker::epic(tracker.clone(), epic.clone()),
            (None, None) => BeadPicker::ready(tracker.clone()),
        };
        Self {
            config,
            tracker,
            picker,
            observer,
        }
    }
}

#[async_trait]
impl LoopSeams for ProductionSeams {
    async fn pick_next(&self) -> Result<Option<Bead>> {
        self.picker.pick_next().await
    }

    async fn ready(&self) -> Result<Vec<Bead>> {
        self.tracker.ready(self.config.epic.as_deref()).await
    }

    async fn fetch_prompt(&self, _bead: &Bead) -> Result<String> {
        Ok(prompts::default_template(self.config.agent_type).to_string())
    }

    async fn render_prompt(&self, bead: &Bead, template: &str) -> Result<String> {
        Ok(prompts::render(template, bead))
    }

    async fn execute(
        &self,
        ctx: &RunContext,
        work_dir: &Path,
        prompt: &str,
    ) -> Result<AgentResult> {
        let live = StreamFormatter::new(std::io::stdout(), self.config.verbose);
        let options = AgentOptions {
            timeout: self.config.agent_timeout,
            agent_type: self.config.agent_type,
            model: self.config.model_override(),
            binary: self.config.agent_bin.clone(),
            stdout_writer: Some(Box::new(live)),
            tool_events: Some(tool_event_dispatcher(self.observer.clone())),
            command_factory: None,
        };
        run_agent(ctx, work_dir, prompt, options).await
    }

    async fn assess(&self, bead: &Bead, result: &AgentResult) -> Assessment {
        assess(self.tracker.as_ref(), bead, result).await
    }

    async fn sync(&self) -> Result<()> {
        self.tracker.sync().await
    }
}
