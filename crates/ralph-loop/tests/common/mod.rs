//! Scripted seams and a recording observer shared by the orchestrator
//! scenario tests. No subprocesses anywhere; the fakes answer from
//! in-memory scripts the way the real bridges would from `bd` and the
//! agent binary.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use ralph_loop::{
    AgentResult, Assessment, Bead, LoopSeams, Outcome, ProgressObserver, RunContext,
};

pub fn bead(id: &str) -> Bead {
    Bead {
        id: id.to_string(),
        title: format!("title for {id}"),
        status: "open".to_string(),
    }
}

pub fn agent_result(exit_code: i32, timed_out: bool) -> AgentResult {
    AgentResult {
        exit_code,
        stdout: String::new(),
        stderr: String::new(),
        duration: Duration::from_millis(50),
        timed_out,
        chat_id: Some("chat-test".to_string()),
        error_message: None,
    }
}

/// Seams driven entirely by in-memory scripts.
#[derive(Default)]
pub struct FakeSeams {
    /// Scripted `pick_next` answers; exhausted means `None`.
    pub picks: Mutex<VecDeque<Bead>>,
    /// When set, `pick_next` always returns this bead.
    pub endless_pick: Option<Bead>,
    /// Snapshot served to the wave.
    pub ready_beads: Vec<Bead>,
    /// Outcome per bead id; unknown beads assess as success.
    pub outcomes: HashMap<String, Outcome>,
    /// Simulated agent runtime.
    pub execute_delay: Duration,
    /// Make `fetch_prompt` fail, exercising the fatal path.
    pub fail_fetch: bool,
    /// Bead id whose execution fails like a bad launch.
    pub fail_execute_for: Option<String>,
    /// Make every `sync` fail; never fatal to the loop.
    pub fail_sync: bool,
    /// Work dirs each execution ran in, in order.
    pub executed: Mutex<Vec<PathBuf>>,
    pub sync_calls: AtomicUsize,
}

impl FakeSeams {
    pub fn with_picks(ids: &[&str]) -> Self {
        Self {
            picks: Mutex::new(ids.iter().map(|id| bead(id)).collect()),
            ..Self::default()
        }
    }

    pub fn outcome(mut self, id: &str, outcome: Outcome) -> Self {
        self.outcomes.insert(id.to_string(), outcome);
        self
    }

    pub fn executed_dirs(&self) -> Vec<PathBuf> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl LoopSeams for FakeSeams {
    async fn pick_next(&self) -> Result<Option<Bead>> {
        if let Some(bead) = &self.endless_pick {
            return Ok(Some(bead.clone()));
        }
        Ok(self.picks.lock().unwrap().pop_front())
    }

    async fn ready(&self) -> Result<Vec<Bead>> {
        Ok(self.ready_beads.clone())
    }

    async fn fetch_prompt(&self, bead: &Bead) -> Result<String> {
        if self.fail_fetch {
            bail!("prompt store unavailable");
        }
        Ok(format!("template for {}", bead.id))
    }

    async fn render_prompt(&self, bead: &Bead, template: &str) -> Result<String> {
        Ok(format!("{template} rendered for {}", bead.id))
    }

    async fn execute(
        &self,
        _ctx: &RunContext,
        work_dir: &Path,
        prompt: &str,
    ) -> Result<AgentResult> {
        if let Some(fail_id) = &self.fail_execute_for {
            if prompt.contains(fail_id.as_str()) {
                bail!("failed to launch agent `agent`");
            }
        }
        self.executed.lock().unwrap().push(work_dir.to_path_buf());
        if self.execute_delay > Duration::ZERO {
            tokio::time::sleep(self.execute_delay).await;
        }
        let outcome = self
            .outcomes
            .iter()
            .find(|(id, _)| prompt.contains(id.as_str()))
            .map(|(_, o)| *o);
        Ok(agent_result(
            if outcome == Some(Outcome::Failure) { 1 } else { 0 },
            outcome == Some(Outcome::Timeout),
        ))
    }

    async fn assess(&self, bead: &Bead, _result: &AgentResult) -> Assessment {
        let outcome = self
            .outcomes
            .get(&bead.id)
            .copied()
            .unwrap_or(Outcome::Success);
        Assessment {
            outcome,
            summary: format!("bead {} assessed as {outcome}", bead.id),
        }
    }

    async fn sync(&self) -> Result<()> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_sync {
            bail!("sync: remote unreachable");
        }
        Ok(())
    }
}

/// Observer that records every callback as a flat event string.
#[derive(Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressObserver for RecordingObserver {
    fn on_loop_start(&self, _root: &Path) {
        self.events.lock().unwrap().push("loop_start".to_string());
    }

    fn on_iteration_start(&self, iteration: u32) {
        self.events.lock().unwrap().push(format!("iter:{iteration}"));
    }

    fn on_bead_start(&self, bead: &Bead) {
        self.events.lock().unwrap().push(format!("start:{}", bead.id));
    }

    fn on_bead_complete(&self, result: &ralph_loop::BeadResult) {
        self.events
            .lock()
            .unwrap()
            .push(format!("complete:{}:{}", result.bead.id, result.outcome));
    }

    fn on_loop_end(&self, summary: &ralph_loop::RunSummary) {
        self.events
            .lock()
            .unwrap()
            .push(format!("end:{}", summary.stop_reason));
    }
}
