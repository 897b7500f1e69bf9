//! The wave: every currently-ready bead dispatched in parallel, each in
//! its own git worktree.
//!
//! One snapshot, one task per bead, a `JoinSet` barrier at the end. No
//! retry guard, no consecutive-failure guard, no same-bead skip; a
//! failed bead simply records its outcome. Counters and the output
//! writer are the only shared state, both behind a mutex.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::beads_bridge::Bead;
use crate::config::{LoopConfig, LoopSeams};
use crate::context::{ContextCause, RunContext};
use crate::observer::ProgressObserver;
use crate::types::{BeadResult, RunSummary, StopReason};
use crate::worktree_bridge::WorktreeBridge;

/// Dispatches all ready beads at once.
pub struct WaveOrchestrator {
    config: LoopConfig,
    seams: Arc<dyn LoopSeams>,
    observer: Arc<dyn ProgressObserver>,
    worktrees: Arc<WorktreeBridge>,
}

impl WaveOrchestrator {
    pub fn new(
        config: LoopConfig,
        seams: Arc<dyn LoopSeams>,
        observer: Arc<dyn ProgressObserver>,
        worktrees: Arc<WorktreeBridge>,
    ) -> Self {
        Self {
            config,
            seams,
            observer,
            worktrees,
        }
    }

    pub async fn run(&self, ctx: &RunContext) -> Result<RunSummary> {
        let ctx = ctx.with_deadline(self.config.wall_clock_timeout);
        let started = Instant::now();

        self.observer.on_loop_start(&self.config.work_dir);

        let beads = self.seams.ready().await.context("fetch ready beads")?;
        if beads.is_empty() {
            info!("no ready beads, nothing to dispatch");
            let summary = RunSummary {
                duration: started.elapsed(),
                ..RunSummary::default()
            };
            self.observer.on_loop_end(&summary);
            return Ok(summary);
        }

        if self.config.dry_run {
            for bead in &beads {
                info!(
                    id = %bead.id,
                    title = %bead.title,
                    "dry-run: would dispatch bead into its own worktree"
                );
            }
            let summary = RunSummary {
                duration: started.elapsed(),
                ..RunSummary::default()
            };
            self.observer.on_loop_end(&summary);
            return Ok(summary);
        }

        info!(beads = beads.len(), "dispatching wave");

        let counters = Arc::new(Mutex::new(RunSummary::default()));
        let limit = if self.config.concurrency > 0 {
            self.config.concurrency
        } else {
            beads.len()
        };
        let slots = Arc::new(tokio::sync::Semaphore::new(limit));

        let mut workers = JoinSet::new();
        for (index, bead) in beads.into_iter().enumerate() {
            let ctx = ctx.clone();
            let seams = self.seams.clone();
            let worktrees = self.worktrees.clone();
            let observer = self.observer.clone();
            let counters = counters.clone();
            let slots = slots.clone();
            workers.spawn(async move {
                let Ok(_permit) = slots.acquire_owned().await else {
                    return;
                };
                run_bead(
                    &ctx,
                    seams.as_ref(),
                    &worktrees,
                    observer.as_ref(),
                    &counters,
                    index as u32 + 1,
                    bead,
                )
                .await;
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                warn!(%err, "wave worker aborted");
            }
        }

        let mut summary = match counters.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        summary.stop_reason = match ctx.cause() {
            Some(ContextCause::DeadlineExceeded) => StopReason::WallClockTimeout,
            Some(ContextCause::Cancelled) => StopReason::ContextCancelled,
            None => StopReason::Normal,
        };
        summary.duration = started.elapsed();
        self.observer.on_loop_end(&summary);
        Ok(summary)
    }
}

/// One wave worker: worktree, prompt, agent, assessment, teardown.
///
/// Failures before the agent launches abandon the bead without an
/// outcome; the wave never aborts siblings.
async fn run_bead(
    ctx: &RunContext,
    seams: &dyn LoopSeams,
    worktrees: &WorktreeBridge,
    observer: &dyn ProgressObserver,
    counters: &Mutex<RunSummary>,
    index: u32,
    bead: Bead,
) {
    observer.on_iteration_start(index);
    observer.on_bead_start(&bead);

    let (path, branch) = match worktrees.create_worktree(&bead.id).await {
        Ok(created) => created,
        Err(err) => {
            warn!(id = %bead.id, %err, "worktree creation failed, abandoning bead");
            return;
        }
    };
    if let Ok(mut c) = counters.lock() {
        c.iterations += 1;
    }
    debug!(id = %bead.id, path = %path.display(), branch = %branch, "worker started");

    let outcome = async {
        let template = seams
            .fetch_prompt(&bead)
            .await
            .context("fetch prompt")?;
        let prompt = seams
            .render_prompt(&bead, &template)
            .await
            .context("render prompt")?;
        let result = seams
            .execute(ctx, &path, &prompt)
            .await
            .context("run agent")?;
        Ok::<_, anyhow::Error>((seams.assess(&bead, &result).await, result))
    }
    .await;

    match outcome {
        Ok((assessment, result)) => {
            if let Ok(mut c) = counters.lock() {
                c.record(assessment.outcome);
            }
            observer.on_bead_complete(&BeadResult {
                bead: bead.clone(),
                outcome: assessment.outcome,
                summary: assessment.summary,
                duration: result.duration,
                chat_id: result.chat_id.clone(),
                error_message: result.error_message.clone(),
                exit_code: result.exit_code,
                stderr: result.stderr.clone(),
            });
            if let Err(err) = seams.sync().await {
                debug!(id = %bead.id, %err, "tracker sync failed, continuing");
            }
        }
        Err(err) => {
            warn!(id = %bead.id, err = %format!("{err:#}"), "bead abandoned");
        }
    }

    if let Err(err) = worktrees.remove_worktree(&path).await {
        warn!(id = %bead.id, %err, "worktree removal failed");
    }
}
