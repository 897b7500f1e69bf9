//! The sequential loop: pick, execute, assess, repeat, with guard
//! rails.
//!
//! Fatal errors are limited to picking, prompt fetch/render, and agent
//! launch; everything downstream of a launched agent becomes an outcome
//! and feeds the guards. The wall clock is layered onto the caller's
//! context, so a cancelled caller and an expired run are told apart at
//! the top of every iteration.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::config::{LoopConfig, LoopSeams};
use crate::context::{ContextCause, RunContext};
use crate::observer::ProgressObserver;
use crate::types::{BeadResult, Outcome, RunSummary, StopReason};
use crate::worktree_bridge::{head_commit, is_clean};

/// Drives beads one at a time in the configured work directory.
pub struct SequentialLoop {
    config: LoopConfig,
    seams: Arc<dyn LoopSeams>,
    observer: Arc<dyn ProgressObserver>,
}

impl SequentialLoop {
    pub fn new(
        config: LoopConfig,
        seams: Arc<dyn LoopSeams>,
        observer: Arc<dyn ProgressObserver>,
    ) -> Self {
        Self {
            config,
            seams,
            observer,
        }
    }

    /// Run until a stop condition fires. `Err` only for the fatal
    /// error classes; every guarded stop returns a summary.
    pub async fn run(&self, ctx: &RunContext) -> Result<RunSummary> {
        let ctx = ctx.with_deadline(self.config.wall_clock_timeout);
        let started = Instant::now();

        self.observer.on_loop_start(&self.config.work_dir);

        let mut summary = RunSummary::default();
        let mut consecutive_failures = 0u32;
        let mut last_failed: Option<String> = None;
        let mut skipped: HashSet<String> = HashSet::new();
        let mut stop = None;

        for iteration in 1..=self.config.max_iterations {
            match ctx.cause() {
                Some(ContextCause::DeadlineExceeded) => {
                    stop = Some(StopReason::WallClockTimeout);
                    break;
                }
                Some(ContextCause::Cancelled) => {
                    stop = Some(StopReason::ContextCancelled);
                    break;
                }
                None => {}
            }

            let mut bead = match self.seams.pick_next().await.context("pick next bead")? {
                Some(bead) => bead,
                None => {
                    stop = Some(StopReason::Normal);
                    break;
                }
            };

            // Same-bead retry guard: a bead that just failed gets
            // skipped once rather than retried immediately.
            if last_failed.as_deref() == Some(bead.id.as_str()) {
                info!(id = %bead.id, "bead failed last iteration, skipping");
                summary.skipped += 1;
                skipped.insert(bead.id.clone());
                last_failed = None;
                match self.seams.pick_next().await.context("pick next bead")? {
                    None => {
                        stop = Some(StopReason::Normal);
                        break;
                    }
                    Some(repick) if skipped.contains(&repick.id) => {
                        stop = Some(StopReason::AllBeadsSkipped);
                        break;
                    }
                    Some(repick) => bead = repick,
                }
            }

            summary.iterations += 1;
            self.observer.on_iteration_start(iteration);
            self.observer.on_bead_start(&bead);

            if self.config.dry_run {
                info!(
                    id = %bead.id,
                    title = %bead.title,
                    agent = %self.config.agent_bin,
                    "dry-run: would run agent for bead"
                );
                continue;
            }

            let head_before = match head_commit(&self.config.work_dir).await {
                Ok(head) => Some(head),
                Err(err) => {
                    debug!(%err, "HEAD capture failed, landing check limited");
                    None
                }
            };

            let template = self
                .seams
                .fetch_prompt(&bead)
                .await
                .with_context(|| format!("fetch prompt for bead {}", bead.id))?;
            let prompt = self
                .seams
                .render_prompt(&bead, &template)
                .await
                .with_context(|| format!("render prompt for bead {}", bead.id))?;

            let result = self
                .seams
                .execute(&ctx, &self.config.work_dir, &prompt)
                .await
                .with_context(|| format!("run agent for bead {}", bead.id))?;

            let assessment = self.seams.assess(&bead, &result).await;
            let mut outcome = assessment.outcome;
            let mut outcome_summary = assessment.summary;

            if outcome == Outcome::Success {
                if let Some(gap) = self.landing_gap(head_before.as_deref()).await {
                    if self.config.strict_landing {
                        outcome = Outcome::Failure;
                        outcome_summary = format!("landing check failed: {gap}");
                    } else {
                        warn!(id = %bead.id, gap = %gap, "bead closed but work did not land");
                    }
                }
            }

            summary.record(outcome);
            self.observer.on_bead_complete(&BeadResult {
                bead: bead.clone(),
                outcome,
                summary: outcome_summary,
                duration: result.duration,
                chat_id: result.chat_id.clone(),
                error_message: result.error_message.clone(),
                exit_code: result.exit_code,
                stderr: result.stderr.clone(),
            });

            if outcome.is_failure() {
                consecutive_failures += 1;
                last_failed = Some(bead.id.clone());
            } else {
                consecutive_failures = 0;
                last_failed = None;
            }

            if consecutive_failures >= self.config.consecutive_failure_limit {
                stop = Some(StopReason::ConsecutiveFailures);
                break;
            }

            if let Err(err) = self.seams.sync().await {
                if self.config.verbose {
                    info!(%err, "tracker sync failed, continuing");
                } else {
                    debug!(%err, "tracker sync failed, continuing");
                }
            }
        }

        summary.stop_reason = stop.unwrap_or(StopReason::MaxIterations);
        summary.duration = started.elapsed();
        self.observer.on_loop_end(&summary);
        Ok(summary)
    }

    /// Why a "success" did not actually land, if it did not. Git probe
    /// failures disable the check rather than failing the bead.
    async fn landing_gap(&self, head_before: Option<&str>) -> Option<String> {
        match is_clean(&self.config.work_dir).await {
            Ok(false) => return Some("uncommitted changes in work dir".to_string()),
            Ok(true) => {}
            Err(err) => {
                debug!(%err, "cleanliness probe failed, skipping landing check");
                return None;
            }
        }
        if let (Some(before), Ok(after)) =
            (head_before, head_commit(&self.config.work_dir).await)
        {
            if before == after {
                return Some("no commit landed".to_string());
            }
        }
        None
    }
}
