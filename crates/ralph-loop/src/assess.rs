//! Outcome assessment.
//!
//! The agent's exit status alone says nothing about whether work
//! landed; the tracker is the source of truth. The decision tree, first
//! match wins: timeout, tracker lookup failure, bead closed, open
//! needs-human neighbours, still open.

use crate::beads_bridge::{Bead, Tracker};
use crate::executor::AgentResult;
use crate::report::format_duration;
use crate::types::Outcome;

/// An outcome plus the human-readable line explaining it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    pub outcome: Outcome,
    pub summary: String,
}

/// Decide the outcome of one finished agent invocation.
///
/// Pure with respect to the tracker seam; tests drive it with a fake.
pub async fn assess(tracker: &dyn Tracker, bead: &Bead, result: &AgentResult) -> Assessment {
    if result.timed_out {
        return Assessment {
            outcome: Outcome::Timeout,
            summary: format!(
                "agent timed out after {} (exit code {})",
                format_duration(result.duration),
                result.exit_code
            ),
        };
    }

    let show = match tracker.show(&bead.id).await {
        Ok(show) => show,
        Err(err) => {
            return Assessment {
                outcome: Outcome::Failure,
                summary: format!("bead lookup failed: {err:#}"),
            }
        }
    };

    if show.is_closed() {
        return Assessment {
            outcome: Outcome::Success,
            summary: format!("bead {} closed", bead.id),
        };
    }

    let waiting = show.open_needs_human();
    if !waiting.is_empty() {
        return Assessment {
            outcome: Outcome::Question,
            summary: format!("waiting on human input: {}", waiting.join(", ")),
        };
    }

    Assessment {
        outcome: Outcome::Failure,
        summary: format!(
            "still open after agent run (exit code {}, duration {})",
            result.exit_code,
            format_duration(result.duration)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beads_bridge::{BeadRef, BeadShow};
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::time::Duration;

    struct FakeTracker {
        show: Option<BeadShow>,
    }

    #[async_trait]
    impl Tracker for FakeTracker {
        async fn ready(&self, _epic: Option<&str>) -> Result<Vec<Bead>> {
            Ok(Vec::new())
        }

        async fn show(&self, id: &str) -> Result<BeadShow> {
            match &self.show {
                Some(show) => Ok(show.clone()),
                None => bail!("bd show {id} failed: tracker offline"),
            }
        }

        async fn sync(&self) -> Result<()> {
            Ok(())
        }
    }

    fn bead() -> Bead {
        Bead {
            id: "rb-1".into(),
            title: "t".into(),
            status: "open".into(),
        }
    }

    fn agent_result(exit_code: i32, timed_out: bool) -> AgentResult {
        AgentResult {
            exit_code,
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::from_secs(2),
            timed_out,
            chat_id: None,
            error_message: None,
        }
    }

    fn show(status: &str, deps: Vec<BeadRef>, dependents: Vec<BeadRef>) -> BeadShow {
        BeadShow {
            id: "rb-1".into(),
            title: "t".into(),
            status: status.into(),
            dependencies: deps,
            dependents,
        }
    }

    fn needs_human(id: &str, status: &str) -> BeadRef {
        BeadRef {
            id: id.into(),
            status: status.into(),
            labels: vec!["needs-human".into()],
            dependency_type: Some("blocks".into()),
        }
    }

    #[tokio::test]
    async fn timeout_wins_over_everything() {
        let tracker = FakeTracker {
            show: Some(show("closed", vec![], vec![])),
        };
        let a = assess(&tracker, &bead(), &agent_result(-1, true)).await;
        assert_eq!(a.outcome, Outcome::Timeout);
        assert!(a.summary.contains("agent timed out after 2.0s"));
        assert!(a.summary.contains("exit code -1"));
    }

    #[tokio::test]
    async fn tracker_failure_is_a_failure_outcome() {
        let tracker = FakeTracker { show: None };
        let a = assess(&tracker, &bead(), &agent_result(0, false)).await;
        assert_eq!(a.outcome, Outcome::Failure);
        assert!(a.summary.contains("bead lookup failed"));
        assert!(a.summary.contains("tracker offline"));
    }

    #[tokio::test]
    async fn closed_bead_is_success() {
        let tracker = FakeTracker {
            show: Some(show("closed", vec![], vec![])),
        };
        let a = assess(&tracker, &bead(), &agent_result(0, false)).await;
        assert_eq!(a.outcome, Outcome::Success);
        assert_eq!(a.summary, "bead rb-1 closed");
    }

    #[tokio::test]
    async fn open_needs_human_neighbours_make_a_question() {
        let tracker = FakeTracker {
            show: Some(show(
                "open",
                vec![needs_human("rb-q1", "open"), needs_human("rb-done", "closed")],
                vec![needs_human("rb-q2", "open")],
            )),
        };
        let a = assess(&tracker, &bead(), &agent_result(0, false)).await;
        assert_eq!(a.outcome, Outcome::Question);
        assert!(a.summary.contains("rb-q1"));
        assert!(a.summary.contains("rb-q2"));
        assert!(!a.summary.contains("rb-done"));
    }

    #[tokio::test]
    async fn still_open_is_a_failure_with_forensics() {
        let tracker = FakeTracker {
            show: Some(show("open", vec![], vec![])),
        };
        let a = assess(&tracker, &bead(), &agent_result(1, false)).await;
        assert_eq!(a.outcome, Outcome::Failure);
        assert_eq!(
            a.summary,
            "still open after agent run (exit code 1, duration 2.0s)"
        );
    }
}
