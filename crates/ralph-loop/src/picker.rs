//! Bead selection.
//!
//! Three picking strategies over the tracker: the generic ready picker,
//! an epic-scoped variant, and a fixed-target picker for single-bead
//! runs. The fixed-target picker keeps returning its bead until the
//! tracker shows it closed, so a failed attempt can be retried (and the
//! loop's same-bead guard decides whether to).

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::beads_bridge::{Bead, Tracker};

enum PickMode {
    Ready,
    Epic(String),
    Target(String),
}

/// Picks the next bead to work.
pub struct BeadPicker {
    tracker: Arc<dyn Tracker>,
    mode: PickMode,
}

impl BeadPicker {
    /// First bead of `bd ready`.
    pub fn ready(tracker: Arc<dyn Tracker>) -> Self {
        Self {
            tracker,
            mode: PickMode::Ready,
        }
    }

    /// First ready bead under an epic.
    pub fn epic(tracker: Arc<dyn Tracker>, epic: impl Into<String>) -> Self {
        Self {
            tracker,
            mode: PickMode::Epic(epic.into()),
        }
    }

    /// Always the given bead, until the tracker closes it.
    pub fn target(tracker: Arc<dyn Tracker>, bead_id: impl Into<String>) -> Self {
        Self {
            tracker,
            mode: PickMode::Target(bead_id.into()),
        }
    }

    pub async fn pick_next(&self) -> Result<Option<Bead>> {
        let picked = match &self.mode {
            PickMode::Ready => self.first_ready(None).await?,
            PickMode::Epic(epic) => self.first_ready(Some(epic)).await?,
            PickMode::Target(id) => {
                let show = self.tracker.show(id).await?;
                if show.is_closed() {
                    None
                } else {
                    Some(Bead {
                        id: show.id,
                        title: show.title,
                        status: show.status,
                    })
                }
            }
        };
        if let Some(bead) = &picked {
            debug!(id = %bead.id, title = %bead.title, "picked bead");
        }
        Ok(picked)
    }

    async fn first_ready(&self, epic: Option<&str>) -> Result<Option<Bead>> {
        let mut beads = self.tracker.ready(epic).await?;
        if beads.is_empty() {
            return Ok(None);
        }
        Ok(Some(beads.remove(0)))
    }
}
