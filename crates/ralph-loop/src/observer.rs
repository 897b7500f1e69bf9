//! Progress observer fabric.
//!
//! Orchestrators narrate their lifecycle through a [`ProgressObserver`].
//! [`MultiObserver`] fans each callback out to every registered sink
//! under panic isolation, so a misbehaving sink can never stall the
//! loop or its siblings. Within one iteration the delivery order is
//! `on_iteration_start`, `on_bead_start`, any number of tool events,
//! `on_bead_complete`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use crate::beads_bridge::Bead;
use crate::stream_events::ToolEvent;
use crate::types::{BeadResult, RunSummary};

/// Lifecycle callbacks for one orchestrator run. All methods default to
/// no-ops so sinks implement only what they care about.
pub trait ProgressObserver: Send + Sync {
    fn on_loop_start(&self, _root: &Path) {}
    fn on_iteration_start(&self, _iteration: u32) {}
    fn on_bead_start(&self, _bead: &Bead) {}
    fn on_tool_start(&self, _event: &ToolEvent) {}
    fn on_tool_end(&self, _event: &ToolEvent) {}
    fn on_bead_complete(&self, _result: &BeadResult) {}
    fn on_loop_end(&self, _summary: &RunSummary) {}
}

/// Fan-out over a set of observers, skipping absent members.
pub struct MultiObserver {
    observers: Vec<Arc<dyn ProgressObserver>>,
}

impl MultiObserver {
    /// Build from optional members; `None` entries are dropped.
    pub fn new(members: Vec<Option<Arc<dyn ProgressObserver>>>) -> Self {
        Self {
            observers: members.into_iter().flatten().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    fn each(&self, hook: &'static str, call: impl Fn(&dyn ProgressObserver)) {
        for observer in &self.observers {
            if catch_unwind(AssertUnwindSafe(|| call(observer.as_ref()))).is_err() {
                warn!(hook, "progress observer panicked, continuing");
            }
        }
    }
}

impl ProgressObserver for MultiObserver {
    fn on_loop_start(&self, root: &Path) {
        self.each("on_loop_start", |o| o.on_loop_start(root));
    }

    fn on_iteration_start(&self, iteration: u32) {
        self.each("on_iteration_start", |o| o.on_iteration_start(iteration));
    }

    fn on_bead_start(&self, bead: &Bead) {
        self.each("on_bead_start", |o| o.on_bead_start(bead));
    }

    fn on_tool_start(&self, event: &ToolEvent) {
        self.each("on_tool_start", |o| o.on_tool_start(event));
    }

    fn on_tool_end(&self, event: &ToolEvent) {
        self.each("on_tool_end", |o| o.on_tool_end(event));
    }

    fn on_bead_complete(&self, result: &BeadResult) {
        self.each("on_bead_complete", |o| o.on_bead_complete(result));
    }

    fn on_loop_end(&self, summary: &RunSummary) {
        self.each("on_loop_end", |o| o.on_loop_end(summary));
    }
}

/// Adapt an observer into the callback shape the stream decorator
/// expects: `started` events land on `on_tool_start`, the rest on
/// `on_tool_end`.
pub fn tool_event_dispatcher(
    observer: Arc<dyn ProgressObserver>,
) -> Box<dyn FnMut(ToolEvent) + Send> {
    Box::new(move |event| {
        if event.started {
            observer.on_tool_start(&event);
        } else {
            observer.on_tool_end(&event);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<String>>,
    }

    impl ProgressObserver for Recording {
        fn on_loop_start(&self, _root: &Path) {
            self.calls.lock().unwrap().push("loop_start".into());
        }
        fn on_iteration_start(&self, n: u32) {
            self.calls.lock().unwrap().push(format!("iter {n}"));
        }
        fn on_tool_start(&self, event: &ToolEvent) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("tool_start {}", event.name));
        }
        fn on_tool_end(&self, event: &ToolEvent) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("tool_end {}", event.name));
        }
    }

    struct Panicking;

    impl ProgressObserver for Panicking {
        fn on_iteration_start(&self, _n: u32) {
            panic!("sink blew up");
        }
    }

    fn event(name: &str, started: bool) -> ToolEvent {
        ToolEvent {
            name: name.to_string(),
            started,
            timestamp: Instant::now(),
            attributes: HashMap::new(),
        }
    }

    #[test]
    fn nil_members_are_filtered_out() {
        let recording = Arc::new(Recording::default());
        let multi = MultiObserver::new(vec![
            None,
            Some(recording.clone() as Arc<dyn ProgressObserver>),
            None,
        ]);
        assert_eq!(multi.len(), 1);
        multi.on_iteration_start(1);
        assert_eq!(*recording.calls.lock().unwrap(), vec!["iter 1"]);
    }

    #[test]
    fn a_panicking_sink_does_not_block_siblings() {
        let recording = Arc::new(Recording::default());
        let multi = MultiObserver::new(vec![
            Some(Arc::new(Panicking) as Arc<dyn ProgressObserver>),
            Some(recording.clone() as Arc<dyn ProgressObserver>),
        ]);
        multi.on_iteration_start(7);
        multi.on_iteration_start(8);
        assert_eq!(*recording.calls.lock().unwrap(), vec!["iter 7", "iter 8"]);
    }

    #[test]
    fn dispatcher_routes_by_started_flag() {
        let recording = Arc::new(Recording::default());
        let mut dispatch = tool_event_dispatcher(recording.clone());
        dispatch(event("bash", true));
        dispatch(event("bash", false));
        dispatch(event("edit", true));
        assert_eq!(
            *recording.calls.lock().unwrap(),
            vec!["tool_start bash", "tool_end bash", "tool_start edit"]
        );
    }
}
