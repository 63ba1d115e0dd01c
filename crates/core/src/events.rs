//! Notifications for reporters and UIs

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::debug;

use crate::types::{Rect, TestIdentity};

/// Something worth reporting happened during an assertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AssertViewEvent {
    /// No reference existed; the current image is the candidate baseline
    NewBaseline {
        test: TestIdentity,
        state_name: String,
        current_path: PathBuf,
        reference_path: PathBuf,
    },

    /// The current image differs from the reference
    MismatchFound {
        test: TestIdentity,
        state_name: String,
        current_path: PathBuf,
        reference_path: PathBuf,
        diff_bounds: Option<Rect>,
        diff_clusters: Vec<Rect>,
    },

    /// The reference was written from the current image
    ReferenceUpdated {
        test: TestIdentity,
        state_name: String,
        reference_path: PathBuf,
    },
}

impl AssertViewEvent {
    pub fn state_name(&self) -> &str {
        match self {
            AssertViewEvent::NewBaseline { state_name, .. }
            | AssertViewEvent::MismatchFound { state_name, .. }
            | AssertViewEvent::ReferenceUpdated { state_name, .. } => state_name,
        }
    }
}

/// Broadcasts assertion events to any number of subscribers.
///
/// Emitting never blocks and never fails: with no subscribers the event is
/// dropped, and slow subscribers observe a lag instead of stalling the run.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<AssertViewEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AssertViewEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: AssertViewEvent) {
        if self.sender.send(event).is_err() {
            debug!("No event subscribers");
        }
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
