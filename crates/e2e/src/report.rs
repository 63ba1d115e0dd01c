//! Logs assertion events while a suite runs

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use viewcheck_core::AssertViewEvent;

/// Background task that logs every event until the emitter goes away
pub struct EventReporter {
    handle: JoinHandle<usize>,
}

impl EventReporter {
    pub fn spawn(mut events: broadcast::Receiver<AssertViewEvent>) -> Self {
        let handle = tokio::spawn(async move {
            let mut logged = 0;
            loop {
                match events.recv().await {
                    Ok(event) => {
                        log_event(&event);
                        logged += 1;
                    }
                    Err(RecvError::Lagged(skipped)) => warn!("Event reporter skipped {} events", skipped),
                    Err(RecvError::Closed) => break,
                }
            }
            logged
        });
        Self { handle }
    }

    /// Wait for the reporter to drain; `None` if the task failed
    pub async fn finish(self) -> Option<usize> {
        join_reporter(self.handle).await
    }
}

fn log_event(event: &AssertViewEvent) {
    match event {
        AssertViewEvent::NewBaseline {
            state_name,
            reference_path,
            ..
        } => info!("New baseline '{}': {}", state_name, reference_path.display()),
        AssertViewEvent::MismatchFound {
            state_name,
            diff_bounds,
            ..
        } => warn!("Mismatch in '{}': {:?}", state_name, diff_bounds),
        AssertViewEvent::ReferenceUpdated {
            state_name,
            reference_path,
            ..
        } => info!("Updated reference '{}': {}", state_name, reference_path.display()),
    }
}

async fn join_reporter(handle: JoinHandle<usize>) -> Option<usize> {
    match handle.await {
        Ok(logged) => Some(logged),
        Err(e) => {
            warn!("Event reporter failed: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use viewcheck_core::{EventEmitter, TestIdentity};

    #[tokio::test]
    async fn test_reporter_drains_until_emitter_dropped() {
        let emitter = EventEmitter::default();
        let reporter = EventReporter::spawn(emitter.subscribe());

        for state in ["header", "footer"] {
            emitter.emit(AssertViewEvent::ReferenceUpdated {
                test: TestIdentity::new("t", "f", "chromium"),
                state_name: state.into(),
                reference_path: PathBuf::from(format!("ref/{}.png", state)),
            });
        }
        drop(emitter);

        assert_eq!(reporter.finish().await, Some(2));
    }

    #[tokio::test]
    async fn test_panicked_reporter_is_reported() {
        let handle = tokio::spawn(async {
            if true {
                panic!("reporter crashed");
            }
            0
        });
        assert_eq!(join_reporter(handle).await, None);
    }
}
