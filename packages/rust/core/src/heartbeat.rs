//! Liveness heartbeats for long-running stages.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use kbingest_shared::{ProgressEvent, ProgressSink, Stage};

pub const HEARTBEAT_MESSAGE: &str = "Background task still running...";

/// Emits a synthetic progress event when nothing has been reported for a
/// full interval.
pub struct HeartbeatManager {
    interval: Duration,
    sink: Option<Arc<dyn ProgressSink>>,
    last_heartbeat: Mutex<Instant>,
}

impl HeartbeatManager {
    pub fn new(interval: Duration, sink: Option<Arc<dyn ProgressSink>>) -> Self {
        Self {
            interval,
            sink,
            last_heartbeat: Mutex::new(Instant::now()),
        }
    }

    /// Send a heartbeat if at least one interval has passed since the last
    /// heartbeat or reset. Returns whether one was sent.
    pub async fn send_if_needed(&self, stage: Stage, progress: u8) -> bool {
        let Some(sink) = &self.sink else {
            return false;
        };

        {
            let mut last = self
                .last_heartbeat
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            if now.duration_since(*last) < self.interval {
                return false;
            }
            *last = now;
        }

        trace!(%stage, progress, "sending heartbeat");
        let mut event = ProgressEvent::new(stage, progress, HEARTBEAT_MESSAGE);
        event.heartbeat = true;
        sink.send(event).await;
        true
    }

    /// Restart the interval, typically after a real progress event.
    pub fn reset(&self) {
        *self
            .last_heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }
}
