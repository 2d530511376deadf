//! Progress mapping and composable progress sinks.
//!
//! Each pipeline stage reports its own 0–100 progress. [`ProgressMapper`]
//! places that inside the stage's share of the overall run so the client sees
//! a single bar that never moves backwards. The sinks here are small wrappers
//! that are stacked per stage (throttle, stage tag, map) in front of the
//! caller's sink.

use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use kbingest_shared::{ProgressEvent, ProgressSink, Stage};

use crate::heartbeat::HeartbeatManager;

/// Minimum change in percent that is worth forwarding within a stage.
const SIGNIFICANT_DELTA: u8 = 5;

// ---------------------------------------------------------------------------
// Stage mapping
// ---------------------------------------------------------------------------

/// Overall `[start, end]` percent allotted to a stage. Terminal error stages
/// have none.
pub fn stage_range(stage: Stage) -> Option<(u8, u8)> {
    match stage {
        Stage::Starting => Some((0, 1)),
        Stage::Analyzing => Some((1, 3)),
        Stage::Crawling => Some((3, 15)),
        Stage::Processing => Some((15, 20)),
        Stage::DocumentStorage => Some((20, 40)),
        Stage::CodeExtraction => Some((40, 90)),
        Stage::Finalization => Some((90, 100)),
        Stage::Completed => Some((100, 100)),
        Stage::Failed | Stage::Cancelled => None,
    }
}

/// Map stage-local progress (clamped to 0–100) to overall progress, rounded.
pub fn map_progress(stage: Stage, local: u8) -> Option<u8> {
    let (start, end) = stage_range(stage)?;
    let local = u32::from(local.min(100));
    let span = u32::from(end - start);
    Some(start + ((span * local + 50) / 100) as u8)
}

/// Monotonic stage-to-overall progress mapper.
#[derive(Debug, Default)]
pub struct ProgressMapper {
    last: AtomicU8,
}

impl ProgressMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overall progress for a stage-local value. Never lower than a value
    /// returned before; stages without a range return the current value.
    pub fn map(&self, stage: Stage, local: u8) -> u8 {
        match map_progress(stage, local) {
            Some(mapped) => {
                let previous = self.last.fetch_max(mapped, Ordering::SeqCst);
                previous.max(mapped)
            }
            None => self.current(),
        }
    }

    pub fn current(&self) -> u8 {
        self.last.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Throttling
// ---------------------------------------------------------------------------

/// Whether an update differs enough from the last forwarded one to be sent.
///
/// True on the first update, on a stage change, at 0 and 100, and when the
/// value moved by at least five points in either direction.
pub fn is_significant_update(last: Option<(Stage, u8)>, stage: Stage, progress: u8) -> bool {
    let Some((last_stage, last_progress)) = last else {
        return true;
    };
    last_stage != stage
        || progress == 0
        || progress == 100
        || progress.abs_diff(last_progress) >= SIGNIFICANT_DELTA
}

/// Drops updates that are not significant relative to the last forwarded one.
/// Heartbeats always pass.
pub struct ThrottledSink<'a> {
    inner: &'a dyn ProgressSink,
    last_forwarded: Mutex<Option<(Stage, u8)>>,
}

impl<'a> ThrottledSink<'a> {
    pub fn new(inner: &'a dyn ProgressSink) -> Self {
        Self {
            inner,
            last_forwarded: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ProgressSink for ThrottledSink<'_> {
    async fn send(&self, event: ProgressEvent) {
        if !event.heartbeat {
            let mut last = self
                .last_forwarded
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !is_significant_update(*last, event.stage, event.progress) {
                return;
            }
            *last = Some((event.stage, event.progress));
        }
        self.inner.send(event).await;
    }
}

// ---------------------------------------------------------------------------
// Rewriting sinks
// ---------------------------------------------------------------------------

/// Forces every event onto one stage and page total.
pub struct StageTaggedSink<'a> {
    inner: &'a dyn ProgressSink,
    stage: Stage,
    total_pages: usize,
}

impl<'a> StageTaggedSink<'a> {
    pub fn new(inner: &'a dyn ProgressSink, stage: Stage, total_pages: usize) -> Self {
        Self {
            inner,
            stage,
            total_pages,
        }
    }
}

#[async_trait]
impl ProgressSink for StageTaggedSink<'_> {
    async fn send(&self, mut event: ProgressEvent) {
        event.stage = self.stage;
        event.total_pages = Some(self.total_pages);
        self.inner.send(event).await;
    }
}

/// Converts stage-local progress to overall progress and marks the run as
/// alive for the heartbeat.
pub struct MappedSink<'a> {
    inner: &'a dyn ProgressSink,
    mapper: &'a ProgressMapper,
    heartbeat: &'a HeartbeatManager,
}

impl<'a> MappedSink<'a> {
    pub fn new(
        inner: &'a dyn ProgressSink,
        mapper: &'a ProgressMapper,
        heartbeat: &'a HeartbeatManager,
    ) -> Self {
        Self {
            inner,
            mapper,
            heartbeat,
        }
    }
}

#[async_trait]
impl ProgressSink for MappedSink<'_> {
    async fn send(&self, mut event: ProgressEvent) {
        event.progress = self.mapper.map(event.stage, event.progress);
        self.inner.send(event).await;
        self.heartbeat.reset();
    }
}

// ---------------------------------------------------------------------------
// Terminal sinks
// ---------------------------------------------------------------------------

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl ProgressSink for NullSink {
    async fn send(&self, _event: ProgressEvent) {}
}

/// Forwards events into a tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ProgressSink for ChannelSink {
    async fn send(&self, event: ProgressEvent) {
        if self.tx.send(event).await.is_err() {
            debug!("progress receiver dropped, discarding event");
        }
    }
}
