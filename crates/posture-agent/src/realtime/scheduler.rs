// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Fixed-rate frame production
//!
//! At most one timer task exists per scheduler. Starting again replaces the
//! previous task; a generation check keeps a replaced task from delivering a
//! frame even if it was mid-tick when aborted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, trace};

use crate::error::{PostureAgentError, Result};
use crate::realtime::frame::{EncodedFrame, FrameSource};

/// Receives each captured frame
pub trait FrameSink: Send + Sync {
    fn send_frame(&self, frame: EncodedFrame);
}

struct ActiveLoop {
    handle: JoinHandle<()>,
    frames_per_second: f64,
}

#[derive(Default)]
pub struct FrameScheduler {
    active: Mutex<Option<ActiveLoop>>,
    generation: Arc<AtomicU64>,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start pulling `source` every `1 / frames_per_second` seconds
    ///
    /// The first capture happens one period after the call. Any previous loop
    /// is stopped first.
    pub fn start(
        &self,
        source: Arc<dyn FrameSource>,
        sink: Arc<dyn FrameSink>,
        frames_per_second: f64,
    ) -> Result<()> {
        let period = frame_period(frames_per_second)?;
        self.start_with_period(source, sink, frames_per_second, period)
    }

    /// Start with a period already produced by [`frame_period`]
    pub(crate) fn start_with_period(
        &self,
        source: Arc<dyn FrameSource>,
        sink: Arc<dyn FrameSink>,
        frames_per_second: f64,
        period: Duration,
    ) -> Result<()> {
        let runtime = Handle::try_current().map_err(|_| {
            PostureAgentError::InvalidConfig("frame loop requires a tokio runtime".to_string())
        })?;

        let mut active = self.active.lock();
        if let Some(previous) = active.take() {
            previous.handle.abort();
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let current = self.generation.clone();

        let handle = runtime.spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if current.load(Ordering::SeqCst) != generation {
                    break;
                }
                match source.capture() {
                    Some(frame) => sink.send_frame(frame),
                    None => trace!("[SCHEDULER] Source not ready; tick skipped"),
                }
            }
        });

        info!("[SCHEDULER] Frame loop started at {} fps", frames_per_second);
        *active = Some(ActiveLoop {
            handle,
            frames_per_second,
        });
        Ok(())
    }

    /// Cancel the active timer; no-op when none is running
    pub fn stop(&self) {
        let mut active = self.active.lock();
        if let Some(previous) = active.take() {
            self.generation.fetch_add(1, Ordering::SeqCst);
            previous.handle.abort();
            debug!("[SCHEDULER] Frame loop stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .map(|active| !active.handle.is_finished())
            .unwrap_or(false)
    }

    /// Rate of the active loop
    pub fn frames_per_second(&self) -> Option<f64> {
        self.active.lock().as_ref().map(|active| active.frames_per_second)
    }
}

/// Tick period for a capture rate
///
/// Rejects rates whose period is not representable as a non-zero `Duration`.
pub fn frame_period(frames_per_second: f64) -> Result<Duration> {
    if !frames_per_second.is_finite() || frames_per_second <= 0.0 {
        return Err(PostureAgentError::InvalidConfig(format!(
            "frame rate must be positive, got {}",
            frames_per_second
        )));
    }
    match Duration::try_from_secs_f64(1.0 / frames_per_second) {
        Ok(period) if !period.is_zero() => Ok(period),
        _ => Err(PostureAgentError::InvalidConfig(format!(
            "frame rate {} has no usable tick period",
            frames_per_second
        ))),
    }
}

impl Drop for FrameScheduler {
    fn drop(&mut self) {
        if let Some(previous) = self.active.get_mut().take() {
            previous.handle.abort();
        }
    }
}
