use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::download::{Phase, TransferSnapshot};

/// How far the warm-up animation may carry the bar while job submission is
/// outstanding.
pub const PREPARE_CEILING: f32 = 30.0;
/// How far the polling animation may carry the bar while waiting for the
/// file to exist on the server.
pub const POLL_CEILING: f32 = 85.0;
/// The byte transfer owns the upper half of the bar.
pub const TRANSFER_FLOOR: f32 = 50.0;

/// One warm-up tick: approach the ceiling by 12% of the remaining distance,
/// at least half a point per tick, never past the ceiling.
pub fn warmup_step(current: f32, ceiling: f32) -> f32 {
    if current >= ceiling {
        return current;
    }
    let next = current + f32::max(0.5, (ceiling - current) * 0.12);
    next.min(ceiling)
}

/// Polling-phase pacing: advance from the entry value toward the ceiling by
/// the fraction of the poll window that has elapsed, independent of how the
/// actual existence checks are going.
pub fn poll_pace(base: f32, elapsed: Duration, window: Duration, ceiling: f32) -> f32 {
    let window_secs = window.as_secs_f32().max(f32::EPSILON);
    let fraction = (elapsed.as_secs_f32() / window_secs).min(1.0);
    (base + fraction * (ceiling - base)).round()
}

/// Transfer-phase pacing: a known total maps the completion fraction onto
/// 50..100; an unknown total nudges gently, capped at 99 until the stream
/// actually ends.
pub fn transfer_pace(received: u64, total: u64, current: f32) -> f32 {
    if total > 0 {
        let fraction = (received as f64 / total as f64).min(1.0);
        (TRANSFER_FLOOR as f64 + fraction * 100.0 * 0.5) as f32
    } else {
        (current + 0.2).min(99.0)
    }
}

/// Owns the live snapshot of one run and publishes every change. All
/// progress writes clamp against the current value, so the bar can only move
/// forward for the lifetime of a run; the single exception is the hard reset
/// when a new run begins. Once a terminal phase is reached, further writes
/// are dropped, so a straggling timer or stream callback can never touch the
/// snapshot after the run has ended. One gauge serves exactly one run.
pub struct TransferGauge {
    state: Mutex<TransferSnapshot>,
    sink: Box<dyn Fn(TransferSnapshot) + Send + Sync>,
}

impl TransferGauge {
    pub fn new(run_id: impl Into<String>, sink: Box<dyn Fn(TransferSnapshot) + Send + Sync>) -> Self {
        Self {
            state: Mutex::new(TransferSnapshot::new(run_id)),
            sink,
        }
    }

    fn mutate(&self, apply: impl FnOnce(&mut TransferSnapshot)) {
        let snapshot = {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if state.phase.is_terminal() {
                return;
            }
            apply(&mut state);
            state.clone()
        };
        (self.sink)(snapshot);
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Hard reset at run entry; the only permitted backwards move.
    pub fn begin(&self, message: &str) {
        self.mutate(|state| {
            state.phase = Phase::Preparing;
            state.progress = 2.0;
            state.downloaded_bytes = 0;
            state.total_bytes = 0;
            state.speed_bps = 0.0;
            state.filename = None;
            state.message = Some(message.to_string());
            state.error = None;
            state.started_at = chrono::Utc::now();
        });
    }

    pub fn set_phase(&self, phase: Phase, message: Option<&str>) {
        self.mutate(|state| {
            state.phase = phase;
            state.message = message.map(str::to_string);
        });
    }

    /// Raise the bar to `value` if that is forward motion; otherwise keep
    /// the current value.
    pub fn raise_to(&self, value: f32) {
        self.mutate(|state| {
            state.progress = state.progress.max(value.min(100.0));
        });
    }

    /// Apply a pacing function to the current value, clamped forward.
    pub fn advance(&self, pace: impl FnOnce(f32) -> f32) {
        self.mutate(|state| {
            let next = pace(state.progress).min(100.0);
            state.progress = state.progress.max(next);
        });
    }

    pub fn set_total_bytes(&self, total: u64) {
        if total == 0 {
            return;
        }
        self.mutate(|state| state.total_bytes = total);
    }

    pub fn update_bytes(&self, received: u64) {
        self.mutate(|state| state.downloaded_bytes = received);
    }

    pub fn set_speed(&self, bps: f64) {
        self.mutate(|state| state.speed_bps = bps);
    }

    pub fn set_filename(&self, name: &str) {
        self.mutate(|state| state.filename = Some(name.to_string()));
    }

    pub fn complete(&self, message: &str) {
        self.mutate(|state| {
            state.phase = Phase::Done;
            state.progress = 100.0;
            state.speed_bps = 0.0;
            state.message = Some(message.to_string());
            state.error = None;
        });
    }

    /// Terminal cancel: progress and byte counts keep their last values.
    pub fn cancelled(&self) {
        self.mutate(|state| {
            state.phase = Phase::Cancelled;
            state.message = Some("Cancelled by user.".to_string());
            state.error = None;
        });
    }

    /// Terminal failure: progress and byte counts keep their last values.
    pub fn fail(&self, error: &str) {
        self.mutate(|state| {
            state.phase = Phase::Failed;
            state.message = None;
            state.error = Some(error.to_string());
        });
    }
}

/// Instantaneous transfer speed, sampled at most every `min_interval` so the
/// readout is steady instead of flickering on every chunk.
pub struct SpeedMeter {
    last_bytes: u64,
    last_sample: Instant,
    min_interval: Duration,
}

impl SpeedMeter {
    pub fn start(now: Instant) -> Self {
        Self {
            last_bytes: 0,
            last_sample: now,
            min_interval: Duration::from_millis(250),
        }
    }

    /// Returns a new bytes-per-second figure when enough time has passed
    /// since the previous sample, None otherwise.
    pub fn sample(&mut self, received: u64, now: Instant) -> Option<f64> {
        let elapsed = now.saturating_duration_since(self.last_sample);
        if elapsed < self.min_interval {
            return None;
        }
        let bytes = received.saturating_sub(self.last_bytes);
        let bps = bytes as f64 / elapsed.as_secs_f64();
        self.last_bytes = received;
        self.last_sample = now;
        Some(bps)
    }
}
