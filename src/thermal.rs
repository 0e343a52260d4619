//! Thermal policy: rolling temperature statistics, status transitions with an
//! alarm latch, and the window angle derived from them.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::ThermalConfig;
use crate::state::{Degree, Status, SystemState, WINDOW_CLOSED, WINDOW_FULLY_OPEN};

/// Temperature band boundaries, `hot < too_hot`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub hot: f64,
    pub too_hot: f64,
}

/// Fixed-capacity FIFO of the most recent samples.
#[derive(Debug, Clone)]
pub struct TemperatureHistory {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl TemperatureHistory {
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "temperature history capacity must be > 0");
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, temp: f64) {
        self.samples.push_back(temp);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn min(&self) -> f64 {
        self.samples.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn max(&self) -> f64 {
        self.samples.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }
}

/// Window angle for a status. Pure in `(status, temp, thresholds)`.
///
/// The hot band interpolates `(temp - t1) * t2 / (t2 - t1)` and clamps to
/// `[0, 90]`; the fractional part is truncated.
pub fn window_target(status: Status, temp: f64, thresholds: Thresholds) -> Degree {
    match status {
        Status::Alarm | Status::TooHot => WINDOW_FULLY_OPEN,
        Status::Hot => {
            let span = thresholds.too_hot - thresholds.hot;
            let angle = (temp - thresholds.hot) * thresholds.too_hot / span;
            angle.clamp(WINDOW_CLOSED as f64, WINDOW_FULLY_OPEN as f64) as Degree
        }
        Status::Normal => WINDOW_CLOSED,
    }
}

/// Policy engine. Owns the history window; the dwell timer lives in
/// [`SystemState::too_hot_entered_at`].
#[derive(Debug, Clone)]
pub struct ThermalPolicy {
    thresholds: Thresholds,
    normal_interval: Duration,
    fast_interval: Duration,
    alarm_dwell: Duration,
    history: TemperatureHistory,
}

impl ThermalPolicy {
    pub fn new(config: &ThermalConfig) -> Self {
        Self {
            thresholds: Thresholds {
                hot: config.hot_threshold,
                too_hot: config.too_hot_threshold,
            },
            normal_interval: Duration::from_millis(config.normal_interval_ms),
            fast_interval: Duration::from_millis(config.fast_interval_ms),
            alarm_dwell: Duration::from_millis(config.alarm_dwell_ms),
            history: TemperatureHistory::new(config.history_size),
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn normal_interval(&self) -> Duration {
        self.normal_interval
    }

    pub fn history(&self) -> &TemperatureHistory {
        &self.history
    }

    /// Fold a new sample into `state`. Returns the new sampling interval
    /// when it differs from the previous one.
    pub fn ingest(&mut self, state: &mut SystemState, temp: f64, now: Instant) -> Option<Duration> {
        let old_status = state.status;
        let old_interval = state.sampling_interval;

        self.history.push(temp);
        state.current_temp = temp;
        state.min_temp = self.history.min();
        state.max_temp = self.history.max();
        state.average_temp = self.history.average();

        if state.status != Status::Alarm {
            self.classify(state, temp, now);
        }
        state.command_window_position = window_target(state.status, temp, self.thresholds);

        if state.status != old_status {
            tracing::warn!("Status change {} -> {} (temp {:.1}°C)", old_status, state.status, temp);
        }
        interval_change(state, old_interval)
    }

    fn interval_for(&self, temp: f64) -> Duration {
        if temp <= self.thresholds.hot {
            self.normal_interval
        } else {
            self.fast_interval
        }
    }

    fn classify(&self, state: &mut SystemState, temp: f64, now: Instant) {
        state.sampling_interval = self.interval_for(temp);
        if temp <= self.thresholds.hot {
            state.set_status(Status::Normal);
            state.too_hot_entered_at = None;
        } else if temp <= self.thresholds.too_hot {
            state.set_status(Status::Hot);
            state.too_hot_entered_at = None;
        } else {
            state.set_status(Status::TooHot);
            let entered = *state.too_hot_entered_at.get_or_insert(now);
            if now.saturating_duration_since(entered) >= self.alarm_dwell {
                tracing::error!("Temperature too high for {:?}, raising alarm", self.alarm_dwell);
                state.set_status(Status::Alarm);
                state.too_hot_entered_at = None;
            }
        }
    }

    /// Leave `Alarm` for `Normal`, recompute the window target and re-derive
    /// the sampling interval from the current temperature. Returns the new
    /// interval when it changed.
    pub fn clear_alarm(&self, state: &mut SystemState) -> Option<Duration> {
        let old_interval = state.sampling_interval;
        state.set_status(Status::Normal);
        state.too_hot_entered_at = None;
        state.sampling_interval = self.interval_for(state.current_temp);
        state.command_window_position =
            window_target(state.status, state.current_temp, self.thresholds);
        tracing::info!("Alarm cleared (temp {:.1}°C)", state.current_temp);
        interval_change(state, old_interval)
    }
}

fn interval_change(state: &SystemState, old_interval: Duration) -> Option<Duration> {
    if state.sampling_interval == old_interval {
        return None;
    }
    tracing::info!("Sampling interval changed to {:?}", state.sampling_interval);
    Some(state.sampling_interval)
}
