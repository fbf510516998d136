use std::time::Duration;

use crate::ServerDescription;

/// Smoothing factor applied to each new round-trip sample.
const ROUND_TRIP_TIME_ALPHA: f64 = 0.2;

#[derive(Debug, Clone)]
pub struct ServerMonitorSettings {
    /// Time between two scheduled heartbeats.
    pub heartbeat_frequency: Duration,
    /// Floor between two heartbeats when a check is requested early.
    pub min_heartbeat_frequency: Duration,
}

impl Default for ServerMonitorSettings {
    fn default() -> Self {
        Self {
            heartbeat_frequency: Duration::from_secs(10),
            min_heartbeat_frequency: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ServerMonitorState {
    /// Waiting for the next scheduled or requested heartbeat.
    #[default]
    Idle,
    Heartbeating,
    /// Stopped for good.
    Closed,
}

/// Emitted by a monitor after every heartbeat attempt, changed or not.
#[derive(Debug, Clone)]
pub struct ServerDescriptionChangedEvent {
    pub previous: ServerDescription,
    pub current: ServerDescription,
}

impl ServerDescriptionChangedEvent {
    /// False when only the latency moved.
    pub fn is_material(&self) -> bool {
        !self.previous.is_materially_equal(&self.current)
    }
}

/// Exponentially weighted moving average of round-trip times, in nanoseconds.
#[derive(Debug, Clone)]
pub(crate) struct ExponentiallyWeightedMovingAverage {
    alpha: f64,
    average: u64,
}

impl Default for ExponentiallyWeightedMovingAverage {
    fn default() -> Self {
        Self::new(ROUND_TRIP_TIME_ALPHA)
    }
}

impl ExponentiallyWeightedMovingAverage {
    pub(crate) fn new(alpha: f64) -> Self {
        Self { alpha, average: 0 }
    }

    pub(crate) fn reset(&mut self) {
        self.average = 0;
    }

    pub(crate) fn average(&self) -> u64 {
        self.average
    }

    /// Folds `sample` into the average and returns the new average.
    pub(crate) fn add_sample(&mut self, sample: u64) -> u64 {
        self.average = if self.average == 0 {
            sample
        } else {
            (self.average as f64 * (1.0 - self.alpha) + sample as f64 * self.alpha).round() as u64
        };
        self.average
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_becomes_the_average() {
        let mut average = ExponentiallyWeightedMovingAverage::default();

        assert_eq!(average.add_sample(1_000), 1_000);
    }

    #[test]
    fn later_samples_are_weighted_by_alpha() {
        let mut average = ExponentiallyWeightedMovingAverage::default();
        average.add_sample(1_000);

        assert_eq!(average.add_sample(2_000), 1_200);
        assert_eq!(average.add_sample(2_000), 1_360);
    }

    #[test]
    fn reset_starts_over() {
        let mut average = ExponentiallyWeightedMovingAverage::default();
        average.add_sample(1_000);
        average.add_sample(5_000);

        average.reset();

        assert_eq!(average.average(), 0);
        assert_eq!(average.add_sample(7_000), 7_000);
    }
}
