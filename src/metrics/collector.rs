//! Metrics collection and registry.

use crate::acquisition::AcquisitionState;
use crate::stream::StreamStatistics;
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// A snapshot of camera and stream state for a metrics update.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Acquisition state as its numeric code (0 idle, 1 armed, 2 acquiring, 3 aborting).
    pub acquisition_state: u8,
    /// Frames delivered complete.
    pub frames_completed: u64,
    /// Frames lost or delivered incomplete.
    pub frame_failures: u64,
    /// Frames dropped because no empty buffer was queued.
    pub underruns: u64,
    /// Pops that timed out.
    pub timeouts: u64,
    /// Current payload size in bytes.
    pub payload_size: usize,
    /// Configured frame rate.
    pub frame_rate: f64,
}

/// Prometheus metrics registry for one camera.
pub struct MetricsRegistry {
    registry: Registry,

    acquisition_state: IntGauge,

    // Stream counters
    frames_completed: IntCounter,
    frame_failures: IntCounter,
    underruns: IntCounter,
    timeouts: IntCounter,

    // Device settings
    payload_size: IntGauge,
    frame_rate: Gauge,
}

impl MetricsRegistry {
    /// Creates a new registry with all camera metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let acquisition_state = IntGauge::new(
            "gencam_acquisition_state",
            "Acquisition state (0=idle, 1=armed, 2=acquiring, 3=aborting)",
        )?;

        let frames_completed = IntCounter::new(
            "gencam_frames_completed_total",
            "Frames delivered complete",
        )?;
        let frame_failures = IntCounter::new(
            "gencam_frame_failures_total",
            "Frames lost in transmission or delivered incomplete",
        )?;
        let underruns = IntCounter::new(
            "gencam_buffer_underruns_total",
            "Frames dropped because no empty buffer was available",
        )?;
        let timeouts = IntCounter::new(
            "gencam_pop_timeouts_total",
            "Stream pops that returned without a frame",
        )?;

        let payload_size = IntGauge::new(
            "gencam_payload_size_bytes",
            "Current payload size in bytes",
        )?;
        let frame_rate = Gauge::new(
            "gencam_frame_rate",
            "Configured acquisition frame rate",
        )?;

        registry.register(Box::new(acquisition_state.clone()))?;
        registry.register(Box::new(frames_completed.clone()))?;
        registry.register(Box::new(frame_failures.clone()))?;
        registry.register(Box::new(underruns.clone()))?;
        registry.register(Box::new(timeouts.clone()))?;
        registry.register(Box::new(payload_size.clone()))?;
        registry.register(Box::new(frame_rate.clone()))?;

        Ok(Self {
            registry,
            acquisition_state,
            frames_completed,
            frame_failures,
            underruns,
            timeouts,
            payload_size,
            frame_rate,
        })
    }

    /// Updates all metrics from a snapshot.
    pub fn update(&self, snapshot: &MetricsSnapshot) {
        self.acquisition_state.set(i64::from(snapshot.acquisition_state));

        // Counters only move forward by the difference
        advance(&self.frames_completed, snapshot.frames_completed);
        advance(&self.frame_failures, snapshot.frame_failures);
        advance(&self.underruns, snapshot.underruns);
        advance(&self.timeouts, snapshot.timeouts);

        self.payload_size.set(snapshot.payload_size as i64);
        self.frame_rate.set(snapshot.frame_rate);
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

impl MetricsSnapshot {
    /// Creates a snapshot from stream statistics and device state.
    pub fn from_components(
        stats: &StreamStatistics,
        state: AcquisitionState,
        payload_size: usize,
        frame_rate: f64,
    ) -> Self {
        Self {
            acquisition_state: state as u8,
            frames_completed: stats.completed,
            frame_failures: stats.failures,
            underruns: stats.underruns,
            timeouts: stats.timeouts,
            payload_size,
            frame_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_creation() {
        let registry = MetricsRegistry::new();
        assert!(registry.is_ok());
    }

    #[test]
    fn test_metrics_update() {
        let registry = MetricsRegistry::new().unwrap();
        let stats = StreamStatistics {
            completed: 12,
            failures: 1,
            underruns: 3,
            timeouts: 0,
        };

        registry.update(&MetricsSnapshot::from_components(
            &stats,
            AcquisitionState::Acquiring,
            307_200,
            30.0,
        ));

        let output = registry.encode().unwrap();
        assert!(output.contains("gencam_acquisition_state 2"));
        assert!(output.contains("gencam_frames_completed_total 12"));
        assert!(output.contains("gencam_buffer_underruns_total 3"));
        assert!(output.contains("gencam_payload_size_bytes 307200"));
    }

    #[test]
    fn test_counters_never_decrease() {
        let registry = MetricsRegistry::new().unwrap();
        let mut snapshot = MetricsSnapshot {
            frames_completed: 10,
            ..Default::default()
        };
        registry.update(&snapshot);
        snapshot.frames_completed = 4;
        registry.update(&snapshot);

        let output = registry.encode().unwrap();
        assert!(output.contains("gencam_frames_completed_total 10"));
    }
}
