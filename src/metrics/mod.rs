//! Prometheus metrics for camera acquisition.
//!
//! # Metrics Exposed
//!
//! - `gencam_acquisition_state` - 0 idle, 1 armed, 2 acquiring, 3 aborting
//! - `gencam_frames_completed_total` - Frames delivered complete
//! - `gencam_frame_failures_total` - Frames lost or delivered incomplete
//! - `gencam_buffer_underruns_total` - Frames dropped for lack of an empty buffer
//! - `gencam_pop_timeouts_total` - Stream pops that returned without a frame
//! - `gencam_payload_size_bytes` - Current payload size
//! - `gencam_frame_rate` - Configured frame rate
//!
//! With the `metrics` feature, `MetricsServer` serves them over HTTP.
//!
//! # Example
//!
//! ```no_run
//! use gencam::metrics::{MetricsRegistry, MetricsSnapshot};
//! use gencam::open_device;
//!
//! let camera = open_device(Some("sim0")).unwrap();
//! let stream = camera.create_stream(4).unwrap();
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//!
//! let snapshot = MetricsSnapshot::from_components(
//!     &stream.statistics(),
//!     camera.acquisition().state(),
//!     camera.payload_size().unwrap(),
//!     camera.parameters().frame_rate().unwrap(),
//! );
//! registry.update(&snapshot);
//! ```

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{MetricsError, MetricsRegistry, MetricsSnapshot};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, MetricsServerConfig, MetricsState, ServerError};
