//! GenICam-style camera control and streaming.
//!
//! Opens a device, reads and writes its named features, drives acquisition
//! and delivers frames through bounded buffer streams. The device side sits
//! behind the [`Transport`] trait; the bundled [`sim`] backend provides
//! simulated GigE Vision and USB3 Vision cameras.
//!
//! # Architecture
//!
//! ```text
//!                 ┌── ParameterStore ──┐
//!   Camera ──────►├── Acquisition ─────┼──► Session ──► Transport (device)
//!     │           └── TransportTuning ─┘                    │
//!     └── create_stream ──► Stream ◄──── StreamSink ◄───────┘
//! ```
//!
//! # Design Principles
//!
//! - **One control lock per device**: feature writes, start, stop and abort
//!   serialize on it; frame delivery never takes it
//! - **Mode changes only while idle**: stream-shaping features are refused
//!   during acquisition with [`Error::ModeChangeWhileActive`]
//! - **Bounded buffering**: a stream cycles a fixed buffer set; a producer
//!   with no empty buffer drops the frame and counts an underrun
//!
//! # Example
//!
//! ```no_run
//! use gencam::{open_device, Region, TriggerSource};
//! use std::time::Duration;
//!
//! let camera = open_device(Some("sim0")).unwrap();
//! camera.parameters().set_region(Region::new(0, 0, 640, 480)).unwrap();
//!
//! let stream = camera.create_stream(4).unwrap();
//! let acquisition = camera.acquisition();
//! acquisition.set_trigger(&TriggerSource::Software).unwrap();
//! acquisition.start().unwrap();
//!
//! acquisition.software_trigger().unwrap();
//! let frame = stream.pop(Duration::from_secs(1)).unwrap();
//! assert_eq!(frame.size(), camera.payload_size().unwrap());
//! drop(frame);
//!
//! acquisition.stop().unwrap();
//! camera.close().unwrap();
//! ```

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod acquisition;
pub mod camera;
pub mod config;
pub mod error;
pub mod features;
pub mod metrics;
pub mod sim;
pub mod stream;
pub mod transport;

// Re-export commonly used types at crate root
pub use acquisition::{AcquisitionController, AcquisitionMode, AcquisitionState, TriggerSource};
pub use camera::{open_device, Camera, DeviceInfo};
pub use config::{CameraConfig, ConfigError, FileConfig};
pub use error::{Error, Origin, Result};
pub use features::{AutoMode, Bounds, FeatureKind, FeatureValue, ParameterStore, PixelFormat, Region};
pub use sim::{SimCamera, SimModel, Simulator};
pub use stream::{Frame, FrameInfo, FrameStatus, Stream, StreamStatistics};
pub use transport::{Transport, TransportKind, TransportTuning};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
