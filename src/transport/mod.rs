//! Device-side boundary.
//!
//! A [`Transport`] is whatever speaks to the camera: it exposes the device's
//! named features, executes commands and fills stream buffers. The client
//! layers above it (parameters, acquisition control, streams) enforce the
//! state rules; a transport only enforces what the device itself would.

mod tuning;

pub use tuning::TransportTuning;

use crate::camera::DeviceInfo;
use crate::error::Result;
use crate::features::{Bounds, FeatureKind, FeatureValue};
use crate::stream::StreamSink;
use serde::{Deserialize, Serialize};

/// Physical interface the device is attached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportKind {
    #[serde(rename = "gige")]
    GigEVision,
    #[serde(rename = "usb3")]
    Usb3Vision,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::GigEVision => f.write_str("GigE Vision"),
            TransportKind::Usb3Vision => f.write_str("USB3 Vision"),
        }
    }
}

/// Connection to one device.
///
/// Feature names follow the GenICam SFNC. Unknown names answer
/// [`Error::NotFound`](crate::Error::NotFound); names this model lacks answer
/// [`Error::Unsupported`](crate::Error::Unsupported).
pub trait Transport: Send + Sync {
    /// Identity reported when the connection was made.
    fn info(&self) -> &DeviceInfo;

    fn kind(&self) -> TransportKind;

    /// Interface type of a feature.
    fn feature_kind(&self, name: &str) -> Result<FeatureKind>;

    /// Reads the current value of a feature.
    fn read(&self, name: &str) -> Result<FeatureValue>;

    /// Writes a feature. The device validates range and access.
    fn write(&self, name: &str, value: FeatureValue) -> Result<()>;

    fn integer_bounds(&self, name: &str) -> Result<Bounds<i64>>;

    fn float_bounds(&self, name: &str) -> Result<Bounds<f64>>;

    /// Step between valid values of an integer feature.
    fn increment(&self, name: &str) -> Result<i64>;

    /// Entry names of an enumeration feature.
    fn enum_entries(&self, name: &str) -> Result<Vec<String>>;

    /// Executes a command feature such as `AcquisitionStart`.
    ///
    /// `AcquisitionStop` returns after the in-flight frame is delivered;
    /// `AcquisitionAbort` returns immediately and may discard it.
    fn execute(&self, command: &str) -> Result<()>;

    /// Largest number of buffers one stream may cycle.
    fn max_stream_buffers(&self) -> usize;

    /// Registers a stream that will receive frames once acquisition starts.
    fn attach_stream(&self, sink: StreamSink) -> Result<()>;

    /// Stops any activity and drops attached streams.
    fn shutdown(&self) -> Result<()>;
}
