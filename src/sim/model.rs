//! Simulated camera profiles.

use crate::transport::TransportKind;
use serde::{Deserialize, Serialize};

/// Static description of a simulated camera model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimModel {
    /// Identifier accepted by `open`.
    pub id: String,
    pub vendor: String,
    pub model: String,
    pub serial: String,
    pub transport: TransportKind,
    pub sensor_width: u32,
    pub sensor_height: u32,
    /// GigE stream channels; ignored for USB3 devices.
    #[serde(default = "default_stream_channels")]
    pub stream_channels: u32,
    /// Model implements `ExposureAuto`.
    #[serde(default)]
    pub exposure_auto: bool,
    /// Model implements `GainAuto`.
    #[serde(default)]
    pub gain_auto: bool,
    /// Buffers one stream may cycle.
    #[serde(default = "default_max_buffers")]
    pub max_buffers: usize,
    /// Sensor readout rate in lines per second; caps the frame rate by height.
    pub line_rate: f64,
    /// Largest packet the simulated link carries without loss.
    #[serde(default = "default_link_mtu")]
    pub link_mtu: u32,
}

fn default_stream_channels() -> u32 {
    1
}

fn default_max_buffers() -> usize {
    64
}

fn default_link_mtu() -> u32 {
    1500
}

impl SimModel {
    /// Built-in profiles: a GigE camera `sim0` and a USB3 camera `sim1`.
    pub fn defaults() -> Vec<SimModel> {
        vec![
            SimModel {
                id: "sim0".to_string(),
                vendor: "Simulated Vision".to_string(),
                model: "SV-1300GM".to_string(),
                serial: "SV13000001".to_string(),
                transport: TransportKind::GigEVision,
                sensor_width: 1280,
                sensor_height: 960,
                stream_channels: 2,
                exposure_auto: true,
                gain_auto: true,
                max_buffers: 64,
                line_rate: 96_000.0,
                link_mtu: 1500,
            },
            SimModel {
                id: "sim1".to_string(),
                vendor: "Simulated Vision".to_string(),
                model: "SV-300UM".to_string(),
                serial: "SV03000001".to_string(),
                transport: TransportKind::Usb3Vision,
                sensor_width: 640,
                sensor_height: 480,
                stream_channels: 1,
                exposure_auto: false,
                gain_auto: false,
                max_buffers: 32,
                line_rate: 48_000.0,
                link_mtu: 1500,
            },
        ]
    }

    /// True if `identifier` names this model by id or serial number.
    pub fn matches(&self, identifier: &str) -> bool {
        self.id == identifier || self.serial == identifier
    }
}
