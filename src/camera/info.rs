//! Device identity.

use crate::transport::TransportKind;
use serde::Serialize;

/// Identity and sensor description of a connected camera.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub vendor_name: String,
    pub model_name: String,
    /// Identifier the device was opened by.
    pub device_id: String,
    pub serial_number: String,
    pub sensor_width: u32,
    pub sensor_height: u32,
    pub transport: TransportKind,
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} ({}, serial {}, {}x{}, {})",
            self.vendor_name,
            self.model_name,
            self.device_id,
            self.serial_number,
            self.sensor_width,
            self.sensor_height,
            self.transport
        )
    }
}
