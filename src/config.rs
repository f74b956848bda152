//! File configuration.
//!
//! Values here are requests. Local checks run in [`CameraConfig::validate`];
//! the device has the final say when [`CameraConfig::apply`] writes them.

use crate::acquisition::{AcquisitionMode, TriggerSource};
use crate::camera::Camera;
use crate::features::{PixelFormat, Region};
use crate::sim::SimModel;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Settings pushed to the camera before acquisition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Device id or serial number; first device when absent.
    pub device: Option<String>,
    /// Region of interest; full sensor when absent.
    pub region: Option<Region>,
    pub pixel_format: Option<PixelFormat>,
    /// Exposure time in microseconds.
    pub exposure_us: f64,
    /// Gain in dB.
    pub gain: f64,
    /// Free-run frame rate in frames per second.
    pub frame_rate: f64,
    pub acquisition_mode: AcquisitionMode,
    /// `Software`, `LineN` or a device-specific name; free-run when absent.
    pub trigger_source: Option<String>,
    pub buffer_count: usize,
    /// GigE packet size in bytes.
    pub packet_size: Option<u32>,
    /// GigE inter-packet delay in ticks.
    pub packet_delay: Option<i64>,
    pub chunk_mode: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: None,
            region: None,
            pixel_format: None,
            exposure_us: 10_000.0, // 10ms
            gain: 0.0,
            frame_rate: 30.0,
            acquisition_mode: AcquisitionMode::Continuous,
            trigger_source: None,
            buffer_count: 8,
            packet_size: None,
            packet_delay: None,
            chunk_mode: false,
        }
    }
}

impl CameraConfig {
    /// Checks values that are wrong for any device.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(region) = &self.region {
            region
                .validate()
                .map_err(|_| ConfigError::InvalidRegion(*region))?;
        }
        if !self.exposure_us.is_finite() || self.exposure_us <= 0.0 {
            return Err(ConfigError::InvalidExposure);
        }
        if !self.gain.is_finite() || self.gain < 0.0 {
            return Err(ConfigError::InvalidGain);
        }
        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return Err(ConfigError::InvalidFrameRate);
        }
        if self.buffer_count == 0 {
            return Err(ConfigError::InvalidBufferCount);
        }
        if let Some(source) = &self.trigger_source {
            source
                .parse::<TriggerSource>()
                .map_err(|_| ConfigError::InvalidTriggerSource(source.clone()))?;
        }
        if self.packet_size == Some(0) {
            return Err(ConfigError::InvalidPacketSize);
        }
        Ok(())
    }

    /// Writes every setting to an idle camera.
    ///
    /// Packet settings are skipped with a warning on non-GigE devices.
    pub fn apply(&self, camera: &Camera) -> crate::Result<()> {
        let params = camera.parameters();
        let acquisition = camera.acquisition();

        if let Some(format) = self.pixel_format {
            params.set_pixel_format(format)?;
        }
        if let Some(region) = self.region {
            params.set_region(region)?;
        }
        params.set_exposure_time(self.exposure_us)?;
        params.set_gain(self.gain)?;
        params.set_frame_rate(self.frame_rate)?;
        params.set_chunk_mode(self.chunk_mode)?;

        // set_trigger resets AcquisitionMode, so the mode is written after it.
        match &self.trigger_source {
            Some(source) => acquisition.set_trigger(&source.parse::<TriggerSource>()?)?,
            None => acquisition.clear_triggers()?,
        }
        acquisition.set_acquisition_mode(self.acquisition_mode)?;

        if self.packet_size.is_some() || self.packet_delay.is_some() {
            if camera.is_gv_device()? {
                let tuning = camera.transport_tuning()?;
                if let Some(bytes) = self.packet_size {
                    tuning.set_packet_size(bytes)?;
                }
                if let Some(ticks) = self.packet_delay {
                    tuning.set_packet_delay(ticks)?;
                }
            } else {
                tracing::warn!(
                    device = %camera.info().device_id,
                    "Packet settings ignored on a non-GigE device"
                );
            }
        }

        tracing::debug!(device = %camera.info().device_id, "Camera configuration applied");
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid region {0}")]
    InvalidRegion(Region),
    #[error("invalid exposure time")]
    InvalidExposure,
    #[error("invalid gain (must be finite and non-negative)")]
    InvalidGain,
    #[error("invalid frame rate (must be positive)")]
    InvalidFrameRate,
    #[error("buffer count must be at least 1")]
    InvalidBufferCount,
    #[error("invalid trigger source '{0}'")]
    InvalidTriggerSource(String),
    #[error("packet size must be positive")]
    InvalidPacketSize,
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Simulated devices offered for opening.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    pub devices: Vec<SimModel>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            devices: SimModel::defaults(),
        }
    }
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Frames to grab before stopping (0 runs until interrupted).
    pub frame_count: u64,
    /// Timeout for each stream pop in milliseconds.
    pub pop_timeout_ms: u64,
    /// Port `grab --serve` exposes metrics on (0 disables serving).
    pub metrics_port: u16,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            frame_count: 100,
            pop_timeout_ms: 1_000,
            metrics_port: 9090,
        }
    }
}

impl OutputConfig {
    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.camera.validate()?;
        Ok(config)
    }
}
