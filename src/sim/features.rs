//! Feature table of a simulated device.
//!
//! Holds every feature a model implements and applies the rules a real
//! device would: access modes, ranges and increments, enumeration entries,
//! streaming locks, and the couplings between features (region and binning,
//! frame-rate limits, automatic exposure and gain).

use super::model::SimModel;
use crate::error::{Error, Result};
use crate::features::{Bounds, FeatureKind, FeatureValue, PixelFormat, Region};
use crate::stream::CHUNK_TRAILER_LEN;
use crate::transport::TransportKind;
use std::collections::BTreeMap;

/// Every feature name any simulated model may carry.
const KNOWN_FEATURES: &[&str] = &[
    "DeviceVendorName",
    "DeviceModelName",
    "DeviceID",
    "DeviceSerialNumber",
    "DeviceUserID",
    "SensorWidth",
    "SensorHeight",
    "WidthMax",
    "HeightMax",
    "OffsetX",
    "OffsetY",
    "Width",
    "Height",
    "BinningHorizontal",
    "BinningVertical",
    "PixelFormat",
    "PayloadSize",
    "AcquisitionMode",
    "AcquisitionStart",
    "AcquisitionStop",
    "AcquisitionAbort",
    "AcquisitionFrameRate",
    "ExposureTime",
    "ExposureAuto",
    "Gain",
    "GainAuto",
    "TriggerSelector",
    "TriggerMode",
    "TriggerSource",
    "TriggerActivation",
    "TriggerSoftware",
    "ChunkModeActive",
    "GevStreamChannelCount",
    "GevStreamChannelSelector",
    "GevSCPSPacketSize",
    "GevSCPD",
];

const MIN_SIZE: i64 = 8;
const MAX_BINNING: i64 = 4;
const FRAME_RATE_CAP: f64 = 200.0;
const MIN_FRAME_RATE: f64 = 1.0;
const EXPOSURE_RANGE: (f64, f64) = (10.0, 1_000_000.0);
const GAIN_RANGE: (f64, f64) = (0.0, 24.0);
const USER_ID_MAX_LEN: usize = 16;
const AUTO_EXPOSURE_TARGET: f64 = 8_000.0;
const AUTO_GAIN_TARGET: f64 = 6.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    ReadOnly,
    ReadWrite,
    WriteOnly,
}

#[derive(Debug, Clone)]
struct Node {
    kind: FeatureKind,
    access: Access,
    value: Option<FeatureValue>,
    /// min, max, increment
    int_range: Option<(i64, i64, i64)>,
    float_range: Option<(f64, f64)>,
    entries: &'static [&'static str],
    streaming_locked: bool,
}

impl Node {
    fn new(kind: FeatureKind, access: Access, value: Option<FeatureValue>) -> Self {
        Self {
            kind,
            access,
            value,
            int_range: None,
            float_range: None,
            entries: &[],
            streaming_locked: false,
        }
    }

    fn integer(value: i64, min: i64, max: i64, inc: i64) -> Self {
        Self {
            int_range: Some((min, max, inc)),
            ..Self::new(FeatureKind::Integer, Access::ReadWrite, Some(FeatureValue::Integer(value)))
        }
    }

    fn integer_ro(value: i64) -> Self {
        Self::new(FeatureKind::Integer, Access::ReadOnly, Some(FeatureValue::Integer(value)))
    }

    fn float(value: f64, min: f64, max: f64) -> Self {
        Self {
            float_range: Some((min, max)),
            ..Self::new(FeatureKind::Float, Access::ReadWrite, Some(FeatureValue::Float(value)))
        }
    }

    fn string_ro(value: &str) -> Self {
        Self::new(
            FeatureKind::String,
            Access::ReadOnly,
            Some(FeatureValue::String(value.to_string())),
        )
    }

    fn string(value: &str) -> Self {
        Self::new(
            FeatureKind::String,
            Access::ReadWrite,
            Some(FeatureValue::String(value.to_string())),
        )
    }

    fn enumeration(value: &str, entries: &'static [&'static str]) -> Self {
        Self {
            entries,
            ..Self::new(
                FeatureKind::Enumeration,
                Access::ReadWrite,
                Some(FeatureValue::Enumeration(value.to_string())),
            )
        }
    }

    fn boolean(value: bool) -> Self {
        Self::new(FeatureKind::Boolean, Access::ReadWrite, Some(FeatureValue::Boolean(value)))
    }

    fn command() -> Self {
        Self::new(FeatureKind::Command, Access::WriteOnly, None)
    }

    fn locked(mut self) -> Self {
        self.streaming_locked = true;
        self
    }
}

/// Settings the producer reads at the start of each frame.
#[derive(Debug, Clone)]
pub(super) struct FrameSettings {
    pub region: Region,
    pub pixel_format: PixelFormat,
    pub exposure_us: f64,
    pub gain_db: f64,
    pub frame_rate: f64,
    pub triggered: bool,
    pub single_frame: bool,
    pub chunk_mode: bool,
    pub image_size: usize,
    pub payload_size: usize,
    /// `None` for transports without packet settings.
    pub packet_size: Option<u32>,
    pub packet_delay: i64,
}

pub(super) struct FeatureTable {
    nodes: BTreeMap<&'static str, Node>,
    sensor_width: i64,
    sensor_height: i64,
    line_rate: f64,
}

impl FeatureTable {
    pub(super) fn for_model(model: &SimModel) -> Self {
        let width = i64::from(model.sensor_width);
        let height = i64::from(model.sensor_height);
        let mut nodes = BTreeMap::new();

        nodes.insert("DeviceVendorName", Node::string_ro(&model.vendor));
        nodes.insert("DeviceModelName", Node::string_ro(&model.model));
        nodes.insert("DeviceID", Node::string_ro(&model.id));
        nodes.insert("DeviceSerialNumber", Node::string_ro(&model.serial));
        nodes.insert("DeviceUserID", Node::string(""));
        nodes.insert("SensorWidth", Node::integer_ro(width));
        nodes.insert("SensorHeight", Node::integer_ro(height));
        nodes.insert("WidthMax", Node::integer_ro(width));
        nodes.insert("HeightMax", Node::integer_ro(height));
        nodes.insert("OffsetX", Node::integer(0, 0, width, 1).locked());
        nodes.insert("OffsetY", Node::integer(0, 0, height, 1).locked());
        nodes.insert("Width", Node::integer(width, MIN_SIZE, width, 1).locked());
        nodes.insert("Height", Node::integer(height, MIN_SIZE, height, 1).locked());
        nodes.insert("BinningHorizontal", Node::integer(1, 1, MAX_BINNING, 1).locked());
        nodes.insert("BinningVertical", Node::integer(1, 1, MAX_BINNING, 1).locked());
        nodes.insert(
            "PixelFormat",
            Node::enumeration("Mono8", &["Mono8", "Mono16", "RGB8"]).locked(),
        );
        nodes.insert("PayloadSize", Node::integer_ro(0));
        nodes.insert(
            "AcquisitionMode",
            Node::enumeration("Continuous", &["Continuous", "SingleFrame"]).locked(),
        );
        nodes.insert("AcquisitionStart", Node::command());
        nodes.insert("AcquisitionStop", Node::command());
        nodes.insert("AcquisitionAbort", Node::command());
        nodes.insert(
            "AcquisitionFrameRate",
            Node::float(30.0, MIN_FRAME_RATE, FRAME_RATE_CAP),
        );
        nodes.insert(
            "ExposureTime",
            Node::float(5_000.0, EXPOSURE_RANGE.0, EXPOSURE_RANGE.1),
        );
        nodes.insert("Gain", Node::float(0.0, GAIN_RANGE.0, GAIN_RANGE.1));
        if model.exposure_auto {
            nodes.insert(
                "ExposureAuto",
                Node::enumeration("Off", &["Off", "Once", "Continuous"]),
            );
        }
        if model.gain_auto {
            nodes.insert(
                "GainAuto",
                Node::enumeration("Off", &["Off", "Once", "Continuous"]),
            );
        }
        nodes.insert(
            "TriggerSelector",
            Node::enumeration("FrameStart", &["FrameStart"]).locked(),
        );
        nodes.insert("TriggerMode", Node::enumeration("Off", &["Off", "On"]).locked());
        nodes.insert(
            "TriggerSource",
            Node::enumeration("Software", &["Software", "Line0", "Line1", "Line2"]).locked(),
        );
        nodes.insert(
            "TriggerActivation",
            Node::enumeration("RisingEdge", &["RisingEdge", "FallingEdge"]).locked(),
        );
        nodes.insert("TriggerSoftware", Node::command());
        nodes.insert("ChunkModeActive", Node::boolean(false).locked());

        if model.transport == TransportKind::GigEVision {
            let channels = i64::from(model.stream_channels.max(1));
            nodes.insert("GevStreamChannelCount", Node::integer_ro(channels));
            nodes.insert(
                "GevStreamChannelSelector",
                Node::integer(0, 0, channels - 1, 1).locked(),
            );
            nodes.insert(
                "GevSCPSPacketSize",
                Node::integer(1500, 576, 9000, 4).locked(),
            );
            nodes.insert("GevSCPD", Node::integer(0, 0, 1_000_000, 1).locked());
        }

        Self {
            nodes,
            sensor_width: width,
            sensor_height: height,
            line_rate: model.line_rate,
        }
    }

    fn node(&self, name: &str) -> Result<&Node> {
        match self.nodes.get(name) {
            Some(node) => Ok(node),
            None if KNOWN_FEATURES.contains(&name) => Err(Error::Unsupported(name.to_string())),
            None => Err(Error::feature_not_found(name)),
        }
    }

    pub(super) fn kind(&self, name: &str) -> Result<FeatureKind> {
        Ok(self.node(name)?.kind)
    }

    pub(super) fn read(&self, name: &str) -> Result<FeatureValue> {
        let node = self.node(name)?;
        if node.access == Access::WriteOnly {
            return Err(Error::rejected(name, "feature is write-only"));
        }
        match name {
            "WidthMax" => Ok(FeatureValue::Integer(self.width_max()?)),
            "HeightMax" => Ok(FeatureValue::Integer(self.height_max()?)),
            "PayloadSize" => Ok(FeatureValue::Integer(self.payload_size()? as i64)),
            _ => node
                .value
                .clone()
                .ok_or_else(|| Error::rejected(name, "feature has no value")),
        }
    }

    pub(super) fn integer_bounds(&self, name: &str) -> Result<Bounds<i64>> {
        let node = self.node(name)?;
        if node.kind != FeatureKind::Integer {
            return Err(Error::rejected(name, "not an integer feature"));
        }
        let bounds = match name {
            "Width" => Bounds::new(MIN_SIZE, self.width_max()? - self.int("OffsetX")?),
            "Height" => Bounds::new(MIN_SIZE, self.height_max()? - self.int("OffsetY")?),
            "OffsetX" => Bounds::new(0, self.width_max()? - self.int("Width")?),
            "OffsetY" => Bounds::new(0, self.height_max()? - self.int("Height")?),
            _ => match node.int_range {
                Some((min, max, _)) => Bounds::new(min, max),
                None => {
                    let value = self.int(name)?;
                    Bounds::new(value, value)
                }
            },
        };
        Ok(bounds)
    }

    pub(super) fn float_bounds(&self, name: &str) -> Result<Bounds<f64>> {
        let node = self.node(name)?;
        if node.kind != FeatureKind::Float {
            return Err(Error::rejected(name, "not a float feature"));
        }
        match (name, node.float_range) {
            ("AcquisitionFrameRate", _) => Ok(Bounds::new(MIN_FRAME_RATE, self.max_frame_rate()?)),
            (_, Some((min, max))) => Ok(Bounds::new(min, max)),
            (_, None) => Err(Error::rejected(name, "feature has no range")),
        }
    }

    pub(super) fn increment(&self, name: &str) -> Result<i64> {
        let node = self.node(name)?;
        match (node.kind, node.int_range) {
            (FeatureKind::Integer, Some((_, _, inc))) => Ok(inc),
            (FeatureKind::Integer, None) => Ok(1),
            _ => Err(Error::rejected(name, "not an integer feature")),
        }
    }

    pub(super) fn enum_entries(&self, name: &str) -> Result<Vec<String>> {
        let node = self.node(name)?;
        if node.kind != FeatureKind::Enumeration {
            return Err(Error::rejected(name, "not an enumeration feature"));
        }
        Ok(node.entries.iter().map(|entry| entry.to_string()).collect())
    }

    /// Checks that `name` is a command this model implements.
    pub(super) fn check_command(&self, name: &str) -> Result<()> {
        if self.node(name)?.kind != FeatureKind::Command {
            return Err(Error::rejected(name, "not a command"));
        }
        Ok(())
    }

    /// Validates and applies a write as the device would.
    pub(super) fn write(&mut self, name: &str, value: FeatureValue, streaming: bool) -> Result<()> {
        let node = self.node(name)?;
        match node.access {
            Access::ReadOnly => return Err(Error::rejected(name, "feature is read-only")),
            Access::WriteOnly => return Err(Error::rejected(name, "use execute for commands")),
            Access::ReadWrite => {}
        }
        if streaming && node.streaming_locked {
            return Err(Error::rejected(name, "locked while acquiring"));
        }
        if value.kind() != node.kind {
            return Err(Error::rejected(
                name,
                format!("expected {:?}, got {:?}", node.kind, value.kind()),
            ));
        }

        match &value {
            FeatureValue::Integer(v) => {
                let bounds = self.integer_bounds(name)?;
                if !bounds.contains(*v) {
                    return Err(Error::rejected(
                        name,
                        format!("{v} outside [{}, {}]", bounds.min, bounds.max),
                    ));
                }
                let inc = self.increment(name)?;
                if (v - bounds.min) % inc != 0 {
                    return Err(Error::rejected(name, format!("{v} is not a multiple of {inc} from {}", bounds.min)));
                }
            }
            FeatureValue::Float(v) => {
                let bounds = self.float_bounds(name)?;
                if !bounds.contains(*v) {
                    return Err(Error::rejected(
                        name,
                        format!("{v} outside [{}, {}]", bounds.min, bounds.max),
                    ));
                }
                let controller = match name {
                    "ExposureTime" => Some("ExposureAuto"),
                    "Gain" => Some("GainAuto"),
                    _ => None,
                };
                if let Some(auto) = controller {
                    if self.enum_value(auto).ok() == Some("Continuous") {
                        return Err(Error::rejected(name, format!("controlled by {auto}")));
                    }
                }
            }
            FeatureValue::Enumeration(entry) => {
                if !node.entries.contains(&entry.as_str()) {
                    return Err(Error::rejected(
                        name,
                        format!("'{entry}' is not one of {:?}", node.entries),
                    ));
                }
            }
            FeatureValue::String(text) => {
                if text.len() > USER_ID_MAX_LEN {
                    return Err(Error::rejected(
                        name,
                        format!("longer than {USER_ID_MAX_LEN} bytes"),
                    ));
                }
            }
            FeatureValue::Boolean(_) => {}
        }

        self.store(name, value)?;
        self.apply_side_effects(name)
    }

    fn apply_side_effects(&mut self, name: &str) -> Result<()> {
        match name {
            "BinningHorizontal" => {
                self.fit_axis("OffsetX", "Width", self.width_max()?)?;
                self.clamp_frame_rate()
            }
            "BinningVertical" => {
                self.fit_axis("OffsetY", "Height", self.height_max()?)?;
                self.clamp_frame_rate()
            }
            "Height" | "ExposureTime" => self.clamp_frame_rate(),
            "ExposureAuto" => {
                if self.enum_value("ExposureAuto")? == "Once" {
                    self.store("ExposureTime", FeatureValue::Float(AUTO_EXPOSURE_TARGET))?;
                    self.store("ExposureAuto", FeatureValue::Enumeration("Off".to_string()))?;
                    tracing::debug!(exposure_us = AUTO_EXPOSURE_TARGET, "Auto exposure settled");
                }
                self.clamp_frame_rate()
            }
            "GainAuto" => {
                if self.enum_value("GainAuto")? == "Once" {
                    self.store("Gain", FeatureValue::Float(AUTO_GAIN_TARGET))?;
                    self.store("GainAuto", FeatureValue::Enumeration("Off".to_string()))?;
                    tracing::debug!(gain_db = AUTO_GAIN_TARGET, "Auto gain settled");
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Shrinks an offset/size pair to fit a new maximum extent.
    fn fit_axis(&mut self, offset: &str, size: &str, max: i64) -> Result<()> {
        let mut current_offset = self.int(offset)?;
        let current_size = self.int(size)?.min(max);
        if current_offset + current_size > max {
            current_offset = 0;
        }
        self.store(size, FeatureValue::Integer(current_size))?;
        self.store(offset, FeatureValue::Integer(current_offset))
    }

    fn clamp_frame_rate(&mut self) -> Result<()> {
        let max = self.max_frame_rate()?;
        if self.float("AcquisitionFrameRate")? > max {
            self.store("AcquisitionFrameRate", FeatureValue::Float(max))?;
            tracing::debug!(frame_rate = max, "Frame rate clamped to new maximum");
        }
        Ok(())
    }

    fn store(&mut self, name: &str, value: FeatureValue) -> Result<()> {
        let node = self
            .nodes
            .get_mut(name)
            .ok_or_else(|| Error::feature_not_found(name))?;
        node.value = Some(value);
        Ok(())
    }

    pub(super) fn int(&self, name: &str) -> Result<i64> {
        match self.read(name)? {
            FeatureValue::Integer(v) => Ok(v),
            other => Err(Error::rejected(name, format!("unexpected value {other}"))),
        }
    }

    pub(super) fn float(&self, name: &str) -> Result<f64> {
        match self.read(name)? {
            FeatureValue::Float(v) => Ok(v),
            other => Err(Error::rejected(name, format!("unexpected value {other}"))),
        }
    }

    pub(super) fn enum_value(&self, name: &str) -> Result<&str> {
        match &self.node(name)?.value {
            Some(FeatureValue::Enumeration(entry)) => Ok(entry),
            _ => Err(Error::rejected(name, "not an enumeration feature")),
        }
    }

    fn boolean(&self, name: &str) -> Result<bool> {
        match self.read(name)? {
            FeatureValue::Boolean(v) => Ok(v),
            other => Err(Error::rejected(name, format!("unexpected value {other}"))),
        }
    }

    fn width_max(&self) -> Result<i64> {
        Ok(self.sensor_width / self.int("BinningHorizontal")?)
    }

    fn height_max(&self) -> Result<i64> {
        Ok(self.sensor_height / self.int("BinningVertical")?)
    }

    /// Limited by sensor readout of the active lines and by exposure time.
    fn max_frame_rate(&self) -> Result<f64> {
        let lines = (self.int("Height")? * self.int("BinningVertical")?) as f64;
        let readout = self.line_rate / lines;
        let exposure = 1_000_000.0 / self.float("ExposureTime")?;
        Ok(FRAME_RATE_CAP
            .min(readout)
            .min(exposure)
            .max(MIN_FRAME_RATE))
    }

    fn pixel_format(&self) -> Result<PixelFormat> {
        let name = self.enum_value("PixelFormat")?;
        name.parse()
    }

    fn image_size(&self) -> Result<usize> {
        let pixels = (self.int("Width")? * self.int("Height")?) as usize;
        Ok(pixels * self.pixel_format()?.bytes_per_pixel())
    }

    fn payload_size(&self) -> Result<usize> {
        let trailer = if self.boolean("ChunkModeActive")? {
            CHUNK_TRAILER_LEN
        } else {
            0
        };
        Ok(self.image_size()? + trailer)
    }

    pub(super) fn frame_settings(&self) -> Result<FrameSettings> {
        let region = Region::new(
            self.int("OffsetX")? as u32,
            self.int("OffsetY")? as u32,
            self.int("Width")? as u32,
            self.int("Height")? as u32,
        );
        let packet_size = match self.nodes.contains_key("GevSCPSPacketSize") {
            true => Some(self.int("GevSCPSPacketSize")? as u32),
            false => None,
        };
        let packet_delay = match self.nodes.contains_key("GevSCPD") {
            true => self.int("GevSCPD")?,
            false => 0,
        };

        Ok(FrameSettings {
            region,
            pixel_format: self.pixel_format()?,
            exposure_us: self.float("ExposureTime")?,
            gain_db: self.float("Gain")?,
            frame_rate: self.float("AcquisitionFrameRate")?,
            triggered: self.enum_value("TriggerMode")? == "On",
            single_frame: self.enum_value("AcquisitionMode")? == "SingleFrame",
            chunk_mode: self.boolean("ChunkModeActive")?,
            image_size: self.image_size()?,
            payload_size: self.payload_size()?,
            packet_size,
            packet_delay,
        })
    }
}
