//! Parameter store: typed access to named device features.
//!
//! Generic accessors work on any feature by SFNC name. Typed accessors cover
//! the common controls (frame rate, exposure, gain, region, pixel format,
//! binning, chunk mode). Every setter goes through the session control lock,
//! so writes never interleave with acquisition start/stop.

mod region;
mod value;

pub use region::Region;
pub use value::{AutoMode, Bounds, FeatureKind, FeatureValue, PixelFormat};

use crate::camera::{to_u32, Session};
use crate::error::{Error, Result};
use std::sync::Arc;
use value::check_finite;

/// Feature access for one camera. Clones share the same device.
#[derive(Clone)]
pub struct ParameterStore {
    session: Arc<Session>,
}

impl ParameterStore {
    pub(crate) fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Reads any value feature rendered as text.
    pub fn get_string(&self, key: &str) -> Result<String> {
        Ok(self.session.transport()?.read(key)?.to_string())
    }

    /// Writes any value feature from text, converted to the feature's type.
    pub fn set_string(&self, key: &str, value: &str) -> Result<()> {
        let kind = self.session.transport()?.feature_kind(key)?;
        let value = FeatureValue::parse(kind, key, value)?;
        self.session.write_features(&[(key, value)])
    }

    pub fn get_integer(&self, key: &str) -> Result<i64> {
        match self.session.transport()?.read(key)? {
            FeatureValue::Integer(value) => Ok(value),
            other => Err(type_mismatch(key, FeatureKind::Integer, &other)),
        }
    }

    pub fn set_integer(&self, key: &str, value: i64) -> Result<()> {
        self.session
            .write_features(&[(key, FeatureValue::Integer(value))])
    }

    pub fn get_float(&self, key: &str) -> Result<f64> {
        match self.session.transport()?.read(key)? {
            FeatureValue::Float(value) => Ok(value),
            other => Err(type_mismatch(key, FeatureKind::Float, &other)),
        }
    }

    pub fn set_float(&self, key: &str, value: f64) -> Result<()> {
        check_finite(key, value)?;
        self.session
            .write_features(&[(key, FeatureValue::Float(value))])
    }

    pub fn get_boolean(&self, key: &str) -> Result<bool> {
        match self.session.transport()?.read(key)? {
            FeatureValue::Boolean(value) => Ok(value),
            other => Err(type_mismatch(key, FeatureKind::Boolean, &other)),
        }
    }

    pub fn set_boolean(&self, key: &str, value: bool) -> Result<()> {
        self.session
            .write_features(&[(key, FeatureValue::Boolean(value))])
    }

    pub fn integer_bounds(&self, key: &str) -> Result<Bounds<i64>> {
        self.session.transport()?.integer_bounds(key)
    }

    pub fn integer_increment(&self, key: &str) -> Result<i64> {
        self.session.transport()?.increment(key)
    }

    pub fn float_bounds(&self, key: &str) -> Result<Bounds<f64>> {
        self.session.transport()?.float_bounds(key)
    }

    /// Entry names of an enumeration feature.
    pub fn enum_entries(&self, key: &str) -> Result<Vec<String>> {
        self.session.transport()?.enum_entries(key)
    }

    /// Returns false when this model lacks the feature.
    ///
    /// Unknown names still fail with [`Error::NotFound`].
    pub fn is_available(&self, key: &str) -> Result<bool> {
        match self.session.transport()?.feature_kind(key) {
            Ok(_) => Ok(true),
            Err(Error::Unsupported(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    // Frame rate

    /// Frame rate in frames per second.
    pub fn frame_rate(&self) -> Result<f64> {
        self.get_float("AcquisitionFrameRate")
    }

    pub fn set_frame_rate(&self, fps: f64) -> Result<()> {
        if fps <= 0.0 {
            return Err(Error::local("AcquisitionFrameRate", "must be positive"));
        }
        self.set_float("AcquisitionFrameRate", fps)
    }

    /// Depends on region height and exposure time; re-query after changing them.
    pub fn frame_rate_bounds(&self) -> Result<Bounds<f64>> {
        self.float_bounds("AcquisitionFrameRate")
    }

    // Exposure

    /// Exposure time in microseconds.
    pub fn exposure_time(&self) -> Result<f64> {
        self.get_float("ExposureTime")
    }

    pub fn set_exposure_time(&self, microseconds: f64) -> Result<()> {
        if microseconds <= 0.0 {
            return Err(Error::local("ExposureTime", "must be positive"));
        }
        self.set_float("ExposureTime", microseconds)
    }

    pub fn exposure_time_bounds(&self) -> Result<Bounds<f64>> {
        self.float_bounds("ExposureTime")
    }

    pub fn is_exposure_time_available(&self) -> Result<bool> {
        self.is_available("ExposureTime")
    }

    pub fn is_exposure_auto_available(&self) -> Result<bool> {
        self.is_available("ExposureAuto")
    }

    pub fn exposure_auto(&self) -> Result<AutoMode> {
        self.get_string("ExposureAuto")?.parse()
    }

    pub fn set_exposure_auto(&self, mode: AutoMode) -> Result<()> {
        self.set_enumeration("ExposureAuto", mode.as_str())
    }

    // Gain

    /// Gain in dB.
    pub fn gain(&self) -> Result<f64> {
        self.get_float("Gain")
    }

    pub fn set_gain(&self, gain: f64) -> Result<()> {
        self.set_float("Gain", gain)
    }

    pub fn gain_bounds(&self) -> Result<Bounds<f64>> {
        self.float_bounds("Gain")
    }

    pub fn is_gain_auto_available(&self) -> Result<bool> {
        self.is_available("GainAuto")
    }

    pub fn gain_auto(&self) -> Result<AutoMode> {
        self.get_string("GainAuto")?.parse()
    }

    pub fn set_gain_auto(&self, mode: AutoMode) -> Result<()> {
        self.set_enumeration("GainAuto", mode.as_str())
    }

    // Region

    pub fn region(&self) -> Result<Region> {
        Ok(Region {
            x: self.get_u32("OffsetX")?,
            y: self.get_u32("OffsetY")?,
            width: self.get_u32("Width")?,
            height: self.get_u32("Height")?,
        })
    }

    /// Sets the region of interest.
    ///
    /// Offsets are zeroed first so the new size is never limited by the old
    /// offsets. If the device rejects any write, the previous region is
    /// restored. The payload size changes with the region; streams created
    /// before the change keep their old buffer size.
    pub fn set_region(&self, region: Region) -> Result<()> {
        region.validate()?;
        let transport = self.session.transport()?;
        let guard = self.session.lock_control()?;
        self.session.ensure_idle(&guard, "Region")?;

        let max_width = self.get_u32("WidthMax")?;
        let max_height = self.get_u32("HeightMax")?;
        if !region.fits_within(max_width, max_height) {
            return Err(Error::rejected(
                "Region",
                format!("{region} exceeds {max_width}x{max_height}"),
            ));
        }
        let min_width = transport.integer_bounds("Width")?.min;
        let min_height = transport.integer_bounds("Height")?.min;
        if i64::from(region.width) < min_width || i64::from(region.height) < min_height {
            return Err(Error::rejected(
                "Region",
                format!("{region} below minimum {min_width}x{min_height}"),
            ));
        }

        for (key, size, min) in [
            ("Width", region.width, min_width),
            ("Height", region.height, min_height),
        ] {
            let step = transport.increment(key)?.max(1);
            if (i64::from(size) - min) % step != 0 {
                return Err(Error::rejected(
                    key,
                    format!("{size} is not {min} plus a multiple of {step}"),
                ));
            }
        }

        self.session.write_locked(&guard, &region_writes(region))?;
        tracing::info!(%region, "Region set");
        Ok(())
    }

    /// Width bounds at the current horizontal offset.
    pub fn width_bounds(&self) -> Result<Bounds<i64>> {
        self.integer_bounds("Width")
    }

    /// Height bounds at the current vertical offset.
    pub fn height_bounds(&self) -> Result<Bounds<i64>> {
        self.integer_bounds("Height")
    }

    // Binning

    /// Binning factors as `(horizontal, vertical)`.
    pub fn binning(&self) -> Result<(u32, u32)> {
        Ok((
            self.get_u32("BinningHorizontal")?,
            self.get_u32("BinningVertical")?,
        ))
    }

    /// Sets binning. The device shrinks the region to fit the binned sensor.
    ///
    /// If the device rejects either factor, the previous binning and region
    /// are restored.
    pub fn set_binning(&self, horizontal: u32, vertical: u32) -> Result<()> {
        if horizontal == 0 || vertical == 0 {
            return Err(Error::local("Binning", "factors must be at least 1"));
        }
        let guard = self.session.lock_control()?;
        self.session.ensure_idle(&guard, "Binning")?;
        let previous = self.region()?;

        let written = self.session.write_locked(
            &guard,
            &[
                ("BinningHorizontal", FeatureValue::Integer(horizontal.into())),
                ("BinningVertical", FeatureValue::Integer(vertical.into())),
            ],
        );
        if written.is_err() && self.region().ok() != Some(previous) {
            if let Err(e) = self.session.write_locked(&guard, &region_writes(previous)) {
                tracing::warn!(region = %previous, error = %e, "Region restore failed");
            }
        }
        written
    }

    // Pixel format

    pub fn pixel_format(&self) -> Result<PixelFormat> {
        let name = self.get_string("PixelFormat")?;
        name.parse().map_err(|_| {
            Error::rejected("PixelFormat", format!("device reports unknown format '{name}'"))
        })
    }

    pub fn set_pixel_format(&self, format: PixelFormat) -> Result<()> {
        self.set_enumeration("PixelFormat", format.as_str())
    }

    /// Pixel formats offered by the device that this crate can describe.
    pub fn available_pixel_formats(&self) -> Result<Vec<PixelFormat>> {
        Ok(self
            .enum_entries("PixelFormat")?
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect())
    }

    /// Bytes per frame for the current region, pixel format and chunk mode.
    pub fn payload_size(&self) -> Result<usize> {
        let payload = self.get_integer("PayloadSize")?;
        usize::try_from(payload)
            .map_err(|_| Error::rejected("PayloadSize", format!("negative payload {payload}")))
    }

    pub fn chunk_mode(&self) -> Result<bool> {
        self.get_boolean("ChunkModeActive")
    }

    /// Appends timestamp and exposure chunks to every payload.
    pub fn set_chunk_mode(&self, active: bool) -> Result<()> {
        self.set_boolean("ChunkModeActive", active)
    }

    fn set_enumeration(&self, key: &str, entry: &str) -> Result<()> {
        self.session
            .write_features(&[(key, FeatureValue::Enumeration(entry.to_string()))])
    }

    fn get_u32(&self, key: &str) -> Result<u32> {
        to_u32(key, self.get_integer(key)?)
    }
}

impl std::fmt::Debug for ParameterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterStore")
            .field("device", &self.session.info().device_id)
            .finish()
    }
}

/// Region writes in an order no intermediate state can violate: offsets to
/// zero, then size, then offsets.
fn region_writes(region: Region) -> [(&'static str, FeatureValue); 6] {
    [
        ("OffsetX", FeatureValue::Integer(0)),
        ("OffsetY", FeatureValue::Integer(0)),
        ("Width", FeatureValue::Integer(region.width.into())),
        ("Height", FeatureValue::Integer(region.height.into())),
        ("OffsetX", FeatureValue::Integer(region.x.into())),
        ("OffsetY", FeatureValue::Integer(region.y.into())),
    ]
}

fn type_mismatch(key: &str, expected: FeatureKind, found: &FeatureValue) -> Error {
    Error::local(
        key,
        format!("expected {expected:?} feature, found {:?}", found.kind()),
    )
}
