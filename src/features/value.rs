//! Typed feature values and the small enumerations built on them.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Interface type of a named feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    Integer,
    Float,
    Boolean,
    String,
    Enumeration,
    /// Write-only action such as `AcquisitionStart`.
    Command,
}

/// Value held by a feature.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
    /// Symbolic name of the selected enumeration entry.
    Enumeration(String),
}

impl FeatureValue {
    /// Returns the interface type of this value.
    pub fn kind(&self) -> FeatureKind {
        match self {
            FeatureValue::Integer(_) => FeatureKind::Integer,
            FeatureValue::Float(_) => FeatureKind::Float,
            FeatureValue::Boolean(_) => FeatureKind::Boolean,
            FeatureValue::String(_) => FeatureKind::String,
            FeatureValue::Enumeration(_) => FeatureKind::Enumeration,
        }
    }

    /// Converts text into a value of the given kind.
    ///
    /// Failures are local validation errors: the device never sees them.
    pub fn parse(kind: FeatureKind, feature: &str, text: &str) -> Result<Self> {
        let text = text.trim();
        match kind {
            FeatureKind::Integer => text
                .parse::<i64>()
                .map(FeatureValue::Integer)
                .map_err(|e| Error::local(feature, format!("'{text}' is not an integer: {e}"))),
            FeatureKind::Float => {
                let value = text
                    .parse::<f64>()
                    .map_err(|e| Error::local(feature, format!("'{text}' is not a number: {e}")))?;
                check_finite(feature, value)?;
                Ok(FeatureValue::Float(value))
            }
            FeatureKind::Boolean => match text.to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(FeatureValue::Boolean(true)),
                "false" | "0" => Ok(FeatureValue::Boolean(false)),
                _ => Err(Error::local(feature, format!("'{text}' is not a boolean"))),
            },
            FeatureKind::String => Ok(FeatureValue::String(text.to_string())),
            FeatureKind::Enumeration => {
                if text.is_empty() {
                    return Err(Error::local(feature, "empty enumeration entry"));
                }
                Ok(FeatureValue::Enumeration(text.to_string()))
            }
            FeatureKind::Command => Err(Error::local(feature, "commands carry no value")),
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureValue::Integer(v) => write!(f, "{v}"),
            FeatureValue::Float(v) => write!(f, "{v}"),
            FeatureValue::Boolean(v) => write!(f, "{v}"),
            FeatureValue::String(v) | FeatureValue::Enumeration(v) => f.write_str(v),
        }
    }
}

pub(crate) fn check_finite(feature: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(Error::local(feature, "not a finite number"))
    }
}

/// Inclusive range reported by the device for a numeric feature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds<T> {
    pub min: T,
    pub max: T,
}

impl<T: PartialOrd + Copy> Bounds<T> {
    pub fn new(min: T, max: T) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn contains(&self, value: T) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Automatic control mode for exposure and gain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoMode {
    Off,
    Once,
    Continuous,
}

impl AutoMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoMode::Off => "Off",
            AutoMode::Once => "Once",
            AutoMode::Continuous => "Continuous",
        }
    }
}

impl FromStr for AutoMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Off" => Ok(AutoMode::Off),
            "Once" => Ok(AutoMode::Once),
            "Continuous" => Ok(AutoMode::Continuous),
            other => Err(Error::local("AutoMode", format!("unknown auto mode '{other}'"))),
        }
    }
}

/// Pixel layout of the delivered image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Mono8,
    /// 16-bit little-endian samples.
    Mono16,
    #[serde(rename = "RGB8")]
    Rgb8,
}

impl PixelFormat {
    /// All formats known to this crate.
    pub const ALL: [PixelFormat; 3] = [PixelFormat::Mono8, PixelFormat::Mono16, PixelFormat::Rgb8];

    /// GenICam entry name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PixelFormat::Mono8 => "Mono8",
            PixelFormat::Mono16 => "Mono16",
            PixelFormat::Rgb8 => "RGB8",
        }
    }

    #[inline]
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Mono8 => 1,
            PixelFormat::Mono16 => 2,
            PixelFormat::Rgb8 => 3,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PixelFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        PixelFormat::ALL
            .into_iter()
            .find(|format| format.as_str() == s)
            .ok_or_else(|| Error::local("PixelFormat", format!("unknown pixel format '{s}'")))
    }
}
