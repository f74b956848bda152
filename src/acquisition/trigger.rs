use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Signal that starts each frame when triggering is enabled.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TriggerSource {
    /// Driven by [`software_trigger`](super::AcquisitionController::software_trigger).
    Software,
    /// Hardware input line `LineN`.
    Line(u8),
    /// Any other device-specific source name.
    Named(String),
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerSource::Software => f.write_str("Software"),
            TriggerSource::Line(n) => write!(f, "Line{n}"),
            TriggerSource::Named(name) => f.write_str(name),
        }
    }
}

impl FromStr for TriggerSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::local("TriggerSource", "empty source name"));
        }
        if s == "Software" {
            return Ok(TriggerSource::Software);
        }
        if let Some(line) = s.strip_prefix("Line").and_then(|n| n.parse().ok()) {
            return Ok(TriggerSource::Line(line));
        }
        Ok(TriggerSource::Named(s.to_string()))
    }
}
