//! Region of interest on the sensor.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Active rectangular sub-area of the sensor, in (binned) pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Region covering a whole sensor of the given size.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    #[inline]
    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Checks that the region is non-empty.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::local(
                "Region",
                format!("empty region {}x{}", self.width, self.height),
            ));
        }
        Ok(())
    }

    /// Returns true if the region lies inside a `max_width` x `max_height` area.
    pub fn fits_within(&self, max_width: u32, max_height: u32) -> bool {
        u64::from(self.x) + u64::from(self.width) <= u64::from(max_width)
            && u64::from(self.y) + u64::from(self.height) <= u64::from(max_height)
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}
