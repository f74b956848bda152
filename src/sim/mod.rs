//! In-process simulated cameras.
//!
//! A [`Simulator`] stands in for device discovery: it holds a list of
//! [`SimModel`] profiles and connects to one on request. Each connection is a
//! [`SimCamera`] implementing [`Transport`](crate::transport::Transport),
//! with its own feature table and frame producer thread.

mod device;
mod features;
mod model;
mod producer;

pub use device::SimCamera;
pub use model::SimModel;

use crate::camera::Camera;
use crate::error::{Error, Result};
use std::sync::Arc;

/// Set of simulated devices available for opening.
#[derive(Debug, Clone)]
pub struct Simulator {
    models: Vec<SimModel>,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new(SimModel::defaults())
    }
}

impl Simulator {
    pub fn new(models: Vec<SimModel>) -> Self {
        Self { models }
    }

    /// Profiles this simulator can connect to, in discovery order.
    pub fn devices(&self) -> &[SimModel] {
        &self.models
    }

    /// Connects to a device by id or serial number; `None` picks the first.
    ///
    /// The returned handle is the raw transport. Tests keep it to
    /// [`disconnect`](SimCamera::disconnect) the device under a [`Camera`].
    pub fn connect(&self, identifier: Option<&str>) -> Result<Arc<SimCamera>> {
        let model = match identifier {
            Some(id) => self.models.iter().find(|model| model.matches(id)),
            None => self.models.first(),
        };
        let model = model.ok_or_else(|| Error::NotFound {
            what: "device",
            name: identifier.unwrap_or("<any>").to_string(),
        })?;

        tracing::debug!(device = %model.id, model = %model.model, "Connecting to simulated device");
        Ok(Arc::new(SimCamera::new(model)))
    }

    /// Connects and wraps the device in a [`Camera`].
    pub fn open(&self, identifier: Option<&str>) -> Result<Camera> {
        let device = self.connect(identifier)?;
        Camera::open_with(device)
    }
}
