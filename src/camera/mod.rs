//! Device handle.
//!
//! A [`Camera`] owns one device session. Parameter, acquisition and tuning
//! views are cheap clones of that session and may be moved to other threads;
//! all of them fail with [`Error::AlreadyClosed`] once the camera is closed.

mod info;
mod session;

pub use info::DeviceInfo;

pub(crate) use session::Session;

use crate::acquisition::{AcquisitionController, AcquisitionState};
use crate::error::{Error, Result};
use crate::features::{FeatureValue, ParameterStore};
use crate::sim::Simulator;
use crate::stream::{ChannelShared, Stream, StreamSink};
use crate::transport::{Transport, TransportKind, TransportTuning};
use std::sync::Arc;

/// Opens a device from the default simulator by id or serial number.
///
/// `None` opens the first available device.
pub fn open_device(identifier: Option<&str>) -> Result<Camera> {
    Simulator::default().open(identifier)
}

/// Handle to a connected camera.
pub struct Camera {
    session: Arc<Session>,
}

impl Camera {
    /// Wraps an established transport connection.
    pub fn open_with(transport: Arc<dyn Transport>) -> Result<Self> {
        let session = Session::new(transport);
        tracing::info!(device = %session.info(), "Camera opened");
        Ok(Self { session })
    }

    /// Identity cached when the device was opened.
    pub fn info(&self) -> &DeviceInfo {
        self.session.info()
    }

    pub fn vendor_name(&self) -> Result<String> {
        self.read_string("DeviceVendorName")
    }

    pub fn model_name(&self) -> Result<String> {
        self.read_string("DeviceModelName")
    }

    pub fn device_id(&self) -> Result<String> {
        self.read_string("DeviceID")
    }

    pub fn serial_number(&self) -> Result<String> {
        self.read_string("DeviceSerialNumber")
    }

    /// Full sensor size in pixels as `(width, height)`.
    pub fn sensor_size(&self) -> Result<(u32, u32)> {
        let params = self.parameters();
        let width = params.get_integer("SensorWidth")?;
        let height = params.get_integer("SensorHeight")?;
        Ok((to_u32("SensorWidth", width)?, to_u32("SensorHeight", height)?))
    }

    /// Current payload size in bytes. Re-query after any region change.
    pub fn payload_size(&self) -> Result<usize> {
        self.parameters().payload_size()
    }

    pub fn is_gv_device(&self) -> Result<bool> {
        Ok(self.session.transport()?.kind() == TransportKind::GigEVision)
    }

    pub fn parameters(&self) -> ParameterStore {
        ParameterStore::new(Arc::clone(&self.session))
    }

    pub fn acquisition(&self) -> AcquisitionController {
        AcquisitionController::new(Arc::clone(&self.session))
    }

    /// Network transport tuning; [`Error::Unsupported`] on non-GigE devices.
    pub fn transport_tuning(&self) -> Result<TransportTuning> {
        TransportTuning::new(Arc::clone(&self.session))
    }

    /// Creates a stream with `buffer_count` buffers of the current payload size.
    ///
    /// On GigE devices the stream receives from the selected stream channel.
    pub fn create_stream(&self, buffer_count: usize) -> Result<Stream> {
        let transport = self.session.transport()?;
        let control = self.session.lock_control()?;
        if *control == AcquisitionState::Acquiring {
            return Err(Error::StreamCreateFailed(
                "acquisition is running".to_string(),
            ));
        }

        if buffer_count == 0 {
            return Err(Error::StreamCreateFailed("zero buffers requested".to_string()));
        }
        let max_buffers = transport.max_stream_buffers();
        if buffer_count > max_buffers {
            return Err(Error::StreamCreateFailed(format!(
                "{buffer_count} buffers requested, device allows {max_buffers}"
            )));
        }

        let payload = self.parameters().payload_size()?;
        if payload == 0 {
            return Err(Error::StreamCreateFailed("payload size is zero".to_string()));
        }

        let channel = match transport.kind() {
            TransportKind::GigEVision => match transport.read("GevStreamChannelSelector")? {
                FeatureValue::Integer(index) => to_u32("GevStreamChannelSelector", index)?,
                other => {
                    return Err(Error::rejected(
                        "GevStreamChannelSelector",
                        format!("unexpected value {other}"),
                    ))
                }
            },
            TransportKind::Usb3Vision => 0,
        };

        let shared = ChannelShared::new(channel, buffer_count, payload);
        transport
            .attach_stream(StreamSink::new(Arc::clone(&shared)))
            .map_err(|e| Error::StreamCreateFailed(e.to_string()))?;
        self.session.register_stream(&shared);
        drop(control);

        tracing::info!(
            channel,
            buffer_count,
            buffer_size = payload,
            "Stream created"
        );
        Ok(Stream::new(shared))
    }

    /// Aborts any acquisition, closes every stream and releases the device.
    ///
    /// A second call fails with [`Error::AlreadyClosed`].
    pub fn close(&self) -> Result<()> {
        if !self.session.mark_closed() {
            return Err(Error::AlreadyClosed);
        }
        let result = self.session.release();
        tracing::info!(device = %self.session.info().device_id, "Camera closed");
        result
    }

    pub fn is_closed(&self) -> bool {
        self.session.ensure_open().is_err()
    }

    fn read_string(&self, name: &str) -> Result<String> {
        self.parameters().get_string(name)
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "Failed to release camera on drop");
        }
    }
}

impl std::fmt::Debug for Camera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Camera")
            .field("device", &self.session.info().device_id)
            .field("state", &self.session.state())
            .field("closed", &self.is_closed())
            .finish()
    }
}

pub(crate) fn to_u32(feature: &str, value: i64) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| Error::rejected(feature, format!("value {value} does not fit in u32")))
}
