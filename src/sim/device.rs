//! Simulated device connection.

use super::features::{FeatureTable, FrameSettings};
use super::model::SimModel;
use super::producer::{self, Command};
use crate::camera::DeviceInfo;
use crate::error::{Error, Result};
use crate::features::{Bounds, FeatureKind, FeatureValue};
use crate::stream::StreamSink;
use crate::transport::{Transport, TransportKind};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

/// State shared between the device and its producer thread.
pub(super) struct SimShared {
    state: Mutex<SimState>,
}

struct SimState {
    table: FeatureTable,
    sinks: Vec<StreamSink>,
    streaming: bool,
    /// A software trigger was accepted and its frame is not delivered yet.
    trigger_pending: bool,
    unreachable: bool,
}

impl SimShared {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(super) fn frame_settings(&self) -> Result<FrameSettings> {
        let state = self.lock();
        state.check_reachable()?;
        state.table.frame_settings()
    }

    pub(super) fn live_sinks(&self) -> Vec<StreamSink> {
        let mut state = self.lock();
        state.sinks.retain(|sink| !sink.is_closed());
        state.sinks.clone()
    }

    pub(super) fn clear_trigger(&self) {
        self.lock().trigger_pending = false;
    }
}

impl SimState {
    fn check_reachable(&self) -> Result<()> {
        if self.unreachable {
            return Err(Error::DeviceUnreachable("device does not answer".to_string()));
        }
        Ok(())
    }
}

struct Producer {
    commands: Sender<Command>,
    handle: JoinHandle<()>,
}

/// A simulated GenICam device.
///
/// Features live in an in-memory table; acquisition runs a producer thread
/// that renders frames into the buffers of attached streams.
pub struct SimCamera {
    info: DeviceInfo,
    kind: TransportKind,
    max_buffers: usize,
    link_mtu: u32,
    shared: Arc<SimShared>,
    producer: Mutex<Option<Producer>>,
}

impl SimCamera {
    pub fn new(model: &SimModel) -> Self {
        let info = DeviceInfo {
            vendor_name: model.vendor.clone(),
            model_name: model.model.clone(),
            device_id: model.id.clone(),
            serial_number: model.serial.clone(),
            sensor_width: model.sensor_width,
            sensor_height: model.sensor_height,
            transport: model.transport,
        };
        let state = SimState {
            table: FeatureTable::for_model(model),
            sinks: Vec::new(),
            streaming: false,
            trigger_pending: false,
            unreachable: false,
        };
        Self {
            info,
            kind: model.transport,
            max_buffers: model.max_buffers,
            link_mtu: model.link_mtu,
            shared: Arc::new(SimShared {
                state: Mutex::new(state),
            }),
            producer: Mutex::new(None),
        }
    }

    /// Simulates a cable pull: every later request fails with
    /// [`Error::DeviceUnreachable`] and a running producer stops.
    pub fn disconnect(&self) {
        self.shared.lock().unreachable = true;
        tracing::warn!(device = %self.info.device_id, "Simulated device disconnected");
    }

    pub fn reconnect(&self) {
        self.shared.lock().unreachable = false;
        tracing::info!(device = %self.info.device_id, "Simulated device reconnected");
    }

    /// True while a producer thread is running.
    pub fn is_streaming(&self) -> bool {
        self.shared.lock().streaming
    }

    fn lock_producer(&self) -> MutexGuard<'_, Option<Producer>> {
        self.producer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn reachable(&self) -> Result<MutexGuard<'_, SimState>> {
        let state = self.shared.lock();
        state.check_reachable()?;
        Ok(state)
    }

    fn start_producer(&self) -> Result<()> {
        let mut slot = self.lock_producer();
        if slot.is_some() {
            return Err(Error::rejected("AcquisitionStart", "acquisition already running"));
        }
        {
            let mut state = self.reachable()?;
            state.streaming = true;
            state.trigger_pending = false;
        }

        let (commands, receiver) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let link_mtu = self.link_mtu;
        let spawned = std::thread::Builder::new()
            .name(format!("{}-producer", self.info.device_id))
            .spawn(move || producer::run(shared, receiver, link_mtu));

        match spawned {
            Ok(handle) => {
                *slot = Some(Producer { commands, handle });
                Ok(())
            }
            Err(e) => {
                self.shared.lock().streaming = false;
                Err(Error::DeviceUnreachable(format!("cannot start producer: {e}")))
            }
        }
    }

    /// Sends `command` to the producer and waits for it to exit.
    fn stop_producer(&self, command: Command) {
        if let Some(Producer { commands, handle }) = self.lock_producer().take() {
            // The thread may already have exited after losing the device.
            let _ = commands.send(command);
            if handle.join().is_err() {
                tracing::error!(device = %self.info.device_id, "Frame producer panicked");
            }
        }
        let mut state = self.shared.lock();
        state.streaming = false;
        state.trigger_pending = false;
    }

    fn trigger(&self) -> Result<()> {
        let slot = self.lock_producer();
        let Some(running) = slot.as_ref() else {
            return Err(Error::rejected("TriggerSoftware", "acquisition not running"));
        };
        {
            let mut state = self.reachable()?;
            if state.table.enum_value("TriggerMode")? != "On" {
                return Err(Error::rejected("TriggerSoftware", "trigger mode is off"));
            }
            if state.trigger_pending {
                return Err(Error::rejected(
                    "TriggerSoftware",
                    "trigger overlap: previous frame still pending",
                ));
            }
            state.trigger_pending = true;
        }
        running.commands.send(Command::Trigger).map_err(|_| {
            self.shared.lock().trigger_pending = false;
            Error::DeviceUnreachable("frame producer stopped".to_string())
        })
    }
}

impl Transport for SimCamera {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn feature_kind(&self, name: &str) -> Result<FeatureKind> {
        self.reachable()?.table.kind(name)
    }

    fn read(&self, name: &str) -> Result<FeatureValue> {
        self.reachable()?.table.read(name)
    }

    fn write(&self, name: &str, value: FeatureValue) -> Result<()> {
        let mut state = self.reachable()?;
        let streaming = state.streaming;
        state.table.write(name, value, streaming)
    }

    fn integer_bounds(&self, name: &str) -> Result<Bounds<i64>> {
        self.reachable()?.table.integer_bounds(name)
    }

    fn float_bounds(&self, name: &str) -> Result<Bounds<f64>> {
        self.reachable()?.table.float_bounds(name)
    }

    fn increment(&self, name: &str) -> Result<i64> {
        self.reachable()?.table.increment(name)
    }

    fn enum_entries(&self, name: &str) -> Result<Vec<String>> {
        self.reachable()?.table.enum_entries(name)
    }

    fn execute(&self, command: &str) -> Result<()> {
        self.reachable()?.table.check_command(command)?;
        match command {
            "AcquisitionStart" => self.start_producer(),
            "AcquisitionStop" => {
                self.stop_producer(Command::Stop);
                Ok(())
            }
            "AcquisitionAbort" => {
                self.stop_producer(Command::Abort);
                Ok(())
            }
            "TriggerSoftware" => self.trigger(),
            _ => Ok(()),
        }
    }

    fn max_stream_buffers(&self) -> usize {
        self.max_buffers
    }

    fn attach_stream(&self, sink: StreamSink) -> Result<()> {
        let mut state = self.reachable()?;
        let capacity = sink.buffer_size();
        if capacity == 0 {
            return Err(Error::rejected("PayloadSize", "stream buffers are empty"));
        }
        state.sinks.retain(|existing| !existing.is_closed());
        state.sinks.push(sink);
        tracing::debug!(
            device = %self.info.device_id,
            streams = state.sinks.len(),
            "Stream attached"
        );
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        self.stop_producer(Command::Abort);
        self.shared.lock().sinks.clear();
        Ok(())
    }
}

impl std::fmt::Debug for SimCamera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimCamera")
            .field("device", &self.info.device_id)
            .field("transport", &self.kind)
            .finish()
    }
}

impl Drop for SimCamera {
    fn drop(&mut self) {
        self.stop_producer(Command::Abort);
    }
}
