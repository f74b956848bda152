//! State shared by a camera handle and every view cloned from it.
//!
//! The control lock serializes parameter writes against acquisition
//! transitions: setters and `start`/`stop`/`abort` all take it, and writes to
//! stream-shaping features are refused unless the state is Idle.

use crate::acquisition::AcquisitionState;
use crate::camera::DeviceInfo;
use crate::error::{Error, Result};
use crate::features::FeatureValue;
use crate::stream::ChannelShared;
use crate::transport::Transport;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Features whose value shapes the stream or the acquisition mode.
const STREAM_SHAPING_FEATURES: &[&str] = &[
    "OffsetX",
    "OffsetY",
    "Width",
    "Height",
    "BinningHorizontal",
    "BinningVertical",
    "PixelFormat",
    "AcquisitionMode",
    "TriggerSelector",
    "TriggerMode",
    "TriggerSource",
    "TriggerActivation",
    "ChunkModeActive",
    "GevStreamChannelSelector",
    "GevSCPSPacketSize",
    "GevSCPD",
];

pub(crate) fn is_stream_shaping(name: &str) -> bool {
    STREAM_SHAPING_FEATURES.contains(&name)
}

pub(crate) struct Session {
    transport: Arc<dyn Transport>,
    info: DeviceInfo,
    control: Mutex<AcquisitionState>,
    /// Mirror of the control state readable without the lock.
    published: AtomicU8,
    closed: AtomicBool,
    streams: Mutex<StreamRegistry>,
}

/// Live streams of a session and the halt flag new streams start with.
#[derive(Default)]
struct StreamRegistry {
    halted: bool,
    live: Vec<Weak<ChannelShared>>,
}

pub(crate) type ControlGuard<'a> = MutexGuard<'a, AcquisitionState>;

impl Session {
    pub(crate) fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        let info = transport.info().clone();
        Arc::new(Self {
            transport,
            info,
            control: Mutex::new(AcquisitionState::Idle),
            published: AtomicU8::new(AcquisitionState::Idle as u8),
            closed: AtomicBool::new(false),
            streams: Mutex::new(StreamRegistry::default()),
        })
    }

    pub(crate) fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::AlreadyClosed)
        } else {
            Ok(())
        }
    }

    /// Transport of an open session.
    pub(crate) fn transport(&self) -> Result<&dyn Transport> {
        self.ensure_open()?;
        Ok(self.transport.as_ref())
    }

    pub(crate) fn lock_control(&self) -> Result<ControlGuard<'_>> {
        self.ensure_open()?;
        Ok(self
            .control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    pub(crate) fn set_state(&self, guard: &mut ControlGuard<'_>, state: AcquisitionState) {
        **guard = state;
        self.published.store(state as u8, Ordering::Release);
    }

    pub(crate) fn state(&self) -> AcquisitionState {
        AcquisitionState::from_u8(self.published.load(Ordering::Acquire))
    }

    /// Writes features in order under a single hold of the control lock.
    pub(crate) fn write_features(&self, writes: &[(&str, FeatureValue)]) -> Result<()> {
        let guard = self.lock_control()?;
        self.write_locked(&guard, writes)
    }

    /// Fails with [`Error::ModeChangeWhileActive`] unless acquisition is Idle.
    pub(crate) fn ensure_idle(&self, guard: &ControlGuard<'_>, feature: &str) -> Result<()> {
        if **guard == AcquisitionState::Idle {
            Ok(())
        } else {
            Err(Error::ModeChangeWhileActive {
                feature: feature.to_string(),
            })
        }
    }

    /// Writes features in order, all or nothing.
    ///
    /// Mode checks run before the first write. If the device rejects a later
    /// write, the features already written get their previous values back in
    /// reverse order.
    pub(crate) fn write_locked(
        &self,
        guard: &ControlGuard<'_>,
        writes: &[(&str, FeatureValue)],
    ) -> Result<()> {
        for (name, _) in writes {
            if is_stream_shaping(name) {
                self.ensure_idle(guard, name)?;
            }
        }

        let mut undo = Vec::with_capacity(writes.len());
        for (name, value) in writes {
            let previous = if writes.len() > 1 {
                self.transport.read(name).ok()
            } else {
                None
            };
            if let Err(e) = self.transport.write(name, value.clone()) {
                self.roll_back(undo);
                return Err(e);
            }
            tracing::debug!(feature = %name, value = %value, "Feature written");
            undo.push((*name, previous));
        }
        Ok(())
    }

    fn roll_back(&self, undo: Vec<(&str, Option<FeatureValue>)>) {
        for (name, previous) in undo.into_iter().rev() {
            let Some(previous) = previous else {
                tracing::warn!(feature = %name, "No previous value to restore");
                continue;
            };
            if let Err(e) = self.transport.write(name, previous) {
                tracing::warn!(feature = %name, error = %e, "Feature restore failed");
            }
        }
    }

    /// Tracks a new stream. It starts halted if acquisition was stopped
    /// since the last start.
    pub(crate) fn register_stream(&self, shared: &Arc<ChannelShared>) {
        let mut streams = self.lock_streams();
        shared.set_halted(streams.halted);
        streams.live.retain(|weak| weak.strong_count() > 0);
        streams.live.push(Arc::downgrade(shared));
    }

    /// Halts or resumes every live stream of this device.
    pub(crate) fn halt_streams(&self, halted: bool) {
        let mut streams = self.lock_streams();
        streams.halted = halted;
        for shared in streams.live.iter().filter_map(Weak::upgrade) {
            shared.set_halted(halted);
        }
    }

    /// Marks the session closed. Returns false if it already was.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Releases device resources after [`mark_closed`](Self::mark_closed).
    pub(crate) fn release(&self) -> Result<()> {
        let mut control = self
            .control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let was = *control;
        if was != AcquisitionState::Idle {
            self.set_state(&mut control, AcquisitionState::Aborting);
        }
        let result = self.transport.shutdown();
        for shared in self.lock_streams().live.drain(..).filter_map(|weak| weak.upgrade()) {
            shared.close();
        }
        self.set_state(&mut control, AcquisitionState::Idle);
        result
    }

    fn lock_streams(&self) -> MutexGuard<'_, StreamRegistry> {
        self.streams
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_shaping_set() {
        assert!(is_stream_shaping("Width"));
        assert!(is_stream_shaping("TriggerSource"));
        assert!(!is_stream_shaping("Gain"));
        assert!(!is_stream_shaping("ExposureTime"));
    }
}
