//! Acquisition control.
//!
//! State machine over the device's acquisition commands:
//!
//! ```text
//!   Idle ──arm──► Armed
//!    │  ╲          │
//!    │   start   start
//!    │     ╲       │
//!    │      ▼      ▼
//!    │      Acquiring ──stop──► Idle
//!    │          │
//!   abort     abort ──► Aborting ──► Idle
//! ```
//!
//! Mode changes (acquisition mode, trigger configuration, and every other
//! stream-shaping feature) are accepted only in Idle.

mod trigger;

pub use trigger::TriggerSource;

use crate::camera::Session;
use crate::error::{Error, Result};
use crate::features::FeatureValue;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// Acquisition controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AcquisitionState {
    Idle = 0,
    /// Configuration checked and latched; no frames yet.
    Armed = 1,
    Acquiring = 2,
    /// Abort in progress.
    Aborting = 3,
}

impl AcquisitionState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => AcquisitionState::Armed,
            2 => AcquisitionState::Acquiring,
            3 => AcquisitionState::Aborting,
            _ => AcquisitionState::Idle,
        }
    }
}

impl std::fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AcquisitionState::Idle => "idle",
            AcquisitionState::Armed => "armed",
            AcquisitionState::Acquiring => "acquiring",
            AcquisitionState::Aborting => "aborting",
        };
        f.write_str(name)
    }
}

/// Whether capture free-runs or stops after one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AcquisitionMode {
    #[default]
    Continuous,
    SingleFrame,
}

impl AcquisitionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcquisitionMode::Continuous => "Continuous",
            AcquisitionMode::SingleFrame => "SingleFrame",
        }
    }
}

impl FromStr for AcquisitionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Continuous" => Ok(AcquisitionMode::Continuous),
            "SingleFrame" => Ok(AcquisitionMode::SingleFrame),
            other => Err(Error::local(
                "AcquisitionMode",
                format!("unknown acquisition mode '{other}'"),
            )),
        }
    }
}

/// Drives acquisition on one camera.
///
/// Clones share the camera, so one thread can start and stop acquisition
/// while others drain streams.
#[derive(Clone)]
pub struct AcquisitionController {
    session: Arc<Session>,
}

impl AcquisitionController {
    pub(crate) fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub fn state(&self) -> AcquisitionState {
        self.session.state()
    }

    /// Checks the configuration can stream and latches it.
    pub fn arm(&self) -> Result<()> {
        let mut control = self.session.lock_control()?;
        match *control {
            AcquisitionState::Idle => {}
            AcquisitionState::Armed => return Ok(()),
            state => return Err(invalid_state("arm", state)),
        }
        self.ensure_payload()?;
        self.session.set_state(&mut control, AcquisitionState::Armed);
        tracing::debug!("Acquisition armed");
        Ok(())
    }

    /// Starts acquisition from Idle or Armed.
    ///
    /// Starting while already acquiring is an error, not a no-op.
    pub fn start(&self) -> Result<()> {
        let mut control = self.session.lock_control()?;
        match *control {
            AcquisitionState::Idle | AcquisitionState::Armed => {}
            state => return Err(invalid_state("start", state)),
        }
        self.ensure_payload()?;

        self.session.halt_streams(false);
        if let Err(e) = self.session.transport()?.execute("AcquisitionStart") {
            self.session.halt_streams(true);
            tracing::warn!(error = %e, "Acquisition start failed");
            return Err(e);
        }
        self.session
            .set_state(&mut control, AcquisitionState::Acquiring);
        tracing::info!(device = %self.session.info().device_id, "Acquisition started");
        Ok(())
    }

    /// Stops acquisition after the in-flight frame is delivered.
    ///
    /// Consumers drain the frames already queued, then see
    /// [`Error::Closed`] until acquisition starts again.
    pub fn stop(&self) -> Result<()> {
        let mut control = self.session.lock_control()?;
        if *control != AcquisitionState::Acquiring {
            return Err(invalid_state("stop", *control));
        }
        self.session.transport()?.execute("AcquisitionStop")?;
        self.session.halt_streams(true);
        self.session.set_state(&mut control, AcquisitionState::Idle);
        tracing::info!(device = %self.session.info().device_id, "Acquisition stopped");
        Ok(())
    }

    /// Aborts immediately from any state, possibly discarding the in-flight
    /// frame. The controller ends in Idle even if the device reports an error.
    pub fn abort(&self) -> Result<()> {
        let mut control = self.session.lock_control()?;
        let previous = *control;
        self.session
            .set_state(&mut control, AcquisitionState::Aborting);

        let result = self.session.transport()?.execute("AcquisitionAbort");
        if previous == AcquisitionState::Acquiring {
            self.session.halt_streams(true);
        }
        self.session.set_state(&mut control, AcquisitionState::Idle);

        match &result {
            Ok(()) => tracing::info!(from = %previous, "Acquisition aborted"),
            Err(e) => tracing::warn!(from = %previous, error = %e, "Acquisition abort reported an error"),
        }
        result
    }

    /// Requests one frame.
    ///
    /// Valid only while acquiring with the trigger enabled and sourced from
    /// software. A trigger sent before the previous frame completes is
    /// rejected by the device.
    pub fn software_trigger(&self) -> Result<()> {
        let control = self.session.lock_control()?;
        if *control != AcquisitionState::Acquiring {
            return Err(invalid_state("software_trigger", *control));
        }
        let transport = self.session.transport()?;

        let mode = transport.read("TriggerMode")?.to_string();
        if mode != "On" {
            return Err(Error::InvalidState {
                operation: "software_trigger",
                reason: "trigger mode is off".to_string(),
            });
        }
        let source = transport.read("TriggerSource")?.to_string();
        if source.parse::<TriggerSource>()? != TriggerSource::Software {
            return Err(Error::InvalidState {
                operation: "software_trigger",
                reason: format!("trigger source is {source}"),
            });
        }

        transport.execute("TriggerSoftware")?;
        tracing::trace!("Software trigger sent");
        Ok(())
    }

    pub fn acquisition_mode(&self) -> Result<AcquisitionMode> {
        self.session
            .transport()?
            .read("AcquisitionMode")?
            .to_string()
            .parse()
    }

    pub fn set_acquisition_mode(&self, mode: AcquisitionMode) -> Result<()> {
        self.session
            .write_features(&[("AcquisitionMode", enumeration(mode.as_str()))])
    }

    /// Configures frame-start triggering from `source` on the rising edge,
    /// in continuous mode.
    pub fn set_trigger(&self, source: &TriggerSource) -> Result<()> {
        let source = source.to_string();
        self.session.write_features(&[
            ("AcquisitionMode", enumeration("Continuous")),
            ("TriggerSelector", enumeration("FrameStart")),
            ("TriggerMode", enumeration("On")),
            ("TriggerSource", enumeration(&source)),
            ("TriggerActivation", enumeration("RisingEdge")),
        ])?;
        tracing::info!(%source, "Frame trigger configured");
        Ok(())
    }

    /// Selects the trigger source without touching the trigger mode.
    pub fn set_trigger_source(&self, source: &TriggerSource) -> Result<()> {
        self.session
            .write_features(&[("TriggerSource", enumeration(&source.to_string()))])
    }

    pub fn trigger_source(&self) -> Result<TriggerSource> {
        self.session
            .transport()?
            .read("TriggerSource")?
            .to_string()
            .parse()
    }

    /// Trigger sources offered by the device.
    pub fn trigger_sources(&self) -> Result<Vec<TriggerSource>> {
        self.session
            .transport()?
            .enum_entries("TriggerSource")?
            .iter()
            .map(|name| name.parse())
            .collect()
    }

    /// Returns to free-running capture.
    pub fn clear_triggers(&self) -> Result<()> {
        self.session.write_features(&[
            ("TriggerSelector", enumeration("FrameStart")),
            ("TriggerMode", enumeration("Off")),
        ])
    }

    fn ensure_payload(&self) -> Result<()> {
        match self.session.transport()?.read("PayloadSize")? {
            FeatureValue::Integer(size) if size > 0 => Ok(()),
            other => Err(Error::InvalidState {
                operation: "start",
                reason: format!("payload size is {other}"),
            }),
        }
    }
}

impl std::fmt::Debug for AcquisitionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionController")
            .field("state", &self.session.state())
            .finish()
    }
}

fn enumeration(entry: &str) -> FeatureValue {
    FeatureValue::Enumeration(entry.to_string())
}

fn invalid_state(operation: &'static str, state: AcquisitionState) -> Error {
    Error::InvalidState {
        operation,
        reason: format!("acquisition is {state}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::open_device;
    use std::time::Duration;

    #[test]
    fn test_start_stop_cycle() {
        let camera = open_device(Some("sim1")).unwrap();
        let control = camera.acquisition();
        assert_eq!(control.state(), AcquisitionState::Idle);

        control.start().unwrap();
        assert_eq!(control.state(), AcquisitionState::Acquiring);
        control.stop().unwrap();
        assert_eq!(control.state(), AcquisitionState::Idle);

        control.arm().unwrap();
        assert_eq!(control.state(), AcquisitionState::Armed);
        control.start().unwrap();
        control.abort().unwrap();
        assert_eq!(control.state(), AcquisitionState::Idle);
    }

    #[test]
    fn test_double_start_is_an_error() {
        let camera = open_device(Some("sim1")).unwrap();
        let control = camera.acquisition();
        control.start().unwrap();

        assert!(matches!(
            control.start(),
            Err(Error::InvalidState { operation: "start", .. })
        ));
        assert_eq!(control.state(), AcquisitionState::Acquiring);
        control.stop().unwrap();
    }

    #[test]
    fn test_stop_requires_acquiring() {
        let camera = open_device(Some("sim1")).unwrap();
        assert!(matches!(
            camera.acquisition().stop(),
            Err(Error::InvalidState { operation: "stop", .. })
        ));
        camera.acquisition().abort().unwrap();
    }

    #[test]
    fn test_mode_change_while_active() {
        let camera = open_device(Some("sim0")).unwrap();
        let control = camera.acquisition();
        control.start().unwrap();

        assert!(matches!(
            control.set_acquisition_mode(AcquisitionMode::Continuous),
            Err(Error::ModeChangeWhileActive { .. })
        ));
        assert!(matches!(
            control.set_trigger(&TriggerSource::Software),
            Err(Error::ModeChangeWhileActive { .. })
        ));
        assert!(matches!(
            camera.parameters().set_region(crate::features::Region::new(0, 0, 64, 64)),
            Err(Error::ModeChangeWhileActive { .. })
        ));
        // Non-shaping features stay writable.
        camera.parameters().set_gain(3.0).unwrap();

        control.stop().unwrap();
        control
            .set_acquisition_mode(AcquisitionMode::SingleFrame)
            .unwrap();
        assert_eq!(
            control.acquisition_mode().unwrap(),
            AcquisitionMode::SingleFrame
        );
    }

    #[test]
    fn test_armed_blocks_mode_change() {
        let camera = open_device(Some("sim1")).unwrap();
        let control = camera.acquisition();
        control.arm().unwrap();
        assert!(matches!(
            control.set_acquisition_mode(AcquisitionMode::SingleFrame),
            Err(Error::ModeChangeWhileActive { .. })
        ));
        control.abort().unwrap();
        control
            .set_acquisition_mode(AcquisitionMode::SingleFrame)
            .unwrap();
    }

    #[test]
    fn test_software_trigger_preconditions() {
        let camera = open_device(Some("sim1")).unwrap();
        let control = camera.acquisition();

        assert!(matches!(
            control.software_trigger(),
            Err(Error::InvalidState { .. })
        ));

        control.start().unwrap();
        assert!(matches!(
            control.software_trigger(),
            Err(Error::InvalidState { .. })
        ));
        control.stop().unwrap();

        control.set_trigger(&TriggerSource::Line(1)).unwrap();
        control.start().unwrap();
        assert!(matches!(
            control.software_trigger(),
            Err(Error::InvalidState { .. })
        ));
        control.abort().unwrap();
    }

    #[test]
    fn test_trigger_configuration() {
        let camera = open_device(Some("sim0")).unwrap();
        let control = camera.acquisition();

        control.set_trigger(&TriggerSource::Software).unwrap();
        assert_eq!(control.trigger_source().unwrap(), TriggerSource::Software);
        assert!(control.trigger_sources().unwrap().contains(&TriggerSource::Line(0)));

        control.clear_triggers().unwrap();
        assert_eq!(camera.parameters().get_string("TriggerMode").unwrap(), "Off");
    }

    #[test]
    fn test_controller_usable_from_another_thread() {
        let camera = open_device(Some("sim1")).unwrap();
        camera.parameters().set_frame_rate(100.0).unwrap();
        let stream = camera.create_stream(4).unwrap();
        let control = camera.acquisition();

        control.start().unwrap();
        let stopper = std::thread::spawn({
            let control = control.clone();
            move || {
                std::thread::sleep(Duration::from_millis(100));
                control.stop()
            }
        });

        let mut received = 0;
        loop {
            match stream.pop(Duration::from_secs(2)) {
                Ok(_) => received += 1,
                Err(Error::Closed) => break,
                Err(e) => panic!("unexpected error {e}"),
            }
        }
        stopper.join().unwrap().unwrap();
        assert!(received > 0);
    }
}
