//! GigE Vision stream tuning.
//!
//! Packet size and inter-packet delay change how frames cross the network,
//! not what they contain. A packet size the link cannot carry loses every
//! frame, which consumers observe as stream timeouts. The channel selector
//! picks the channel new streams attach to; packet size and delay are
//! device-wide and apply to every channel. All settings change only while
//! Idle.

use super::TransportKind;
use crate::camera::{to_u32, Session};
use crate::error::{Error, Result};
use crate::features::{Bounds, FeatureValue};
use std::sync::Arc;

/// Packet-level settings of a GigE Vision device.
#[derive(Clone)]
pub struct TransportTuning {
    session: Arc<Session>,
}

impl TransportTuning {
    pub(crate) fn new(session: Arc<Session>) -> Result<Self> {
        if session.transport()?.kind() != TransportKind::GigEVision {
            return Err(Error::Unsupported(
                "packet tuning requires a GigE Vision device".to_string(),
            ));
        }
        Ok(Self { session })
    }

    pub fn stream_channel_count(&self) -> Result<u32> {
        self.read_u32("GevStreamChannelCount")
    }

    /// Selects the stream channel the next stream attaches to.
    pub fn select_stream_channel(&self, index: u32) -> Result<()> {
        let count = self.stream_channel_count()?;
        if index >= count {
            return Err(Error::rejected(
                "GevStreamChannelSelector",
                format!("channel {index} out of {count}"),
            ));
        }
        self.write("GevStreamChannelSelector", i64::from(index))
    }

    pub fn current_stream_channel(&self) -> Result<u32> {
        self.read_u32("GevStreamChannelSelector")
    }

    /// Stream packet size in bytes.
    pub fn packet_size(&self) -> Result<u32> {
        self.read_u32("GevSCPSPacketSize")
    }

    pub fn set_packet_size(&self, bytes: u32) -> Result<()> {
        if bytes == 0 {
            return Err(Error::local("GevSCPSPacketSize", "packet size must be positive"));
        }
        self.write("GevSCPSPacketSize", i64::from(bytes))?;
        tracing::info!(bytes, "Packet size set");
        Ok(())
    }

    pub fn packet_size_bounds(&self) -> Result<Bounds<i64>> {
        self.session.transport()?.integer_bounds("GevSCPSPacketSize")
    }

    /// Inter-packet delay in device ticks.
    pub fn packet_delay(&self) -> Result<i64> {
        match self.session.transport()?.read("GevSCPD")? {
            FeatureValue::Integer(ticks) => Ok(ticks),
            other => Err(Error::rejected("GevSCPD", format!("unexpected value {other}"))),
        }
    }

    pub fn set_packet_delay(&self, ticks: i64) -> Result<()> {
        if ticks < 0 {
            return Err(Error::local("GevSCPD", "delay cannot be negative"));
        }
        self.write("GevSCPD", ticks)?;
        tracing::info!(ticks, "Packet delay set");
        Ok(())
    }

    fn read_u32(&self, name: &str) -> Result<u32> {
        match self.session.transport()?.read(name)? {
            FeatureValue::Integer(value) => to_u32(name, value),
            other => Err(Error::rejected(name, format!("unexpected value {other}"))),
        }
    }

    fn write(&self, name: &str, value: i64) -> Result<()> {
        self.session
            .write_features(&[(name, FeatureValue::Integer(value))])
    }
}

impl std::fmt::Debug for TransportTuning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportTuning")
            .field("device", &self.session.info().device_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::camera::open_device;
    use crate::error::Error;

    #[test]
    fn test_usb_device_has_no_tuning() {
        let camera = open_device(Some("sim1")).unwrap();
        assert!(!camera.is_gv_device().unwrap());
        assert!(matches!(camera.transport_tuning(), Err(Error::Unsupported(_))));
        assert!(matches!(
            camera.parameters().get_integer("GevSCPSPacketSize"),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_packet_settings_round_trip() {
        let camera = open_device(Some("sim0")).unwrap();
        let tuning = camera.transport_tuning().unwrap();

        tuning.set_packet_size(1400).unwrap();
        assert_eq!(tuning.packet_size().unwrap(), 1400);
        tuning.set_packet_delay(2_000).unwrap();
        assert_eq!(tuning.packet_delay().unwrap(), 2_000);

        assert!(tuning.set_packet_size(1401).is_err());
        assert!(tuning.set_packet_delay(-1).is_err());
    }

    #[test]
    fn test_tuning_refused_while_acquiring() {
        let camera = open_device(Some("sim0")).unwrap();
        let tuning = camera.transport_tuning().unwrap();
        camera.acquisition().start().unwrap();

        assert!(matches!(
            tuning.set_packet_size(1400),
            Err(Error::ModeChangeWhileActive { .. })
        ));
        camera.acquisition().stop().unwrap();
        tuning.set_packet_size(1400).unwrap();
    }

    #[test]
    fn test_stream_channel_selection() {
        let camera = open_device(Some("sim0")).unwrap();
        let tuning = camera.transport_tuning().unwrap();
        assert_eq!(tuning.stream_channel_count().unwrap(), 2);

        tuning.select_stream_channel(1).unwrap();
        assert_eq!(tuning.current_stream_channel().unwrap(), 1);
        assert_eq!(camera.create_stream(2).unwrap().channel(), 1);
        assert!(tuning.select_stream_channel(2).is_err());
    }

    #[test]
    fn test_packet_settings_are_device_wide() {
        let camera = open_device(Some("sim0")).unwrap();
        let tuning = camera.transport_tuning().unwrap();

        tuning.select_stream_channel(1).unwrap();
        tuning.set_packet_size(1200).unwrap();
        tuning.set_packet_delay(500).unwrap();

        tuning.select_stream_channel(0).unwrap();
        assert_eq!(tuning.packet_size().unwrap(), 1200);
        assert_eq!(tuning.packet_delay().unwrap(), 500);
    }
}
