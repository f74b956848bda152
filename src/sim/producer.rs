//! Frame producer thread of a simulated device.
//!
//! One thread runs per acquisition. It reads the live feature values at the
//! start of every frame, "exposes" for the exposure time while listening for
//! commands, then renders the image into one empty buffer of every attached
//! stream.

use super::device::SimShared;
use super::features::FrameSettings;
use crate::stream::{encode_trailer, FrameInfo, StreamSink};
use rand_chacha::ChaCha8Rng;
use rand_core::{RngCore, SeedableRng};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// IP, UDP and GVSP header bytes carried by every stream packet.
const PACKET_OVERHEAD: u32 = 36;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Command {
    Trigger,
    /// Finish the in-flight frame, then exit.
    Stop,
    /// Exit now, discarding the in-flight frame.
    Abort,
}

pub(super) fn run(shared: Arc<SimShared>, commands: Receiver<Command>, link_mtu: u32) {
    let started = Instant::now();
    let mut frame_id = 0u64;
    tracing::debug!("Frame producer running");

    loop {
        let settings = match shared.frame_settings() {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(error = %e, "Frame producer lost the device");
                return;
            }
        };

        if settings.triggered {
            match commands.recv() {
                Ok(Command::Trigger) => {}
                Ok(Command::Stop) | Ok(Command::Abort) | Err(_) => return,
            }
        }

        let exposure = Duration::from_secs_f64(settings.exposure_us / 1_000_000.0);
        let exposing_since = Instant::now();
        let mut stopping = false;
        match commands.recv_timeout(exposure) {
            Ok(Command::Abort) | Err(RecvTimeoutError::Disconnected) => {
                shared.clear_trigger();
                tracing::debug!(frame_id = frame_id + 1, "In-flight frame discarded");
                return;
            }
            Ok(Command::Stop) => stopping = true,
            Ok(Command::Trigger) | Err(RecvTimeoutError::Timeout) => {}
        }

        frame_id += 1;
        let timestamp_ns = started.elapsed().as_nanos() as u64;
        let sent = Outgoing {
            settings: &settings,
            frame_id,
            timestamp_ns,
        };
        match deliver(&shared, &commands, sent, link_mtu) {
            Delivery::Done => {}
            Delivery::Stopping => stopping = true,
            Delivery::Aborted => {
                shared.clear_trigger();
                tracing::debug!(frame_id, "In-flight frame discarded");
                return;
            }
        }
        shared.clear_trigger();

        if stopping {
            return;
        }
        if settings.single_frame {
            wait_for_end(&shared, &commands);
            return;
        }
        if !settings.triggered {
            let period = Duration::from_secs_f64(1.0 / settings.frame_rate);
            let remaining = period.saturating_sub(exposing_since.elapsed());
            match commands.recv_timeout(remaining) {
                Ok(Command::Stop) | Ok(Command::Abort) | Err(RecvTimeoutError::Disconnected) => {
                    return
                }
                Ok(Command::Trigger) | Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }
}

/// Single-frame acquisition is complete; idle until stopped.
fn wait_for_end(shared: &SimShared, commands: &Receiver<Command>) {
    loop {
        match commands.recv() {
            Ok(Command::Trigger) => shared.clear_trigger(),
            Ok(Command::Stop) | Ok(Command::Abort) | Err(_) => return,
        }
    }
}

/// One frame leaving the sensor.
#[derive(Clone, Copy)]
struct Outgoing<'a> {
    settings: &'a FrameSettings,
    frame_id: u64,
    timestamp_ns: u64,
}

#[derive(Debug, PartialEq, Eq)]
enum Delivery {
    Done,
    /// Delivered; a stop arrived during transmission.
    Stopping,
    /// Discarded by an abort during transmission.
    Aborted,
}

fn deliver(
    shared: &SimShared,
    commands: &Receiver<Command>,
    frame: Outgoing<'_>,
    link_mtu: u32,
) -> Delivery {
    let Outgoing {
        settings, frame_id, ..
    } = frame;
    let sinks = shared.live_sinks();
    let mut outcome = Delivery::Done;

    if let Some(packet_size) = settings.packet_size {
        if packet_size > link_mtu {
            for sink in &sinks {
                sink.record_failure();
            }
            tracing::debug!(frame_id, packet_size, link_mtu, "Frame lost: packets exceed link MTU");
            return outcome;
        }
        let transmit = transmission_time(settings.payload_size, packet_size, settings.packet_delay);
        outcome = transmit_for(commands, transmit);
        if outcome == Delivery::Aborted {
            return outcome;
        }
    }

    for sink in &sinks {
        fill(sink, frame);
    }
    tracing::trace!(frame_id, streams = sinks.len(), "Frame delivered");
    outcome
}

/// Waits out the transmission of one frame while listening for commands.
fn transmit_for(commands: &Receiver<Command>, transmit: Duration) -> Delivery {
    let deadline = Instant::now() + transmit;
    let mut outcome = Delivery::Done;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return outcome;
        }
        match commands.recv_timeout(remaining) {
            Ok(Command::Abort) | Err(RecvTimeoutError::Disconnected) => return Delivery::Aborted,
            Ok(Command::Stop) => outcome = Delivery::Stopping,
            Ok(Command::Trigger) => {}
            Err(RecvTimeoutError::Timeout) => return outcome,
        }
    }
}

fn fill(sink: &StreamSink, frame: Outgoing<'_>) {
    let Outgoing {
        settings,
        frame_id,
        timestamp_ns,
    } = frame;
    let Some(mut buffer) = sink.acquire() else {
        return;
    };
    let info = FrameInfo::new(
        frame_id,
        timestamp_ns,
        settings.region,
        settings.pixel_format,
        settings.image_size,
        settings.payload_size,
    );
    if buffer.len() < settings.payload_size {
        sink.submit(buffer, info.size_mismatch());
        return;
    }

    let data = buffer.data_mut();
    render(settings, frame_id, &mut data[..settings.image_size]);
    if settings.chunk_mode {
        encode_trailer(
            &mut data[settings.image_size..settings.payload_size],
            timestamp_ns,
            settings.exposure_us,
        );
    }
    sink.submit(buffer, info);
}

/// Inter-packet delay is counted in 1 ns ticks.
fn transmission_time(payload: usize, packet_size: u32, delay_ticks: i64) -> Duration {
    let per_packet = packet_size.saturating_sub(PACKET_OVERHEAD).max(1) as usize;
    let packets = payload.div_ceil(per_packet) as u64;
    Duration::from_nanos(packets.saturating_mul(delay_ticks.max(0) as u64))
}

/// Diagonal ramp moving one step per frame, brightened by exposure and gain,
/// with ChaCha noise seeded by the frame id.
fn render(settings: &FrameSettings, frame_id: u64, dst: &mut [u8]) {
    let mut rng = ChaCha8Rng::seed_from_u64(frame_id);
    rng.fill_bytes(dst);

    let gain = 10f64.powf(settings.gain_db / 20.0);
    let level = (settings.exposure_us / 10_000.0 * gain).min(4.0);
    let region = settings.region;
    let width = region.width.max(1) as u64;
    let bpp = settings.pixel_format.bytes_per_pixel();

    for (i, px) in dst.chunks_exact_mut(bpp).enumerate() {
        let x = i as u64 % width + u64::from(region.x);
        let y = i as u64 / width + u64::from(region.y);
        let ramp = ((x + y + frame_id) & 0xff) as f64;
        let value = (ramp * level).min(255.0) as u8;
        let noise = px[0] & 0x0f;

        match px.len() {
            1 => px[0] = value.saturating_add(noise),
            2 => {
                let wide = (u16::from(value) << 8) | u16::from(px[0]);
                px.copy_from_slice(&wide.to_le_bytes());
            }
            _ => {
                px[0] = value.saturating_add(noise);
                px[1] = (value / 2).saturating_add(noise);
                px[2] = (255 - value).saturating_sub(noise);
            }
        }
    }
}
