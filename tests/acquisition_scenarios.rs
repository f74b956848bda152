//! End-to-end acquisition against simulated devices.

use gencam::stream::{ChunkKind, ChunkValue};
use gencam::{
    AcquisitionMode, AcquisitionState, Camera, Error, FrameStatus, Origin, Region, Simulator,
    TriggerSource,
};
use std::thread;
use std::time::{Duration, Instant};

const POP: Duration = Duration::from_secs(2);

fn open(id: &str) -> Camera {
    Simulator::default().open(Some(id)).unwrap()
}

#[test]
fn software_triggered_capture() {
    let camera = open("sim0");
    camera
        .parameters()
        .set_region(Region::new(0, 0, 640, 480))
        .unwrap();
    let payload = camera.payload_size().unwrap();
    assert_eq!(payload, 640 * 480);

    let stream = camera.create_stream(4).unwrap();
    let acquisition = camera.acquisition();
    acquisition.set_trigger(&TriggerSource::Software).unwrap();
    acquisition.start().unwrap();
    assert_eq!(acquisition.state(), AcquisitionState::Acquiring);

    acquisition.software_trigger().unwrap();
    let frame = stream.pop(POP).unwrap();
    assert_eq!(frame.size(), payload);
    assert_eq!(frame.status(), FrameStatus::Success);
    assert_eq!(frame.region(), Region::new(0, 0, 640, 480));
    assert_eq!(frame.data().len(), payload);
    drop(frame);

    acquisition.stop().unwrap();
    assert_eq!(acquisition.state(), AcquisitionState::Idle);
    camera.close().unwrap();
}

#[test]
fn stream_shaping_refused_while_acquiring() {
    let camera = open("sim0");
    let _stream = camera.create_stream(4).unwrap();
    let params = camera.parameters();
    camera.acquisition().start().unwrap();

    assert!(matches!(
        params.set_region(Region::new(0, 0, 320, 240)),
        Err(Error::ModeChangeWhileActive { .. })
    ));
    for mode in [AcquisitionMode::Continuous, AcquisitionMode::SingleFrame] {
        assert!(matches!(
            camera.acquisition().set_acquisition_mode(mode),
            Err(Error::ModeChangeWhileActive { .. })
        ));
    }
    assert!(matches!(
        camera.acquisition().set_trigger_source(&TriggerSource::Line(1)),
        Err(Error::ModeChangeWhileActive { .. })
    ));
    // Exposure and gain stay adjustable during acquisition.
    params.set_exposure_time(2_000.0).unwrap();
    params.set_gain(3.0).unwrap();

    camera.acquisition().stop().unwrap();
    params.set_region(Region::new(0, 0, 320, 240)).unwrap();
}

#[test]
fn trigger_overlap_is_rejected_by_device() {
    let camera = open("sim0");
    let params = camera.parameters();
    params.set_region(Region::new(0, 0, 64, 48)).unwrap();
    params.set_exposure_time(300_000.0).unwrap();
    let stream = camera.create_stream(2).unwrap();

    let acquisition = camera.acquisition();
    acquisition.set_trigger(&TriggerSource::Software).unwrap();
    acquisition.start().unwrap();

    acquisition.software_trigger().unwrap();
    assert!(matches!(
        acquisition.software_trigger(),
        Err(Error::InvalidValue {
            origin: Origin::Device,
            ..
        })
    ));

    let frame = stream.pop(POP).unwrap();
    assert_eq!(frame.frame_id(), 1);
    drop(frame);
    acquisition.stop().unwrap();
}

#[test]
fn oversized_packets_surface_as_timeouts() {
    let camera = open("sim0");
    camera
        .parameters()
        .set_region(Region::new(0, 0, 64, 48))
        .unwrap();
    camera
        .transport_tuning()
        .unwrap()
        .set_packet_size(9000)
        .unwrap();
    let stream = camera.create_stream(4).unwrap();

    camera.acquisition().start().unwrap();
    assert!(matches!(
        stream.pop(Duration::from_millis(300)),
        Err(Error::Timeout(_))
    ));
    camera.acquisition().stop().unwrap();

    let stats = stream.statistics();
    assert!(stats.failures > 0);
    assert_eq!(stats.completed, 0);
    assert_eq!(stats.timeouts, 1);
}

#[test]
fn chunk_trailer_carries_timestamp_and_exposure() {
    let camera = open("sim1");
    let params = camera.parameters();
    params.set_region(Region::new(0, 0, 64, 48)).unwrap();
    params.set_exposure_time(1_500.0).unwrap();
    params.set_chunk_mode(true).unwrap();
    let payload = camera.payload_size().unwrap();
    assert_eq!(payload, 64 * 48 + gencam::stream::CHUNK_TRAILER_LEN);

    let stream = camera.create_stream(2).unwrap();
    let acquisition = camera.acquisition();
    acquisition.set_trigger(&TriggerSource::Software).unwrap();
    acquisition.start().unwrap();
    acquisition.software_trigger().unwrap();

    let frame = stream.pop(POP).unwrap();
    assert_eq!(frame.size(), payload);
    assert_eq!(frame.image_data().len(), 64 * 48);

    let chunks = frame.chunks().unwrap();
    assert!(chunks.iter().any(|(kind, value)| {
        *kind == ChunkKind::Timestamp
            && matches!(value, ChunkValue::Timestamp(ts) if *ts == frame.timestamp_ns())
    }));
    assert!(chunks.iter().any(|(kind, value)| {
        *kind == ChunkKind::ExposureTime
            && matches!(value, ChunkValue::ExposureTime(us) if *us == 1_500.0)
    }));
    drop(frame);
    acquisition.stop().unwrap();
}

#[test]
fn unreachable_device_fails_start() {
    let sim = Simulator::default();
    let device = sim.connect(Some("sim0")).unwrap();
    let camera = Camera::open_with(device.clone()).unwrap();
    let stream = camera.create_stream(2).unwrap();

    device.disconnect();
    assert!(matches!(
        camera.acquisition().start(),
        Err(Error::DeviceUnreachable(_))
    ));
    assert_eq!(camera.acquisition().state(), AcquisitionState::Idle);
    assert!(matches!(stream.pop(Duration::ZERO), Err(Error::Timeout(_))));

    device.reconnect();
    camera.acquisition().start().unwrap();
    camera.acquisition().stop().unwrap();
}

#[test]
fn stale_stream_reports_size_mismatch() {
    let camera = open("sim1");
    let params = camera.parameters();
    params.set_region(Region::new(0, 0, 64, 48)).unwrap();
    let stream = camera.create_stream(2).unwrap();

    params.set_region(Region::new(0, 0, 128, 96)).unwrap();
    let acquisition = camera.acquisition();
    acquisition.set_trigger(&TriggerSource::Software).unwrap();
    acquisition.start().unwrap();
    acquisition.software_trigger().unwrap();

    let frame = stream.pop(POP).unwrap();
    assert_eq!(frame.status(), FrameStatus::SizeMismatch);
    assert!(!frame.is_complete());
    assert_eq!(frame.size(), 0);
    drop(frame);

    acquisition.stop().unwrap();
    assert_eq!(stream.statistics().failures, 1);
}

#[test]
fn frames_arrive_in_capture_order() {
    let camera = open("sim1");
    let params = camera.parameters();
    params.set_region(Region::new(0, 0, 32, 32)).unwrap();
    params.set_exposure_time(1_000.0).unwrap();
    params.set_frame_rate(100.0).unwrap();
    let stream = camera.create_stream(16).unwrap();

    camera.acquisition().start().unwrap();
    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(stream.pop(POP).unwrap().frame_id());
    }
    camera.acquisition().stop().unwrap();

    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]), "{ids:?}");
}

#[test]
fn single_frame_mode_delivers_one_frame() {
    let camera = open("sim1");
    let params = camera.parameters();
    params.set_region(Region::new(0, 0, 32, 32)).unwrap();
    params.set_exposure_time(1_000.0).unwrap();
    let acquisition = camera.acquisition();
    acquisition
        .set_acquisition_mode(AcquisitionMode::SingleFrame)
        .unwrap();
    let stream = camera.create_stream(4).unwrap();

    acquisition.start().unwrap();
    stream.pop(POP).unwrap();
    assert!(matches!(
        stream.pop(Duration::from_millis(200)),
        Err(Error::Timeout(_))
    ));
    acquisition.stop().unwrap();
    assert_eq!(stream.statistics().completed, 1);
}

#[test]
fn stop_lets_consumers_drain_then_closes() {
    let camera = open("sim1");
    let params = camera.parameters();
    params.set_region(Region::new(0, 0, 32, 32)).unwrap();
    params.set_exposure_time(1_000.0).unwrap();
    params.set_frame_rate(100.0).unwrap();
    let stream = camera.create_stream(8).unwrap();

    camera.acquisition().start().unwrap();
    thread::sleep(Duration::from_millis(100));
    camera.acquisition().stop().unwrap();

    let queued = stream.queued_frames();
    assert!(queued > 0);
    for _ in 0..queued {
        stream.pop(Duration::ZERO).unwrap();
    }
    assert!(matches!(stream.pop(POP), Err(Error::Closed)));
}

#[test]
fn stop_from_another_thread_wakes_consumer() {
    let camera = open("sim0");
    camera
        .parameters()
        .set_region(Region::new(0, 0, 64, 48))
        .unwrap();
    let stream = camera.create_stream(2).unwrap();
    let acquisition = camera.acquisition();
    acquisition.set_trigger(&TriggerSource::Software).unwrap();
    acquisition.start().unwrap();

    let consumer = thread::spawn(move || stream.pop(Duration::from_secs(10)).map(|f| f.frame_id()));
    thread::sleep(Duration::from_millis(50));

    let controller = acquisition.clone();
    thread::spawn(move || controller.stop())
        .join()
        .unwrap()
        .unwrap();

    assert!(matches!(consumer.join().unwrap(), Err(Error::Closed)));
}

#[test]
fn close_while_acquiring_releases_everything() {
    let camera = open("sim0");
    camera
        .parameters()
        .set_region(Region::new(0, 0, 64, 48))
        .unwrap();
    let stream = camera.create_stream(2).unwrap();
    camera.acquisition().start().unwrap();

    camera.close().unwrap();
    assert!(stream.is_closed());
    assert!(matches!(stream.pop(Duration::ZERO), Err(Error::Closed)));
    assert!(matches!(
        camera.parameters().frame_rate(),
        Err(Error::AlreadyClosed)
    ));
    assert!(matches!(camera.close(), Err(Error::AlreadyClosed)));
}

#[test]
fn abort_discards_frame_in_transmission() {
    let camera = open("sim0");
    let params = camera.parameters();
    params.set_exposure_time(100.0).unwrap();
    // 1 ms per packet: a full sensor frame takes close to a second on the wire.
    camera
        .transport_tuning()
        .unwrap()
        .set_packet_delay(1_000_000)
        .unwrap();
    let stream = camera.create_stream(2).unwrap();

    let acquisition = camera.acquisition();
    acquisition.start().unwrap();
    thread::sleep(Duration::from_millis(100));

    let began = Instant::now();
    acquisition.abort().unwrap();
    assert!(
        began.elapsed() < Duration::from_millis(300),
        "abort took {:?}",
        began.elapsed()
    );
    assert_eq!(acquisition.state(), AcquisitionState::Idle);
    assert!(matches!(stream.pop(Duration::ZERO), Err(Error::Closed)));
    assert_eq!(stream.statistics().completed, 0);
}

#[test]
fn stream_created_after_stop_reports_closed() {
    let camera = open("sim1");
    camera
        .parameters()
        .set_region(Region::new(0, 0, 32, 32))
        .unwrap();
    let early = camera.create_stream(2).unwrap();
    camera.acquisition().start().unwrap();
    camera.acquisition().stop().unwrap();

    let late = camera.create_stream(2).unwrap();
    for stream in [&early, &late] {
        while stream.queued_frames() > 0 {
            stream.pop(Duration::ZERO).unwrap();
        }
        assert!(matches!(stream.pop(POP), Err(Error::Closed)));
    }

    camera.acquisition().start().unwrap();
    assert!(late.pop(POP).is_ok());
    camera.acquisition().stop().unwrap();
}
