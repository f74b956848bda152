//! Device state after a multi-feature setter is rejected part way through.

use gencam::stream::{channel, StreamSink};
use gencam::transport::{Transport, TransportKind};
use gencam::{
    AcquisitionMode, AcquisitionState, Bounds, Camera, DeviceInfo, Error, FeatureKind,
    FeatureValue, FrameInfo, FrameStatus, PixelFormat, Region, SimCamera, Simulator,
    TriggerSource,
};
use std::sync::Arc;
use std::time::Duration;

/// Simulated device whose firmware refuses some writes the simulator accepts.
struct Strict {
    inner: Arc<SimCamera>,
    width_step: i64,
    /// Report `width_step` as the Width increment.
    advertise_step: bool,
    refuse: Option<&'static str>,
}

impl Strict {
    fn around(inner: Arc<SimCamera>) -> Self {
        Self {
            inner,
            width_step: 1,
            advertise_step: false,
            refuse: None,
        }
    }
}

impl Transport for Strict {
    fn info(&self) -> &DeviceInfo {
        self.inner.info()
    }

    fn kind(&self) -> TransportKind {
        self.inner.kind()
    }

    fn feature_kind(&self, name: &str) -> gencam::Result<FeatureKind> {
        self.inner.feature_kind(name)
    }

    fn read(&self, name: &str) -> gencam::Result<FeatureValue> {
        self.inner.read(name)
    }

    fn write(&self, name: &str, value: FeatureValue) -> gencam::Result<()> {
        if self.refuse == Some(name) {
            return Err(Error::InvalidValue {
                feature: name.to_string(),
                reason: "refused by firmware".to_string(),
                origin: gencam::Origin::Device,
            });
        }
        if let ("Width", FeatureValue::Integer(width)) = (name, &value) {
            if width % self.width_step != 0 {
                return Err(Error::InvalidValue {
                    feature: name.to_string(),
                    reason: format!("{width} is not a multiple of {}", self.width_step),
                    origin: gencam::Origin::Device,
                });
            }
        }
        self.inner.write(name, value)
    }

    fn integer_bounds(&self, name: &str) -> gencam::Result<Bounds<i64>> {
        self.inner.integer_bounds(name)
    }

    fn float_bounds(&self, name: &str) -> gencam::Result<Bounds<f64>> {
        self.inner.float_bounds(name)
    }

    fn increment(&self, name: &str) -> gencam::Result<i64> {
        if name == "Width" && self.advertise_step {
            return Ok(self.width_step);
        }
        self.inner.increment(name)
    }

    fn enum_entries(&self, name: &str) -> gencam::Result<Vec<String>> {
        self.inner.enum_entries(name)
    }

    fn execute(&self, command: &str) -> gencam::Result<()> {
        self.inner.execute(command)
    }

    fn max_stream_buffers(&self) -> usize {
        self.inner.max_stream_buffers()
    }

    fn attach_stream(&self, sink: StreamSink) -> gencam::Result<()> {
        self.inner.attach_stream(sink)
    }

    fn shutdown(&self) -> gencam::Result<()> {
        self.inner.shutdown()
    }
}

fn strict(configure: impl FnOnce(&mut Strict)) -> Camera {
    let device = Simulator::default().connect(Some("sim0")).unwrap();
    let mut transport = Strict::around(device);
    configure(&mut transport);
    Camera::open_with(Arc::new(transport)).unwrap()
}

#[test]
fn rejected_width_restores_previous_region() {
    let camera = strict(|t| t.width_step = 4);
    let params = camera.parameters();
    let before = Region::new(100, 100, 640, 480);
    params.set_region(before).unwrap();

    assert!(matches!(
        params.set_region(Region::new(100, 100, 641, 480)),
        Err(Error::InvalidValue { .. })
    ));
    assert_eq!(params.region().unwrap(), before);
    assert_eq!(params.payload_size().unwrap(), 640 * 480);
}

#[test]
fn width_off_increment_rejected_before_any_write() {
    let camera = strict(|t| {
        t.width_step = 4;
        t.advertise_step = true;
    });
    let params = camera.parameters();
    let before = Region::new(100, 100, 640, 480);
    params.set_region(before).unwrap();

    match params.set_region(Region::new(100, 100, 642, 480)) {
        Err(Error::InvalidValue { feature, .. }) => assert_eq!(feature, "Width"),
        other => panic!("expected Width rejection, got {other:?}"),
    }
    assert_eq!(params.region().unwrap(), before);
}

#[test]
fn rejected_trigger_leaves_mode_untouched() {
    let camera = strict(|t| t.refuse = Some("TriggerActivation"));
    let acquisition = camera.acquisition();
    acquisition
        .set_acquisition_mode(AcquisitionMode::SingleFrame)
        .unwrap();

    assert!(acquisition.set_trigger(&TriggerSource::Line(1)).is_err());
    assert_eq!(
        acquisition.acquisition_mode().unwrap(),
        AcquisitionMode::SingleFrame
    );
    assert_eq!(camera.parameters().get_string("TriggerMode").unwrap(), "Off");
    assert_eq!(acquisition.trigger_source().unwrap(), TriggerSource::Software);
}

#[test]
fn unknown_trigger_source_leaves_mode_untouched() {
    let camera = Simulator::default().open(Some("sim1")).unwrap();
    let acquisition = camera.acquisition();
    acquisition
        .set_acquisition_mode(AcquisitionMode::SingleFrame)
        .unwrap();

    assert!(acquisition.set_trigger(&TriggerSource::Line(9)).is_err());
    assert_eq!(
        acquisition.acquisition_mode().unwrap(),
        AcquisitionMode::SingleFrame
    );
    assert_eq!(camera.parameters().get_string("TriggerMode").unwrap(), "Off");
}

#[test]
fn rejected_binning_restores_binning_and_region() {
    let camera = strict(|t| t.refuse = Some("BinningVertical"));
    let params = camera.parameters();
    let before = params.region().unwrap();

    assert!(params.set_binning(2, 2).is_err());
    assert_eq!(params.binning().unwrap(), (1, 1));
    assert_eq!(params.region().unwrap(), before);
}

#[test]
fn oversized_region_while_acquiring_is_a_mode_error() {
    let camera = Simulator::default().open(Some("sim0")).unwrap();
    let _stream = camera.create_stream(2).unwrap();
    camera.acquisition().start().unwrap();

    assert!(matches!(
        camera
            .parameters()
            .set_region(Region::new(0, 0, 99_999, 99_999)),
        Err(Error::ModeChangeWhileActive { .. })
    ));
    assert!(matches!(
        camera.parameters().set_binning(2, 2),
        Err(Error::ModeChangeWhileActive { .. })
    ));
    camera.acquisition().stop().unwrap();
    assert_eq!(camera.acquisition().state(), AcquisitionState::Idle);
}

#[test]
fn mis_sized_frame_reaches_consumer_without_panicking() {
    let (sink, stream) = channel(0, 1, 8);
    let info = FrameInfo::new(1, 0, Region::full(4, 4), PixelFormat::Mono8, 16, 16);
    sink.submit(sink.acquire().unwrap(), info);

    let frame = stream.pop(Duration::ZERO).unwrap();
    assert_eq!(frame.status(), FrameStatus::SizeMismatch);
    assert!(frame.data().is_empty());
    assert!(frame.image_data().is_empty());
}
