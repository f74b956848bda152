//! gencam CLI
//!
//! Lists, inspects and grabs frames from simulated cameras.

use clap::{Parser, Subcommand};
use gencam::metrics::{MetricsRegistry, MetricsSnapshot};
use gencam::{
    AcquisitionController, AcquisitionState, Camera, Error, FileConfig, Simulator, Stream,
    TriggerSource,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

type CliResult<T> = std::result::Result<T, Box<dyn std::error::Error>>;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List available devices
    List,
    /// Print identity, geometry and feature bounds of a device
    Info {
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Acquire frames and print stream statistics
    Grab {
        #[arg(short, long)]
        device: Option<String>,
        /// Frames to receive (0 runs until Ctrl-C)
        #[arg(short = 'n', long)]
        count: Option<u64>,
        /// Trigger each frame from software instead of free-running
        #[arg(long)]
        software_trigger: bool,
        /// Print Prometheus metrics when done
        #[arg(long)]
        metrics: bool,
        /// Serve /metrics and /health on the configured port while grabbing
        #[arg(long)]
        serve: bool,
    },
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> CliResult<()> {
    let config = match &cli.config {
        Some(path) => FileConfig::from_file(path)?,
        None => FileConfig::default(),
    };
    let simulator = Simulator::new(config.simulator.devices.clone());

    match cli.command {
        Command::List => {
            for model in simulator.devices() {
                println!(
                    "{:<8} {} {} (serial {}, {}, {}x{})",
                    model.id,
                    model.vendor,
                    model.model,
                    model.serial,
                    model.transport,
                    model.sensor_width,
                    model.sensor_height
                );
            }
            Ok(())
        }
        Command::Info { device } => {
            let id = device.or_else(|| config.camera.device.clone());
            let camera = simulator.open(id.as_deref())?;
            print_info(&camera)?;
            camera.close()?;
            Ok(())
        }
        Command::Grab {
            device,
            count,
            software_trigger,
            metrics,
            serve,
        } => {
            let mut config = config;
            if device.is_some() {
                config.camera.device = device;
            }
            if let Some(count) = count {
                config.output.frame_count = count;
            }
            if software_trigger {
                config.camera.trigger_source = Some(TriggerSource::Software.to_string());
            }
            grab(&simulator, &config, metrics, serve)
        }
    }
}

fn print_info(camera: &Camera) -> CliResult<()> {
    let params = camera.parameters();
    let acquisition = camera.acquisition();
    let (sensor_width, sensor_height) = camera.sensor_size()?;

    println!("Device:        {}", camera.info());
    println!("Vendor:        {}", camera.vendor_name()?);
    println!("Model:         {}", camera.model_name()?);
    println!("Serial:        {}", camera.serial_number()?);
    println!("Transport:     {}", camera.info().transport);
    println!("Sensor:        {sensor_width}x{sensor_height}");
    println!("Region:        {}", params.region()?);
    println!("Pixel format:  {}", params.pixel_format()?);
    println!("Payload:       {} bytes", camera.payload_size()?);

    let width = params.width_bounds()?;
    let height = params.height_bounds()?;
    println!("Width range:   {}..={}", width.min, width.max);
    println!("Height range:  {}..={}", height.min, height.max);

    let exposure = params.exposure_time_bounds()?;
    println!(
        "Exposure:      {} us ({}..={})",
        params.exposure_time()?,
        exposure.min,
        exposure.max
    );
    let gain = params.gain_bounds()?;
    println!("Gain:          {} dB ({}..={})", params.gain()?, gain.min, gain.max);
    let rate = params.frame_rate_bounds()?;
    println!(
        "Frame rate:    {} fps ({:.1}..={:.1})",
        params.frame_rate()?,
        rate.min,
        rate.max
    );

    let formats: Vec<String> = params
        .available_pixel_formats()?
        .iter()
        .map(|f| f.to_string())
        .collect();
    println!("Formats:       {}", formats.join(", "));
    let sources: Vec<String> = acquisition
        .trigger_sources()?
        .iter()
        .map(|s| s.to_string())
        .collect();
    println!("Triggers:      {}", sources.join(", "));
    println!("Exposure auto: {}", params.is_exposure_auto_available()?);
    println!("Gain auto:     {}", params.is_gain_auto_available()?);

    if camera.is_gv_device()? {
        let tuning = camera.transport_tuning()?;
        println!("Channels:      {}", tuning.stream_channel_count()?);
        println!("Packet size:   {} bytes", tuning.packet_size()?);
        println!("Packet delay:  {} ticks", tuning.packet_delay()?);
    }
    Ok(())
}

fn grab(
    simulator: &Simulator,
    config: &FileConfig,
    print_metrics: bool,
    serve: bool,
) -> CliResult<()> {
    let camera = simulator.open(config.camera.device.as_deref())?;
    config.camera.apply(&camera)?;

    let stream = camera.create_stream(config.camera.buffer_count)?;
    let acquisition = camera.acquisition();
    let frame_rate = camera.parameters().frame_rate()?;
    let payload = camera.payload_size()?;
    let triggered = config.camera.trigger_source.is_some();

    let exporter = if serve {
        start_exporter(config.output.metrics_port)?
    } else {
        None
    };

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        let acquisition = acquisition.clone();
        ctrlc::set_handler(move || {
            info!("Interrupted, aborting acquisition");
            running.store(false, Ordering::SeqCst);
            if let Err(e) = acquisition.abort() {
                warn!("Abort failed: {}", e);
            }
        })?;
    }

    acquisition.start()?;
    info!(payload, frame_rate, triggered, "Acquisition started");
    let started = Instant::now();

    let frame_count = config.output.frame_count;
    let timeout = config.output.pop_timeout();
    let mut report = reporter(exporter.as_ref(), acquisition.clone(), payload, frame_rate);
    let consumer = thread::Builder::new()
        .name("consumer".to_string())
        .spawn(move || consume(stream, frame_count, timeout, &mut *report))?;

    if triggered && config.camera.trigger_source.as_deref() == Some("Software") {
        let period = Duration::from_secs_f64(1.0 / frame_rate);
        while running.load(Ordering::SeqCst) && !consumer.is_finished() {
            match acquisition.software_trigger() {
                Ok(()) => {}
                Err(e @ Error::InvalidValue { .. }) => tracing::debug!("Trigger skipped: {}", e),
                Err(e) => {
                    warn!("Software trigger failed: {}", e);
                    break;
                }
            }
            thread::sleep(period);
        }
    }

    let (stream, received) = consumer
        .join()
        .map_err(|_| "consumer thread panicked")?;
    if acquisition.state() == AcquisitionState::Acquiring {
        acquisition.stop()?;
    }

    let elapsed = started.elapsed().as_secs_f64();
    let stats = stream.statistics();
    info!(
        "Received {} frames in {:.2}s ({:.1} fps): {} complete, {} failed, {} underruns, {} timeouts",
        received,
        elapsed,
        received as f64 / elapsed.max(f64::EPSILON),
        stats.completed,
        stats.failures,
        stats.underruns,
        stats.timeouts
    );

    if print_metrics {
        let registry = MetricsRegistry::new()?;
        registry.update(&MetricsSnapshot::from_components(
            &stats,
            acquisition.state(),
            payload,
            frame_rate,
        ));
        print!("{}", registry.encode()?);
    }
    finish_exporter(exporter);

    drop(stream);
    camera.close()?;
    Ok(())
}

/// Pops frames until `count` arrive (0 for no limit) or the stream closes.
/// `report` sees the stream after every pop.
fn consume(
    stream: Stream,
    count: u64,
    timeout: Duration,
    report: &mut (dyn FnMut(&Stream) + Send),
) -> (Stream, u64) {
    let mut received = 0u64;
    while count == 0 || received < count {
        let popped = stream.pop(timeout);
        report(&stream);
        match popped {
            Ok(frame) => {
                received += 1;
                if !frame.is_complete() {
                    warn!(frame_id = frame.frame_id(), status = ?frame.status(), "Incomplete frame");
                }
                tracing::debug!(
                    frame_id = frame.frame_id(),
                    timestamp_ns = frame.timestamp_ns(),
                    size = frame.size(),
                    "Frame received"
                );
            }
            Err(Error::Timeout(waited)) => warn!("No frame within {:?}", waited),
            Err(Error::Closed) => break,
            Err(e) => {
                warn!("Stream error: {}", e);
                break;
            }
        }
    }
    (stream, received)
}

#[cfg(feature = "metrics")]
type Exporter = exporter::Exporter;

#[cfg(not(feature = "metrics"))]
type Exporter = std::convert::Infallible;

/// Starts the metrics server unless `port` is 0.
#[cfg(feature = "metrics")]
fn start_exporter(port: u16) -> CliResult<Option<Exporter>> {
    if port == 0 {
        info!("Metrics port is 0, not serving");
        return Ok(None);
    }
    Ok(Some(exporter::Exporter::start(port)?))
}

#[cfg(not(feature = "metrics"))]
fn start_exporter(_port: u16) -> CliResult<Option<Exporter>> {
    Err("--serve requires gencam built with the `metrics` feature".into())
}

/// Pushes stream statistics to the exporter, if one runs.
#[cfg(feature = "metrics")]
fn reporter(
    exporter: Option<&Exporter>,
    acquisition: AcquisitionController,
    payload: usize,
    frame_rate: f64,
) -> Box<dyn FnMut(&Stream) + Send> {
    let Some(exporter) = exporter else {
        return Box::new(|_: &Stream| {});
    };
    let state = exporter.state();
    Box::new(move |stream: &Stream| {
        let snapshot = MetricsSnapshot::from_components(
            &stream.statistics(),
            acquisition.state(),
            payload,
            frame_rate,
        );
        state.blocking_write().update(snapshot);
    })
}

#[cfg(not(feature = "metrics"))]
fn reporter(
    _exporter: Option<&Exporter>,
    _acquisition: AcquisitionController,
    _payload: usize,
    _frame_rate: f64,
) -> Box<dyn FnMut(&Stream) + Send> {
    Box::new(|_: &Stream| {})
}

#[cfg(feature = "metrics")]
fn finish_exporter(exporter: Option<Exporter>) {
    if let Some(exporter) = exporter {
        exporter.finish();
    }
}

#[cfg(not(feature = "metrics"))]
fn finish_exporter(exporter: Option<Exporter>) {
    if let Some(never) = exporter {
        match never {}
    }
}

#[cfg(feature = "metrics")]
mod exporter {
    use super::CliResult;
    use gencam::metrics::{MetricsRegistry, MetricsServer, MetricsServerConfig, MetricsState, ServerError};
    use std::sync::Arc;
    use tokio::runtime::Runtime;
    use tokio::sync::{oneshot, RwLock};
    use tokio::task::JoinHandle;
    use tracing::{info, warn};

    /// Metrics server running on its own runtime for the length of a grab.
    pub(super) struct Exporter {
        runtime: Runtime,
        state: Arc<RwLock<MetricsState>>,
        shutdown: oneshot::Sender<()>,
        server: JoinHandle<Result<(), ServerError>>,
    }

    impl Exporter {
        pub(super) fn start(port: u16) -> CliResult<Self> {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .thread_name("metrics")
                .enable_all()
                .build()?;
            let server = MetricsServer::new(MetricsServerConfig::with_port(port), MetricsRegistry::new()?);
            let state = server.state();
            let (shutdown, stopped) = oneshot::channel::<()>();
            let server = runtime.spawn(server.run(async move {
                // A dropped sender also stops the server.
                let _ = stopped.await;
            }));
            info!(port, "Serving metrics");
            Ok(Self {
                runtime,
                state,
                shutdown,
                server,
            })
        }

        pub(super) fn state(&self) -> Arc<RwLock<MetricsState>> {
            Arc::clone(&self.state)
        }

        /// Stops the server and waits for it to close its listener.
        pub(super) fn finish(self) {
            let Self {
                runtime,
                shutdown,
                server,
                ..
            } = self;
            let _ = shutdown.send(());
            match runtime.block_on(server) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Metrics server failed: {}", e),
                Err(e) => warn!("Metrics server task failed: {}", e),
            }
        }
    }
}
