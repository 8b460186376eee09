use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vidrelay::config::{self, AppConfig};
use vidrelay::hwaccel::HardwareContext;
use vidrelay::server::StreamServer;
use vidrelay::source::SourceFactory;
use vidrelay::{runtime, Error};

const STATS_INTERVAL: Duration = Duration::from_secs(5);
const MAIN_TICK: Duration = Duration::from_millis(100);

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// vidrelay command line arguments
#[derive(Parser, Debug)]
#[command(name = "vidrelay")]
#[command(version, about = "Capture video and re-stream it as MJPEG over HTTP", long_about = None)]
struct CliArgs {
    /// TOML configuration file
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Input locator: /dev/videoN, camera index, stream URL or MJPEG file
    #[arg(short = 'i', long, value_name = "LOCATOR")]
    input: Option<String>,

    /// Server port (overrides config)
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Bind address (overrides config)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    bind: Option<String>,

    /// List V4L2 capture devices and exit
    #[arg(long)]
    list_cameras: bool,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    if args.list_cameras {
        for camera in SourceFactory::list_cameras()? {
            println!("{}", serde_json::to_string(&camera)?);
        }
        return Ok(());
    }

    let config = load_config(&args)?;
    runtime::initialize();
    let result = run(config);
    runtime::shutdown();
    result
}

fn load_config(args: &CliArgs) -> anyhow::Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => config::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => AppConfig::default(),
    };
    if let Some(input) = &args.input {
        config.input = input.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = &args.bind {
        config.server.bind_address = bind.clone();
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn run(config: AppConfig) -> anyhow::Result<()> {
    tracing::info!("Starting vidrelay v{}", runtime::version());

    let hw = HardwareContext::probe(config.capture.acceleration);
    let network = SourceFactory::is_network(&config.input).then(|| config.network.clone());
    let engine = SourceFactory::create(
        &config.input,
        config.capture.clone(),
        network,
        Some(Arc::clone(&hw)),
    )?;

    let server = Arc::new(
        StreamServer::builder(config.server.clone())
            .hardware(hw)
            .build(),
    );
    server.start().context("failed to start stream server")?;

    let relay = Arc::clone(&server);
    engine.set_frame_callback(move |frame| {
        if let Err(e) = relay.push_frame(frame) {
            tracing::trace!("Frame not relayed: {}", e);
        }
    });
    engine.set_state_callback(|state, error: Option<&Error>| match error {
        Some(e) => tracing::error!("Capture engine {}: {}", state, e),
        None => tracing::info!("Capture engine {}", state),
    });

    if let Err(e) = engine.start() {
        server.stop();
        return Err(e).with_context(|| format!("failed to open {}", config.input));
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            tracing::info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        })
        .context("failed to install signal handler")?;
    }

    let mut last_report = Instant::now();
    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(MAIN_TICK);

        if !engine.is_running() {
            tracing::error!(
                "Capture stopped: {}",
                engine.last_error().unwrap_or_else(|| "unknown error".to_string())
            );
            break;
        }
        if !server.is_running() {
            tracing::error!("Stream server stopped unexpectedly");
            break;
        }

        if last_report.elapsed() >= STATS_INTERVAL {
            last_report = Instant::now();
            report_stats(&engine, &server);
        }
    }

    engine.stop();
    server.stop();
    tracing::info!("vidrelay stopped");
    Ok(())
}

fn report_stats(engine: &vidrelay::CaptureEngine, server: &StreamServer) {
    let source = engine.status();
    let stats = server.get_stats();
    tracing::info!(
        "source {:.1} fps, loss {:.1}%; server {:.1} fps, {} clients, {} dropped",
        source.fps,
        source.packet_loss * 100.0,
        stats.fps,
        stats.connected_clients,
        stats.dropped_frames
    );
    match (serde_json::to_string(&source), serde_json::to_string(&stats)) {
        (Ok(source), Ok(server)) => {
            tracing::debug!(source = %source, server = %server, "stats")
        }
        (Err(e), _) | (_, Err(e)) => tracing::debug!("Failed to serialize stats: {}", e),
    }
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "vidrelay=error",
        LogLevel::Warn => "vidrelay=warn",
        LogLevel::Info => "vidrelay=info",
        LogLevel::Verbose => "vidrelay=debug,v4l=info",
        LogLevel::Debug => "vidrelay=debug,v4l=debug",
        LogLevel::Trace => "vidrelay=trace,v4l=debug",
    };

    // RUST_LOG wins over the CLI
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
