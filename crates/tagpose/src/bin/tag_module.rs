use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::LevelFilter;

use tagpose::config::TagModuleConfig;
use tagpose::run::run_tag_module;
use tagpose::{parse_broker_arg, AppError, BrokerAddress, CancelToken};

#[cfg(feature = "tracing")]
use tagpose::core::init_tracing;
#[cfg(not(feature = "tracing"))]
use tagpose::core::init_with_level;
#[cfg(feature = "tracing")]
use tracing_log::LogTracer;

/// Publish marker distance, bearing and yaw from camera frames over MQTT.
#[derive(Parser, Debug)]
#[command(name = "tag-module", version, about)]
struct Cli {
    /// MQTT broker, `host` or `host:port` (default port 1883).
    #[arg(value_parser = parse_broker_arg)]
    broker: BrokerAddress,

    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory of frames to replay (overrides the config).
    #[arg(long)]
    frames: Option<PathBuf>,

    /// Recorded detections to replay (overrides the config).
    #[arg(long)]
    detections: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

fn init_logging(level: LevelFilter) {
    #[cfg(not(feature = "tracing"))]
    if let Err(e) = init_with_level(level) {
        eprintln!("logger not installed: {e}");
    }

    #[cfg(feature = "tracing")]
    {
        let _ = level;
        let _ = LogTracer::init();
        init_tracing(false);
    }
}

#[cfg_attr(feature = "tracing", tracing::instrument(level = "info", skip_all))]
fn run(cli: Cli) -> Result<(), AppError> {
    let cancel = CancelToken::new();
    cancel.install_ctrlc()?;

    let mut config = match &cli.config {
        Some(path) => TagModuleConfig::load_json(path)?,
        None => TagModuleConfig::default(),
    };
    if let Some(frames) = cli.frames {
        config.camera.frames_dir = frames;
    }
    if let Some(detections) = cli.detections {
        config.detections_path = Some(detections);
    }

    let stats = run_tag_module(&config, &cli.broker, cancel)?;
    log::info!(
        "published {} reports ({} with a marker)",
        stats.frames,
        stats.located
    );
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}
