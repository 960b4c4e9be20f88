use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::LevelFilter;

use tagpose::config::ActionModuleConfig;
use tagpose::run::run_action_module;
use tagpose::{parse_broker_arg, AppError, BrokerAddress, CancelToken, LoggingBase};

#[cfg(feature = "tracing")]
use tagpose::core::init_tracing;
#[cfg(not(feature = "tracing"))]
use tagpose::core::init_with_level;
#[cfg(feature = "tracing")]
use tracing_log::LogTracer;

/// Drive the robot base from motion commands received over MQTT.
#[derive(Parser, Debug)]
#[command(name = "action-module", version, about)]
struct Cli {
    /// MQTT broker, `host` or `host:port` (default port 1883).
    #[arg(value_parser = parse_broker_arg)]
    broker: BrokerAddress,

    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

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

fn run(cli: Cli) -> Result<(), AppError> {
    let cancel = CancelToken::new();
    cancel.install_ctrlc()?;

    let config = match &cli.config {
        Some(path) => ActionModuleConfig::load_json(path)?,
        None => ActionModuleConfig::default(),
    };

    let base = LoggingBase::new(config.control_period());
    let base = run_action_module(&config, &cli.broker, cancel, base)?;
    let odo = base.odometry();
    log::info!(
        "base stopped at x={:.3} m y={:.3} m heading={:.3} rad",
        odo.x,
        odo.y,
        odo.heading
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
