//! Sensord - sensor acquisition daemons
//!
//! Starts, stops and queries one background daemon per sensor, or reads a
//! single result in the foreground. Every command prints exactly one JSON
//! status line on stdout; logs go to stderr.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use sensord_core::SensorKind;
use sensord_daemon::{ConfigManager, Daemon, DaemonConfig, Reply, SensorOptions, SensorProfile};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Sensord - sensor acquisition daemons
#[derive(Parser)]
#[command(name = "sensord")]
#[command(about = "Single-instance sensor daemons streaming JSON records")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(long, default_value = "sensord.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Raw accelerometer and gyroscope values
    Imu(SensorArgs),
    /// Orientation from Madgwick fusion
    Ahrs(SensorArgs),
    /// Heading from the gyroscope bias circle
    Gyrocompass(SensorArgs),
    /// GNSS position fixes
    Gnss(SensorArgs),
    /// Validate configuration
    Validate,
    /// Generate default configuration
    Config(ConfigArgs),
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Action {
    Start,
    Stop,
    Status,
}

#[derive(Args)]
struct SensorArgs {
    /// Omit for a one-shot read
    #[arg(value_enum)]
    action: Option<Action>,

    /// Sample rate in Hz
    #[arg(short = 'r', long)]
    rate: Option<u32>,

    /// Accelerometer range in g
    #[arg(short = 'a', long)]
    accel_range: Option<u32>,

    /// Gyroscope range in dps
    #[arg(short = 'g', long)]
    gyro_range: Option<u32>,

    /// FIFO threshold
    #[arg(short = 'f', long)]
    fifo: Option<u32>,

    /// Emission interval in ms (GNSS: notification cycle)
    #[arg(short = 't', long, allow_negative_numbers = true)]
    interval: Option<i64>,

    /// Request id echoed in every record
    #[arg(short = 'i', long, default_value = "0", allow_negative_numbers = true)]
    id: i32,

    /// AHRS filter gain
    #[arg(short = 'b', long)]
    beta: Option<f32>,

    /// Gyrocompass collect time per posture in ms
    #[arg(short = 'c', long, allow_negative_numbers = true)]
    collect: Option<i64>,

    /// Gyrocompass posture count
    #[arg(short = 'p', long, allow_negative_numbers = true)]
    postures: Option<i64>,

    /// Gyrocompass warm-up discard time in ms
    #[arg(short = 'd', long, allow_negative_numbers = true)]
    discard: Option<i64>,

    /// GNSS satellite system bitmask
    #[arg(short = 's', long)]
    satellites: Option<u32>,
}

impl SensorArgs {
    fn options(&self) -> SensorOptions {
        SensorOptions {
            rate: self.rate,
            accel_range: self.accel_range,
            gyro_range: self.gyro_range,
            fifo: self.fifo,
            interval_ms: self.interval,
            request_id: self.id,
            beta: self.beta,
            collect_ms: self.collect,
            postures: self.postures,
            discard_ms: self.discard,
            satellites: self.satellites,
        }
    }
}

#[derive(Args)]
struct ConfigArgs {
    /// Output file for generated config
    #[arg(short, long, default_value = "sensord.toml")]
    output: PathBuf,

    /// Overwrite existing file
    #[arg(long)]
    force: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let reply = match run(cli) {
        Ok(reply) => reply,
        Err(e) => Reply::fail(-1, format!("{e:#}")),
    };

    match print_reply(&reply) {
        Ok(()) if reply.is_ok() => ExitCode::SUCCESS,
        Ok(()) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Failed to write status: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<Reply> {
    let mut config_manager = ConfigManager::new();
    let loaded = if cli.config.exists() {
        config_manager.load_from_file(&cli.config).map(|()| true)
    } else {
        Ok(false)
    };

    let level = if cli.debug {
        "debug"
    } else {
        config_manager.config().logging.level.as_str()
    };
    init_tracing(level);

    let (kind, args) = match cli.command {
        Commands::Validate => return validate_config(&cli.config, loaded, config_manager.config()),
        Commands::Config(args) => return generate_config(&args),
        Commands::Imu(args) => (SensorKind::Imu, args),
        Commands::Ahrs(args) => (SensorKind::Ahrs, args),
        Commands::Gyrocompass(args) => (SensorKind::Gyrocompass, args),
        Commands::Gnss(args) => (SensorKind::Gnss, args),
    };

    if !loaded.with_context(|| "Failed to load configuration")? {
        warn!("Configuration file not found, using defaults");
    }
    let config = config_manager.into_config();
    ConfigManager::validate(&config)?;

    Ok(sensor_command(kind, &args, config))
}

fn sensor_command(kind: SensorKind, args: &SensorArgs, config: DaemonConfig) -> Reply {
    let daemon = Daemon::new(config);

    match args.action {
        Some(Action::Stop) => daemon.stop(kind),
        Some(Action::Status) => daemon.status(kind),
        action => {
            // Settings are rejected before any device is touched
            let profile = match SensorProfile::from_options(kind, &args.options()) {
                Ok(profile) => profile,
                Err(e) => return Reply::fail(e.status_code(), e.to_string()),
            };
            if action == Some(Action::Start) {
                info!(sensor = %kind, "Starting daemon");
                daemon.start(&profile)
            } else {
                daemon.read_once(&profile)
            }
        }
    }
}

/// Validate configuration file
fn validate_config(path: &Path, loaded: Result<bool>, config: &DaemonConfig) -> Result<Reply> {
    info!("Validating configuration: {}", path.display());

    if !loaded? {
        anyhow::bail!("Configuration file not found: {}", path.display());
    }
    ConfigManager::validate(config)?;

    Ok(Reply::ok("Configuration is valid"))
}

/// Generate default configuration file
fn generate_config(args: &ConfigArgs) -> Result<Reply> {
    if args.output.exists() && !args.force {
        anyhow::bail!("Configuration file already exists: {}", args.output.display());
    }

    ConfigManager::new().save_to_file(&args.output)?;
    Ok(Reply::ok(format!("Generated configuration file: {}", args.output.display())))
}

fn print_reply(reply: &Reply) -> Result<()> {
    let line = reply.to_line()?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&line)?;
    stdout.flush()?;
    Ok(())
}

/// Initialize tracing/logging on stderr; stdout carries the status line
fn init_tracing(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
