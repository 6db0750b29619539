use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use gmcsrv::config::AppConfig;
use gmcsrv::error::Result;
use gmcsrv::monitor::Monitor;

#[derive(Parser, Debug)]
#[clap(author, version, about = "GMC-300E Plus monitoring service", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[clap(short, long, value_parser, default_value = "gmcsrv.json")]
    config: PathBuf,

    /// Validate the configuration and exit
    #[clap(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match AppConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            eprintln!("Using default configuration");
            AppConfig::default()
        }
    };

    init_logging(&config);

    if args.validate {
        config.validate()?;
        info!("Validation completed successfully");
        return Ok(());
    }

    info!("Starting GMC Monitoring Service");
    info!("Device port: {}", config.device.port);
    info!(
        "MQTT broker: {}:{}",
        config.mqtt.broker, config.mqtt.port
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal_token.cancel();
        }
    });

    let mut monitor = Monitor::new(config)?;
    if let Err(e) = monitor.run(shutdown).await {
        error!("Monitor terminated: {e}");
        return Err(e);
    }

    Ok(())
}

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("gmcsrv={}", config.logging.level)));

    match &config.logging.dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "gmcsrv.log");
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(file_appender)
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}
