use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use clap::Parser;
use log::{info, warn, LevelFilter};
use bt_profile_manager::init_logging;
use bt_profile_manager::backend::recording::RecordingBackend;
use bt_profile_manager::config::io::ConfigIO;
use bt_profile_manager::console::{run_console, Console};
use bt_profile_manager::error::{AppRunError, ConfigError};
use bt_profile_manager::profile::service::ProfileService;

/// Manages profile connections to remote bluetooth devices from an interactive console.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Config file to use instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the configured connect timeout, e.g. "5s" or "500ms"
    #[arg(long, value_parser = humantime::parse_duration)]
    connect_timeout: Option<Duration>,

    /// Do not answer commands with the matching stack events; inject them with "event" instead
    #[arg(long)]
    manual: bool,

    /// Use the first bluetooth adapter instead of the recording backend
    #[cfg(feature = "btle")]
    #[arg(long)]
    btle: bool,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,
}

async fn run(args: Args) -> Result<(), AppRunError> {
    let config_io = ConfigIO::new_sync(args.config)?;
    let mut locker = config_io.locker()?;
    let _lock = locker.lock()?;

    let config = config_io.read().await?;
    let mut service_config = config.service_config();
    if let Some(timeout) = args.connect_timeout {
        service_config.connect_timeout = timeout;
    }
    info!("Service config {:?}", service_config);

    let policy = Arc::new(config.policy());

    #[cfg(feature = "btle")]
    if args.btle {
        let backend = bt_profile_manager::backend::btle::InactiveBtleBackend::new().await?;
        let (handle, join_handle) = ProfileService::start(service_config, backend, policy.clone());
        run_console(Console::new(handle.clone(), policy, None)).await?;
        handle.shutdown();
        let _ = join_handle.await;
        return Ok(());
    }

    let recording = Arc::new(RecordingBackend::new());
    recording.set_echo(!args.manual);
    let (handle, join_handle) = ProfileService::start(service_config, recording.clone(), policy.clone());

    run_console(Console::new(handle.clone(), policy, Some(recording))).await?;

    handle.shutdown();
    if let Err(err) = join_handle.await {
        warn!("Profile service task failed: {}", err);
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), AppRunError> {
    let args = Args::parse();
    init_logging(if args.verbose { LevelFilter::Debug } else { LevelFilter::Info });
    info!(concat!("bt-profile-manager ", env!("CARGO_PKG_VERSION")));

    match run(args).await {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            eprintln!("Another instance is already using this config file");
            Ok(())
        },
        result => result,
    }
}
