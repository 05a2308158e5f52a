use anyhow::{anyhow, Result};
use applock_core::clock::SystemClock;
use applock_core::paths::{data_dir, status_socket_path, SETTINGS_FILE};
use applock_core::platform::Platform;
use applock_core::registry::{save_settings, SettingsRegistry};
use applock_core::settings::{Backend, LockSettings};
use applock_core::supervisor::Supervisor;
use applock_core::unlock_cache::UnlockCache;
use applock_core::LockEngine;
use applock_service::feed::Feed;
use applock_service::host::{
    FeedAccessibility, HostDevice, JsonLineTrigger, LoggedKeepAlive, SELF_PACKAGE,
};
use applock_service::status;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "App lock foreground monitor", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write default settings if none exist
    Init {
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Run the monitor, reading platform signals from stdin
    Run {
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Persist and start this backend instead of the configured one
        #[arg(long, value_enum)]
        backend: Option<BackendArg>,
    },
    /// Print the status snapshot of a running monitor
    Status,
    /// Add an app to the locked set
    Lock {
        package: String,
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Remove an app from the locked set
    Unlock {
        package: String,
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    Accessibility,
    UsageStats,
    Privileged,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Accessibility => Backend::Accessibility,
            BackendArg::UsageStats => Backend::UsageStats,
            BackendArg::Privileged => Backend::Privileged,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries lock requests; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Init { data_dir } => init_command(data_dir),
        Commands::Run { data_dir, backend } => run_command(data_dir, backend).await,
        Commands::Status => status_command().await,
        Commands::Lock { package, data_dir } => {
            let registry = open_registry(data_dir)?;
            registry.lock_app(&package)?;
            println!("locked {package}");
            Ok(())
        }
        Commands::Unlock { package, data_dir } => {
            let registry = open_registry(data_dir)?;
            registry.unlock_app(&package)?;
            println!("unlocked {package}");
            Ok(())
        }
    }
}

fn resolve_data_dir(data_dir_override: Option<PathBuf>) -> Result<PathBuf> {
    let data = match data_dir_override {
        Some(dir) => dir,
        None => data_dir()?,
    };
    std::fs::create_dir_all(&data)?;
    Ok(data)
}

fn open_registry(data_dir_override: Option<PathBuf>) -> Result<SettingsRegistry> {
    let data = resolve_data_dir(data_dir_override)?;
    Ok(SettingsRegistry::load(data.join(SETTINGS_FILE))?)
}

fn init_command(data_dir_override: Option<PathBuf>) -> Result<()> {
    let data = resolve_data_dir(data_dir_override)?;
    let settings_path = data.join(SETTINGS_FILE);
    if settings_path.exists() {
        return Err(anyhow!(
            "settings already exist at {}",
            settings_path.display()
        ));
    }
    save_settings(&settings_path, &LockSettings::default())?;
    println!("Settings written: {}", settings_path.display());
    Ok(())
}

async fn run_command(data_dir_override: Option<PathBuf>, backend: Option<BackendArg>) -> Result<()> {
    let registry = Arc::new(open_registry(data_dir_override)?);
    if let Some(backend) = backend {
        registry.update(|s| s.active_backend = backend.into())?;
    }

    let accessibility = Arc::new(FeedAccessibility::new(true));
    let device = Arc::new(HostDevice::default());
    let engine = Arc::new(LockEngine::new(
        registry.clone(),
        Arc::new(UnlockCache::new()),
        Arc::new(JsonLineTrigger::stdout()),
    ));
    // The host feed only carries accessibility events; other backends fail
    // to start and fall back.
    let platform = Platform::new(device.clone(), SELF_PACKAGE)
        .with_accessibility(accessibility.clone())
        .with_keep_alive(Arc::new(LoggedKeepAlive));
    let supervisor = Arc::new(Supervisor::new(engine, platform, Arc::new(SystemClock)));

    let mut monitor = supervisor.spawn_failure_monitor();
    let plan = supervisor.on_boot().await;
    info!(
        backend = %plan.backend,
        keep_accessibility_guard = plan.keep_accessibility_guard,
        state = ?plan.state,
        "boot start complete"
    );

    let socket_path = status_socket_path()?;
    let status_task = match status::spawn_status_server(supervisor.clone(), &socket_path) {
        Ok(task) => Some(task),
        Err(err) => {
            warn!(error = %err, "status socket disabled");
            None
        }
    };

    let feed = Feed::new(supervisor.clone(), accessibility, device);
    info!("service started");
    tokio::select! {
        res = signal::ctrl_c() => res?,
        res = feed.run(BufReader::new(tokio::io::stdin())) => {
            res?;
        }
    }
    info!("service stopping");

    supervisor.stop().await;
    if let Some(mut monitor) = monitor.take() {
        monitor.stop().await;
    }
    if let Some(task) = status_task {
        task.abort();
        let _ = std::fs::remove_file(&socket_path);
    }
    Ok(())
}

async fn status_command() -> Result<()> {
    let socket_path = status_socket_path()?;
    let snapshot = status::fetch_status(&socket_path).await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
