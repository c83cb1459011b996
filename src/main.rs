use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use version_watch::action::notify::HttpNotifier;
use version_watch::config::Config;
use version_watch::context::Context;
use version_watch::service::Service;
use version_watch::service::events::EventSink;
use version_watch::service::manager::ServiceManager;
use version_watch::store::StatusStore;

/// How long shutdown waits for queued status writes
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "version-watch")]
#[command(version, about = "Track upstream releases and drive deployment actions")]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = "config.yml")]
    config: PathBuf,

    /// Log filter, e.g. `debug` or `version_watch=trace`
    #[arg(long)]
    log_level: Option<String>,

    /// Validate the configuration, print the services and exit
    #[arg(long)]
    config_check: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

    if cli.config_check {
        return print_services(&config);
    }

    let _guard = init_logging(
        cli.log_level.as_deref(),
        config.settings.log.level.as_deref(),
        config.settings.log.file.as_deref(),
    )?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(config))
}

/// Filter precedence: `--log-level`, then `RUST_LOG`, then `settings.log.level`
fn init_logging(
    flag: Option<&str>,
    configured: Option<&str>,
    file: Option<&Path>,
) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = match flag {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(configured.unwrap_or("info")))?,
    };

    let (file_layer, guard) = match file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("Invalid log file {:?}", path))?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(guard)
}

fn print_services(config: &Config) -> anyhow::Result<()> {
    for (id, section) in &config.service {
        let service = Service::from_config(id, section, config)?;
        println!(
            "{}: latest={:?} deployed={} interval={:?} active={} auto_approve={} commands={} webhooks={} notify={}",
            service.id,
            service.latest.kind(),
            service
                .deployed
                .as_ref()
                .map_or("-".to_string(), |d| format!("{:?}", d.kind())),
            service.interval,
            service.active,
            service.auto_approve,
            service.actions.commands.len(),
            service.actions.webhooks.len(),
            service.actions.notifies.len(),
        );
    }
    println!("{} services OK", config.service.len());
    Ok(())
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!("Starting version-watch {}", env!("CARGO_PKG_VERSION"));

    let db_path = config.database_file();
    let store = Arc::new(
        StatusStore::open(&db_path)
            .with_context(|| format!("Failed to open status database {:?}", db_path))?,
    );
    let stored = store.load_all().context("Failed to read stored statuses")?;

    let (sink, receivers) = EventSink::new();
    let ctx = Arc::new(Context::new(sink).context("Failed to build HTTP client")?);
    let notifier = Arc::new(HttpNotifier::new(ctx.client(false).clone()));
    let manager = ServiceManager::load(config, Arc::clone(&ctx), notifier, stored)?;

    let writer = Arc::clone(&store)
        .spawn_writer(receivers.save)
        .context("Failed to start status writer")?;
    let mut changes = receivers.change;
    let broadcaster = tokio::spawn(async move {
        while let Some(event) = changes.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => debug!("change: {}", json),
                Err(e) => error!("Failed to serialize change event: {}", e),
            }
        }
    });

    manager.start().await;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("Shutdown signal received");

    manager.shutdown().await;
    drop(manager);
    drop(ctx);
    broadcaster.abort();

    let drained = tokio::time::timeout(
        WRITER_DRAIN_TIMEOUT,
        tokio::task::spawn_blocking(move || writer.join()),
    )
    .await;
    if drained.is_err() {
        warn!("Status writer did not finish within {:?}", WRITER_DRAIN_TIMEOUT);
    }
    Ok(())
}
