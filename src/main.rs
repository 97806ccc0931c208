use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use webhook_relay::config::Config;
use webhook_relay::delivery::Deliverer;
use webhook_relay::discord::DiscordClient;
use webhook_relay::dispatch::Dispatcher;
use webhook_relay::github::OctocrabClient;
use webhook_relay::reconcile::Reconciler;
use webhook_relay::registry::NotificationRegistry;
use webhook_relay::routing::{ChannelKey, ChannelRouter};
use webhook_relay::server::{AppState, build_router};
use webhook_relay::stats::StatsPublisher;

const DEFAULT_LOG_FILTER: &str = "webhook_relay=info";

/// Accepted events waiting for a dispatcher slot.
const EVENT_QUEUE_CAPACITY: usize = 256;

/// Channels trimmed to the retention age at startup.
const RETENTION_CHANNELS: [ChannelKey; 3] =
    [ChannelKey::Commits, ChannelKey::PullRequests, ChannelKey::Releases];

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the webhook server, dispatcher and periodic reconciler (default).
    Serve,
    /// Run one reconciliation pass and exit.
    Cleanup,
    /// Delete every message in a channel and untrack everything posted there.
    Purge {
        /// Channel key, e.g. `pull_requests` or `commits`.
        channel: String,
    },
    /// Post and track every open pull request of `GITHUB_REPOSITORIES` that
    /// is not tracked yet.
    Backfill,
    /// Update the repository statistics once and exit.
    Stats,
}

type Relay = Reconciler<DiscordClient, OctocrabClient>;
type Stats = StatsPublisher<DiscordClient, OctocrabClient>;

struct Services {
    deliverer: Deliverer<DiscordClient>,
    github: Arc<OctocrabClient>,
    reconciler: Arc<Relay>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_tracing()?;

    let cli = Cli::parse();
    let config = Config::from_env().context("invalid configuration")?;
    let services = build(&config)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, services).await,
        Command::Cleanup => {
            let report = services.reconciler.reconcile().await;
            info!(
                checked = report.checked,
                removed = report.removed,
                errors = report.errors,
                "Cleanup finished"
            );
            Ok(())
        }
        Command::Purge { channel } => {
            let Some(key) = ChannelKey::parse(&channel) else {
                let known: Vec<_> = ChannelKey::ALL.iter().map(ChannelKey::name).collect();
                bail!("unknown channel key {channel:?}; expected one of {}", known.join(", "));
            };
            let Some(id) = config.channels.get(key) else {
                bail!("channel {key} is not configured (set {})", key.env_var());
            };
            let report = services.reconciler.purge_channel(id).await?;
            info!(
                channel = %key,
                deleted = report.deleted,
                failed = report.failed,
                untracked = report.untracked.len(),
                "Purge finished"
            );
            Ok(())
        }
        Command::Backfill => {
            if config.repositories.is_empty() {
                bail!("no repositories to backfill (set GITHUB_REPOSITORIES)");
            }
            let dispatcher = Dispatcher::new(
                services.deliverer,
                Arc::clone(services.reconciler.registry()),
                config.limits,
            );
            let report = dispatcher.backfill(&*services.github, &config.repositories).await;
            if report.errors > 0 {
                bail!("backfill finished with {} errors", report.errors);
            }
            Ok(())
        }
        Command::Stats => {
            if config.repositories.is_empty() {
                bail!("no repositories to count (set GITHUB_REPOSITORIES)");
            }
            stats_publisher(&config, &services).publish().await?;
            Ok(())
        }
    }
}

/// Console logging always; a daily rolling file too when `LOGS_DIR` is set.
fn init_tracing() -> anyhow::Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let (file_layer, guard) = match std::env::var("LOGS_DIR").ok().filter(|d| !d.is_empty()) {
        Some(dir) => {
            std::fs::create_dir_all(&dir).with_context(|| format!("creating log directory {dir}"))?;
            let appender = tracing_appender::rolling::daily(&dir, "webhook-relay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()?;
    Ok(guard)
}

fn build(config: &Config) -> anyhow::Result<Services> {
    let registry = Arc::new(
        NotificationRegistry::open(config.registry_path()).context("opening notification registry")?,
    );
    let discord = Arc::new(DiscordClient::new(config.discord_token.clone())?);
    let deliverer = Deliverer::new(discord, ChannelRouter::new(config.channels.clone()));

    let github = match &config.github_token {
        Some(token) => OctocrabClient::from_token(token.clone())?,
        None => {
            warn!("GITHUB_TOKEN not set, pull request state queries are unauthenticated");
            OctocrabClient::anonymous()?
        }
    };
    let github = Arc::new(github);
    let reconciler = Arc::new(Reconciler::new(registry, deliverer.clone(), Arc::clone(&github)));
    Ok(Services {
        deliverer,
        github,
        reconciler,
    })
}

fn stats_publisher(config: &Config, services: &Services) -> Stats {
    StatsPublisher::open(
        services.deliverer.clone(),
        Arc::clone(&services.github),
        config.repositories.clone(),
        config.limits,
        config.stats_path(),
    )
}

async fn serve(config: Config, services: Services) -> anyhow::Result<()> {
    let stats = (!config.repositories.is_empty()).then(|| Arc::new(stats_publisher(&config, &services)));
    let Services { deliverer, reconciler, .. } = services;
    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    for key in RETENTION_CHANNELS {
        let Some(channel) = config.channels.get(key) else {
            continue;
        };
        match reconciler.purge_older_than(channel, config.retention).await {
            Ok(report) => info!(channel = %key, deleted = report.deleted, "Retention purge done"),
            Err(e) => warn!(channel = %key, error = %e, "Retention purge failed"),
        }
    }

    let reconcile_task = tokio::spawn(
        Arc::clone(&reconciler).run(config.cleanup_interval, shutdown.clone()),
    );

    let stats_task = match stats {
        Some(stats) => Some(tokio::spawn(stats.run(config.stats_interval, shutdown.clone()))),
        None => {
            info!("GITHUB_REPOSITORIES not set, repository statistics disabled");
            None
        }
    };

    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let dispatcher = Arc::new(Dispatcher::new(
        deliverer,
        Arc::clone(reconciler.registry()),
        config.limits,
    ));
    let dispatch_task = tokio::spawn(dispatcher.run(events_rx, shutdown.clone()));

    let app = build_router(AppState::new(config.webhook_secret.clone(), events_tx));
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, channels = config.channels.len(), "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    shutdown.cancel();
    let tasks = [
        ("dispatcher", Some(dispatch_task)),
        ("reconciler", Some(reconcile_task)),
        ("stats", stats_task),
    ];
    for (name, task) in tasks {
        let Some(task) = task else { continue };
        if let Err(e) = task.await {
            error!(task = name, error = %e, "Task ended abnormally");
        }
    }
    info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("Shutdown requested");
    shutdown.cancel();
}
