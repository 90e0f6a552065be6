//! Chronicle - Cosmos chain exporter.
//!
//! # Usage
//!
//! ```bash
//! # Live sync, refined and raw stores
//! chronicle --rpc-url http://localhost:26657 --api-url http://localhost:1317
//!
//! # Capture only, then replay the raw store later
//! chronicle --mode raw
//! chronicle --mode refine --follow
//!
//! # Rebuild votes from the raw store
//! chronicle --backfill-msg-type /cosmos.gov.v1beta1.MsgVote
//! ```

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};
use tracing_subscriber::{EnvFilter, fmt};

use chronicle_core::error::IndexerError;
use chronicle_core::metrics::init_metrics;
use chronicle_core::models::ChainContext;
use chronicle_core::ports::{NoopNotifier, TransferNotifier};
use chronicle_core::services::{
    FetcherConfig, GovernanceBackfill, IndexerConfig, IndexerService, LiveProposals,
    PollerConfig, ProposalTracker, RefineConfig, RefineService, SyncMode, ValidatorPoller,
    resolve_context,
};
use chronicle_cosmos::{CosmosChunkDecoder, CosmosClient, CosmosClientConfig};
use chronicle_handlers::DerivationEngine;
use chronicle_notify::{PushConfig, PushNotifier};
use chronicle_storage::{Database, DatabaseConfig, PgRepositories};

/// Chronicle CLI - Cosmos chain exporter.
#[derive(Parser, Debug)]
#[command(name = "chronicle")]
#[command(about = "Chronicle - Cosmos PoS chain indexer and exporter")]
#[command(version)]
struct Cli {
    /// CometBFT RPC URL.
    #[arg(long, env = "RPC_URL", default_value = "http://127.0.0.1:26657")]
    rpc_url: String,

    /// Cosmos query gateway (REST) URL.
    #[arg(long, env = "API_URL", default_value = "http://127.0.0.1:1317")]
    api_url: String,

    /// PostgreSQL database URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost/chronicle"
    )]
    database_url: String,

    /// Expected chain id. The node must report the same one.
    #[arg(long, env = "CHAIN_ID")]
    chain_id: Option<String>,

    /// Sync mode: basic (refined + raw), raw (capture only) or refine (replay raw).
    #[arg(long, env = "SYNC_MODE", default_value = "basic", value_parser = parse_sync_mode)]
    mode: SyncMode,

    /// Maximum in-flight transaction fetches per height.
    #[arg(long, env = "FETCH_CONCURRENCY", default_value = "20")]
    fetch_concurrency: usize,

    /// Backoff before retrying a failed height, in milliseconds.
    #[arg(long, env = "RETRY_DELAY_MS", default_value = "1000")]
    retry_delay_ms: u64,

    /// Sleep between chain-head checks once caught up, in milliseconds.
    #[arg(long, env = "POLL_INTERVAL_MS", default_value = "1000")]
    poll_interval_ms: u64,

    /// Page size for validator-set queries.
    #[arg(long, env = "VALIDATOR_PAGE_SIZE", default_value = "100")]
    validator_page_size: u32,

    /// First height the chain produced.
    #[arg(long, env = "GENESIS_HEIGHT", default_value = "1")]
    genesis_height: u64,

    /// Validator set refresh interval, in seconds.
    #[arg(long, env = "VALIDATOR_POLL_SECS", default_value = "60")]
    validator_poll_secs: u64,

    /// Proposal discovery and update interval, in seconds.
    #[arg(long, env = "PROPOSAL_POLL_SECS", default_value = "30")]
    proposal_poll_secs: u64,

    /// Raw blocks read per batch in refine mode.
    #[arg(long, env = "REFINE_BATCH_SIZE", default_value = "100")]
    refine_batch_size: i64,

    /// Keep refining new raw blocks once the raw store is drained.
    #[arg(long)]
    follow: bool,

    /// Do not refresh account snapshots after each height.
    #[arg(long, env = "SKIP_ACCOUNT_REFRESH")]
    skip_account_refresh: bool,

    /// Push gateway URL. Notifications are disabled when unset.
    #[arg(long, env = "PUSH_GATEWAY_URL")]
    push_gateway_url: Option<String>,

    /// Prometheus metrics port. Metrics are disabled when unset.
    #[arg(long, env = "METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Enable JSON log output.
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Run database migrations and exit.
    #[arg(long)]
    migrate_only: bool,

    /// Purge all indexed data from the database and exit.
    ///
    /// This deletes the raw and refined stores and the chain lookup table.
    /// Schema/migrations and notification tokens are preserved.
    #[arg(long)]
    purge: bool,

    /// Skip confirmation prompt for destructive operations (like --purge).
    #[arg(long, short = 'y')]
    yes: bool,

    /// Replay governance records of one message type from the raw store and exit.
    #[arg(long, value_name = "TYPE_URL")]
    backfill_msg_type: Option<String>,
}

/// Parse sync mode from string.
fn parse_sync_mode(s: &str) -> Result<SyncMode, String> {
    match s.to_lowercase().as_str() {
        "basic" => Ok(SyncMode::Basic),
        "raw" => Ok(SyncMode::Raw),
        "refine" => Ok(SyncMode::Refine),
        _ => Err(format!(
            "Invalid sync mode '{}'. Use 'basic', 'raw' or 'refine'.",
            s
        )),
    }
}

type Pipeline = IndexerService<CosmosClient, PgRepositories, DerivationEngine>;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    // Prometheus metrics exporter (optional - failures don't crash the app)
    let metrics_enabled = cli.metrics_port.is_some_and(install_metrics);

    // ─────────────────────────────────────────────────────────────────────────
    // 🚀 STARTUP
    // ─────────────────────────────────────────────────────────────────────────
    info!(mode = cli.mode.as_str(), "🚀 Starting Chronicle");
    debug!(rpc_url = %cli.rpc_url, api_url = %cli.api_url, "Chain endpoints");
    debug!(database_url = %mask_password(&cli.database_url), "Database endpoint");

    // ─────────────────────────────────────────────────────────────────────────
    // 🗄️ DATABASE
    // ─────────────────────────────────────────────────────────────────────────
    info!("🗄️  Connecting to database...");
    let db = Database::connect(&DatabaseConfig::for_indexer(&cli.database_url))
        .await
        .context("Failed to connect to database")?;
    if !db.is_healthy().await {
        bail!("Database is not answering queries");
    }

    db.migrate().await.context("Failed to run migrations")?;
    info!("🗄️  Database ready (migrations applied)");

    if cli.migrate_only {
        info!("🛑 --migrate-only flag set, exiting");
        return Ok(());
    }

    if cli.purge {
        return handle_purge(&db, cli.yes).await;
    }

    let db = Arc::new(db);
    let repositories = Arc::new(PgRepositories::new(db.clone()));

    // ─────────────────────────────────────────────────────────────────────────
    // 📡 CHAIN CONNECTION
    // ─────────────────────────────────────────────────────────────────────────
    info!("📡 Connecting to chain node...");
    let client = Arc::new(
        CosmosClient::new(CosmosClientConfig {
            rpc_url: cli.rpc_url.clone(),
            api_url: cli.api_url.clone(),
            ..Default::default()
        })
        .context("Failed to build chain client")?,
    );

    let ctx = Arc::new(
        resolve_context(
            client.as_ref(),
            repositories.as_ref(),
            cli.chain_id.as_deref(),
            cli.genesis_height,
        )
        .await
        .context("Failed to resolve chain context")?,
    );

    let deriver = Arc::new(DerivationEngine::new());
    let decoder = Arc::new(CosmosChunkDecoder);

    if let Some(msg_type) = cli.backfill_msg_type.as_deref() {
        let written = GovernanceBackfill::new(ctx.clone(), repositories.clone(), deriver, decoder)
            .with_batch_size(cli.refine_batch_size)
            .run(msg_type)
            .await
            .context("Backfill failed")?;
        info!(msg_type, written, "✅ Backfill complete");
        db.close().await;
        return Ok(());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // ⚡ SERVICES START
    // ─────────────────────────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::new();

    if cli.mode.writes_refined() {
        handles.extend(spawn_pollers(&cli, &ctx, &client, &repositories, &shutdown_tx));
    }

    let pipeline_shutdown_tx = shutdown_tx.clone();
    let pipeline_handle = match cli.mode {
        SyncMode::Refine => {
            let refine = RefineService::new(
                RefineConfig {
                    batch_size: cli.refine_batch_size,
                    follow: cli.follow,
                    poll_interval: Duration::from_millis(cli.poll_interval_ms),
                    retry_delay: Duration::from_millis(cli.retry_delay_ms),
                },
                ctx.clone(),
                repositories.clone(),
                deriver,
                decoder,
            );
            tokio::spawn(
                async move {
                    match refine.run(shutdown_rx).await {
                        Ok(refined) => info!(refined, "✅ Raw store drained"),
                        Err(IndexerError::ShutdownRequested) => {}
                        Err(e) => error!(error = ?e, "❌ Refine error"),
                    }
                    let _ = pipeline_shutdown_tx.send(true);
                }
                .instrument(info_span!("refine")),
            )
        }
        SyncMode::Basic | SyncMode::Raw => {
            let notifier = build_notifier(&cli, &repositories)?;
            let indexer: Pipeline = IndexerService::new(
                IndexerConfig {
                    mode: cli.mode,
                    poll_interval: Duration::from_millis(cli.poll_interval_ms),
                    retry_delay: Duration::from_millis(cli.retry_delay_ms),
                    refresh_accounts: !cli.skip_account_refresh,
                    fetcher: FetcherConfig {
                        concurrency: cli.fetch_concurrency,
                        validator_page_size: cli.validator_page_size,
                    },
                },
                ctx.clone(),
                client.clone(),
                repositories.clone(),
                deriver,
                notifier,
            );
            tokio::spawn(
                async move {
                    match indexer.run(shutdown_rx).await {
                        Ok(()) | Err(IndexerError::ShutdownRequested) => {}
                        Err(e) => error!(error = ?e, "❌ Indexer error"),
                    }
                    let _ = pipeline_shutdown_tx.send(true);
                }
                .instrument(info_span!("indexer")),
            )
        }
    };

    // ─────────────────────────────────────────────────────────────────────────
    // ✅ READY
    // ─────────────────────────────────────────────────────────────────────────
    info!(chain = %ctx.chain_id, "✅ Chronicle ready");
    match cli.metrics_port {
        Some(port) if metrics_enabled => {
            info!("   📊 Metrics:  http://localhost:{}/metrics", port)
        }
        _ => info!("   📊 Metrics:  disabled"),
    }
    info!("   Press Ctrl+C to stop");

    let mut stopped_rx = shutdown_tx.subscribe();
    tokio::select! {
        _ = shutdown_signal() => {}
        _ = stopped_rx.changed() => debug!("Pipeline finished"),
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 🛑 SHUTDOWN
    // ─────────────────────────────────────────────────────────────────────────
    info!("🛑 Shutting down...");
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(Duration::from_secs(30), pipeline_handle).await {
        Ok(_) => debug!("Pipeline stopped"),
        Err(_) => warn!("⚠️  Pipeline shutdown timed out"),
    }

    for handle in handles {
        if tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .is_err()
        {
            warn!("⚠️  Poller shutdown timed out");
        }
    }

    db.close().await;

    info!("🛑 Shutdown complete");
    Ok(())
}

/// Install the Prometheus exporter. Returns whether metrics are live.
fn install_metrics(port: u16) -> bool {
    match format!("0.0.0.0:{}", port).parse::<std::net::SocketAddr>() {
        Ok(metrics_addr) => match PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .install()
        {
            Ok(()) => {
                init_metrics();
                true
            }
            Err(e) => {
                warn!("⚠️  Failed to start metrics exporter: {}. Continuing without metrics.", e);
                false
            }
        },
        Err(e) => {
            warn!("⚠️  Invalid metrics address: {}. Continuing without metrics.", e);
            false
        }
    }
}

/// Spawn the validator poller and both proposal tasks.
fn spawn_pollers(
    cli: &Cli,
    ctx: &Arc<ChainContext>,
    client: &Arc<CosmosClient>,
    repositories: &Arc<PgRepositories>,
    shutdown_tx: &watch::Sender<bool>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let config = PollerConfig {
        validator_interval: Duration::from_secs(cli.validator_poll_secs),
        proposal_discovery_interval: Duration::from_secs(cli.proposal_poll_secs),
        proposal_update_interval: Duration::from_secs(cli.proposal_poll_secs),
    };

    let validators = ValidatorPoller::new(
        config.validator_interval,
        ctx.clone(),
        client.clone(),
        repositories.clone(),
    );
    let tracker = Arc::new(ProposalTracker::new(
        config,
        ctx.clone(),
        client.clone(),
        repositories.clone(),
        LiveProposals::default(),
    ));

    let validators_rx = shutdown_tx.subscribe();
    let discovery_rx = shutdown_tx.subscribe();
    let updates_rx = shutdown_tx.subscribe();
    let discovery = tracker.clone();

    vec![
        tokio::spawn(
            async move {
                let _ = validators.run(validators_rx).await;
            }
            .instrument(info_span!("validators")),
        ),
        tokio::spawn(
            async move {
                let _ = discovery.run_discovery(discovery_rx).await;
            }
            .instrument(info_span!("proposals")),
        ),
        tokio::spawn(
            async move {
                let _ = tracker.run_updates(updates_rx).await;
            }
            .instrument(info_span!("proposals")),
        ),
    ]
}

fn build_notifier(
    cli: &Cli,
    repositories: &Arc<PgRepositories>,
) -> Result<Arc<dyn TransferNotifier>> {
    match &cli.push_gateway_url {
        Some(url) => {
            info!("📨 Push notifications enabled");
            let notifier = PushNotifier::new(
                PushConfig {
                    gateway_url: url.clone(),
                    ..Default::default()
                },
                repositories.clone(),
            )
            .context("Failed to build push client")?;
            Ok(Arc::new(notifier))
        }
        None => Ok(Arc::new(NoopNotifier)),
    }
}

/// Initialize tracing subscriber.
fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }
}

/// Mask password in database URL for logging.
fn mask_password(url_str: &str) -> String {
    match url::Url::parse(url_str) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("****"));
            }
            url.to_string()
        }
        Err(_) => url_str.to_string(),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "❌ Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "❌ Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Handle the --purge command.
async fn handle_purge(db: &Database, skip_confirmation: bool) -> Result<()> {
    warn!("⚠️  PURGE MODE: This will delete ALL indexed data!");
    warn!("   - Raw blocks and transactions");
    warn!("   - Refined blocks, validators, governance and accounts");
    warn!("   - Schema, migrations and notification tokens will be preserved");

    if !skip_confirmation {
        print!("\n🔴 Are you sure you want to purge all data? [y/N] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            info!("❌ Purge cancelled");
            return Ok(());
        }
    }

    info!("🗑️  Purging database...");
    let stats = db.purge().await.context("Failed to purge database")?;

    info!("✅ Database purged successfully");
    info!("   📦 Raw blocks removed: {}", stats.raw_blocks_removed);
    info!("   📝 Raw transactions removed: {}", stats.raw_transactions_removed);
    info!("   🧱 Blocks removed: {}", stats.blocks_removed);
    info!("   💸 Transactions removed: {}", stats.transactions_removed);
    info!("   The indexer will start from the genesis height on next run");

    Ok(())
}
