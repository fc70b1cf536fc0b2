//! Headless entrypoint for the signal/review/position pipeline.
//!
//! No HTTP server, no incoming connections -- metrics are pushed to stdout as structured
//! JSON (see `infrastructure::observability::reporter`) and everything else logs through
//! `tracing`.

use anyhow::{Context, Result};
use clap::Parser;
use perpetual_core::application::bootstrap::PersistenceBootstrap;
use perpetual_core::application::coordinator::Coordinator;
use perpetual_core::application::high_vol_track::{HighVolTrack, HighVolTrackConfig};
use perpetual_core::application::market_cache::MarketSnapshotCache;
use perpetual_core::application::order_executor::OrderExecutor;
use perpetual_core::application::position_supervisor::{PositionSupervisor, PositionSupervisorConfig};
use perpetual_core::application::review::hard_rules::{HardRuleConfig, HardRulesEngine};
use perpetual_core::application::review::llm::FallbackReviewer;
use perpetual_core::application::review::ReviewPipeline;
use perpetual_core::application::watcher::Watcher;
use perpetual_core::config::TradingConfig;
use perpetual_core::domain::ports::{ExchangeClient, SignalReviewer};
use perpetual_core::infrastructure::exchange::{MockExchangeClient, OkxExchangeClient};
use perpetual_core::infrastructure::llm::{ClaudeReviewer, DeepSeekReviewer};
use perpetual_core::infrastructure::observability::{Metrics, MetricsReporter};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::prelude::*;

/// Runs the perpetual-futures signal/review/position pipeline.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Path to the YAML config file (defaults to `config.yaml`, or `$CONFIG_PATH`).
    #[arg(long)]
    config: Option<String>,

    /// Overrides `coordinator.cycle_interval_sec` from the config file. Rejected below 10s
    /// to keep a misconfigured interval from hammering the venue and LLM APIs.
    #[arg(long)]
    interval: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    info!(version = env!("CARGO_PKG_VERSION"), "perpetual-core starting");

    let mut config = TradingConfig::load(cli.config.as_deref())?;
    if let Some(interval) = cli.interval {
        anyhow::ensure!(interval >= 10, "--interval must be at least 10 seconds, got {interval}");
        config.coordinator.cycle_interval_sec = interval;
    }

    let exchange: Arc<dyn ExchangeClient> = if config.okx.api_key.is_empty() {
        warn!("okx.api_key not set, running against the in-memory mock exchange");
        Arc::new(MockExchangeClient::default())
    } else {
        Arc::new(OkxExchangeClient::new(
            config.okx.api_key.clone(),
            config.okx.api_secret.clone(),
            config.okx.passphrase.clone(),
            config.okx.hostname.clone(),
        ))
    };

    let deepseek: Arc<dyn SignalReviewer> = Arc::new(DeepSeekReviewer::new(
        config.llm.deepseek.api_key.clone(),
        config.llm.deepseek.base_url.clone(),
        config.llm.deepseek.model.clone(),
        config.llm.deepseek.timeout_sec,
    ));
    let claude: Arc<dyn SignalReviewer> = Arc::new(ClaudeReviewer::new(
        config.llm.claude.api_key.clone(),
        config.llm.claude.base_url.clone(),
        config.llm.claude.model.clone(),
        config.llm.claude.timeout_sec,
    ));
    let shared_reviewer: Arc<dyn SignalReviewer> =
        Arc::new(FallbackReviewer::new(deepseek.clone(), claude.clone()));
    let pipeline_reviewer = FallbackReviewer::new(deepseek, claude);

    let hard_rules = HardRulesEngine::new(HardRuleConfig::default());
    let review = ReviewPipeline::new(hard_rules, pipeline_reviewer);

    let market_cache = MarketSnapshotCache::new(exchange.clone(), 8);
    let watcher = Watcher::new(shared_reviewer.clone());

    let executor = Arc::new(OrderExecutor::new(exchange.clone()));
    let high_vol_config = HighVolTrackConfig {
        total_capital: Decimal::from_f64(config.capital.total_usdt).unwrap_or_default(),
        max_position_pct: config.capital.max_position_pct,
        max_position_usdt: Decimal::from_f64(config.capital.max_position_usdt).unwrap_or_default(),
        min_position_usdt: Decimal::from_f64(config.capital.min_position_usdt).unwrap_or_default(),
        ..HighVolTrackConfig::default()
    };
    let high_vol = HighVolTrack::new(shared_reviewer.clone(), executor.clone(), high_vol_config);

    let position_supervisor = PositionSupervisor::new(
        exchange.clone(),
        executor.clone(),
        shared_reviewer,
        PositionSupervisorConfig {
            review_interval_sec: config.observability.review_interval_sec,
            ..PositionSupervisorConfig::default()
        },
    );

    info!("initializing persistence");
    let persistence = PersistenceBootstrap::init_with_urls(
        &config.database.signals_db_url,
        &config.database.watch_db_url,
        &config.database.high_vol_db_url,
        &config.database.training_db_url,
    )
    .await
    .context("failed to initialize persistence")?;

    let mut coordinator_config: perpetual_core::application::coordinator::CoordinatorConfig =
        config.coordinator.clone().into();
    coordinator_config.total_capital_usdt = config.capital.total_usdt;
    coordinator_config.max_position_pct = config.capital.max_position_pct;
    coordinator_config.max_position_usdt = config.capital.max_position_usdt;
    coordinator_config.min_position_usdt = config.capital.min_position_usdt;
    coordinator_config.default_leverage = config.risk.default_leverage;

    let coordinator = Arc::new(Coordinator::new(
        coordinator_config,
        exchange,
        market_cache,
        review,
        watcher,
        high_vol,
        position_supervisor,
        executor,
        persistence.signal_repository,
        persistence.watch_repository,
        persistence.high_vol_repository,
        persistence.training_repository,
    ));

    info!("reconciling venue positions against local state");
    coordinator.reconcile_positions().await;

    let metrics = Metrics::new().context("failed to initialize metrics")?;
    let reporter = MetricsReporter::new(coordinator.clone(), metrics, config.observability.metrics_report_interval_sec);
    tokio::spawn(reporter.run());

    info!(
        cycle_interval_sec = config.coordinator.cycle_interval_sec,
        "running main cycle loop, press ctrl-c to stop"
    );
    coordinator.run().await;

    info!("shutdown complete");
    Ok(())
}
