//! Coordinator: the single owning struct that drives C1–C8 in dependency order on a
//! fixed-cadence cycle. Generalizes the teacher's `TradingEngine::run` main loop (one
//! `tokio::time::interval` tick, bounded fan-out, cooperative ctrl-c shutdown) from a
//! single-strategy scan into the two-track (main + high-vol) pipeline this system runs.

use crate::application::dedup::{DedupDecision, Deduplicator};
use crate::application::detectors::reversal::ReversalDetector;
use crate::application::detectors::trend_anticipation::TrendAnticipationDetector;
use crate::application::detectors::{DetectionContext, ExternalFactors, SignalDetector, TrendFacts};
use crate::application::high_vol_track::{
    detect_precursors, hard_filter, promote_on_precursor, readiness_score, BbVolumeMomentumTrend,
    HighVolCandidateFacts, HighVolEntry, HighVolTrack, POOL_CAPACITY, READY_THRESHOLD,
};
use crate::application::market_cache::MarketSnapshotCache;
use crate::application::order_executor::{AlgoOrderCache, OrderExecutor};
use crate::application::position_supervisor::{ExitEvent, PositionSupervisor, PositionTick};
use crate::application::review::{ReviewOutcome, ReviewPipeline};
use crate::application::watcher::{LiveSnapshot, PricingDecision, Watcher};
use crate::domain::funding::FundingHistory;
use crate::domain::high_vol::{HighVolSignal, HighVolStatus};
use crate::domain::observation::ObservationRow;
use crate::domain::position::{PositionRecord, StrategyTag};
use crate::domain::ports::{ExchangeClient, OrderType};
use crate::domain::repositories::{HighVolRepository, SignalRepository, TrainingRepository, WatchRepository};
use crate::domain::signals::{Side, SignalKind};
use chrono::Utc;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, warn};

const STAGE: &str = "coordinator";

pub struct CoordinatorConfig {
    pub cycle_interval_sec: u64,
    pub universe_timeframe: String,
    pub candle_limit: usize,
    pub min_candles: usize,
    pub watcher_recheck_sec: i64,
    pub sl_verification_sec: i64,
    /// §4.8 sizing inputs for track-1 (watcher-triggered) orders, mirroring
    /// `config::CapitalConfig`/`config::RiskConfig` field-for-field.
    pub total_capital_usdt: f64,
    pub max_position_pct: f64,
    pub max_position_usdt: f64,
    pub min_position_usdt: f64,
    pub default_leverage: u32,
    pub amount_precision: u32,
    pub venue_min_amount: f64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            cycle_interval_sec: 60,
            universe_timeframe: "5m".to_string(),
            candle_limit: 200,
            min_candles: 50,
            watcher_recheck_sec: 60,
            sl_verification_sec: 60,
            total_capital_usdt: 50.0,
            max_position_pct: 0.2,
            max_position_usdt: 500.0,
            min_position_usdt: 10.0,
            default_leverage: 5,
            amount_precision: 3,
            venue_min_amount: 0.001,
        }
    }
}

/// Everything that lives for the process lifetime and is shared, mutated state between
/// cycles. Individual components only ever touch it through the accessors below, all on
/// the main cycle task — there is no cross-task locking contention by design, the `RwLock`s
/// exist so infrastructure adapters (e.g. an admin HTTP endpoint) can read a consistent
/// snapshot concurrently.
pub struct Coordinator {
    config: CoordinatorConfig,
    exchange: Arc<dyn ExchangeClient>,
    market_cache: MarketSnapshotCache,
    reversal: ReversalDetector,
    trend_anticipation: TrendAnticipationDetector,
    dedup: Mutex<Deduplicator>,
    review: ReviewPipeline,
    watcher: Watcher,
    high_vol: HighVolTrack,
    position_supervisor: PositionSupervisor,
    executor: Arc<OrderExecutor>,
    funding_history: Mutex<FundingHistory>,
    observation_rows: RwLock<Vec<ObservationRow>>,
    high_vol_pool: RwLock<Vec<HighVolSignal>>,
    positions: RwLock<HashMap<String, PositionRecord>>,
    algo_cache: Mutex<AlgoOrderCache>,
    signal_repo: Arc<dyn SignalRepository>,
    watch_repo: Arc<dyn WatchRepository>,
    high_vol_repo: Arc<dyn HighVolRepository>,
    training_repo: Arc<dyn TrainingRepository>,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CoordinatorConfig,
        exchange: Arc<dyn ExchangeClient>,
        market_cache: MarketSnapshotCache,
        review: ReviewPipeline,
        watcher: Watcher,
        high_vol: HighVolTrack,
        position_supervisor: PositionSupervisor,
        executor: Arc<OrderExecutor>,
        signal_repo: Arc<dyn SignalRepository>,
        watch_repo: Arc<dyn WatchRepository>,
        high_vol_repo: Arc<dyn HighVolRepository>,
        training_repo: Arc<dyn TrainingRepository>,
    ) -> Self {
        Self {
            config,
            exchange,
            market_cache,
            reversal: ReversalDetector::default(),
            trend_anticipation: TrendAnticipationDetector,
            dedup: Mutex::new(Deduplicator::new(30)),
            review,
            watcher,
            high_vol,
            position_supervisor,
            executor,
            funding_history: Mutex::new(FundingHistory::new()),
            observation_rows: RwLock::new(Vec::new()),
            high_vol_pool: RwLock::new(Vec::new()),
            positions: RwLock::new(HashMap::new()),
            algo_cache: Mutex::new(AlgoOrderCache::default()),
            signal_repo,
            watch_repo,
            high_vol_repo,
            training_repo,
        }
    }

    /// Clones the current open-position map for reporting. Cheap relative to the cycle
    /// interval; callers should not poll this faster than once a second.
    pub async fn positions_snapshot(&self) -> HashMap<String, PositionRecord> {
        self.positions.read().await.clone()
    }

    /// Startup reconciliation: adopts every venue position this process doesn't already know
    /// about into `self.positions`, synthesizing conservative default stops for it. Intended
    /// to run once before the cycle loop starts, so a restart never leaves a live position
    /// outside C7's supervision.
    pub async fn reconcile_positions(&self) {
        let venue_positions = match self.exchange.fetch_positions().await {
            Ok(p) => p,
            Err(e) => {
                error!(stage = STAGE, error = %e, "failed to fetch venue positions for reconciliation");
                return;
            }
        };
        let now = Utc::now();
        let mut positions = self.positions.write().await;
        for venue in venue_positions {
            if positions.contains_key(&venue.symbol) {
                continue;
            }
            let record = self.position_supervisor.reconcile_unknown_position(
                &venue.symbol,
                venue.side,
                venue.entry_price,
                venue.contracts,
                None,
                None,
                now,
            );
            info!(stage = STAGE, symbol = %venue.symbol, "adopted untracked venue position at startup");
            positions.insert(venue.symbol.clone(), record);
        }
    }

    /// Main process loop: ticks at `cycle_interval_sec`, exits cleanly on ctrl-c. A slow
    /// cycle never causes a burst of catch-up ticks (`Delay` skip behaviour).
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_secs(self.config.cycle_interval_sec));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(stage = STAGE, error = %e, "cycle failed, continuing on next tick");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!(stage = STAGE, "shutdown signal received, stopping after current cycle");
                    break;
                }
            }
        }
    }

    /// C1 → C2 → C3 → C4 → C5 (track 1) plus C6's own gate-to-pool step and C7 over every
    /// live position, all within one cycle.
    pub async fn run_cycle(&self) -> anyhow::Result<()> {
        let btc = self.market_cache.snapshot_btc().await;

        let universe = self.market_cache.universe(false, || Vec::new()).await;
        let candles = self.market_cache.snapshot_candles(&universe, &self.config.universe_timeframe, self.config.candle_limit, self.config.min_candles).await;
        let funding = self.market_cache.snapshot_funding(&universe).await;

        {
            let mut history = self.funding_history.lock().await;
            for (symbol, rate) in &funding {
                history.record(symbol, *rate);
            }
        }

        for symbol in &universe {
            let Some(symbol_candles) = candles.get(symbol) else { continue };
            if let Err(e) = self.run_symbol_pipeline(symbol, symbol_candles, &btc).await {
                warn!(stage = STAGE, symbol, error = %e, "symbol pipeline failed, skipping");
            }
        }

        self.run_watcher_pass(&btc).await;
        self.run_high_vol_pass().await;
        self.run_position_supervision_pass().await;

        Ok(())
    }

    /// C2 (both detectors) → C3 → C4 for one symbol. Candidates that survive both detectors
    /// are evaluated independently; the deduplicator arbitrates between them exactly as it
    /// would between two cycles' worth of candidates on the same symbol.
    async fn run_symbol_pipeline(
        &self,
        symbol: &str,
        symbol_candles: &[crate::domain::market::Candle],
        btc: &crate::domain::market::BtcSnapshot,
    ) -> anyhow::Result<()> {
        let Some(last) = symbol_candles.last() else { return Ok(()) };
        let metrics = build_metrics(symbol, symbol_candles, last);
        // Detectors resolve the actual trade side off RSI internally; the closes-based facts
        // below only need a side hint to pick the right "against" direction, so a coarse
        // RSI split is enough ahead of that resolution.
        let side_hint = if metrics.rsi <= 50.0 { crate::domain::signals::Side::Long } else { crate::domain::signals::Side::Short };
        let facts = build_trend_facts(symbol_candles, side_hint);
        let ctx = DetectionContext { metrics: &metrics, btc, facts: &facts, external: ExternalFactors::default() };

        for outcome in [self.reversal.detect(&ctx), self.trend_anticipation.detect(&ctx)] {
            let candidate = match outcome {
                crate::domain::signals::DetectorOutcome::Emit(c) => c,
                crate::domain::signals::DetectorOutcome::Reject(r) => {
                    info!(stage = STAGE, symbol, stage_reject = r.stage, reason = %r.reason, "detector rejected");
                    continue;
                }
            };

            let decision = { self.dedup.lock().await.evaluate(&candidate) };
            if !matches!(decision, DedupDecision::Admit) {
                continue;
            }

            let history = self.funding_history.lock().await.clone();
            let next_id = self.allocate_signal_id().await;
            match self.review.review(&candidate, symbol_candles, &history, next_id).await {
                ReviewOutcome::Approved(row) => {
                    let _ = self.signal_repo.insert(&row).await;
                    self.enqueue_observation(next_id, &candidate).await;
                }
                ReviewOutcome::HardRuleRejected { rule, reason } => {
                    info!(stage = STAGE, symbol, rule, reason, "hard-rule rejected");
                }
                ReviewOutcome::AiRejected { reasoning } => {
                    info!(stage = STAGE, symbol, reasoning, "AI rejected");
                }
                ReviewOutcome::AiUnavailable => {
                    warn!(stage = STAGE, symbol, "AI reviewer unavailable, candidate dropped this cycle");
                }
            }
        }

        self.high_vol_cycle(symbol, symbol_candles, &metrics).await;
        Ok(())
    }

    async fn allocate_signal_id(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    /// `id` is the same id just given to the `EmittedSignalRow` this candidate produced, so
    /// the two rows can be correlated later without a dedicated foreign-key field.
    async fn enqueue_observation(&self, id: i64, candidate: &crate::domain::signals::Candidate) {
        let now = Utc::now();
        let recent = self
            .watch_repo
            .has_recent(&candidate.symbol, side_label(candidate.side), 10)
            .await
            .unwrap_or(false);
        if recent {
            return;
        }
        match ObservationRow::from_candidate(id, candidate, now) {
            Ok(row) => {
                let _ = self.watch_repo.insert(&row).await;
                self.observation_rows.write().await.push(row);
            }
            Err(e) => error!(stage = STAGE, error = %e, "failed to build observation row"),
        }
    }

    /// C5: re-evaluates every non-terminal observation row against live metrics.
    async fn run_watcher_pass(&self, btc: &crate::domain::market::BtcSnapshot) {
        let now = Utc::now();
        let mut rows = self.observation_rows.write().await;
        for row in rows.iter_mut() {
            if row.status.is_terminal() {
                continue;
            }
            if (now - row.last_check_at).num_seconds() < self.config.watcher_recheck_sec {
                continue;
            }
            let Ok(candles) = self.exchange.fetch_candles(&row.symbol, "5m", 60).await else { continue };
            let Some(last) = candles.last() else { continue };
            let live = LiveSnapshot {
                price: last.close.to_f64().unwrap_or(0.0),
                rsi: crate::domain::indicators::rsi(&candles, 14),
                volume_ratio: 1.0,
                atr_pct: crate::domain::indicators::atr_pct(&candles, 14),
                adx: crate::domain::indicators::adx(&candles, 14),
                macd_bull_cross: false,
                macd_bear_cross: false,
                orderbook_bid_share: 0.5,
                btc_5bar_trend_pct: btc.change_1h_pct,
            };
            let decision = self.watcher.process_tick(row, &live, now).await;
            let _ = self.watch_repo.update(row).await;
            if let Some(decision) = decision {
                self.apply_pricing_decision(row, decision).await;
            }
        }
        rows.retain(|r| !matches!(r.status, crate::domain::observation::ObservationStatus::Expired | crate::domain::observation::ObservationStatus::Abandoned));
    }

    /// §4.5 step 6 → §4.8: turns a non-abandon pricing decision into an atomic order
    /// placement and records the result on both the in-memory position map and the
    /// `EmittedSignalRow` the watcher row was derived from.
    async fn apply_pricing_decision(&self, row: &ObservationRow, decision: PricingDecision) {
        let (order_type, entry_price) = match decision {
            PricingDecision::Abandon { reason } => {
                info!(stage = STAGE, symbol = %row.symbol, reason, "pricing decision abandoned the observation");
                return;
            }
            PricingDecision::ExecuteMarket => (OrderType::Market, row.detected_price),
            PricingDecision::ExecuteLimit { offset_pct } => {
                let price_f = row.detected_price.to_f64().unwrap_or(0.0);
                let entry_f = match row.side {
                    Side::Long => price_f * (1.0 - offset_pct / 100.0),
                    Side::Short => price_f * (1.0 + offset_pct / 100.0),
                };
                (OrderType::Limit, Decimal::try_from(entry_f).unwrap_or(row.detected_price))
            }
        };

        let contracts = self.position_size_track1(entry_price);
        if contracts < Decimal::from_f64(self.config.venue_min_amount).unwrap_or_default() {
            warn!(stage = STAGE, symbol = %row.symbol, "track-1 position size below venue minimum, skipping order");
            return;
        }

        let ack = {
            let mut cache = self.algo_cache.lock().await;
            self.executor
                .create_order_with_sl_tp(
                    &mut cache,
                    &row.symbol,
                    row.side,
                    order_type,
                    contracts,
                    matches!(order_type, OrderType::Limit).then_some(entry_price),
                    row.initial_sl,
                    row.initial_tp,
                )
                .await
        };
        let ack = match ack {
            Ok(ack) => ack,
            Err(e) => {
                error!(stage = STAGE, symbol = %row.symbol, error = %e, "track-1 order placement failed");
                return;
            }
        };

        let now = Utc::now();
        let fill_price = ack.fill_price.unwrap_or(entry_price);
        let strategy_tag = match row.kind {
            SignalKind::Reversal => StrategyTag::Reversal,
            SignalKind::TrendAnticipation => StrategyTag::Trend,
            SignalKind::HighVol => StrategyTag::HighVolatility,
        };
        self.positions.write().await.insert(
            row.symbol.clone(),
            PositionRecord {
                symbol: row.symbol.clone(),
                side: row.side,
                entry_price: fill_price,
                contracts,
                original_sl: row.initial_sl,
                original_tp: row.initial_tp,
                current_sl: row.initial_sl,
                current_tp: row.initial_tp,
                highest_favorable_price: fill_price,
                highest_pnl_fraction: 0.0,
                current_tier_index: -1,
                breakeven_set: false,
                trailing_activated: false,
                tp_extended: false,
                tp_tightened: false,
                last_momentum_check_at: None,
                last_ai_review_at: None,
                strategy_tag,
                opened_at: now,
            },
        );

        if let Ok(Some(mut signal_row)) = self.signal_repo.find(row.id).await {
            signal_row.entry = Some(fill_price);
            signal_row.sl = Some(row.initial_sl);
            signal_row.tp = Some(row.initial_tp);
            signal_row.order_type = Some(format!("{order_type:?}"));
            signal_row.order_status = if ack.filled {
                crate::domain::review::OrderStatus::Filled
            } else {
                crate::domain::review::OrderStatus::Pending
            };
            signal_row.fill_price = ack.fill_price;
            signal_row.fill_time = ack.filled.then_some(now);
            let _ = self.signal_repo.update(&signal_row).await;
        }

        info!(stage = STAGE, symbol = %row.symbol, order_id = %ack.order_id, "track-1 order placed");
    }

    /// §4.8 sizing: capital-bounded margin times default leverage, snapped to venue amount
    /// precision. Rejection against `venue_min_amount` is the caller's responsibility.
    fn position_size_track1(&self, entry_price: Decimal) -> Decimal {
        if entry_price.is_zero() {
            return Decimal::ZERO;
        }
        let margin = (Decimal::from_f64(self.config.total_capital_usdt).unwrap_or_default()
            * Decimal::from_f64(self.config.max_position_pct).unwrap_or_default())
        .min(Decimal::from_f64(self.config.max_position_usdt).unwrap_or_default())
        .max(Decimal::from_f64(self.config.min_position_usdt).unwrap_or_default());
        let raw_contracts = margin * Decimal::from(self.config.default_leverage) / entry_price;
        raw_contracts.round_dp(self.config.amount_precision)
    }

    /// C6 hard filter + readiness, scoped to symbols that pass the main-track metrics and
    /// the hard-vol band — the wider top-150 universe is out of scope for this pass without
    /// a live discovery feed and is deliberately left to infrastructure to widen.
    async fn high_vol_cycle(&self, symbol: &str, candles: &[crate::domain::market::Candle], metrics: &crate::domain::market::SymbolMetrics) {
        {
            let pool = self.high_vol_pool.read().await;
            if pool.len() >= POOL_CAPACITY || pool.iter().any(|r| r.symbol == symbol) {
                return;
            }
        }
        let facts = HighVolCandidateFacts {
            symbol: symbol.to_string(),
            price: metrics.price,
            change_24h_pct: metrics.change_24h_pct,
            quote_volume_24h: metrics.quote_volume_24h,
            price_change_5m_pct: 0.0,
            volume_ratio_short: metrics.volume_ratio,
            volume_ratio_mid: metrics.volume_ratio,
            near_support_or_resistance: false,
            btc_volatility_extreme_or_high: false,
            correlation_to_btc: 0.0,
            candlestick_breakout_pattern: false,
            rsi: metrics.rsi,
            expected_rsi_direction_up: metrics.rsi < 50.0,
        };
        if let Err(reason) = hard_filter(&facts, candles) {
            info!(stage = STAGE, symbol, reason, "high-vol hard filter rejected");
            return;
        }

        let score = readiness_score(&facts, candles);
        let bundle = crate::domain::indicators::breakout_quality(candles);
        let bb_trend = BbVolumeMomentumTrend::Neutral;
        let precursors = detect_precursors(&facts, candles, bb_trend);
        let id = self.allocate_signal_id().await;

        let mut row = HighVolSignal {
            id,
            symbol: symbol.to_string(),
            side: if metrics.rsi < 50.0 { Side::Long } else { Side::Short },
            signal_price: metrics.price,
            proposed_entry: metrics.price,
            sl: metrics.price,
            tp: metrics.price,
            change_24h_pct: metrics.change_24h_pct,
            quote_volume_24h: metrics.quote_volume_24h,
            atr_pct: metrics.atr_pct,
            readiness_score: score.total,
            readiness_rationale: score.rationale,
            health_score: 100.0,
            peak_readiness_score: score.total,
            bb_trend,
            warning_count: 0,
            cvd_divergence_tag: bundle.cvd.fake_breakout,
            cvd_score: bundle.cvd.strength,
            efficiency_ratio: bundle.efficiency_ratio,
            hurst: bundle.hurst,
            breakout_quality_score: bundle.score,
            fake_breakout: bundle.cvd.fake_breakout,
            status: HighVolStatus::Watching,
            limit_order_id: None,
            filled_at: None,
            current_pnl_fraction: 0.0,
            strategy_tag: "high_volatility".to_string(),
            ai_review_count: 0,
            created_at: Utc::now(),
        };

        if !promote_on_precursor(&mut row, precursors) && row.readiness_score >= READY_THRESHOLD {
            row.status = HighVolStatus::Ready;
        }

        info!(stage = STAGE, symbol, readiness = row.readiness_score, status = ?row.status, "high-vol candidate admitted to pool");
        let _ = self.high_vol_repo.insert(&row).await;
        self.high_vol_pool.write().await.push(row);
    }

    /// C6's own lane into C8: runs every pooled row that reached `ready` through the AI
    /// pricing prompt and atomic order placement, same cadence as the main track's watcher
    /// pass. A fill that lands immediately is promoted straight into `self.positions` so C7
    /// supervises it from the next pass; a resting limit order stays in the pool under
    /// `limit_placed` until it fills or times out.
    async fn run_high_vol_pass(&self) {
        let now = Utc::now();
        let mut fills: Vec<(String, HighVolEntry, Decimal, Decimal, Decimal)> = Vec::new();
        {
            let mut pool = self.high_vol_pool.write().await;
            for row in pool.iter_mut() {
                if row.status != HighVolStatus::Ready {
                    continue;
                }
                let Ok(candles) = self.exchange.fetch_candles(&row.symbol, "5m", 60).await else { continue };
                if candles.is_empty() {
                    continue;
                }
                let atr_pct = crate::domain::indicators::atr_pct(&candles, 14);
                match self.high_vol.on_ready(row, &candles, atr_pct, now).await {
                    Ok(Some(entry)) => {
                        info!(stage = STAGE, symbol = %row.symbol, order_id = %entry.ack.order_id, filled = entry.ack.filled, "high-vol entry placed");
                        if entry.ack.filled {
                            let fill_price = entry.ack.fill_price.unwrap_or(row.proposed_entry);
                            fills.push((row.symbol.clone(), entry, fill_price, row.sl, row.tp));
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(stage = STAGE, symbol = %row.symbol, error = %e, "high-vol pricing/placement failed"),
                }
                let _ = self.high_vol_repo.update(row).await;
            }
            pool.retain(|r| !matches!(r.status, HighVolStatus::Abandoned | HighVolStatus::Expired | HighVolStatus::Filled));
        }

        if !fills.is_empty() {
            let mut positions = self.positions.write().await;
            for (symbol, entry, fill_price, sl, tp) in fills {
                positions.insert(
                    symbol.clone(),
                    PositionRecord {
                        symbol: symbol.clone(),
                        side: entry.side,
                        entry_price: fill_price,
                        contracts: entry.contracts,
                        original_sl: sl,
                        original_tp: tp,
                        current_sl: sl,
                        current_tp: tp,
                        highest_favorable_price: fill_price,
                        highest_pnl_fraction: 0.0,
                        current_tier_index: -1,
                        breakeven_set: false,
                        trailing_activated: false,
                        tp_extended: false,
                        tp_tightened: false,
                        last_momentum_check_at: None,
                        last_ai_review_at: None,
                        strategy_tag: StrategyTag::HighVolatility,
                        opened_at: now,
                    },
                );
                info!(stage = STAGE, symbol, order_id = %entry.ack.order_id, "high-vol entry filled immediately, handed to position supervision");
            }
        }
    }

    /// C7: runs the per-tick algorithm over every live position and handles close events.
    async fn run_position_supervision_pass(&self) {
        let symbols: Vec<String> = self.positions.read().await.keys().cloned().collect();
        for symbol in symbols {
            let Ok(candles) = self.exchange.fetch_candles(&symbol, "5m", 60).await else { continue };
            let Some(last) = candles.last() else { continue };
            let tick = PositionTick {
                price: last.close,
                rsi_5m: crate::domain::indicators::rsi(&candles, 14),
                macd_bull_cross: false,
                macd_bear_cross: false,
                momentum_short_pct: 0.0,
                volume_ratio: 1.0,
                btc_5bar_change_pct: 0.0,
                now: Utc::now(),
            };

            let exit = {
                let mut positions = self.positions.write().await;
                let mut cache = self.algo_cache.lock().await;
                let Some(record) = positions.get_mut(&symbol) else { continue };
                self.position_supervisor.tick(record, &mut cache, &tick).await
            };

            if let Some(exit) = exit {
                self.handle_exit(&symbol, exit).await;
            }
        }
    }

    async fn handle_exit(&self, symbol: &str, exit: ExitEvent) {
        info!(stage = STAGE, symbol, reason = ?exit.reason, pnl_pct = exit.final_pnl_pct, "position closed");
        self.positions.write().await.remove(symbol);
        if let Ok(Some(row)) = self.signal_repo.find_pending_by_symbol(symbol).await.map(|v| v.into_iter().next()) {
            let mut row = row;
            row.exit_price = Some(exit.exit_price);
            row.exit_time = Some(Utc::now());
            row.exit_reason = Some(format!("{:?}", exit.reason));
            row.final_pnl_pct = Some(exit.final_pnl_pct);
            row.order_status = crate::domain::review::OrderStatus::Closed;
            let _ = self.signal_repo.update(&row).await;
        }
        let _ = self.training_repo.record_finalized(symbol, &serde_json::json!({"pnl_pct": exit.final_pnl_pct})).await;
    }
}

fn side_label(side: crate::domain::signals::Side) -> &'static str {
    match side {
        crate::domain::signals::Side::Long => "long",
        crate::domain::signals::Side::Short => "short",
    }
}

fn build_metrics(symbol: &str, candles: &[crate::domain::market::Candle], last: &crate::domain::market::Candle) -> crate::domain::market::SymbolMetrics {
    let (macd_line, macd_signal, macd_hist_prev) = crate::domain::indicators::macd(candles, 12, 26, 9);
    crate::domain::market::SymbolMetrics {
        symbol: symbol.to_string(),
        price: last.close,
        rsi: crate::domain::indicators::rsi(candles, 14),
        adx: crate::domain::indicators::adx(candles, 14),
        volume_ratio: 1.0,
        bb_width_pct: crate::domain::indicators::bollinger_width_pct(candles, 20, 2.0),
        atr_pct: crate::domain::indicators::atr_pct(candles, 14),
        change_24h_pct: 0.0,
        quote_volume_24h: last.volume * last.close,
        funding_rate: 0.0,
        macd_line,
        macd_signal,
        macd_hist_prev,
        orderbook: crate::domain::market::OrderBookSnapshot { bid_depth: rust_decimal::Decimal::ONE, ask_depth: rust_decimal::Decimal::ONE },
    }
}

fn build_trend_facts(candles: &[crate::domain::market::Candle], side_hint: crate::domain::signals::Side) -> TrendFacts {
    let closes: Vec<f64> = candles.iter().map(|c| c.close.to_f64().unwrap_or(0.0)).collect();
    let momentum_5m_pct = percent_change(candles, 1);
    let momentum_15m_pct = percent_change(candles, 3);
    let fdi = crate::domain::indicators::fractal_dimension(candles, 30);
    TrendFacts {
        still_trending: crate::application::detectors::reversal::still_trending(&closes, side_hint),
        momentum_weakening: crate::application::detectors::reversal::momentum_weakening(&closes, side_hint),
        divergence_matches_side: false,
        divergence_strength: 0.0,
        near_support_or_resistance: false,
        fdi,
        bullish_candle_pattern: false,
        startup_breakout: false,
        momentum_5m_pct,
        momentum_15m_pct,
    }
}

fn percent_change(candles: &[crate::domain::market::Candle], bars_back: usize) -> f64 {
    if candles.len() <= bars_back {
        return 0.0;
    }
    let now = candles[candles.len() - 1].close.to_f64().unwrap_or(0.0);
    let then = candles[candles.len() - 1 - bars_back].close.to_f64().unwrap_or(0.0);
    if then == 0.0 {
        return 0.0;
    }
    (now - then) / then * 100.0
}
