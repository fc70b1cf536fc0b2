//! End-to-end scenario tests wiring the pipeline's components together the way the
//! coordinator does per cycle, without the SQLite-backed repositories or the real LLM
//! adapters. Each test plays out one of the scenarios the review/position/high-vol
//! machinery is built to handle.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use perpetual_core::application::dedup::{DedupDecision, Deduplicator};
use perpetual_core::application::high_vol_track::{hard_filter, HighVolCandidateFacts};
use perpetual_core::application::order_executor::{AlgoOrderCache, AlgoOrderCacheEntry, OrderExecutor};
use perpetual_core::application::position_supervisor::{
    ExitReason, PositionSupervisor, PositionSupervisorConfig, PositionTick,
};
use perpetual_core::application::watcher::{timing_gate, LiveSnapshot, TimingDecision, TimingThresholds};
use perpetual_core::domain::adaptive_stops::calculate_adaptive_stops;
use perpetual_core::domain::market::{BtcSnapshot, Candle, OrderBookSnapshot, SymbolMetrics, BtcTrend, VolatilityState};
use perpetual_core::domain::observation::ObservationRow;
use perpetual_core::domain::ports::{ExchangeClient, OrderType, ReviewPrompt, SignalReviewer, VenuePosition};
use perpetual_core::domain::position::{PositionRecord, StrategyTag};
use perpetual_core::domain::review::ReviewResponse;
use perpetual_core::domain::signals::{Candidate, Side, SignalKind};
use perpetual_core::infrastructure::exchange::MockExchangeClient;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

fn candidate(symbol: &str, side: Side, kind: SignalKind, score: f64, rsi: f64, at: chrono::DateTime<Utc>) -> Candidate {
    let metrics = SymbolMetrics {
        symbol: symbol.to_string(),
        price: dec!(100),
        rsi,
        adx: 20.0,
        volume_ratio: 1.0,
        bb_width_pct: 2.0,
        atr_pct: 2.0,
        change_24h_pct: 0.0,
        quote_volume_24h: Decimal::ZERO,
        funding_rate: 0.0,
        macd_line: 0.0,
        macd_signal: 0.0,
        macd_hist_prev: 0.0,
        orderbook: OrderBookSnapshot { bid_depth: dec!(1), ask_depth: dec!(1) },
    };
    let stops = calculate_adaptive_stops(100.0, 2.0, side, VolatilityState::Normal, BtcTrend::Neutral, None);
    Candidate {
        symbol: symbol.to_string(),
        side,
        score,
        detected_price: dec!(100),
        rsi,
        adx: 20.0,
        volume_ratio: 1.0,
        bb_width_pct: 2.0,
        atr_pct: 2.0,
        kind,
        stops,
        momentum_5m_pct: 0.0,
        momentum_15m_pct: 0.0,
        metrics,
        btc_snapshot: BtcSnapshot::unknown(),
        detected_at: at,
    }
}

/// Canned reviewer: parses nothing, always hands back an unrecognised action so every
/// call site that consumes its `reasoning` no-ops instead of mutating position state.
struct NoOpReviewer;
#[async_trait]
impl SignalReviewer for NoOpReviewer {
    async fn review(&self, _prompt: ReviewPrompt) -> anyhow::Result<ReviewResponse> {
        Ok(ReviewResponse { approved: true, confidence: 0.5, side: Side::Long, reasoning: r#"{"action":"hold"}"#.to_string() })
    }
    fn name(&self) -> &'static str {
        "noop"
    }
}

fn sol_long_position() -> PositionRecord {
    PositionRecord {
        symbol: "SOL/USDT:USDT".into(),
        side: Side::Long,
        entry_price: dec!(200),
        contracts: dec!(1),
        original_sl: dec!(193.2),
        original_tp: dec!(210.8),
        current_sl: dec!(193.2),
        current_tp: dec!(210.8),
        highest_favorable_price: dec!(200),
        highest_pnl_fraction: 0.0,
        current_tier_index: -1,
        breakeven_set: false,
        trailing_activated: false,
        tp_extended: false,
        tp_tightened: false,
        last_momentum_check_at: None,
        last_ai_review_at: None,
        strategy_tag: StrategyTag::Reversal,
        opened_at: Utc::now(),
    }
}

fn neutral_tick(price: Decimal, rsi_5m: f64, now: chrono::DateTime<Utc>) -> PositionTick {
    PositionTick {
        price,
        rsi_5m,
        macd_bull_cross: false,
        macd_bear_cross: false,
        momentum_short_pct: 0.0,
        volume_ratio: 1.0,
        btc_5bar_change_pct: 0.0,
        now,
    }
}

/// Scenario 1: accepted reversal long climbs the tiered trailing stop as price runs in its
/// favor, then closes on a reversal exit once RSI goes extreme (the venue-side take-profit
/// order is outside this code; the supervisor's own exit path is the reversal detector).
#[tokio::test]
async fn reversal_long_climbs_tiers_then_exits_on_reversal() {
    let exchange: Arc<dyn ExchangeClient> = Arc::new(MockExchangeClient::new());
    let executor = Arc::new(OrderExecutor::new(exchange.clone()));
    let supervisor = PositionSupervisor::new(exchange, executor, Arc::new(NoOpReviewer), PositionSupervisorConfig::default());

    let mut record = sol_long_position();
    let mut cache = AlgoOrderCache::default();
    let base = Utc::now();

    let exit = supervisor.tick(&mut record, &mut cache, &neutral_tick(dec!(200.8), 50.0, base)).await;
    assert!(exit.is_none());
    assert_eq!(record.current_tier_index, 0);
    assert!(record.current_sl >= dec!(200) * dec!(1.001));

    let exit = supervisor
        .tick(&mut record, &mut cache, &neutral_tick(dec!(202), 50.0, base + ChronoDuration::minutes(2)))
        .await;
    assert!(exit.is_none());
    assert_eq!(record.current_tier_index, 1);
    assert!(record.current_sl >= dec!(200) * dec!(1.003));

    let exit = supervisor
        .tick(&mut record, &mut cache, &neutral_tick(dec!(204), 50.0, base + ChronoDuration::minutes(4)))
        .await;
    assert!(exit.is_none());
    assert_eq!(record.current_tier_index, 2);
    assert!(record.current_sl >= dec!(200) * dec!(1.012));

    let exit = supervisor
        .tick(&mut record, &mut cache, &neutral_tick(dec!(206), 50.0, base + ChronoDuration::minutes(6)))
        .await;
    assert!(exit.is_none());
    assert_eq!(record.current_tier_index, 3);
    assert!(record.current_sl >= dec!(200) * dec!(1.022));

    let exit = supervisor
        .tick(&mut record, &mut cache, &neutral_tick(dec!(210), 76.0, base + ChronoDuration::minutes(8)))
        .await
        .expect("extreme RSI should close the position");
    assert_eq!(exit.reason, ExitReason::ReversalExit);
    assert!(exit.final_pnl_pct >= 4.5);
}

/// Scenario 2: two identical reversal longs on the same symbol within the cooldown window;
/// the second is suppressed as a plain duplicate.
#[tokio::test]
async fn duplicate_reversal_signal_within_cooldown_is_suppressed() {
    let mut dedup = Deduplicator::new(10);
    let now = Utc::now();
    let first = candidate("ETH/USDT:USDT", Side::Long, SignalKind::Reversal, 0.80, 18.0, now);
    assert_eq!(dedup.evaluate(&first), DedupDecision::Admit);

    let second = candidate("ETH/USDT:USDT", Side::Long, SignalKind::Reversal, 0.80, 18.0, now + ChronoDuration::minutes(4));
    assert_eq!(dedup.evaluate(&second), DedupDecision::SuppressDuplicate);
}

/// Scenario 3: an approved opposite-side signal closes the existing position (cancelling
/// its algo orders, market-closing with `reduce_only`) before a fresh OCO is placed.
#[tokio::test]
async fn opposite_side_signal_closes_existing_position_first() {
    let mock = MockExchangeClient::new();
    mock.push_position(VenuePosition {
        symbol: "BTC/USDT:USDT".to_string(),
        side: Side::Long,
        entry_price: dec!(60000),
        contracts: dec!(0.01),
    })
    .await;
    let exchange: Arc<dyn ExchangeClient> = Arc::new(mock);
    let executor = OrderExecutor::new(exchange);

    let mut cache = AlgoOrderCache::default();
    cache.set("BTC/USDT:USDT", AlgoOrderCacheEntry { sl_id: Some("sl-old".into()), tp_id: Some("tp-old".into()) });

    let closed = executor.close_opposite_if_present(&mut cache, "BTC/USDT:USDT", Side::Short).await.unwrap();
    assert!(closed, "opposite-side position should have been closed");
    assert!(cache.get("BTC/USDT:USDT").is_none(), "stale algo ids must be cleared before the new entry");

    let ack = executor
        .create_order_with_sl_tp(&mut cache, "BTC/USDT:USDT", Side::Short, OrderType::Market, dec!(0.01), None, dec!(61200), dec!(57000))
        .await
        .unwrap();
    assert!(ack.filled);
    assert!(cache.get("BTC/USDT:USDT").unwrap().sl_id.is_some());
}

/// Scenario 4: after a restart the in-memory position map has no record of a live venue
/// position. Reconciliation synthesises one with the conservative default stops, and the
/// next supervisor tick (cache still empty) recreates and re-syncs the algo order cache.
#[tokio::test]
async fn restart_reconciliation_synthesises_record_and_resyncs_cache() {
    let exchange: Arc<dyn ExchangeClient> = Arc::new(MockExchangeClient::new());
    let executor = Arc::new(OrderExecutor::new(exchange.clone()));
    let supervisor = PositionSupervisor::new(exchange, executor, Arc::new(NoOpReviewer), PositionSupervisorConfig::default());

    let mut record = supervisor.reconcile_unknown_position(
        "PEPE/USDT:USDT",
        Side::Long,
        dec!(0.000018),
        dec!(5_000_000),
        None,
        None,
        Utc::now(),
    );
    assert_eq!(record.strategy_tag, StrategyTag::Synced);
    assert_eq!(record.current_tier_index, -1);
    assert!(record.current_sl < record.entry_price);
    assert!(record.current_tp > record.entry_price);

    let mut cache = AlgoOrderCache::default();
    assert!(cache.get(&record.symbol).is_none(), "no cached SL id survives a restart");

    let exit = supervisor.tick(&mut record, &mut cache, &neutral_tick(record.entry_price, 50.0, Utc::now())).await;
    assert!(exit.is_none());
    assert!(cache.get(&record.symbol).and_then(|e| e.sl_id.as_ref()).is_some(), "cache should be re-synced after the tick");
}

/// Scenario 5: a trend-anticipation long approved earlier gets abandoned once the
/// underlying price move turns far enough against the position for the hard-rules timing
/// gate to trip, before any order is placed.
#[tokio::test]
async fn watcher_abandons_trend_anticipation_on_adverse_move() {
    let now = Utc::now();
    let candidate = candidate("LINK/USDT:USDT", Side::Long, SignalKind::TrendAnticipation, 0.7, 22.0, now);
    let mut row = ObservationRow::from_candidate(1, &candidate, now).expect("candidate should serialize");
    assert_eq!(row.status, perpetual_core::domain::observation::ObservationStatus::Watching);

    let live = LiveSnapshot {
        price: 98.3,
        rsi: 40.0,
        volume_ratio: 1.0,
        atr_pct: 2.0,
        adx: 20.0,
        macd_bull_cross: false,
        macd_bear_cross: false,
        orderbook_bid_share: 0.5,
        btc_5bar_trend_pct: -1.4,
    };

    let decision = timing_gate(&row, &live, TimingThresholds::default());
    assert_eq!(decision, TimingDecision::Abandon);

    row.status = perpetual_core::domain::observation::ObservationStatus::Abandoned;
    assert!(row.status.is_terminal());
}

/// Scenario 6: a high-vol candidate that looks like a breakout on price alone gets
/// rejected by the hard filter once cumulative-volume-delta divergence flags it as fake.
#[tokio::test]
async fn high_vol_fake_breakout_is_rejected_by_hard_filter() {
    let mut candles = Vec::new();
    for i in 0..25i64 {
        let px = Decimal::from(100 + i);
        candles.push(Candle {
            timestamp: Utc::now(),
            open: px,
            high: px,
            low: px - dec!(1),
            close: px - dec!(1),
            volume: dec!(50),
        });
    }

    let facts = HighVolCandidateFacts {
        symbol: "DOGE/USDT:USDT".to_string(),
        price: dec!(0.18),
        change_24h_pct: 12.0,
        quote_volume_24h: dec!(8_000_000),
        price_change_5m_pct: 1.0,
        volume_ratio_short: 1.5,
        volume_ratio_mid: 1.3,
        near_support_or_resistance: false,
        btc_volatility_extreme_or_high: false,
        correlation_to_btc: 0.3,
        candlestick_breakout_pattern: true,
        rsi: 62.0,
        expected_rsi_direction_up: true,
    };

    let result = hard_filter(&facts, &candles);
    let err = result.expect_err("CVD divergence should flag this as a fake breakout");
    assert!(err.to_lowercase().contains("fake breakout"), "unexpected rejection reason: {err}");
}
