//! Port traits the application layer depends on and infrastructure adapters implement.
//! Mirrors the teacher's `MarketDataService`/`ExecutionService` port-trait pattern, expanded
//! to the venue/LLM/notifier surface this system needs (§6).

use crate::domain::market::{BtcSnapshot, Candle, OrderBookSnapshot};
use crate::domain::review::ReviewResponse;
use crate::domain::signals::Side;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub amount: Decimal,
    pub price: Option<Decimal>,
    pub reduce_only: bool,
}

#[derive(Debug, Clone)]
pub struct OrderAck {
    pub order_id: String,
    pub filled: bool,
    pub fill_price: Option<Decimal>,
}

/// SL+TP as one atomic algo order (OCO) or a single-leg conditional when only one leg
/// is requested (`update_stop_loss` step 3, §4.8).
#[derive(Debug, Clone)]
pub struct AlgoOrderRequest {
    pub symbol: String,
    pub side: Side,
    pub sl_trigger: Option<Decimal>,
    pub tp_trigger: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct AlgoOrderAck {
    pub sl_id: Option<String>,
    pub tp_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VenuePosition {
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub contracts: Decimal,
}

/// One venue abstraction covering both market-data reads and order writes, mirroring the
/// teacher's split `MarketDataService`/`ExecutionService` collapsed into a single trait since
/// this system only ever talks to one perpetual-futures venue at a time.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn fetch_candles(&self, symbol: &str, timeframe: &str, limit: usize) -> Result<Vec<Candle>>;
    async fn fetch_orderbook(&self, symbol: &str, depth: usize) -> Result<OrderBookSnapshot>;
    async fn fetch_funding_rate(&self, symbol: &str) -> Result<f64>;
    async fn fetch_funding_rates_bulk(&self, symbols: &[String]) -> Result<HashMap<String, f64>>;
    async fn fetch_btc_snapshot(&self) -> Result<BtcSnapshot>;

    async fn create_order(&self, req: OrderRequest) -> Result<OrderAck>;
    async fn create_algo_order(&self, req: AlgoOrderRequest) -> Result<AlgoOrderAck>;
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()>;
    async fn cancel_algo(&self, ids: &[(String, String)]) -> Result<()>;
    async fn fetch_positions(&self) -> Result<Vec<VenuePosition>>;
    async fn fetch_order(&self, symbol: &str, order_id: &str) -> Result<OrderAck>;
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()>;
    async fn fetch_balance(&self) -> Result<Decimal>;
}

/// One LLM prompt kind per component that talks to the reviewer, so the prompt builder is
/// exhaustively matched rather than branching on a free-form string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Reversal,
    TrendAnticipation,
    HighVol,
    PositionReview,
    Pricing,
}

#[derive(Debug, Clone)]
pub struct ReviewPrompt {
    pub kind: PromptKind,
    pub body: String,
}

/// One JSON-only LLM endpoint. `cheap`/`premium` adapters both implement this; the
/// fallback combinator (`application::review::llm`) composes two instances of it.
#[async_trait]
pub trait SignalReviewer: Send + Sync {
    async fn review(&self, prompt: ReviewPrompt) -> Result<ReviewResponse>;
    fn name(&self) -> &'static str;
}

/// Telegram-style `(title, lines)` notification, silent no-op if unconfigured.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, lines: &[String]) -> Result<()>;
}
