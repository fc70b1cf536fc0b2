//! Deterministic in-memory `ExchangeClient`, mirroring the teacher's
//! `infrastructure::mock` (`MockMarketDataService`/`MockExecutionService`) collapsed into
//! the single venue trait this system uses. Positions and order acks are stored in
//! `RwLock`-guarded maps so it can be shared across coordinator test fixtures via `Arc`.

use crate::domain::market::{BtcSnapshot, Candle, OrderBookSnapshot};
use crate::domain::ports::{
    AlgoOrderAck, AlgoOrderRequest, ExchangeClient, OrderAck, OrderRequest, VenuePosition,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

/// Canned state for a `MockExchangeClient`: fixed candle series per symbol, a fixed
/// order book, and a BTC snapshot, so detector/coordinator tests get reproducible input.
pub struct MockExchangeClient {
    candles: RwLock<HashMap<String, Vec<Candle>>>,
    orderbook: RwLock<OrderBookSnapshot>,
    funding_rates: RwLock<HashMap<String, f64>>,
    btc_snapshot: RwLock<BtcSnapshot>,
    positions: RwLock<Vec<VenuePosition>>,
    balance: RwLock<Decimal>,
    next_order_id: AtomicI64,
}

impl MockExchangeClient {
    pub fn new() -> Self {
        Self {
            candles: RwLock::new(HashMap::new()),
            orderbook: RwLock::new(OrderBookSnapshot { bid_depth: dec!(100), ask_depth: dec!(100) }),
            funding_rates: RwLock::new(HashMap::new()),
            btc_snapshot: RwLock::new(BtcSnapshot::unknown()),
            positions: RwLock::new(Vec::new()),
            balance: RwLock::new(dec!(1000)),
            next_order_id: AtomicI64::new(1),
        }
    }

    pub async fn set_candles(&self, symbol: &str, candles: Vec<Candle>) {
        self.candles.write().await.insert(symbol.to_string(), candles);
    }

    pub async fn set_btc_snapshot(&self, snapshot: BtcSnapshot) {
        *self.btc_snapshot.write().await = snapshot;
    }

    pub async fn set_funding_rate(&self, symbol: &str, rate: f64) {
        self.funding_rates.write().await.insert(symbol.to_string(), rate);
    }

    pub async fn push_position(&self, position: VenuePosition) {
        self.positions.write().await.push(position);
    }
}

impl Default for MockExchangeClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Synthesises a flat, slightly-trending candle series when no fixture was loaded, so
/// detector unit tests can exercise `fetch_candles` without wiring a fixture every time.
fn synthetic_candles(limit: usize) -> Vec<Candle> {
    let now = Utc::now();
    let mut price = dec!(100);
    (0..limit)
        .map(|i| {
            let timestamp = now - Duration::minutes((limit - i) as i64);
            let open = price;
            price += dec!(0.01);
            Candle { timestamp, open, high: price, low: open, close: price, volume: dec!(1000) }
        })
        .collect()
}

#[async_trait]
impl ExchangeClient for MockExchangeClient {
    async fn fetch_candles(&self, symbol: &str, _timeframe: &str, limit: usize) -> Result<Vec<Candle>> {
        let candles = self.candles.read().await;
        match candles.get(symbol) {
            Some(rows) => Ok(rows.iter().rev().take(limit).rev().copied().collect()),
            None => Ok(synthetic_candles(limit)),
        }
    }

    async fn fetch_orderbook(&self, _symbol: &str, _depth: usize) -> Result<OrderBookSnapshot> {
        Ok(*self.orderbook.read().await)
    }

    async fn fetch_funding_rate(&self, symbol: &str) -> Result<f64> {
        Ok(self.funding_rates.read().await.get(symbol).copied().unwrap_or(0.0))
    }

    async fn fetch_funding_rates_bulk(&self, symbols: &[String]) -> Result<HashMap<String, f64>> {
        let rates = self.funding_rates.read().await;
        Ok(symbols.iter().map(|s| (s.clone(), rates.get(s).copied().unwrap_or(0.0))).collect())
    }

    async fn fetch_btc_snapshot(&self) -> Result<BtcSnapshot> {
        Ok(self.btc_snapshot.read().await.clone())
    }

    async fn create_order(&self, req: OrderRequest) -> Result<OrderAck> {
        let id = self.next_order_id.fetch_add(1, Ordering::Relaxed);
        Ok(OrderAck { order_id: id.to_string(), filled: true, fill_price: req.price })
    }

    async fn create_algo_order(&self, _req: AlgoOrderRequest) -> Result<AlgoOrderAck> {
        let sl_id = self.next_order_id.fetch_add(1, Ordering::Relaxed);
        let tp_id = self.next_order_id.fetch_add(1, Ordering::Relaxed);
        Ok(AlgoOrderAck { sl_id: Some(sl_id.to_string()), tp_id: Some(tp_id.to_string()) })
    }

    async fn cancel_order(&self, _symbol: &str, _order_id: &str) -> Result<()> {
        Ok(())
    }

    async fn cancel_algo(&self, _ids: &[(String, String)]) -> Result<()> {
        Ok(())
    }

    async fn fetch_positions(&self) -> Result<Vec<VenuePosition>> {
        Ok(self.positions.read().await.clone())
    }

    async fn fetch_order(&self, _symbol: &str, order_id: &str) -> Result<OrderAck> {
        Ok(OrderAck { order_id: order_id.to_string(), filled: true, fill_price: None })
    }

    async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> Result<()> {
        Ok(())
    }

    async fn fetch_balance(&self) -> Result<Decimal> {
        Ok(*self.balance.read().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_candles_falls_back_to_synthetic_series() {
        let mock = MockExchangeClient::new();
        let candles = mock.fetch_candles("BTC/USDT:USDT", "1m", 50).await.unwrap();
        assert_eq!(candles.len(), 50);
    }

    #[tokio::test]
    async fn fetch_candles_uses_loaded_fixture() {
        let mock = MockExchangeClient::new();
        let fixture = synthetic_candles(10);
        mock.set_candles("ETH/USDT:USDT", fixture.clone()).await;
        let candles = mock.fetch_candles("ETH/USDT:USDT", "1m", 10).await.unwrap();
        assert_eq!(candles, fixture);
    }

    #[tokio::test]
    async fn create_order_fills_immediately_with_incrementing_ids() {
        let mock = MockExchangeClient::new();
        let req = OrderRequest {
            symbol: "BTC/USDT:USDT".to_string(),
            side: crate::domain::signals::Side::Long,
            order_type: crate::domain::ports::OrderType::Market,
            amount: dec!(1),
            price: Some(dec!(100)),
            reduce_only: false,
        };
        let ack1 = mock.create_order(req.clone()).await.unwrap();
        let ack2 = mock.create_order(req).await.unwrap();
        assert!(ack1.filled);
        assert_ne!(ack1.order_id, ack2.order_id);
    }
}
