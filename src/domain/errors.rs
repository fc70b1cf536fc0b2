use thiserror::Error;

/// Unified error taxonomy for the signal pipeline and position lifecycle.
///
/// Every component classifies its own failures into one of these variants rather
/// than letting a raw transport/db error bubble to the cycle loop. The cycle loop
/// matches on this enum once per step (see `application::coordinator::run_cycle`)
/// instead of each component having its own propagation policy.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Network timeout, disconnect, 5xx, rate-limited. Caller retries with backoff.
    #[error("transport retryable ({stage}): {reason}")]
    TransportRetryable { stage: &'static str, reason: String },

    /// Auth failure, malformed credentials, 4xx on write. Not retried within the cycle.
    #[error("transport fatal ({stage}): {reason}")]
    TransportFatal { stage: &'static str, reason: String },

    /// Amount below lot size, unsupported/delivery symbol.
    #[error("venue minimum violated for {symbol}: {reason}")]
    VenueMinimum { symbol: String, reason: String },

    /// Hard-rule failure, dedup suppression, BTC gate.
    #[error("rule reject ({rule}): {reason}")]
    RuleReject { rule: String, reason: String },

    /// Both LLM reviewers failed or returned unparseable JSON.
    #[error("AI unavailable: {reason}")]
    AiUnavailable { reason: String },

    /// Missing SL on a live position, a stale cached id, an unexpected opposite position.
    #[error("state inconsistency for {symbol}: {reason}")]
    StateInconsistency { symbol: String, reason: String },

    /// A monotonicity invariant would be violated (SL reversal, tier regression).
    #[error("invariant violation: {reason}")]
    InvariantViolation { reason: String },
}

impl CoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::TransportRetryable { .. })
    }

    pub fn stage(&self) -> &str {
        match self {
            CoreError::TransportRetryable { stage, .. } => stage,
            CoreError::TransportFatal { stage, .. } => stage,
            CoreError::VenueMinimum { .. } => "order_executor",
            CoreError::RuleReject { .. } => "ai_reviewer",
            CoreError::AiUnavailable { .. } => "ai_reviewer",
            CoreError::StateInconsistency { .. } => "position_supervisor",
            CoreError::InvariantViolation { .. } => "position_supervisor",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_retryable_is_retryable() {
        let err = CoreError::TransportRetryable {
            stage: "market_cache",
            reason: "timeout".into(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn rule_reject_is_not_retryable() {
        let err = CoreError::RuleReject {
            rule: "rsi_reversal_long".into(),
            reason: "rsi 32 above max 25".into(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn messages_carry_context() {
        let err = CoreError::StateInconsistency {
            symbol: "BTC/USDT:USDT".into(),
            reason: "missing cached SL id".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("BTC/USDT:USDT"));
        assert!(msg.contains("missing cached SL id"));
    }
}
