use serde::Deserialize;

/// `config["capital"]`: how much of the account auto-trading is allowed to touch.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CapitalConfig {
    pub total_usdt: f64,
    pub max_position_pct: f64,
    pub min_position_usdt: f64,
    pub max_position_usdt: f64,
    pub reserve_pct: f64,
}

impl Default for CapitalConfig {
    fn default() -> Self {
        Self {
            total_usdt: 50.0,
            max_position_pct: 0.2,
            min_position_usdt: 10.0,
            max_position_usdt: 500.0,
            reserve_pct: 0.1,
        }
    }
}

/// `config["risk"]`: leverage and stop-loss posture shared by the position supervisor and
/// order executor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub max_positions: usize,
    pub max_leverage: u32,
    pub default_leverage: u32,
    pub force_stop_loss: bool,
    pub sl_slippage_buffer: f64,
    pub sl_must_succeed: bool,
    pub emergency_sl_pct: f64,
    pub sl_verify_interval_sec: i64,
    pub position_check_interval_sec: i64,
    pub default_sl_pct: f64,
    pub default_tp_pct: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_positions: 3,
            max_leverage: 10,
            default_leverage: 5,
            force_stop_loss: true,
            sl_slippage_buffer: 0.002,
            sl_must_succeed: true,
            emergency_sl_pct: 0.06,
            sl_verify_interval_sec: 60,
            position_check_interval_sec: 60,
            default_sl_pct: 0.02,
            default_tp_pct: 0.04,
        }
    }
}

/// `config["entry"]`: how aggressively to chase a fill once a signal is approved.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EntryConfig {
    pub use_immediate_price: bool,
    pub max_slippage: f64,
    pub retry_times: u32,
    pub retry_delay_sec: u64,
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self { use_immediate_price: true, max_slippage: 0.003, retry_times: 3, retry_delay_sec: 2 }
    }
}

/// `config["exit"]`: whether take-profit/stop-loss targets come from the reviewer or the
/// fixed `default_sl_pct`/`default_tp_pct` fallback.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExitConfig {
    pub use_ai_targets: bool,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self { use_ai_targets: true }
    }
}

/// `config["safety"]`: circuit breakers independent of any individual signal's risk.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub require_signal_approval: bool,
    pub check_balance_before_trade: bool,
    pub max_daily_trades: u32,
    pub max_daily_loss_pct: f64,
    pub emergency_stop_loss_pct: f64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            require_signal_approval: true,
            check_balance_before_trade: true,
            max_daily_trades: 20,
            max_daily_loss_pct: 0.1,
            emergency_stop_loss_pct: 0.15,
        }
    }
}
