//! C4.1 hard-rule gate. Generalizes the teacher's
//! `domain::risk::filters::validator_trait::RiskValidator` idiom (`name()`/`validate()`/
//! `is_enabled()`/`priority()`) into a synchronous pure predicate over `ReviewContext`,
//! matching the shape of a rule engine: rules are pure, ordered, individually toggleable,
//! and classified block/warn rather than raising.

use crate::domain::review::{HardRuleReport, ReviewContext, RuleOutcome, Severity};
use crate::domain::signals::Side;

pub struct HardRule {
    pub name: &'static str,
    pub severity: Severity,
    check: Box<dyn Fn(&ReviewContext, &HardRuleConfig) -> RuleOutcome + Send + Sync>,
}

impl HardRule {
    fn new(
        name: &'static str,
        severity: Severity,
        check: impl Fn(&ReviewContext, &HardRuleConfig) -> RuleOutcome + Send + Sync + 'static,
    ) -> Self {
        Self { name, severity, check: Box::new(check) }
    }

    fn evaluate(&self, ctx: &ReviewContext, cfg: &HardRuleConfig) -> RuleOutcome {
        (self.check)(ctx, cfg)
    }
}

/// Thresholds read once from `TradingConfig`, passed by reference into every rule check so
/// no rule captures a config snapshot of its own.
#[derive(Debug, Clone)]
pub struct HardRuleConfig {
    pub rsi_long_max: f64,
    pub rsi_short_min: f64,
    pub rsi_extreme_long: f64,
    pub rsi_extreme_short: f64,
    pub min_volume_ratio: f64,
    pub min_score: f64,
    pub max_price_change_extreme_pct: f64,
    pub max_price_change_high_pct: f64,
    pub price_change_high_min_score: f64,
    pub bb_squeeze_threshold_pct: f64,
    pub bb_squeeze_vol_min: f64,
    pub min_adx_with_low_vol: f64,
    pub adx_trend_end_threshold: f64,
    pub max_funding_rate: f64,
    pub min_orderbook_score: f64,
    pub require_macd_confirm: bool,
    pub sl_atr_multiple: f64,
    pub max_slippage_of_sl_fraction: f64,
    pub disabled_rules: Vec<String>,
}

impl Default for HardRuleConfig {
    fn default() -> Self {
        Self {
            rsi_long_max: 25.0,
            rsi_short_min: 75.0,
            rsi_extreme_long: 20.0,
            rsi_extreme_short: 80.0,
            min_volume_ratio: 1.2,
            min_score: 0.55,
            max_price_change_extreme_pct: 80.0,
            max_price_change_high_pct: 50.0,
            price_change_high_min_score: 0.86,
            bb_squeeze_threshold_pct: 1.0,
            bb_squeeze_vol_min: 1.5,
            min_adx_with_low_vol: 18.0,
            adx_trend_end_threshold: 40.0,
            max_funding_rate: 0.0008,
            min_orderbook_score: 0.40,
            require_macd_confirm: true,
            sl_atr_multiple: 1.5,
            max_slippage_of_sl_fraction: 0.6,
            disabled_rules: Vec::new(),
        }
    }
}

pub struct HardRulesEngine {
    rules: Vec<HardRule>,
    config: HardRuleConfig,
}

impl HardRulesEngine {
    pub fn new(config: HardRuleConfig) -> Self {
        Self { rules: build_rules(), config }
    }

    /// Name + enabled flag for every rule, in evaluation order, so behaviour can be
    /// inspected and toggled by name without a code edit (mirrors `hard_rules_engine.py`'s
    /// `list_rules`).
    pub fn list_rules(&self) -> Vec<(&'static str, bool)> {
        self.rules.iter().map(|r| (r.name, !self.config.disabled_rules.iter().any(|d| d == r.name))).collect()
    }

    pub fn enable_rule(&mut self, name: &str) {
        self.config.disabled_rules.retain(|d| d != name);
    }

    pub fn disable_rule(&mut self, name: &str) {
        if !self.config.disabled_rules.iter().any(|d| d == name) {
            self.config.disabled_rules.push(name.to_string());
        }
    }

    /// Runs every enabled rule in order. Stops at the first blocking miss (matching the
    /// source engine's short-circuit evaluate loop); warn misses accumulate and never stop
    /// the scan.
    pub fn evaluate(&self, ctx: &ReviewContext) -> HardRuleReport {
        let mut report = HardRuleReport::default();

        for rule in &self.rules {
            if self.config.disabled_rules.iter().any(|d| d == rule.name) {
                continue;
            }
            match rule.evaluate(ctx, &self.config) {
                RuleOutcome::Pass => {}
                RuleOutcome::Miss { reason } => match rule.severity {
                    Severity::Warn => report.warnings.push((rule.name.to_string(), reason)),
                    Severity::Block => {
                        report.blocked_by = Some((rule.name.to_string(), reason));
                        return report;
                    }
                },
            }
        }

        report
    }
}

fn pass() -> RuleOutcome {
    RuleOutcome::Pass
}

fn miss(reason: impl Into<String>) -> RuleOutcome {
    RuleOutcome::Miss { reason: reason.into() }
}

fn build_rules() -> Vec<HardRule> {
    vec![
        HardRule::new("rsi_reversal_long", Severity::Block, |ctx, cfg| {
            if ctx.side != Side::Long || ctx.rsi <= cfg.rsi_long_max {
                pass()
            } else {
                miss(format!("RSI={:.1} above {:.1}, long needs oversold", ctx.rsi, cfg.rsi_long_max))
            }
        }),
        HardRule::new("rsi_reversal_short", Severity::Block, |ctx, cfg| {
            if ctx.side != Side::Short || ctx.rsi >= cfg.rsi_short_min {
                pass()
            } else {
                miss(format!("RSI={:.1} below {:.1}, short needs overbought", ctx.rsi, cfg.rsi_short_min))
            }
        }),
        HardRule::new("min_score", Severity::Block, |ctx, cfg| {
            if ctx.score >= cfg.min_score {
                pass()
            } else {
                miss(format!("score {:.2} below minimum {:.2}", ctx.score, cfg.min_score))
            }
        }),
        HardRule::new("min_volume", Severity::Block, |ctx, cfg| {
            if ctx.volume_ratio >= cfg.min_volume_ratio {
                pass()
            } else {
                miss(format!("volume ratio {:.1}x below minimum {:.1}x", ctx.volume_ratio, cfg.min_volume_ratio))
            }
        }),
        HardRule::new("extreme_price_change", Severity::Block, |ctx, cfg| {
            if ctx.change_24h_pct.abs() <= cfg.max_price_change_extreme_pct {
                pass()
            } else {
                miss(format!("24h change {:+.1}% exceeds extreme threshold {:.0}%", ctx.change_24h_pct, cfg.max_price_change_extreme_pct))
            }
        }),
        HardRule::new("high_price_change_score", Severity::Block, |ctx, cfg| {
            if ctx.change_24h_pct.abs() <= cfg.max_price_change_high_pct || ctx.score >= cfg.price_change_high_min_score {
                pass()
            } else {
                miss(format!(
                    "24h change {:+.1}% is high, needs score >= {:.2} (have {:.2})",
                    ctx.change_24h_pct, cfg.price_change_high_min_score, ctx.score
                ))
            }
        }),
        HardRule::new("bb_squeeze", Severity::Block, |ctx, cfg| {
            if ctx.bb_width_pct > cfg.bb_squeeze_threshold_pct || ctx.volume_ratio >= cfg.bb_squeeze_vol_min {
                pass()
            } else {
                miss(format!(
                    "bollinger squeeze ({:.3}% < {:.3}%) with insufficient volume ({:.1}x < {:.1}x)",
                    ctx.bb_width_pct, cfg.bb_squeeze_threshold_pct, ctx.volume_ratio, cfg.bb_squeeze_vol_min
                ))
            }
        }),
        HardRule::new("adx_dead_zone", Severity::Block, |ctx, cfg| {
            if ctx.adx >= cfg.min_adx_with_low_vol || ctx.volume_ratio >= 1.5 {
                pass()
            } else {
                miss(format!("ADX dead zone ({:.1} < {:.1}) with low volume", ctx.adx, cfg.min_adx_with_low_vol))
            }
        }),
        HardRule::new("adx_trend_end", Severity::Block, |ctx, cfg| {
            if ctx.adx < cfg.adx_trend_end_threshold || ctx.bb_width_pct > 2.0 || ctx.volume_ratio >= 1.0 {
                pass()
            } else {
                miss(format!("ADX extremely high ({:.1} >= {:.1}), possible trend exhaustion", ctx.adx, cfg.adx_trend_end_threshold))
            }
        }),
        HardRule::new("funding_rate", Severity::Block, |ctx, cfg| {
            if ctx.funding_rate.abs() <= cfg.max_funding_rate {
                pass()
            } else {
                miss(format!("funding rate {:.4} exceeds maximum {:.4}", ctx.funding_rate, cfg.max_funding_rate))
            }
        }),
        HardRule::new("funding_direction_long", Severity::Warn, |ctx, _cfg| {
            if ctx.side != Side::Long || ctx.funding_rate <= 0.0003 {
                pass()
            } else {
                miss(format!("long against positive funding ({:.4}), will pay the fee", ctx.funding_rate))
            }
        }),
        HardRule::new("funding_direction_short", Severity::Warn, |ctx, _cfg| {
            if ctx.side != Side::Short || ctx.funding_rate >= -0.0003 {
                pass()
            } else {
                miss(format!("short against negative funding ({:.4}), will pay the fee", ctx.funding_rate))
            }
        }),
        HardRule::new("orderbook_depth", Severity::Block, |ctx, cfg| {
            if ctx.orderbook_depth_score >= cfg.min_orderbook_score {
                pass()
            } else {
                miss(format!("orderbook depth score {:.2} below minimum {:.2}", ctx.orderbook_depth_score, cfg.min_orderbook_score))
            }
        }),
        HardRule::new("macd_confirm_long", Severity::Block, |ctx, cfg| {
            if !cfg.require_macd_confirm
                || ctx.side != Side::Long
                || ctx.macd_bull_cross
                || (ctx.divergence_matches_side && ctx.divergence_strength > 0.3)
                || (ctx.rsi <= cfg.rsi_extreme_long && ctx.volume_ratio >= 3.0)
            {
                pass()
            } else {
                miss("long missing MACD confirmation (needs golden cross, divergence, or extreme RSI + volume spike)")
            }
        }),
        HardRule::new("macd_confirm_short", Severity::Block, |ctx, cfg| {
            if !cfg.require_macd_confirm
                || ctx.side != Side::Short
                || ctx.macd_bear_cross
                || (ctx.divergence_matches_side && ctx.divergence_strength > 0.3)
                || (ctx.rsi >= cfg.rsi_extreme_short && ctx.volume_ratio >= 3.0)
            {
                pass()
            } else {
                miss("short missing MACD confirmation (needs death cross, divergence, or extreme RSI + volume spike)")
            }
        }),
        HardRule::new("sl_vs_atr_sanity", Severity::Block, |ctx, cfg| {
            let required = cfg.sl_atr_multiple * ctx.atr_pct;
            if ctx.atr_pct <= 0.0 || ctx.sl_pct >= required {
                pass()
            } else {
                miss(format!(
                    "SL {:.2}% below {:.1}x ATR% ({:.2}%), stop too tight for current volatility",
                    ctx.sl_pct, cfg.sl_atr_multiple, required
                ))
            }
        }),
        HardRule::new("slippage_vs_sl", Severity::Block, |ctx, cfg| {
            let cap = cfg.max_slippage_of_sl_fraction * ctx.sl_pct;
            if ctx.estimated_slippage_pct <= cap {
                pass()
            } else {
                miss(format!(
                    "estimated slippage {:.2}% exceeds {:.0}% of SL ({:.2}%)",
                    ctx.estimated_slippage_pct, cfg.max_slippage_of_sl_fraction * 100.0, cap
                ))
            }
        }),
        HardRule::new("btc_crash_long", Severity::Block, |ctx, _cfg| {
            let independent = ctx.extra.get("is_independent").copied().unwrap_or(0.0) > 0.5;
            if ctx.side != Side::Long || ctx.btc.change_1h_pct >= -3.0 || independent {
                pass()
            } else {
                miss(format!("BTC crashing ({:+.1}%/1h), altcoin longs are high risk", ctx.btc.change_1h_pct))
            }
        }),
        HardRule::new("btc_moon_short", Severity::Block, |ctx, _cfg| {
            let independent = ctx.extra.get("is_independent").copied().unwrap_or(0.0) > 0.5;
            if ctx.side != Side::Short || ctx.btc.change_1h_pct <= 3.0 || independent {
                pass()
            } else {
                miss(format!("BTC mooning ({:+.1}%/1h), altcoin shorts are high risk", ctx.btc.change_1h_pct))
            }
        }),
        HardRule::new("trend_anticipation_fdi", Severity::Block, |ctx, _cfg| {
            if ctx.kind != crate::domain::signals::SignalKind::TrendAnticipation {
                return pass();
            }
            match ctx.fdi {
                Some(fdi) if fdi >= 1.45 => miss(format!("FDI {fdi:.2} too high, market is range-bound")),
                _ => pass(),
            }
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::BtcSnapshot;
    use crate::domain::signals::SignalKind;

    fn base_ctx() -> ReviewContext {
        ReviewContext {
            symbol: "ETH/USDT:USDT".to_string(),
            side: Side::Long,
            kind: SignalKind::Reversal,
            score: 0.8,
            rsi: 18.0,
            adx: 22.0,
            volume_ratio: 1.8,
            bb_width_pct: 3.0,
            atr_pct: 2.0,
            sl_pct: 3.0,
            change_24h_pct: 2.0,
            funding_rate: 0.0001,
            funding_zscore: 0.0,
            orderbook_depth_score: 0.8,
            estimated_slippage_pct: 0.1,
            macd_bull_cross: true,
            macd_bear_cross: false,
            divergence_matches_side: false,
            divergence_strength: 0.0,
            fdi: None,
            btc: BtcSnapshot::unknown(),
            extra: Default::default(),
        }
    }

    #[test]
    fn clean_signal_passes_every_rule() {
        let engine = HardRulesEngine::new(HardRuleConfig::default());
        let report = engine.evaluate(&base_ctx());
        assert!(report.passed());
    }

    #[test]
    fn rsi_above_long_max_is_blocked() {
        let engine = HardRulesEngine::new(HardRuleConfig::default());
        let mut ctx = base_ctx();
        ctx.rsi = 40.0;
        let report = engine.evaluate(&ctx);
        assert!(!report.passed());
        assert_eq!(report.blocked_by.unwrap().0, "rsi_reversal_long");
    }

    #[test]
    fn funding_direction_against_long_is_warn_only() {
        let engine = HardRulesEngine::new(HardRuleConfig::default());
        let mut ctx = base_ctx();
        ctx.funding_rate = 0.0005;
        let report = engine.evaluate(&ctx);
        assert!(report.passed());
        assert!(report.warnings.iter().any(|(name, _)| name == "funding_direction_long"));
    }

    #[test]
    fn disabled_rule_is_skipped() {
        let mut cfg = HardRuleConfig::default();
        cfg.disabled_rules.push("rsi_reversal_long".to_string());
        let engine = HardRulesEngine::new(cfg);
        let mut ctx = base_ctx();
        ctx.rsi = 40.0;
        assert!(engine.evaluate(&ctx).passed());
    }

    #[test]
    fn high_fdi_blocks_trend_anticipation_only() {
        let engine = HardRulesEngine::new(HardRuleConfig::default());
        let mut ctx = base_ctx();
        ctx.kind = SignalKind::TrendAnticipation;
        ctx.fdi = Some(1.6);
        assert!(!engine.evaluate(&ctx).passed());
    }

    #[test]
    fn sl_too_tight_vs_atr_is_blocked() {
        let engine = HardRulesEngine::new(HardRuleConfig::default());
        let mut ctx = base_ctx();
        ctx.sl_pct = 2.0;
        let report = engine.evaluate(&ctx);
        assert!(!report.passed());
        assert_eq!(report.blocked_by.unwrap().0, "sl_vs_atr_sanity");
    }

    #[test]
    fn slippage_over_cap_is_blocked() {
        let engine = HardRulesEngine::new(HardRuleConfig::default());
        let mut ctx = base_ctx();
        ctx.estimated_slippage_pct = 2.0;
        let report = engine.evaluate(&ctx);
        assert!(!report.passed());
        assert_eq!(report.blocked_by.unwrap().0, "slippage_vs_sl");
    }

    #[test]
    fn list_rules_reflects_enable_disable() {
        let mut engine = HardRulesEngine::new(HardRuleConfig::default());
        assert!(engine.list_rules().iter().all(|(_, enabled)| *enabled));
        engine.disable_rule("rsi_reversal_long");
        assert!(!engine.list_rules().iter().any(|(n, e)| *n == "rsi_reversal_long" && *e));
        engine.enable_rule("rsi_reversal_long");
        assert!(engine.list_rules().iter().any(|(n, e)| *n == "rsi_reversal_long" && *e));
    }
}
