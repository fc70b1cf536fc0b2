//! C4 AI Reviewer: hard-rule gate composed in series with a single LLM review.

pub mod hard_rules;
pub mod llm;

use crate::domain::errors::CoreError;
use crate::domain::funding::FundingHistory;
use crate::domain::indicators::CvdDivergence;
use crate::domain::market::Candle;
use crate::domain::ports::{PromptKind, ReviewPrompt};
use crate::domain::review::{EmittedSignalRow, HardRuleReport, OrderStatus, ReviewContext};
use crate::domain::signals::{Candidate, SignalKind};
use chrono::Utc;
use hard_rules::HardRulesEngine;
use llm::FallbackReviewer;

/// Outcome of running a candidate through the full C4 pipeline.
pub enum ReviewOutcome {
    Approved(EmittedSignalRow),
    HardRuleRejected { rule: String, reason: String },
    AiRejected { reasoning: String },
    AiUnavailable,
}

pub struct ReviewPipeline {
    hard_rules: HardRulesEngine,
    reviewer: FallbackReviewer,
}

impl ReviewPipeline {
    pub fn new(hard_rules: HardRulesEngine, reviewer: FallbackReviewer) -> Self {
        Self { hard_rules, reviewer }
    }

    /// Runs the hard-rule gate, then (on pass) the LLM review, and returns a structured
    /// outcome. `candle_history` is the recent candle window used for the CVD-divergence
    /// quality indicator embedded in the prompt (§4.4.2).
    pub async fn review(
        &self,
        candidate: &Candidate,
        candle_history: &[Candle],
        funding_history: &FundingHistory,
        next_id: i64,
    ) -> ReviewOutcome {
        let funding_zscore = funding_history.zscore(&candidate.symbol, candidate.metrics.funding_rate);
        let estimated_slippage_pct = estimate_slippage_pct(candidate);

        let cvd = crate::domain::indicators::cvd_divergence(candle_history, 20);
        let divergence_matches = divergence_matches_side(candidate, &cvd);
        let fdi = matches!(candidate.kind, SignalKind::TrendAnticipation)
            .then(|| crate::domain::indicators::fractal_dimension(candle_history, 30));

        let ctx = ReviewContext::from_candidate(
            candidate,
            funding_zscore,
            estimated_slippage_pct,
            divergence_matches,
            cvd.strength,
            fdi,
        );

        let report: HardRuleReport = self.hard_rules.evaluate(&ctx);
        if let Some((rule, reason)) = report.blocked_by {
            return ReviewOutcome::HardRuleRejected { rule, reason };
        }

        let prompt = build_prompt(candidate, &ctx, &cvd, funding_zscore);
        match self.reviewer.review(prompt).await {
            Ok(resp) if resp.approved && resp.side == candidate.side => {
                ReviewOutcome::Approved(approved_row(next_id, candidate, &resp))
            }
            Ok(resp) => ReviewOutcome::AiRejected { reasoning: resp.reasoning },
            Err(CoreError::AiUnavailable { .. }) => ReviewOutcome::AiUnavailable,
            Err(_) => ReviewOutcome::AiUnavailable,
        }
    }
}

fn divergence_matches_side(candidate: &Candidate, cvd: &CvdDivergence) -> bool {
    use crate::domain::signals::Side;
    match candidate.side {
        Side::Long => cvd.price_change_pct < 0.0 && cvd.cvd_delta > 0.0,
        Side::Short => cvd.price_change_pct > 0.0 && cvd.cvd_delta < 0.0,
    }
}

/// Depth-aware slippage estimate: a balanced book contributes a small baseline; a one-sided
/// book against the order's direction widens it, capped at the SL% so the hard rule's
/// "slippage <= 60% of SL%" check is meaningful.
fn estimate_slippage_pct(candidate: &Candidate) -> f64 {
    let depth_score = candidate.metrics.orderbook.depth_score();
    let base = 0.05;
    let penalty = (1.0 - depth_score) * 0.5;
    (base + penalty).min(candidate.stops.sl_pct)
}

fn build_prompt(candidate: &Candidate, ctx: &ReviewContext, cvd: &CvdDivergence, funding_zscore: f64) -> ReviewPrompt {
    let kind = match candidate.kind {
        SignalKind::Reversal => PromptKind::Reversal,
        SignalKind::TrendAnticipation => PromptKind::TrendAnticipation,
        SignalKind::HighVol => PromptKind::HighVol,
    };

    let mut body = format!(
        "symbol={} side={:?} kind={} score={:.3} rsi={:.1} adx={:.1} volume_ratio={:.2} bb_width_pct={:.2} atr_pct={:.2} \
         change_24h_pct={:.2} funding_rate={:.5} funding_zscore={:.2} cvd_delta={:.2} cvd_fake_breakout={} \
         orderbook_depth_score={:.2} btc_trend={:?} btc_change_1h_pct={:.2} btc_rsi={:.1}",
        candidate.symbol,
        candidate.side,
        candidate.kind.as_str(),
        candidate.score,
        candidate.rsi,
        candidate.adx,
        candidate.volume_ratio,
        candidate.bb_width_pct,
        candidate.atr_pct,
        ctx.change_24h_pct,
        ctx.funding_rate,
        funding_zscore,
        cvd.cvd_delta,
        cvd.fake_breakout,
        ctx.orderbook_depth_score,
        candidate.btc_snapshot.trend,
        candidate.btc_snapshot.change_1h_pct,
        candidate.btc_snapshot.rsi,
    );

    if let Some(fdi) = ctx.fdi {
        body.push_str(&format!(" fdi={fdi:.2}"));
    }

    ReviewPrompt { kind, body }
}

fn approved_row(id: i64, candidate: &Candidate, resp: &crate::domain::review::ReviewResponse) -> EmittedSignalRow {
    EmittedSignalRow {
        id,
        symbol: candidate.symbol.clone(),
        side: candidate.side,
        entry: None,
        sl: None,
        tp: None,
        rsi: candidate.rsi,
        adx: candidate.adx,
        score: candidate.score,
        entry_ai_source: Some(format!("confidence={:.2}", resp.confidence)),
        timing_ai_source: None,
        order_type: None,
        order_status: OrderStatus::Pending,
        fill_price: None,
        fill_time: None,
        exit_price: None,
        exit_time: None,
        exit_reason: None,
        final_pnl_pct: None,
        holding_minutes: None,
        created_at: Utc::now(),
    }
}
