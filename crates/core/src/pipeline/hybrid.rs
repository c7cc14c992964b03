//! Second-stage, risk/reward-aware scoring.
//!
//! Runs only over per-trigger shortlists, since it needs a history window per
//! ticker.

use crate::domain::{FilteredCandidate, PriceWindow, ScoredCandidate};
use crate::error::PipelineError;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridParams {
    /// Target is never below `price * (1 + min_upside)`.
    pub min_upside: f64,
    /// Risk/reward at or above this maps to a full score.
    pub rr_cap: f64,
    /// Stop distance (fraction of price) that scores zero tightness.
    pub max_stop_distance: f64,
    pub rr_weight: f64,
    pub tightness_weight: f64,
    pub composite_weight: f64,
    pub agent_fit_weight: f64,
}

impl Default for HybridParams {
    fn default() -> Self {
        Self {
            min_upside: 0.15,
            rr_cap: 5.0,
            max_stop_distance: 0.10,
            rr_weight: 0.6,
            tightness_weight: 0.4,
            composite_weight: 0.3,
            agent_fit_weight: 0.7,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HybridOutcome {
    pub scored: Vec<ScoredCandidate>,
    pub invalid: Vec<PipelineError>,
}

/// Scores one candidate. A missing window falls back to the minimum-upside
/// target.
pub fn score_candidate(
    candidate: FilteredCandidate,
    window: Option<&PriceWindow>,
    params: &HybridParams,
) -> Result<ScoredCandidate, PipelineError> {
    let price = candidate.price;
    if !price.is_finite() || price <= 0.0 {
        return Err(PipelineError::invalid(
            &candidate.ticker,
            format!("non-positive price {price}"),
        ));
    }

    if let Some(w) = window {
        if !w.high.is_finite() || !w.low.is_finite() || w.high < w.low {
            return Err(PipelineError::invalid(
                &candidate.ticker,
                format!("malformed history window high={} low={}", w.high, w.low),
            ));
        }
    }

    let stop_loss = price * (1.0 - candidate.stop_loss_pct);
    let risk = price - stop_loss;
    if !(risk > 0.0) {
        return Err(PipelineError::invalid(
            &candidate.ticker,
            format!("stop-loss {stop_loss} is not below price {price}"),
        ));
    }

    let floor = price * (1.0 + params.min_upside);
    let target_price = window.map_or(floor, |w| w.high.max(floor));
    let risk_reward = (target_price - price) / risk;

    let rr_score = (risk_reward.min(params.rr_cap) / params.rr_cap).clamp(0.0, 1.0);
    let stop_distance = risk / price;
    let tightness = (1.0 - stop_distance / params.max_stop_distance).clamp(0.0, 1.0);
    let agent_fit_score = params.rr_weight * rr_score + params.tightness_weight * tightness;
    let final_score = params.composite_weight * candidate.composite_score
        + params.agent_fit_weight * agent_fit_score;

    Ok(ScoredCandidate {
        candidate,
        stop_loss,
        target_price,
        risk_reward,
        agent_fit_score,
        final_score,
    })
}

/// Scores a shortlist in order, dropping invalid candidates.
pub fn score_shortlist(
    shortlist: Vec<FilteredCandidate>,
    windows: &BTreeMap<String, PriceWindow>,
    params: &HybridParams,
) -> HybridOutcome {
    let mut out = HybridOutcome::default();
    for candidate in shortlist {
        let window = windows.get(&candidate.ticker);
        match score_candidate(candidate, window, params) {
            Ok(scored) => out.scored.push(scored),
            Err(err) => {
                tracing::warn!(error = %err, "dropping invalid candidate");
                out.invalid.push(err);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(ticker: &str, price: f64, composite: f64, stop_pct: f64) -> FilteredCandidate {
        FilteredCandidate {
            ticker: ticker.to_string(),
            trigger: "t",
            composite_score: composite,
            price,
            stop_loss_pct: stop_pct,
        }
    }

    fn window(high: f64, low: f64) -> PriceWindow {
        PriceWindow {
            high,
            low,
            sessions: 10,
        }
    }

    #[test]
    fn target_is_floored_at_min_upside() {
        let p = HybridParams::default();
        let s = score_candidate(candidate("A", 100.0, 1.0, 0.05), Some(&window(105.0, 90.0)), &p).unwrap();
        assert!((s.stop_loss - 95.0).abs() < 1e-9);
        assert!((s.target_price - 115.0).abs() < 1e-9);
        assert!((s.risk_reward - 3.0).abs() < 1e-9);
    }

    #[test]
    fn target_uses_window_high_when_higher() {
        let p = HybridParams::default();
        let s = score_candidate(candidate("A", 100.0, 1.0, 0.05), Some(&window(130.0, 90.0)), &p).unwrap();
        assert!((s.target_price - 130.0).abs() < 1e-9);
        assert!((s.risk_reward - 6.0).abs() < 1e-9);
    }

    #[test]
    fn final_score_blend() {
        let p = HybridParams::default();
        let s = score_candidate(candidate("A", 100.0, 0.5, 0.05), Some(&window(130.0, 90.0)), &p).unwrap();
        // rr capped -> 1.0, tightness = 1 - 0.05/0.10 = 0.5
        let agent_fit = 0.6 * 1.0 + 0.4 * 0.5;
        assert!((s.agent_fit_score - agent_fit).abs() < 1e-9);
        assert!((s.final_score - (0.3 * 0.5 + 0.7 * agent_fit)).abs() < 1e-9);
        assert_eq!(s.candidate.composite_score, 0.5);
    }

    #[test]
    fn stop_equal_to_price_is_invalid() {
        let p = HybridParams::default();
        let err = score_candidate(candidate("A", 100.0, 1.0, 0.0), None, &p).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidCandidate { .. }));
    }

    #[test]
    fn zero_price_is_invalid() {
        let p = HybridParams::default();
        let err = score_candidate(candidate("A", 0.0, 1.0, 0.05), None, &p).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidCandidate { .. }));
    }

    #[test]
    fn missing_window_uses_floor() {
        let p = HybridParams::default();
        let s = score_candidate(candidate("A", 200.0, 1.0, 0.05), None, &p).unwrap();
        assert!((s.target_price - 230.0).abs() < 1e-9);
    }

    #[test]
    fn shortlist_drops_invalid_and_keeps_order() {
        let p = HybridParams::default();
        let mut windows = BTreeMap::new();
        windows.insert("C".to_string(), window(50.0, 60.0));
        let out = score_shortlist(
            vec![
                candidate("A", 100.0, 0.9, 0.05),
                candidate("B", 100.0, 0.8, 0.0),
                candidate("C", 100.0, 0.7, 0.05),
                candidate("D", 100.0, 0.6, 0.05),
            ],
            &windows,
            &p,
        );
        let tickers: Vec<_> = out.scored.iter().map(|s| s.ticker()).collect();
        assert_eq!(tickers, vec!["A", "D"]);
        assert_eq!(out.invalid.len(), 2);
    }
}
