use crate::domain::ScoredCandidate;
use std::collections::BTreeSet;

/// Greedy pick: best final score first, at most one pick per trigger, no
/// repeated tickers, never more than `max_picks`. Under-filling is expected
/// when triggers come up empty; nothing is backfilled.
pub fn select_final(mut candidates: Vec<ScoredCandidate>, max_picks: usize) -> Vec<ScoredCandidate> {
    let trigger_count = candidates
        .iter()
        .map(|c| c.trigger())
        .collect::<BTreeSet<_>>()
        .len();
    let limit = max_picks.min(trigger_count);

    candidates.sort_by(|a, b| {
        b.final_score
            .total_cmp(&a.final_score)
            .then_with(|| a.ticker().cmp(b.ticker()))
            .then_with(|| a.trigger().cmp(b.trigger()))
    });

    let mut used_triggers = BTreeSet::new();
    let mut used_tickers = BTreeSet::new();
    let mut accepted = Vec::with_capacity(limit);

    for candidate in candidates {
        if accepted.len() >= limit {
            break;
        }
        if used_triggers.contains(candidate.trigger()) || used_tickers.contains(candidate.ticker()) {
            continue;
        }
        used_triggers.insert(candidate.trigger());
        used_tickers.insert(candidate.ticker().to_string());
        accepted.push(candidate);
    }

    accepted
}
