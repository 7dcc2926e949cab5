use serde::{Deserialize, Serialize};
use tracing::debug;

use super::TokenBucketTracker;

/// How the next account is chosen for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStrategy {
    Sticky,
    RoundRobin,
    Hybrid,
}

impl Default for SelectionStrategy {
    fn default() -> Self {
        Self::Hybrid
    }
}

/// Snapshot of one account's selectable state.
#[derive(Debug, Clone)]
pub struct AccountMetrics {
    pub index: usize,
    pub last_used: i64,
    pub health_score: f64,
    pub is_rate_limited: bool,
    pub enabled: bool,
}

/// Minimum base-score advantage a challenger needs to unseat the active
/// account under the hybrid strategy.
pub const SWITCH_THRESHOLD: f64 = 100.0;

const MIN_HEALTH_SCORE: f64 = 50.0;
const STICKINESS_BONUS: f64 = 150.0;
const IDLE_CAP_SECONDS: f64 = 3600.0;

pub fn select(
    strategy: SelectionStrategy,
    metrics: &[AccountMetrics],
    bucket: &TokenBucketTracker,
    active_index: Option<usize>,
    now_ms: i64,
) -> Option<usize> {
    match strategy {
        SelectionStrategy::Sticky => select_sticky(metrics, active_index),
        SelectionStrategy::RoundRobin => select_round_robin(metrics, active_index),
        SelectionStrategy::Hybrid => select_hybrid(metrics, bucket, active_index, now_ms),
    }
}

fn available(metrics: &[AccountMetrics]) -> impl Iterator<Item = &AccountMetrics> {
    metrics.iter().filter(|m| m.enabled && !m.is_rate_limited)
}

fn select_sticky(metrics: &[AccountMetrics], active_index: Option<usize>) -> Option<usize> {
    let candidates: Vec<&AccountMetrics> = available(metrics).collect();
    if let Some(active) = active_index {
        if candidates.iter().any(|m| m.index == active) {
            return Some(active);
        }
    }
    candidates.first().map(|m| m.index)
}

fn select_round_robin(metrics: &[AccountMetrics], active_index: Option<usize>) -> Option<usize> {
    let candidates: Vec<&AccountMetrics> = available(metrics).collect();
    if candidates.is_empty() {
        return None;
    }
    let Some(active) = active_index else {
        return Some(candidates[0].index);
    };
    // Next index after the active one in circular order.
    candidates
        .iter()
        .find(|m| m.index > active)
        .or_else(|| candidates.first())
        .map(|m| m.index)
}

#[derive(Debug)]
struct ScoredCandidate {
    index: usize,
    base: f64,
    score: f64,
}

fn select_hybrid(
    metrics: &[AccountMetrics],
    bucket: &TokenBucketTracker,
    active_index: Option<usize>,
    now_ms: i64,
) -> Option<usize> {
    let max_tokens = bucket.max_tokens();
    let mut scored: Vec<ScoredCandidate> = Vec::new();
    for m in available(metrics) {
        if m.health_score < MIN_HEALTH_SCORE || !bucket.has_tokens(m.index, 1.0) {
            continue;
        }
        let tokens = bucket.get_tokens(m.index);
        let idle_seconds = (((now_ms - m.last_used) / 1000).max(0) as f64).min(IDLE_CAP_SECONDS);
        let base =
            2.0 * m.health_score + 5.0 * (100.0 * tokens / max_tokens) + 0.1 * idle_seconds;
        let score = if active_index == Some(m.index) {
            base + STICKINESS_BONUS
        } else {
            base
        };
        scored.push(ScoredCandidate {
            index: m.index,
            base,
            score,
        });
    }
    if scored.is_empty() {
        return None;
    }

    // Stable rank: highest base first, earlier insertion wins ties.
    scored.sort_by(|a, b| {
        b.base
            .partial_cmp(&a.base)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.index.cmp(&b.index))
    });

    debug!(
        "hybrid candidates: {}",
        scored
            .iter()
            .map(|c| format!("#{}(base={:.1}, score={:.1})", c.index, c.base, c.score))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let active = active_index.and_then(|idx| scored.iter().find(|c| c.index == idx));
    let Some(active) = active else {
        return Some(scored[0].index);
    };

    // Anti-flap: the best non-active candidate must beat the active base by
    // more than the threshold to force a switch.
    let challenger = scored.iter().find(|c| c.index != active.index);
    match challenger {
        Some(ch) if ch.base - active.base > SWITCH_THRESHOLD => Some(ch.index),
        _ => Some(active.index),
    }
}
