use dashmap::DashMap;

/// Health scoring knobs. Scores live in `[0, max_score]` and drift back up
/// over time so a penalized account eventually re-enters rotation.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub initial: f64,
    pub max_score: f64,
    pub min_usable: f64,
    pub success_reward: f64,
    pub rate_limit_penalty: f64,
    pub failure_penalty: f64,
    pub recovery_per_hour: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            initial: 70.0,
            max_score: 100.0,
            min_usable: 50.0,
            success_reward: 1.0,
            rate_limit_penalty: 10.0,
            failure_penalty: 20.0,
            recovery_per_hour: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
struct HealthState {
    score: f64,
    last_updated: i64,
    consecutive_failures: u32,
}

/// Per-account-index wellness scores. Reads apply linear time recovery
/// without mutating; writes store the post-update score and stamp the clock.
pub struct HealthTracker {
    config: HealthConfig,
    states: DashMap<usize, HealthState>,
}

impl HealthTracker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            states: DashMap::new(),
        }
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn effective(&self, state: &HealthState, now: i64) -> f64 {
        let hours = (now - state.last_updated).max(0) as f64 / 3_600_000.0;
        let recovered = (hours * self.config.recovery_per_hour).floor();
        (state.score + recovered).min(self.config.max_score)
    }

    pub fn get_score(&self, index: usize) -> f64 {
        let now = Self::now_ms();
        match self.states.get(&index) {
            Some(state) => self.effective(&state, now),
            None => self.config.initial,
        }
    }

    /// Applies `delta` to the current (recovered) score and clamps.
    fn apply(&self, index: usize, delta: f64, failure: bool) {
        let now = Self::now_ms();
        let mut entry = self.states.entry(index).or_insert_with(|| HealthState {
            score: self.config.initial,
            last_updated: now,
            consecutive_failures: 0,
        });
        let current = self.effective(&entry, now);
        entry.score = (current + delta).clamp(0.0, self.config.max_score);
        entry.last_updated = now;
        if failure {
            entry.consecutive_failures += 1;
        } else {
            entry.consecutive_failures = 0;
        }
    }

    pub fn record_success(&self, index: usize) {
        self.apply(index, self.config.success_reward, false);
    }

    pub fn record_rate_limit(&self, index: usize) {
        self.apply(index, -self.config.rate_limit_penalty, true);
    }

    pub fn record_failure(&self, index: usize) {
        self.apply(index, -self.config.failure_penalty, true);
    }

    pub fn is_usable(&self, index: usize) -> bool {
        self.get_score(index) >= self.config.min_usable
    }

    pub fn consecutive_failures(&self, index: usize) -> u32 {
        self.states
            .get(&index)
            .map(|state| state.consecutive_failures)
            .unwrap_or(0)
    }

    pub fn reset(&self, index: usize) {
        self.states.insert(
            index,
            HealthState {
                score: self.config.initial,
                last_updated: Self::now_ms(),
                consecutive_failures: 0,
            },
        );
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, index: usize, ms: i64) {
        if let Some(mut state) = self.states.get_mut(&index) {
            state.last_updated -= ms;
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_account_reads_initial_score() {
        let tracker = HealthTracker::default();
        assert_eq!(tracker.get_score(0), 70.0);
        assert!(tracker.is_usable(0));
    }

    #[test]
    fn success_and_penalties_move_the_score() {
        let tracker = HealthTracker::default();
        tracker.record_success(0);
        assert_eq!(tracker.get_score(0), 71.0);
        tracker.record_rate_limit(0);
        assert_eq!(tracker.get_score(0), 61.0);
        tracker.record_failure(0);
        assert_eq!(tracker.get_score(0), 41.0);
        assert!(!tracker.is_usable(0));
    }

    #[test]
    fn score_never_leaves_bounds() {
        let tracker = HealthTracker::default();
        for _ in 0..20 {
            tracker.record_failure(0);
        }
        assert_eq!(tracker.get_score(0), 0.0);
        for _ in 0..200 {
            tracker.record_success(0);
        }
        assert_eq!(tracker.get_score(0), 100.0);
    }

    #[test]
    fn recovery_is_linear_floored_and_capped() {
        let tracker = HealthTracker::default();
        tracker.record_failure(0); // 50
        tracker.backdate(0, 90 * 60 * 1000); // 1.5h -> floor(3.0) = 3
        assert_eq!(tracker.get_score(0), 53.0);

        tracker.backdate(0, 100 * 3_600_000);
        assert_eq!(tracker.get_score(0), 100.0);
    }

    #[test]
    fn reads_without_writes_are_monotonic() {
        let tracker = HealthTracker::default();
        tracker.record_failure(0);
        let mut last = tracker.get_score(0);
        for _ in 0..5 {
            tracker.backdate(0, 3_600_000);
            let score = tracker.get_score(0);
            assert!(score >= last);
            last = score;
        }
    }

    #[test]
    fn reset_restores_initial() {
        let tracker = HealthTracker::default();
        tracker.record_failure(3);
        tracker.reset(3);
        assert_eq!(tracker.get_score(3), 70.0);
        assert_eq!(tracker.consecutive_failures(3), 0);
    }

    #[test]
    fn failure_streak_tracks_and_clears_on_success() {
        let tracker = HealthTracker::default();
        tracker.record_failure(0);
        tracker.record_rate_limit(0);
        assert_eq!(tracker.consecutive_failures(0), 2);
        tracker.record_success(0);
        assert_eq!(tracker.consecutive_failures(0), 0);
    }
}
