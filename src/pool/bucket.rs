use dashmap::DashMap;

/// Client-side admission control per account. Tokens are fractional and
/// regenerate continuously, unlike the hourly-floored health recovery.
#[derive(Debug, Clone)]
pub struct BucketConfig {
    pub max_tokens: f64,
    pub initial_tokens: f64,
    pub regeneration_per_minute: f64,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            max_tokens: 50.0,
            initial_tokens: 50.0,
            regeneration_per_minute: 6.0,
        }
    }
}

#[derive(Debug, Clone)]
struct BucketState {
    tokens: f64,
    last_updated: i64,
}

pub struct TokenBucketTracker {
    config: BucketConfig,
    states: DashMap<usize, BucketState>,
}

impl TokenBucketTracker {
    pub fn new(config: BucketConfig) -> Self {
        Self {
            config,
            states: DashMap::new(),
        }
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn effective(&self, state: &BucketState, now: i64) -> f64 {
        let minutes = (now - state.last_updated).max(0) as f64 / 60_000.0;
        (state.tokens + minutes * self.config.regeneration_per_minute).min(self.config.max_tokens)
    }

    pub fn max_tokens(&self) -> f64 {
        self.config.max_tokens
    }

    pub fn get_tokens(&self, index: usize) -> f64 {
        let now = Self::now_ms();
        match self.states.get(&index) {
            Some(state) => self.effective(&state, now),
            None => self.config.initial_tokens,
        }
    }

    pub fn has_tokens(&self, index: usize, cost: f64) -> bool {
        self.get_tokens(index) >= cost
    }

    /// Atomic check-and-subtract: no mutation when the balance is short.
    pub fn consume(&self, index: usize, cost: f64) -> bool {
        let now = Self::now_ms();
        let mut entry = self.states.entry(index).or_insert_with(|| BucketState {
            tokens: self.config.initial_tokens,
            last_updated: now,
        });
        let current = self.effective(&entry, now);
        if current < cost {
            return false;
        }
        entry.tokens = current - cost;
        entry.last_updated = now;
        true
    }

    pub fn refund(&self, index: usize, amount: f64) {
        let now = Self::now_ms();
        let mut entry = self.states.entry(index).or_insert_with(|| BucketState {
            tokens: self.config.initial_tokens,
            last_updated: now,
        });
        let current = self.effective(&entry, now);
        entry.tokens = (current + amount).min(self.config.max_tokens);
        entry.last_updated = now;
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, index: usize, ms: i64) {
        if let Some(mut state) = self.states.get_mut(&index) {
            state.last_updated -= ms;
        }
    }

    #[cfg(test)]
    pub(crate) fn set_tokens(&self, index: usize, tokens: f64) {
        self.states.insert(
            index,
            BucketState {
                tokens,
                last_updated: Self::now_ms(),
            },
        );
    }
}

impl Default for TokenBucketTracker {
    fn default() -> Self {
        Self::new(BucketConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_bucket_starts_full() {
        let bucket = TokenBucketTracker::default();
        assert_eq!(bucket.get_tokens(0), 50.0);
        assert!(bucket.has_tokens(0, 1.0));
    }

    #[test]
    fn consume_subtracts_exactly_cost() {
        let bucket = TokenBucketTracker::default();
        assert!(bucket.consume(0, 3.0));
        let remaining = bucket.get_tokens(0);
        assert!((remaining - 47.0).abs() < 0.01);
    }

    #[test]
    fn consume_fails_without_mutation_when_short() {
        let bucket = TokenBucketTracker::default();
        bucket.set_tokens(0, 0.5);
        assert!(!bucket.consume(0, 1.0));
        assert!((bucket.get_tokens(0) - 0.5).abs() < 0.01);
    }

    #[test]
    fn regeneration_is_fractional_and_capped() {
        let bucket = TokenBucketTracker::default();
        bucket.set_tokens(0, 0.0);
        bucket.backdate(0, 30_000); // half a minute -> 3 tokens
        let tokens = bucket.get_tokens(0);
        assert!((tokens - 3.0).abs() < 0.01);

        bucket.backdate(0, 3_600_000);
        assert_eq!(bucket.get_tokens(0), 50.0);
    }

    #[test]
    fn refund_caps_at_max() {
        let bucket = TokenBucketTracker::default();
        bucket.consume(0, 2.0);
        bucket.refund(0, 10.0);
        assert_eq!(bucket.get_tokens(0), 50.0);
    }

    #[test]
    fn reads_without_writes_never_decrease() {
        let bucket = TokenBucketTracker::default();
        bucket.set_tokens(0, 10.0);
        let mut last = bucket.get_tokens(0);
        for _ in 0..5 {
            bucket.backdate(0, 10_000);
            let tokens = bucket.get_tokens(0);
            assert!(tokens >= last);
            assert!(tokens <= bucket.max_tokens());
            last = tokens;
        }
    }
}
