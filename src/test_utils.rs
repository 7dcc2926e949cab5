//! Test-only helper for the handful of tests that touch the feature-flag
//! and config-dir environment variables (`CODEX_MODE`, `DEBUG_CODEX_SWITCH`,
//! `ENABLE_PLUGIN_REQUEST_LOGGING`, `OPENCODE_CONFIG_DIR`,
//! `XDG_CONFIG_HOME`). Process env is global, so the guard couples the
//! cross-test lock with the values it scribbles over and restores both on
//! drop.

#[cfg(test)]
use std::sync::{Mutex, MutexGuard, OnceLock};

#[cfg(test)]
pub(crate) struct ScopedEnv {
    _lock: MutexGuard<'static, ()>,
    saved: Vec<(&'static str, Option<String>)>,
}

#[cfg(test)]
impl ScopedEnv {
    /// Takes the process-wide env lock. Chain `set`/`unset` onto the result.
    pub(crate) fn lock() -> Self {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        let lock = ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Self {
            _lock: lock,
            saved: Vec::new(),
        }
    }

    pub(crate) fn set(mut self, key: &'static str, value: &str) -> Self {
        self.remember(key);
        std::env::set_var(key, value);
        self
    }

    pub(crate) fn unset(mut self, key: &'static str) -> Self {
        self.remember(key);
        std::env::remove_var(key);
        self
    }

    fn remember(&mut self, key: &'static str) {
        // Only the value from before the first touch is worth restoring.
        if !self.saved.iter().any(|(saved_key, _)| *saved_key == key) {
            self.saved.push((key, std::env::var(key).ok()));
        }
    }
}

#[cfg(test)]
impl Drop for ScopedEnv {
    fn drop(&mut self) {
        for (key, original) in self.saved.drain(..) {
            match original {
                Some(value) => std::env::set_var(key, value),
                None => std::env::remove_var(key),
            }
        }
    }
}
