//! Host integration callbacks. Everything here is fire-and-forget: a broken
//! sink must never fail the request path.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastVariant {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Credentials pushed back into the host's auth store after a refresh.
#[derive(Debug, Clone)]
pub struct AuthUpdate {
    pub access: String,
    pub refresh: String,
    pub expires: i64,
    pub account_id: Option<String>,
}

pub type ToastFn = dyn Fn(&str, ToastVariant, u64) + Send + Sync;
pub type HostLogFn = dyn Fn(&str, LogLevel, &str) + Send + Sync;
pub type AuthWritebackFn = dyn Fn(&str, AuthUpdate) + Send + Sync;

#[derive(Clone, Default)]
pub struct HostSinks {
    toast: Option<Arc<ToastFn>>,
    log: Option<Arc<HostLogFn>>,
    auth_writeback: Option<Arc<AuthWritebackFn>>,
}

impl HostSinks {
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn with_toast(mut self, toast: impl Fn(&str, ToastVariant, u64) + Send + Sync + 'static) -> Self {
        self.toast = Some(Arc::new(toast));
        self
    }

    pub fn with_log(mut self, log: impl Fn(&str, LogLevel, &str) + Send + Sync + 'static) -> Self {
        self.log = Some(Arc::new(log));
        self
    }

    pub fn with_auth_writeback(
        mut self,
        writeback: impl Fn(&str, AuthUpdate) + Send + Sync + 'static,
    ) -> Self {
        self.auth_writeback = Some(Arc::new(writeback));
        self
    }

    pub fn toast(&self, message: &str, variant: ToastVariant, duration_ms: u64) {
        if let Some(toast) = &self.toast {
            if catch_unwind(AssertUnwindSafe(|| toast(message, variant, duration_ms))).is_err() {
                warn!("toast sink panicked; ignoring");
            }
        }
    }

    pub fn log(&self, service: &str, level: LogLevel, message: &str) {
        if let Some(log) = &self.log {
            if catch_unwind(AssertUnwindSafe(|| log(service, level, message))).is_err() {
                warn!("log sink panicked; ignoring");
            }
        }
    }

    pub fn auth_writeback(&self, provider_id: &str, update: AuthUpdate) {
        if let Some(writeback) = &self.auth_writeback {
            if catch_unwind(AssertUnwindSafe(|| writeback(provider_id, update))).is_err() {
                warn!("auth writeback sink panicked; ignoring");
            }
        }
    }
}

impl std::fmt::Debug for HostSinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostSinks")
            .field("toast", &self.toast.is_some())
            .field("log", &self.log.is_some())
            .field("auth_writeback", &self.auth_writeback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn noop_sinks_do_nothing() {
        let sinks = HostSinks::noop();
        sinks.toast("hi", ToastVariant::Info, 1000);
        sinks.log("codex-switch", LogLevel::Info, "hi");
        sinks.auth_writeback(
            "openai",
            AuthUpdate {
                access: "a".into(),
                refresh: "r".into(),
                expires: 0,
                account_id: None,
            },
        );
    }

    #[test]
    fn configured_sinks_receive_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c1 = calls.clone();
        let c2 = calls.clone();
        let sinks = HostSinks::noop()
            .with_toast(move |_, _, _| {
                c1.fetch_add(1, Ordering::SeqCst);
            })
            .with_log(move |_, _, _| {
                c2.fetch_add(1, Ordering::SeqCst);
            });

        sinks.toast("switched", ToastVariant::Success, 3000);
        sinks.log("codex-switch", LogLevel::Warn, "rate limited");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_sink_is_contained() {
        let sinks = HostSinks::noop().with_toast(|_, _, _| panic!("host bug"));
        sinks.toast("boom", ToastVariant::Error, 0);
    }
}
