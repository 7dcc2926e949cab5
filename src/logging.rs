//! Tracing setup for the embedded gateway. The host owns stdout, so the
//! console layer stays quiet unless debug mode or `RUST_LOG` asks for more;
//! debug mode additionally persists a daily-rolling file next to the
//! request dumps.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::constants::REQUEST_LOG_DIR;

struct UtcTimer;

impl fmt::time::FormatTime for UtcTimer {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Utc::now().to_rfc3339())
    }
}

/// Idempotent tracing init. Safe to call from a host that may already have
/// installed its own subscriber; the second init is a no-op.
pub fn init_logging(debug: bool) {
    let default_filter = if debug { "codex_switch=debug" } else { "codex_switch=warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let console_layer = fmt::Layer::new()
        .with_target(false)
        .with_level(true)
        .with_timer(UtcTimer);

    let file_layer = if debug {
        dirs::home_dir().map(|home| {
            let log_dir = home.join(".opencode").join(REQUEST_LOG_DIR);
            let appender = tracing_appender::rolling::daily(log_dir, "codex-switch.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            // The guard must outlive the process for the writer to flush.
            std::mem::forget(guard);
            fmt::Layer::new()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_timer(UtcTimer)
        })
    } else {
        None
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_logging(false);
        init_logging(true);
    }
}
