//! Opt-in per-request JSON dumps for debugging transformation and rotation
//! problems. Everything is best-effort: a failed dump is a warning, never an
//! error.

use std::path::PathBuf;

use serde_json::Value;
use tracing::warn;

use crate::constants::REQUEST_LOG_DIR;

#[derive(Debug, Clone)]
pub struct RequestLogger {
    output_dir: Option<PathBuf>,
}

impl RequestLogger {
    pub fn new(enabled: bool) -> Self {
        let output_dir = if enabled {
            dirs::home_dir().map(|home| home.join(".opencode").join(REQUEST_LOG_DIR))
        } else {
            None
        };
        Self { output_dir }
    }

    #[cfg(test)]
    pub(crate) fn with_dir(dir: PathBuf) -> Self {
        Self {
            output_dir: Some(dir),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.output_dir.is_some()
    }

    fn build_filename(stage: &str, trace_id: &str) -> String {
        let ts = chrono::Utc::now().format("%Y%m%d_%H%M%S%.3f");
        format!("{}_{}_{}.json", ts, trace_id, stage)
    }

    pub async fn dump(&self, trace_id: &str, stage: &str, payload: &Value) {
        let Some(output_dir) = self.output_dir.as_ref() else {
            return;
        };
        if let Err(e) = tokio::fs::create_dir_all(output_dir).await {
            warn!("request-log dir creation failed: {}", e);
            return;
        }
        let path = output_dir.join(Self::build_filename(stage, trace_id));
        match serde_json::to_vec_pretty(payload) {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(&path, bytes).await {
                    warn!("request-log write failed: {}", e);
                }
            }
            Err(e) => warn!("request-log serialization failed: {}", e),
        }
    }
}
