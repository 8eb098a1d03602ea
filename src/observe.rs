use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::request::CallContext;

/// Status and latency of one fulfilled call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    pub status: u16,
    #[serde(rename = "latency")]
    pub latency_in_millis: u64,
}

/// Receives one formatted line per fulfilled call.
pub type Logger = Arc<dyn Fn(&CallContext, &str) + Send + Sync>;

/// Receives the profile name and [`Metric`] of every fulfilled call.
pub type MetricsSink = Arc<dyn Fn(&CallContext, &str, Metric) + Send + Sync>;

/// Logger forwarding each line to `tracing` at `info` level.
#[cfg(feature = "tracing")]
pub fn tracing_logger() -> Logger {
    Arc::new(|context: &CallContext, message: &str| {
        tracing::info!(request_id = context.request_id(), "{message}");
    })
}

pub(crate) fn fulfilled_message(name: &str, status: u16, latency_in_millis: u64) -> String {
    format!("Fulfilled http request {name} with status {status} in duration {latency_in_millis} ms")
}
