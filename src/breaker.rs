use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::defaults::DEFAULT_SLEEP_WINDOW;
use crate::options::{get_int, get_millis, ConfigMap};
use crate::{ClientError, Result};

/// Substitute invoked with the error that failed a breaker-protected call.
///
/// `Ok(Some(_))` replaces the failure with a response, `Err(_)` with another
/// error. `Ok(None)` swallows it; the dispatcher then reports
/// [`ClientError::NoResponse`].
pub type Fallback =
    Arc<dyn Fn(ClientError) -> Result<Option<reqwest::Response>> + Send + Sync>;

/// Thresholds for the circuit breaker wrapped around a profile.
///
/// Zero values switch the matching protection off: no timeout, unlimited
/// concurrency, no minimum volume, never trip on error percent.
#[derive(Clone, Default)]
pub struct BreakerConfig {
    /// Upper bound for one attempt while the breaker is engaged.
    pub timeout: Duration,
    pub max_concurrent_requests: u32,
    /// Error percent (0-100) over the rolling window that opens the circuit.
    pub error_percent_threshold: u32,
    /// How long an open circuit rejects calls before admitting a probe.
    pub sleep_window: Duration,
    /// Minimum requests in the rolling window before the error percent counts.
    pub request_volume_threshold: u32,
    pub fallback: Option<Fallback>,
}

impl fmt::Debug for BreakerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerConfig")
            .field("timeout", &self.timeout)
            .field("max_concurrent_requests", &self.max_concurrent_requests)
            .field("error_percent_threshold", &self.error_percent_threshold)
            .field("sleep_window", &self.sleep_window)
            .field("request_volume_threshold", &self.request_volume_threshold)
            .field("fallback", &self.fallback.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl BreakerConfig {
    /// Creates a config with every threshold at zero and the default sleep window.
    pub fn new() -> Self {
        Self {
            sleep_window: DEFAULT_SLEEP_WINDOW,
            ..Self::default()
        }
    }

    /// Resolves the `hystrixconfig` sub-map. Each field resolves on its own;
    /// unresolvable thresholds are zero.
    pub fn from_config(options: &ConfigMap) -> Self {
        Self {
            timeout: get_millis(options, "hystrixtimeoutinmillis").unwrap_or_default(),
            max_concurrent_requests: get_count(options, "maxconcurrentrequests"),
            error_percent_threshold: get_count(options, "errorpercentthreshold"),
            sleep_window: get_millis(options, "sleepwindowinmillis")
                .unwrap_or(DEFAULT_SLEEP_WINDOW),
            request_volume_threshold: get_count(options, "requestvolumethreshold"),
            fallback: None,
        }
    }

    /// Bounds each attempt; zero disables it.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Caps in-flight calls; zero means unlimited.
    pub fn with_max_concurrent_requests(mut self, max: u32) -> Self {
        self.max_concurrent_requests = max;
        self
    }

    /// Error percent that opens the circuit; zero never trips.
    pub fn with_error_percent_threshold(mut self, percent: u32) -> Self {
        self.error_percent_threshold = percent;
        self
    }

    /// Sets how long an open circuit rejects calls.
    pub fn with_sleep_window(mut self, window: Duration) -> Self {
        self.sleep_window = window;
        self
    }

    /// Sets the minimum volume before the error percent counts.
    pub fn with_request_volume_threshold(mut self, volume: u32) -> Self {
        self.request_volume_threshold = volume;
        self
    }

    /// Installs the fallback run on the final error.
    pub fn with_fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fn(ClientError) -> Result<Option<reqwest::Response>> + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(fallback));
        self
    }

    /// Runs the fallback if one is configured, otherwise returns `err`.
    pub(crate) fn fall_back(&self, err: ClientError) -> Result<Option<reqwest::Response>> {
        match &self.fallback {
            Some(fallback) => fallback(err),
            None => Err(err),
        }
    }
}

fn get_count(options: &ConfigMap, key: &str) -> u32 {
    get_int(options, key)
        .map(|value| value.clamp(0, i64::from(u32::MAX)) as u32)
        .unwrap_or_default()
}
