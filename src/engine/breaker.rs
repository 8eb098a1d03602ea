//! Circuit breaker state shared by every engine built for the same profile name.
//!
//! ```text
//! CLOSED ──[volume ≥ threshold && error% ≥ threshold]──► OPEN
//!   ▲                                                     │
//!   │                                             [sleep window]
//!   │                                                     ▼
//!   └──────────────[probe succeeds]───────────────── HALF-OPEN
//!                                                         │
//!                           OPEN ◄──[probe fails]─────────┘
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};

use crate::breaker::BreakerConfig;
use crate::transport::RoundTrip;
use crate::{ClientError, Result};

const WINDOW_BUCKETS: usize = 10;
const BUCKET_WIDTH: Duration = Duration::from_secs(1);

/// Observable state of a profile's circuit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Clone, Copy, Debug)]
enum State {
    Closed,
    Open { opened_at: Instant },
    HalfOpen { since: Instant },
}

#[derive(Clone, Copy, Debug, Default)]
struct Bucket {
    index: u64,
    successes: u32,
    failures: u32,
}

/// Per-second outcome counts over the last [`WINDOW_BUCKETS`] seconds.
#[derive(Debug)]
struct RollingWindow {
    origin: Instant,
    buckets: [Bucket; WINDOW_BUCKETS],
}

impl RollingWindow {
    fn new(now: Instant) -> Self {
        Self {
            origin: now,
            buckets: [Bucket::default(); WINDOW_BUCKETS],
        }
    }

    fn index(&self, now: Instant) -> u64 {
        (now.saturating_duration_since(self.origin).as_nanos() / BUCKET_WIDTH.as_nanos()) as u64
    }

    fn record(&mut self, now: Instant, success: bool) {
        let index = self.index(now);
        let bucket = &mut self.buckets[(index % WINDOW_BUCKETS as u64) as usize];
        if bucket.index != index {
            *bucket = Bucket {
                index,
                ..Bucket::default()
            };
        }
        if success {
            bucket.successes += 1;
        } else {
            bucket.failures += 1;
        }
    }

    /// Returns `(total, failures)` inside the window.
    fn totals(&self, now: Instant) -> (u64, u64) {
        let current = self.index(now);
        self.buckets
            .iter()
            .filter(|bucket| bucket.index <= current && current - bucket.index < WINDOW_BUCKETS as u64)
            .fold((0, 0), |(total, failures), bucket| {
                (
                    total + u64::from(bucket.successes) + u64::from(bucket.failures),
                    failures + u64::from(bucket.failures),
                )
            })
    }
}

#[derive(Debug)]
struct Inner {
    config: BreakerConfig,
    state: State,
    window: RollingWindow,
}

/// Breaker bookkeeping for one profile name.
#[derive(Debug)]
pub(crate) struct Circuit {
    name: String,
    inner: Mutex<Inner>,
    in_flight: AtomicU32,
}

/// Releases a concurrency slot when dropped.
struct Permit<'a> {
    in_flight: &'a AtomicU32,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Circuit {
    fn new(name: &str, config: BreakerConfig) -> Self {
        Self {
            name: name.to_owned(),
            inner: Mutex::new(Inner {
                config,
                state: State::Closed,
                window: RollingWindow::new(Instant::now()),
            }),
            in_flight: AtomicU32::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn configure(&self, config: &BreakerConfig) {
        self.lock().config = config.clone();
    }

    pub(crate) fn state(&self) -> CircuitState {
        match self.lock().state {
            State::Closed => CircuitState::Closed,
            State::Open { .. } => CircuitState::Open,
            State::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    /// Runs one attempt through the breaker.
    ///
    /// Transport errors, breaker timeouts and 5xx responses count as failures.
    pub(crate) async fn call(
        &self,
        transport: &dyn RoundTrip,
        request: reqwest::Request,
    ) -> Result<reqwest::Response> {
        let (_permit, timeout) = self.admit()?;

        let outcome = if timeout.is_zero() {
            transport.round_trip(request).await
        } else {
            match tokio::time::timeout(timeout, transport.round_trip(request)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ClientError::BreakerTimeout {
                    name: self.name.clone(),
                    timeout,
                }),
            }
        };

        let success = matches!(&outcome, Ok(response) if !response.status().is_server_error());
        self.record(success);
        outcome
    }

    fn admit(&self) -> Result<(Permit<'_>, Duration)> {
        let mut inner = self.lock();
        let now = Instant::now();

        let max = inner.config.max_concurrent_requests;
        if max > 0 && self.in_flight.load(Ordering::SeqCst) >= max {
            return Err(ClientError::MaxConcurrency {
                name: self.name.clone(),
            });
        }

        match inner.state {
            State::Closed => {}
            State::Open { opened_at } | State::HalfOpen { since: opened_at } => {
                if now.saturating_duration_since(opened_at) < inner.config.sleep_window {
                    return Err(ClientError::CircuitOpen {
                        name: self.name.clone(),
                    });
                }
                inner.state = State::HalfOpen { since: now };
            }
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok((
            Permit {
                in_flight: &self.in_flight,
            },
            inner.config.timeout,
        ))
    }

    fn record(&self, success: bool) {
        let mut inner = self.lock();
        let now = Instant::now();

        match inner.state {
            State::HalfOpen { .. } if success => {
                inner.state = State::Closed;
                inner.window = RollingWindow::new(now);
            }
            State::HalfOpen { .. } => {
                inner.state = State::Open { opened_at: now };
                #[cfg(feature = "tracing")]
                tracing::warn!(profile = %self.name, "probe failed, circuit re-opened");
            }
            State::Closed => {
                inner.window.record(now, success);
                if !success && inner.should_trip(now) {
                    inner.state = State::Open { opened_at: now };
                    #[cfg(feature = "tracing")]
                    tracing::warn!(profile = %self.name, "error threshold reached, circuit opened");
                }
            }
            State::Open { .. } => {}
        }
    }
}

impl Inner {
    fn should_trip(&self, now: Instant) -> bool {
        let threshold = u64::from(self.config.error_percent_threshold);
        if threshold == 0 {
            return false;
        }
        let (total, failures) = self.window.totals(now);
        total > 0
            && total >= u64::from(self.config.request_volume_threshold)
            && failures * 100 >= threshold * total
    }
}

fn circuits() -> MutexGuard<'static, HashMap<String, Arc<Circuit>>> {
    static CIRCUITS: OnceLock<Mutex<HashMap<String, Arc<Circuit>>>> = OnceLock::new();
    CIRCUITS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Returns the process-wide circuit for `name`, applying `config` to it.
///
/// Registries built with the same profile name share one circuit.
pub(crate) fn circuit_for(name: &str, config: &BreakerConfig) -> Arc<Circuit> {
    let mut circuits = circuits();
    let circuit = circuits
        .entry(name.to_owned())
        .or_insert_with(|| Arc::new(Circuit::new(name, config.clone())));
    circuit.configure(config);
    Arc::clone(circuit)
}
