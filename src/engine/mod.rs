//! Execution engines: a retry loop, optionally wrapped in a circuit breaker.

mod breaker;

use std::sync::Arc;

use tokio::time::sleep;

use crate::backoff::BackoffPolicy;
use crate::breaker::BreakerConfig;
use crate::transport::RoundTrip;
use crate::Result;

pub use breaker::CircuitState;
use breaker::{circuit_for, Circuit};

/// Which engine a registry built for a profile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineKind {
    /// Retry with backoff only.
    Retrying,
    /// Retry with backoff behind a circuit breaker.
    Breaker,
}

/// Retry loop bound to one transport.
pub(crate) struct Retrier {
    #[cfg_attr(not(feature = "tracing"), allow(dead_code))]
    name: String,
    transport: Arc<dyn RoundTrip>,
    attempts: u32,
    backoff: BackoffPolicy,
}

impl Retrier {
    pub(crate) fn new(
        name: impl Into<String>,
        transport: Arc<dyn RoundTrip>,
        attempts: u32,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Sends `request`, re-attempting on transport errors and 5xx responses
    /// until the attempts run out. The last 5xx response is returned as-is.
    ///
    /// A request whose body cannot be cloned is attempted once. Breaker
    /// rejections end the loop immediately.
    async fn execute(
        &self,
        request: reqwest::Request,
        circuit: Option<&Circuit>,
    ) -> Result<reqwest::Response> {
        let mut current = request;
        let mut attempt = 0u32;

        loop {
            let next = if attempt + 1 < self.attempts {
                current.try_clone()
            } else {
                None
            };

            let outcome = match circuit {
                Some(circuit) => circuit.call(self.transport.as_ref(), current).await,
                None => self.transport.round_trip(current).await,
            };

            let retryable = match &outcome {
                Ok(response) => response.status().is_server_error(),
                Err(err) => !err.is_rejection(),
            };
            let Some(next) = next.filter(|_| retryable) else {
                return outcome;
            };

            self.wait_before_retry(attempt).await;
            current = next;
            attempt += 1;
        }
    }

    async fn wait_before_retry(&self, attempt: u32) {
        let delay = self.backoff.delay(attempt);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            profile = %self.name,
            attempt = attempt + 1,
            "retrying request after {} ms",
            delay.as_millis()
        );

        if !delay.is_zero() {
            sleep(delay).await;
        }
    }
}

/// Engine built for one registered profile.
pub(crate) enum Engine {
    Retrying(Retrier),
    Breaker {
        retrier: Retrier,
        config: BreakerConfig,
        circuit: Arc<Circuit>,
    },
}

impl Engine {
    pub(crate) fn retrying(retrier: Retrier) -> Self {
        Self::Retrying(retrier)
    }

    /// Wraps `retrier` in the shared circuit for `name`.
    pub(crate) fn breaker(name: &str, retrier: Retrier, config: BreakerConfig) -> Self {
        let circuit = circuit_for(name, &config);
        Self::Breaker {
            retrier,
            config,
            circuit,
        }
    }

    pub(crate) fn kind(&self) -> EngineKind {
        match self {
            Self::Retrying(_) => EngineKind::Retrying,
            Self::Breaker { .. } => EngineKind::Breaker,
        }
    }

    pub(crate) fn circuit_state(&self) -> Option<CircuitState> {
        match self {
            Self::Retrying(_) => None,
            Self::Breaker { circuit, .. } => Some(circuit.state()),
        }
    }

    /// Runs the request. `Ok(None)` means a fallback swallowed the failure.
    pub(crate) async fn execute(
        &self,
        request: reqwest::Request,
    ) -> Result<Option<reqwest::Response>> {
        match self {
            Self::Retrying(retrier) => retrier.execute(request, None).await.map(Some),
            Self::Breaker {
                retrier,
                config,
                circuit,
            } => match retrier.execute(request, Some(circuit.as_ref())).await {
                Ok(response) => Ok(Some(response)),
                Err(err) => config.fall_back(err),
            },
        }
    }
}
