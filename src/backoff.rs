use std::time::Duration;

use rand::Rng;

use crate::options::{get_float, get_map, get_millis, ConfigMap};

/// Delay strategy applied between attempts of one call.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum BackoffPolicy {
    /// Re-attempt immediately.
    #[default]
    None,
    /// Fixed interval plus random jitter in `[0, max_jitter]`.
    Constant {
        interval: Duration,
        max_jitter: Duration,
    },
    /// `min(max_timeout, initial_timeout * exponent_factor^attempt)` plus
    /// random jitter in `[0, max_jitter]`.
    Exponential {
        initial_timeout: Duration,
        max_timeout: Duration,
        exponent_factor: f64,
        max_jitter: Duration,
    },
}

impl BackoffPolicy {
    /// Fixed `interval` plus up to `max_jitter` between attempts.
    pub fn constant(interval: Duration, max_jitter: Duration) -> Self {
        Self::Constant {
            interval,
            max_jitter,
        }
    }

    /// `initial_timeout * exponent_factor^attempt`, capped at `max_timeout`, plus jitter.
    pub fn exponential(
        initial_timeout: Duration,
        max_timeout: Duration,
        exponent_factor: f64,
        max_jitter: Duration,
    ) -> Self {
        Self::Exponential {
            initial_timeout,
            max_timeout,
            exponent_factor,
            max_jitter,
        }
    }

    /// Resolves the `backoffpolicy` sub-map.
    ///
    /// `constantbackoff` takes precedence over `exponentialbackoff`; with
    /// neither present the policy is [`BackoffPolicy::None`]. Missing numeric
    /// fields resolve to zero.
    pub fn from_config(options: &ConfigMap) -> Self {
        if let Ok(constant) = get_map(options, "constantbackoff") {
            return Self::Constant {
                interval: get_millis(&constant, "intervalinmillis").unwrap_or_default(),
                max_jitter: get_millis(&constant, "maxjitterintervalinmillis").unwrap_or_default(),
            };
        }

        if let Ok(exponential) = get_map(options, "exponentialbackoff") {
            return Self::Exponential {
                initial_timeout: get_millis(&exponential, "initialtimeoutinmillis")
                    .unwrap_or_default(),
                max_timeout: get_millis(&exponential, "maxtimeoutinmillis").unwrap_or_default(),
                exponent_factor: get_float(&exponential, "exponentfactor").unwrap_or_default(),
                max_jitter: get_millis(&exponential, "maxjitterintervalinmillis")
                    .unwrap_or_default(),
            };
        }

        Self::None
    }

    /// True when attempts follow each other without delay.
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Delay to wait after the zero-based `attempt` failed, without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Constant { interval, .. } => *interval,
            Self::Exponential {
                initial_timeout,
                max_timeout,
                exponent_factor,
                ..
            } => {
                let exp = attempt.min(i32::MAX as u32) as i32;
                let scaled = initial_timeout.as_secs_f64() * exponent_factor.powi(exp);
                let capped = scaled.min(max_timeout.as_secs_f64());
                if capped.is_finite() && capped > 0.0 {
                    Duration::from_secs_f64(capped)
                } else {
                    Duration::ZERO
                }
            }
        }
    }

    /// Delay to wait after the zero-based `attempt` failed.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay(attempt) + self.jitter()
    }

    fn jitter(&self) -> Duration {
        let max_jitter = match self {
            Self::None => return Duration::ZERO,
            Self::Constant { max_jitter, .. } | Self::Exponential { max_jitter, .. } => *max_jitter,
        };
        if max_jitter.is_zero() {
            return Duration::ZERO;
        }
        let nanos = max_jitter.as_nanos().min(u64::MAX as u128) as u64;
        Duration::from_nanos(rand::rng().random_range(0..=nanos))
    }
}
