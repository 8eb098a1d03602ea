use std::time::Duration;

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Network or request execution error from `reqwest`.
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    /// A custom transport did not answer within the profile's request timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// Failure reported by a custom [`RoundTrip`](crate::RoundTrip) transport.
    #[error("connection error: {0}")]
    Connection(String),
    /// The call named a profile that was never registered.
    #[error("unknown profile '{0}'")]
    UnknownProfile(String),
    /// Method, URL or header could not be turned into a wire request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The engine finished without an error and without a response.
    #[error("unable to fetch response")]
    NoResponse,
    /// The breaker for this profile is open and rejected the call.
    #[error("circuit open for '{name}'")]
    CircuitOpen { name: String },
    /// The breaker already runs the maximum number of concurrent calls.
    #[error("max concurrency reached for '{name}'")]
    MaxConcurrency { name: String },
    /// An attempt exceeded the breaker timeout.
    #[error("breaker timeout for '{name}' after {timeout:?}")]
    BreakerTimeout { name: String, timeout: Duration },
    /// The underlying `reqwest` client could not be built.
    #[error("client build error: {0}")]
    Build(reqwest::Error),
}

impl ClientError {
    /// Returns true when the error was produced by the breaker without
    /// reaching the transport.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen { .. } | Self::MaxConcurrency { .. }
        )
    }
}

/// Resolution failure for a single configuration key.
///
/// Never escapes profile construction: the affected field falls back to its
/// default instead.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum OptionError {
    #[error("missing {key}")]
    Missing { key: String },
    #[error("unable to cast {key} to {expected}")]
    TypeMismatch { key: String, expected: &'static str },
}
