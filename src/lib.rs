//! `profiled-http` keeps a registry of named HTTP client profiles.
//!
//! Each [`Profile`] carries its own timeouts, transport tuning, static
//! headers, retry count and [`BackoffPolicy`], and optionally a
//! [`BreakerConfig`]. [`HttpClient`] builds one engine per profile and
//! dispatches [`CallRequest`]s against them:
//! - [`Profile::from_config`] resolves a loosely typed option map
//! - [`HttpClient::builder`] registers profiles and observers
//! - [`HttpClient::execute`] runs one call

mod backoff;
mod breaker;
mod client;
pub mod defaults;
mod engine;
mod error;
pub mod options;
mod observe;
mod profile;
mod request;
mod transport;

pub use backoff::BackoffPolicy;
pub use breaker::{BreakerConfig, Fallback};
pub use client::{HttpClient, HttpClientBuilder};
pub use engine::{CircuitState, EngineKind};
pub use error::{ClientError, OptionError};
#[cfg(feature = "tracing")]
pub use observe::tracing_logger;
pub use observe::{Logger, Metric, MetricsSink};
pub use options::ConfigMap;
pub use profile::{Profile, ProfileBuilder};
pub use request::{CallContext, CallRequest};
pub use transport::{RedirectPolicy, RoundTrip, TlsVersion, Transport, TransportSettings};

pub type Result<T> = std::result::Result<T, ClientError>;
