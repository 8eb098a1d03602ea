use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::redirect;
use serde::{Deserialize, Serialize};

use crate::{ClientError, Result};

/// Sends one wire request and returns the raw response.
///
/// Implemented for [`reqwest::Client`]; custom implementations can be
/// installed on a profile with
/// [`ProfileBuilder::with_transport`](crate::ProfileBuilder::with_transport).
#[async_trait]
pub trait RoundTrip: Send + Sync {
    async fn round_trip(&self, request: reqwest::Request) -> Result<reqwest::Response>;
}

#[async_trait]
impl RoundTrip for reqwest::Client {
    async fn round_trip(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        self.execute(request).await.map_err(ClientError::Transport)
    }
}

/// Applies the profile's request timeout to a caller-supplied transport.
pub(crate) struct Bounded {
    inner: Arc<dyn RoundTrip>,
    timeout: Duration,
}

impl Bounded {
    /// Returns `inner` unchanged when `timeout` is zero.
    pub(crate) fn wrap(inner: Arc<dyn RoundTrip>, timeout: Duration) -> Arc<dyn RoundTrip> {
        if timeout.is_zero() {
            inner
        } else {
            Arc::new(Self { inner, timeout })
        }
    }
}

#[async_trait]
impl RoundTrip for Bounded {
    async fn round_trip(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        tokio::time::timeout(self.timeout, self.inner.round_trip(request))
            .await
            .map_err(|_| ClientError::Timeout(self.timeout))?
    }
}

/// Redirect decision callback, handed to `reqwest` as a custom policy.
pub type RedirectPolicy = Arc<dyn Fn(redirect::Attempt) -> redirect::Action + Send + Sync>;

/// Minimum TLS protocol version accepted by the standard transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TlsVersion {
    #[serde(rename = "1.0")]
    V1_0,
    #[serde(rename = "1.1")]
    V1_1,
    #[serde(rename = "1.2")]
    V1_2,
    #[serde(rename = "1.3")]
    V1_3,
}

impl TlsVersion {
    /// Parses `"1.0"`..`"1.3"`; anything else is unset.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "1.0" => Some(Self::V1_0),
            "1.1" => Some(Self::V1_1),
            "1.2" => Some(Self::V1_2),
            "1.3" => Some(Self::V1_3),
            _ => None,
        }
    }
}

impl From<TlsVersion> for reqwest::tls::Version {
    fn from(value: TlsVersion) -> Self {
        match value {
            TlsVersion::V1_0 => reqwest::tls::Version::TLS_1_0,
            TlsVersion::V1_1 => reqwest::tls::Version::TLS_1_1,
            TlsVersion::V1_2 => reqwest::tls::Version::TLS_1_2,
            TlsVersion::V1_3 => reqwest::tls::Version::TLS_1_3,
        }
    }
}

/// Tuning for the transport built from a profile's resolved fields.
///
/// The system proxy (environment) is used unless the profile carries an
/// explicit proxy URL.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransportSettings {
    pub connect_timeout: Duration,
    pub keep_alive: Duration,
    pub max_idle_connections: usize,
    pub max_idle_per_host: usize,
    pub idle_connection_timeout: Duration,
    /// Recorded for inspection; `reqwest` bounds the handshake with the
    /// connect timeout.
    pub tls_handshake_timeout: Duration,
    /// Recorded for inspection; `reqwest` does not send `Expect: 100-continue`.
    pub expect_continue_timeout: Duration,
    pub min_tls_version: Option<TlsVersion>,
}

impl TransportSettings {
    /// Idle connections kept per host: the smaller of the per-host constant
    /// and the total idle cap, when one is set.
    pub fn idle_pool_size(&self) -> usize {
        if self.max_idle_connections == 0 {
            self.max_idle_per_host
        } else {
            self.max_idle_per_host.min(self.max_idle_connections)
        }
    }

    /// Builds a `reqwest` client with cookie storage, the request `timeout`
    /// (zero disables it), the optional redirect policy and proxy override.
    pub(crate) fn build_client(
        &self,
        timeout: Duration,
        redirect: Option<&RedirectPolicy>,
        proxy: Option<reqwest::Proxy>,
    ) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .cookie_store(true)
            .tcp_keepalive(non_zero(self.keep_alive))
            .pool_idle_timeout(non_zero(self.idle_connection_timeout))
            .pool_max_idle_per_host(self.idle_pool_size());

        if !timeout.is_zero() {
            builder = builder.timeout(timeout);
        }
        if !self.connect_timeout.is_zero() {
            builder = builder.connect_timeout(self.connect_timeout);
        }
        if let Some(version) = self.min_tls_version {
            builder = builder.min_tls_version(version.into());
        }
        if let Some(policy) = redirect {
            let policy = Arc::clone(policy);
            builder = builder.redirect(redirect::Policy::custom(move |attempt| policy(attempt)));
        }
        if let Some(proxy) = proxy {
            builder = builder.proxy(proxy);
        }

        builder.build().map_err(ClientError::Build)
    }
}

fn non_zero(value: Duration) -> Option<Duration> {
    (!value.is_zero()).then_some(value)
}

/// Transport handle carried by a profile.
#[derive(Clone)]
pub enum Transport {
    /// Built by the registry from the profile's tuning fields.
    Standard(TransportSettings),
    /// Supplied by the caller. Only the profile's request timeout is applied.
    Custom(Arc<dyn RoundTrip>),
}

impl Transport {
    /// Wraps a caller-supplied transport.
    pub fn custom<T: RoundTrip + 'static>(transport: T) -> Self {
        Self::Custom(Arc::new(transport))
    }

    /// Tuning of a standard transport; `None` for custom ones.
    pub fn settings(&self) -> Option<&TransportSettings> {
        match self {
            Self::Standard(settings) => Some(settings),
            Self::Custom(_) => None,
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard(settings) => f.debug_tuple("Standard").field(settings).finish(),
            Self::Custom(_) => f.write_str("Custom(<transport>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_version_parse() {
        assert_eq!(TlsVersion::parse("1.2"), Some(TlsVersion::V1_2));
        assert_eq!(TlsVersion::parse(" 1.3 "), Some(TlsVersion::V1_3));
        assert_eq!(TlsVersion::parse("1.4"), None);
        assert_eq!(TlsVersion::parse(""), None);
    }

    #[test]
    fn tls_version_serde_uses_dotted_names() {
        let encoded = serde_json::to_string(&TlsVersion::V1_1).unwrap();
        assert_eq!(encoded, "\"1.1\"");
        let decoded: TlsVersion = serde_json::from_str("\"1.0\"").unwrap();
        assert_eq!(decoded, TlsVersion::V1_0);
    }

    #[test]
    fn idle_pool_size_honors_total_cap() {
        let mut settings = TransportSettings {
            max_idle_per_host: 9,
            ..TransportSettings::default()
        };
        assert_eq!(settings.idle_pool_size(), 9);
        settings.max_idle_connections = 4;
        assert_eq!(settings.idle_pool_size(), 4);
    }

    #[test]
    fn standard_settings_build_a_client() {
        let settings = TransportSettings {
            connect_timeout: Duration::from_millis(500),
            keep_alive: Duration::from_secs(30),
            max_idle_per_host: 2,
            idle_connection_timeout: Duration::from_secs(90),
            min_tls_version: Some(TlsVersion::V1_2),
            ..TransportSettings::default()
        };
        let redirect: RedirectPolicy = Arc::new(|attempt| attempt.stop());
        assert!(settings
            .build_client(Duration::from_secs(5), Some(&redirect), None)
            .is_ok());
    }

    struct Stalled;

    #[async_trait]
    impl RoundTrip for Stalled {
        async fn round_trip(&self, _request: reqwest::Request) -> Result<reqwest::Response> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err(ClientError::Connection("never answered".to_owned()))
        }
    }

    fn request() -> reqwest::Request {
        reqwest::Request::new(
            reqwest::Method::GET,
            reqwest::Url::parse("http://bounded.test/").unwrap(),
        )
    }

    #[tokio::test]
    async fn bounded_transport_times_out() {
        let transport = Bounded::wrap(Arc::new(Stalled), Duration::from_millis(10));
        let err = transport.round_trip(request()).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout(timeout) if timeout == Duration::from_millis(10)));
        assert!(!err.is_rejection());
    }

    #[test]
    fn zero_timeout_leaves_transport_unwrapped() {
        let inner: Arc<dyn RoundTrip> = Arc::new(Stalled);
        let wrapped = Bounded::wrap(Arc::clone(&inner), Duration::ZERO);
        assert!(Arc::ptr_eq(&inner, &wrapped));
    }

    #[test]
    fn debug_hides_custom_transport() {
        let transport = Transport::custom(reqwest::Client::new());
        assert_eq!(format!("{transport:?}"), "Custom(<transport>)");
        assert!(transport.settings().is_none());
    }
}
