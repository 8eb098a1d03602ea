use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::redirect;
use serde_json::Value;

use crate::backoff::BackoffPolicy;
use crate::breaker::BreakerConfig;
use crate::defaults::{
    max_idle_per_host, CONNECT_TIMEOUT_DIVISOR, DEFAULT_IDLE_CONNECTION_TIMEOUT,
    DEFAULT_KEEP_ALIVE, DEFAULT_RETRY_COUNT,
};
use crate::options::{
    get_int, get_map, get_millis, get_string, get_string_map, stringify_map, ConfigMap,
};
use crate::transport::{RedirectPolicy, RoundTrip, TlsVersion, Transport, TransportSettings};
use crate::{ClientError, Result};

/// Fully resolved, named client configuration.
///
/// Built once from a configuration map or a [`ProfileBuilder`] and then
/// handed to the registry. A profile is immutable; use
/// [`Profile::into_builder`] to derive a changed copy.
#[derive(Clone)]
pub struct Profile {
    name: String,
    method: String,
    url: String,
    timeout: Duration,
    connect_timeout: Duration,
    keep_alive: Duration,
    max_idle_connections: usize,
    idle_connection_timeout: Duration,
    tls_handshake_timeout: Duration,
    expect_continue_timeout: Duration,
    proxy_url: Option<String>,
    min_tls_version: Option<TlsVersion>,
    retry_count: u32,
    backoff_policy: BackoffPolicy,
    breaker: Option<BreakerConfig>,
    headers: HashMap<String, String>,
    redirect: Option<RedirectPolicy>,
    transport: Option<Transport>,
}

impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("name", &self.name)
            .field("method", &self.method)
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .field("retry_count", &self.retry_count)
            .field("backoff_policy", &self.backoff_policy)
            .field("breaker", &self.breaker)
            .field("proxy_url", &self.proxy_url)
            .field("transport", &self.transport)
            .field("redirect", &self.redirect.as_ref().map(|_| "<fn>"))
            .finish_non_exhaustive()
    }
}

impl Profile {
    /// Starts a builder for a bare profile named `name`.
    pub fn builder(name: impl Into<String>) -> ProfileBuilder {
        ProfileBuilder {
            profile: Self::bare(name.into()),
        }
    }

    fn bare(name: String) -> Self {
        Self {
            name,
            method: String::new(),
            url: String::new(),
            timeout: Duration::ZERO,
            connect_timeout: Duration::ZERO,
            keep_alive: Duration::ZERO,
            max_idle_connections: 0,
            idle_connection_timeout: Duration::ZERO,
            tls_handshake_timeout: Duration::ZERO,
            expect_continue_timeout: Duration::ZERO,
            proxy_url: None,
            min_tls_version: None,
            retry_count: 0,
            backoff_policy: BackoffPolicy::None,
            breaker: None,
            headers: HashMap::new(),
            redirect: None,
            transport: None,
        }
    }

    /// Resolves a profile from a configuration map.
    ///
    /// Without a map only the name is set and no transport is installed.
    /// With one, every recognized key is resolved through the defaulting
    /// table and the standard transport is seeded from the result.
    /// Unresolvable keys fall back to their defaults.
    pub fn from_config(name: impl Into<String>, options: Option<&ConfigMap>) -> Self {
        let mut profile = Self::bare(name.into());
        let Some(options) = options else {
            return profile;
        };

        profile.method = get_string(options, "method").unwrap_or_default();
        profile.url = get_string(options, "url").unwrap_or_default();
        profile.timeout = get_millis(options, "timeoutinmillis").unwrap_or_default();
        profile.connect_timeout = get_millis(options, "connecttimeoutinmillis")
            .unwrap_or(profile.timeout / CONNECT_TIMEOUT_DIVISOR);
        profile.keep_alive = get_millis(options, "keepaliveinmillis").unwrap_or(DEFAULT_KEEP_ALIVE);
        profile.max_idle_connections = get_int(options, "maxidleconnections")
            .map(|count| count.max(0) as usize)
            .unwrap_or_else(|_| max_idle_per_host());
        profile.idle_connection_timeout = get_millis(options, "idleconnectiontimeoutinmillis")
            .unwrap_or(DEFAULT_IDLE_CONNECTION_TIMEOUT);
        profile.tls_handshake_timeout =
            get_millis(options, "tlshandshaketimeoutinmillis").unwrap_or_default();
        profile.expect_continue_timeout =
            get_millis(options, "expectcontinuetimeoutinmillis").unwrap_or_default();
        profile.proxy_url = get_string(options, "proxyurl")
            .ok()
            .filter(|url| !url.is_empty());
        profile.retry_count = get_int(options, "retrycount")
            .map(|count| count.clamp(0, i64::from(u32::MAX)) as u32)
            .unwrap_or(DEFAULT_RETRY_COUNT);
        profile.backoff_policy = get_map(options, "backoffpolicy")
            .map(|policy| BackoffPolicy::from_config(&policy))
            .unwrap_or_default();
        profile.breaker = get_map(options, "hystrixconfig")
            .ok()
            .map(|breaker| BreakerConfig::from_config(&breaker));
        profile.headers = get_string_map(options, "headers").unwrap_or_default();
        profile.min_tls_version = get_string(options, "tlsminversion")
            .ok()
            .and_then(|version| TlsVersion::parse(&version));

        profile.transport = Some(Transport::Standard(profile.standard_settings()));
        profile
    }

    /// Resolves a profile from a parsed JSON/YAML document. Anything other
    /// than an object yields a bare profile.
    pub fn from_value(name: impl Into<String>, value: &Value) -> Self {
        Self::from_config(name, value.as_object())
    }

    /// Returns a builder holding a copy of this profile.
    pub fn into_builder(self) -> ProfileBuilder {
        ProfileBuilder { profile: self }
    }

    /// Transport tuning derived from the profile's current fields.
    pub fn standard_settings(&self) -> TransportSettings {
        TransportSettings {
            connect_timeout: self.connect_timeout,
            keep_alive: self.keep_alive,
            max_idle_connections: self.max_idle_connections,
            max_idle_per_host: max_idle_per_host(),
            idle_connection_timeout: self.idle_connection_timeout,
            tls_handshake_timeout: self.tls_handshake_timeout,
            expect_continue_timeout: self.expect_continue_timeout,
            min_tls_version: self.min_tls_version,
        }
    }

    /// Registry key of the profile.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Default HTTP method; empty means `GET`.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Default target URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whole-request timeout; zero disables it.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Dial timeout of the standard transport.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// TCP keep-alive interval; zero disables it.
    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    /// Cap on idle pooled connections; zero means uncapped.
    pub fn max_idle_connections(&self) -> usize {
        self.max_idle_connections
    }

    /// How long an idle pooled connection is kept.
    pub fn idle_connection_timeout(&self) -> Duration {
        self.idle_connection_timeout
    }

    /// TLS handshake timeout as configured.
    pub fn tls_handshake_timeout(&self) -> Duration {
        self.tls_handshake_timeout
    }

    /// `Expect: 100-continue` timeout as configured.
    pub fn expect_continue_timeout(&self) -> Duration {
        self.expect_continue_timeout
    }

    /// Proxy override for the standard transport.
    pub fn proxy_url(&self) -> Option<&str> {
        self.proxy_url.as_deref()
    }

    /// Lowest TLS version accepted, if restricted.
    pub fn min_tls_version(&self) -> Option<TlsVersion> {
        self.min_tls_version
    }

    /// Configured retry count. Zero still allows one attempt.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Total attempts per call.
    pub fn attempts(&self) -> u32 {
        self.retry_count.max(1)
    }

    /// Delay policy between attempts.
    pub fn backoff_policy(&self) -> &BackoffPolicy {
        &self.backoff_policy
    }

    /// Breaker thresholds; `None` selects the plain retrying engine.
    pub fn breaker(&self) -> Option<&BreakerConfig> {
        self.breaker.as_ref()
    }

    /// Static headers sent when a call carries none.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Custom redirect decision, if any.
    pub fn redirect_policy(&self) -> Option<&RedirectPolicy> {
        self.redirect.as_ref()
    }

    /// Installed transport; `None` until one is seeded or set.
    pub fn transport(&self) -> Option<&Transport> {
        self.transport.as_ref()
    }
}

/// Chainable setters producing an immutable [`Profile`].
#[derive(Clone, Debug)]
pub struct ProfileBuilder {
    profile: Profile,
}

impl ProfileBuilder {
    /// Renames the profile.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.profile.name = name.into();
        self
    }

    /// Sets the default HTTP method.
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.profile.method = method.into();
        self
    }

    /// Sets the default target URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.profile.url = url.into();
        self
    }

    /// Sets the proxy override; an empty URL clears it.
    pub fn with_proxy(mut self, proxy_url: impl Into<String>) -> Self {
        let proxy_url = proxy_url.into();
        self.profile.proxy_url = (!proxy_url.is_empty()).then_some(proxy_url);
        self
    }

    /// Sets the whole-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.profile.timeout = timeout;
        self
    }

    /// Sets the dial timeout.
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.profile.connect_timeout = connect_timeout;
        self
    }

    /// Sets the TCP keep-alive interval.
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.profile.keep_alive = keep_alive;
        self
    }

    /// Caps idle pooled connections.
    pub fn with_max_idle_connections(mut self, max_idle_connections: usize) -> Self {
        self.profile.max_idle_connections = max_idle_connections;
        self
    }

    /// Sets how long idle connections are kept.
    pub fn with_idle_connection_timeout(mut self, idle_connection_timeout: Duration) -> Self {
        self.profile.idle_connection_timeout = idle_connection_timeout;
        self
    }

    /// Sets the TLS handshake timeout.
    pub fn with_tls_handshake_timeout(mut self, tls_handshake_timeout: Duration) -> Self {
        self.profile.tls_handshake_timeout = tls_handshake_timeout;
        self
    }

    /// Sets the `Expect: 100-continue` timeout.
    pub fn with_expect_continue_timeout(mut self, expect_continue_timeout: Duration) -> Self {
        self.profile.expect_continue_timeout = expect_continue_timeout;
        self
    }

    /// Restricts the lowest accepted TLS version.
    pub fn with_min_tls_version(mut self, version: Option<TlsVersion>) -> Self {
        self.profile.min_tls_version = version;
        self
    }

    /// Sets the number of attempts per call.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.profile.retry_count = retry_count;
        self
    }

    /// Sets the delay policy between attempts.
    pub fn with_backoff_policy(mut self, backoff_policy: BackoffPolicy) -> Self {
        self.profile.backoff_policy = backoff_policy;
        self
    }

    /// Puts the profile behind a circuit breaker.
    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.profile.breaker = Some(breaker);
        self
    }

    /// Drops the breaker config.
    pub fn without_breaker(mut self) -> Self {
        self.profile.breaker = None;
        self
    }

    /// Installs a breaker fallback. Has no effect without a breaker config.
    pub fn with_breaker_fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fn(ClientError) -> Result<Option<reqwest::Response>> + Send + Sync + 'static,
    {
        if let Some(breaker) = self.profile.breaker.as_mut() {
            breaker.fallback = Some(Arc::new(fallback));
        }
        self
    }

    /// Replaces the static headers.
    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.profile.headers = headers
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        self
    }

    /// Replaces the static headers from loosely typed values, stringifying each.
    pub fn with_header_params(mut self, headers: &ConfigMap) -> Self {
        self.profile.headers = stringify_map(headers);
        self
    }

    /// Installs a custom redirect decision.
    pub fn with_redirect_policy<F>(mut self, policy: F) -> Self
    where
        F: Fn(redirect::Attempt) -> redirect::Action + Send + Sync + 'static,
    {
        self.profile.redirect = Some(Arc::new(policy));
        self
    }

    /// Overrides the transport. Replaces the standard transport seeded by
    /// [`Profile::from_config`].
    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.profile.transport = Some(transport);
        self
    }

    /// Installs a custom [`RoundTrip`] transport.
    pub fn with_round_trip<T: RoundTrip + 'static>(self, transport: T) -> Self {
        self.with_transport(Transport::custom(transport))
    }

    /// Re-seeds the standard transport from the fields set so far.
    pub fn with_default_transport(mut self) -> Self {
        self.profile.transport = Some(Transport::Standard(self.profile.standard_settings()));
        self
    }

    /// Finishes the profile.
    pub fn build(self) -> Profile {
        self.profile
    }
}
