use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Method, Url};

use crate::{
    defaults::REQUEST_ID_HEADER,
    engine::{CircuitState, Engine, EngineKind, Retrier},
    observe::{fulfilled_message, Logger, Metric, MetricsSink},
    request::CallContext,
    transport::{Bounded, RoundTrip, Transport},
    CallRequest, ClientError, Profile, Result,
};

struct Entry {
    engine: Engine,
    profile: Profile,
}

struct Inner {
    entries: HashMap<String, Entry>,
    logger: Option<Logger>,
    metrics: Option<MetricsSink>,
}

/// Registry of named profiles, each bound to its own execution engine.
///
/// Cheap to clone; clones share the engines, breaker state and observers.
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<Inner>,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.inner.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("HttpClient")
            .field("profiles", &names)
            .field("logger", &self.inner.logger.is_some())
            .field("metrics", &self.inner.metrics.is_some())
            .finish()
    }
}

/// Collects profiles and observers for [`HttpClient`].
#[derive(Default)]
pub struct HttpClientBuilder {
    profiles: Vec<Profile>,
    logger: Option<Logger>,
    metrics: Option<MetricsSink>,
}

impl HttpClientBuilder {
    /// Registers a profile. A later profile with the same name replaces it.
    pub fn profile(mut self, profile: Profile) -> Self {
        self.profiles.push(profile);
        self
    }

    /// Registers every profile in order.
    pub fn profiles<I>(mut self, profiles: I) -> Self
    where
        I: IntoIterator<Item = Profile>,
    {
        self.profiles.extend(profiles);
        self
    }

    /// Sets the logger receiving one line per fulfilled call.
    pub fn with_logger<F>(mut self, logger: F) -> Self
    where
        F: Fn(&CallContext, &str) + Send + Sync + 'static,
    {
        self.logger = Some(Arc::new(logger));
        self
    }

    /// Sets the sink receiving status and latency per fulfilled call.
    pub fn with_metrics<F>(mut self, metrics: F) -> Self
    where
        F: Fn(&CallContext, &str, Metric) + Send + Sync + 'static,
    {
        self.metrics = Some(Arc::new(metrics));
        self
    }

    /// Builds one engine per profile.
    ///
    /// Fails only when `reqwest` rejects a standard transport configuration.
    pub fn build(self) -> Result<HttpClient> {
        let mut entries = HashMap::with_capacity(self.profiles.len());
        for profile in self.profiles {
            let engine = build_engine(&profile)?;
            entries.insert(profile.name().to_owned(), Entry { engine, profile });
        }

        Ok(HttpClient {
            inner: Arc::new(Inner {
                entries,
                logger: self.logger,
                metrics: self.metrics,
            }),
        })
    }
}

impl HttpClient {
    /// Starts an empty registry builder.
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Registers `profiles` without observers.
    pub fn new<I>(profiles: I) -> Result<Self>
    where
        I: IntoIterator<Item = Profile>,
    {
        Self::builder().profiles(profiles).build()
    }

    /// Registered profile named `name`.
    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.inner.entries.get(name).map(|entry| &entry.profile)
    }

    /// Names of every registered profile, in no particular order.
    pub fn profile_names(&self) -> impl Iterator<Item = &str> {
        self.inner.entries.keys().map(String::as_str)
    }

    /// Engine built for `name`, if registered.
    pub fn engine_kind(&self, name: &str) -> Option<EngineKind> {
        self.inner.entries.get(name).map(|entry| entry.engine.kind())
    }

    /// Breaker state for `name`; `None` for unknown names and profiles
    /// without a breaker.
    pub fn circuit_state(&self, name: &str) -> Option<CircuitState> {
        self.inner
            .entries
            .get(name)
            .and_then(|entry| entry.engine.circuit_state())
    }

    /// Executes `call` against its named profile.
    ///
    /// Unset method and URL come from the profile; call headers replace the
    /// profile's static headers. Every request carries the correlation
    /// header. Logger and metrics observe successful round trips only.
    pub async fn execute(&self, call: CallRequest) -> Result<reqwest::Response> {
        let entry = self
            .inner
            .entries
            .get(&call.name)
            .ok_or_else(|| ClientError::UnknownProfile(call.name.clone()))?;
        let profile = &entry.profile;

        let CallRequest {
            name,
            method,
            url,
            query,
            headers,
            body,
            context,
        } = call;

        let method = method.unwrap_or_else(|| profile.method().to_owned());
        let url = url.unwrap_or_else(|| profile.url().to_owned());
        let headers = headers.unwrap_or_else(|| profile.headers().clone());
        let request_id = request_id(&context);

        let start = Instant::now();

        let request = build_request(
            &method,
            &url,
            &query,
            &headers,
            &request_id,
            body,
            context.timeout(),
        )?;

        let response = entry
            .engine
            .execute(request)
            .await?
            .ok_or(ClientError::NoResponse)?;

        self.observe(&name, &context, response.status().as_u16(), start.elapsed());
        Ok(response)
    }

    fn observe(&self, name: &str, context: &CallContext, status: u16, elapsed: Duration) {
        let latency_in_millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

        #[cfg(feature = "tracing")]
        tracing::debug!(profile = %name, status, latency_in_millis, "fulfilled http request");

        if let Some(logger) = &self.inner.logger {
            logger(context, &fulfilled_message(name, status, latency_in_millis));
        }
        if let Some(metrics) = &self.inner.metrics {
            metrics(
                context,
                name,
                Metric {
                    status,
                    latency_in_millis,
                },
            );
        }
    }
}

fn build_engine(profile: &Profile) -> Result<Engine> {
    let transport: Arc<dyn RoundTrip> = match profile.transport() {
        Some(Transport::Custom(transport)) => {
            if profile.proxy_url().is_some() {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    profile = profile.name(),
                    "proxy override ignored: transport is not the standard transport"
                );
            }
            Bounded::wrap(Arc::clone(transport), profile.timeout())
        }
        Some(Transport::Standard(settings)) => Arc::new(settings.build_client(
            profile.timeout(),
            profile.redirect_policy(),
            proxy_override(profile),
        )?),
        None => Arc::new(profile.standard_settings().build_client(
            profile.timeout(),
            profile.redirect_policy(),
            proxy_override(profile),
        )?),
    };

    let retrier = Retrier::new(
        profile.name(),
        transport,
        profile.attempts(),
        profile.backoff_policy().clone(),
    );

    Ok(match profile.breaker() {
        None => Engine::retrying(retrier),
        Some(config) => Engine::breaker(profile.name(), retrier, config.clone()),
    })
}

/// Parses the profile's proxy URL. Invalid URLs are logged and ignored.
fn proxy_override(profile: &Profile) -> Option<reqwest::Proxy> {
    let proxy_url = profile.proxy_url()?;
    match reqwest::Proxy::all(proxy_url) {
        Ok(proxy) => Some(proxy),
        Err(_err) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(profile = profile.name(), error = %_err, "proxy override ignored");
            None
        }
    }
}

/// Caller-supplied id when the context carries one as a string, else a
/// fresh UUID.
fn request_id(context: &CallContext) -> String {
    context
        .request_id()
        .map(str::to_owned)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn build_request(
    method: &str,
    url: &str,
    query: &[(String, String)],
    headers: &HashMap<String, String>,
    request_id: &str,
    body: Option<reqwest::Body>,
    timeout: Option<Duration>,
) -> Result<reqwest::Request> {
    let method = if method.is_empty() {
        Method::GET
    } else {
        Method::from_bytes(method.as_bytes())
            .map_err(|_| ClientError::InvalidRequest(format!("invalid method '{method}'")))?
    };
    let mut url = Url::parse(url)
        .map_err(|err| ClientError::InvalidRequest(format!("invalid url '{url}': {err}")))?;
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }

    let mut request = reqwest::Request::new(method, url);
    let header_map = request.headers_mut();
    for (key, value) in headers {
        header_map.append(header_name(key)?, header_value(key, value)?);
    }
    // replaces any caller copy, whatever its case
    header_map.insert(
        header_name(REQUEST_ID_HEADER)?,
        header_value(REQUEST_ID_HEADER, request_id)?,
    );

    *request.body_mut() = body;
    *request.timeout_mut() = timeout;
    Ok(request)
}

fn header_name(key: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(key.as_bytes())
        .map_err(|_| ClientError::InvalidRequest(format!("invalid header name '{key}'")))
}

fn header_value(key: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| ClientError::InvalidRequest(format!("invalid value for header '{key}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_headers() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn query_is_appended_to_existing_query() {
        let request = build_request(
            "GET",
            "http://example.test/search?q=rust",
            &[("page".to_owned(), "2".to_owned())],
            &no_headers(),
            "id-1",
            None,
            None,
        )
        .unwrap();
        assert_eq!(request.url().query(), Some("q=rust&page=2"));
    }

    #[test]
    fn empty_method_defaults_to_get() {
        let request =
            build_request("", "http://example.test", &[], &no_headers(), "id", None, None).unwrap();
        assert_eq!(request.method(), &Method::GET);
    }

    #[test]
    fn correlation_header_replaces_caller_copy() {
        let headers = HashMap::from([("x-requestid".to_owned(), "stale".to_owned())]);
        let request =
            build_request("GET", "http://example.test", &[], &headers, "fresh", None, None)
                .unwrap();
        let values: Vec<_> = request.headers().get_all(REQUEST_ID_HEADER).iter().collect();
        assert_eq!(values, vec!["fresh"]);
    }

    #[test]
    fn malformed_inputs_are_invalid_requests() {
        let bad_url = build_request("GET", "not a url", &[], &no_headers(), "id", None, None);
        assert!(matches!(bad_url, Err(ClientError::InvalidRequest(_))));

        let bad_method =
            build_request("GE T", "http://example.test", &[], &no_headers(), "id", None, None);
        assert!(matches!(bad_method, Err(ClientError::InvalidRequest(_))));

        let headers = HashMap::from([("bad header".to_owned(), "v".to_owned())]);
        let bad_header =
            build_request("GET", "http://example.test", &[], &headers, "id", None, None);
        assert!(matches!(bad_header, Err(ClientError::InvalidRequest(_))));
    }

    #[test]
    fn header_names_differing_in_case_are_both_kept() {
        let headers = HashMap::from([
            ("X-Tag".to_owned(), "one".to_owned()),
            ("x-tag".to_owned(), "two".to_owned()),
        ]);
        let request =
            build_request("GET", "http://example.test", &[], &headers, "id", None, None).unwrap();
        let mut values: Vec<_> = request
            .headers()
            .get_all("x-tag")
            .iter()
            .map(|value| value.to_str().unwrap())
            .collect();
        values.sort_unstable();
        assert_eq!(values, vec!["one", "two"]);
    }

    #[test]
    fn context_timeout_reaches_request() {
        let request = build_request(
            "GET",
            "http://example.test",
            &[],
            &no_headers(),
            "id",
            None,
            Some(Duration::from_millis(50)),
        )
        .unwrap();
        assert_eq!(request.timeout(), Some(&Duration::from_millis(50)));
    }

    #[test]
    fn request_id_prefers_string_context_value() {
        assert_eq!(request_id(&CallContext::with_request_id("abc")), "abc");

        let generated = request_id(&CallContext::new().with_value("id", 7));
        assert_eq!(generated.len(), 36);
        assert_ne!(generated, request_id(&CallContext::new()));
    }

    #[test]
    fn debug_lists_profile_names() {
        let client = HttpClient::new([Profile::builder("b").build(), Profile::builder("a").build()])
            .unwrap();
        let debug = format!("{client:?}");
        assert!(debug.contains("[\"a\", \"b\"]"));
    }
}
