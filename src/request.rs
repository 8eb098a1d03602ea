use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;

use crate::defaults::ID_PARAM;
use crate::options::ConfigMap;

/// Correlation values and cancellation bound carried by one call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CallContext {
    values: ConfigMap,
    timeout: Option<Duration>,
}

impl CallContext {
    /// Empty context; the dispatcher generates a correlation id.
    pub fn new() -> Self {
        Self::default()
    }

    /// Context carrying `id` as the correlation id.
    pub fn with_request_id(id: impl Into<String>) -> Self {
        Self::new().with_value(ID_PARAM, id.into())
    }

    /// Stores a value under `key`.
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Per-attempt timeout applied by standard transports.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Value stored under `key`.
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Per-attempt timeout, if set.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The caller-supplied correlation id, when present and a string.
    pub fn request_id(&self) -> Option<&str> {
        self.values.get(ID_PARAM).and_then(Value::as_str)
    }
}

/// Description of one outbound call against a registered profile.
///
/// Unset method and URL fall back to the profile. Headers replace the
/// profile's static headers entirely when set. Consumed by
/// [`HttpClient::execute`](crate::HttpClient::execute).
#[derive(Debug, Default)]
pub struct CallRequest {
    pub(crate) name: String,
    pub(crate) method: Option<String>,
    pub(crate) url: Option<String>,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) headers: Option<HashMap<String, String>>,
    pub(crate) body: Option<reqwest::Body>,
    pub(crate) context: CallContext,
}

impl CallRequest {
    /// Creates a call against the profile registered as `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Overrides the profile method; an empty value keeps the profile's.
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into()).filter(|method| !method.is_empty());
        self
    }

    /// Overrides the profile URL; an empty value keeps the profile's.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into()).filter(|url| !url.is_empty());
        self
    }

    /// Appends a query parameter to the URL's existing query.
    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Appends several query parameters in order.
    pub fn with_query_params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(params.into_iter().map(|(key, value)| (key.into(), value.into())));
        self
    }

    /// Replaces all call headers. The profile's static headers are then
    /// not applied.
    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers = Some(
            headers
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        );
        self
    }

    /// Adds one call header. Like [`CallRequest::with_headers`], this
    /// suppresses the profile's static headers.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Sets the request body. Streaming bodies allow a single attempt.
    pub fn with_body(mut self, body: impl Into<reqwest::Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Attaches the correlation context.
    pub fn with_context(mut self, context: CallContext) -> Self {
        self.context = context;
        self
    }

    /// Profile this call targets.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Correlation context of the call.
    pub fn context(&self) -> &CallContext {
        &self.context
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn empty_overrides_are_ignored() {
        let call = CallRequest::new("p").with_method("").with_url("");
        assert!(call.method.is_none());
        assert!(call.url.is_none());
    }

    #[test]
    fn single_header_creates_call_headers() {
        let call = CallRequest::new("p").with_header("x", "y");
        assert_eq!(
            call.headers.as_ref().map(|headers| headers["x"].as_str()),
            Some("y")
        );
    }

    #[test]
    fn query_params_keep_order() {
        let call = CallRequest::new("p")
            .with_query_param("b", "2")
            .with_query_params([("a", "1")]);
        assert_eq!(
            call.query,
            vec![("b".to_owned(), "2".to_owned()), ("a".to_owned(), "1".to_owned())]
        );
    }

    #[test]
    fn request_id_requires_string_value() {
        assert_eq!(
            CallContext::with_request_id("abc").request_id(),
            Some("abc")
        );
        assert_eq!(CallContext::new().with_value("id", 42).request_id(), None);
        assert_eq!(
            CallContext::new().with_value("id", json!({"v": 1})).request_id(),
            None
        );
    }
}
