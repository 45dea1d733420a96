use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::sink::BodySink;
use crate::transport::RawOptionValue;
use crate::util::set_header;

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_millis(6144);
pub(crate) const DEFAULT_RETRIES: usize = 3;
pub(crate) const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(256);
pub(crate) const DEFAULT_MAX_REDIRECTS: u32 = 4;

/// Statuses treated as a failed outcome for retry purposes even though the
/// transport completed. Callers can replace the set or override the predicate
/// entirely with [`RequestConfigBuilder::is_bad_status`].
pub(crate) fn default_bad_statuses() -> BTreeSet<u16> {
    [
        300_u16, 303, 305, 400, 407, 408, 409, 410, 500, 502, 503, 504, 510,
    ]
    .into_iter()
    .collect()
}

type BadStatusFn = dyn Fn(u16, &BTreeSet<u16>) -> bool + Send + Sync;

/// Request payload. JSON payloads are captured as a structured value and
/// serialized at attempt time; a value that cannot be captured is carried as
/// `InvalidJson` so the failure surfaces through the completion callback
/// (status 400) instead of panicking at build time.
#[derive(Clone, Debug)]
pub enum Payload {
    None,
    Json(serde_json::Value),
    InvalidJson(String),
    Form(Vec<(String, String)>),
    Raw {
        content_type: Option<String>,
        body: Bytes,
    },
}

/// Immutable-after-construction description of one logical request.
///
/// The URL is kept as the caller supplied it; validation happens once at
/// [`Client::request`](crate::Client::request) time so that an unparseable
/// URL surfaces through the completion callback rather than a build error.
pub struct RequestConfig {
    pub(crate) url: String,
    pub(crate) method: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) payload: Payload,
    pub(crate) timeout: Duration,
    pub(crate) retries: usize,
    pub(crate) retry: bool,
    pub(crate) retry_delay: Duration,
    pub(crate) max_redirects: u32,
    pub(crate) follow_redirect: bool,
    pub(crate) reject_unauthorized: bool,
    pub(crate) reject_unauthorized_proxy: bool,
    pub(crate) proxy: Option<String>,
    pub(crate) keep_alive: bool,
    pub(crate) no_store: bool,
    pub(crate) bad_statuses: BTreeSet<u16>,
    pub(crate) is_bad_status: Option<Arc<BadStatusFn>>,
    pub(crate) raw_options: BTreeMap<String, RawOptionValue>,
    pub(crate) sinks: Vec<Box<dyn BodySink>>,
    pub(crate) wait: bool,
    pub(crate) debug: bool,
}

impl RequestConfig {
    pub fn builder(url: impl Into<String>) -> RequestConfigBuilder {
        RequestConfigBuilder::new(url)
    }

    /// Retries actually available: `retry: false` disables them outright.
    pub(crate) fn effective_retries(&self) -> usize {
        if self.retry { self.retries } else { 0 }
    }

    /// Overall deadline covering the full attempt+retry budget.
    pub(crate) fn overall_deadline(&self) -> Duration {
        (self.timeout + self.retry_delay) * (self.retries as u32 + 1)
    }

    pub(crate) fn check_bad_status(&self, status: u16) -> bool {
        match &self.is_bad_status {
            Some(predicate) => predicate(status, &self.bad_statuses),
            None => self.bad_statuses.contains(&status),
        }
    }
}

impl std::fmt::Debug for RequestConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RequestConfig")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("retry", &self.retry)
            .field("retry_delay", &self.retry_delay)
            .field("max_redirects", &self.max_redirects)
            .field("follow_redirect", &self.follow_redirect)
            .field("proxy", &self.proxy)
            .field("bad_statuses", &self.bad_statuses)
            .field("wait", &self.wait)
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

pub struct RequestConfigBuilder {
    config: RequestConfig,
}

impl RequestConfigBuilder {
    fn new(url: impl Into<String>) -> Self {
        Self {
            config: RequestConfig {
                url: url.into(),
                method: "GET".to_owned(),
                headers: Vec::new(),
                payload: Payload::None,
                timeout: DEFAULT_TIMEOUT,
                retries: DEFAULT_RETRIES,
                retry: true,
                retry_delay: DEFAULT_RETRY_DELAY,
                max_redirects: DEFAULT_MAX_REDIRECTS,
                follow_redirect: true,
                reject_unauthorized: false,
                reject_unauthorized_proxy: false,
                proxy: None,
                keep_alive: true,
                no_store: false,
                bad_statuses: default_bad_statuses(),
                is_bad_status: None,
                raw_options: BTreeMap::new(),
                sinks: Vec::new(),
                wait: false,
                debug: false,
            },
        }
    }

    /// Request method; normalized to uppercase when the request is built.
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.config.method = method.into();
        self
    }

    /// Case-insensitive last-write-wins on duplicate names.
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        set_header(&mut self.config.headers, name.as_ref(), value.into());
        self
    }

    pub fn json<T: serde::Serialize>(mut self, value: &T) -> Self {
        self.config.payload = match serde_json::to_value(value) {
            Ok(value) => Payload::Json(value),
            Err(source) => Payload::InvalidJson(source.to_string()),
        };
        self
    }

    pub fn form(mut self, pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        self.config.payload = Payload::Form(pairs.into_iter().collect());
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>, content_type: Option<String>) -> Self {
        self.config.payload = Payload::Raw {
            content_type,
            body: body.into(),
        };
        self
    }

    /// Per-attempt time budget.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout.max(Duration::from_millis(1));
        self
    }

    pub fn retries(mut self, retries: usize) -> Self {
        self.config.retries = retries;
        self
    }

    pub fn retry(mut self, retry: bool) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.config.retry_delay = retry_delay.max(Duration::from_millis(1));
        self
    }

    pub fn max_redirects(mut self, max_redirects: u32) -> Self {
        self.config.max_redirects = max_redirects;
        self
    }

    pub fn follow_redirect(mut self, follow_redirect: bool) -> Self {
        self.config.follow_redirect = follow_redirect;
        self
    }

    pub fn reject_unauthorized(mut self, reject_unauthorized: bool) -> Self {
        self.config.reject_unauthorized = reject_unauthorized;
        self
    }

    pub fn reject_unauthorized_proxy(mut self, reject_unauthorized_proxy: bool) -> Self {
        self.config.reject_unauthorized_proxy = reject_unauthorized_proxy;
        self
    }

    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.config.proxy = Some(proxy.into());
        self
    }

    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.config.keep_alive = keep_alive;
        self
    }

    pub fn no_store(mut self, no_store: bool) -> Self {
        self.config.no_store = no_store;
        self
    }

    pub fn bad_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.config.bad_statuses = statuses.into_iter().collect();
        self
    }

    /// Replace the bad-status predicate. Receives the status and the
    /// configured set.
    pub fn is_bad_status(
        mut self,
        predicate: impl Fn(u16, &BTreeSet<u16>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.config.is_bad_status = Some(Arc::new(predicate));
        self
    }

    /// Opaque transport option override; an invalid one fails the attempt
    /// that carries it with status 500.
    pub fn raw_option(mut self, name: impl Into<String>, value: RawOptionValue) -> Self {
        self.config.raw_options.insert(name.into(), value);
        self
    }

    /// Registers a consumer sink for the response body. Sinks registered
    /// here are in place before the request is sent, so they work for
    /// requests that send immediately as well as deferred ones.
    pub fn pipe_to(mut self, sink: impl BodySink + 'static) -> Self {
        self.config.sinks.push(Box::new(sink));
        self
    }

    /// Defer sending until [`RequestHandle::send`](crate::RequestHandle::send)
    /// is called, leaving room to register sinks and observers.
    pub fn wait(mut self, wait: bool) -> Self {
        self.config.wait = wait;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    pub fn build(self) -> RequestConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::RequestConfig;

    #[test]
    fn defaults_match_documented_values() {
        let config = RequestConfig::builder("https://example.test/x").build();

        assert_eq!(config.method, "GET");
        assert_eq!(config.timeout, Duration::from_millis(6144));
        assert_eq!(config.retries, 3);
        assert!(config.retry);
        assert_eq!(config.retry_delay, Duration::from_millis(256));
        assert_eq!(config.max_redirects, 4);
        assert!(config.follow_redirect);
        assert!(!config.reject_unauthorized);
        assert!(config.bad_statuses.contains(&510));
        assert!(!config.bad_statuses.contains(&200));
        assert!(!config.wait);
    }

    #[test]
    fn header_duplicates_are_last_write_wins_case_insensitive() {
        let config = RequestConfig::builder("https://example.test/x")
            .header("Content-Type", "text/plain")
            .header("content-type", "application/json")
            .build();

        assert_eq!(config.headers.len(), 1);
        assert_eq!(config.headers[0].1, "application/json");
    }

    #[test]
    fn retry_flag_disables_retries_without_touching_the_count() {
        let config = RequestConfig::builder("https://example.test/x")
            .retries(5)
            .retry(false)
            .build();

        assert_eq!(config.retries, 5);
        assert_eq!(config.effective_retries(), 0);
    }

    #[test]
    fn overall_deadline_covers_full_attempt_and_retry_budget() {
        let config = RequestConfig::builder("https://example.test/x")
            .timeout(Duration::from_millis(50))
            .retry_delay(Duration::from_millis(10))
            .retries(2)
            .build();

        assert_eq!(config.overall_deadline(), Duration::from_millis(180));
    }

    #[test]
    fn bad_status_predicate_override_takes_precedence_over_the_set() {
        let config = RequestConfig::builder("https://example.test/x")
            .is_bad_status(|status, _set| status == 418)
            .build();

        assert!(config.check_bad_status(418));
        assert!(!config.check_bad_status(500));
    }
}
