//! The single HTTP access point.
//!
//! Features:
//! - Per-route dispatchers (direct / HTTP proxy / SOCKS5) with retry
//! - Bounded response cache with TTL
//! - Single-flight: concurrent identical requests share one network call
//! - Browser header profile, forwarding headers from the request context
//! - Errors carry the cause, the URL, and the request's correlation id

use std::collections::HashMap;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, FORWARDED, REFERER};
use reqwest::{Method, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::{CacheSettings, Config, HttpSettings};
use crate::context::Context;
use crate::dispatcher::{DispatchError, Dispatcher, DispatcherFactory, RetryPolicy, Route};
use crate::error::{Cause, Error, Result};
use crate::fingerprint::{random_profile, BrowserProfile};
use crate::stream::normalize_url;

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Bypass the cache for reading and writing; never shared with other calls.
    pub no_cache: bool,
    /// Do not add `X-Forwarded-For` / `Forwarded`.
    pub no_proxy_headers: bool,
    /// Connect directly, ignoring proxy rules.
    pub direct: bool,
    pub method: Method,
    pub body: Option<Bytes>,
    /// Extra request headers; part of the cache key.
    pub headers: Vec<(String, String)>,
}

impl FetchOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn no_cache(mut self) -> Self {
        self.no_cache = true;
        self
    }

    #[must_use]
    pub fn no_proxy_headers(mut self) -> Self {
        self.no_proxy_headers = true;
        self
    }

    #[must_use]
    pub fn direct(mut self) -> Self {
        self.direct = true;
        self
    }

    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn referer(self, referer: &Url) -> Self {
        self.header(REFERER.as_str(), referer.as_str())
    }
}

/// A fully read response.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    /// URL after redirects.
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FetchResponse {
    /// Body decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CACHE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
    no_proxy_headers: bool,
    direct: bool,
}

impl CacheKey {
    fn new(url: &Url, options: &FetchOptions, no_proxy_headers: bool) -> Self {
        let mut headers: Vec<_> = options
            .headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.clone()))
            .collect();
        headers.sort();
        Self {
            method: options.method.clone(),
            url: normalize_url(url),
            headers,
            body: options.body.clone(),
            no_proxy_headers,
            direct: options.direct,
        }
    }
}

/// Failure of the shared network call, before it is attributed to a caller.
#[derive(Debug, Clone)]
enum Failure {
    Transport(Cause),
    Status(StatusCode),
    Cancelled,
}

impl From<DispatchError> for Failure {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Transport(e) => Failure::Transport(Arc::new(e)),
            DispatchError::Cancelled => Failure::Cancelled,
        }
    }
}

impl Failure {
    fn into_error(self, request_id: &str, url: &Url) -> Error {
        match self {
            Failure::Transport(source) => Error::Transport {
                request_id: request_id.to_string(),
                url: url.clone(),
                source,
            },
            Failure::Status(status) => Error::Http {
                request_id: request_id.to_string(),
                url: url.clone(),
                status,
            },
            Failure::Cancelled => Error::Cancelled {
                request_id: request_id.to_string(),
            },
        }
    }
}

#[derive(Error, Debug)]
#[error("response body exceeds {limit} bytes")]
struct BodyTooLarge {
    limit: usize,
}

type FetchOutcome = std::result::Result<FetchResponse, Failure>;
type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

struct CachedResponse {
    response: FetchResponse,
    expires_at: Instant,
}

/// Completed responses live in the bounded LRU. In-flight fetches have their
/// own table so eviction can never split one key into two network calls.
struct CacheState {
    ready: LruCache<CacheKey, CachedResponse>,
    in_flight: HashMap<CacheKey, SharedFetch>,
}

impl CacheState {
    fn new(capacity: NonZeroUsize) -> Self {
        Self {
            ready: LruCache::new(capacity),
            in_flight: HashMap::new(),
        }
    }

    fn len(&self) -> usize {
        self.ready.len() + self.in_flight.len()
    }
}

type ResponseCache = Arc<Mutex<CacheState>>;

// ═══════════════════════════════════════════════════════════════════════════════
// FETCHER
// ═══════════════════════════════════════════════════════════════════════════════

/// Shared HTTP access point. Cloning is cheap and clones share the cache.
#[derive(Clone)]
pub struct Fetcher {
    factory: Arc<DispatcherFactory>,
    cache: ResponseCache,
    ttl: Duration,
    max_body_bytes: usize,
    profile: Arc<BrowserProfile>,
}

impl Fetcher {
    /// Builds a fetcher from configuration. Fails on an invalid proxy rule set.
    pub fn new(config: &Config) -> Result<Self> {
        let factory = DispatcherFactory::new(
            config.proxy_config()?,
            config.http.clone(),
            RetryPolicy::from(&config.retry),
        );
        Ok(Self::with_factory(factory, &config.cache, &config.http))
    }

    #[must_use]
    pub fn with_factory(factory: DispatcherFactory, cache: &CacheSettings, http: &HttpSettings) -> Self {
        let capacity = NonZeroUsize::new(cache.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            factory: Arc::new(factory),
            cache: Arc::new(Mutex::new(CacheState::new(capacity))),
            ttl: cache.ttl(),
            max_body_bytes: http.max_body_bytes,
            profile: Arc::new(random_profile()),
        }
    }

    #[must_use]
    pub fn factory(&self) -> &DispatcherFactory {
        &self.factory
    }

    /// Fetches `url`, deduplicating and caching unless `no_cache` is set on
    /// the options or the context.
    #[instrument(skip_all, fields(id = %ctx.id(), url = %url))]
    pub async fn fetch(&self, ctx: &Context, url: &Url, options: &FetchOptions) -> Result<FetchResponse> {
        ctx.check_cancelled()?;

        let overrides = ctx.overrides();
        let no_cache = options.no_cache || overrides.no_cache;
        let no_proxy_headers = options.no_proxy_headers || overrides.no_proxy_headers;
        let request = self.build_request(ctx, url, options, no_proxy_headers);

        if no_cache {
            debug!("fetching without cache");
            let dispatcher = self.dispatcher(url, options)?;
            return perform(dispatcher, ctx.cancellation().clone(), request, self.max_body_bytes)
                .await
                .map_err(|failure| failure.into_error(ctx.id(), url));
        }

        let key = CacheKey::new(url, options, no_proxy_headers);
        let shared = {
            let mut cache = self.cache.lock().await;
            match cache.ready.get(&key) {
                Some(cached) if cached.expires_at > Instant::now() => {
                    debug!("cache hit");
                    return Ok(cached.response.clone());
                }
                Some(_) => {
                    cache.ready.pop(&key);
                }
                None => {}
            }

            if let Some(shared) = cache.in_flight.get(&key) {
                debug!("joining in-flight fetch");
                shared.clone()
            } else {
                // Registered under the same lock that saw the miss, so no
                // concurrent caller can start a duplicate.
                let dispatcher = self.dispatcher(url, options)?;
                let shared = self.start_shared(key.clone(), dispatcher, request);
                cache.in_flight.insert(key, shared.clone());
                shared
            }
        };

        tokio::select! {
            () = ctx.cancelled() => Err(Error::Cancelled { request_id: ctx.id().to_string() }),
            outcome = shared => outcome.map_err(|failure| failure.into_error(ctx.id(), url)),
        }
    }

    pub async fn text(&self, ctx: &Context, url: &Url, options: &FetchOptions) -> Result<String> {
        Ok(self.fetch(ctx, url, options).await?.text())
    }

    pub async fn json<T: DeserializeOwned>(
        &self,
        ctx: &Context,
        url: &Url,
        options: &FetchOptions,
    ) -> Result<T> {
        let response = self.fetch(ctx, url, options).await?;
        serde_json::from_slice(&response.body).map_err(|e| Error::Decode {
            request_id: ctx.id().to_string(),
            url: url.clone(),
            source: Arc::new(e),
        })
    }

    /// Drops every completed response. In-flight fetches are left alone and
    /// can still be joined.
    pub async fn clear_cache(&self) {
        self.cache.lock().await.ready.clear();
    }

    /// Number of cache entries, in flight or completed.
    pub async fn cached_entries(&self) -> usize {
        self.cache.lock().await.len()
    }

    fn dispatcher(&self, url: &Url, options: &FetchOptions) -> Result<Arc<Dispatcher>> {
        if options.direct {
            self.factory.dispatcher(Route::Direct)
        } else {
            self.factory.dispatcher_for(url)
        }
    }

    fn start_shared(&self, key: CacheKey, dispatcher: Arc<Dispatcher>, request: Request) -> SharedFetch {
        let cache = Arc::clone(&self.cache);
        let ttl = self.ttl;
        let max_body_bytes = self.max_body_bytes;

        // The shared call is not tied to any one caller's cancellation: a
        // waiter that gives up must not fail the others.
        let fetch = async move {
            let outcome = perform(dispatcher, CancellationToken::new(), request, max_body_bytes).await;
            let mut cache = cache.lock().await;
            cache.in_flight.remove(&key);
            if let Ok(response) = &outcome {
                if !ttl.is_zero() {
                    cache.ready.put(
                        key,
                        CachedResponse {
                            response: response.clone(),
                            expires_at: Instant::now() + ttl,
                        },
                    );
                }
            }
            outcome
        };

        fetch.boxed().shared()
    }

    fn build_request(
        &self,
        ctx: &Context,
        url: &Url,
        options: &FetchOptions,
        no_proxy_headers: bool,
    ) -> Request {
        let mut headers = self.profile.to_headers(ctx.country());

        if !no_proxy_headers {
            if let Some(ip) = ctx.client_ip() {
                insert_forwarding_headers(&mut headers, ip);
            }
        }

        for (name, value) in &options.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(header = %name, "skipping invalid request header"),
            }
        }

        let mut request = Request::new(options.method.clone(), url.clone());
        *request.headers_mut() = headers;
        if let Some(body) = &options.body {
            *request.body_mut() = Some(body.clone().into());
        }
        request
    }
}

fn insert_forwarding_headers(headers: &mut HeaderMap, ip: IpAddr) {
    let forwarded = match ip {
        IpAddr::V4(v4) => format!("for={v4}"),
        IpAddr::V6(v6) => format!("for=\"[{v6}]\""),
    };
    if let Ok(value) = HeaderValue::from_str(&ip.to_string()) {
        headers.insert("X-Forwarded-For", value);
    }
    if let Ok(value) = HeaderValue::from_str(&forwarded) {
        headers.insert(FORWARDED, value);
    }
}

async fn perform(
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
    request: Request,
    max_body_bytes: usize,
) -> FetchOutcome {
    let response = dispatcher.send(&cancel, request).await?;
    let status = response.status();
    if !status.is_success() {
        debug!(%status, url = %response.url(), "unsuccessful response");
        return Err(Failure::Status(status));
    }

    let url = response.url().clone();
    let headers = response.headers().clone();
    let body = read_body(response, &cancel, max_body_bytes).await?;
    Ok(FetchResponse {
        status,
        url,
        headers,
        body,
    })
}

async fn read_body(
    mut response: Response,
    cancel: &CancellationToken,
    limit: usize,
) -> std::result::Result<Bytes, Failure> {
    let too_large = || Failure::Transport(Arc::new(BodyTooLarge { limit }));

    let declared = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(too_large());
    }

    let mut body = BytesMut::with_capacity(declared.unwrap_or(0));
    loop {
        let chunk = tokio::select! {
            () = cancel.cancelled() => return Err(Failure::Cancelled),
            chunk = response.chunk() => chunk.map_err(|e| Failure::Transport(Arc::new(e)))?,
        };
        let Some(chunk) = chunk else {
            break;
        };
        if body.len() + chunk.len() > limit {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn cache_key_normalizes_url_and_header_order() {
        let a = CacheKey::new(
            &url("https://Host.example/page#frag"),
            &FetchOptions::new().header("X-B", "2").header("x-a", "1"),
            false,
        );
        let b = CacheKey::new(
            &url("https://host.example/page"),
            &FetchOptions::new().header("X-A", "1").header("x-b", "2"),
            false,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn cache_key_separates_method_body_and_flags() {
        let page = url("https://host.example/page");
        let get = CacheKey::new(&page, &FetchOptions::new(), false);
        let post = CacheKey::new(&page, &FetchOptions::new().method(Method::POST).body("a=1"), false);
        let bare = CacheKey::new(&page, &FetchOptions::new(), true);
        assert_ne!(get, post);
        assert_ne!(get, bare);
    }

    #[test]
    fn forwarding_headers_for_ipv6_are_quoted() {
        let mut headers = HeaderMap::new();
        insert_forwarding_headers(&mut headers, "2001:db8::1".parse().unwrap());
        assert_eq!(headers["X-Forwarded-For"], "2001:db8::1");
        assert_eq!(headers[FORWARDED], "for=\"[2001:db8::1]\"");
    }

    #[test]
    fn failure_is_attributed_to_caller() {
        let err = Failure::Status(StatusCode::NOT_FOUND).into_error("req-9", &url("https://h.example/"));
        assert_eq!(err.request_id(), Some("req-9"));
        assert!(matches!(err, Error::Http { status, .. } if status == StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn cancelled_context_fails_before_network() {
        let fetcher = Fetcher::new(&Config::default()).unwrap();
        let ctx = Context::builder().id("req-1").build();
        ctx.cancel();
        let err = fetcher
            .fetch(&ctx, &url("http://127.0.0.1:9/"), &FetchOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
        assert_eq!(fetcher.cached_entries().await, 0);
    }
}
