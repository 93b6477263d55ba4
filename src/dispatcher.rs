//! Outbound connection strategies per destination.
//!
//! A [`Dispatcher`] is a reqwest client bound to one [`Route`] (direct, HTTP
//! proxy, or SOCKS5 proxy) plus a [`RetryPolicy`]. DNS answers are cached by
//! the hickory resolver inside each client. The [`DispatcherFactory`] picks
//! the route for a destination host from the proxy rules and hands out one
//! shared dispatcher per route.
//!
//! Rule syntax (`PROXY_CONFIG`): comma-separated `hostGlob:proxyURL` pairs,
//! evaluated in order, first match wins, `*` matches every host.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;
use regex::Regex;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method, Request, Response, StatusCode};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{HttpSettings, ProxySettings, RetrySettings};
use crate::error::{Error, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// HOST GLOBS
// ═══════════════════════════════════════════════════════════════════════════════

/// Glob pattern matched against a destination `host[:port]`.
///
/// Supports `*`, `**`, `?`, `[...]` / `[!...]` classes, `{a,b}` alternation
/// and `\` escapes. Matching is case-insensitive and anchored.
#[derive(Debug, Clone)]
pub struct HostGlob {
    pattern: String,
    regex: Regex,
}

impl HostGlob {
    pub fn new(pattern: &str) -> Result<Self> {
        let source = glob_to_regex(pattern)?;
        let regex = Regex::new(&source)
            .map_err(|e| Error::config_with(format!("host pattern '{pattern}' is invalid"), e))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    #[must_use]
    pub fn is_match(&self, host: &str) -> bool {
        self.regex.is_match(host)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

fn glob_to_regex(glob: &str) -> Result<String> {
    let invalid = |reason: &str| Error::config(format!("host pattern '{glob}' is invalid: {reason}"));

    let mut out = String::from("(?i)^");
    let mut chars = glob.chars().peekable();
    let mut brace_depth = 0usize;

    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    out.push_str(".*");
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push_str("[^/]"),
            '[' => {
                out.push('[');
                if matches!(chars.peek(), Some('!' | '^')) {
                    chars.next();
                    out.push('^');
                }
                let mut closed = false;
                let mut empty = true;
                for inner in chars.by_ref() {
                    if inner == ']' && !empty {
                        closed = true;
                        break;
                    }
                    empty = false;
                    if matches!(inner, '\\' | '[' | ']' | '&' | '~') {
                        out.push('\\');
                    }
                    out.push(inner);
                }
                if !closed {
                    return Err(invalid("unterminated character class"));
                }
                out.push(']');
            }
            '{' => {
                brace_depth += 1;
                out.push_str("(?:");
            }
            ',' if brace_depth > 0 => out.push('|'),
            '}' if brace_depth > 0 => {
                brace_depth -= 1;
                out.push(')');
            }
            '\\' => {
                let escaped = chars.next().ok_or_else(|| invalid("trailing escape"))?;
                out.push_str(&regex::escape(&escaped.to_string()));
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }

    if brace_depth > 0 {
        return Err(invalid("unbalanced braces"));
    }
    out.push('$');
    Ok(out)
}

/// The `host[:port]` string rules are matched against. The port only
/// appears when it is not the scheme default.
#[must_use]
pub fn match_host(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROXY RULES
// ═══════════════════════════════════════════════════════════════════════════════

/// How a request leaves the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    Direct,
    Proxy(Url),
}

impl Route {
    #[must_use]
    pub fn proxy_kind(&self) -> Option<ProxyKind> {
        match self {
            Route::Direct => None,
            Route::Proxy(url) => Some(ProxyKind::from_url(url)),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Direct => f.write_str("direct"),
            Route::Proxy(url) => write!(f, "{} proxy {}", ProxyKind::from_url(url), redact(url)),
        }
    }
}

/// Proxy URL with credentials stripped, for logs.
fn redact(url: &Url) -> String {
    let mut clean = url.clone();
    let _ = clean.set_username("");
    let _ = clean.set_password(None);
    clean.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    /// HTTP(S) proxy tunneling via `CONNECT`.
    Http,
    Socks5,
}

impl ProxyKind {
    #[must_use]
    pub fn from_url(url: &Url) -> Self {
        match url.scheme() {
            "socks5" | "socks5h" => ProxyKind::Socks5,
            _ => ProxyKind::Http,
        }
    }
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyKind::Http => f.write_str("http"),
            ProxyKind::Socks5 => f.write_str("socks5"),
        }
    }
}

/// One `hostGlob:proxyURL` rule.
#[derive(Debug, Clone)]
pub struct ProxyRule {
    /// `None` for the literal `*` default rule.
    glob: Option<HostGlob>,
    proxy: Url,
}

impl ProxyRule {
    /// Parses `hostGlob:proxyURL`, splitting at the first colon.
    pub fn parse(rule: &str) -> Result<Self> {
        let rule = rule.trim();
        let (pattern, proxy) = rule
            .split_once(':')
            .map(|(p, u)| (p.trim(), u.trim()))
            .filter(|(p, u)| !p.is_empty() && !u.is_empty())
            .ok_or_else(|| Error::config(format!("proxy rule \"{rule}\" is invalid")))?;

        let glob = if pattern == "*" {
            None
        } else {
            Some(HostGlob::new(pattern)?)
        };

        Ok(Self {
            glob,
            proxy: parse_proxy_url(proxy)?,
        })
    }

    #[must_use]
    pub fn matches(&self, host: &str) -> bool {
        self.glob.as_ref().map_or(true, |glob| glob.is_match(host))
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        self.glob.as_ref().map_or("*", HostGlob::as_str)
    }

    #[must_use]
    pub fn proxy(&self) -> &Url {
        &self.proxy
    }
}

fn parse_proxy_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| Error::config_with(format!("proxy URL '{raw}' is invalid"), e))?;
    if url.host_str().is_none() {
        return Err(Error::config(format!("proxy URL '{raw}' has no host")));
    }
    // reqwest rejects schemes it cannot tunnel through; surface that now.
    reqwest::Proxy::all(url.as_str())
        .map_err(|e| Error::config_with(format!("proxy URL '{raw}' is not supported"), e))?;
    Ok(url)
}

/// Parsed egress configuration: ordered rules, or a single global proxy.
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    rules: Vec<ProxyRule>,
    global: Option<Url>,
}

impl ProxyConfig {
    /// Direct connections only.
    #[must_use]
    pub fn direct() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &ProxySettings) -> Result<Self> {
        let rules = settings
            .rules
            .iter()
            .map(|r| ProxyRule::parse(r))
            .collect::<Result<Vec<_>>>()?;
        let global = settings.all.as_deref().map(parse_proxy_url).transpose()?;
        Ok(Self { rules, global })
    }

    /// Parses a comma-separated `PROXY_CONFIG` value.
    pub fn from_rules(rules: &str) -> Result<Self> {
        Self::from_settings(&ProxySettings {
            all: None,
            rules: rules.split(',').map(str::to_string).collect(),
        })
    }

    pub fn global(proxy: &str) -> Result<Self> {
        Ok(Self {
            rules: Vec::new(),
            global: Some(parse_proxy_url(proxy)?),
        })
    }

    #[must_use]
    pub fn rules(&self) -> &[ProxyRule] {
        &self.rules
    }

    /// Picks the route for `url`.
    ///
    /// With rules present the global proxy is ignored and a host no rule
    /// matches goes direct.
    #[must_use]
    pub fn route_for(&self, url: &Url) -> Route {
        if !self.rules.is_empty() {
            let host = match_host(url);
            return self
                .rules
                .iter()
                .find(|rule| rule.matches(&host))
                .map_or(Route::Direct, |rule| Route::Proxy(rule.proxy.clone()));
        }
        match &self.global {
            Some(proxy) => Route::Proxy(proxy.clone()),
            None => Route::Direct,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RETRY POLICY
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            min_delay: Duration::from_millis(settings.min_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            factor: settings.backoff_factor.max(1.0),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Only idempotent methods are retried.
    #[must_use]
    pub fn is_idempotent(method: &Method) -> bool {
        matches!(
            *method,
            Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE | Method::TRACE
        )
    }

    #[must_use]
    pub fn is_retryable_status(status: StatusCode) -> bool {
        matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
    }

    #[must_use]
    pub fn is_retryable_error(error: &reqwest::Error) -> bool {
        error.is_connect() || error.is_timeout() || error.is_request()
    }

    /// Delay before retry number `retry` (1-based). A server-provided
    /// `Retry-After` wins but is still capped at `max_delay`.
    #[must_use]
    pub fn delay(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(after) = retry_after {
            return after.min(self.max_delay);
        }
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = self.min_delay.as_secs_f64() * self.factor.powi(exponent);
        let jitter = if base > 0.0 {
            rand::thread_rng().gen_range(0.0..=base * 0.1)
        } else {
            0.0
        };
        Duration::try_from_secs_f64(base + jitter)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

// ═══════════════════════════════════════════════════════════════════════════════
// DISPATCHER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error("cancelled")]
    Cancelled,
}

/// Connection strategy bound to one route.
#[derive(Debug)]
pub struct Dispatcher {
    route: Route,
    client: Client,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(route: Route, http: &HttpSettings, retry: RetryPolicy) -> Result<Self> {
        let client = build_client(&route, http)?;
        Ok(Self {
            route,
            client,
            retry,
        })
    }

    #[must_use]
    pub fn route(&self) -> &Route {
        &self.route
    }

    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Sends `request`, retrying idempotent requests on transport errors and
    /// retryable statuses. No attempt starts after `cancel` fires.
    ///
    /// The final response is returned whatever its status.
    pub async fn send(
        &self,
        cancel: &CancellationToken,
        request: Request,
    ) -> std::result::Result<Response, DispatchError> {
        let max_retries = if RetryPolicy::is_idempotent(request.method()) {
            self.retry.max_retries
        } else {
            0
        };
        let mut retries = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(DispatchError::Cancelled);
            }
            // Streaming bodies cannot be replayed: single attempt.
            let Some(attempt) = request.try_clone() else {
                return self.execute(cancel, request).await;
            };

            let outcome = self.execute(cancel, attempt).await;
            let decision = match &outcome {
                Ok(response)
                    if retries < max_retries && RetryPolicy::is_retryable_status(response.status()) =>
                {
                    Some(retry_after(response.headers()))
                }
                Err(DispatchError::Transport(e))
                    if retries < max_retries && RetryPolicy::is_retryable_error(e) =>
                {
                    Some(None)
                }
                _ => None,
            };
            let Some(server_delay) = decision else {
                return outcome;
            };

            retries += 1;
            let delay = self.retry.delay(retries, server_delay);
            match &outcome {
                Ok(response) => warn!(
                    url = %request.url(),
                    status = %response.status(),
                    retry = retries,
                    max_retries,
                    ?delay,
                    "retrying after retryable status"
                ),
                Err(e) => warn!(
                    url = %request.url(),
                    error = %e,
                    retry = retries,
                    max_retries,
                    ?delay,
                    "retrying after transport error"
                ),
            }
            drop(outcome);

            tokio::select! {
                () = cancel.cancelled() => return Err(DispatchError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        request: Request,
    ) -> std::result::Result<Response, DispatchError> {
        tokio::select! {
            () = cancel.cancelled() => Err(DispatchError::Cancelled),
            result = self.client.execute(request) => result.map_err(DispatchError::Transport),
        }
    }
}

fn build_client(route: &Route, http: &HttpSettings) -> Result<Client> {
    let builder = Client::builder()
        // HTTP/2 negotiated via ALPN, HTTP/1.1 fallback
        .http2_adaptive_window(true)
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(http.pool_idle_timeout())
        .tcp_keepalive(Duration::from_secs(60))
        .tcp_nodelay(true)
        .use_rustls_tls()
        // DNS response caching
        .hickory_dns(true)
        .connect_timeout(http.connect_timeout())
        .timeout(http.request_timeout())
        .redirect(reqwest::redirect::Policy::limited(10));

    let builder = match route {
        // Routing is decided here, never by reqwest's own env lookup.
        Route::Direct => builder.no_proxy(),
        Route::Proxy(url) => {
            let proxy = reqwest::Proxy::all(url.as_str())
                .map_err(|e| Error::config_with(format!("proxy URL '{}' is not supported", redact(url)), e))?;
            builder.proxy(proxy)
        }
    };

    builder
        .build()
        .map_err(|e| Error::config_with(format!("failed to build HTTP client for {route}"), e))
}

// ═══════════════════════════════════════════════════════════════════════════════
// FACTORY
// ═══════════════════════════════════════════════════════════════════════════════

/// Builds and caches one [`Dispatcher`] per route.
#[derive(Debug)]
pub struct DispatcherFactory {
    proxy: ProxyConfig,
    http: HttpSettings,
    retry: RetryPolicy,
    dispatchers: Mutex<HashMap<Route, Arc<Dispatcher>>>,
}

impl DispatcherFactory {
    #[must_use]
    pub fn new(proxy: ProxyConfig, http: HttpSettings, retry: RetryPolicy) -> Self {
        Self {
            proxy,
            http,
            retry,
            dispatchers: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn proxy_config(&self) -> &ProxyConfig {
        &self.proxy
    }

    #[must_use]
    pub fn route_for(&self, url: &Url) -> Route {
        self.proxy.route_for(url)
    }

    /// Returns the shared dispatcher for the route `url` resolves to.
    pub fn dispatcher_for(&self, url: &Url) -> Result<Arc<Dispatcher>> {
        let route = self.route_for(url);
        debug!(host = %match_host(url), %route, "route selected");
        self.dispatcher(route)
    }

    /// Returns the shared dispatcher for `route`, building it on first use.
    pub fn dispatcher(&self, route: Route) -> Result<Arc<Dispatcher>> {
        let mut dispatchers = self.dispatchers.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = dispatchers.get(&route) {
            return Ok(Arc::clone(existing));
        }

        info!(%route, "creating dispatcher");
        let dispatcher = Arc::new(Dispatcher::new(route.clone(), &self.http, self.retry.clone())?);
        dispatchers.insert(route, Arc::clone(&dispatcher));
        Ok(dispatcher)
    }

    /// Number of distinct routes with a live dispatcher.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dispatchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn proxy(s: &str) -> Route {
        Route::Proxy(url(s))
    }

    #[test]
    fn glob_star_matches_subdomains() {
        let glob = HostGlob::new("*.example.com").unwrap();
        assert!(glob.is_match("cdn.example.com"));
        assert!(glob.is_match("a.b.example.com"));
        assert!(!glob.is_match("example.com"));
        assert!(!glob.is_match("example.com.evil.net"));
    }

    #[test]
    fn glob_question_class_and_braces() {
        assert!(HostGlob::new("s?.host.net").unwrap().is_match("s1.host.net"));
        assert!(!HostGlob::new("s?.host.net").unwrap().is_match("s12.host.net"));
        assert!(HostGlob::new("s[0-9].host.net").unwrap().is_match("s7.host.net"));
        assert!(!HostGlob::new("s[!0-9].host.net").unwrap().is_match("s7.host.net"));
        let alt = HostGlob::new("{uqload,dood}.*").unwrap();
        assert!(alt.is_match("uqload.net"));
        assert!(alt.is_match("dood.watch"));
        assert!(!alt.is_match("vidoza.net"));
    }

    #[test]
    fn glob_is_literal_for_regex_metacharacters() {
        let glob = HostGlob::new("a+b.example").unwrap();
        assert!(glob.is_match("a+b.example"));
        assert!(!glob.is_match("aab.example"));
        assert!(HostGlob::new("HOST.example").unwrap().is_match("host.example"));
    }

    #[test]
    fn glob_rejects_malformed_patterns() {
        assert!(HostGlob::new("[abc").is_err());
        assert!(HostGlob::new("{a,b").is_err());
        assert!(HostGlob::new("trailing\\").is_err());
    }

    #[test]
    fn match_host_includes_explicit_port() {
        assert_eq!(match_host(&url("https://example.com/x")), "example.com");
        assert_eq!(match_host(&url("https://example.com:443/x")), "example.com");
        assert_eq!(match_host(&url("http://127.0.0.1:8080/x")), "127.0.0.1:8080");
    }

    #[test]
    fn first_matching_rule_wins() {
        let config = ProxyConfig::from_rules(
            "*.a.example:http://p1:8080,*.example:http://p2:8080,*:socks5://p3:1080",
        )
        .unwrap();
        assert_eq!(config.route_for(&url("https://x.a.example/")), proxy("http://p1:8080"));
        assert_eq!(config.route_for(&url("https://x.b.example/")), proxy("http://p2:8080"));
    }

    #[test]
    fn later_rule_selected_when_earlier_do_not_match() {
        let config =
            ProxyConfig::from_rules("one.example:http://p1:8080,two.example:http://p2:8080").unwrap();
        assert_eq!(config.route_for(&url("https://two.example/")), proxy("http://p2:8080"));
    }

    #[test]
    fn wildcard_rule_is_default() {
        let config =
            ProxyConfig::from_rules("one.example:http://p1:8080,*:socks5://p3:1080").unwrap();
        let route = config.route_for(&url("https://anything.else/"));
        assert_eq!(route, proxy("socks5://p3:1080"));
        assert_eq!(route.proxy_kind(), Some(ProxyKind::Socks5));
    }

    #[test]
    fn no_matching_rule_goes_direct_even_with_global() {
        let config = ProxyConfig::from_settings(&ProxySettings {
            all: Some("http://global:3128".into()),
            rules: vec!["one.example:http://p1:8080".into()],
        })
        .unwrap();
        assert_eq!(config.route_for(&url("https://other.example/")), Route::Direct);
    }

    #[test]
    fn global_proxy_used_without_rules() {
        let config = ProxyConfig::global("http://global:3128").unwrap();
        let route = config.route_for(&url("https://any.example/"));
        assert_eq!(route, proxy("http://global:3128"));
        assert_eq!(route.proxy_kind(), Some(ProxyKind::Http));
        assert_eq!(ProxyConfig::direct().route_for(&url("https://any.example/")), Route::Direct);
    }

    #[test]
    fn star_covers_explicit_port() {
        let config = ProxyConfig::from_rules("127.0.0.1*:http://p1:8080").unwrap();
        assert_eq!(config.rules()[0].pattern(), "127.0.0.1*");
        assert_eq!(config.route_for(&url("http://127.0.0.1:9000/")), proxy("http://p1:8080"));
        // The first colon splits pattern from proxy, so a port cannot be spelled out.
        assert!(ProxyRule::parse("127.0.0.1:9000:http://p1:8080").is_err());
    }

    #[test]
    fn malformed_rules_are_rejected() {
        assert!(ProxyRule::parse("no-colon").is_err());
        assert!(ProxyRule::parse(":http://p1:8080").is_err());
        assert!(ProxyRule::parse("host.example:").is_err());
        assert!(ProxyRule::parse("host.example:not a url").is_err());
        assert!(ProxyConfig::from_rules("ok.example:http://p1:8080,broken").is_err());
        assert!(ProxyConfig::global("::").is_err());
    }

    #[test]
    fn empty_rule_entries_are_rejected() {
        let trailing = ProxyConfig::from_rules("a.example:http://p1:8080,").unwrap_err();
        assert_eq!(trailing.kind(), ErrorKind::Config);
        assert!(trailing.to_string().contains("proxy rule \"\" is invalid"));

        let doubled = ProxyConfig::from_rules("a.example:http://p1:8080,,*:http://p2:8080");
        assert!(doubled.is_err());
        assert!(ProxyConfig::from_settings(&ProxySettings {
            all: None,
            rules: vec!["  ".into()],
        })
        .is_err());
        assert!(ProxyConfig::from_settings(&ProxySettings::default()).is_ok());
    }

    #[test]
    fn route_display_redacts_credentials() {
        let route = proxy("http://user:secret@p1:8080");
        let shown = route.to_string();
        assert!(!shown.contains("secret"));
        assert!(shown.starts_with("http proxy"));
    }

    #[test]
    fn idempotent_methods() {
        assert!(RetryPolicy::is_idempotent(&Method::GET));
        assert!(RetryPolicy::is_idempotent(&Method::HEAD));
        assert!(!RetryPolicy::is_idempotent(&Method::POST));
        assert!(!RetryPolicy::is_idempotent(&Method::PATCH));
    }

    #[test]
    fn retry_delay_backs_off_and_caps() {
        let policy = RetryPolicy {
            max_retries: 3,
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            factor: 2.0,
        };
        let first = policy.delay(1, None);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(110));
        let second = policy.delay(2, None);
        assert!(second >= Duration::from_millis(200) && second <= Duration::from_millis(220));
        assert_eq!(policy.delay(3, None), Duration::from_millis(300));
        assert_eq!(policy.delay(1, Some(Duration::from_secs(60))), Duration::from_millis(300));
    }

    #[test]
    fn retryable_statuses() {
        assert!(RetryPolicy::is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(RetryPolicy::is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!RetryPolicy::is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!RetryPolicy::is_retryable_status(StatusCode::FORBIDDEN));
    }

    #[tokio::test]
    async fn factory_reuses_dispatcher_per_route() {
        let factory = DispatcherFactory::new(
            ProxyConfig::from_rules("*.proxied.example:http://p1:8080").unwrap(),
            HttpSettings::default(),
            RetryPolicy::default(),
        );
        let a = factory.dispatcher_for(&url("https://one.example/")).unwrap();
        let b = factory.dispatcher_for(&url("https://two.example/")).unwrap();
        let c = factory.dispatcher_for(&url("https://x.proxied.example/")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(c.route(), &proxy("http://p1:8080"));
        assert_eq!(factory.len(), 2);

        let direct = factory.dispatcher(Route::Direct).unwrap();
        assert!(Arc::ptr_eq(&a, &direct));
    }
}
