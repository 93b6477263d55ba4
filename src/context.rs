//! Per-request context threaded through every core call.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Country / language hint for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CountryCode {
    /// Content with several audio languages.
    Multi,
    De,
    En,
    Es,
    Fr,
    It,
    Mx,
}

impl CountryCode {
    pub const ALL: [CountryCode; 7] = [
        CountryCode::Multi,
        CountryCode::De,
        CountryCode::En,
        CountryCode::Es,
        CountryCode::Fr,
        CountryCode::It,
        CountryCode::Mx,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CountryCode::Multi => "multi",
            CountryCode::De => "de",
            CountryCode::En => "en",
            CountryCode::Es => "es",
            CountryCode::Fr => "fr",
            CountryCode::It => "it",
            CountryCode::Mx => "mx",
        }
    }

    /// `Accept-Language` value a browser in this locale would send.
    #[must_use]
    pub fn accept_language(self) -> &'static str {
        match self {
            CountryCode::Multi | CountryCode::En => "en-US,en;q=0.9",
            CountryCode::De => "de-DE,de;q=0.9,en;q=0.8",
            CountryCode::Es => "es-ES,es;q=0.9,en;q=0.8",
            CountryCode::Fr => "fr-FR,fr;q=0.9,en;q=0.8",
            CountryCode::It => "it-IT,it;q=0.9,en;q=0.8",
            CountryCode::Mx => "es-MX,es;q=0.9,en;q=0.8",
        }
    }
}

impl fmt::Display for CountryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CountryCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        CountryCode::ALL
            .into_iter()
            .find(|c| c.as_str() == lower)
            .ok_or_else(|| Error::config(format!("unknown country code '{s}'")))
    }
}

/// Transport overrides a request may carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportOverrides {
    /// Bypass the response cache entirely.
    pub no_cache: bool,
    /// Do not inject forwarding headers.
    pub no_proxy_headers: bool,
}

/// Immutable per-request value: correlation id, locale, cancellation, overrides.
///
/// Cloning is cheap and clones share the same cancellation signal.
#[derive(Debug, Clone)]
pub struct Context {
    id: String,
    country: CountryCode,
    client_ip: Option<IpAddr>,
    cancel: CancellationToken,
    overrides: TransportOverrides,
}

impl Context {
    #[must_use]
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    /// Correlation id used in logs and errors.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn country(&self) -> CountryCode {
        self.country
    }

    #[must_use]
    pub fn client_ip(&self) -> Option<IpAddr> {
        self.client_ip
    }

    #[must_use]
    pub fn overrides(&self) -> TransportOverrides {
        self.overrides
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fires the cancellation signal for this request and all its clones.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resolves once the request is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Returns `Err(Cancelled)` if the signal already fired.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled {
                request_id: self.id.clone(),
            });
        }
        Ok(())
    }

    /// Checks invariants the core relies on.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidContext("correlation id is empty".into()));
        }
        Ok(())
    }
}

/// Builder for [`Context`]; the only way to create one.
#[derive(Debug, Default)]
pub struct ContextBuilder {
    id: Option<String>,
    country: Option<CountryCode>,
    client_ip: Option<IpAddr>,
    cancel: Option<CancellationToken>,
    overrides: TransportOverrides,
}

impl ContextBuilder {
    /// Correlation id; a random UUID is used when unset.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn country(mut self, country: CountryCode) -> Self {
        self.country = Some(country);
        self
    }

    #[must_use]
    pub fn client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    /// Ties the context to an existing cancellation token.
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    #[must_use]
    pub fn no_cache(mut self, value: bool) -> Self {
        self.overrides.no_cache = value;
        self
    }

    #[must_use]
    pub fn no_proxy_headers(mut self, value: bool) -> Self {
        self.overrides.no_proxy_headers = value;
        self
    }

    #[must_use]
    pub fn build(self) -> Context {
        Context {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            country: self.country.unwrap_or(CountryCode::En),
            client_ip: self.client_ip,
            cancel: self.cancel.unwrap_or_default(),
            overrides: self.overrides,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let ctx = Context::builder().build();
        assert!(Uuid::parse_str(ctx.id()).is_ok());
        assert_eq!(ctx.country(), CountryCode::En);
        assert_eq!(ctx.overrides(), TransportOverrides::default());
        assert!(ctx.validate().is_ok());
    }

    #[test]
    fn clones_share_cancellation() {
        let ctx = Context::builder().id("req-1").build();
        let clone = ctx.clone();
        assert!(clone.check_cancelled().is_ok());
        ctx.cancel();
        assert!(clone.is_cancelled());
        let err = clone.check_cancelled().unwrap_err();
        assert_eq!(err.request_id(), Some("req-1"));
    }

    #[test]
    fn empty_id_is_invalid() {
        let ctx = Context::builder().id("  ").build();
        assert!(matches!(ctx.validate(), Err(Error::InvalidContext(_))));
    }

    #[test]
    fn country_code_parsing() {
        assert_eq!("DE".parse::<CountryCode>().unwrap(), CountryCode::De);
        assert_eq!(" multi ".parse::<CountryCode>().unwrap(), CountryCode::Multi);
        assert!("xx".parse::<CountryCode>().is_err());
    }
}
