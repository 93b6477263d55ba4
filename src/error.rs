//! Error taxonomy shared by the transport, extraction, and resolution layers.
//!
//! Every variant that crosses the fetcher boundary keeps the low-level cause
//! as an `Arc`, so a single failed network call can be handed to every
//! caller that was waiting on it.

use std::fmt;
use std::sync::Arc;

use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

/// Shareable low-level cause attached to an [`Error`].
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Config,
    Transport,
    Http,
    Decode,
    Cancelled,
    NotSupported,
    Extraction,
    InvalidContext,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Config => "config",
            ErrorKind::Transport => "transport",
            ErrorKind::Http => "http",
            ErrorKind::Decode => "decode",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::NotSupported => "not_supported",
            ErrorKind::Extraction => "extraction",
            ErrorKind::InvalidContext => "invalid_context",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Malformed proxy rule, proxy URL, or other startup configuration.
    #[error("invalid configuration: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Cause>,
    },

    /// DNS failure, refused connection, timeout, or broken body after retries.
    #[error("[{request_id}] fetching {url} failed")]
    Transport {
        request_id: String,
        url: Url,
        #[source]
        source: Cause,
    },

    /// The upstream answered with a non-success status.
    #[error("[{request_id}] {url} responded with HTTP {status}")]
    Http {
        request_id: String,
        url: Url,
        status: StatusCode,
    },

    /// A successful response whose body is not what the caller expected.
    #[error("[{request_id}] response body of {url} could not be decoded")]
    Decode {
        request_id: String,
        url: Url,
        #[source]
        source: Cause,
    },

    #[error("[{request_id}] request was cancelled")]
    Cancelled { request_id: String },

    /// No registered extractor claims the URL.
    #[error("no extractor supports {url}")]
    NotSupported { url: Url },

    #[error("{extractor} failed to extract {url}: {message}")]
    Extraction {
        extractor: String,
        url: Url,
        message: String,
        #[source]
        source: Option<Cause>,
    },

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Config {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Extraction failure without an underlying cause (content missing, markup changed).
    pub fn extraction(extractor: impl Into<String>, url: &Url, message: impl Into<String>) -> Self {
        Error::Extraction {
            extractor: extractor.into(),
            url: url.clone(),
            message: message.into(),
            source: None,
        }
    }

    /// Wraps a lower-level error as an extraction failure, keeping it as the cause.
    ///
    /// Errors that already carry a transport or cancellation meaning are
    /// passed through unchanged so callers still see the original kind.
    pub fn into_extraction(self, extractor: impl Into<String>, url: &Url) -> Self {
        match self {
            Error::Transport { .. } | Error::Http { .. } | Error::Cancelled { .. } => self,
            other => Error::Extraction {
                extractor: extractor.into(),
                url: url.clone(),
                message: other.to_string(),
                source: Some(Arc::new(other)),
            },
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config { .. } => ErrorKind::Config,
            Error::Transport { .. } => ErrorKind::Transport,
            Error::Http { .. } => ErrorKind::Http,
            Error::Decode { .. } => ErrorKind::Decode,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
            Error::NotSupported { .. } => ErrorKind::NotSupported,
            Error::Extraction { .. } => ErrorKind::Extraction,
            Error::InvalidContext(_) => ErrorKind::InvalidContext,
        }
    }

    /// URL the failure refers to, if any.
    #[must_use]
    pub fn url(&self) -> Option<&Url> {
        match self {
            Error::Transport { url, .. }
            | Error::Http { url, .. }
            | Error::Decode { url, .. }
            | Error::NotSupported { url }
            | Error::Extraction { url, .. } => Some(url),
            _ => None,
        }
    }

    /// Correlation id of the request that failed, if any.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Error::Transport { request_id, .. }
            | Error::Http { request_id, .. }
            | Error::Decode { request_id, .. }
            | Error::Cancelled { request_id } => Some(request_id),
            _ => None,
        }
    }

    /// Renders the error followed by its cause chain, for logs.
    #[must_use]
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut current = std::error::Error::source(self);
        while let Some(cause) = current {
            out.push_str(": ");
            out.push_str(&cause.to_string());
            current = cause.source();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("https://host.example/embed-1.html").unwrap()
    }

    #[test]
    fn not_supported_carries_url() {
        let err = Error::NotSupported { url: url() };
        assert_eq!(err.kind(), ErrorKind::NotSupported);
        assert_eq!(err.url(), Some(&url()));
        assert!(err.to_string().contains("host.example/embed-1.html"));
    }

    #[test]
    fn into_extraction_keeps_transport_kind() {
        let err = Error::Cancelled {
            request_id: "abc".into(),
        };
        let wrapped = err.into_extraction("uqload", &url());
        assert_eq!(wrapped.kind(), ErrorKind::Cancelled);
        assert_eq!(wrapped.request_id(), Some("abc"));
    }

    #[test]
    fn into_extraction_wraps_other_kinds_as_cause() {
        let err = Error::InvalidContext("bad".into());
        let wrapped = err.into_extraction("uqload", &url());
        assert_eq!(wrapped.kind(), ErrorKind::Extraction);
        assert!(std::error::Error::source(&wrapped).is_some());
        assert!(wrapped.chain().contains("invalid context: bad"));
    }

    #[test]
    fn config_with_exposes_source() {
        let parse_err = Url::parse("::nope").unwrap_err();
        let err = Error::config_with("proxy URL is invalid", parse_err);
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(std::error::Error::source(&err).is_some());
    }
}
