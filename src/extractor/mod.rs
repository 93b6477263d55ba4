//! Hosting-site extractors.
//!
//! Turns a hosting-page URL into direct, playable streams.
//!
//! # Architecture
//!
//! - [`Extractor`]: Async trait, one implementation per hosting site
//! - [`ExtractorRegistry`]: Dispatches a URL to the first extractor that claims it
//!
//! # Example
//!
//! ```rust,no_run
//! use streamr::config::Config;
//! use streamr::extractor::ExtractorRegistry;
//! use streamr::{Context, CountryCode, Fetcher};
//!
//! # async fn example() -> streamr::Result<()> {
//! let config = Config::default();
//! let fetcher = Fetcher::new(&config)?;
//! let registry = ExtractorRegistry::with_defaults(&fetcher, &config)?;
//!
//! let ctx = Context::builder().country(CountryCode::Fr).build();
//! let url = url::Url::parse("https://uqload.net/embed-z0xbr87oz637.html").unwrap();
//! for stream in &registry.handle(&ctx, &url, CountryCode::Fr).await? {
//!     println!("{}", stream.url);
//! }
//! # Ok(())
//! # }
//! ```

pub mod direct;
pub mod uqload;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::Config;
use crate::context::{Context, CountryCode};
use crate::error::{Error, Result};
use crate::fetcher::Fetcher;
use crate::plugin;
use crate::stream::StreamSet;

pub use direct::DirectMedia;
pub use uqload::Uqload;

/// Extracts playable streams from one hosting site.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Short lowercase id, used as the stream origin (e.g. `"uqload"`).
    fn id(&self) -> &str;

    /// Display name.
    fn label(&self) -> &str {
        self.id()
    }

    /// Check if this extractor handles the given URL.
    fn matches(&self, url: &Url) -> bool;

    /// Canonical form of a matched URL (e.g. mirror domain → main domain).
    fn normalize(&self, url: &Url) -> Url {
        url.clone()
    }

    async fn extract(&self, ctx: &Context, url: &Url, country: CountryCode) -> Result<StreamSet>;
}

/// Routes URLs to extractors.
///
/// Extractors are checked in registration order. First match wins and
/// exactly one extractor runs per call.
pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    #[must_use]
    pub fn new(extractors: Vec<Arc<dyn Extractor>>) -> Self {
        Self { extractors }
    }

    /// Configured plugins first, then the built-in extractors.
    pub fn with_defaults(fetcher: &Fetcher, config: &Config) -> Result<Self> {
        let mut extractors = plugin::load(&config.plugins)?;
        extractors.extend(default_extractors(fetcher));
        Ok(Self::new(extractors))
    }

    #[must_use]
    pub fn extractors(&self) -> &[Arc<dyn Extractor>] {
        &self.extractors
    }

    /// First extractor claiming `url`, if any.
    #[must_use]
    pub fn find(&self, url: &Url) -> Option<&Arc<dyn Extractor>> {
        self.extractors.iter().find(|e| e.matches(url))
    }

    /// Extracts streams from `url` with the first matching extractor.
    ///
    /// Fails with [`Error::NotSupported`] when nothing matches; an
    /// extractor's own failure is returned as is.
    #[instrument(skip_all, fields(id = %ctx.id(), url = %url))]
    pub async fn handle(&self, ctx: &Context, url: &Url, country: CountryCode) -> Result<StreamSet> {
        let Some(extractor) = self.find(url) else {
            debug!("no extractor matched");
            return Err(Error::NotSupported { url: url.clone() });
        };

        debug!(extractor = extractor.id(), "matched extractor");
        let normalized = extractor.normalize(url);
        match extractor.extract(ctx, &normalized, country).await {
            Ok(mut streams) => {
                for stream in streams.iter_mut() {
                    if stream.origin.is_empty() {
                        stream.origin = extractor.id().to_string();
                    }
                }
                debug!(extractor = extractor.id(), count = streams.len(), "extracted streams");
                Ok(streams)
            }
            Err(e) => {
                warn!(extractor = extractor.id(), error = %e.chain(), "extraction failed");
                Err(e)
            }
        }
    }
}

/// Built-in extractors in dispatch order.
#[must_use]
pub fn default_extractors(fetcher: &Fetcher) -> Vec<Arc<dyn Extractor>> {
    vec![
        Arc::new(Uqload::new(fetcher.clone())),
        Arc::new(DirectMedia),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::stream::Stream;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fake {
        id: &'static str,
        host: &'static str,
        calls: AtomicUsize,
        fail: bool,
    }

    impl Fake {
        fn new(id: &'static str, host: &'static str) -> Self {
            Self {
                id,
                host,
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl Extractor for Fake {
        fn id(&self) -> &str {
            self.id
        }

        fn matches(&self, url: &Url) -> bool {
            url.host_str() == Some(self.host)
        }

        async fn extract(&self, _ctx: &Context, url: &Url, _country: CountryCode) -> Result<StreamSet> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::extraction(self.id, url, "markup changed"));
            }
            let media = url.join("/video.mp4").unwrap();
            Ok(std::iter::once(Stream::new(media, "")).collect())
        }
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn first_match_wins() {
        let a = Arc::new(Fake::new("a", "host.example"));
        let b = Arc::new(Fake::new("b", "host.example"));
        let registry = ExtractorRegistry::new(vec![a.clone(), b.clone()]);
        let ctx = Context::builder().build();

        let streams = registry
            .handle(&ctx, &url("https://host.example/e/1"), CountryCode::En)
            .await
            .unwrap();

        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.calls.load(Ordering::SeqCst), 0);
        assert_eq!(streams.as_slice()[0].origin, "a");
    }

    #[tokio::test]
    async fn unmatched_url_is_not_supported() {
        let registry = ExtractorRegistry::new(vec![Arc::new(Fake::new("a", "host.example"))]);
        let ctx = Context::builder().build();
        let target = url("https://other.example/e/1");

        let err = registry.handle(&ctx, &target, CountryCode::En).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotSupported);
        assert_eq!(err.url(), Some(&target));
    }

    #[tokio::test]
    async fn extractor_failure_is_propagated_without_fallback() {
        let mut failing = Fake::new("a", "host.example");
        failing.fail = true;
        let fallback = Arc::new(Fake::new("b", "host.example"));
        let registry = ExtractorRegistry::new(vec![Arc::new(failing), fallback.clone()]);
        let ctx = Context::builder().build();

        let err = registry
            .handle(&ctx, &url("https://host.example/e/1"), CountryCode::En)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Extraction);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_registry_is_not_supported() {
        let registry = ExtractorRegistry::new(Vec::new());
        let ctx = Context::builder().build();
        let err = registry
            .handle(&ctx, &url("https://host.example/"), CountryCode::En)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotSupported { .. }));
    }

    #[test]
    fn default_extractor_order() {
        let fetcher = Fetcher::new(&Config::default()).unwrap();
        let ids: Vec<String> = default_extractors(&fetcher)
            .iter()
            .map(|e| e.id().to_string())
            .collect();
        assert_eq!(ids, vec!["uqload", "direct"]);
    }
}
