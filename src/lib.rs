//! `streamr` - Resolve titles into direct, playable stream URLs
//!
//! # Features
//!
//! - **Proxy routing**: Per-host proxy rules (HTTP or SOCKS5), DNS caching, retries
//! - **Fetching**: Cached, single-flight HTTP with browser fingerprints
//! - **Extractors**: One per hosting site, first match wins; external plugins
//! - **Resolver**: Concurrent fan-out over sources and candidates, merged and deduplicated
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use streamr::config::Config;
//! use streamr::source::sources_from_config;
//! use streamr::{Context, ExtractorRegistry, Fetcher, Query, StreamResolver};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None)?;
//!     let fetcher = Fetcher::new(&config)?;
//!     let registry = ExtractorRegistry::with_defaults(&fetcher, &config)?;
//!     let resolver = StreamResolver::new(Arc::new(registry), config.resolver.max_concurrent_extractions);
//!     let sources = sources_from_config(&config.sources)?;
//!
//!     let ctx = Context::builder().build();
//!     let query: Query = "tt0111161".parse()?;
//!     for stream in &resolver.resolve(&ctx, &sources, &query).await? {
//!         println!("{}", stream.url);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod fingerprint;
pub mod health;
pub mod plugin;
pub mod resolver;
pub mod source;
pub mod stream;

pub use context::{Context, ContextBuilder, CountryCode};
pub use dispatcher::{DispatcherFactory, ProxyConfig, Route};
pub use error::{Error, ErrorKind, Result};
pub use extractor::{Extractor, ExtractorRegistry};
pub use fetcher::{FetchOptions, FetchResponse, Fetcher};
pub use fingerprint::{chrome_profile, firefox_profile, random_profile, BrowserProfile};
pub use resolver::{ResolveReport, StreamResolver};
pub use source::{Candidate, Query, Source};
pub use stream::{Stream, StreamQuality, StreamSet};

/// Version of streamr
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
