//! Uqload embed pages.
//!
//! The player is configured inline: `sources: ["https://mXX.uqload.net/.../v.mp4"]`.
//! The media host rejects requests without a Uqload `Referer`.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use super::Extractor;
use crate::context::{Context, CountryCode};
use crate::error::{Error, Result};
use crate::fetcher::{FetchOptions, Fetcher};
use crate::stream::{Stream, StreamQuality, StreamSet};

static HOST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(www\.)?uqload\.(net|com|co|io|to|cx|ws|bz)$").expect("valid regex"));
static VIDEO_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/(?:embed-)?([a-z0-9]+)(?:\.html)?/?$").expect("valid regex"));
static SOURCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"sources:\s*\[\s*["']([^"']+)["']"#).expect("valid regex"));
static TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title>\s*(.*?)\s*</title>").expect("valid regex"));
static HEIGHT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3,4}x(\d{3,4})\b").expect("valid regex"));
static DELETED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)file (was deleted|not found)|video has been removed").expect("valid regex"));

const CANONICAL_ORIGIN: &str = "https://uqload.net";

/// What the embed page tells us about the video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedPage {
    pub media_url: String,
    pub title: Option<String>,
    pub height: Option<u32>,
}

/// Parses an embed page. `None` when the page carries no player sources.
#[must_use]
pub fn parse_embed_page(html: &str) -> Option<EmbedPage> {
    let media_url = SOURCES.captures(html)?.get(1)?.as_str().to_string();

    let title = TITLE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_start_matches("Uqload").trim_start_matches(['-', ' ']).trim().to_string())
        .filter(|t| !t.is_empty());

    let height = HEIGHT
        .captures(html)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok());

    Some(EmbedPage {
        media_url,
        title,
        height,
    })
}

pub struct Uqload {
    fetcher: Fetcher,
}

impl Uqload {
    #[must_use]
    pub fn new(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }

    fn video_id(url: &Url) -> Option<String> {
        VIDEO_ID
            .captures(url.path())
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }
}

#[async_trait]
impl Extractor for Uqload {
    fn id(&self) -> &str {
        "uqload"
    }

    fn label(&self) -> &str {
        "Uqload"
    }

    fn matches(&self, url: &Url) -> bool {
        url.host_str().is_some_and(|host| HOST.is_match(host)) && Self::video_id(url).is_some()
    }

    /// Every mirror and the `/{id}.html` form map to `https://uqload.net/embed-{id}.html`.
    fn normalize(&self, url: &Url) -> Url {
        Self::video_id(url)
            .and_then(|id| Url::parse(&format!("{CANONICAL_ORIGIN}/embed-{id}.html")).ok())
            .unwrap_or_else(|| url.clone())
    }

    async fn extract(&self, ctx: &Context, url: &Url, country: CountryCode) -> Result<StreamSet> {
        let html = self
            .fetcher
            .text(ctx, url, &FetchOptions::new())
            .await
            .map_err(|e| e.into_extraction(self.id(), url))?;

        let Some(page) = parse_embed_page(&html) else {
            let reason = if DELETED.is_match(&html) {
                "video was removed"
            } else {
                "player sources not found"
            };
            return Err(Error::extraction(self.id(), url, reason));
        };

        let media_url = url
            .join(&page.media_url)
            .map_err(|e| Error::Extraction {
                extractor: self.id().to_string(),
                url: url.clone(),
                message: format!("invalid media URL '{}'", page.media_url),
                source: Some(std::sync::Arc::new(e)),
            })?;

        let mut stream = Stream::new(media_url, self.id())
            .with_header("Referer", format!("{CANONICAL_ORIGIN}/"))
            .with_label(self.label());
        stream.country = Some(country);
        if let Some(title) = page.title {
            stream = stream.with_title(title);
        }
        if let Some(height) = page.height {
            stream = stream.with_quality(StreamQuality::Height(height));
        }

        Ok(std::iter::once(stream).collect())
    }
}
