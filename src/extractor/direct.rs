//! Direct media URLs (HLS/DASH manifests, progressive files).

use async_trait::async_trait;
use url::Url;

use super::Extractor;
use crate::context::{Context, CountryCode};
use crate::error::Result;
use crate::stream::{Stream, StreamQuality, StreamSet};

const MANIFEST_EXTENSIONS: &[&str] = &["m3u8", "mpd"];
const FILE_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm"];

/// Passes already playable URLs through without fetching anything.
pub struct DirectMedia;

fn extension(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    let (_, ext) = last.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

#[async_trait]
impl Extractor for DirectMedia {
    fn id(&self) -> &str {
        "direct"
    }

    fn label(&self) -> &str {
        "Direct"
    }

    fn matches(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https")
            && extension(url).is_some_and(|ext| {
                MANIFEST_EXTENSIONS.contains(&ext.as_str()) || FILE_EXTENSIONS.contains(&ext.as_str())
            })
    }

    async fn extract(&self, ctx: &Context, url: &Url, _country: CountryCode) -> Result<StreamSet> {
        ctx.check_cancelled()?;

        let mut stream = Stream::new(url.clone(), self.id()).with_label(self.label());
        if extension(url).is_some_and(|ext| MANIFEST_EXTENSIONS.contains(&ext.as_str())) {
            stream = stream.with_quality(StreamQuality::Adaptive);
        }
        Ok(std::iter::once(stream).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_matches_manifests_and_files() {
        assert!(DirectMedia.matches(&url("https://cdn.example.com/master.m3u8?token=1")));
        assert!(DirectMedia.matches(&url("https://cdn.example.com/stream.MPD")));
        assert!(DirectMedia.matches(&url("http://cdn.example.com/movie.mp4")));
        assert!(!DirectMedia.matches(&url("https://cdn.example.com/embed-1.html")));
        assert!(!DirectMedia.matches(&url("https://cdn.example.com/")));
        assert!(!DirectMedia.matches(&url("ftp://cdn.example.com/movie.mp4")));
    }

    #[tokio::test]
    async fn test_extract_manifest_is_adaptive() {
        let ctx = Context::builder().build();
        let streams = DirectMedia
            .extract(&ctx, &url("https://cdn.example.com/master.m3u8"), CountryCode::En)
            .await
            .unwrap();
        assert_eq!(streams.len(), 1);
        let stream = &streams.as_slice()[0];
        assert_eq!(stream.origin, "direct");
        assert_eq!(stream.quality, Some(StreamQuality::Adaptive));
    }

    #[tokio::test]
    async fn test_extract_file_has_no_quality_hint() {
        let ctx = Context::builder().build();
        let streams = DirectMedia
            .extract(&ctx, &url("https://cdn.example.com/movie.mp4"), CountryCode::En)
            .await
            .unwrap();
        assert_eq!(streams.as_slice()[0].quality, None);
    }
}
