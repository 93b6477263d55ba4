//! Playable stream descriptors and the deduplicating [`StreamSet`].

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize, Serializer};
use url::Url;

use crate::context::CountryCode;

/// Quality hint for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamQuality {
    /// Vertical resolution in pixels (e.g. 720, 1080).
    Height(u32),
    /// Adaptive manifest with several variants.
    Adaptive,
}

/// One directly playable media URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    /// Direct media or manifest URL.
    pub url: Url,
    /// Headers the player must send (e.g. `Referer`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<StreamQuality>,
    /// Human-readable label such as the hoster name and size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Extractor that produced the stream.
    pub origin: String,
    /// Source that produced the hosting page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<CountryCode>,
}

impl Stream {
    #[must_use]
    pub fn new(url: Url, origin: impl Into<String>) -> Self {
        Self {
            url,
            headers: BTreeMap::new(),
            quality: None,
            label: None,
            title: None,
            origin: origin.into(),
            source: None,
            country: None,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_quality(mut self, quality: StreamQuality) -> Self {
        self.quality = Some(quality);
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Key used for deduplication.
    #[must_use]
    pub fn dedup_key(&self) -> String {
        normalize_url(&self.url)
    }
}

/// Normalized form of a URL used for equality between streams and cache keys.
///
/// Scheme and host are already lowercased by [`Url`]; the fragment and a
/// trailing path slash are dropped.
#[must_use]
pub fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    let path = normalized.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        normalized.set_path(path.trim_end_matches('/'));
    }
    normalized.into()
}

/// Ordered streams, deduplicated by normalized URL. First occurrence wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSet {
    streams: Vec<Stream>,
    seen: HashSet<String>,
}

impl Serialize for StreamSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.streams.serialize(serializer)
    }
}

impl StreamSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `stream` unless an equal URL is already present.
    /// Returns whether it was added.
    pub fn push(&mut self, stream: Stream) -> bool {
        if !self.seen.insert(stream.dedup_key()) {
            return false;
        }
        self.streams.push(stream);
        true
    }

    /// Appends every stream of `other` in order, skipping duplicates.
    pub fn merge(&mut self, other: StreamSet) {
        for stream in other.streams {
            self.push(stream);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Stream> {
        self.streams.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> std::slice::IterMut<'_, Stream> {
        self.streams.iter_mut()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Stream] {
        &self.streams
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<Stream> {
        self.streams
    }
}

impl FromIterator<Stream> for StreamSet {
    fn from_iter<I: IntoIterator<Item = Stream>>(iter: I) -> Self {
        let mut set = StreamSet::new();
        for stream in iter {
            set.push(stream);
        }
        set
    }
}

impl IntoIterator for StreamSet {
    type Item = Stream;
    type IntoIter = std::vec::IntoIter<Stream>;

    fn into_iter(self) -> Self::IntoIter {
        self.streams.into_iter()
    }
}

impl<'a> IntoIterator for &'a StreamSet {
    type Item = &'a Stream;
    type IntoIter = std::slice::Iter<'a, Stream>;

    fn into_iter(self) -> Self::IntoIter {
        self.streams.iter()
    }
}
