//! Sources turn a title query into candidate hosting-page URLs.
//!
//! A [`Source`] never extracts anything itself: it only names the pages
//! that the [`ExtractorRegistry`](crate::extractor::ExtractorRegistry) will
//! later turn into streams.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::config::SourceConfig;
use crate::context::{Context, CountryCode};
use crate::error::{Error, Result};

/// A title to resolve: an id (e.g. IMDb `tt0111161`) plus optional episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Query {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
}

impl Query {
    #[must_use]
    pub fn movie(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            season: None,
            episode: None,
        }
    }

    #[must_use]
    pub fn episode(id: impl Into<String>, season: u32, episode: u32) -> Self {
        Self {
            id: id.into(),
            season: Some(season),
            episode: Some(episode),
        }
    }

    #[must_use]
    pub fn is_series(&self) -> bool {
        self.season.is_some() && self.episode.is_some()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.season, self.episode) {
            (Some(s), Some(e)) => write!(f, "{}:{s}:{e}", self.id),
            _ => f.write_str(&self.id),
        }
    }
}

/// Parses `id` or `id:season:episode`.
impl FromStr for Query {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidContext(format!("invalid query '{s}', expected id[:season:episode]"));
        let parts: Vec<&str> = s.trim().split(':').collect();
        match parts.as_slice() {
            [id] if !id.is_empty() => Ok(Self::movie(*id)),
            [id, season, episode] if !id.is_empty() => {
                let season = season.parse().map_err(|_| invalid())?;
                let episode = episode.parse().map_err(|_| invalid())?;
                Ok(Self::episode(*id, season, episode))
            }
            _ => Err(invalid()),
        }
    }
}

/// A hosting-page URL produced by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub url: Url,
    /// Id of the source that produced it.
    pub source: String,
    pub country: CountryCode,
    pub label: Option<String>,
}

impl Candidate {
    #[must_use]
    pub fn new(url: Url, source: impl Into<String>, country: CountryCode) -> Self {
        Self {
            url,
            source: source.into(),
            country,
            label: None,
        }
    }
}

/// Yields candidate hosting pages for a query.
#[async_trait]
pub trait Source: Send + Sync {
    fn id(&self) -> &str;

    fn label(&self) -> &str {
        self.id()
    }

    /// Countries whose audience this source serves.
    fn countries(&self) -> &[CountryCode];

    async fn handle(&self, ctx: &Context, query: &Query) -> Result<Vec<Candidate>>;
}

/// Source that fills a URL template per query.
///
/// `{id}`, `{season}` and `{episode}` are substituted (percent-encoded). A
/// query with season and episode uses the `series` template, any other query
/// the `movie` template; a missing template yields no candidates.
pub struct TemplateSource {
    id: String,
    label: Option<String>,
    countries: Vec<CountryCode>,
    movie: Option<String>,
    series: Option<String>,
}

impl TemplateSource {
    /// # Errors
    ///
    /// Fails when neither template is set.
    pub fn new(config: &SourceConfig) -> Result<Self> {
        if config.movie.is_none() && config.series.is_none() {
            return Err(Error::config(format!(
                "source '{}' needs a movie or series template",
                config.id
            )));
        }
        let countries = if config.countries.is_empty() {
            vec![CountryCode::Multi]
        } else {
            config.countries.clone()
        };
        Ok(Self {
            id: config.id.clone(),
            label: config.label.clone(),
            countries,
            movie: config.movie.clone(),
            series: config.series.clone(),
        })
    }

    fn expand(&self, query: &Query) -> Option<String> {
        let template = if query.is_series() {
            self.series.as_deref()?
        } else {
            self.movie.as_deref()?
        };
        let mut url = template.replace("{id}", &urlencoding::encode(&query.id));
        if let (Some(season), Some(episode)) = (query.season, query.episode) {
            url = url
                .replace("{season}", &season.to_string())
                .replace("{episode}", &episode.to_string());
        }
        Some(url)
    }
}

#[async_trait]
impl Source for TemplateSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }

    fn countries(&self) -> &[CountryCode] {
        &self.countries
    }

    async fn handle(&self, ctx: &Context, query: &Query) -> Result<Vec<Candidate>> {
        ctx.check_cancelled()?;

        let Some(raw) = self.expand(query) else {
            debug!(source = %self.id, %query, "no template for query");
            return Ok(Vec::new());
        };
        let url = Url::parse(&raw).map_err(|e| {
            Error::config_with(format!("source '{}' built invalid URL '{raw}'", self.id), e)
        })?;

        let country = if self.countries.contains(&ctx.country()) {
            ctx.country()
        } else {
            self.countries.first().copied().unwrap_or(CountryCode::Multi)
        };
        let mut candidate = Candidate::new(url, self.id.clone(), country);
        candidate.label = self.label.clone();
        Ok(vec![candidate])
    }
}

/// Builds the configured sources, in declaration order.
pub fn sources_from_config(configs: &[SourceConfig]) -> Result<Vec<Arc<dyn Source>>> {
    configs
        .iter()
        .map(|c| TemplateSource::new(c).map(|s| Arc::new(s) as Arc<dyn Source>))
        .collect()
}

/// Sources serving `country`, keeping their order. `Multi` sources serve everyone.
#[must_use]
pub fn sources_for_country(sources: &[Arc<dyn Source>], country: CountryCode) -> Vec<Arc<dyn Source>> {
    sources
        .iter()
        .filter(|s| {
            s.countries()
                .iter()
                .any(|c| *c == country || *c == CountryCode::Multi)
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn source_config(id: &str, countries: Vec<CountryCode>) -> SourceConfig {
        SourceConfig {
            id: id.to_string(),
            label: None,
            countries,
            movie: Some("https://embed.example/movie/{id}".to_string()),
            series: Some("https://embed.example/tv/{id}/{season}-{episode}".to_string()),
        }
    }

    #[test]
    fn parse_movie_query() {
        let query: Query = "tt0111161".parse().unwrap();
        assert_eq!(query, Query::movie("tt0111161"));
        assert!(!query.is_series());
    }

    #[test]
    fn parse_episode_query() {
        let query: Query = "tt0944947:1:3".parse().unwrap();
        assert_eq!(query, Query::episode("tt0944947", 1, 3));
        assert_eq!(query.to_string(), "tt0944947:1:3");
    }

    #[test]
    fn reject_malformed_queries() {
        for raw in ["", "tt1:1", "tt1:a:2", ":1:2", "tt1:1:2:3"] {
            let err = raw.parse::<Query>().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidContext, "{raw}");
        }
    }

    #[tokio::test]
    async fn template_expands_movie_and_series() {
        let source = TemplateSource::new(&source_config("s1", vec![CountryCode::En])).unwrap();
        let ctx = Context::builder().build();

        let movie = source.handle(&ctx, &Query::movie("tt0111161")).await.unwrap();
        assert_eq!(movie[0].url.as_str(), "https://embed.example/movie/tt0111161");
        assert_eq!(movie[0].source, "s1");

        let episode = source.handle(&ctx, &Query::episode("tt0944947", 2, 5)).await.unwrap();
        assert_eq!(episode[0].url.as_str(), "https://embed.example/tv/tt0944947/2-5");
    }

    #[tokio::test]
    async fn template_encodes_id() {
        let source = TemplateSource::new(&source_config("s1", Vec::new())).unwrap();
        let ctx = Context::builder().build();
        let candidates = source.handle(&ctx, &Query::movie("a b/c")).await.unwrap();
        assert_eq!(candidates[0].url.as_str(), "https://embed.example/movie/a%20b%2Fc");
    }

    #[tokio::test]
    async fn missing_template_yields_nothing() {
        let mut config = source_config("movies-only", Vec::new());
        config.series = None;
        let source = TemplateSource::new(&config).unwrap();
        let ctx = Context::builder().build();
        let candidates = source.handle(&ctx, &Query::episode("tt1", 1, 1)).await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn candidate_country_follows_context_when_served() {
        let source = TemplateSource::new(&source_config("s1", vec![CountryCode::De, CountryCode::Fr])).unwrap();

        let ctx = Context::builder().country(CountryCode::Fr).build();
        let candidates = source.handle(&ctx, &Query::movie("tt1")).await.unwrap();
        assert_eq!(candidates[0].country, CountryCode::Fr);

        let ctx = Context::builder().country(CountryCode::It).build();
        let candidates = source.handle(&ctx, &Query::movie("tt1")).await.unwrap();
        assert_eq!(candidates[0].country, CountryCode::De);
    }

    #[test]
    fn filter_sources_by_country() {
        let sources = sources_from_config(&[
            source_config("de", vec![CountryCode::De]),
            source_config("any", vec![CountryCode::Multi]),
            source_config("fr", vec![CountryCode::Fr]),
        ])
        .unwrap();

        let ids: Vec<String> = sources_for_country(&sources, CountryCode::De)
            .iter()
            .map(|s| s.id().to_string())
            .collect();
        assert_eq!(ids, vec!["de", "any"]);
    }

    #[test]
    fn source_without_templates_is_rejected() {
        let mut config = source_config("empty", Vec::new());
        config.movie = None;
        config.series = None;
        assert!(TemplateSource::new(&config).is_err());
    }
}
