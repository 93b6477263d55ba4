//! Resolves a title query into playable streams across all sources.
//!
//! Every source is queried at once; every candidate they return is routed
//! through the [`ExtractorRegistry`] with bounded concurrency. One failing
//! source or candidate never fails the whole request.

use std::sync::Arc;

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::extractor::ExtractorRegistry;
use crate::source::{Candidate, Query, Source};
use crate::stream::StreamSet;

/// What one source contributed.
#[derive(Debug, Clone)]
pub struct SourceOutcome {
    pub source: String,
    pub candidates: usize,
    pub error: Option<Error>,
}

/// What one candidate hosting page contributed.
#[derive(Debug, Clone)]
pub struct CandidateOutcome {
    pub source: String,
    pub url: Url,
    /// Streams returned by the extractor, before deduplication.
    pub streams: usize,
    pub error: Option<Error>,
}

/// Streams plus per-source and per-candidate outcomes.
#[derive(Debug, Default)]
pub struct ResolveReport {
    pub streams: StreamSet,
    pub sources: Vec<SourceOutcome>,
    pub candidates: Vec<CandidateOutcome>,
}

impl ResolveReport {
    /// Number of candidates whose extraction failed.
    #[must_use]
    pub fn failed_candidates(&self) -> usize {
        self.candidates.iter().filter(|c| c.error.is_some()).count()
    }
}

pub struct StreamResolver {
    registry: Arc<ExtractorRegistry>,
    max_concurrent: usize,
}

impl StreamResolver {
    /// `max_concurrent` bounds simultaneous extractions; values below 1 count as 1.
    #[must_use]
    pub fn new(registry: Arc<ExtractorRegistry>, max_concurrent: usize) -> Self {
        Self {
            registry,
            max_concurrent: max_concurrent.max(1),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &ExtractorRegistry {
        &self.registry
    }

    /// Merged, deduplicated streams for `query`.
    ///
    /// Only fails with [`Error::InvalidContext`]; zero streams is a
    /// successful empty result.
    pub async fn resolve(&self, ctx: &Context, sources: &[Arc<dyn Source>], query: &Query) -> Result<StreamSet> {
        Ok(self.resolve_report(ctx, sources, query).await?.streams)
    }

    /// Like [`resolve`](Self::resolve), keeping every failure for inspection.
    #[instrument(skip_all, fields(id = %ctx.id(), query = %query))]
    pub async fn resolve_report(
        &self,
        ctx: &Context,
        sources: &[Arc<dyn Source>],
        query: &Query,
    ) -> Result<ResolveReport> {
        ctx.validate()?;

        let mut report = ResolveReport::default();
        let candidates = self.query_sources(ctx, sources, query, &mut report).await;
        debug!(sources = sources.len(), candidates = candidates.len(), "sources queried");

        let registry = &self.registry;
        let extractions: Vec<_> = stream::iter(candidates.into_iter().map(|candidate| async move {
            let result = if ctx.is_cancelled() {
                Err(cancelled(ctx))
            } else {
                tokio::select! {
                    () = ctx.cancelled() => Err(cancelled(ctx)),
                    result = registry.handle(ctx, &candidate.url, candidate.country) => result,
                }
            };
            (candidate, result)
        }))
        .buffered(self.max_concurrent)
        .collect()
        .await;

        for (candidate, result) in extractions {
            match result {
                Ok(streams) => {
                    report.candidates.push(CandidateOutcome {
                        source: candidate.source.clone(),
                        url: candidate.url.clone(),
                        streams: streams.len(),
                        error: None,
                    });
                    for mut stream in streams {
                        stream.source = Some(candidate.source.clone());
                        stream.country.get_or_insert(candidate.country);
                        report.streams.push(stream);
                    }
                }
                Err(e) => {
                    debug!(source = %candidate.source, url = %candidate.url, kind = %e.kind(), "candidate failed");
                    report.candidates.push(CandidateOutcome {
                        source: candidate.source,
                        url: candidate.url,
                        streams: 0,
                        error: Some(e),
                    });
                }
            }
        }

        info!(
            streams = report.streams.len(),
            failed = report.failed_candidates(),
            "resolved"
        );
        Ok(report)
    }

    /// Queries all sources concurrently, flattening candidates in source order.
    async fn query_sources(
        &self,
        ctx: &Context,
        sources: &[Arc<dyn Source>],
        query: &Query,
        report: &mut ResolveReport,
    ) -> Vec<Candidate> {
        let results = join_all(sources.iter().map(|source| async move {
            if ctx.is_cancelled() {
                return Err(cancelled(ctx));
            }
            tokio::select! {
                () = ctx.cancelled() => Err(cancelled(ctx)),
                result = source.handle(ctx, query) => result,
            }
        }))
        .await;

        let mut candidates = Vec::new();
        for (source, result) in sources.iter().zip(results) {
            match result {
                Ok(found) => {
                    report.sources.push(SourceOutcome {
                        source: source.id().to_string(),
                        candidates: found.len(),
                        error: None,
                    });
                    candidates.extend(found);
                }
                Err(e) => {
                    warn!(source = source.id(), error = %e.chain(), "source failed");
                    report.sources.push(SourceOutcome {
                        source: source.id().to_string(),
                        candidates: 0,
                        error: Some(e),
                    });
                }
            }
        }
        candidates
    }
}

fn cancelled(ctx: &Context) -> Error {
    Error::Cancelled {
        request_id: ctx.id().to_string(),
    }
}
