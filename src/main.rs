//! `streamr` CLI - Resolve titles and hosting pages into playable streams

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;

use streamr::config::Config;
use streamr::health::{self, HealthStatus};
use streamr::source::{sources_for_country, sources_from_config};
use streamr::{Context, CountryCode, ExtractorRegistry, Fetcher, Query, StreamResolver, StreamSet};

#[derive(Parser)]
#[command(name = "streamr")]
#[command(about = "Resolve titles into direct, playable stream URLs")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.config/streamr/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a title (`id` or `id:season:episode`) across all sources
    Resolve {
        /// Title query, e.g. tt0111161 or tt0944947:1:3
        query: Query,

        /// Country / language of the audience
        #[arg(short, long, default_value = "en")]
        country: CountryCode,

        /// Bypass the response cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Extract streams from one hosting-page URL
    Extract {
        /// Hosting-page URL
        url: Url,

        /// Country / language of the audience
        #[arg(short, long, default_value = "en")]
        country: CountryCode,
    },

    /// Show which proxy route a URL would take
    Route {
        /// Destination URL
        url: Url,
    },

    /// Check egress connectivity and print the public IP
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let config = Config::load(cli.config.as_deref())?;
    config.validate().context("invalid configuration")?;

    match cli.command {
        Commands::Resolve {
            query,
            country,
            no_cache,
        } => cmd_resolve(&config, &query, country, no_cache).await?,
        Commands::Extract { url, country } => cmd_extract(&config, &url, country).await?,
        Commands::Route { url } => cmd_route(&config, &url)?,
        Commands::Health => {
            if !cmd_health(&config).await? {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("info,streamr=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    // stdout is reserved for JSON output
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))
}

/// Request context cancelled on Ctrl-C.
fn request_context(country: CountryCode, no_cache: bool) -> Context {
    let ctx = Context::builder().country(country).no_cache(no_cache).build();
    let cancel = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, cancelling");
            cancel.cancel();
        }
    });
    ctx
}

fn print_streams(streams: &StreamSet) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(streams)?);
    Ok(())
}

async fn cmd_resolve(config: &Config, query: &Query, country: CountryCode, no_cache: bool) -> Result<()> {
    let fetcher = Fetcher::new(config)?;
    let registry = ExtractorRegistry::with_defaults(&fetcher, config)?;
    let resolver = StreamResolver::new(Arc::new(registry), config.resolver.max_concurrent_extractions);

    let sources = sources_for_country(&sources_from_config(&config.sources)?, country);
    if sources.is_empty() {
        info!(%country, "no sources configured for country");
    }

    let ctx = request_context(country, no_cache);
    let report = resolver.resolve_report(&ctx, &sources, query).await?;
    for outcome in &report.candidates {
        if let Some(e) = &outcome.error {
            debug!(source = %outcome.source, url = %outcome.url, error = %e, "candidate skipped");
        }
    }
    print_streams(&report.streams)
}

async fn cmd_extract(config: &Config, url: &Url, country: CountryCode) -> Result<()> {
    let fetcher = Fetcher::new(config)?;
    let registry = ExtractorRegistry::with_defaults(&fetcher, config)?;

    let ctx = request_context(country, false);
    let streams = registry.handle(&ctx, url, country).await?;
    print_streams(&streams)
}

fn cmd_route(config: &Config, url: &Url) -> Result<()> {
    let route = config.proxy_config()?.route_for(url);
    println!("{route}");
    Ok(())
}

/// Prints the health status; `false` when the check failed.
async fn cmd_health(config: &Config) -> Result<bool> {
    let fetcher = Fetcher::new(config)?;
    let url = Url::parse(&config.health.url)?;

    let ctx = request_context(CountryCode::En, true);
    let status = health::status(&fetcher, &ctx, &url).await;
    println!("{}", serde_json::to_string(&status)?);
    Ok(matches!(status, HealthStatus::Ok { .. }))
}
