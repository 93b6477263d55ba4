//! Plugin runner that implements [`Extractor`] for external binaries.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};
use url::Url;

use crate::config::PluginConfig;
use crate::context::{Context, CountryCode};
use crate::error::{Error, Result};
use crate::extractor::Extractor;
use crate::stream::{Stream, StreamQuality, StreamSet};

/// JSON sent to the plugin on stdin.
#[derive(Serialize)]
struct PluginInput<'a> {
    url: &'a str,
    country: CountryCode,
}

/// JSON expected from the plugin on stdout.
#[derive(Deserialize)]
struct PluginOutput {
    #[serde(default)]
    streams: Vec<PluginStream>,
}

#[derive(Deserialize)]
struct PluginStream {
    url: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    label: Option<String>,
    title: Option<String>,
    height: Option<u32>,
}

/// Runs an external plugin binary as an [`Extractor`].
///
/// The plugin receives `{"url": "...", "country": "..."}` on stdin and must
/// answer `{"streams": [...]}` on stdout within its timeout. The process is
/// killed when the timeout elapses or the request is cancelled.
pub struct PluginExtractor {
    config: PluginConfig,
    patterns: Vec<Regex>,
}

impl PluginExtractor {
    /// Compiles all URL patterns as regexes.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if any URL pattern is not a valid regex.
    pub fn new(config: PluginConfig) -> Result<Self> {
        let patterns = config
            .patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    Error::config_with(format!("invalid pattern '{p}' in plugin '{}'", config.name), e)
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { config, patterns })
    }

    fn fail(&self, url: &Url, message: impl Into<String>) -> Error {
        Error::extraction(&self.config.name, url, message)
    }

    fn fail_with<E>(&self, url: &Url, message: impl Into<String>, source: E) -> Error
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Extraction {
            extractor: self.config.name.clone(),
            url: url.clone(),
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    async fn run(&self, url: &Url, input: &[u8]) -> Result<Vec<u8>> {
        let name = &self.config.name;
        let mut child = Command::new(&self.config.binary)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.fail_with(url, format!("failed to spawn plugin '{name}'"), e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input)
                .await
                .map_err(|e| self.fail_with(url, format!("failed to write to plugin '{name}' stdin"), e))?;
        }

        let result = child
            .wait_with_output()
            .await
            .map_err(|e| self.fail_with(url, format!("plugin '{name}' failed"), e))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(self.fail(
                url,
                format!("plugin '{name}' exited with {}: {}", result.status, stderr.trim()),
            ));
        }

        Ok(result.stdout)
    }

    fn into_streams(&self, url: &Url, output: PluginOutput, country: CountryCode) -> StreamSet {
        let mut streams = StreamSet::new();
        for item in output.streams {
            let Ok(media_url) = url.join(&item.url) else {
                warn!(plugin = %self.config.name, url = %item.url, "skipping invalid stream URL");
                continue;
            };
            let mut stream = Stream::new(media_url, self.config.name.clone());
            stream.headers = item.headers;
            stream.label = item.label;
            stream.title = item.title;
            stream.quality = item.height.map(StreamQuality::Height);
            stream.country = Some(country);
            streams.push(stream);
        }
        streams
    }
}

#[async_trait]
impl Extractor for PluginExtractor {
    fn id(&self) -> &str {
        &self.config.name
    }

    fn matches(&self, url: &Url) -> bool {
        self.patterns.iter().any(|re| re.is_match(url.as_str()))
    }

    async fn extract(&self, ctx: &Context, url: &Url, country: CountryCode) -> Result<StreamSet> {
        ctx.check_cancelled()?;

        let binary = &self.config.binary;
        if !binary.exists() {
            return Err(self.fail(
                url,
                format!("plugin binary not found at {}", binary.display()),
            ));
        }

        let input = serde_json::to_vec(&PluginInput {
            url: url.as_str(),
            country,
        })
        .map_err(|e| self.fail_with(url, "failed to encode plugin input", e))?;

        debug!(plugin = %self.config.name, %url, "running plugin");
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let stdout = tokio::select! {
            () = ctx.cancelled() => {
                return Err(Error::Cancelled { request_id: ctx.id().to_string() });
            }
            result = tokio::time::timeout(timeout, self.run(url, &input)) => match result {
                Ok(output) => output?,
                Err(_) => {
                    return Err(self.fail(
                        url,
                        format!("plugin timed out after {}s", self.config.timeout_secs),
                    ));
                }
            },
        };

        let output: PluginOutput = serde_json::from_slice(&stdout).map_err(|e| {
            let preview = String::from_utf8_lossy(&stdout[..stdout.len().min(200)]).into_owned();
            self.fail_with(url, format!("plugin returned invalid JSON: {preview}"), e)
        })?;

        Ok(self.into_streams(url, output, country))
    }
}
