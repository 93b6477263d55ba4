//! External extractors.
//!
//! A plugin is a binary that receives a hosting-page URL and returns the
//! playable streams it found. Protocol: JSON on stdin, JSON on stdout.
//!
//! # Configuration
//!
//! Plugins are defined in `~/.config/streamr/config.toml`:
//!
//! ```toml
//! [[plugins]]
//! name = "my-hoster"
//! binary = "/usr/local/bin/streamr-my-hoster"
//! patterns = ["my-hoster\\.example/e/.*"]
//! timeout_secs = 20
//! ```
//!
//! # Protocol
//!
//! Input (JSON on stdin):
//! ```json
//! {"url": "https://my-hoster.example/e/abc", "country": "de"}
//! ```
//!
//! Output (JSON on stdout):
//! ```json
//! {"streams": [{"url": "https://cdn.example/abc.m3u8", "headers": {"Referer": "https://my-hoster.example/"}, "height": 1080}]}
//! ```

pub mod runner;

use std::sync::Arc;

pub use runner::PluginExtractor;

use crate::config::PluginConfig;
use crate::error::Result;
use crate::extractor::Extractor;

/// Builds one extractor per configured plugin, in configuration order.
///
/// Fails if any plugin has an invalid URL pattern.
pub fn load(configs: &[PluginConfig]) -> Result<Vec<Arc<dyn Extractor>>> {
    configs
        .iter()
        .map(|config| PluginExtractor::new(config.clone()).map(|p| Arc::new(p) as Arc<dyn Extractor>))
        .collect()
}
