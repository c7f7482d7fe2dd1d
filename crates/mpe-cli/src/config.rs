//! Demo configuration.

use anyhow::{Context, Result};
use mpe_client::ClientConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// TOML schema for the demo binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Challenge cookie obtained out of process.
    pub cookie: String,
    /// User-agent the cookie was minted for.
    pub user_agent: String,
    /// Pairs whose order books to follow.
    pub pairs: Vec<String>,
    /// Pairs whose tickers to follow.
    pub tickers: Vec<String>,
    /// Follow the market summary feed.
    pub summary: bool,
    /// Client configuration.
    pub client: ClientConfig,
}

impl CliConfig {
    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {path}"))?;
            toml::from_str(&content).with_context(|| format!("failed to parse config {path}"))
        } else {
            tracing::warn!(path = %path, "config file not found, using defaults");
            Ok(Self::default())
        }
    }
}
