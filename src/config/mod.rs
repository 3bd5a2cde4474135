// src/config/mod.rs
//! Pipeline configuration: one TOML file, every section defaulted.
//!
//! Lookup order for [`load_default`]:
//! 1) `$PIPELINE_CONFIG_PATH`
//! 2) `config/pipeline.toml`
//! 3) built-in defaults
//!
//! Secrets follow the `"ENV"` convention: the literal `ENV` resolves the
//! value from the section's `*_env` variable. A missing variable disables
//! that collaborator instead of failing start-up.

pub mod ai;

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::distribute::DistributionConfig;
use crate::ingest::tickers::default_watchlist;
use crate::pipeline::PipelineSettings;
use crate::verify::VerifierConfig;

pub use ai::{AnalyzerConfig, ProviderConfig};

pub const ENV_PATH: &str = "PIPELINE_CONFIG_PATH";
pub const DEFAULT_PATH: &str = "config/pipeline.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid time of day '{0}', expected HH:MM")]
    TimeOfDay(String),
    #[error("utc_offset_minutes {0} outside -1080..=1080")]
    UtcOffset(i32),
    #[error("schedule has neither an interval nor times of day")]
    EmptySchedule,
}

/// Resolve a secret: the literal `ENV` (any case) reads `env_var`.
/// Empty results are `None`.
pub fn resolve_secret(raw: &str, env_var: &str) -> Option<String> {
    let raw = raw.trim();
    let value = if raw.eq_ignore_ascii_case("env") {
        std::env::var(env_var).ok()?
    } else {
        raw.to_string()
    };
    let value = value.trim().to_string();
    (!value.is_empty()).then_some(value)
}

/// Strict `HH:MM` (24h).
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").map_err(|_| ConfigError::TimeOfDay(s.to_string()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Fixed interval between runs; `None` disables interval triggering.
    pub interval_minutes: Option<u64>,
    /// Fixed local times of day, `HH:MM`.
    pub times_of_day: Vec<String>,
    /// Offset of the local clock the times refer to.
    pub utc_offset_minutes: i32,
    pub run_on_start: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_minutes: None,
            times_of_day: vec!["09:00".into(), "13:00".into(), "17:00".into()],
            utc_offset_minutes: 0,
            run_on_start: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyedSourceConfig {
    pub enabled: bool,
    pub base_url: Option<String>,
    /// "ENV" means: read from `api_key_env`
    pub api_key: String,
    pub api_key_env: String,
    /// Provider-side search queries; empty uses the adapter's defaults.
    pub queries: Vec<String>,
}

/// Partial tables keep the `ENV` convention; `validate` fills the
/// provider's variable name when `api_key_env` is left out.
impl Default for KeyedSourceConfig {
    fn default() -> Self {
        Self::keyed("")
    }
}

impl KeyedSourceConfig {
    fn keyed(env: &str) -> Self {
        Self {
            enabled: true,
            base_url: None,
            api_key: "ENV".into(),
            api_key_env: env.into(),
            queries: Vec::new(),
        }
    }

    pub fn resolved_key(&self) -> Option<String> {
        resolve_secret(&self.api_key, &self.api_key_env)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub rss_feeds: Vec<String>,
    pub newsapi: KeyedSourceConfig,
    pub alphavantage: KeyedSourceConfig,
    /// Symbols recognised as tickers when they appear as plain words.
    pub watchlist: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            rss_feeds: [
                "https://finance.yahoo.com/news/rssindex",
                "https://feeds.feedburner.com/marketwatch/topstories",
                "https://feeds.bloomberg.com/markets/news.rss",
                "https://feeds.bloomberg.com/technology/news.rss",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            newsapi: KeyedSourceConfig::keyed("NEWS_API_KEY"),
            alphavantage: KeyedSourceConfig::keyed("ALPHA_VANTAGE_KEY"),
            watchlist: default_watchlist(),
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// `memory://` or `file://<path>`
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "file://data/news_store.json".into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub schedule: ScheduleConfig,
    pub sources: SourcesConfig,
    pub analyzer: AnalyzerConfig,
    pub verifier: VerifierConfig,
    pub distribution: DistributionConfig,
    pub store: StoreConfig,
    pub pipeline: PipelineSettings,
}

impl AppConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let mut cfg: AppConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Clamp numeric knobs into range; reject what cannot be clamped.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        for t in &self.schedule.times_of_day {
            parse_time_of_day(t)?;
        }
        if !(-1080..=1080).contains(&self.schedule.utc_offset_minutes) {
            return Err(ConfigError::UtcOffset(self.schedule.utc_offset_minutes));
        }
        if self.schedule.interval_minutes == Some(0) {
            self.schedule.interval_minutes = None;
        }
        if self.schedule.interval_minutes.is_none() && self.schedule.times_of_day.is_empty() {
            return Err(ConfigError::EmptySchedule);
        }

        self.sources.timeout_secs = self.sources.timeout_secs.clamp(1, 120);
        self.sources.watchlist = self
            .sources
            .watchlist
            .iter()
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        self.sources.rss_feeds.retain(|f| !f.trim().is_empty());
        for (src, env) in [
            (&mut self.sources.newsapi, "NEWS_API_KEY"),
            (&mut self.sources.alphavantage, "ALPHA_VANTAGE_KEY"),
        ] {
            if src.api_key_env.trim().is_empty() {
                src.api_key_env = env.into();
            }
        }

        self.analyzer.sanitize();
        self.verifier.sanitize();
        self.distribution.sanitize();
        self.pipeline.sanitize();
        Ok(())
    }
}

/// Load from an explicit path.
pub fn load_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    AppConfig::from_toml_str(&content)
}

/// Load using env var + fallbacks (see module docs).
pub fn load_default() -> anyhow::Result<AppConfig> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(&p);
        return load_from(&pb).with_context(|| format!("{ENV_PATH}={p}"));
    }
    let default = PathBuf::from(DEFAULT_PATH);
    if default.exists() {
        return load_from(&default).with_context(|| format!("loading {DEFAULT_PATH}"));
    }
    let mut cfg = AppConfig::default();
    cfg.validate().context("validating built-in defaults")?;
    Ok(cfg)
}
