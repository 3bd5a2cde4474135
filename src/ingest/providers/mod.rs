pub mod alphavantage;
pub mod newsapi;
pub mod rss;

use std::time::Duration;

use crate::ingest::types::SourceError;

pub(crate) const USER_AGENT: &str =
    "stock-news-pipeline/0.1 (+https://github.com/stock-news-pipeline)";

/// HTTP client shared by the provider adapters.
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, SourceError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(5))
        .timeout(timeout)
        .build()
        .map_err(|e| SourceError::Http(e.to_string()))
}

/// Adapters from config. Keyed providers without a key are skipped with a
/// warning; so is any feed whose client fails to build.
pub fn build_sources(
    cfg: &crate::config::SourcesConfig,
) -> Vec<std::sync::Arc<dyn crate::ingest::types::SourceAdapter>> {
    use std::sync::Arc;

    let timeout = Duration::from_secs(cfg.timeout_secs);
    let mut out: Vec<Arc<dyn crate::ingest::types::SourceAdapter>> = Vec::new();

    for feed in &cfg.rss_feeds {
        match rss::RssSource::from_url(feed, timeout, cfg.watchlist.clone()) {
            Ok(s) => out.push(Arc::new(s)),
            Err(e) => tracing::warn!(target: "ingest", feed = %feed, error = %e, "skipping feed"),
        }
    }

    if cfg.newsapi.enabled {
        let built = cfg
            .newsapi
            .resolved_key()
            .ok_or_else(|| SourceError::NotConfigured(format!("{} not set", cfg.newsapi.api_key_env)))
            .and_then(|key| {
                newsapi::NewsApiSource::new(
                    cfg.newsapi.base_url.as_deref(),
                    key,
                    cfg.newsapi.queries.clone(),
                    timeout,
                    cfg.watchlist.clone(),
                )
            });
        match built {
            Ok(s) => out.push(Arc::new(s)),
            Err(e) => tracing::warn!(target: "ingest", source = "NewsAPI", error = %e, "source disabled"),
        }
    }

    if cfg.alphavantage.enabled {
        let built = cfg
            .alphavantage
            .resolved_key()
            .ok_or_else(|| SourceError::NotConfigured(format!("{} not set", cfg.alphavantage.api_key_env)))
            .and_then(|key| {
                alphavantage::AlphaVantageSource::new(
                    cfg.alphavantage.base_url.as_deref(),
                    key,
                    timeout,
                    cfg.watchlist.clone(),
                )
            });
        match built {
            Ok(s) => out.push(Arc::new(s)),
            Err(e) => tracing::warn!(target: "ingest", source = "Alpha Vantage", error = %e, "source disabled"),
        }
    }

    tracing::info!(target: "ingest", sources = out.len(), "source adapters ready");
    out
}
