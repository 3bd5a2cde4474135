//! # Verification
//! High-impact items are checked against an independent news search.
//!
//! Items scoring below `threshold` are `not_required` and never reach the
//! search provider. A hit counts toward the verdict only if it is:
//! - relevant: shares at least `relevance_overlap` of the headline key terms
//! - independent: hosted away from the item's own URL host and source
//! - recent: within `recency_window_hours` of the item (undated hits count)
//!
//! Verification annotates; it never touches `impact_score`.

pub mod tavily;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::item::{url_host, Evidence, ImpactScore, NewsItem, VerificationStatus};
use crate::retry::{with_retry, Cancel, RetryPolicy, Transient};

pub use tavily::{NoopSearch, TavilySearch};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SearchError {
    #[error("http error: {0}")]
    Http(String),
    #[error("search returned HTTP {0}")]
    Status(u16),
    #[error("search timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed search payload: {0}")]
    Malformed(String),
}

impl Transient for SearchError {
    fn is_transient(&self) -> bool {
        match self {
            SearchError::Http(_) | SearchError::Timeout(_) => true,
            SearchError::Status(code) => *code == 429 || *code >= 500,
            SearchError::Malformed(_) => false,
        }
    }

    fn timed_out(after: Duration) -> Self {
        SearchError::Timeout(after)
    }
}

impl From<reqwest::Error> for SearchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SearchError::Timeout(Duration::ZERO)
        } else if let Some(s) = e.status() {
            SearchError::Status(s.as_u16())
        } else {
            SearchError::Http(e.to_string())
        }
    }
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, days: u32, max_results: usize) -> Result<Vec<SearchHit>, SearchError>;
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// When false, every item is `not_required`.
    pub enabled: bool,
    pub threshold: u8,
    pub recency_window_hours: i64,
    pub min_sources: usize,
    pub relevance_overlap: f64,
    pub cache_ttl_secs: u64,
    pub max_results: usize,
    pub concurrency: usize,
    pub base_url: Option<String>,
    /// "ENV" means: read from `api_key_env`
    pub api_key: String,
    pub api_key_env: String,
    pub retry: RetryPolicy,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 8,
            recency_window_hours: 48,
            min_sources: 2,
            relevance_overlap: 0.3,
            cache_ttl_secs: 3_600,
            max_results: 8,
            concurrency: 2,
            base_url: None,
            api_key: "ENV".into(),
            api_key_env: "SEARCH_API_KEY".into(),
            retry: RetryPolicy::default(),
        }
    }
}

impl VerifierConfig {
    pub(crate) fn sanitize(&mut self) {
        self.threshold = self.threshold.min(ImpactScore::MAX);
        self.relevance_overlap = self.relevance_overlap.clamp(0.0, 1.0);
        self.recency_window_hours = self.recency_window_hours.max(1);
        self.min_sources = self.min_sources.max(1);
        self.max_results = self.max_results.clamp(1, 20);
        self.concurrency = self.concurrency.clamp(1, 16);
    }
}

/// Outcome of one `verify` call.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub status: VerificationStatus,
    pub evidence: Vec<Evidence>,
    /// Set when the search itself failed (status is then `inconclusive`).
    pub failure: Option<SearchError>,
}

impl Verdict {
    fn of(status: VerificationStatus) -> Self {
        Self {
            status,
            evidence: Vec::new(),
            failure: None,
        }
    }
}

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "that", "this", "are", "was", "were", "has", "have", "its",
    "into", "over", "after", "amid", "about", "says", "said", "will", "new", "more", "than", "but",
    "not", "you", "your", "his", "her", "their", "they", "what", "why", "how", "who", "when",
];

const CONTRADICTION_MARKERS: &[&str] = &[
    "denies", "denied", "false", "refutes", "debunk", "rumor", "not true", "no plans", "fake",
];

/// Up to eight distinct lowercase headline terms, stop-words removed.
pub fn key_terms(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for w in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3 && !STOP_WORDS.contains(w))
    {
        if !out.iter().any(|o| o == w) {
            out.push(w.to_string());
        }
        if out.len() == 8 {
            break;
        }
    }
    out
}

/// Tickers first (at most two), then headline terms.
pub fn build_query(item: &NewsItem) -> String {
    let mut parts: Vec<String> = item.tickers.iter().take(2).cloned().collect();
    parts.extend(key_terms(&item.title));
    parts.join(" ")
}

fn overlap(headline_terms: &[String], hit: &SearchHit) -> f64 {
    if headline_terms.is_empty() {
        return 0.0;
    }
    let hay: HashSet<String> = format!("{} {}", hit.title, hit.snippet)
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();
    let hits = headline_terms.iter().filter(|t| hay.contains(*t)).count();
    hits as f64 / headline_terms.len() as f64
}

fn same_outlet(item: &NewsItem, host: &str) -> bool {
    if item.url.as_deref().and_then(url_host).as_deref() == Some(host) {
        return true;
    }
    item.source_name
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 4)
        .any(|w| host.contains(w))
}

/// Classify search hits against the item. Pure; no I/O.
pub fn assess(item: &NewsItem, hits: &[SearchHit], cfg: &VerifierConfig) -> (VerificationStatus, Vec<Evidence>) {
    let terms = key_terms(&item.title);
    let window = chrono::Duration::hours(cfg.recency_window_hours);

    let mut supporting_hosts: HashSet<String> = HashSet::new();
    let mut contradicting_hosts: HashSet<String> = HashSet::new();
    let mut evidence = Vec::new();

    for hit in hits {
        let Some(host) = url_host(&hit.url) else {
            continue;
        };
        if same_outlet(item, &host) || overlap(&terms, hit) < cfg.relevance_overlap {
            continue;
        }
        let recent = hit
            .published_at
            .map(|p| (p - item.published_at).abs() <= window)
            .unwrap_or(true);
        if !recent {
            continue;
        }
        let text = format!("{} {}", hit.title, hit.snippet).to_lowercase();
        let contradicts = CONTRADICTION_MARKERS.iter().any(|m| text.contains(m));
        let fresh_host = if contradicts {
            contradicting_hosts.insert(host.clone())
        } else {
            supporting_hosts.insert(host.clone())
        };
        if fresh_host && evidence.len() < 5 {
            evidence.push(Evidence {
                source: host,
                title: hit.title.clone(),
                url: hit.url.clone(),
                supports: !contradicts,
            });
        }
    }

    let (sup, con) = (supporting_hosts.len(), contradicting_hosts.len());
    let status = if con >= 1 && con >= sup {
        VerificationStatus::Contradicted
    } else if sup >= cfg.min_sources {
        VerificationStatus::Corroborated
    } else {
        VerificationStatus::Inconclusive
    };
    (status, evidence)
}

type HitCache = HashMap<String, (Instant, Vec<SearchHit>)>;

pub struct Verifier {
    provider: Arc<dyn SearchProvider>,
    cfg: VerifierConfig,
    cache: Mutex<HitCache>,
}

impl Verifier {
    pub fn new(provider: Arc<dyn SearchProvider>, cfg: VerifierConfig) -> Self {
        Self {
            provider,
            cfg,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.cfg
    }

    /// True when `verify` would call the search provider for this item.
    pub fn requires_search(&self, item: &NewsItem) -> bool {
        self.cfg.enabled && item.score().is_some_and(|s| s >= self.cfg.threshold)
    }

    fn cached(&self, query: &str) -> Option<Vec<SearchHit>> {
        let ttl = Duration::from_secs(self.cfg.cache_ttl_secs);
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        match cache.get(query) {
            Some((at, hits)) if at.elapsed() < ttl => Some(hits.clone()),
            Some(_) => {
                cache.remove(query);
                None
            }
            None => None,
        }
    }

    fn remember(&self, query: String, hits: &[SearchHit]) {
        if self.cfg.cache_ttl_secs == 0 {
            return;
        }
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        cache.insert(query, (Instant::now(), hits.to_vec()));
    }

    pub async fn verify(&self, item: &NewsItem, cancel: &Cancel) -> Verdict {
        match item.impact_score {
            None | Some(ImpactScore::Unknown) => return Verdict::of(VerificationStatus::Pending),
            Some(ImpactScore::Scored(_)) if !self.requires_search(item) => {
                return Verdict::of(VerificationStatus::NotRequired)
            }
            Some(ImpactScore::Scored(_)) => {}
        }

        let query = build_query(item);
        let hits = match self.cached(&query) {
            Some(h) => h,
            None => {
                let days = ((self.cfg.recency_window_hours + 23) / 24).max(1) as u32;
                let res = with_retry(&self.cfg.retry, cancel, |_| {
                    self.provider.search(&query, days, self.cfg.max_results)
                })
                .await;
                match res {
                    Ok(h) => {
                        self.remember(query.clone(), &h);
                        h
                    }
                    Err(ex) => {
                        counter!("news_verifications_total", "status" => "failed").increment(1);
                        return Verdict {
                            status: VerificationStatus::Inconclusive,
                            evidence: Vec::new(),
                            failure: Some(ex.last),
                        };
                    }
                }
            }
        };

        let (status, evidence) = assess(item, &hits, &self.cfg);
        counter!("news_verifications_total", "status" => status_label(status)).increment(1);
        tracing::debug!(
            target: "verify",
            identity = %item.identity,
            query = %query,
            hits = hits.len(),
            status = status_label(status),
            "item verified"
        );
        Verdict {
            status,
            evidence,
            failure: None,
        }
    }
}

pub fn status_label(s: VerificationStatus) -> &'static str {
    match s {
        VerificationStatus::NotRequired => "not_required",
        VerificationStatus::Pending => "pending",
        VerificationStatus::Corroborated => "corroborated",
        VerificationStatus::Contradicted => "contradicted",
        VerificationStatus::Inconclusive => "inconclusive",
    }
}

/// Provider from config: Tavily when a key resolves, otherwise the no-op search.
pub fn build_verifier(cfg: &VerifierConfig) -> Verifier {
    let timeout = Duration::from_millis(cfg.retry.attempt_timeout_ms.max(1));
    let provider: Arc<dyn SearchProvider> =
        match crate::config::resolve_secret(&cfg.api_key, &cfg.api_key_env) {
            Some(key) => match TavilySearch::new(cfg.base_url.as_deref(), key, timeout) {
                Ok(t) => Arc::new(t),
                Err(e) => {
                    tracing::warn!(target: "verify", error = %e, "search client init failed, using noop");
                    Arc::new(NoopSearch)
                }
            },
            None => {
                tracing::warn!(target: "verify", env = %cfg.api_key_env, "no search key; high-impact items will be inconclusive");
                Arc::new(NoopSearch)
            }
        };
    Verifier::new(provider, cfg.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Scripted {
        hits: Result<Vec<SearchHit>, SearchError>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl SearchProvider for Scripted {
        async fn search(&self, _q: &str, _d: u32, _m: usize) -> Result<Vec<SearchHit>, SearchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.hits.clone()
        }
        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, h, 0, 0).unwrap()
    }

    fn scored(score: u8) -> NewsItem {
        let mut it = NewsItem::candidate(
            "Reuters",
            "Microsoft agrees to acquire gaming studio for $2 billion",
            "",
            Some("https://www.reuters.com/msft".into()),
            at(9),
            at(9),
        )
        .with_tickers(["MSFT"]);
        it.impact_score = Some(ImpactScore::Scored(score));
        it
    }

    fn hit(host: &str, title: &str) -> SearchHit {
        SearchHit {
            title: title.into(),
            url: format!("https://{host}/story"),
            snippet: String::new(),
            published_at: Some(at(10)),
        }
    }

    fn verifier(hits: Result<Vec<SearchHit>, SearchError>) -> (Verifier, Arc<Scripted>) {
        let p = Arc::new(Scripted {
            hits,
            calls: AtomicU32::new(0),
        });
        let cfg = VerifierConfig {
            retry: RetryPolicy::immediate(2),
            ..VerifierConfig::default()
        };
        (Verifier::new(p.clone(), cfg), p)
    }

    #[tokio::test]
    async fn below_threshold_never_searches() {
        let (v, p) = verifier(Ok(vec![]));
        let verdict = v.verify(&scored(5), &Cancel::never()).await;
        assert_eq!(verdict.status, VerificationStatus::NotRequired);
        assert_eq!(p.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn independent_sources_corroborate() {
        let title = "Microsoft to acquire gaming studio in $2 billion deal";
        let (v, p) = verifier(Ok(vec![
            hit("cnbc.com", title),
            hit("bloomberg.com", title),
            hit("reuters.com", title),
            hit("unrelated.test", "Weather update for the weekend"),
        ]));
        let verdict = v.verify(&scored(9), &Cancel::never()).await;
        assert_eq!(verdict.status, VerificationStatus::Corroborated);
        assert_eq!(verdict.evidence.len(), 2);
        assert!(verdict.evidence.iter().all(|e| e.source != "reuters.com"));

        // cached: second call does not hit the provider
        v.verify(&scored(9), &Cancel::never()).await;
        assert_eq!(p.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn denial_contradicts() {
        let (v, _) = verifier(Ok(vec![
            hit("cnbc.com", "Microsoft denies report it will acquire gaming studio"),
            hit("wsj.com", "Microsoft gaming studio acquire talks"),
        ]));
        let verdict = v.verify(&scored(9), &Cancel::never()).await;
        assert_eq!(verdict.status, VerificationStatus::Contradicted);
    }

    #[tokio::test]
    async fn search_failure_is_inconclusive() {
        let (v, p) = verifier(Err(SearchError::Status(503)));
        let verdict = v.verify(&scored(9), &Cancel::never()).await;
        assert_eq!(verdict.status, VerificationStatus::Inconclusive);
        assert_eq!(verdict.failure, Some(SearchError::Status(503)));
        assert_eq!(p.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_score_stays_pending() {
        let (v, _) = verifier(Ok(vec![]));
        let mut it = scored(9);
        it.impact_score = Some(ImpactScore::Unknown);
        assert_eq!(v.verify(&it, &Cancel::never()).await.status, VerificationStatus::Pending);
    }

    #[test]
    fn query_uses_tickers_and_terms() {
        assert_eq!(
            build_query(&scored(9)),
            "MSFT microsoft agrees acquire gaming studio billion"
        );
    }
}
