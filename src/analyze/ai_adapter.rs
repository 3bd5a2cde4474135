//! AI adapter: scoring-provider abstraction, reply parsing, retry and a daily
//! call budget.
//!
//! The analyzer is a black-box classifier. Whatever the provider replies, only
//! a JSON object with an integer `impact_score` in `0..=10` and a known
//! direction is accepted; everything else is a parse failure, never a score.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ai::{AnalyzerConfig, ProviderConfig};
use crate::item::{Direction, ImpactScore, NewsItem};
use crate::retry::{with_retry, Cancel, Exhausted, RetryPolicy, Transient};

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

/// Parsed impact judgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub score: ImpactScore,
    pub direction: Direction,
    pub rationale: String,
    /// Symbols the model found; merged into the item, never replacing.
    pub tickers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error("inference timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider quota exceeded")]
    Quota,
    #[error("provider returned HTTP {0}")]
    Http(u16),
    #[error("malformed reply: {0}")]
    Malformed(String),
    #[error("analyzer disabled")]
    Disabled,
    #[error("daily analysis budget of {0} calls exhausted")]
    BudgetExhausted(u32),
}

impl Transient for AnalysisError {
    fn is_transient(&self) -> bool {
        match self {
            AnalysisError::Timeout(_)
            | AnalysisError::Transport(_)
            | AnalysisError::Quota
            | AnalysisError::Malformed(_) => true,
            AnalysisError::Http(code) => *code >= 500 || *code == 408,
            AnalysisError::Disabled | AnalysisError::BudgetExhausted(_) => false,
        }
    }

    fn timed_out(after: Duration) -> Self {
        AnalysisError::Timeout(after)
    }
}

impl From<reqwest::Error> for AnalysisError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AnalysisError::Timeout(Duration::ZERO)
        } else if let Some(s) = e.status() {
            classify_status(s.as_u16())
        } else if e.is_decode() {
            AnalysisError::Malformed(e.to_string())
        } else {
            AnalysisError::Transport(e.to_string())
        }
    }
}

fn classify_status(code: u16) -> AnalysisError {
    if code == 429 {
        AnalysisError::Quota
    } else {
        AnalysisError::Http(code)
    }
}

/// Low-level provider: one raw completion per call. Retry, budget and parsing
/// live in [`ImpactAnalyzer`] so every provider gets the same policy.
#[async_trait]
pub trait ScoringProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, AnalysisError>;
    fn name(&self) -> &str;
}

pub type DynScoringProvider = Arc<dyn ScoringProvider>;

// ------------------------------------------------------------
// Concrete providers
// ------------------------------------------------------------

/// OpenAI-compatible chat completions (OpenAI, Mistral, GLM).
pub struct ChatCompletionsProvider {
    http: reqwest::Client,
    cfg: ProviderConfig,
    api_key: String,
}

impl ChatCompletionsProvider {
    pub fn new(cfg: ProviderConfig, api_key: String, timeout: Duration) -> Result<Self, AnalysisError> {
        let http = reqwest::Client::builder()
            .user_agent(crate::ingest::providers::USER_AGENT)
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;
        Ok(Self { http, cfg, api_key })
    }
}

const SYSTEM_PROMPT: &str = "You are a financial news analyst. Rate the expected US stock price \
impact of the article. Reply with ONE JSON object and nothing else.";

#[async_trait]
impl ScoringProvider for ChatCompletionsProvider {
    async fn complete(&self, prompt: &str) -> Result<String, AnalysisError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: Option<String>,
        }

        let req = Req {
            model: &self.cfg.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Msg {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.cfg.temperature,
            max_tokens: self.cfg.max_tokens,
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.cfg.base_url))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(classify_status(resp.status().as_u16()));
        }
        let body: Resp = resp.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| AnalysisError::Malformed("empty completion".into()))
    }

    fn name(&self) -> &str {
        &self.cfg.name
    }
}

/// Always `Disabled`; used when no provider has a key.
pub struct DisabledProvider;

#[async_trait]
impl ScoringProvider for DisabledProvider {
    async fn complete(&self, _prompt: &str) -> Result<String, AnalysisError> {
        Err(AnalysisError::Disabled)
    }
    fn name(&self) -> &str {
        "disabled"
    }
}

/// Deterministic provider for tests and local runs.
pub enum MockProvider {
    /// Same reply for every prompt.
    Fixed(String),
    /// Keyword heuristic over the prompt text.
    Heuristic,
}

impl MockProvider {
    fn heuristic_reply(prompt: &str) -> String {
        // only the article lines; the instructions mention trigger words too
        let article = prompt
            .split_once("HEADLINE:")
            .map(|(_, rest)| rest.split_once("SOURCE:").map_or(rest, |(a, _)| a))
            .unwrap_or(prompt);
        let lower = article.to_lowercase();
        const HIGH: &[&str] = &["acquisition", "merger", "earnings", "fed ", "federal reserve", "recall", "lawsuit"];
        const UP: &[&str] = &["surge", "beat", "rise", "rally", "record", "soar", "upgrade"];
        const DOWN: &[&str] = &["plunge", "miss", "fall", "slide", "cut", "downgrade", "recall", "probe"];
        let mut score: i64 = 4;
        score += 3 * HIGH.iter().filter(|k| lower.contains(*k)).count().min(1) as i64;
        let up = UP.iter().filter(|k| lower.contains(*k)).count();
        let down = DOWN.iter().filter(|k| lower.contains(*k)).count();
        score += (up + down).min(2) as i64;
        let direction = match up.cmp(&down) {
            std::cmp::Ordering::Greater => "positive",
            std::cmp::Ordering::Less => "negative",
            std::cmp::Ordering::Equal => "neutral",
        };
        serde_json::json!({
            "impact_score": score.clamp(0, 10),
            "price_impact": direction,
            "reasoning": "Mock: keyword heuristic",
        })
        .to_string()
    }
}

#[async_trait]
impl ScoringProvider for MockProvider {
    async fn complete(&self, prompt: &str) -> Result<String, AnalysisError> {
        Ok(match self {
            MockProvider::Fixed(s) => s.clone(),
            MockProvider::Heuristic => Self::heuristic_reply(prompt),
        })
    }
    fn name(&self) -> &str {
        "mock"
    }
}

// ------------------------------------------------------------
// Prompt + reply parsing
// ------------------------------------------------------------

/// Article content in the prompt is capped to keep token use bounded.
const PROMPT_CONTENT_CHARS: usize = 500;

pub fn build_prompt(item: &NewsItem) -> String {
    let summary: String = item.summary.chars().take(PROMPT_CONTENT_CHARS).collect();
    let tickers = if item.tickers.is_empty() {
        "none detected".to_string()
    } else {
        item.tickers.join(", ")
    };
    format!(
        "Analyze this financial news for US stock market impact.\n\n\
         HEADLINE: {title}\n\
         SUMMARY: {summary}\n\
         SOURCE: {source}\n\
         KNOWN TICKERS: {tickers}\n\n\
         Reply as JSON:\n\
         {{\"tickers\": [\"TICKER\"], \"impact_score\": 0-10 integer, \
         \"direction\": \"up|down|neutral\", \"rationale\": \"one sentence\"}}\n\n\
         Scale: 10 market-changing (Fed decisions, huge M&A); 8-9 high (major earnings, \
         significant AI news); 6-7 medium (launches, analyst changes); 5 moderate; 0-4 low.",
        title = item.title,
        source = item.source_name,
    )
}

#[derive(Debug, Deserialize)]
struct RawReply {
    impact_score: serde_json::Value,
    #[serde(alias = "price_impact", alias = "price_impact_direction")]
    direction: Option<String>,
    #[serde(alias = "reasoning")]
    rationale: Option<String>,
    #[serde(default)]
    tickers: Vec<String>,
}

/// Extract and validate the JSON object in a model reply.
pub fn parse_analysis(raw: &str) -> Result<Analysis, AnalysisError> {
    let start = raw.find('{');
    let end = raw.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if e > s => &raw[s..=e],
        _ => return Err(AnalysisError::Malformed("no JSON object in reply".into())),
    };
    let reply: RawReply =
        serde_json::from_str(json).map_err(|e| AnalysisError::Malformed(e.to_string()))?;

    // integers only; 7.5, "7" or -1 are rejected rather than coerced
    let score = reply
        .impact_score
        .as_i64()
        .and_then(ImpactScore::new)
        .ok_or_else(|| AnalysisError::Malformed(format!("impact_score out of range: {}", reply.impact_score)))?;

    let direction = match reply.direction.as_deref() {
        Some(d) => Direction::parse(d)
            .ok_or_else(|| AnalysisError::Malformed(format!("unknown direction '{d}'")))?,
        None => return Err(AnalysisError::Malformed("missing direction".into())),
    };

    let rationale = sanitize_rationale(reply.rationale.as_deref().unwrap_or_default());
    let tickers = reply
        .tickers
        .into_iter()
        .map(|t| t.trim().trim_start_matches('$').to_ascii_uppercase())
        .filter(|t| (1..=5).contains(&t.len()) && t.chars().all(|c| c.is_ascii_alphabetic()))
        .collect();

    Ok(Analysis {
        score,
        direction,
        rationale,
        tickers,
    })
}

/// Single line, collapsed whitespace, at most 280 chars.
pub fn sanitize_rationale(input: &str) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(280).collect()
}

// ------------------------------------------------------------
// Daily budget
// ------------------------------------------------------------

/// Provider calls allowed per UTC day. Every attempt counts, successful or not.
pub struct DailyBudget {
    limit: u32,
    state: Mutex<(NaiveDate, u32)>,
}

impl DailyBudget {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            state: Mutex::new((Utc::now().date_naive(), 0)),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// Reserve one call; `false` when today's budget is spent.
    pub fn try_take(&self) -> bool {
        if self.limit == 0 {
            return true;
        }
        let today = Utc::now().date_naive();
        let mut g = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if g.0 != today {
            *g = (today, 0);
        }
        if g.1 >= self.limit {
            return false;
        }
        g.1 += 1;
        true
    }

    pub fn used_today(&self) -> u32 {
        let g = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if g.0 == Utc::now().date_naive() {
            g.1
        } else {
            0
        }
    }
}

// ------------------------------------------------------------
// Analyzer
// ------------------------------------------------------------

/// Scores items through one configured provider.
pub struct ImpactAnalyzer {
    provider: DynScoringProvider,
    retry: RetryPolicy,
    budget: DailyBudget,
}

impl ImpactAnalyzer {
    pub fn new(provider: DynScoringProvider, retry: RetryPolicy, budget: DailyBudget) -> Self {
        Self {
            provider,
            retry,
            budget,
        }
    }

    /// Malformed replies and transient transport errors are retried up to the
    /// policy's attempt limit.
    pub async fn analyze(&self, item: &NewsItem, cancel: &Cancel) -> Result<Analysis, Exhausted<AnalysisError>> {
        let prompt = build_prompt(item);
        with_retry(&self.retry, cancel, |attempt| {
            let prompt = prompt.as_str();
            async move {
                if !self.budget.try_take() {
                    return Err(AnalysisError::BudgetExhausted(self.budget.limit));
                }
                tracing::debug!(
                    target: "analyze",
                    identity = %item.identity,
                    attempt,
                    provider = self.provider.name(),
                    "scoring item"
                );
                let res = match self.provider.complete(prompt).await {
                    Ok(raw) => parse_analysis(&raw),
                    Err(e) => Err(e),
                };
                let outcome = match &res {
                    Ok(_) => "ok",
                    Err(AnalysisError::Malformed(_)) => "malformed",
                    Err(_) => "error",
                };
                counter!("news_ai_calls_total", "provider" => self.provider.name().to_string(), "outcome" => outcome)
                    .increment(1);
                res
            }
        })
        .await
    }
}

/// Pick the provider once at start-up:
///
/// * `AI_TEST_MODE=mock` gives the deterministic heuristic mock.
/// * `enabled = false` gives a disabled analyzer (every item stays unknown).
/// * Otherwise the primary if its key resolves, else the fallback, else disabled.
pub fn build_analyzer(cfg: &AnalyzerConfig) -> ImpactAnalyzer {
    let budget = DailyBudget::new(cfg.daily_limit);
    let attempt_timeout = Duration::from_millis(cfg.retry.attempt_timeout_ms.max(1));

    if std::env::var("AI_TEST_MODE").map(|v| v == "mock").unwrap_or(false) {
        tracing::info!(target: "analyze", "AI_TEST_MODE=mock, using heuristic scorer");
        return ImpactAnalyzer::new(Arc::new(MockProvider::Heuristic), cfg.retry, budget);
    }
    if !cfg.enabled {
        tracing::warn!(target: "analyze", "analyzer disabled in config");
        return ImpactAnalyzer::new(Arc::new(DisabledProvider), cfg.retry, budget);
    }

    let candidates = std::iter::once(&cfg.primary).chain(cfg.fallback.iter());
    for pc in candidates {
        let Some(key) = pc.resolved_key() else {
            tracing::warn!(target: "analyze", provider = %pc.name, env = %pc.api_key_env, "no API key, skipping provider");
            continue;
        };
        match ChatCompletionsProvider::new(pc.clone(), key, attempt_timeout) {
            Ok(p) => {
                // safe diagnostics only: never log the key
                tracing::info!(target: "analyze", provider = %pc.name, model = %pc.model, "scoring provider selected");
                return ImpactAnalyzer::new(Arc::new(p), cfg.retry, budget);
            }
            Err(e) => tracing::warn!(target: "analyze", provider = %pc.name, error = %e, "provider init failed"),
        }
    }

    tracing::warn!(target: "analyze", "no scoring provider available; items will stay unscored");
    ImpactAnalyzer::new(Arc::new(DisabledProvider), cfg.retry, budget)
}
