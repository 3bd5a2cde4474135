//! # News items
//! The record every pipeline stage reads and enriches: identity, content,
//! impact judgement, verification state and distribution timestamp.
//!
//! Items only ever gain information. The helpers here (`apply_analysis`,
//! `revise_from`, `merge_from`) are the only places where fields change after
//! collection.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Stable dedup and storage key (hex SHA-256 prefix).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Fingerprint from source + canonical URL, or source + normalized title +
    /// publish minute when the item has no URL.
    pub fn derive(source: &str, url: Option<&str>, title: &str, published_at: DateTime<Utc>) -> Self {
        let source_key = source.trim().to_ascii_lowercase();
        let material = match url.map(canonical_url).filter(|u| !u.is_empty()) {
            Some(u) => format!("url\n{source_key}\n{u}"),
            None => {
                let minute = published_at
                    .with_second(0)
                    .and_then(|t| t.with_nanosecond(0))
                    .unwrap_or(published_at);
                format!(
                    "title\n{source_key}\n{}\n{}",
                    title_key(title),
                    minute.timestamp()
                )
            }
        };
        let digest = Sha256::digest(material.as_bytes());
        let mut out = String::with_capacity(32);
        for b in digest.iter().take(16) {
            use std::fmt::Write as _;
            let _ = write!(&mut out, "{b:02x}");
        }
        Identity(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Identity(s.to_string())
    }
}

/// Lowercase scheme/host, drop fragment, `utm_*` params and trailing slash.
pub fn canonical_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let no_fragment = trimmed.split('#').next().unwrap_or_default();
    let (base, query) = match no_fragment.split_once('?') {
        Some((b, q)) => (b, Some(q)),
        None => (no_fragment, None),
    };

    let base = match base.split_once("://") {
        Some((scheme, rest)) => {
            let (host, path) = match rest.find('/') {
                Some(i) => (&rest[..i], &rest[i..]),
                None => (rest, ""),
            };
            let host = host.to_ascii_lowercase();
            let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
            format!("{}://{}{}", scheme.to_ascii_lowercase(), host, path)
        }
        None => base.to_string(),
    };
    let base = base.trim_end_matches('/').to_string();

    let kept: Vec<&str> = query
        .map(|q| {
            q.split('&')
                .filter(|p| !p.is_empty() && !p.to_ascii_lowercase().starts_with("utm_"))
                .collect()
        })
        .unwrap_or_default();

    if kept.is_empty() {
        base
    } else {
        format!("{}?{}", base, kept.join("&"))
    }
}

/// Host part of a URL without `www.`, lowercase.
pub fn url_host(raw: &str) -> Option<String> {
    let rest = raw.trim().split_once("://")?.1;
    let host = rest.split(['/', '?', '#']).next()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Lowercase alphanumeric words joined by single spaces.
pub fn title_key(title: &str) -> String {
    title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Impact judgement. `Unknown` marks an item whose analysis failed and which
/// awaits re-analysis; it never qualifies for distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactScore {
    Scored(u8),
    Unknown,
}

impl ImpactScore {
    pub const MAX: u8 = 10;

    /// Only values in `0..=10` are representable.
    pub fn new(value: i64) -> Option<Self> {
        u8::try_from(value)
            .ok()
            .filter(|v| *v <= Self::MAX)
            .map(ImpactScore::Scored)
    }

    pub fn value(self) -> Option<u8> {
        match self {
            ImpactScore::Scored(v) => Some(v),
            ImpactScore::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Neutral,
    #[default]
    Unknown,
}

impl Direction {
    /// Strict parse; anything outside the known vocabulary is `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "up" | "positive" | "bullish" => Some(Direction::Up),
            "down" | "negative" | "bearish" => Some(Direction::Down),
            "neutral" => Some(Direction::Neutral),
            "unknown" => Some(Direction::Unknown),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Direction::Up => "Positive",
            Direction::Down => "Negative",
            Direction::Neutral => "Neutral",
            Direction::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    NotRequired,
    #[default]
    Pending,
    Corroborated,
    Contradicted,
    Inconclusive,
}

/// A search hit kept as corroboration (or contradiction) evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub source: String,
    pub title: String,
    pub url: String,
    pub supports: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub identity: Identity,
    #[serde(default)]
    pub tickers: Vec<String>,
    pub title: String,
    pub summary: String,
    pub url: Option<String>,
    pub source_name: String,
    pub published_at: DateTime<Utc>,
    pub collected_at: DateTime<Utc>,
    pub impact_score: Option<ImpactScore>,
    #[serde(default)]
    pub direction: Direction,
    pub rationale: Option<String>,
    #[serde(default)]
    pub verification_status: VerificationStatus,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    /// Why the search behind an `Inconclusive` status failed, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_error: Option<String>,
    pub distributed_at: Option<DateTime<Utc>>,
    /// Bumped on every explicit content revision (UPDATE classification).
    #[serde(default)]
    pub revision: u32,
}

impl NewsItem {
    /// Fresh candidate as produced by a source adapter.
    pub fn candidate(
        source_name: impl Into<String>,
        title: impl Into<String>,
        summary: impl Into<String>,
        url: Option<String>,
        published_at: DateTime<Utc>,
        collected_at: DateTime<Utc>,
    ) -> Self {
        let source_name = source_name.into();
        let title = title.into();
        let url = url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty());
        let identity = Identity::derive(&source_name, url.as_deref(), &title, published_at);
        Self {
            identity,
            tickers: Vec::new(),
            title,
            summary: summary.into(),
            url,
            source_name,
            published_at,
            collected_at,
            impact_score: None,
            direction: Direction::Unknown,
            rationale: None,
            verification_status: VerificationStatus::Pending,
            evidence: Vec::new(),
            verification_error: None,
            distributed_at: None,
            revision: 0,
        }
    }

    pub fn with_tickers<I, S>(mut self, tickers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.add_tickers(tickers);
        self
    }

    /// Union in uppercase, preserving first-seen order.
    pub fn add_tickers<I, S>(&mut self, tickers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for t in tickers {
            let t = t.as_ref().trim().trim_start_matches('$').to_ascii_uppercase();
            if !t.is_empty() && !self.tickers.contains(&t) {
                self.tickers.push(t);
            }
        }
    }

    pub fn score(&self) -> Option<u8> {
        self.impact_score.and_then(ImpactScore::value)
    }

    pub fn needs_analysis(&self) -> bool {
        !matches!(self.impact_score, Some(ImpactScore::Scored(_)))
    }

    /// Record a judgement. Only unscored or `Unknown` items accept one.
    pub fn apply_analysis(
        &mut self,
        score: ImpactScore,
        direction: Direction,
        rationale: String,
        tickers: &[String],
    ) -> bool {
        if !self.needs_analysis() {
            return false;
        }
        self.impact_score = Some(score);
        self.direction = direction;
        self.rationale = (!rationale.is_empty()).then_some(rationale);
        self.add_tickers(tickers);
        true
    }

    /// Analysis gave up; the item is kept for later re-analysis.
    pub fn mark_unknown(&mut self) {
        if self.needs_analysis() {
            self.impact_score = Some(ImpactScore::Unknown);
        }
    }

    /// Resolve a pending verification. Resolved states are final.
    pub fn apply_verification(&mut self, status: VerificationStatus, evidence: Vec<Evidence>) -> bool {
        if self.verification_status != VerificationStatus::Pending || status == VerificationStatus::Pending {
            return false;
        }
        self.verification_status = status;
        self.evidence = evidence;
        true
    }

    /// The search itself failed: inconclusive, with the reason kept so the
    /// item is not held back from distribution.
    pub fn mark_verification_failed(&mut self, reason: impl Into<String>) -> bool {
        if !self.apply_verification(VerificationStatus::Inconclusive, Vec::new()) {
            return false;
        }
        self.verification_error = Some(reason.into());
        true
    }

    /// Text the analyzer and similarity checks look at.
    pub fn content_text(&self) -> String {
        if self.summary.is_empty() {
            self.title.clone()
        } else {
            format!("{} {}", self.title, self.summary)
        }
    }

    /// Next revision built from `incoming` content on top of `self`.
    /// `carry_forward` keeps the prior judgement; otherwise the revision awaits
    /// re-analysis. `distributed_at` always survives.
    pub fn revise_from(&self, incoming: &NewsItem, carry_forward: bool) -> NewsItem {
        let mut next = incoming.clone();
        next.identity = self.identity.clone();
        next.revision = self.revision.saturating_add(1);
        next.distributed_at = self.distributed_at;
        next.collected_at = self.collected_at.min(incoming.collected_at);
        let mut tickers = self.tickers.clone();
        for t in &incoming.tickers {
            if !tickers.contains(t) {
                tickers.push(t.clone());
            }
        }
        next.tickers = tickers;
        if carry_forward {
            next.impact_score = self.impact_score;
            next.direction = self.direction;
            next.rationale = self.rationale.clone();
            next.verification_status = self.verification_status;
            next.evidence = self.evidence.clone();
            next.verification_error = self.verification_error.clone();
        } else {
            next.impact_score = None;
            next.direction = Direction::Unknown;
            next.rationale = None;
            next.verification_status = VerificationStatus::Pending;
            next.evidence.clear();
            next.verification_error = None;
        }
        next
    }

    /// Merge a same-identity write into the stored record (`self`).
    /// Returns `true` when anything changed.
    pub fn merge_from(&mut self, incoming: NewsItem) -> bool {
        if incoming.revision > self.revision {
            let distributed_at = self.distributed_at.or(incoming.distributed_at);
            *self = incoming;
            self.distributed_at = distributed_at;
            return true;
        }
        if incoming.revision < self.revision {
            return false;
        }

        let mut changed = false;
        if self.needs_analysis() {
            if let Some(score) = incoming.impact_score {
                if self.impact_score != Some(score) {
                    self.impact_score = Some(score);
                    self.direction = incoming.direction;
                    self.rationale = incoming.rationale.clone();
                    changed = true;
                }
            }
        }
        if self.verification_status == VerificationStatus::Pending
            && incoming.verification_status != VerificationStatus::Pending
        {
            self.verification_status = incoming.verification_status;
            self.evidence = incoming.evidence.clone();
            self.verification_error = incoming.verification_error.clone();
            changed = true;
        }
        let before = self.tickers.len();
        self.add_tickers(incoming.tickers.iter());
        changed |= self.tickers.len() != before;
        if self.distributed_at.is_none() && incoming.distributed_at.is_some() {
            self.distributed_at = incoming.distributed_at;
            changed = true;
        }
        changed
    }
}
