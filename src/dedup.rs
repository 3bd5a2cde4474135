//! # Deduplication
//! Two decisions live here:
//! - [`Deduplicator::collapse_batch`] folds near-duplicate candidates from
//!   different sources within one run down to a single winner.
//! - [`Deduplicator::classify`] compares a surviving candidate with the stored
//!   record of the same identity: NEW, DUPLICATE or UPDATE.
//!
//! Similarity is Sørensen-Dice over character bigrams of the normalized
//! title + summary (`strsim::sorensen_dice`).

use chrono::Duration;
use serde::{Deserialize, Serialize};
use strsim::sorensen_dice;

use crate::item::{title_key, Identity, NewsItem};

/// Equal headlines further apart than this are treated as different stories.
const SAME_STORY_WINDOW_HOURS: i64 = 6;

/// What to do with an UPDATE's prior judgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    /// Always discard the prior score/verification and re-analyze.
    Reanalyze,
    /// Keep the prior judgement when the new text is still similar enough.
    #[default]
    ReuseWhenSimilar,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateDiff {
    pub similarity: f64,
    /// Tickers the candidate mentions that the stored record does not.
    pub new_tickers: Vec<String>,
    pub text_changed: bool,
    /// Prior `impact_score`/`verification_status` survive into the revision.
    pub carry_forward: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    New,
    Duplicate,
    Update(UpdateDiff),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Same identity at or above this similarity (and no new tickers) is a duplicate.
    pub duplicate_threshold: f64,
    /// Cross-source candidates at or above this similarity collapse into one.
    pub near_duplicate_threshold: f64,
    /// UPDATEs at or above this similarity keep their prior judgement.
    pub carry_forward_similarity: f64,
    pub update_policy: UpdatePolicy,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            duplicate_threshold: 0.97,
            near_duplicate_threshold: 0.9,
            carry_forward_similarity: 0.9,
            update_policy: UpdatePolicy::default(),
        }
    }
}

/// Lowercased, punctuation-free title + summary.
pub fn normalized_content(item: &NewsItem) -> String {
    title_key(&item.content_text())
}

/// Similarity in `0.0..=1.0`; identical normalized text is exactly 1.0.
pub fn similarity(a: &NewsItem, b: &NewsItem) -> f64 {
    let (na, nb) = (normalized_content(a), normalized_content(b));
    if na == nb {
        return 1.0;
    }
    sorensen_dice(&na, &nb)
}

/// Outcome of folding one run's candidates.
#[derive(Debug, Default)]
pub struct CollapsedBatch {
    pub kept: Vec<NewsItem>,
    /// Losers paired with the identity of the candidate they collapsed into.
    pub dropped: Vec<(NewsItem, Identity)>,
}

#[derive(Debug, Clone, Default)]
pub struct Deduplicator {
    cfg: DedupConfig,
}

impl Deduplicator {
    pub fn new(cfg: DedupConfig) -> Self {
        Self { cfg }
    }

    pub fn classify(&self, candidate: &NewsItem, existing: Option<&NewsItem>) -> Classification {
        let Some(existing) = existing else {
            return Classification::New;
        };

        let sim = similarity(existing, candidate);
        let new_tickers: Vec<String> = candidate
            .tickers
            .iter()
            .filter(|t| !existing.tickers.contains(t))
            .cloned()
            .collect();
        let text_changed = sim < 1.0;

        if new_tickers.is_empty() && sim >= self.cfg.duplicate_threshold {
            return Classification::Duplicate;
        }

        let carry_forward = match self.cfg.update_policy {
            UpdatePolicy::Reanalyze => false,
            UpdatePolicy::ReuseWhenSimilar => sim >= self.cfg.carry_forward_similarity,
        };
        Classification::Update(UpdateDiff {
            similarity: sim,
            new_tickers,
            text_changed,
            carry_forward,
        })
    }

    fn is_near_duplicate(&self, a: &NewsItem, b: &NewsItem) -> bool {
        if a.identity == b.identity {
            return true;
        }
        let close_in_time = (a.published_at - b.published_at).abs()
            <= Duration::hours(SAME_STORY_WINDOW_HOURS);
        if close_in_time && title_key(&a.title) == title_key(&b.title) {
            return true;
        }
        similarity(a, b) >= self.cfg.near_duplicate_threshold
    }

    /// Fold near-duplicates. `stored` holds records already persisted around
    /// the same time: a candidate carrying a stored identity wins its group,
    /// and a candidate that only repeats a stored story under another
    /// identity is dropped against it. Otherwise the winner has the richest
    /// body; ties go to the earliest `published_at`, then the smaller
    /// identity so the result does not depend on arrival order. Tickers of
    /// dropped candidates are merged into an in-batch winner.
    pub fn collapse_batch(&self, mut candidates: Vec<NewsItem>, stored: &[NewsItem]) -> CollapsedBatch {
        let is_stored = |id: &Identity| stored.iter().any(|s| &s.identity == id);
        candidates.sort_by(|a, b| {
            is_stored(&b.identity)
                .cmp(&is_stored(&a.identity))
                .then_with(|| body_richness(b).cmp(&body_richness(a)))
                .then_with(|| a.published_at.cmp(&b.published_at))
                .then_with(|| a.identity.cmp(&b.identity))
        });

        let mut out = CollapsedBatch::default();
        for cand in candidates {
            if let Some(winner) = out.kept.iter_mut().find(|k| self.is_near_duplicate(k, &cand)) {
                winner.add_tickers(cand.tickers.iter());
                let winner_id = winner.identity.clone();
                out.dropped.push((cand, winner_id));
                continue;
            }
            if !is_stored(&cand.identity) {
                let prior = stored
                    .iter()
                    .find(|s| s.identity != cand.identity && self.is_near_duplicate(s, &cand));
                if let Some(prior) = prior {
                    let prior_id = prior.identity.clone();
                    out.dropped.push((cand, prior_id));
                    continue;
                }
            }
            out.kept.push(cand);
        }
        out
    }

    /// How far either side of a candidate stored copies are looked for.
    pub fn story_window() -> Duration {
        Duration::hours(SAME_STORY_WINDOW_HOURS)
    }
}

fn body_richness(item: &NewsItem) -> usize {
    item.summary.chars().filter(|c| !c.is_whitespace()).count()
}
