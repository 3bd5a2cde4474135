//! # Pipeline orchestrator
//! One run walks
//! `IDLE -> COLLECTING -> DEDUPLICATING -> ANALYZING -> VERIFYING -> PERSISTING -> DISTRIBUTING -> IDLE`.
//!
//! Per-item failures (a degraded source, an unscored item, a failed search,
//! an undelivered message) are counted and the run continues. A store
//! failure moves the run to `ERROR` and aborts it; nothing is distributed
//! and the next trigger starts from scratch.
//!
//! Only one run executes at a time (`run_lock`); a second caller gets
//! [`PipelineError::RunInProgress`]. The latest committed [`RunRecord`] is
//! published through a `watch` channel for status readers.

pub mod scheduler;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};

use crate::analyze::{build_analyzer, score_item, ImpactAnalyzer};
use crate::config::{resolve_secret, AppConfig};
use crate::dedup::{Classification, DedupConfig, Deduplicator};
use crate::distribute::{
    select_batch, DistributionConfig, Distributor, LogDistributor, WebhookDistributor,
};
use crate::error::PipelineError;
use crate::ingest::providers::build_sources;
use crate::ingest::types::{FetchQuery, SourceAdapter};
use crate::ingest::collect;
use crate::item::{ImpactScore, NewsItem, VerificationStatus};
use crate::retry::Cancel;
use crate::store::{DynStore, NewsQuery, UpsertOutcome};
use crate::verify::{build_verifier, Verifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Idle,
    Collecting,
    Deduplicating,
    Analyzing,
    Verifying,
    Persisting,
    Distributing,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Startup,
    Scheduled,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    /// Completed, but some items or sources failed; see the counts.
    Partial,
    Failed { stage: RunStage, reason: String },
    Cancelled { stage: RunStage },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub collected: usize,
    pub degraded_sources: usize,
    pub duplicates: usize,
    pub updates: usize,
    pub new_items: usize,
    pub reanalysis_backlog: usize,
    pub analyzed: usize,
    pub analysis_failures: usize,
    pub verified: usize,
    pub verification_failures: usize,
    pub persisted: usize,
    pub distributed: usize,
    pub distribution_failures: usize,
}

impl RunCounts {
    fn has_failures(&self) -> bool {
        self.degraded_sources + self.analysis_failures + self.verification_failures + self.distribution_failures
            > 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: u64,
    pub trigger: TriggerKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub counts: RunCounts,
    /// `source: reason` for each degraded adapter.
    pub degraded: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub stage: RunStage,
    pub running_since: Option<DateTime<Utc>>,
    pub runs_total: u64,
    pub last_run: Option<RunRecord>,
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self {
            stage: RunStage::Idle,
            running_since: None,
            runs_total: 0,
            last_run: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub lookback_hours: i64,
    pub max_items_per_source: usize,
    pub source_timeout_secs: u64,
    /// Stored `unknown`-score items re-scored per run.
    pub reanalysis_limit: usize,
    /// Concurrent store writes during PERSISTING.
    pub write_concurrency: usize,
    #[serde(flatten)]
    pub dedup: DedupConfig,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            lookback_hours: 3,
            max_items_per_source: 20,
            source_timeout_secs: 30,
            reanalysis_limit: 20,
            write_concurrency: 8,
            dedup: DedupConfig::default(),
        }
    }
}

impl PipelineSettings {
    pub(crate) fn sanitize(&mut self) {
        self.lookback_hours = self.lookback_hours.clamp(1, 24 * 7);
        self.max_items_per_source = self.max_items_per_source.clamp(1, 200);
        self.source_timeout_secs = self.source_timeout_secs.max(1);
        self.write_concurrency = self.write_concurrency.clamp(1, 64);
        let d = &mut self.dedup;
        d.duplicate_threshold = d.duplicate_threshold.clamp(0.0, 1.0);
        d.near_duplicate_threshold = d.near_duplicate_threshold.clamp(0.0, 1.0);
        d.carry_forward_similarity = d.carry_forward_similarity.clamp(0.0, 1.0);
    }
}

/// Collaborators one pipeline drives.
pub struct Components {
    pub sources: Vec<Arc<dyn SourceAdapter>>,
    pub analyzer: ImpactAnalyzer,
    pub verifier: Verifier,
    pub store: DynStore,
    pub distributor: Arc<dyn Distributor>,
}

enum Abort {
    Cancelled(RunStage),
    Failed(RunStage, PipelineError),
}

pub struct Pipeline {
    sources: Vec<Arc<dyn SourceAdapter>>,
    dedup: Deduplicator,
    analyzer: ImpactAnalyzer,
    verifier: Verifier,
    store: DynStore,
    distributor: Arc<dyn Distributor>,
    settings: PipelineSettings,
    distribution: DistributionConfig,
    analyzer_concurrency: usize,
    verifier_concurrency: usize,
    run_lock: Mutex<()>,
    next_run_id: AtomicU64,
    status_tx: watch::Sender<PipelineStatus>,
}

impl Pipeline {
    pub fn new(parts: Components, settings: PipelineSettings, distribution: DistributionConfig) -> Self {
        let (status_tx, _) = watch::channel(PipelineStatus::default());
        let analyzer_concurrency = 4;
        let verifier_concurrency = parts.verifier.config().concurrency.max(1);
        Self {
            sources: parts.sources,
            dedup: Deduplicator::new(settings.dedup),
            analyzer: parts.analyzer,
            verifier: parts.verifier,
            store: parts.store,
            distributor: parts.distributor,
            settings,
            distribution,
            analyzer_concurrency,
            verifier_concurrency,
            run_lock: Mutex::new(()),
            next_run_id: AtomicU64::new(1),
            status_tx,
        }
    }

    pub fn with_analyzer_concurrency(mut self, n: usize) -> Self {
        self.analyzer_concurrency = n.max(1);
        self
    }

    /// Wire every collaborator from configuration.
    pub fn from_config(cfg: &AppConfig, store: DynStore) -> Self {
        let distributor: Arc<dyn Distributor> =
            match resolve_secret(&cfg.distribution.webhook_url, &cfg.distribution.webhook_url_env) {
                Some(url) => {
                    tracing::info!(target: "pipeline", flavor = ?cfg.distribution.flavor, "webhook distribution enabled");
                    Arc::new(WebhookDistributor::new(url, cfg.distribution.flavor).with_retry(cfg.distribution.retry))
                }
                None => {
                    tracing::warn!(target: "pipeline", "no webhook configured; distributing to the log");
                    Arc::new(LogDistributor)
                }
            };
        let parts = Components {
            sources: build_sources(&cfg.sources),
            analyzer: build_analyzer(&cfg.analyzer),
            verifier: build_verifier(&cfg.verifier),
            store,
            distributor,
        };
        Pipeline::new(parts, cfg.pipeline.clone(), cfg.distribution.clone())
            .with_analyzer_concurrency(cfg.analyzer.concurrency)
    }

    pub fn store(&self) -> &DynStore {
        &self.store
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Latest committed status.
    pub fn status(&self) -> PipelineStatus {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineStatus> {
        self.status_tx.subscribe()
    }

    fn enter(&self, stage: RunStage) {
        self.status_tx.send_modify(|s| s.stage = stage);
        tracing::debug!(target: "pipeline", stage = ?stage, "stage");
    }

    fn checkpoint(cancel: &Cancel, stage: RunStage) -> Result<(), Abort> {
        if cancel.is_cancelled() {
            Err(Abort::Cancelled(stage))
        } else {
            Ok(())
        }
    }

    /// Execute one full run. Store failures end in a `Failed` record, not an
    /// `Err`; the only error is a concurrent run.
    pub async fn run(&self, trigger: TriggerKind, cancel: &Cancel) -> Result<RunRecord, PipelineError> {
        let _guard = self.run_lock.try_lock().map_err(|_| PipelineError::RunInProgress)?;
        crate::metrics::ensure_described();

        let run_id = self.next_run_id.fetch_add(1, Ordering::SeqCst);
        let started_at = Utc::now();
        self.status_tx.send_modify(|s| s.running_since = Some(started_at));
        tracing::info!(target: "pipeline", run_id, trigger = ?trigger, "run started");

        let mut counts = RunCounts::default();
        let mut degraded = Vec::new();
        let result = self.execute(&mut counts, &mut degraded, cancel).await;

        let (outcome, final_stage) = match result {
            Ok(()) if counts.has_failures() => (RunOutcome::Partial, RunStage::Idle),
            Ok(()) => (RunOutcome::Success, RunStage::Idle),
            Err(Abort::Cancelled(stage)) => (RunOutcome::Cancelled { stage }, RunStage::Idle),
            Err(Abort::Failed(stage, err)) => {
                tracing::error!(target: "pipeline", run_id, stage = ?stage, error = %err, "run aborted");
                counter!("pipeline_run_failures_total").increment(1);
                (
                    RunOutcome::Failed {
                        stage,
                        reason: err.to_string(),
                    },
                    RunStage::Error,
                )
            }
        };

        let record = RunRecord {
            run_id,
            trigger,
            started_at,
            finished_at: Utc::now(),
            outcome,
            counts,
            degraded,
        };
        counter!("pipeline_runs_total", "outcome" => outcome_label(&record.outcome)).increment(1);
        gauge!("pipeline_last_run_ts").set(record.finished_at.timestamp() as f64);
        tracing::info!(
            target: "pipeline",
            run_id,
            outcome = outcome_label(&record.outcome),
            collected = record.counts.collected,
            persisted = record.counts.persisted,
            distributed = record.counts.distributed,
            "run finished"
        );

        let committed = record.clone();
        self.status_tx.send_modify(move |s| {
            s.stage = final_stage;
            s.running_since = None;
            s.runs_total += 1;
            s.last_run = Some(committed);
        });
        Ok(record)
    }

    async fn execute(&self, counts: &mut RunCounts, degraded: &mut Vec<String>, cancel: &Cancel) -> Result<(), Abort> {
        // COLLECTING
        self.enter(RunStage::Collecting);
        let query = FetchQuery::recent(self.settings.lookback_hours, self.settings.max_items_per_source);
        let collected = collect(
            &self.sources,
            &query,
            Duration::from_secs(self.settings.source_timeout_secs),
        )
        .await;
        counts.collected = collected.items.len();
        counts.degraded_sources = collected.degraded.len();
        degraded.extend(collected.degraded.iter().map(|(s, r)| format!("{s}: {r}")));
        Self::checkpoint(cancel, RunStage::Collecting)?;

        // DEDUPLICATING
        self.enter(RunStage::Deduplicating);
        let mut work = self.deduplicate(collected.items, counts).await?;
        Self::checkpoint(cancel, RunStage::Deduplicating)?;

        // ANALYZING
        self.enter(RunStage::Analyzing);
        let (to_score, mut ready): (Vec<NewsItem>, Vec<NewsItem>) =
            work.drain(..).partition(NewsItem::needs_analysis);
        let scored: Vec<(NewsItem, bool)> = stream::iter(to_score)
            .map(|mut item| async move {
                let ok = score_item(&self.analyzer, &mut item, cancel).await.is_ok();
                (item, ok)
            })
            .buffer_unordered(self.analyzer_concurrency)
            .collect()
            .await;
        for (item, ok) in scored {
            if ok {
                counts.analyzed += 1;
            } else {
                counts.analysis_failures += 1;
            }
            ready.push(item);
        }
        Self::checkpoint(cancel, RunStage::Analyzing)?;

        // VERIFYING
        self.enter(RunStage::Verifying);
        let (pending, mut done): (Vec<NewsItem>, Vec<NewsItem>) = ready.into_iter().partition(|it| {
            it.verification_status == VerificationStatus::Pending
                && matches!(it.impact_score, Some(ImpactScore::Scored(_)))
        });
        let verified: Vec<(NewsItem, bool, Option<PipelineError>)> = stream::iter(pending)
            .map(|mut item| async move {
                let searched = self.verifier.requires_search(&item);
                let verdict = self.verifier.verify(&item, cancel).await;
                let failure = verdict.failure.as_ref().map(|e| PipelineError::VerificationFailure {
                    identity: item.identity.clone(),
                    reason: e.to_string(),
                });
                match &verdict.failure {
                    Some(e) => item.mark_verification_failed(e.to_string()),
                    None => item.apply_verification(verdict.status, verdict.evidence),
                };
                (item, searched, failure)
            })
            .buffer_unordered(self.verifier_concurrency)
            .collect()
            .await;
        for (item, searched, failure) in verified {
            if searched {
                counts.verified += 1;
            }
            if let Some(err) = failure {
                counts.verification_failures += 1;
                tracing::warn!(target: "verify", error = %err, "verification failed, item inconclusive but still eligible");
            }
            done.push(item);
        }
        Self::checkpoint(cancel, RunStage::Verifying)?;

        // PERSISTING
        self.enter(RunStage::Persisting);
        let store = &self.store;
        let writes: Vec<_> = stream::iter(done)
            .map(|item| async move { store.upsert(item).await })
            .buffer_unordered(self.settings.write_concurrency)
            .collect()
            .await;
        for w in writes {
            match w {
                Ok(UpsertOutcome::Inserted | UpsertOutcome::Updated) => counts.persisted += 1,
                Ok(UpsertOutcome::Unchanged) => {}
                Err(e) => return Err(Abort::Failed(RunStage::Persisting, e.into())),
            }
        }
        Self::checkpoint(cancel, RunStage::Persisting)?;

        // DISTRIBUTING
        self.enter(RunStage::Distributing);
        self.distribute(counts).await
    }

    /// Collapse cross-source near-duplicates, classify the rest against the
    /// store and append the re-analysis backlog.
    async fn deduplicate(&self, candidates: Vec<NewsItem>, counts: &mut RunCounts) -> Result<Vec<NewsItem>, Abort> {
        let fail = |e: crate::store::StoreError| Abort::Failed(RunStage::Deduplicating, e.into());

        let recent = match candidates.iter().map(|c| c.published_at).min() {
            Some(earliest) => self
                .store
                .query(&NewsQuery {
                    since: Some(earliest - Deduplicator::story_window()),
                    ..NewsQuery::default()
                })
                .await
                .map_err(fail)?,
            None => Vec::new(),
        };
        let batch = self.dedup.collapse_batch(candidates, &recent);
        for (dropped, winner) in &batch.dropped {
            tracing::debug!(target: "dedup", dropped = %dropped.identity, winner = %winner, "near-duplicate collapsed");
        }
        counts.duplicates += batch.dropped.len();

        let mut work = Vec::with_capacity(batch.kept.len());
        for cand in batch.kept {
            let existing = self.store.get(&cand.identity).await.map_err(fail)?;
            match self.dedup.classify(&cand, existing.as_ref()) {
                Classification::New => {
                    counts.new_items += 1;
                    work.push(cand);
                }
                Classification::Duplicate => counts.duplicates += 1,
                Classification::Update(diff) => {
                    // `existing` is Some for every UPDATE
                    let Some(prev) = existing else { continue };
                    tracing::info!(
                        target: "dedup",
                        identity = %prev.identity,
                        similarity = diff.similarity,
                        carry_forward = diff.carry_forward,
                        new_tickers = ?diff.new_tickers,
                        "content update"
                    );
                    counts.updates += 1;
                    work.push(prev.revise_from(&cand, diff.carry_forward));
                }
            }
        }
        counter!("news_duplicates_total").increment(counts.duplicates as u64);
        counter!("news_updates_total").increment(counts.updates as u64);

        if self.settings.reanalysis_limit > 0 {
            let backlog = self
                .store
                .query(&NewsQuery {
                    unscored_only: true,
                    limit: Some(self.settings.reanalysis_limit),
                    ..NewsQuery::default()
                })
                .await
                .map_err(fail)?;
            let queued: HashSet<_> = work.iter().map(|w| w.identity.clone()).collect();
            for item in backlog.into_iter().filter(|b| !queued.contains(&b.identity)) {
                counts.reanalysis_backlog += 1;
                work.push(item);
            }
        }
        Ok(work)
    }

    async fn distribute(&self, counts: &mut RunCounts) -> Result<(), Abort> {
        let fail = |e: crate::store::StoreError| Abort::Failed(RunStage::Distributing, e.into());

        let candidates = self
            .store
            .query(&NewsQuery {
                min_impact: Some(self.distribution.threshold),
                undistributed_only: true,
                ..NewsQuery::default()
            })
            .await
            .map_err(fail)?;
        let batch = select_batch(candidates, &self.distribution);
        if batch.is_empty() {
            tracing::info!(target: "pipeline", "nothing qualifies for distribution");
            return Ok(());
        }

        let deliveries = self.distributor.distribute(&batch).await;
        let now = Utc::now();
        for item in &batch {
            let delivered = deliveries
                .iter()
                .any(|d| d.identity == item.identity && d.delivered());
            if !delivered {
                counts.distribution_failures += 1;
                continue;
            }
            if self.store.mark_distributed(&item.identity, now).await.map_err(fail)? {
                counts.distributed += 1;
            }
        }
        counter!("news_distributed_total").increment(counts.distributed as u64);
        counter!("news_distribution_failures_total").increment(counts.distribution_failures as u64);

        if counts.distribution_failures > 0 {
            let err = PipelineError::DistributionPartialFailure {
                delivered: counts.distributed,
                failed: counts.distribution_failures,
            };
            tracing::warn!(target: "pipeline", distributor = self.distributor.name(), error = %err, "undelivered items stay eligible");
        }
        Ok(())
    }
}

pub fn outcome_label(o: &RunOutcome) -> &'static str {
    match o {
        RunOutcome::Success => "success",
        RunOutcome::Partial => "partial",
        RunOutcome::Failed { .. } => "failed",
        RunOutcome::Cancelled { .. } => "cancelled",
    }
}
