// tests/pipeline_run.rs
//
// End-to-end runs of the orchestrator with in-process collaborators:
// a static source, a scripted scorer, scripted search, a store that can be
// switched off, and a distributor that records what it was handed.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use stock_news_pipeline::analyze::{AnalysisError, DailyBudget, ImpactAnalyzer, ScoringProvider};
use stock_news_pipeline::distribute::{Delivery, DistributionConfig, Distributor};
use stock_news_pipeline::ingest::types::{FetchQuery, SourceAdapter, SourceError};
use stock_news_pipeline::item::{Identity, ImpactScore, NewsItem, VerificationStatus};
use stock_news_pipeline::pipeline::{Components, PipelineSettings};
use stock_news_pipeline::retry::{Cancel, RetryPolicy};
use stock_news_pipeline::store::{
    DynStore, MemoryStore, NewsQuery, Store, StoreError, UpsertOutcome,
};
use stock_news_pipeline::verify::{
    NoopSearch, SearchError, SearchHit, SearchProvider, Verifier, VerifierConfig,
};
use stock_news_pipeline::{Pipeline, PipelineError, RunOutcome, RunStage, TriggerKind};

// ---------- collaborators ----------

struct StaticSource {
    items: Mutex<Vec<NewsItem>>,
    delay: Duration,
}

impl StaticSource {
    fn new(items: Vec<NewsItem>) -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(items),
            delay: Duration::ZERO,
        })
    }

    fn slow(items: Vec<NewsItem>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(items),
            delay,
        })
    }

    fn replace(&self, items: Vec<NewsItem>) {
        *self.items.lock().unwrap() = items;
    }
}

#[async_trait]
impl SourceAdapter for StaticSource {
    async fn fetch(&self, _query: &FetchQuery) -> Result<Vec<NewsItem>, SourceError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.items.lock().unwrap().clone())
    }
    fn name(&self) -> &str {
        "Static Wire"
    }
}

struct DownSource;

#[async_trait]
impl SourceAdapter for DownSource {
    async fn fetch(&self, _query: &FetchQuery) -> Result<Vec<NewsItem>, SourceError> {
        Err(SourceError::Status(503))
    }
    fn name(&self) -> &str {
        "Down Wire"
    }
}

/// Scores by headline: first table entry whose key appears in the prompt.
struct ScriptedScorer {
    table: Vec<(&'static str, u8)>,
    calls: AtomicU32,
}

impl ScriptedScorer {
    fn new(table: &[(&'static str, u8)]) -> Arc<Self> {
        Arc::new(Self {
            table: table.to_vec(),
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl ScoringProvider for ScriptedScorer {
    async fn complete(&self, prompt: &str) -> Result<String, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let score = self
            .table
            .iter()
            .find(|(k, _)| prompt.contains(k))
            .map(|(_, s)| *s)
            .unwrap_or(3);
        Ok(format!(
            r#"{{"impact_score": {score}, "direction": "up", "rationale": "scripted"}}"#
        ))
    }
    fn name(&self) -> &str {
        "scripted"
    }
}

/// Every call times out.
struct StalledScorer {
    calls: AtomicU32,
}

#[async_trait]
impl ScoringProvider for StalledScorer {
    async fn complete(&self, _prompt: &str) -> Result<String, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(AnalysisError::Timeout(Duration::from_secs(30)))
    }
    fn name(&self) -> &str {
        "stalled"
    }
}

/// Two independent outlets repeating the query.
struct Corroborating;

#[async_trait]
impl SearchProvider for Corroborating {
    async fn search(&self, query: &str, _days: u32, _max: usize) -> Result<Vec<SearchHit>, SearchError> {
        Ok(["https://first-outlet.test/a", "https://second-outlet.test/b"]
            .iter()
            .map(|u| SearchHit {
                title: query.to_string(),
                url: u.to_string(),
                snippet: String::new(),
                published_at: None,
            })
            .collect())
    }
    fn name(&self) -> &str {
        "corroborating"
    }
}

/// Search backend that is down.
struct SearchOutage;

#[async_trait]
impl SearchProvider for SearchOutage {
    async fn search(&self, _query: &str, _days: u32, _max: usize) -> Result<Vec<SearchHit>, SearchError> {
        Err(SearchError::Status(503))
    }
    fn name(&self) -> &str {
        "outage"
    }
}

/// Memory store whose writes can be switched off.
struct FlakyStore {
    inner: MemoryStore,
    down: AtomicBool,
}

impl FlakyStore {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            down: AtomicBool::new(false),
        })
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn get(&self, identity: &Identity) -> Result<Option<NewsItem>, StoreError> {
        self.inner.get(identity).await
    }
    async fn upsert(&self, item: NewsItem) -> Result<UpsertOutcome, StoreError> {
        self.check()?;
        self.inner.upsert(item).await
    }
    async fn query(&self, query: &NewsQuery) -> Result<Vec<NewsItem>, StoreError> {
        self.inner.query(query).await
    }
    async fn mark_distributed(&self, identity: &Identity, at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.mark_distributed(identity, at).await
    }
    async fn len(&self) -> Result<usize, StoreError> {
        self.inner.len().await
    }
}

#[derive(Default)]
struct Recorder {
    batches: Mutex<Vec<Vec<NewsItem>>>,
    reject_titles: Vec<&'static str>,
}

impl Recorder {
    fn batches(&self) -> Vec<Vec<NewsItem>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl Distributor for Recorder {
    async fn distribute(&self, batch: &[NewsItem]) -> Vec<Delivery> {
        self.batches.lock().unwrap().push(batch.to_vec());
        batch
            .iter()
            .map(|it| {
                if self.reject_titles.iter().any(|t| it.title.contains(t)) {
                    Delivery::failed(&it.identity, "channel rejected message")
                } else {
                    Delivery::ok(&it.identity)
                }
            })
            .collect()
    }
    fn name(&self) -> &str {
        "recorder"
    }
}

// ---------- fixtures ----------

const HEADLINES: &[(&str, u8)] = &[
    ("Microsoft agrees to buy gaming studio", 9),
    ("Fed raises interest rates by half a point", 9),
    ("Nvidia earnings beat on data center demand", 8),
    ("Tesla recalls two million vehicles", 8),
    ("Apple expands buyback program", 7),
    ("Coca-Cola opens new bottling plant", 6),
];

fn story(title: &str, minutes_ago: i64) -> NewsItem {
    let at = Utc::now() - chrono::Duration::minutes(minutes_ago);
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    NewsItem::candidate(
        "Static Wire",
        title,
        format!("{title}. Analysts weigh the market reaction."),
        Some(format!("https://static-wire.test/{slug}")),
        at,
        Utc::now(),
    )
}

fn all_stories() -> Vec<NewsItem> {
    HEADLINES
        .iter()
        .enumerate()
        .map(|(i, (t, _))| story(t, 10 + i as i64 * 5))
        .collect()
}

fn disabled_verifier() -> Verifier {
    Verifier::new(
        Arc::new(NoopSearch),
        VerifierConfig {
            enabled: false,
            ..VerifierConfig::default()
        },
    )
}

fn analyzer(provider: Arc<dyn ScoringProvider>) -> ImpactAnalyzer {
    ImpactAnalyzer::new(provider, RetryPolicy::immediate(3), DailyBudget::unlimited())
}

fn build(
    sources: Vec<Arc<dyn SourceAdapter>>,
    scorer: Arc<dyn ScoringProvider>,
    verifier: Verifier,
    store: DynStore,
    distributor: Arc<dyn Distributor>,
) -> Pipeline {
    Pipeline::new(
        Components {
            sources,
            analyzer: analyzer(scorer),
            verifier,
            store,
            distributor,
        },
        PipelineSettings::default(),
        DistributionConfig::default(),
    )
}

// ---------- scenarios ----------

#[tokio::test]
async fn batch_is_ordered_by_score_then_recency() {
    let store: DynStore = Arc::new(MemoryStore::new());
    let rec = Arc::new(Recorder::default());
    let p = build(
        vec![StaticSource::new(all_stories())],
        ScriptedScorer::new(HEADLINES),
        disabled_verifier(),
        store.clone(),
        rec.clone(),
    );

    let record = p.run(TriggerKind::Manual, &Cancel::never()).await.unwrap();
    assert_eq!(record.outcome, RunOutcome::Success);
    assert_eq!(record.counts.new_items, 6);
    assert_eq!(record.counts.persisted, 6);
    assert_eq!(record.counts.distributed, 5);

    let batches = rec.batches();
    assert_eq!(batches.len(), 1);
    let scores: Vec<u8> = batches[0].iter().filter_map(NewsItem::score).collect();
    assert_eq!(scores, vec![9, 9, 8, 8, 7]);
    // equal scores: more recent first
    assert_eq!(batches[0][0].title, "Microsoft agrees to buy gaming studio");
    assert_eq!(batches[0][2].title, "Nvidia earnings beat on data center demand");

    // the 6 stays stored but never distributed
    let below = store
        .query(&NewsQuery {
            keyword: Some("bottling".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(below.len(), 1);
    assert!(below[0].distributed_at.is_none());
}

#[tokio::test]
async fn rerun_over_same_input_changes_nothing() {
    let store: DynStore = Arc::new(MemoryStore::new());
    let rec = Arc::new(Recorder::default());
    let scorer = ScriptedScorer::new(HEADLINES);
    let p = build(
        vec![StaticSource::new(all_stories())],
        scorer.clone(),
        disabled_verifier(),
        store.clone(),
        rec.clone(),
    );

    p.run(TriggerKind::Scheduled, &Cancel::never()).await.unwrap();
    let before = store.query(&NewsQuery::default()).await.unwrap();
    let calls = scorer.calls.load(Ordering::SeqCst);

    let second = p.run(TriggerKind::Scheduled, &Cancel::never()).await.unwrap();
    assert_eq!(second.outcome, RunOutcome::Success);
    assert_eq!(second.counts.duplicates, 6);
    assert_eq!(second.counts.new_items, 0);
    assert_eq!(second.counts.persisted, 0);
    assert_eq!(second.counts.distributed, 0);
    assert_eq!(scorer.calls.load(Ordering::SeqCst), calls, "no re-scoring");
    assert_eq!(rec.batches().len(), 1, "nothing left to distribute");

    let after = store.query(&NewsQuery::default()).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn stalled_analyzer_leaves_unknown_and_backlog_recovers() {
    let store: DynStore = Arc::new(MemoryStore::new());
    let rec = Arc::new(Recorder::default());
    let stalled = Arc::new(StalledScorer {
        calls: AtomicU32::new(0),
    });
    let source = StaticSource::new(vec![story("Fed raises interest rates by half a point", 5)]);

    let p = build(
        vec![source.clone()],
        stalled.clone(),
        disabled_verifier(),
        store.clone(),
        rec.clone(),
    );
    let first = p.run(TriggerKind::Manual, &Cancel::never()).await.unwrap();
    assert_eq!(first.outcome, RunOutcome::Partial);
    assert_eq!(first.counts.analysis_failures, 1);
    assert_eq!(stalled.calls.load(Ordering::SeqCst), 3);

    let stored = store.query(&NewsQuery::default()).await.unwrap();
    assert_eq!(stored.len(), 1, "unscored items are kept, not dropped");
    assert_eq!(stored[0].impact_score, Some(ImpactScore::Unknown));
    assert_eq!(stored[0].verification_status, VerificationStatus::Pending);
    assert!(rec.batches().is_empty());

    // a later run with a healthy scorer picks the item up from the backlog
    let healed = build(
        vec![source],
        ScriptedScorer::new(HEADLINES),
        disabled_verifier(),
        store.clone(),
        rec.clone(),
    );
    let second = healed.run(TriggerKind::Manual, &Cancel::never()).await.unwrap();
    assert_eq!(second.outcome, RunOutcome::Success);
    assert_eq!(second.counts.reanalysis_backlog, 1);
    assert_eq!(second.counts.analyzed, 1);
    assert_eq!(second.counts.distributed, 1);
    let stored = store.query(&NewsQuery::default()).await.unwrap();
    assert_eq!(stored[0].score(), Some(9));
}

#[tokio::test]
async fn store_outage_aborts_before_distribution_and_next_run_recovers() {
    let flaky = FlakyStore::new();
    let store: DynStore = flaky.clone();
    let rec = Arc::new(Recorder::default());
    let p = build(
        vec![StaticSource::new(all_stories())],
        ScriptedScorer::new(HEADLINES),
        disabled_verifier(),
        store.clone(),
        rec.clone(),
    );

    flaky.down.store(true, Ordering::SeqCst);
    let failed = p.run(TriggerKind::Scheduled, &Cancel::never()).await.unwrap();
    match &failed.outcome {
        RunOutcome::Failed { stage, reason } => {
            assert_eq!(*stage, RunStage::Persisting);
            assert!(reason.contains("connection refused"), "{reason}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(rec.batches().is_empty(), "nothing distributed after a store failure");
    assert_eq!(p.status().stage, RunStage::Error);
    assert_eq!(store.len().await.unwrap(), 0);

    flaky.down.store(false, Ordering::SeqCst);
    let ok = p.run(TriggerKind::Scheduled, &Cancel::never()).await.unwrap();
    assert_eq!(ok.outcome, RunOutcome::Success);
    assert_eq!(ok.counts.new_items, 6);
    assert_eq!(ok.counts.distributed, 5);
    assert_eq!(p.status().stage, RunStage::Idle);
    assert_eq!(p.status().runs_total, 2);
}

#[tokio::test]
async fn high_impact_items_need_corroboration() {
    let stories = vec![
        story("Microsoft agrees to buy gaming studio", 5),
        story("Apple expands buyback program", 10),
    ];

    // no search available: the 9 ends inconclusive and is held back
    let store: DynStore = Arc::new(MemoryStore::new());
    let rec = Arc::new(Recorder::default());
    let p = build(
        vec![StaticSource::new(stories.clone())],
        ScriptedScorer::new(HEADLINES),
        Verifier::new(Arc::new(NoopSearch), VerifierConfig::default()),
        store.clone(),
        rec.clone(),
    );
    let r = p.run(TriggerKind::Manual, &Cancel::never()).await.unwrap();
    assert_eq!(r.counts.verified, 1);
    let sent: Vec<String> = rec.batches()[0].iter().map(|i| i.title.clone()).collect();
    assert_eq!(sent, vec!["Apple expands buyback program".to_string()]);
    let held = store
        .query(&NewsQuery {
            min_impact: Some(9),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(held[0].verification_status, VerificationStatus::Inconclusive);
    assert!(held[0].distributed_at.is_none());

    // two independent outlets: corroborated and distributed first
    let store: DynStore = Arc::new(MemoryStore::new());
    let rec = Arc::new(Recorder::default());
    let p = build(
        vec![StaticSource::new(stories)],
        ScriptedScorer::new(HEADLINES),
        Verifier::new(Arc::new(Corroborating), VerifierConfig::default()),
        store.clone(),
        rec.clone(),
    );
    p.run(TriggerKind::Manual, &Cancel::never()).await.unwrap();
    let batch = &rec.batches()[0];
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].verification_status, VerificationStatus::Corroborated);
    assert_eq!(batch[0].evidence.len(), 2);
    assert_eq!(batch[1].verification_status, VerificationStatus::NotRequired);
}

#[tokio::test]
async fn search_outage_does_not_hold_back_high_impact_items() {
    let store: DynStore = Arc::new(MemoryStore::new());
    let rec = Arc::new(Recorder::default());
    let p = build(
        vec![StaticSource::new(vec![
            story("Microsoft agrees to buy gaming studio", 5),
            story("Apple expands buyback program", 10),
        ])],
        ScriptedScorer::new(HEADLINES),
        Verifier::new(
            Arc::new(SearchOutage),
            VerifierConfig {
                retry: RetryPolicy::immediate(1),
                ..VerifierConfig::default()
            },
        ),
        store.clone(),
        rec.clone(),
    );

    let r = p.run(TriggerKind::Manual, &Cancel::never()).await.unwrap();
    assert_eq!(r.outcome, RunOutcome::Partial);
    assert_eq!(r.counts.verification_failures, 1);
    assert_eq!(r.counts.distributed, 2);

    let sent: Vec<String> = rec.batches()[0].iter().map(|i| i.title.clone()).collect();
    assert_eq!(
        sent,
        vec![
            "Microsoft agrees to buy gaming studio".to_string(),
            "Apple expands buyback program".to_string()
        ]
    );
    let nine = store
        .query(&NewsQuery {
            min_impact: Some(9),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(nine[0].verification_status, VerificationStatus::Inconclusive);
    assert!(nine[0].verification_error.as_deref().unwrap_or_default().contains("503"));
    assert!(nine[0].distributed_at.is_some());
}

#[tokio::test]
async fn failed_deliveries_stay_eligible() {
    let store: DynStore = Arc::new(MemoryStore::new());
    let rec = Arc::new(Recorder {
        reject_titles: vec!["Tesla"],
        ..Recorder::default()
    });
    let p = build(
        vec![StaticSource::new(all_stories())],
        ScriptedScorer::new(HEADLINES),
        disabled_verifier(),
        store.clone(),
        rec.clone(),
    );

    let first = p.run(TriggerKind::Manual, &Cancel::never()).await.unwrap();
    assert_eq!(first.outcome, RunOutcome::Partial);
    assert_eq!(first.counts.distributed, 4);
    assert_eq!(first.counts.distribution_failures, 1);

    let second = p.run(TriggerKind::Manual, &Cancel::never()).await.unwrap();
    let retried: Vec<String> = rec.batches()[1].iter().map(|i| i.title.clone()).collect();
    assert_eq!(retried, vec!["Tesla recalls two million vehicles".to_string()]);
    assert_eq!(second.counts.distribution_failures, 1);
}

#[tokio::test]
async fn degraded_source_does_not_stop_the_run() {
    let store: DynStore = Arc::new(MemoryStore::new());
    let p = build(
        vec![Arc::new(DownSource), StaticSource::new(all_stories())],
        ScriptedScorer::new(HEADLINES),
        disabled_verifier(),
        store.clone(),
        Arc::new(Recorder::default()),
    );
    let r = p.run(TriggerKind::Manual, &Cancel::never()).await.unwrap();
    assert_eq!(r.outcome, RunOutcome::Partial);
    assert_eq!(r.counts.degraded_sources, 1);
    assert!(r.degraded[0].starts_with("Down Wire:"));
    assert_eq!(r.counts.persisted, 6);
}

#[tokio::test]
async fn content_update_revises_the_stored_item() {
    let store: DynStore = Arc::new(MemoryStore::new());
    let source = StaticSource::new(vec![story("Apple expands buyback program", 5)]);
    let p = build(
        vec![source.clone()],
        ScriptedScorer::new(HEADLINES),
        disabled_verifier(),
        store.clone(),
        Arc::new(Recorder::default()),
    );
    p.run(TriggerKind::Manual, &Cancel::never()).await.unwrap();

    let mut revised = story("Apple expands buyback program", 5).with_tickers(["AAPL"]);
    revised.summary = "Board approves a record repurchase and a higher dividend for shareholders.".into();
    source.replace(vec![revised]);

    let r = p.run(TriggerKind::Manual, &Cancel::never()).await.unwrap();
    assert_eq!(r.counts.updates, 1);
    assert_eq!(r.counts.persisted, 1);
    let stored = store.query(&NewsQuery::default()).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].revision, 1);
    assert!(stored[0].tickers.contains(&"AAPL".to_string()));
    assert!(stored[0].summary.starts_with("Board approves"));
    assert!(stored[0].distributed_at.is_some(), "already sent; revision is not resent");
}

#[tokio::test]
async fn concurrent_run_is_rejected() {
    let store: DynStore = Arc::new(MemoryStore::new());
    let p = Arc::new(build(
        vec![StaticSource::slow(all_stories(), Duration::from_millis(200))],
        ScriptedScorer::new(HEADLINES),
        disabled_verifier(),
        store,
        Arc::new(Recorder::default()),
    ));

    let p1 = p.clone();
    let first = tokio::spawn(async move { p1.run(TriggerKind::Scheduled, &Cancel::never()).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = p.run(TriggerKind::Manual, &Cancel::never()).await;
    assert!(matches!(second, Err(PipelineError::RunInProgress)));
    assert!(first.await.unwrap().is_ok());
}

#[tokio::test]
async fn cancelled_run_persists_nothing() {
    let store: DynStore = Arc::new(MemoryStore::new());
    let rec = Arc::new(Recorder::default());
    let p = build(
        vec![StaticSource::new(all_stories())],
        ScriptedScorer::new(HEADLINES),
        disabled_verifier(),
        store.clone(),
        rec.clone(),
    );
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let r = p.run(TriggerKind::Scheduled, &Cancel::from_watch(rx)).await.unwrap();
    assert_eq!(
        r.outcome,
        RunOutcome::Cancelled {
            stage: RunStage::Collecting
        }
    );
    assert_eq!(store.len().await.unwrap(), 0);
    assert!(rec.batches().is_empty());
    assert_eq!(p.status().stage, RunStage::Idle);
}

#[tokio::test]
async fn same_story_from_two_providers_is_stored_once() {
    let at = Utc::now() - chrono::Duration::minutes(7);
    let a = NewsItem::candidate(
        "Wire A",
        "Microsoft agrees to buy gaming studio",
        "The software maker will pay $2 billion in cash for the studio, its largest gaming deal this year.",
        Some("https://wire-a.test/msft-studio".into()),
        at,
        at,
    );
    let b = NewsItem::candidate(
        "Wire B",
        "Microsoft agrees to buy gaming studio!",
        "The software maker will pay $2 billion in cash for the studio, its largest gaming deal this year",
        Some("https://wire-b.test/markets/msft".into()),
        at,
        at,
    );
    assert_ne!(a.identity, b.identity);

    let store: DynStore = Arc::new(MemoryStore::new());
    let p = build(
        vec![StaticSource::new(vec![a]), StaticSource::new(vec![b])],
        ScriptedScorer::new(HEADLINES),
        disabled_verifier(),
        store.clone(),
        Arc::new(Recorder::default()),
    );
    let r = p.run(TriggerKind::Manual, &Cancel::never()).await.unwrap();
    assert_eq!(r.counts.collected, 2);
    assert_eq!(r.counts.new_items, 1);
    assert_eq!(r.counts.duplicates, 1);
    assert_eq!(store.len().await.unwrap(), 1);
}

#[tokio::test]
async fn richer_copy_in_a_later_run_is_not_sent_again() {
    let at = Utc::now() - chrono::Duration::minutes(20);
    let first = NewsItem::candidate(
        "Wire A",
        "Microsoft agrees to buy gaming studio",
        "The software maker will pay $2 billion in cash.",
        Some("https://wire-a.test/msft-studio".into()),
        at,
        at,
    );
    let richer = NewsItem::candidate(
        "Wire B",
        "Microsoft agrees to buy gaming studio",
        "The software maker will pay $2 billion in cash for the studio, its largest gaming deal this year, \
         pending regulatory approval.",
        Some("https://wire-b.test/markets/msft".into()),
        at + chrono::Duration::minutes(4),
        Utc::now(),
    );

    let store: DynStore = Arc::new(MemoryStore::new());
    let rec = Arc::new(Recorder::default());
    let wire_a = StaticSource::new(vec![first.clone()]);
    let wire_b = StaticSource::new(Vec::new());
    let p = build(
        vec![wire_a.clone(), wire_b.clone()],
        ScriptedScorer::new(HEADLINES),
        disabled_verifier(),
        store.clone(),
        rec.clone(),
    );
    let r1 = p.run(TriggerKind::Manual, &Cancel::never()).await.unwrap();
    assert_eq!(r1.counts.distributed, 1);

    // both wires carry the story now
    wire_b.replace(vec![richer.clone()]);
    let r2 = p.run(TriggerKind::Manual, &Cancel::never()).await.unwrap();
    assert_eq!(r2.counts.new_items, 0);
    assert_eq!(r2.counts.distributed, 0);

    // only the richer copy is left in the feeds
    wire_a.replace(Vec::new());
    let r3 = p.run(TriggerKind::Manual, &Cancel::never()).await.unwrap();
    assert_eq!(r3.counts.new_items, 0);
    assert_eq!(r3.counts.duplicates, 1);

    assert_eq!(store.len().await.unwrap(), 1);
    let sent: Vec<String> = rec
        .batches()
        .iter()
        .flatten()
        .map(|i| i.source_name.clone())
        .collect();
    assert_eq!(sent, vec!["Wire A".to_string()]);
}
