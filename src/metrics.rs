use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// Register descriptions for every metric the pipeline emits. Idempotent.
pub fn ensure_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("news_source_events_total", "Raw entries parsed from source payloads.");
        describe_counter!("news_collected_total", "Candidates kept per source after window and cap.");
        describe_counter!("news_source_errors_total", "Source fetches that failed or timed out.");
        describe_histogram!("news_source_fetch_ms", "Per-source fetch latency in milliseconds.");
        describe_counter!("news_duplicates_total", "Candidates dropped as duplicates.");
        describe_counter!("news_updates_total", "Stored items revised by newer content.");
        describe_counter!("news_ai_calls_total", "Scoring provider calls by outcome.");
        describe_counter!("news_analysis_failures_total", "Items left with an unknown score.");
        describe_counter!("news_verifications_total", "Verification verdicts by status.");
        describe_counter!("news_distributed_total", "Items delivered and marked distributed.");
        describe_counter!("news_distribution_failures_total", "Items the distributor failed to deliver.");
        describe_counter!("pipeline_triggers_total", "Run triggers by kind.");
        describe_counter!("pipeline_runs_total", "Completed runs by outcome.");
        describe_counter!("pipeline_run_failures_total", "Runs aborted by a store failure.");
        describe_gauge!("pipeline_last_run_ts", "Unix time the last run finished.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Fails if one is already set.
    pub fn init() -> Result<Self, BuildError> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        ensure_described();
        Ok(Self { handle })
    }

    /// Router exposing `/metrics` in the Prometheus text format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
