//! Stock news pipeline: binary entrypoint.
//! Loads configuration, opens the store, starts the scheduler and serves the
//! read API plus `/metrics`.

use std::sync::Arc;

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use tokio::sync::watch;

use stock_news_pipeline::metrics::Metrics;
use stock_news_pipeline::{
    api, config, init_tracing, spawn_scheduler, store, trigger_channel, Pipeline, Schedule,
};

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = config::load_default().context("loading pipeline config")?;
    let schedule = Schedule::from_config(&cfg.schedule).context("building schedule")?;
    let store = store::open_store(&cfg.store.url)
        .await
        .with_context(|| format!("opening store {}", cfg.store.url))?;

    let pipeline = Arc::new(Pipeline::from_config(&cfg, store));
    let (trigger, trigger_rx) = trigger_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received, stopping scheduler");
            let _ = shutdown_tx.send(true);
        }
    });
    spawn_scheduler(pipeline.clone(), schedule, trigger_rx, shutdown_rx);

    let mut router = api::router(api::ApiState { pipeline, trigger });
    match Metrics::init() {
        Ok(m) => router = router.merge(m.router()),
        Err(e) => tracing::warn!(error = %e, "prometheus recorder not installed; /metrics disabled"),
    }

    tracing::info!(
        store = %cfg.store.url,
        times = ?cfg.schedule.times_of_day,
        interval_minutes = ?cfg.schedule.interval_minutes,
        "stock news pipeline started"
    );
    Ok(router.into())
}
