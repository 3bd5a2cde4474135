// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod analyze;
pub mod api;
pub mod config;
pub mod dedup;
pub mod distribute;
pub mod error;
pub mod ingest;
pub mod item;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod store;
pub mod verify;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::config::AppConfig;
pub use crate::error::PipelineError;
pub use crate::item::{Direction, Identity, ImpactScore, NewsItem, VerificationStatus};
pub use crate::pipeline::scheduler::{spawn_scheduler, trigger_channel, Schedule, TriggerAck, TriggerSender};
pub use crate::pipeline::{Pipeline, PipelineStatus, RunOutcome, RunRecord, RunStage, TriggerKind};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber: `RUST_LOG` filter (default
/// `stock_news_pipeline=info,warn`), JSON output when `LOG_FORMAT=json`.
/// A subscriber installed by the runtime is left in place.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("stock_news_pipeline=info,warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
