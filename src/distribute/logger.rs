use async_trait::async_trait;

use super::{format_line, Delivery, Distributor};
use crate::item::NewsItem;

/// Writes each line to the log; used when no webhook is configured.
#[derive(Debug, Clone, Default)]
pub struct LogDistributor;

#[async_trait]
impl Distributor for LogDistributor {
    async fn distribute(&self, batch: &[NewsItem]) -> Vec<Delivery> {
        batch
            .iter()
            .enumerate()
            .map(|(i, it)| {
                tracing::info!(target: "distribute", identity = %it.identity, "{}", format_line(i + 1, it));
                Delivery::ok(&it.identity)
            })
            .collect()
    }

    fn name(&self) -> &str {
        "log"
    }
}
