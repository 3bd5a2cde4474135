use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{NewsQuery, Store, StoreError, UpsertOutcome};
use crate::item::{Identity, NewsItem};

/// In-process store; the write lock makes every upsert atomic per identity.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RwLock<HashMap<Identity, NewsItem>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: impl IntoIterator<Item = NewsItem>) -> Self {
        let map = items
            .into_iter()
            .map(|it| (it.identity.clone(), it))
            .collect::<HashMap<_, _>>();
        Self {
            items: RwLock::new(map),
        }
    }
}

pub(crate) fn upsert_into(map: &mut HashMap<Identity, NewsItem>, item: NewsItem) -> UpsertOutcome {
    match map.get_mut(&item.identity) {
        None => {
            map.insert(item.identity.clone(), item);
            UpsertOutcome::Inserted
        }
        Some(existing) => {
            if existing.merge_from(item) {
                UpsertOutcome::Updated
            } else {
                UpsertOutcome::Unchanged
            }
        }
    }
}

pub(crate) fn mark_in(
    map: &mut HashMap<Identity, NewsItem>,
    identity: &Identity,
    at: DateTime<Utc>,
) -> Result<bool, StoreError> {
    match map.get_mut(identity) {
        None => Err(StoreError::Corrupt(format!("no record for {identity}"))),
        Some(it) if it.distributed_at.is_some() => Ok(false),
        Some(it) => {
            it.distributed_at = Some(at);
            Ok(true)
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, identity: &Identity) -> Result<Option<NewsItem>, StoreError> {
        Ok(self.items.read().await.get(identity).cloned())
    }

    async fn upsert(&self, item: NewsItem) -> Result<UpsertOutcome, StoreError> {
        let mut g = self.items.write().await;
        Ok(upsert_into(&mut g, item))
    }

    async fn query(&self, query: &NewsQuery) -> Result<Vec<NewsItem>, StoreError> {
        let g = self.items.read().await;
        let hits = g.values().filter(|it| query.matches(it)).cloned().collect();
        Ok(query.finish(hits))
    }

    async fn mark_distributed(&self, identity: &Identity, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut g = self.items.write().await;
        mark_in(&mut g, identity, at)
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.items.read().await.len())
    }
}
