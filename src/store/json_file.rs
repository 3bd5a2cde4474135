//! File-backed store: an in-memory map snapshotted to JSON after every write
//! (write temp file, then rename).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::memory::{mark_in, upsert_into};
use super::{NewsQuery, Store, StoreError, UpsertOutcome};
use crate::item::{Identity, NewsItem};

pub struct JsonFileStore {
    path: PathBuf,
    items: Mutex<HashMap<Identity, NewsItem>>,
}

impl JsonFileStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let items = match tokio::fs::read_to_string(&path).await {
            Ok(s) if s.trim().is_empty() => HashMap::new(),
            Ok(s) => {
                let list: Vec<NewsItem> = serde_json::from_str(&s)
                    .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))?;
                list.into_iter().map(|it| (it.identity.clone(), it)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(StoreError::Unavailable(format!("{}: {e}", path.display()))),
        };
        tracing::info!(path = %path.display(), records = items.len(), "json store opened");
        Ok(Self {
            path,
            items: Mutex::new(items),
        })
    }

    async fn flush(&self, map: &HashMap<Identity, NewsItem>) -> Result<(), StoreError> {
        let mut list: Vec<&NewsItem> = map.values().collect();
        list.sort_by(|a, b| a.identity.cmp(&b.identity));
        let json = serde_json::to_vec_pretty(&list)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StoreError::Unavailable(format!("{}: {e}", dir.display())))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", self.path.display())))?;
        Ok(())
    }
}

#[async_trait]
impl Store for JsonFileStore {
    async fn get(&self, identity: &Identity) -> Result<Option<NewsItem>, StoreError> {
        Ok(self.items.lock().await.get(identity).cloned())
    }

    async fn upsert(&self, item: NewsItem) -> Result<UpsertOutcome, StoreError> {
        let mut g = self.items.lock().await;
        let id = item.identity.clone();
        let prev = g.get(&id).cloned();
        let outcome = upsert_into(&mut g, item);
        if outcome != UpsertOutcome::Unchanged {
            if let Err(e) = self.flush(&g).await {
                // roll back: memory must not run ahead of disk
                match prev {
                    Some(p) => {
                        g.insert(id, p);
                    }
                    None => {
                        g.remove(&id);
                    }
                }
                return Err(e);
            }
        }
        Ok(outcome)
    }

    async fn query(&self, query: &NewsQuery) -> Result<Vec<NewsItem>, StoreError> {
        let g = self.items.lock().await;
        let hits = g.values().filter(|it| query.matches(it)).cloned().collect();
        Ok(query.finish(hits))
    }

    async fn mark_distributed(&self, identity: &Identity, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut g = self.items.lock().await;
        let set = mark_in(&mut g, identity, at)?;
        if set {
            if let Err(e) = self.flush(&g).await {
                if let Some(it) = g.get_mut(identity) {
                    it.distributed_at = None;
                }
                return Err(e);
            }
        }
        Ok(set)
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.items.lock().await.len())
    }
}
