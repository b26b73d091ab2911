/// Item metadata cache with atomic swap and disk-backed cold start

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::upstream::{ItemMeta, UpstreamClient};

const CACHE_FILE: &str = "item_cache.json";

/// Process-wide item metadata map. Lookups during a refresh keep seeing the
/// pre-refresh snapshot; the refreshed map is swapped in whole.
pub struct ItemCatalog {
    items: RwLock<Arc<HashMap<i64, ItemMeta>>>,
    cache_path: PathBuf,
}

impl ItemCatalog {
    pub fn new(cache_root: &std::path::Path) -> Self {
        Self {
            items: RwLock::new(Arc::new(HashMap::new())),
            cache_path: cache_root.join(CACHE_FILE),
        }
    }

    /// Load the last persisted mapping so the engine has buy limits before
    /// the first live refresh completes.
    pub async fn load_from_disk(&self) -> Result<usize> {
        let raw = match tokio::fs::read_to_string(&self.cache_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e).context("reading item cache"),
        };
        let list: Vec<ItemMeta> = serde_json::from_str(&raw).context("parsing item cache")?;
        let count = list.len();
        self.swap(list);
        info!(items = count, "item catalog loaded from disk cache");
        Ok(count)
    }

    /// Fetch the current mapping and swap it in; persists the result for
    /// cold starts. Failures leave the previous snapshot untouched.
    pub async fn refresh(&self, upstream: &UpstreamClient) -> Result<usize> {
        let mapping = upstream
            .fetch_mapping()
            .await
            .context("fetching item mapping")?;
        let count = mapping.len();
        self.persist(&mapping).await;
        self.swap(mapping);
        info!(items = count, "item catalog refreshed");
        Ok(count)
    }

    fn swap(&self, list: Vec<ItemMeta>) {
        let map: HashMap<i64, ItemMeta> = list.into_iter().map(|m| (m.id, m)).collect();
        let mut guard = self.items.write().expect("catalog lock poisoned");
        *guard = Arc::new(map);
    }

    async fn persist(&self, list: &[ItemMeta]) {
        if let Some(parent) = self.cache_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(error = %e, "failed to create catalog cache directory");
                return;
            }
        }
        let tmp = self.cache_path.with_extension("json.tmp");
        let body = match serde_json::to_vec(list) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "failed to serialize item cache");
                return;
            }
        };
        if let Err(e) = tokio::fs::write(&tmp, body).await {
            warn!(error = %e, "failed to write item cache temp file");
            return;
        }
        if let Err(e) = tokio::fs::rename(&tmp, &self.cache_path).await {
            warn!(error = %e, "failed to swap item cache file");
        }
    }

    /// Frozen handle to the current mapping.
    pub fn snapshot(&self) -> Arc<HashMap<i64, ItemMeta>> {
        self.items.read().expect("catalog lock poisoned").clone()
    }

    pub fn get(&self, item_id: i64) -> Option<ItemMeta> {
        self.snapshot().get(&item_id).cloned()
    }

    /// Unknown items count as untradeable.
    pub fn buy_limit(&self, item_id: i64) -> i64 {
        self.snapshot().get(&item_id).map_or(0, |m| m.buy_limit)
    }

    pub fn name(&self, item_id: i64) -> String {
        self.snapshot()
            .get(&item_id)
            .map(|m| m.name.clone())
            .unwrap_or_else(|| format!("Item {item_id}"))
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: i64, name: &str, limit: i64) -> ItemMeta {
        ItemMeta {
            id,
            name: name.to_string(),
            members: true,
            buy_limit: limit,
            examine: None,
            icon: None,
            highalch: None,
            lowalch: None,
        }
    }

    fn temp_root() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ge-sniper-catalog-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn unknown_item_is_untradeable() {
        let catalog = ItemCatalog::new(&temp_root());
        assert_eq!(catalog.buy_limit(42), 0);
        assert!(catalog.get(42).is_none());
        assert_eq!(catalog.name(42), "Item 42");
    }

    #[test]
    fn swap_replaces_whole_map() {
        let catalog = ItemCatalog::new(&temp_root());
        catalog.swap(vec![meta(1, "Cannonball", 11_000)]);
        let before = catalog.snapshot();

        catalog.swap(vec![meta(2, "Rune scimitar", 125)]);

        // The old handle still sees the old generation.
        assert!(before.contains_key(&1));
        assert!(!catalog.snapshot().contains_key(&1));
        assert_eq!(catalog.buy_limit(2), 125);
    }

    #[tokio::test]
    async fn disk_cache_round_trips() {
        let root = temp_root();
        let catalog = ItemCatalog::new(&root);
        let list = vec![meta(4151, "Abyssal whip", 70), meta(2, "Cannonball", 11_000)];
        catalog.persist(&list).await;

        let reloaded = ItemCatalog::new(&root);
        assert_eq!(reloaded.load_from_disk().await.unwrap(), 2);
        assert_eq!(reloaded.get(4151).unwrap().name, "Abyssal whip");
    }

    #[tokio::test]
    async fn missing_cache_is_not_an_error() {
        let catalog = ItemCatalog::new(&temp_root());
        assert_eq!(catalog.load_from_disk().await.unwrap(), 0);
    }
}
