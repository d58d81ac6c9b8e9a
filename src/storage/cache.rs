use anyhow::Result;

use super::kv::KvStore;
use crate::feed::Article;

/// Last successful result set for one feed key.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedFeed {
    pub articles: Vec<Article>,
    /// Milliseconds since the epoch, taken from the refresh that wrote it.
    pub last_updated: i64,
}

/// One durable slot per feed key, holding the last successfully fetched and
/// normalized article list. Written only after a fully successful refresh,
/// always overwritten wholesale, never pruned; the number of slots is bounded
/// by the configured feed set.
#[derive(Clone)]
pub struct FeedCache {
    store: KvStore,
}

impl FeedCache {
    pub fn new(store: KvStore) -> Self {
        Self { store }
    }

    fn articles_key(key: &str) -> String {
        format!("cache:{key}:articles")
    }

    fn updated_key(key: &str) -> String {
        format!("cache:{key}:updated_at")
    }

    /// Read the cached slot for `key`. A feed that has never completed a
    /// successful refresh has no entry. Entries that fail to deserialize are
    /// treated as absent so a refresh can overwrite them.
    pub async fn get(&self, key: &str) -> Result<Option<CachedFeed>> {
        let Some(raw) = self.store.get(&Self::articles_key(key)).await? else {
            return Ok(None);
        };
        let Some(ts) = self.store.get(&Self::updated_key(key)).await? else {
            return Ok(None);
        };

        let articles: Vec<Article> = match serde_json::from_str(&raw) {
            Ok(articles) => articles,
            Err(e) => {
                tracing::warn!(feed = key, error = %e, "Discarding unreadable cache entry");
                return Ok(None);
            }
        };
        let last_updated = ts.parse().unwrap_or(0);

        Ok(Some(CachedFeed {
            articles,
            last_updated,
        }))
    }

    /// Overwrite the slot for `key` with a fresh result set.
    pub async fn put(&self, key: &str, articles: &[Article], now_ms: i64) -> Result<()> {
        let serialized = serde_json::to_string(articles)?;
        self.store.set(&Self::articles_key(key), &serialized).await?;
        self.store
            .set(&Self::updated_key(key), &now_ms.to_string())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn article(n: usize) -> Article {
        Article {
            title: format!("Uutinen {n}"),
            link: format!("https://yle.fi/a/{n}"),
            description: format!("Kuvaus {n}"),
            published_at: Some("Mon, 01 Jul 2024 10:00:00 GMT".to_string()),
            identity: format!("yle-{n}"),
        }
    }

    async fn test_cache() -> FeedCache {
        FeedCache::new(KvStore::open_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_missing_key_has_no_entry() {
        let cache = test_cache().await;
        assert_eq!(cache.get("talous").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_get_round_trip_preserves_order_and_timestamp() {
        let cache = test_cache().await;
        let articles = vec![article(1), article(2), article(3)];

        cache.put("talous", &articles, 1_700_000_000_000).await.unwrap();

        let entry = cache.get("talous").await.unwrap().unwrap();
        assert_eq!(entry.articles, articles);
        assert_eq!(entry.last_updated, 1_700_000_000_000);
    }

    #[tokio::test]
    async fn test_put_overwrites_previous_slot() {
        let cache = test_cache().await;
        cache
            .put("talous", &[article(1), article(2)], 1_000)
            .await
            .unwrap();
        cache.put("talous", &[article(9)], 2_000).await.unwrap();

        let entry = cache.get("talous").await.unwrap().unwrap();
        assert_eq!(entry.articles, vec![article(9)]);
        assert_eq!(entry.last_updated, 2_000);
    }

    #[tokio::test]
    async fn test_feed_keys_are_isolated() {
        let cache = test_cache().await;
        cache.put("talous", &[article(1)], 1).await.unwrap();

        assert!(cache.get("urheilu").await.unwrap().is_none());
        assert_eq!(cache.get("talous").await.unwrap().unwrap().articles.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_article_list_is_a_valid_entry() {
        let cache = test_cache().await;
        cache.put("talous", &[], 42).await.unwrap();

        let entry = cache.get("talous").await.unwrap().unwrap();
        assert!(entry.articles.is_empty());
        assert_eq!(entry.last_updated, 42);
    }

    #[tokio::test]
    async fn test_corrupt_entry_reads_as_absent() {
        let store = KvStore::open_in_memory().await.unwrap();
        store
            .set("cache:talous:articles", "not json at all")
            .await
            .unwrap();
        store.set("cache:talous:updated_at", "123").await.unwrap();

        let cache = FeedCache::new(store);
        assert!(cache.get("talous").await.unwrap().is_none());
    }
}
