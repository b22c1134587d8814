use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::preview::PreviewInfo;

/// Process-wide preview memoization: trimmed URL -> resolved preview.
/// Unbounded and never evicted; entries live for the application session.
/// Written only when a lookup actually produced something (synthesized
/// placeholders included), so a failed lookup stays retryable.
pub struct PreviewCache {
    entries: RwLock<HashMap<String, PreviewInfo>>,
}

impl PreviewCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn key(url: &str) -> String {
        url.trim().to_string()
    }

    pub async fn get(&self, url: &str) -> Option<PreviewInfo> {
        let entries = self.entries.read().await;
        entries.get(&Self::key(url)).cloned()
    }

    pub async fn insert(&self, url: &str, info: PreviewInfo) {
        let mut entries = self.entries.write().await;
        entries.insert(Self::key(url), info);
    }

    pub async fn len(&self) -> usize {
        let entries = self.entries.read().await;
        entries.len()
    }
}

impl Default for PreviewCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookups_use_the_trimmed_key() {
        let cache = PreviewCache::new();
        let info = PreviewInfo::new("A title", "https://example.com/t.jpg", "someone");
        cache.insert("  https://youtu.be/abc12345678  ", info.clone()).await;

        assert_eq!(cache.get("https://youtu.be/abc12345678").await, Some(info.clone()));
        assert_eq!(cache.get(" https://youtu.be/abc12345678 ").await, Some(info));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn missing_entries_stay_missing() {
        let cache = PreviewCache::new();
        assert!(cache.get("https://example.com/clip").await.is_none());
    }

    #[tokio::test]
    async fn later_inserts_replace_earlier_ones() {
        let cache = PreviewCache::new();
        cache.insert("u", PreviewInfo::new("first", "", "")).await;
        cache.insert("u", PreviewInfo::new("second", "", "")).await;
        assert_eq!(cache.get("u").await.unwrap().title, "second");
        assert_eq!(cache.len().await, 1);
    }
}
