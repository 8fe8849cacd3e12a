use crate::error::Result;
use crate::models::Chapter;
use crate::services::store::KeyValueStore;
use crate::utils::hash_key;
use std::future::Future;

pub const CACHE_KEY_PREFIX: &str = "chapterCache_";
pub const PROGRESS_KEY_PREFIX: &str = "readingProgress_";
pub const CHAPTER_LIST_KEY_PREFIX: &str = "chapters_";

/// Maximum chapters kept per document.
pub const MAX_CACHE_SIZE: usize = 50;

/// Chapters fetched ahead of the current one by default.
pub const DEFAULT_PRELOAD_COUNT: usize = 3;

/// Normalized chapter text kept in a [`KeyValueStore`].
///
/// Each document has an insertion-ordered index list; once it grows past
/// [`MAX_CACHE_SIZE`] the oldest inserted chapter is evicted, however recently
/// it was read.
#[derive(Debug, Clone)]
pub struct ChapterCache<S> {
    store: S,
    capacity: usize,
}

impl<S: KeyValueStore> ChapterCache<S> {
    pub fn new(store: S) -> Self {
        Self::with_capacity(store, MAX_CACHE_SIZE)
    }

    pub fn with_capacity(store: S, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn get(&self, document_id: &str, chapter_index: usize) -> Option<String> {
        let key = chapter_key(document_id, chapter_index);
        match self.store.get(&key) {
            Ok(Some(content)) => {
                tracing::debug!(document_id, chapter_index, "chapter cache hit");
                Some(content)
            }
            Ok(None) => None,
            Err(err) => {
                tracing::error!(%key, error = %err, "failed to read chapter cache");
                None
            }
        }
    }

    pub fn contains(&self, document_id: &str, chapter_index: usize) -> bool {
        self.cached_indices(document_id).contains(&chapter_index)
            && self.get(document_id, chapter_index).is_some()
    }

    /// Stores `content`, evicting the oldest inserted chapter when over capacity.
    ///
    /// Storage failures are logged; the cache is best-effort.
    pub fn put(&mut self, document_id: &str, chapter_index: usize, content: &str) {
        if let Err(err) = self.try_put(document_id, chapter_index, content) {
            tracing::error!(document_id, chapter_index, error = %err, "failed to cache chapter");
        }
    }

    fn try_put(&mut self, document_id: &str, chapter_index: usize, content: &str) -> Result<()> {
        self.store
            .set(&chapter_key(document_id, chapter_index), content)?;

        let mut indices = self.cached_indices(document_id);
        if !indices.contains(&chapter_index) {
            indices.push(chapter_index);
        }
        while indices.len() > self.capacity {
            let evicted = indices.remove(0);
            self.store.remove(&chapter_key(document_id, evicted))?;
            tracing::debug!(document_id, evicted, "evicted cached chapter");
        }
        self.store.set_json(&index_key(document_id), &indices)
    }

    /// Insertion-ordered list of cached chapter indices.
    pub fn cached_indices(&self, document_id: &str) -> Vec<usize> {
        match self.store.get_json::<Vec<usize>>(&index_key(document_id)) {
            Ok(indices) => indices.unwrap_or_default(),
            Err(err) => {
                tracing::error!(document_id, error = %err, "corrupt chapter cache index");
                Vec::new()
            }
        }
    }

    /// Drops every cached chapter of the document and its reading progress.
    pub fn invalidate_document(&mut self, document_id: &str) {
        let indices = self.cached_indices(document_id);
        let keys = indices
            .iter()
            .map(|index| chapter_key(document_id, *index))
            .chain([index_key(document_id), progress_key(document_id)]);
        for key in keys {
            if let Err(err) = self.store.remove(&key) {
                tracing::error!(%key, error = %err, "failed to remove cache entry");
            }
        }
        tracing::info!(document_id, chapters = indices.len(), "cleared document cache");
    }

    /// Persists the segmentation result so the document can be reopened later
    /// without rescanning.
    pub fn save_chapter_list(&mut self, document_id: &str, chapters: &[Chapter]) -> Result<()> {
        self.store.set_json(&chapter_list_key(document_id), &chapters)
    }

    pub fn chapter_list(&self, document_id: &str) -> Option<Vec<Chapter>> {
        match self.store.get_json(&chapter_list_key(document_id)) {
            Ok(chapters) => chapters,
            Err(err) => {
                tracing::error!(document_id, error = %err, "corrupt chapter list");
                None
            }
        }
    }

    pub fn remove_chapter_list(&mut self, document_id: &str) {
        if let Err(err) = self.store.remove(&chapter_list_key(document_id)) {
            tracing::error!(document_id, error = %err, "failed to remove chapter list");
        }
    }

    /// Fetches and caches up to `count` chapters after `from_index`, one at a time.
    ///
    /// Indices at or past `total_chapters` and chapters already cached are
    /// skipped. A failed fetch is logged and the next index is tried. Returns
    /// the number of chapters added.
    pub async fn preload<F, Fut>(
        &mut self,
        document_id: &str,
        from_index: usize,
        total_chapters: usize,
        mut fetch_and_normalize: F,
        count: usize,
    ) -> usize
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let pending: Vec<usize> = (1..=count)
            .map(|offset| from_index + offset)
            .take_while(|index| *index < total_chapters)
            .filter(|index| self.get(document_id, *index).is_none())
            .collect();

        let mut loaded = 0;
        for index in pending {
            tracing::debug!(document_id, chapter_index = index, "preloading chapter");
            match fetch_and_normalize(index).await {
                Ok(content) => {
                    self.put(document_id, index, &content);
                    loaded += 1;
                }
                Err(err) => {
                    tracing::warn!(document_id, chapter_index = index, error = %err, "preload failed");
                }
            }
        }
        loaded
    }
}

pub fn chapter_key(document_id: &str, chapter_index: usize) -> String {
    format!("{CACHE_KEY_PREFIX}{}_{chapter_index}", hash_key(document_id))
}

pub fn index_key(document_id: &str) -> String {
    format!("{CACHE_KEY_PREFIX}index_{}", hash_key(document_id))
}

pub fn progress_key(document_id: &str) -> String {
    format!("{PROGRESS_KEY_PREFIX}{}", hash_key(document_id))
}

pub fn chapter_list_key(document_id: &str) -> String {
    format!("{CHAPTER_LIST_KEY_PREFIX}{}", hash_key(document_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReaderError;
    use crate::services::store::{FileStore, MemoryStore};
    use std::cell::RefCell;

    #[test]
    fn put_then_get() {
        let mut cache = ChapterCache::new(MemoryStore::new());
        cache.put("doc", 3, "X");
        assert_eq!(cache.get("doc", 3).as_deref(), Some("X"));
        assert!(cache.contains("doc", 3));
        assert_eq!(cache.get("doc", 4), None);
        assert_eq!(cache.get("other", 3), None);
    }

    #[test]
    fn overwrite_keeps_single_index_entry() {
        let mut cache = ChapterCache::new(MemoryStore::new());
        cache.put("doc", 1, "a");
        cache.put("doc", 1, "b");
        assert_eq!(cache.get("doc", 1).as_deref(), Some("b"));
        assert_eq!(cache.cached_indices("doc"), vec![1]);
    }

    #[test]
    fn evicts_oldest_inserted_not_least_recently_read() {
        let mut cache = ChapterCache::new(MemoryStore::new());
        for index in 0..=MAX_CACHE_SIZE {
            cache.put("doc", index, &format!("chapter {index}"));
            // Reading chapter 0 repeatedly does not protect it
            let _ = cache.get("doc", 0);
        }
        let indices = cache.cached_indices("doc");
        assert_eq!(indices.len(), MAX_CACHE_SIZE);
        assert_eq!(cache.get("doc", 0), None);
        assert_eq!(cache.get("doc", 1).as_deref(), Some("chapter 1"));
        assert_eq!(cache.get("doc", 50).as_deref(), Some("chapter 50"));
    }

    #[test]
    fn invalidate_removes_chapters_and_progress() {
        let mut cache = ChapterCache::new(MemoryStore::new());
        cache.put("doc", 0, "a");
        cache.put("doc", 1, "b");
        cache.put("keep", 0, "c");
        cache.store_mut().set(&progress_key("doc"), "{}").unwrap();

        cache.invalidate_document("doc");
        assert_eq!(cache.get("doc", 0), None);
        assert!(cache.cached_indices("doc").is_empty());
        assert_eq!(cache.store().get(&progress_key("doc")).unwrap(), None);
        assert_eq!(cache.get("keep", 0).as_deref(), Some("c"));
    }

    #[test]
    fn keys_are_stable_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut cache = ChapterCache::new(FileStore::open(dir.path()).unwrap());
            cache.put("https://example.com/book/42", 7, "persisted");
        }
        let cache = ChapterCache::new(FileStore::open(dir.path()).unwrap());
        assert_eq!(
            cache.get("https://example.com/book/42", 7).as_deref(),
            Some("persisted")
        );
    }

    #[test]
    fn chapter_list_survives_reopening_and_cache_invalidation() {
        let dir = tempfile::tempdir().unwrap();
        let chapters = vec![
            Chapter {
                index: 0,
                title: "第一章".to_string(),
                start_offset: 0,
                end_offset: 30,
            },
            Chapter {
                index: 1,
                title: "第二章".to_string(),
                start_offset: 30,
                end_offset: 64,
            },
        ];
        {
            let mut cache = ChapterCache::new(FileStore::open(dir.path()).unwrap());
            cache.save_chapter_list("doc", &chapters).unwrap();
            cache.put("doc", 0, "text");
            cache.invalidate_document("doc");
        }
        let mut cache = ChapterCache::new(FileStore::open(dir.path()).unwrap());
        assert_eq!(cache.chapter_list("doc"), Some(chapters));
        assert_eq!(cache.chapter_list("other"), None);

        cache.remove_chapter_list("doc");
        assert_eq!(cache.chapter_list("doc"), None);
    }

    #[tokio::test]
    async fn preload_stops_at_last_chapter() {
        let mut cache = ChapterCache::new(MemoryStore::new());
        let requested = RefCell::new(Vec::new());
        let loaded = cache
            .preload(
                "doc",
                3,
                5,
                |index| {
                    requested.borrow_mut().push(index);
                    async move { Ok(format!("content {index}")) }
                },
                DEFAULT_PRELOAD_COUNT,
            )
            .await;
        assert_eq!(loaded, 1);
        assert_eq!(*requested.borrow(), vec![4]);
        assert_eq!(cache.get("doc", 4).as_deref(), Some("content 4"));
    }

    #[tokio::test]
    async fn preload_skips_cached_and_survives_failures() {
        let mut cache = ChapterCache::new(MemoryStore::new());
        cache.put("doc", 1, "already here");
        let requested = RefCell::new(Vec::new());
        let loaded = cache
            .preload(
                "doc",
                0,
                10,
                |index| {
                    requested.borrow_mut().push(index);
                    async move {
                        if index == 2 {
                            Err(ReaderError::FetchFailed {
                                document_id: "doc".to_string(),
                                chapter_index: index,
                                reason: "offline".to_string(),
                            })
                        } else {
                            Ok(format!("content {index}"))
                        }
                    }
                },
                3,
            )
            .await;
        assert_eq!(*requested.borrow(), vec![2, 3]);
        assert_eq!(loaded, 1);
        assert_eq!(cache.get("doc", 2), None);
        assert_eq!(cache.get("doc", 3).as_deref(), Some("content 3"));
    }
}
