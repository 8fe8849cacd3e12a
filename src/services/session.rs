use crate::error::{ReaderError, Result};
use crate::models::{Bookmark, Chapter, PageLayout, ReadingProgress, ReadingSettings, Viewport};
use crate::services::cache::{ChapterCache, DEFAULT_PRELOAD_COUNT, progress_key};
use crate::services::fetch::ChapterFetcher;
use crate::services::normalizer::ContentNormalizer;
use crate::services::pagination::{LayoutConfig, PaginationEngine};
use crate::services::reader::ChunkReader;
use crate::services::scanner::StreamingScanner;
use crate::services::segmenter::segment;
use crate::services::store::KeyValueStore;
use crate::utils::{hash_key, now_millis, truncate_chars};

/// Documents up to this size are segmented in one pass (200KB).
pub const DEFAULT_INLINE_LIMIT: u64 = 200 * 1024;

/// Bookmarks closer than this many bytes count as the same spot.
pub const BOOKMARK_PROXIMITY: usize = 100;

const BOOKMARK_KEY_PREFIX: &str = "bookmarks_";
const EXCERPT_CHARS: usize = 50;

/// Segments a document, loading it whole when it is small and valid UTF-8
/// and scanning it window by window otherwise.
pub async fn segment_document<R: ChunkReader>(
    reader: &R,
    fallback_title: &str,
    inline_limit: u64,
    on_progress: impl FnMut(u8),
) -> Result<Vec<Chapter>> {
    let size = reader.size().await?;
    if size <= inline_limit {
        let bytes = reader.read_range(0, size as usize).await?;
        match String::from_utf8(bytes) {
            Ok(text) => return Ok(segment(&text, fallback_title)),
            Err(_) => tracing::warn!("document is not valid UTF-8, scanning by lines"),
        }
    }
    Ok(StreamingScanner::default()
        .scan(reader, size, fallback_title, on_progress)
        .await)
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub viewport: Viewport,
    pub font_size: f32,
    pub layout: LayoutConfig,
    pub preload_count: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            viewport: Viewport::new(375.0, 667.0),
            font_size: 16.0,
            layout: LayoutConfig::default(),
            preload_count: DEFAULT_PRELOAD_COUNT,
        }
    }
}

/// Reading state for one open document.
pub struct ReadingSession<S, F> {
    document_id: String,
    document_len: usize,
    chapters: Vec<Chapter>,
    normalizer: ContentNormalizer,
    cache: ChapterCache<S>,
    fetcher: F,
    pagination: PaginationEngine,
    preload_count: usize,
    current_chapter: usize,
    content: String,
    bookmarks: Vec<Bookmark>,
    settings: ReadingSettings,
}

impl<S, F> ReadingSession<S, F>
where
    S: KeyValueStore,
    F: ChapterFetcher + Sync,
{
    pub fn new(
        document_id: impl Into<String>,
        chapters: Vec<Chapter>,
        normalizer: ContentNormalizer,
        cache: ChapterCache<S>,
        fetcher: F,
        options: SessionOptions,
    ) -> Self {
        let document_id = document_id.into();
        let document_len = chapters.last().map(|c| c.end_offset).unwrap_or(0);
        let bookmarks = match cache
            .store()
            .get_json::<Vec<Bookmark>>(&bookmark_key(&document_id))
        {
            Ok(bookmarks) => bookmarks.unwrap_or_default(),
            Err(err) => {
                tracing::error!(%document_id, error = %err, "failed to load bookmarks");
                Vec::new()
            }
        };
        // Saved reader preferences override the host's default font size
        let (settings, font_size) = match ReadingSettings::stored(cache.store()) {
            Some(settings) => {
                let font_size = settings.font_size;
                (settings, font_size)
            }
            None => (ReadingSettings::default(), options.font_size),
        };
        Self {
            document_id,
            document_len,
            chapters,
            normalizer,
            cache,
            fetcher,
            pagination: PaginationEngine::new(options.layout, options.viewport, font_size),
            preload_count: options.preload_count,
            current_chapter: 0,
            content: String::new(),
            bookmarks,
            settings,
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    pub fn current_chapter(&self) -> Option<&Chapter> {
        self.chapters.get(self.current_chapter)
    }

    /// Normalized text of the open chapter.
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn layout(&self) -> PageLayout {
        self.pagination.layout()
    }

    pub fn page_text(&self) -> String {
        self.pagination.page_text()
    }

    pub fn normalizer_mut(&mut self) -> &mut ContentNormalizer {
        &mut self.normalizer
    }

    pub fn cache(&self) -> &ChapterCache<S> {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut ChapterCache<S> {
        &mut self.cache
    }

    /// Normalized text for `index`, from the cache or freshly fetched.
    pub async fn load_chapter(&mut self, index: usize) -> Result<String> {
        if index >= self.chapters.len() {
            return Err(ReaderError::ChapterOutOfRange(index));
        }
        if let Some(content) = self.cache.get(&self.document_id, index) {
            return Ok(content);
        }
        tracing::debug!(document_id = %self.document_id, chapter_index = index, "chapter cache miss");
        let raw = self.fetcher.fetch_chapter_raw(&self.document_id, index).await?;
        let content = self.normalizer.process(&raw);
        self.cache.put(&self.document_id, index, &content);
        Ok(content)
    }

    /// Shows chapter `index` from its first page, then reads ahead.
    pub async fn open_chapter(&mut self, index: usize) -> Result<PageLayout> {
        let content = self.load_chapter(index).await?;
        self.current_chapter = index;
        self.content = content;

        let viewport = self.pagination.viewport();
        let font_size = self.pagination.font_size();
        self.pagination.compute_layout(&self.content, viewport, font_size);
        let layout = self.pagination.go_to_page(0);

        self.preload_ahead().await;
        Ok(layout)
    }

    async fn preload_ahead(&mut self) {
        let fetcher = &self.fetcher;
        let normalizer = &self.normalizer;
        let document_id = self.document_id.as_str();
        self.cache
            .preload(
                document_id,
                self.current_chapter,
                self.chapters.len(),
                |index| async move {
                    let raw = fetcher.fetch_chapter_raw(document_id, index).await?;
                    Ok::<_, ReaderError>(normalizer.process(&raw))
                },
                self.preload_count,
            )
            .await;
    }

    /// Returns `None` when already on the last chapter.
    pub async fn next_chapter(&mut self) -> Result<Option<PageLayout>> {
        let next = self.current_chapter + 1;
        if next >= self.chapters.len() {
            return Ok(None);
        }
        self.open_chapter(next).await.map(Some)
    }

    /// Returns `None` when already on the first chapter.
    pub async fn prev_chapter(&mut self) -> Result<Option<PageLayout>> {
        let Some(prev) = self.current_chapter.checked_sub(1) else {
            return Ok(None);
        };
        self.open_chapter(prev).await.map(Some)
    }

    pub fn next_page(&mut self) -> Option<PageLayout> {
        self.pagination.next_page()
    }

    pub fn prev_page(&mut self) -> Option<PageLayout> {
        self.pagination.prev_page()
    }

    pub fn go_to_page(&mut self, page: usize) -> PageLayout {
        self.pagination.go_to_page(page)
    }

    pub fn set_font_size(&mut self, font_size: f32) -> PageLayout {
        self.pagination.set_font_size(font_size)
    }

    pub fn set_viewport(&mut self, viewport: Viewport) -> PageLayout {
        self.pagination.set_viewport(viewport)
    }

    pub fn settings(&self) -> &ReadingSettings {
        &self.settings
    }

    /// Adopts `settings` (already saved by the caller) and relayouts for its font size.
    pub fn apply_settings(&mut self, settings: ReadingSettings) -> PageLayout {
        let font_size = settings.font_size;
        self.settings = settings;
        self.pagination.set_font_size(font_size)
    }

    pub fn increase_font_size(&mut self) -> PageLayout {
        if self.settings.increase_font_size() {
            self.save_settings();
        }
        self.pagination.set_font_size(self.settings.font_size)
    }

    pub fn decrease_font_size(&mut self) -> PageLayout {
        if self.settings.decrease_font_size() {
            self.save_settings();
        }
        self.pagination.set_font_size(self.settings.font_size)
    }

    fn save_settings(&mut self) {
        if let Err(err) = self.settings.save(self.cache.store_mut()) {
            tracing::warn!(error = %err, "failed to save reading settings");
        }
    }

    /// Stores the chapter list so the document can be reopened without rescanning.
    pub fn persist_chapters(&mut self) -> Result<()> {
        self.cache.save_chapter_list(&self.document_id, &self.chapters)
    }

    /// Applies the host's measured height of the rendered chapter.
    pub fn refine(&mut self, measured_height: f32) -> PageLayout {
        self.pagination.refine(measured_height)
    }

    /// Index of the chapter containing byte `position`, or 0 when none does.
    pub fn chapter_at_position(&self, position: usize) -> usize {
        self.chapters
            .iter()
            .position(|c| c.contains(position))
            .unwrap_or(0)
    }

    pub fn progress_percent(&self) -> f32 {
        if self.document_len == 0 {
            return 0.0;
        }
        let start = self.current_chapter().map(|c| c.start_offset).unwrap_or(0);
        (start as f32 / self.document_len as f32 * 100.0).min(100.0)
    }

    /// Best-effort: a failed write is logged and otherwise ignored.
    pub fn save_progress(&mut self) {
        let progress = ReadingProgress {
            chapter_index: self.current_chapter,
            page: self.pagination.layout().current_page,
            position: self.current_chapter().map(|c| c.start_offset).unwrap_or(0),
            percent: self.progress_percent(),
            updated_at: now_millis(),
        };
        let key = progress_key(&self.document_id);
        if let Err(err) = self.cache.store_mut().set_json(&key, &progress) {
            tracing::warn!(document_id = %self.document_id, error = %err, "failed to save reading progress");
        }
    }

    pub fn saved_progress(&self) -> Option<ReadingProgress> {
        match self.cache.store().get_json(&progress_key(&self.document_id)) {
            Ok(progress) => progress,
            Err(err) => {
                tracing::warn!(document_id = %self.document_id, error = %err, "unreadable reading progress");
                None
            }
        }
    }

    /// Reopens the saved chapter and page, or the first chapter when nothing was saved.
    pub async fn restore_progress(&mut self) -> Result<PageLayout> {
        let Some(progress) = self.saved_progress() else {
            return self.open_chapter(0).await;
        };
        let index = if progress.chapter_index < self.chapters.len() {
            progress.chapter_index
        } else {
            self.chapter_at_position(progress.position)
        };
        self.open_chapter(index).await?;
        Ok(self.pagination.go_to_page(progress.page))
    }

    pub fn bookmarks(&self) -> &[Bookmark] {
        &self.bookmarks
    }

    pub fn is_bookmarked(&self) -> bool {
        let position = self.current_position();
        self.bookmarks
            .iter()
            .any(|b| b.position.abs_diff(position) < BOOKMARK_PROXIMITY)
    }

    /// Adds a bookmark at the current chapter or removes the nearby ones.
    /// Returns true when a bookmark was added.
    pub fn toggle_bookmark(&mut self) -> bool {
        let position = self.current_position();
        let added = if self.is_bookmarked() {
            self.bookmarks
                .retain(|b| b.position.abs_diff(position) >= BOOKMARK_PROXIMITY);
            false
        } else {
            let (chapter_title, chapter_index) = self
                .current_chapter()
                .map(|c| (c.title.clone(), c.index))
                .unwrap_or_default();
            let excerpt = truncate_chars(self.content.trim(), EXCERPT_CHARS).trim();
            self.bookmarks.push(Bookmark {
                id: uuid::Uuid::new_v4().to_string(),
                document_id: self.document_id.clone(),
                position,
                excerpt: format!("{excerpt}..."),
                chapter_title,
                chapter_index,
                created_at: now_millis(),
            });
            true
        };

        let key = bookmark_key(&self.document_id);
        if let Err(err) = self.cache.store_mut().set_json(&key, &self.bookmarks) {
            tracing::warn!(document_id = %self.document_id, error = %err, "failed to save bookmarks");
        }
        added
    }

    /// Removes everything stored for this document: cached chapters, progress,
    /// bookmarks and the chapter list.
    pub fn invalidate(&mut self) {
        self.cache.invalidate_document(&self.document_id);
        self.cache.remove_chapter_list(&self.document_id);
        self.bookmarks.clear();
        if let Err(err) = self.cache.store_mut().remove(&bookmark_key(&self.document_id)) {
            tracing::warn!(document_id = %self.document_id, error = %err, "failed to remove bookmarks");
        }
    }

    fn current_position(&self) -> usize {
        self.current_chapter().map(|c| c.start_offset).unwrap_or(0)
    }
}

fn bookmark_key(document_id: &str) -> String {
    format!("{BOOKMARK_KEY_PREFIX}{}", hash_key(document_id))
}
