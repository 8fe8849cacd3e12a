use crate::models::{Chapter, ScanProgress};
use crate::services::reader::ChunkReader;
use crate::services::segmenter::{
    MAX_TITLE_CHARS, PREAMBLE_THRESHOLD, PREAMBLE_TITLE, is_chapter_title,
};
use crate::utils::truncate_chars;
use std::borrow::Cow;

/// Default window size in bytes (100KB)
pub const DEFAULT_WINDOW_SIZE: usize = 100 * 1024;

/// Bytes the next window re-reads from the end of the previous one. Lines cut
/// by a window boundary are always re-read whole regardless of this value.
pub const DEFAULT_OVERLAP: usize = 200;

/// Bytes inspected up front to decide whether the document opens with untitled text.
pub const DEFAULT_PEEK_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub window_size: usize,
    pub overlap: usize,
    pub peek_size: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            overlap: DEFAULT_OVERLAP,
            peek_size: DEFAULT_PEEK_SIZE,
        }
    }
}

impl ScannerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.window_size == 0 {
            return Err("Window size must be greater than 0".to_string());
        }
        if self.overlap >= self.window_size {
            return Err(format!(
                "Overlap ({}) must be smaller than the window size ({})",
                self.overlap, self.window_size
            ));
        }
        Ok(())
    }
}

/// Chapter segmentation over a [`ChunkReader`], one window at a time.
#[derive(Debug, Clone, Default)]
pub struct StreamingScanner {
    config: ScannerConfig,
}

impl StreamingScanner {
    pub fn new(config: ScannerConfig) -> Self {
        let config = match config.validate() {
            Ok(()) => config,
            Err(reason) => {
                tracing::warn!(%reason, "invalid scanner config, using defaults");
                ScannerConfig::default()
            }
        };
        Self { config }
    }

    /// Scans the whole document, reporting a 0-100 percentage after every window.
    ///
    /// Never fails: a read error yields a single chapter covering the document.
    pub async fn scan<R: ChunkReader>(
        &self,
        reader: &R,
        document_len: u64,
        fallback_title: &str,
        mut on_progress: impl FnMut(u8),
    ) -> Vec<Chapter> {
        let mut task = ScanTask::new(reader, document_len, fallback_title, self.config.clone());
        while let Some(progress) = task.step().await {
            on_progress(progress.percent());
            tokio::task::yield_now().await;
        }
        let chapters = task.finish();
        on_progress(100);
        chapters
    }
}

#[derive(Debug)]
struct OpenChapter {
    title: String,
    start: u64,
    preamble: bool,
}

/// Resumable scan state. Each [`ScanTask::step`] consumes one window.
pub struct ScanTask<'a, R> {
    reader: &'a R,
    config: ScannerConfig,
    document_len: u64,
    fallback_title: String,
    cursor: u64,
    head: Vec<u8>,
    open: Option<OpenChapter>,
    last_hit: Option<u64>,
    chapters: Vec<Chapter>,
    line_aligned: bool,
    started: bool,
    done: bool,
    failed: bool,
}

impl<'a, R: ChunkReader> ScanTask<'a, R> {
    pub fn new(reader: &'a R, document_len: u64, fallback_title: &str, config: ScannerConfig) -> Self {
        Self {
            reader,
            config,
            document_len,
            fallback_title: fallback_title.to_string(),
            cursor: 0,
            head: Vec::new(),
            open: None,
            last_hit: None,
            chapters: Vec::new(),
            line_aligned: true,
            started: false,
            done: false,
            failed: false,
        }
    }

    /// Processes the next window. Returns `None` once the document is exhausted
    /// or a read failed.
    pub async fn step(&mut self) -> Option<ScanProgress> {
        if self.done {
            return None;
        }
        if !self.started {
            self.started = true;
            if let Err(err) = self.peek_head().await {
                self.abort(err);
                return None;
            }
        }
        if self.cursor >= self.document_len {
            self.done = true;
            return None;
        }

        let window = match self
            .reader
            .read_range(self.cursor, self.config.window_size)
            .await
        {
            Ok(bytes) => bytes,
            Err(err) => {
                self.abort(err);
                return None;
            }
        };
        if window.is_empty() {
            self.done = true;
            return None;
        }

        let window_end = self.cursor + window.len() as u64;
        let at_eof = window_end >= self.document_len || window.len() < self.config.window_size;
        let advance = self.scan_window(&window, at_eof);

        let progress = ScanProgress {
            bytes_scanned: window_end.min(self.document_len),
            document_len: self.document_len,
        };
        if at_eof {
            self.done = true;
        } else {
            self.line_aligned = window[advance - 1] == b'\n';
            self.cursor += advance as u64;
        }
        Some(progress)
    }

    /// Closes the last open chapter and returns the indexed chapter list.
    pub fn finish(mut self) -> Vec<Chapter> {
        // A seeded front matter chapter alone does not count as a detected title
        if self.failed || self.last_hit.is_none() {
            return vec![self.fallback()];
        }
        if let Some(open) = self.open.take() {
            self.push_closed(open, self.document_len);
        }
        if self.chapters.is_empty() {
            return vec![self.fallback()];
        }
        for (idx, chapter) in self.chapters.iter_mut().enumerate() {
            chapter.index = idx;
        }
        tracing::info!(
            chapters = self.chapters.len(),
            bytes = self.document_len,
            "streaming scan complete"
        );
        self.chapters
    }

    async fn peek_head(&mut self) -> crate::error::Result<()> {
        self.head = self.reader.read_range(0, self.config.peek_size).await?;
        let text = String::from_utf8_lossy(&self.head);
        let trimmed = text.trim_start();
        if !trimmed.is_empty() && !is_chapter_title(trimmed) {
            self.open = Some(OpenChapter {
                title: PREAMBLE_TITLE.to_string(),
                start: 0,
                preamble: true,
            });
        }
        Ok(())
    }

    /// Tests every line that starts inside the window and returns how far the
    /// cursor moves. A line cut off by the end of the window is left for the
    /// next one, which then starts exactly on that line.
    fn scan_window(&mut self, window: &[u8], at_eof: bool) -> usize {
        let tail_start = window
            .iter()
            .rposition(|b| *b == b'\n')
            .map_or(0, |pos| pos + 1);
        let cut_tail = !at_eof && tail_start < window.len();

        let mut rel = 0usize;
        for (n, piece) in window.split(|b| *b == b'\n').enumerate() {
            let start = rel;
            rel += piece.len() + 1;

            // Continuation of a line that began in an earlier window
            if n == 0 && !self.line_aligned {
                continue;
            }

            let line = if cut_tail && start == tail_start {
                if tail_start > 0 {
                    continue;
                }
                // The line is longer than a whole window, only its head can be tested
                complete_chars(piece)
            } else {
                String::from_utf8_lossy(piece)
            };
            let trimmed = line.trim();
            if !trimmed.is_empty() && is_chapter_title(trimmed) {
                let title = truncate_chars(trimmed, MAX_TITLE_CHARS).to_string();
                self.on_title(self.cursor + start as u64, title);
            }
        }

        let step = self.config.window_size - self.config.overlap;
        if at_eof {
            window.len()
        } else if cut_tail && tail_start > 0 {
            tail_start.min(step)
        } else {
            step
        }
    }

    fn on_title(&mut self, offset: u64, title: String) {
        if self.last_hit.is_some_and(|last| offset <= last) {
            // Re-seen inside the overlap
            return;
        }
        self.last_hit = Some(offset);

        match self.open.take() {
            Some(open) if open.preamble && !self.exceeds_preamble_threshold(offset) => {
                self.open = Some(OpenChapter {
                    title,
                    start: 0,
                    preamble: false,
                });
            }
            Some(open) => {
                self.push_closed(open, offset);
                self.open = Some(OpenChapter {
                    title,
                    start: offset,
                    preamble: false,
                });
            }
            None => {
                // Anything before the very first title belongs to it
                let start = if self.chapters.is_empty() { 0 } else { offset };
                self.open = Some(OpenChapter {
                    title,
                    start,
                    preamble: false,
                });
            }
        }
    }

    fn exceeds_preamble_threshold(&self, offset: u64) -> bool {
        let offset = offset as usize;
        if offset > self.head.len() {
            return true;
        }
        String::from_utf8_lossy(&self.head[..offset]).chars().count() > PREAMBLE_THRESHOLD
    }

    fn push_closed(&mut self, open: OpenChapter, end: u64) {
        self.chapters.push(Chapter {
            index: self.chapters.len(),
            title: open.title,
            start_offset: open.start as usize,
            end_offset: end as usize,
        });
    }

    fn abort(&mut self, err: crate::error::ReaderError) {
        tracing::warn!(
            offset = self.cursor,
            error = %err,
            "chunked read failed, falling back to a single chapter"
        );
        self.failed = true;
        self.done = true;
    }

    fn fallback(&self) -> Chapter {
        Chapter {
            index: 0,
            title: self.fallback_title.clone(),
            start_offset: 0,
            end_offset: self.document_len as usize,
        }
    }
}

/// Decodes `bytes`, dropping a multi-byte character cut off at the end.
fn complete_chars(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(err) if err.error_len().is_none() => {
            String::from_utf8_lossy(&bytes[..err.valid_up_to()])
        }
        Err(_) => String::from_utf8_lossy(bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::reader::BytesChunkReader;
    use crate::services::segmenter::segment;

    fn small_scanner() -> StreamingScanner {
        StreamingScanner::new(ScannerConfig {
            window_size: 64,
            overlap: 16,
            peek_size: 1000,
        })
    }

    fn book(chapters: usize, body_lines: usize) -> String {
        let mut text = String::new();
        for n in 1..=chapters {
            text.push_str(&format!("Chapter {n}\n"));
            for line in 0..body_lines {
                text.push_str(&format!("line {line} of chapter {n} goes here.\n"));
            }
        }
        text
    }

    fn assert_tiles(chapters: &[Chapter], len: usize) {
        assert_eq!(chapters[0].start_offset, 0);
        assert_eq!(chapters.last().unwrap().end_offset, len);
        for pair in chapters.windows(2) {
            assert_eq!(pair[0].end_offset, pair[1].start_offset);
            assert!(pair[0].start_offset < pair[1].start_offset);
        }
    }

    #[tokio::test]
    async fn finds_titles_across_many_windows() {
        let text = book(12, 5);
        let reader = BytesChunkReader::new(text.clone());
        let chapters = small_scanner()
            .scan(&reader, text.len() as u64, "fallback", |_| {})
            .await;

        assert_eq!(chapters.len(), 12);
        assert_tiles(&chapters, text.len());
        for (idx, chapter) in chapters.iter().enumerate() {
            assert_eq!(chapter.index, idx);
            assert_eq!(chapter.title, format!("Chapter {}", idx + 1));
        }
    }

    #[tokio::test]
    async fn agrees_with_whole_text_segmentation() {
        let text = format!("{}\n{}", "前言内容。".repeat(40), book(6, 3));
        let reader = BytesChunkReader::new(text.clone());
        let streamed = small_scanner()
            .scan(&reader, text.len() as u64, "书", |_| {})
            .await;
        assert_eq!(streamed, segment(&text, "书"));
    }

    #[tokio::test]
    async fn no_titles_yields_fallback() {
        let text = "just some text\n".repeat(20);
        let reader = BytesChunkReader::new(text.clone());
        let chapters = small_scanner()
            .scan(&reader, text.len() as u64, "正文", |_| {})
            .await;
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].title, "正文");
        assert_eq!(chapters[0].end_offset, text.len());
    }

    #[tokio::test]
    async fn short_preamble_is_folded_into_first_chapter() {
        let text = format!("intro\n{}", book(2, 2));
        let reader = BytesChunkReader::new(text.clone());
        let chapters = small_scanner()
            .scan(&reader, text.len() as u64, "x", |_| {})
            .await;
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].title, "Chapter 1");
        assert_tiles(&chapters, text.len());
    }

    #[tokio::test]
    async fn read_failure_falls_back_to_single_chapter() {
        let text = book(10, 5);
        let reader = BytesChunkReader::new(text.clone()).failing_after(100);
        let chapters = small_scanner()
            .scan(&reader, text.len() as u64, "broken", |_| {})
            .await;
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].title, "broken");
        assert_eq!(chapters[0].end_offset, text.len());
    }

    #[tokio::test]
    async fn progress_is_monotonic_and_ends_at_100() {
        let text = book(8, 4);
        let reader = BytesChunkReader::new(text.clone());
        let mut seen = Vec::new();
        small_scanner()
            .scan(&reader, text.len() as u64, "x", |p| seen.push(p))
            .await;
        assert!(seen.len() > 2);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last(), Some(&100));
    }

    #[tokio::test]
    async fn empty_document() {
        let reader = BytesChunkReader::new(Vec::new());
        let chapters = StreamingScanner::default().scan(&reader, 0, "空", |_| {}).await;
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].end_offset, 0);
    }

    #[tokio::test]
    async fn title_starting_at_the_step_boundary_is_found_with_small_overlap() {
        // "Chapter 2 ..." begins at byte 56 = window_size - overlap
        let text = format!(
            "Chapter 1\n{}\nChapter 2 the long way round\nbody\n",
            "x".repeat(45)
        );
        assert_eq!(text.find("Chapter 2"), Some(56));
        let reader = BytesChunkReader::new(text.clone());
        let scanner = StreamingScanner::new(ScannerConfig {
            window_size: 64,
            overlap: 8,
            peek_size: 1000,
        });
        let chapters = scanner.scan(&reader, text.len() as u64, "x", |_| {}).await;

        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[1].title, "Chapter 2 the long way round");
        assert_eq!(chapters[1].start_offset, 56);
        assert_eq!(chapters, segment(&text, "x"));
    }

    fn mixed_book() -> String {
        let mut text = String::new();
        for n in 1..=30 {
            match n % 3 {
                0 => text.push_str(&format!("第{n}章 标题\n")),
                1 => text.push_str(&format!("Chapter {n}\n")),
                _ => text.push_str(&format!("卷{n}\n")),
            }
            for p in 0..(n % 4) {
                text.push_str(&format!("正文{p}，继续。\n"));
            }
        }
        text
    }

    #[tokio::test]
    async fn matches_whole_text_segmentation_for_any_window_and_overlap() {
        let text = mixed_book();
        let expected = segment(&text, "书");
        let reader = BytesChunkReader::new(text.clone());
        for window_size in 32..96 {
            for overlap in [0, 1, 8, 17, 23] {
                let scanner = StreamingScanner::new(ScannerConfig {
                    window_size,
                    overlap,
                    peek_size: 1000,
                });
                let chapters = scanner.scan(&reader, text.len() as u64, "书", |_| {}).await;
                assert_eq!(chapters, expected, "window {window_size}, overlap {overlap}");
            }
        }
    }

    #[tokio::test]
    async fn line_longer_than_a_window_does_not_stall() {
        let text = format!("Chapter 1 {}\nbody\nChapter 2\n", "长".repeat(40));
        let reader = BytesChunkReader::new(text.clone());
        let scanner = StreamingScanner::new(ScannerConfig {
            window_size: 32,
            overlap: 4,
            peek_size: 1000,
        });
        let chapters = scanner.scan(&reader, text.len() as u64, "x", |_| {}).await;
        assert_eq!(chapters.len(), 2);
        assert!(chapters[0].title.starts_with("Chapter 1"));
        assert!(!chapters[0].title.contains('\u{FFFD}'));
        assert_eq!(chapters[1].start_offset, text.find("Chapter 2").unwrap());
    }

    #[test]
    fn overlap_must_be_smaller_than_window() {
        let config = ScannerConfig {
            window_size: 10,
            overlap: 10,
            peek_size: 10,
        };
        assert!(config.validate().is_err());
        assert!(ScannerConfig::default().validate().is_ok());
        let no_overlap = ScannerConfig {
            window_size: 64,
            overlap: 0,
            peek_size: 10,
        };
        assert!(no_overlap.validate().is_ok());
    }
}
