use serde::{Deserialize, Serialize};

/// A contiguous byte range `[start_offset, end_offset)` of a document
/// attributed to one logical chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub index: usize,
    pub title: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

impl Chapter {
    pub fn len(&self) -> usize {
        self.end_offset.saturating_sub(self.start_offset)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, position: usize) -> bool {
        position >= self.start_offset && position < self.end_offset
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageLayout {
    pub line_height: f32,
    pub lines_per_page: usize,
    pub content_area_height: f32,
    pub total_pages: usize,
    pub current_page: usize,
    pub page_offset_y: f32,
}

/// A user-editable substitution applied before the built-in normalization steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceRule {
    pub id: String,
    pub pattern: String,
    pub replacement: String,
    pub is_regex: bool,
    pub enabled: bool,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
}

impl ReplaceRule {
    pub fn literal(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self::build(pattern.into(), replacement.into(), false)
    }

    pub fn regex(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self::build(pattern.into(), replacement.into(), true)
    }

    fn build(pattern: String, replacement: String, is_regex: bool) -> Self {
        ReplaceRule {
            id: uuid::Uuid::new_v4().to_string(),
            pattern,
            replacement,
            is_regex,
            enabled: true,
            created_at: crate::utils::now_millis(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanProgress {
    pub bytes_scanned: u64,
    pub document_len: u64,
}

impl ScanProgress {
    pub fn percent(&self) -> u8 {
        if self.document_len == 0 {
            return 100;
        }
        let scanned = self.bytes_scanned.min(self.document_len);
        (scanned * 100 / self.document_len) as u8
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingProgress {
    pub chapter_index: usize,
    pub page: usize,
    /// Byte offset of the start of the chapter being read.
    pub position: usize,
    pub percent: f32,
    pub updated_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bookmark {
    pub id: String,
    pub document_id: String,
    pub position: usize,
    pub excerpt: String,
    pub chapter_title: String,
    pub chapter_index: usize,
    pub created_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    White,
    Sepia,
    Green,
    Dark,
}

impl Theme {
    /// Background and text colors.
    pub fn colors(self) -> (&'static str, &'static str) {
        match self {
            Theme::White => ("#ffffff", "#333333"),
            Theme::Sepia => ("#f5e6c8", "#5c4b37"),
            Theme::Green => ("#c7edcc", "#3d5c3f"),
            Theme::Dark => ("#1a1a1a", "#999999"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageMode {
    Slide,
    Scroll,
}

/// Reader preferences shared by every document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReadingSettings {
    pub font_size: f32,
    pub line_height: f32,
    pub background_color: String,
    pub text_color: String,
    pub bg_theme: Theme,
    pub is_night_mode: bool,
    pub page_mode: PageMode,
}

impl Default for ReadingSettings {
    fn default() -> Self {
        let (background, text) = Theme::White.colors();
        Self {
            font_size: 32.0,
            line_height: 1.8,
            background_color: background.to_string(),
            text_color: text.to_string(),
            bg_theme: Theme::White,
            is_night_mode: false,
            page_mode: PageMode::Scroll,
        }
    }
}
