//! Reading engine for long-form plain text: chapter segmentation, page
//! layout estimation, content normalization and a bounded chapter cache.

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use error::{ReaderError, Result};
pub use models::{
    Bookmark, Chapter, PageLayout, PageMode, ReadingProgress, ReadingSettings, ReplaceRule,
    ScanProgress, Theme, Viewport,
};
pub use services::cache::ChapterCache;
pub use services::normalizer::{ContentNormalizer, NormalizerConfig};
pub use services::pagination::{LayoutConfig, PaginationEngine};
pub use services::scanner::StreamingScanner;
pub use services::segmenter::segment;
pub use services::session::ReadingSession;
