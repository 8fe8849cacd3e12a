use crate::config::AppConfig;
use crate::error::{ReaderError, Result};
use crate::models::Chapter;
use crate::services::reader::ChunkReader;
use serde::Deserialize;
use std::future::Future;

/// Resolves the raw, un-normalized text of one chapter.
pub trait ChapterFetcher {
    fn fetch_chapter_raw(
        &self,
        document_id: &str,
        chapter_index: usize,
    ) -> impl Future<Output = Result<String>> + Send;
}

/// Reads chapter spans out of a local document through a [`ChunkReader`].
#[derive(Debug, Clone)]
pub struct SpanFetcher<R> {
    reader: R,
    chapters: Vec<Chapter>,
}

impl<R: ChunkReader + Sync> SpanFetcher<R> {
    pub fn new(reader: R, chapters: Vec<Chapter>) -> Self {
        Self { reader, chapters }
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }
}

impl<R: ChunkReader + Sync> ChapterFetcher for SpanFetcher<R> {
    async fn fetch_chapter_raw(&self, document_id: &str, chapter_index: usize) -> Result<String> {
        let chapter = self
            .chapters
            .get(chapter_index)
            .ok_or(ReaderError::ChapterOutOfRange(chapter_index))?;

        let bytes = self
            .reader
            .read_range(chapter.start_offset as u64, chapter.len())
            .await
            .map_err(|err| ReaderError::FetchFailed {
                document_id: document_id.to_string(),
                chapter_index,
                reason: err.to_string(),
            })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChapterContentResponse {
    content: String,
}

/// Fetches chapter text from a remote book catalog.
///
/// Expects `GET {base_url}/books/{document_id}/chapters/{index}` to answer
/// with JSON carrying a `content` field.
pub struct HttpChapterFetcher {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpChapterFetcher {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        HttpChapterFetcher {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Built from `catalog_url` and `catalog_key`; `None` when no catalog is configured.
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        let base_url = config.catalog_url.as_deref()?;
        Some(Self::new(base_url, config.catalog_key.clone()))
    }

    fn chapter_url(&self, document_id: &str, chapter_index: usize) -> String {
        format!(
            "{}/books/{}/chapters/{}",
            self.base_url, document_id, chapter_index
        )
    }

    async fn request(&self, document_id: &str, chapter_index: usize) -> reqwest::Result<String> {
        let mut request_builder = self.client.get(self.chapter_url(document_id, chapter_index));
        if let Some(key) = &self.api_key {
            request_builder = request_builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = request_builder.send().await?.error_for_status()?;
        let body: ChapterContentResponse = response.json().await?;
        Ok(body.content)
    }
}

impl ChapterFetcher for HttpChapterFetcher {
    async fn fetch_chapter_raw(&self, document_id: &str, chapter_index: usize) -> Result<String> {
        self.request(document_id, chapter_index)
            .await
            .map_err(|err| ReaderError::FetchFailed {
                document_id: document_id.to_string(),
                chapter_index,
                reason: err.to_string(),
            })
    }
}
