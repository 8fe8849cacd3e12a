use crate::error::{ReaderError, Result};
use chardetng::EncodingDetector;
use encoding_rs::{Decoder, Encoding, UTF_8};
use std::path::PathBuf;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

/// Bytes buffered before the source encoding is guessed.
pub const SNIFF_SIZE: usize = 64 * 1024;

/// Directory of uploaded documents, stored as UTF-8 under `{id}.txt`.
#[derive(Debug, Clone)]
pub struct Library {
    dir: PathBuf,
}

impl Library {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// Path of a document. Ids must be UUIDs so they cannot escape the directory.
    pub fn document_path(&self, document_id: &str) -> Result<PathBuf> {
        uuid::Uuid::parse_str(document_id).map_err(|err| ReaderError::Storage {
            key: document_id.to_string(),
            reason: format!("invalid document id: {err}"),
        })?;
        Ok(self.dir.join(format!("{document_id}.txt")))
    }

    pub async fn contains(&self, document_id: &str) -> bool {
        match self.document_path(document_id) {
            Ok(path) => fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Starts a new document with a fresh id.
    pub async fn create(&self) -> Result<DocumentWriter> {
        let document_id = uuid::Uuid::new_v4().to_string();
        let path = self.document_path(&document_id)?;
        let file = File::create(&path).await?;
        Ok(DocumentWriter {
            document_id,
            path,
            file,
            pending: Vec::new(),
            decoder: None,
            written: 0,
        })
    }

    pub async fn remove(&self, document_id: &str) -> Result<()> {
        let path = self.document_path(document_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// A document being written chunk by chunk.
///
/// The source encoding is guessed from the first [`SNIFF_SIZE`] bytes (a BOM
/// wins outright) and everything is transcoded to UTF-8 without a BOM.
pub struct DocumentWriter {
    document_id: String,
    path: PathBuf,
    file: File,
    pending: Vec<u8>,
    decoder: Option<Decoder>,
    written: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub document_id: String,
    pub path: PathBuf,
    /// Name of the detected source encoding.
    pub encoding: &'static str,
    /// UTF-8 length on disk.
    pub len: u64,
}

impl DocumentWriter {
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        if self.decoder.is_none() {
            self.pending.extend_from_slice(chunk);
            if self.pending.len() < SNIFF_SIZE {
                return Ok(());
            }
            let head = std::mem::take(&mut self.pending);
            self.decoder = Some(detect_encoding(&head, false).new_decoder_with_bom_removal());
            return self.decode(&head, false).await;
        }
        self.decode(chunk, false).await
    }

    pub async fn finish(mut self) -> Result<StoredDocument> {
        if self.decoder.is_none() {
            self.decoder = Some(detect_encoding(&self.pending, true).new_decoder_with_bom_removal());
        }
        let head = std::mem::take(&mut self.pending);
        self.decode(&head, true).await?;
        self.file.flush().await?;

        let encoding = self.decoder.as_ref().map_or(UTF_8, Decoder::encoding).name();
        tracing::info!(
            document_id = %self.document_id,
            encoding,
            bytes = self.written,
            "stored document"
        );
        Ok(StoredDocument {
            document_id: self.document_id,
            path: self.path,
            encoding,
            len: self.written,
        })
    }

    async fn decode(&mut self, bytes: &[u8], last: bool) -> Result<()> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(());
        };
        let capacity = decoder
            .max_utf8_buffer_length(bytes.len())
            .ok_or_else(|| ReaderError::Storage {
                key: self.document_id.clone(),
                reason: "chunk too large to transcode".to_string(),
            })?;
        let mut out = String::with_capacity(capacity);
        let (_, read, replaced) = decoder.decode_to_string(bytes, &mut out, last);
        debug_assert_eq!(read, bytes.len());
        if replaced {
            tracing::debug!(document_id = %self.document_id, "replaced malformed input");
        }
        self.file.write_all(out.as_bytes()).await?;
        self.written += out.len() as u64;
        Ok(())
    }
}

/// BOM first, then UTF-8 if the sample is valid, then a statistical guess.
fn detect_encoding(sample: &[u8], complete: bool) -> &'static Encoding {
    if let Some((encoding, _)) = Encoding::for_bom(sample) {
        return encoding;
    }
    match std::str::from_utf8(sample) {
        Ok(_) => return UTF_8,
        // A character cut by the end of the sample
        Err(err) if !complete && err.error_len().is_none() => return UTF_8,
        Err(_) => {}
    }
    let mut detector = EncodingDetector::new();
    detector.feed(sample, complete);
    detector.guess(None, true)
}
