use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReaderError {
    /// Remote or file read failed while resolving chapter text.
    #[error("failed to fetch chapter {chapter_index} of {document_id}: {reason}")]
    FetchFailed {
        document_id: String,
        chapter_index: usize,
        reason: String,
    },

    /// A chunked read failed during streaming segmentation.
    #[error("scan failed at byte {offset}: {reason}")]
    ScanFailed { offset: u64, reason: String },

    #[error("replace rule {rule_id} could not be applied: {reason}")]
    RuleApplicationFailed { rule_id: String, reason: String },

    #[error("storage error for key {key}: {reason}")]
    Storage { key: String, reason: String },

    #[error("chapter {0} is out of range")]
    ChapterOutOfRange(usize),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ReaderError>;
