use weft_types::ContentHash;

/// Errors from content store operations.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    /// No entry exists for the requested hash.
    #[error("content not found: {0}")]
    NotFound(ContentHash),

    /// Decoded bytes do not hash to the entry's key (data corruption).
    #[error("hash mismatch for {expected}: computed {computed}")]
    HashMismatch {
        expected: ContentHash,
        computed: ContentHash,
    },

    /// `release` was called on an entry that already has no references.
    #[error("reference count underflow for {0}")]
    RefCountUnderflow(ContentHash),

    /// Compression or decompression failure.
    #[error("compression error: {0}")]
    Compression(String),

    /// I/O error from external (cold tier) storage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for content store operations.
pub type ContentResult<T> = Result<T, ContentError>;
