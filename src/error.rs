use thiserror::Error;

/// Result type for ledger storage operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors raised while reading or writing the ledger file.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Underlying storage failed.
    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),

    /// A header or record ended before all of its fields were read.
    #[error("truncated {what}")]
    Truncated { what: &'static str },

    /// A text field was not valid UTF-8.
    #[error("invalid UTF-8 in {what}")]
    InvalidUtf8 { what: &'static str },

    /// The header announced a negative number of blocks.
    #[error("invalid block count in header: {0}")]
    InvalidBlockCount(i32),

    /// The title does not fit in the fixed-size header.
    #[error("title is {len} bytes, header allows at most {max}")]
    TitleTooLong { len: usize, max: usize },

    /// A block was offered for a height other than the next free one.
    #[error("block height {found} does not follow the tip (expected {expected})")]
    HeightMismatch { expected: u32, found: u32 },
}

impl LedgerError {
    /// Whether this error means the stored bytes are malformed, as opposed to
    /// the storage itself failing.
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            Self::Truncated { .. } | Self::InvalidUtf8 { .. } | Self::InvalidBlockCount(_)
        )
    }
}
