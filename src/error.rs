use thiserror::Error;

/// Crate-wide error type for every fallible operation, from raw page
/// decoding up through catalog and record materialization.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("page {page_number} is malformed: {reason}")]
    MalformedPage { page_number: u32, reason: String },

    #[error("truncated page: needed {needed} bytes, only {available} available")]
    TruncatedPage { needed: usize, available: usize },

    #[error("truncated page-tree value: needed {needed} bytes, only {available} available")]
    TruncatedValue { needed: usize, available: usize },

    #[error("branch tag {tag_index} on page {page_number} has a value shorter than 4 bytes")]
    InvalidBranch { page_number: u32, tag_index: usize },

    #[error("invalid page number {0}")]
    InvalidPageNumber(u32),

    #[error("page {page_number} has an unsupported layout: {reason}")]
    UnsupportedPage { page_number: u32, reason: String },

    #[error("page-tree recursion exceeded the maximum depth of {depth}")]
    RecursionDepthExceeded { depth: usize },

    #[error("page {page_number} has an inconsistent combination of LEAF/branch flags")]
    InconsistentPageFlags { page_number: u32 },

    #[error("key on page {page_number} exceeds the page size")]
    KeyTooLong { page_number: u32 },

    #[error("page {page_number} tag {tag_index} is missing its page value")]
    MissingPageValue { page_number: u32, tag_index: usize },

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("invalid UTF-8 text column: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

pub type Result<T> = std::result::Result<T, Error>;
