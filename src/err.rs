#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("poll error: {0}")]
    Poll(#[from] nix::Error),

    #[error("expected {expected} arguments, got {got}")]
    Args { expected: usize, got: usize },

    #[error("invalid server address {0:?}")]
    InvalidAddr(String),

    #[error("payload file {path:?} is {actual} bytes, expected {expected}")]
    PayloadSizeMismatch {
        path: String,
        expected: usize,
        actual: usize,
    },

    #[error("segment exceeds MSS: {0} bytes")]
    SegmentTooLarge(usize),

    #[error("segment buffer too short to hold a header: {0} bytes")]
    SegmentTooShort(usize),
}
