use crate::dtype::DType;

/// All errors that can occur within Wren.
///
/// The first four variants are the core taxonomy: malformed construction,
/// incompatible operand sizes, incompatible element types, and out-of-bounds
/// access. They are raised eagerly at the violated precondition. Ordering
/// violations of the emitter and optimizer protocols are not errors; they
/// panic, since they signal a bug in the caller rather than bad data.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed construction (e.g. a non-2D layout handed to a Matrix).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operand sizes differ (e.g. adding a [2, 3] matrix to a [3, 2] one).
    #[error("size mismatch: expected {expected:?}, got {got:?}")]
    SizeMismatch { expected: Vec<usize>, got: Vec<usize> },

    /// Element types differ, or a node was downcast to the wrong kind.
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    /// Sub-view or dimension access outside the active region.
    #[error("index out of range: index {index} for extent {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// Operation requires a specific rank.
    #[error("rank mismatch: expected rank {expected}, got {got}")]
    RankMismatch { expected: usize, got: usize },

    /// No creator registered for a node kind.
    #[error("unknown node kind '{0}'")]
    UnknownNodeKind(String),

    /// Archive could not be written or read back.
    #[error("archive error: {0}")]
    Archive(String),

    /// Failure while running emitted code.
    #[error("execution error: {0}")]
    Execution(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    pub fn invalid_argument(s: impl Into<String>) -> Self {
        Error::InvalidArgument(s.into())
    }

    pub fn dtype_mismatch(expected: DType, got: DType) -> Self {
        Error::TypeMismatch {
            expected: expected.to_string(),
            got: got.to_string(),
        }
    }
}

/// Convenience Result type used throughout Wren.
pub type Result<T> = std::result::Result<T, Error>;

/// Early return with an invalid-argument error.
/// Usage: `bail!("layout has {} dimensions", n)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::InvalidArgument(format!($($arg)*)))
    };
}
