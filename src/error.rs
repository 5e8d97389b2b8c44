use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexerError {
    // Configuration
    #[error("no root path configured")]
    NoRoots,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    // Filesystem
    #[error("path not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    #[error("not a text file: {}", .0.display())]
    NotText(PathBuf),

    #[error("IO error at {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to watch {}", path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    // Index
    #[error("already indexed: {}", .0.display())]
    AlreadyIndexed(PathBuf),

    // Lifecycle
    #[error("indexer already started")]
    AlreadyStarted,

    #[error("indexer not started")]
    NotStarted,

    #[error("indexer closed")]
    Closed,

    #[error("background task failed: {0}")]
    TaskFailed(String),

    // Subscriptions
    #[error("subscriber could not keep up and was cancelled")]
    SubscriberLagged,
}

impl IndexerError {
    /// Map an I/O failure on `path` to the most specific variant.
    pub(crate) fn from_io(path: PathBuf, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path),
            _ => Self::Io { path, source: err },
        }
    }

    /// The path this error occurred at, if applicable.
    /// Callers use this to present "Skipped: <path>" without pattern matching on variants.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::NotFound(p)
            | Self::PermissionDenied(p)
            | Self::NotText(p)
            | Self::AlreadyIndexed(p)
            | Self::Io { path: p, .. }
            | Self::Watch { path: p, .. } => Some(p),
            _ => None,
        }
    }

    /// Whether indexing can continue after this error.
    ///
    /// Recoverable errors (unreadable or vanished files, binary content, a
    /// file reached through two roots, a lagging subscriber) affect a single
    /// file or stream. Everything else is fatal to the call that returned it.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied(_)
                | Self::Io { .. }
                | Self::NotText(_)
                | Self::AlreadyIndexed(_)
                | Self::SubscriberLagged
        )
    }
}
