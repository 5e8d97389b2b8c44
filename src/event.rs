use std::path::{Path, PathBuf};

/// A reconciled filesystem change.
///
/// Emitted once per change after the index has already been updated to
/// reflect it, so a `search()` issued on receipt sees the new state.
///
/// A rename arrives as `Deleted(old)` followed by `Created(new)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FileEvent {
    /// A file entered the index.
    Created(PathBuf),

    /// An indexed file was re-read and re-tokenized.
    Modified(PathBuf),

    /// A file left the index.
    Deleted(PathBuf),
}

impl FileEvent {
    /// The file this event is about.
    pub fn path(&self) -> &Path {
        match self {
            Self::Created(p) | Self::Modified(p) | Self::Deleted(p) => p,
        }
    }
}

/// What the watcher observed at a path, before reconciliation.
///
/// Carries no content; the reconciler always re-reads the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChangeKind {
    Created,
    Modified,
    Deleted,

    /// The platform dropped events under this root; walk it again.
    Rescan,
}

/// A debounced change notification travelling from the watcher to the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl RawChange {
    pub(crate) fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self { path: path.into(), kind }
    }
}
