//! Transparent ZIP archive indexing for TransFS.
//!
//! An [`ArchiveSnapshot`] is the logical directory tree of one archive,
//! built lazily from the central directory and cached by the
//! [`ArchiveIndex`] keyed on `(path, mtime, size)`. Member extraction goes
//! through temp files; random-access reads decompress and skip.

pub mod index;
pub mod snapshot;

pub use index::ArchiveIndex;
pub use snapshot::{ArchiveListing, ArchiveSnapshot};

use thiserror::Error;

/// Errors raised while indexing or reading archives.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed archive {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("member {member:?} not found in {path}")]
    MemberNotFound { path: String, member: String },
}

impl ArchiveError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn malformed(path: &std::path::Path, source: zip::result::ZipError) -> Self {
        Self::Malformed {
            path: path.display().to_string(),
            source,
        }
    }
}
