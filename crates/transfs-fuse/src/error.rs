//! FUSE-boundary error type and errno mapping.

use thiserror::Error;
use transfs_archive::ArchiveError;
use transfs_mapping::ResolveError;

/// Errors surfaced to the kernel, one variant per errno class.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("read-only filesystem: {0}")]
    ReadOnly(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("name too long: {0}")]
    NameTooLong(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("malformed archive: {0}")]
    MalformedArchive(String),
}

impl From<FsError> for libc::c_int {
    fn from(err: FsError) -> libc::c_int {
        match err {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::ReadOnly(_) => libc::EROFS,
            FsError::PermissionDenied(_) => libc::EACCES,
            FsError::NotADirectory(_) => libc::ENOTDIR,
            FsError::IsADirectory(_) => libc::EISDIR,
            FsError::NameTooLong(_) => libc::ENAMETOOLONG,
            FsError::Io(_) => libc::EIO,
            FsError::MalformedArchive(_) => libc::EIO,
        }
    }
}

impl From<std::io::Error> for FsError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound(err.to_string()),
            std::io::ErrorKind::PermissionDenied => FsError::PermissionDenied(err.to_string()),
            _ => FsError::Io(err.to_string()),
        }
    }
}

impl From<ResolveError> for FsError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Io(e) => e.into(),
            ResolveError::Archive(ArchiveError::Malformed { .. }) => {
                FsError::MalformedArchive(err.to_string())
            }
            ResolveError::Archive(ArchiveError::MemberNotFound { .. }) => {
                FsError::NotFound(err.to_string())
            }
            ResolveError::Archive(ArchiveError::Io { source, .. }) => {
                if source.kind() == std::io::ErrorKind::PermissionDenied {
                    FsError::PermissionDenied(source.to_string())
                } else {
                    FsError::Io(source.to_string())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_matches_taxonomy() {
        assert_eq!(libc::c_int::from(FsError::NotFound("x".into())), libc::ENOENT);
        assert_eq!(libc::c_int::from(FsError::ReadOnly("x".into())), libc::EROFS);
        assert_eq!(
            libc::c_int::from(FsError::PermissionDenied("x".into())),
            libc::EACCES
        );
        assert_eq!(libc::c_int::from(FsError::Io("x".into())), libc::EIO);
        assert_eq!(
            libc::c_int::from(FsError::MalformedArchive("x".into())),
            libc::EIO
        );
    }

    #[test]
    fn io_error_kinds_classify() {
        let missing = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert!(matches!(FsError::from(missing), FsError::NotFound(_)));

        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(FsError::from(denied), FsError::PermissionDenied(_)));
    }
}
