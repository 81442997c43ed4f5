//! Filesystem Error Types
//!
//! Defines error conditions that can occur during filesystem operations.

use crate::ftl::FtlError;
use core::fmt;

/// Filesystem error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// File or directory not found
    NotFound,
    /// File or directory already exists
    AlreadyExists,
    /// Is a directory (when file expected)
    IsDirectory,
    /// Not a directory (when directory expected)
    NotDirectory,
    /// No free inode or data block
    NoSpace,
    /// Entity name exceeds the on-device name field
    NameTooLong,
    /// Path is not absolute or otherwise malformed
    InvalidPath,
    /// Offset past the end of the file
    OutOfBounds,
    /// Open handles prevent the operation
    Busy,
    /// Error from the translation layer underneath
    Ftl(FtlError),
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsError::NotFound => write!(f, "not found"),
            FsError::AlreadyExists => write!(f, "already exists"),
            FsError::IsDirectory => write!(f, "is a directory"),
            FsError::NotDirectory => write!(f, "not a directory"),
            FsError::NoSpace => write!(f, "no space left"),
            FsError::NameTooLong => write!(f, "name too long"),
            FsError::InvalidPath => write!(f, "invalid path"),
            FsError::OutOfBounds => write!(f, "offset out of bounds"),
            FsError::Busy => write!(f, "resource busy"),
            FsError::Ftl(e) => write!(f, "ftl error: {}", e),
        }
    }
}

impl From<FtlError> for FsError {
    fn from(e: FtlError) -> Self {
        FsError::Ftl(e)
    }
}
