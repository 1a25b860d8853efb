//! Crate-wide error type.
//!
//! Every fallible path in the crate reports through [`Error`]. Errors that
//! originate in the storage library carry the name of the failing primitive
//! and the OS errno it returned, so the operator can see `hss_open:
//! ENOENT`-style detail in the server log and in FTP response bodies.

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The error sum type.
///
/// Variants map one-to-one onto the failure classes the transfer engines
/// distinguish; everything the storage library reports that has no more
/// specific class lands in [`Error::Transport`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Allocation failed.
    #[error("out of memory allocating {0}")]
    OutOfMemory(&'static str),
    /// Path or attribute does not exist.
    #[error("{0}: no such file or attribute")]
    NotFound(String),
    /// The active credential may not perform the operation.
    #[error("permission denied")]
    PermissionDenied,
    /// Storage quota exhausted.
    #[error("quota exceeded")]
    QuotaExceeded,
    /// No space left in the storage class.
    #[error("no space left on storage class")]
    NoSpace,
    /// A directory was found where a file was required.
    #[error("is a directory")]
    IsADirectory,
    /// A file was found where a directory was required.
    #[error("not a directory")]
    NotADirectory,
    /// Caller-supplied parameter is unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The storage library failed; `function` names the primitive.
    #[error("{function} failed with errno {errno}")]
    Transport {
        /// Name of the storage primitive that failed.
        function: &'static str,
        /// OS errno reported by the library.
        errno: i32,
    },
    /// The transfer was torn down before completion.
    #[error("transfer cancelled")]
    Cancelled,
    /// The GridFTP peer (or the server framework on its behalf) failed.
    #[error("peer error: {0}")]
    Peer(String),
    /// The operation is not supported by this build or backend.
    #[error("not supported: {0}")]
    Unsupported(&'static str),
}

impl Error {
    /// Classify a storage-library errno return.
    ///
    /// Errnos with a dedicated variant are promoted; the rest stay a
    /// [`Error::Transport`] carrying the primitive's name.
    pub fn from_errno(function: &'static str, errno: i32) -> Error {
        match errno {
            libc::ENOENT => Error::NotFound(function.to_string()),
            libc::EPERM | libc::EACCES => Error::PermissionDenied,
            libc::EDQUOT => Error::QuotaExceeded,
            libc::ENOSPC => Error::NoSpace,
            libc::EISDIR => Error::IsADirectory,
            libc::ENOTDIR => Error::NotADirectory,
            libc::EINVAL => Error::InvalidArgument(function.to_string()),
            libc::ENOMEM => Error::OutOfMemory(function),
            _ => Error::Transport { function, errno },
        }
    }

    /// The FTP response code this error maps to.
    pub fn ftp_code(&self) -> u16 {
        match self {
            Error::NotADirectory | Error::IsADirectory => 553,
            Error::NoSpace | Error::QuotaExceeded => 451,
            Error::PermissionDenied => 550,
            _ => 500,
        }
    }

    /// Render the one-line FTP response body for this error.
    pub fn ftp_response(&self) -> String {
        format!("{} {}\r\n", self.ftp_code(), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_classification() {
        assert_eq!(
            Error::from_errno("hss_open", libc::ENOENT),
            Error::NotFound("hss_open".to_string())
        );
        assert_eq!(Error::from_errno("hss_open", libc::EACCES), Error::PermissionDenied);
        assert_eq!(Error::from_errno("hss_write", libc::ENOSPC), Error::NoSpace);
        assert_eq!(
            Error::from_errno("hss_pio_execute", libc::EIO),
            Error::Transport { function: "hss_pio_execute", errno: libc::EIO }
        );
    }

    #[test]
    fn ftp_codes() {
        assert_eq!(Error::IsADirectory.ftp_code(), 553);
        assert_eq!(Error::NotADirectory.ftp_code(), 553);
        assert_eq!(Error::NoSpace.ftp_code(), 451);
        assert_eq!(Error::QuotaExceeded.ftp_code(), 451);
        assert_eq!(Error::PermissionDenied.ftp_code(), 550);
        assert_eq!(Error::Cancelled.ftp_code(), 500);
        assert!(Error::PermissionDenied.ftp_response().starts_with("550 "));
    }
}
