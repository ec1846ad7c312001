use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while serving the virtual file.
#[derive(Debug, Error)]
pub enum Error {
    /// The backing file could not be opened.
    #[error("{}: failed to open file: {source}", .location.display())]
    SourceOpen {
        location: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The backing file is not a usable sparse image.
    #[error("{}: failed to open sparse file: {source}", .location.display())]
    DecoderOpen {
        location: PathBuf,
        #[source]
        source: sparse_format::Error,
    },

    /// Seeking or reading the decoded stream failed.
    #[error("{}: failed to read sparse file: {source}", .location.display())]
    Read {
        location: PathBuf,
        #[source]
        source: sparse_format::Error,
    },

    /// Write access was requested.
    #[error("read-only filesystem")]
    ReadOnly,

    /// The file handle does not name an open context.
    #[error("bad file handle: {0}")]
    BadHandle(u64),

    /// Mounting the filesystem failed.
    #[error("FUSE mount failed: {0}")]
    Mount(#[source] std::io::Error),
}

impl Error {
    /// Translate this error into the errno reported to the kernel.
    ///
    /// Failures raised by the operating system keep their own code. Anything
    /// without a POSIX equivalent, such as a malformed chunk, becomes `EIO`.
    pub fn errno(&self) -> i32 {
        match self {
            Error::SourceOpen { source, .. } | Error::Mount(source) => {
                source.raw_os_error().unwrap_or(libc::EIO)
            }
            Error::DecoderOpen { source, .. } | Error::Read { source, .. } => {
                source.raw_os_error().unwrap_or(libc::EIO)
            }
            Error::ReadOnly => libc::EROFS,
            Error::BadHandle(_) => libc::EBADF,
        }
    }
}

/// Result type for sparse-fs operations.
pub type Result<T> = std::result::Result<T, Error>;
