use thiserror::Error;

/// Errors that can occur when decoding or building sparse images.
#[derive(Debug, Error)]
pub enum Error {
    /// The file does not start with the sparse magic number.
    #[error("invalid sparse magic: {0:#010x}")]
    InvalidMagic(u32),

    /// The major version is not one this decoder understands.
    #[error("unsupported sparse version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    /// The file header is internally inconsistent.
    #[error("invalid sparse header: {0}")]
    InvalidHeader(String),

    /// A chunk header is malformed or disagrees with the file header.
    #[error("invalid chunk {index}: {detail}")]
    InvalidChunk { index: u32, detail: String },

    /// The source ended before the structure being read was complete.
    #[error("sparse image is truncated: {0}")]
    Truncated(String),

    /// A seek resolved to a position before the start of the stream.
    #[error("invalid seek to offset {0}")]
    InvalidSeek(i128),

    /// Block size rejected by the builder.
    #[error("invalid block size {0}: must be a non-zero multiple of 4")]
    InvalidBlockSize(u32),

    /// I/O error from the underlying byte source.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// The operating system error code behind this failure, if there is one.
    ///
    /// Only errors raised by the OS carry a code. Format-level failures have
    /// no POSIX equivalent and return `None`.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::IoError(e) => e.raw_os_error(),
            _ => None,
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::IoError(e) => e,
            Error::InvalidSeek(_) => std::io::Error::new(std::io::ErrorKind::InvalidInput, err),
            Error::Truncated(_) => std::io::Error::new(std::io::ErrorKind::UnexpectedEof, err),
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}

/// Result type for sparse-format operations.
pub type Result<T> = std::result::Result<T, Error>;
