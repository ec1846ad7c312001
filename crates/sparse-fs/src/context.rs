use crate::error::{Error, Result};
use crate::source::{ImageDecoder, ImageSource};
use log::error;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// State owned by one open file handle.
///
/// Holds a decoder (which owns its byte source) behind a lock. Dropping the
/// context closes both.
#[derive(Debug)]
pub struct HandleContext<D> {
    location: PathBuf,
    decoder: Mutex<D>,
}

impl<D: ImageDecoder> HandleContext<D> {
    /// Open a fresh decoder for a new handle.
    pub fn open<S>(source: &S) -> Result<Self>
    where
        S: ImageSource<Decoder = D>,
    {
        let decoder = source.open()?;
        Ok(Self {
            location: source.location().to_path_buf(),
            decoder: Mutex::new(decoder),
        })
    }

    /// Seek to `offset` and read into `buf`.
    ///
    /// The lock is held across both steps. A short read from the decoder is
    /// returned as-is.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        // every read re-seeks, so state left by a panicked reader is harmless
        let mut decoder = self.decoder.lock().unwrap_or_else(PoisonError::into_inner);

        decoder
            .seek(SeekFrom::Start(offset))
            .and_then(|_| decoder.read(buf))
            .map_err(|source| {
                let err = Error::Read {
                    location: self.location.clone(),
                    source,
                };
                error!("{}", err);
                err
            })
    }

    /// Backing location of this handle.
    pub fn location(&self) -> &Path {
        &self.location
    }
}
