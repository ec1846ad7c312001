use crate::error::{Error, Result};
use crate::target::MountTarget;
use sparse_format::SparseReader;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// A stateful decoder over one byte source.
///
/// Implementations keep a cursor, so `seek` followed by `read` must not be
/// interleaved with calls from another thread.
pub trait ImageDecoder: Send {
    /// Move the logical cursor.
    fn seek(&mut self, pos: SeekFrom) -> sparse_format::Result<u64>;

    /// Read from the cursor. May return fewer bytes than requested.
    fn read(&mut self, buf: &mut [u8]) -> sparse_format::Result<usize>;

    /// Logical size of the decoded stream.
    fn size(&self) -> u64;
}

impl<R: Read + Seek + Send> ImageDecoder for SparseReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> sparse_format::Result<u64> {
        SparseReader::seek(self, pos)
    }

    fn read(&mut self, buf: &mut [u8]) -> sparse_format::Result<usize> {
        SparseReader::read(self, buf)
    }

    fn size(&self) -> u64 {
        SparseReader::size(self)
    }
}

/// Something that can produce independent decoders for the mounted image.
pub trait ImageSource: Send + Sync + 'static {
    type Decoder: ImageDecoder + 'static;

    /// Open a fresh byte source and a fresh decoder bound to it.
    ///
    /// Fails with [`Error::SourceOpen`] or [`Error::DecoderOpen`] depending
    /// on which step failed. Nothing is left open on failure.
    fn open(&self) -> Result<Self::Decoder>;

    /// Backing location, for diagnostics.
    fn location(&self) -> &Path;
}

/// Sparse image file on disk.
#[derive(Debug)]
pub struct SparseImage {
    target: MountTarget,
}

impl SparseImage {
    pub fn new(target: MountTarget) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &MountTarget {
        &self.target
    }
}

impl ImageSource for SparseImage {
    type Decoder = SparseReader<File>;

    fn open(&self) -> Result<Self::Decoder> {
        let file = self
            .target
            .open_read_only()
            .map_err(|source| Error::SourceOpen {
                location: self.location().to_path_buf(),
                source,
            })?;

        // on failure the reader drops `file` before we return
        SparseReader::open(file).map_err(|source| Error::DecoderOpen {
            location: self.location().to_path_buf(),
            source,
        })
    }

    fn location(&self) -> &Path {
        self.target.location()
    }
}
