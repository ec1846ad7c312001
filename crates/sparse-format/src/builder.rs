use crate::format::{
    ChunkHeader, SparseHeader, CHUNK_HEADER_SIZE, CHUNK_TYPE_CRC32, CHUNK_TYPE_DONT_CARE,
    CHUNK_TYPE_FILL, CHUNK_TYPE_RAW, FILE_HEADER_SIZE, MAJOR_VERSION,
};
use crate::{Error, Result};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingChunk {
    Raw(Vec<u8>),
    Fill { value: u32, blocks: u32 },
    DontCare { blocks: u32 },
    Crc32(u32),
}

/// Builder for creating sparse images.
///
/// Chunks are emitted in the order they are added. Raw data that does not
/// end on a block boundary is padded with zeros.
#[derive(Debug, Clone)]
pub struct SparseBuilder {
    block_size: u32,
    chunks: Vec<PendingChunk>,
}

impl SparseBuilder {
    /// Create a new builder for the given output block size.
    pub fn new(block_size: u32) -> Result<Self> {
        if block_size == 0 || block_size % 4 != 0 {
            return Err(Error::InvalidBlockSize(block_size));
        }
        Ok(Self {
            block_size,
            chunks: Vec::new(),
        })
    }

    /// Encode a flat image, turning uniform blocks into fill chunks and
    /// all-zero blocks into don't-care chunks.
    pub fn encode(data: &[u8], block_size: u32) -> Result<Self> {
        let mut builder = Self::new(block_size)?;

        for block in data.chunks(block_size as usize) {
            match uniform_word(block, block_size as usize) {
                Some(0) => builder.push_dont_care(1),
                Some(value) => builder.push_fill(value, 1),
                None => builder.push_raw(block),
            }
        }

        Ok(builder)
    }

    /// Append raw data.
    pub fn with_raw(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.chunks.push(PendingChunk::Raw(data.into()));
        self
    }

    /// Append `blocks` blocks filled with the little-endian bytes of `value`.
    pub fn with_fill(mut self, value: u32, blocks: u32) -> Self {
        self.chunks.push(PendingChunk::Fill { value, blocks });
        self
    }

    /// Append `blocks` blocks of unspecified (zero) contents.
    pub fn with_dont_care(mut self, blocks: u32) -> Self {
        self.chunks.push(PendingChunk::DontCare { blocks });
        self
    }

    /// Append a CRC32 chunk. It covers no output blocks.
    pub fn with_crc32(mut self, crc: u32) -> Self {
        self.chunks.push(PendingChunk::Crc32(crc));
        self
    }

    /// Number of chunks that will be written.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn push_raw(&mut self, block: &[u8]) {
        if let Some(PendingChunk::Raw(data)) = self.chunks.last_mut() {
            if data.len() % self.block_size as usize == 0 {
                data.extend_from_slice(block);
                return;
            }
        }
        self.chunks.push(PendingChunk::Raw(block.to_vec()));
    }

    fn push_fill(&mut self, value: u32, count: u32) {
        if let Some(PendingChunk::Fill { value: last, blocks }) = self.chunks.last_mut() {
            if *last == value {
                *blocks += count;
                return;
            }
        }
        self.chunks.push(PendingChunk::Fill {
            value,
            blocks: count,
        });
    }

    fn push_dont_care(&mut self, count: u32) {
        if let Some(PendingChunk::DontCare { blocks }) = self.chunks.last_mut() {
            *blocks += count;
            return;
        }
        self.chunks.push(PendingChunk::DontCare { blocks: count });
    }

    fn blocks_for(&self, len: usize) -> u64 {
        (len as u64).div_ceil(u64::from(self.block_size))
    }

    /// Serialize the image into memory.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let blk_sz = u64::from(self.block_size);
        let mut body = Vec::new();
        let mut total_blks = 0u64;

        for chunk in &self.chunks {
            let (header, payload): (ChunkHeader, Vec<u8>) = match chunk {
                PendingChunk::Raw(data) => {
                    let blocks = self.blocks_for(data.len());
                    let mut padded = data.clone();
                    padded.resize((blocks * blk_sz) as usize, 0);
                    (chunk_header(CHUNK_TYPE_RAW, blocks, padded.len())?, padded)
                }
                PendingChunk::Fill { value, blocks } => (
                    chunk_header(CHUNK_TYPE_FILL, u64::from(*blocks), 4)?,
                    value.to_le_bytes().to_vec(),
                ),
                PendingChunk::DontCare { blocks } => (
                    chunk_header(CHUNK_TYPE_DONT_CARE, u64::from(*blocks), 0)?,
                    Vec::new(),
                ),
                PendingChunk::Crc32(crc) => (
                    chunk_header(CHUNK_TYPE_CRC32, 0, 4)?,
                    crc.to_le_bytes().to_vec(),
                ),
            };

            total_blks += u64::from(header.chunk_sz);
            body.extend_from_slice(&header.to_bytes());
            body.extend_from_slice(&payload);
        }

        let header = SparseHeader {
            major_version: MAJOR_VERSION,
            minor_version: 0,
            file_hdr_sz: FILE_HEADER_SIZE,
            chunk_hdr_sz: CHUNK_HEADER_SIZE,
            blk_sz: self.block_size,
            total_blks: u32::try_from(total_blks).map_err(|_| {
                Error::InvalidHeader(format!("{} blocks exceed the format limit", total_blks))
            })?,
            total_chunks: u32::try_from(self.chunks.len()).map_err(|_| {
                Error::InvalidHeader(format!("{} chunks exceed the format limit", self.chunks.len()))
            })?,
            image_checksum: 0,
        };

        let mut out = Vec::with_capacity(FILE_HEADER_SIZE as usize + body.len());
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Write the image to the specified path.
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<PathBuf> {
        let bytes = self.to_bytes()?;

        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = File::create(path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;

        Ok(path.to_path_buf())
    }
}

fn chunk_header(chunk_type: u16, blocks: u64, payload_len: usize) -> Result<ChunkHeader> {
    let total = u64::from(CHUNK_HEADER_SIZE) + payload_len as u64;
    let too_large = || Error::InvalidHeader(format!("chunk of {} blocks is too large", blocks));
    Ok(ChunkHeader {
        chunk_type,
        reserved: 0,
        chunk_sz: u32::try_from(blocks).map_err(|_| too_large())?,
        total_sz: u32::try_from(total).map_err(|_| too_large())?,
    })
}

/// The repeated little-endian word of a full block, if the block has one.
fn uniform_word(block: &[u8], block_size: usize) -> Option<u32> {
    if block.len() != block_size {
        return None;
    }
    let first = &block[..4];
    if block.chunks_exact(4).all(|word| word == first) {
        Some(u32::from_le_bytes([first[0], first[1], first[2], first[3]]))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_block_size() {
        assert!(matches!(
            SparseBuilder::new(6),
            Err(Error::InvalidBlockSize(6))
        ));
        assert!(SparseBuilder::new(0).is_err());
    }

    #[test]
    fn encode_merges_runs() {
        let mut data = vec![0u8; 16];
        data.extend_from_slice(&[7u8; 16]);
        data.extend_from_slice(b"0123456789abcdef");
        data.extend_from_slice(b"fedcba9876543210");

        let builder = SparseBuilder::encode(&data, 8).unwrap();
        assert_eq!(
            builder.chunks,
            vec![
                PendingChunk::DontCare { blocks: 2 },
                PendingChunk::Fill {
                    value: 0x0707_0707,
                    blocks: 2
                },
                PendingChunk::Raw(data[32..].to_vec()),
            ]
        );
    }

    #[test]
    fn trailing_partial_block_stays_raw() {
        let builder = SparseBuilder::encode(&[0u8; 10], 8).unwrap();
        assert_eq!(
            builder.chunks,
            vec![
                PendingChunk::DontCare { blocks: 1 },
                PendingChunk::Raw(vec![0, 0]),
            ]
        );
    }

    #[test]
    fn raw_data_is_padded_to_blocks() {
        let bytes = SparseBuilder::new(8)
            .unwrap()
            .with_raw(b"abc".to_vec())
            .to_bytes()
            .unwrap();

        let header = SparseHeader::parse(bytes[..28].try_into().unwrap()).unwrap();
        assert_eq!(header.total_blks, 1);
        assert_eq!(header.total_chunks, 1);
        assert_eq!(bytes.len(), 28 + 12 + 8);
        assert_eq!(&bytes[40..], b"abc\0\0\0\0\0");
    }

    #[test]
    fn write_to_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.simg");

        let written = SparseBuilder::new(4)
            .unwrap()
            .with_fill(1, 3)
            .write_to(&path)
            .unwrap();

        assert_eq!(written, path);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 28 + 12 + 4);
    }
}
