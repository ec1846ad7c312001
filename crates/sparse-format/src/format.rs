//! On-disk structures of the Android sparse image format.
//!
//! All fields are little endian. Headers may be longer than the sizes
//! defined here; the extra bytes are reserved and skipped.

use crate::error::{Error, Result};

/// Magic number at the start of every sparse image.
pub const SPARSE_HEADER_MAGIC: u32 = 0xed26_ff3a;

/// Only major version understood by this crate.
pub const MAJOR_VERSION: u16 = 1;

/// Size of the file header as defined by version 1.0.
pub const FILE_HEADER_SIZE: u16 = 28;

/// Size of a chunk header as defined by version 1.0.
pub const CHUNK_HEADER_SIZE: u16 = 12;

pub const CHUNK_TYPE_RAW: u16 = 0xcac1;
pub const CHUNK_TYPE_FILL: u16 = 0xcac2;
pub const CHUNK_TYPE_DONT_CARE: u16 = 0xcac3;
pub const CHUNK_TYPE_CRC32: u16 = 0xcac4;

/// Parsed sparse file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SparseHeader {
    pub major_version: u16,
    pub minor_version: u16,
    /// Length of this header on disk.
    pub file_hdr_sz: u16,
    /// Length of every chunk header on disk.
    pub chunk_hdr_sz: u16,
    /// Output block size in bytes.
    pub blk_sz: u32,
    /// Number of output blocks.
    pub total_blks: u32,
    /// Number of chunks following the header.
    pub total_chunks: u32,
    /// CRC32 of the decoded image. Carried, not verified.
    pub image_checksum: u32,
}

impl SparseHeader {
    /// Decode and validate a header from its first 28 bytes.
    pub fn parse(buf: &[u8; FILE_HEADER_SIZE as usize]) -> Result<Self> {
        let magic = le_u32(&buf[0..4]);
        if magic != SPARSE_HEADER_MAGIC {
            return Err(Error::InvalidMagic(magic));
        }

        let header = Self {
            major_version: le_u16(&buf[4..6]),
            minor_version: le_u16(&buf[6..8]),
            file_hdr_sz: le_u16(&buf[8..10]),
            chunk_hdr_sz: le_u16(&buf[10..12]),
            blk_sz: le_u32(&buf[12..16]),
            total_blks: le_u32(&buf[16..20]),
            total_chunks: le_u32(&buf[20..24]),
            image_checksum: le_u32(&buf[24..28]),
        };

        if header.major_version != MAJOR_VERSION {
            return Err(Error::UnsupportedVersion {
                major: header.major_version,
                minor: header.minor_version,
            });
        }
        if header.file_hdr_sz < FILE_HEADER_SIZE {
            return Err(Error::InvalidHeader(format!(
                "file header size {} is smaller than {}",
                header.file_hdr_sz, FILE_HEADER_SIZE
            )));
        }
        if header.chunk_hdr_sz < CHUNK_HEADER_SIZE {
            return Err(Error::InvalidHeader(format!(
                "chunk header size {} is smaller than {}",
                header.chunk_hdr_sz, CHUNK_HEADER_SIZE
            )));
        }
        if header.blk_sz == 0 || header.blk_sz % 4 != 0 {
            return Err(Error::InvalidHeader(format!(
                "block size {} is not a non-zero multiple of 4",
                header.blk_sz
            )));
        }

        Ok(header)
    }

    /// Encode this header in its 28-byte canonical form.
    pub fn to_bytes(&self) -> [u8; FILE_HEADER_SIZE as usize] {
        let mut buf = [0u8; FILE_HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(&SPARSE_HEADER_MAGIC.to_le_bytes());
        buf[4..6].copy_from_slice(&self.major_version.to_le_bytes());
        buf[6..8].copy_from_slice(&self.minor_version.to_le_bytes());
        buf[8..10].copy_from_slice(&self.file_hdr_sz.to_le_bytes());
        buf[10..12].copy_from_slice(&self.chunk_hdr_sz.to_le_bytes());
        buf[12..16].copy_from_slice(&self.blk_sz.to_le_bytes());
        buf[16..20].copy_from_slice(&self.total_blks.to_le_bytes());
        buf[20..24].copy_from_slice(&self.total_chunks.to_le_bytes());
        buf[24..28].copy_from_slice(&self.image_checksum.to_le_bytes());
        buf
    }

    /// Logical size of the decoded image in bytes.
    pub fn image_size(&self) -> u64 {
        u64::from(self.blk_sz) * u64::from(self.total_blks)
    }
}

/// Parsed chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub chunk_type: u16,
    pub reserved: u16,
    /// Output size in blocks.
    pub chunk_sz: u32,
    /// Bytes on disk, header included.
    pub total_sz: u32,
}

impl ChunkHeader {
    pub fn parse(buf: &[u8; CHUNK_HEADER_SIZE as usize]) -> Self {
        Self {
            chunk_type: le_u16(&buf[0..2]),
            reserved: le_u16(&buf[2..4]),
            chunk_sz: le_u32(&buf[4..8]),
            total_sz: le_u32(&buf[8..12]),
        }
    }

    pub fn to_bytes(&self) -> [u8; CHUNK_HEADER_SIZE as usize] {
        let mut buf = [0u8; CHUNK_HEADER_SIZE as usize];
        buf[0..2].copy_from_slice(&self.chunk_type.to_le_bytes());
        buf[2..4].copy_from_slice(&self.reserved.to_le_bytes());
        buf[4..8].copy_from_slice(&self.chunk_sz.to_le_bytes());
        buf[8..12].copy_from_slice(&self.total_sz.to_le_bytes());
        buf
    }
}

/// What a chunk expands to in the decoded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// Bytes copied from the container starting at `data_offset`.
    Raw { data_offset: u64 },
    /// A 4-byte pattern repeated over the whole chunk.
    Fill { pattern: [u8; 4] },
    /// Unspecified contents; decoded as zeros.
    DontCare,
}

/// One entry of the chunk index: a logical byte range and its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub kind: ChunkKind,
    /// First logical byte covered by the chunk.
    pub start: u64,
    /// One past the last logical byte covered by the chunk.
    pub end: u64,
}

impl Chunk {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, offset: u64) -> bool {
        self.start <= offset && offset < self.end
    }
}

fn le_u16(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> SparseHeader {
        SparseHeader {
            major_version: 1,
            minor_version: 0,
            file_hdr_sz: FILE_HEADER_SIZE,
            chunk_hdr_sz: CHUNK_HEADER_SIZE,
            blk_sz: 4096,
            total_blks: 10,
            total_chunks: 2,
            image_checksum: 0,
        }
    }

    #[test]
    fn header_bytes_parse_back() {
        let header = sample_header();
        let parsed = SparseHeader::parse(&header.to_bytes()).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.image_size(), 40960);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let mut bytes = sample_header().to_bytes();
        bytes[0] = 0;
        assert!(matches!(
            SparseHeader::parse(&bytes),
            Err(Error::InvalidMagic(_))
        ));
    }

    #[test]
    fn header_rejects_major_version_2() {
        let mut header = sample_header();
        header.major_version = 2;
        assert!(matches!(
            SparseHeader::parse(&header.to_bytes()),
            Err(Error::UnsupportedVersion { major: 2, .. })
        ));
    }

    #[test]
    fn header_rejects_unaligned_block_size() {
        let mut header = sample_header();
        header.blk_sz = 4094;
        assert!(matches!(
            SparseHeader::parse(&header.to_bytes()),
            Err(Error::InvalidHeader(_))
        ));

        header.blk_sz = 0;
        assert!(SparseHeader::parse(&header.to_bytes()).is_err());
    }

    #[test]
    fn header_rejects_short_header_sizes() {
        let mut header = sample_header();
        header.chunk_hdr_sz = 8;
        assert!(SparseHeader::parse(&header.to_bytes()).is_err());

        let mut header = sample_header();
        header.file_hdr_sz = 20;
        assert!(SparseHeader::parse(&header.to_bytes()).is_err());
    }

    #[test]
    fn image_size_does_not_overflow_u32() {
        let mut header = sample_header();
        header.total_blks = u32::MAX;
        assert_eq!(header.image_size(), 4096 * u64::from(u32::MAX));
    }
}
