use crate::error::{Error, Result};
use crate::format::{
    Chunk, ChunkHeader, ChunkKind, SparseHeader, CHUNK_HEADER_SIZE, CHUNK_TYPE_CRC32,
    CHUNK_TYPE_DONT_CARE, CHUNK_TYPE_FILL, CHUNK_TYPE_RAW, FILE_HEADER_SIZE,
};
use log::{debug, trace};
use std::io::{self, Read, Seek, SeekFrom};

/// Decoder presenting a sparse image as a flat, seekable byte stream.
///
/// The chunk headers are indexed once in [`SparseReader::open`]. Afterwards
/// every read is resolved against the index, so only payload bytes of raw
/// chunks are fetched from the source.
#[derive(Debug)]
pub struct SparseReader<R> {
    inner: R,
    header: SparseHeader,
    chunks: Vec<Chunk>,
    size: u64,
    pos: u64,
}

impl<R: Read + Seek> SparseReader<R> {
    /// Parse the sparse header and chunk table of `inner`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The header is missing, has the wrong magic, or an unsupported version
    /// - A chunk header is malformed or has an unknown type
    /// - The chunks do not cover exactly the number of blocks in the header
    /// - The source ends before the last chunk payload
    pub fn open(mut inner: R) -> Result<Self> {
        inner.seek(SeekFrom::Start(0))?;

        let mut buf = [0u8; FILE_HEADER_SIZE as usize];
        read_full(&mut inner, &mut buf, "file header")?;
        let header = SparseHeader::parse(&buf)?;

        let source_len = inner.seek(SeekFrom::End(0))?;
        let chunks = index_chunks(&mut inner, &header, source_len)?;

        debug!(
            "Indexed sparse image: {} chunks, {} blocks of {} bytes",
            chunks.len(),
            header.total_blks,
            header.blk_sz
        );

        Ok(Self {
            inner,
            size: header.image_size(),
            header,
            chunks,
            pos: 0,
        })
    }

    /// Logical size of the decoded image.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Current logical position.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// The parsed file header.
    pub fn header(&self) -> &SparseHeader {
        &self.header
    }

    /// The chunk index, ordered by logical offset.
    ///
    /// Chunks that decode to nothing (CRC32 chunks) are not listed.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Give back the underlying byte source.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Move the logical cursor.
    ///
    /// Positions past the end are allowed; reads there return 0 bytes.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(delta) => i128::from(self.pos) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(self.size) + i128::from(delta),
        };
        if target < 0 || target > i128::from(u64::MAX) {
            return Err(Error::InvalidSeek(target));
        }

        self.pos = target as u64;
        Ok(self.pos)
    }

    /// Read decoded bytes at the cursor, crossing chunk boundaries.
    ///
    /// Returns fewer bytes than requested only at the end of the image.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;

        while filled < buf.len() && self.pos < self.size {
            let index = self.chunks.partition_point(|c| c.end <= self.pos);
            let chunk = self.chunks[index];

            let in_chunk = self.pos - chunk.start;
            let want = (buf.len() - filled) as u64;
            let n = want.min(chunk.end - self.pos) as usize;
            let out = &mut buf[filled..filled + n];

            match chunk.kind {
                ChunkKind::Raw { data_offset } => {
                    self.inner.seek(SeekFrom::Start(data_offset + in_chunk))?;
                    read_full(&mut self.inner, out, "raw chunk data")?;
                }
                ChunkKind::Fill { pattern } => {
                    for (i, byte) in out.iter_mut().enumerate() {
                        *byte = pattern[((in_chunk + i as u64) % 4) as usize];
                    }
                }
                ChunkKind::DontCare => out.fill(0),
            }

            trace!("read {} bytes at {} from {:?}", n, self.pos, chunk.kind);
            filled += n;
            self.pos += n as u64;
        }

        Ok(filled)
    }
}

impl<R: Read + Seek> Read for SparseReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        SparseReader::read(self, buf).map_err(io::Error::from)
    }
}

impl<R: Read + Seek> Seek for SparseReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        SparseReader::seek(self, pos).map_err(io::Error::from)
    }
}

/// Walk every chunk header and build the logical index.
fn index_chunks<R: Read + Seek>(
    inner: &mut R,
    header: &SparseHeader,
    source_len: u64,
) -> Result<Vec<Chunk>> {
    let blk_sz = u64::from(header.blk_sz);
    let chunk_hdr_sz = u64::from(header.chunk_hdr_sz);
    let mut chunks = Vec::new();
    let mut src_offset = u64::from(header.file_hdr_sz);
    let mut out_offset = 0u64;
    let mut blocks = 0u64;

    for index in 0..header.total_chunks {
        inner.seek(SeekFrom::Start(src_offset))?;
        let mut buf = [0u8; CHUNK_HEADER_SIZE as usize];
        read_full(inner, &mut buf, &format!("chunk {} header", index))?;
        let chunk = ChunkHeader::parse(&buf);

        let invalid = |detail: String| Error::InvalidChunk { index, detail };

        let total_sz = u64::from(chunk.total_sz);
        if total_sz < chunk_hdr_sz {
            return Err(invalid(format!(
                "total size {} is smaller than the chunk header",
                total_sz
            )));
        }
        let payload_sz = total_sz - chunk_hdr_sz;
        let data_offset = src_offset + chunk_hdr_sz;
        let out_len = u64::from(chunk.chunk_sz) * blk_sz;

        let kind = match chunk.chunk_type {
            CHUNK_TYPE_RAW => {
                if payload_sz != out_len {
                    return Err(invalid(format!(
                        "raw payload is {} bytes, expected {}",
                        payload_sz, out_len
                    )));
                }
                Some(ChunkKind::Raw { data_offset })
            }
            CHUNK_TYPE_FILL => {
                if payload_sz != 4 {
                    return Err(invalid(format!(
                        "fill payload is {} bytes, expected 4",
                        payload_sz
                    )));
                }
                let mut pattern = [0u8; 4];
                inner.seek(SeekFrom::Start(data_offset))?;
                read_full(inner, &mut pattern, &format!("chunk {} fill value", index))?;
                Some(ChunkKind::Fill { pattern })
            }
            CHUNK_TYPE_DONT_CARE => {
                if payload_sz != 0 {
                    return Err(invalid(format!(
                        "don't care chunk carries {} payload bytes",
                        payload_sz
                    )));
                }
                Some(ChunkKind::DontCare)
            }
            CHUNK_TYPE_CRC32 => {
                if payload_sz != 4 {
                    return Err(invalid(format!(
                        "crc32 payload is {} bytes, expected 4",
                        payload_sz
                    )));
                }
                if chunk.chunk_sz != 0 {
                    return Err(invalid(format!(
                        "crc32 chunk covers {} blocks",
                        chunk.chunk_sz
                    )));
                }
                None
            }
            other => return Err(invalid(format!("unknown chunk type {:#06x}", other))),
        };

        let next_src = src_offset
            .checked_add(total_sz)
            .ok_or_else(|| invalid("source offset overflows".to_string()))?;
        if next_src > source_len {
            return Err(Error::Truncated(format!(
                "chunk {} ends at byte {}, source has {}",
                index, next_src, source_len
            )));
        }

        blocks += u64::from(chunk.chunk_sz);
        if blocks > u64::from(header.total_blks) {
            return Err(invalid(format!(
                "chunks cover more than the {} blocks in the header",
                header.total_blks
            )));
        }

        if let Some(kind) = kind {
            if out_len > 0 {
                chunks.push(Chunk {
                    kind,
                    start: out_offset,
                    end: out_offset + out_len,
                });
            }
        }

        out_offset += out_len;
        src_offset = next_src;
    }

    if blocks != u64::from(header.total_blks) {
        return Err(Error::InvalidHeader(format!(
            "chunks cover {} blocks, header declares {}",
            blocks, header.total_blks
        )));
    }

    Ok(chunks)
}

/// `read_exact` that reports a premature end as [`Error::Truncated`].
fn read_full<R: Read>(inner: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    inner.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::Truncated(what.to_string()),
        _ => Error::IoError(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SparseBuilder;
    use std::io::Cursor;

    fn open_bytes(bytes: Vec<u8>) -> Result<SparseReader<Cursor<Vec<u8>>>> {
        SparseReader::open(Cursor::new(bytes))
    }

    fn mixed_image() -> Vec<u8> {
        SparseBuilder::new(8)
            .unwrap()
            .with_raw(b"ABCDEFGH".to_vec())
            .with_fill(u32::from_le_bytes(*b"wxyz"), 1)
            .with_dont_care(1)
            .with_crc32(0xdead_beef)
            .to_bytes()
            .unwrap()
    }

    #[test]
    fn indexes_chunks_in_logical_order() {
        let reader = open_bytes(mixed_image()).unwrap();
        assert_eq!(reader.size(), 24);

        let ranges: Vec<_> = reader.chunks().iter().map(|c| (c.start, c.end)).collect();
        assert_eq!(ranges, vec![(0, 8), (8, 16), (16, 24)]);
        assert!(matches!(reader.chunks()[1].kind, ChunkKind::Fill { .. }));
    }

    #[test]
    fn read_crosses_chunk_boundaries() {
        let mut reader = open_bytes(mixed_image()).unwrap();
        reader.seek(SeekFrom::Start(6)).unwrap();

        let mut buf = [0xffu8; 12];
        assert_eq!(reader.read(&mut buf).unwrap(), 12);
        assert_eq!(&buf, b"GHwxyzwxyz\0\0");
        assert_eq!(reader.position(), 18);
    }

    #[test]
    fn fill_pattern_keeps_phase_at_odd_offsets() {
        let mut reader = open_bytes(mixed_image()).unwrap();
        reader.seek(SeekFrom::Start(9)).unwrap();

        let mut buf = [0u8; 5];
        reader.read(&mut buf).unwrap();
        assert_eq!(&buf, b"xyzwx");
    }

    #[test]
    fn read_at_end_returns_zero() {
        let mut reader = open_bytes(mixed_image()).unwrap();
        reader.seek(SeekFrom::End(0)).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);

        reader.seek(SeekFrom::Start(1000)).unwrap();
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn short_read_only_at_end() {
        let mut reader = open_bytes(mixed_image()).unwrap();
        reader.seek(SeekFrom::Start(20)).unwrap();
        let mut buf = [0xffu8; 16];
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], &[0, 0, 0, 0]);
    }

    #[test]
    fn seek_before_start_fails() {
        let mut reader = open_bytes(mixed_image()).unwrap();
        assert!(matches!(
            reader.seek(SeekFrom::Current(-1)),
            Err(Error::InvalidSeek(-1))
        ));
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn rejects_unknown_chunk_type() {
        let mut bytes = mixed_image();
        // first chunk header starts right after the 28-byte file header
        bytes[28] = 0x00;
        bytes[29] = 0x11;
        assert!(matches!(
            open_bytes(bytes),
            Err(Error::InvalidChunk { index: 0, .. })
        ));
    }

    #[test]
    fn rejects_truncated_payload() {
        let mut bytes = mixed_image();
        bytes.truncate(bytes.len() - 2);
        assert!(matches!(open_bytes(bytes), Err(Error::Truncated(_))));
    }

    #[test]
    fn rejects_block_count_mismatch() {
        let mut bytes = mixed_image();
        // total_blks lives at offset 16
        bytes[16..20].copy_from_slice(&7u32.to_le_bytes());
        assert!(matches!(open_bytes(bytes), Err(Error::InvalidHeader(_))));
    }

    #[test]
    fn rejects_empty_source() {
        assert!(matches!(open_bytes(Vec::new()), Err(Error::Truncated(_))));
    }

    #[test]
    fn skips_oversized_headers() {
        let header = SparseHeader {
            major_version: 1,
            minor_version: 0,
            file_hdr_sz: 32,
            chunk_hdr_sz: 16,
            blk_sz: 4,
            total_blks: 1,
            total_chunks: 1,
            image_checksum: 0,
        };
        let mut bytes = header.to_bytes().to_vec();
        bytes.extend_from_slice(&[0xee; 4]);
        let chunk = ChunkHeader {
            chunk_type: CHUNK_TYPE_RAW,
            reserved: 0,
            chunk_sz: 1,
            total_sz: 20,
        };
        bytes.extend_from_slice(&chunk.to_bytes());
        bytes.extend_from_slice(&[0xee; 4]);
        bytes.extend_from_slice(b"data");

        let mut reader = open_bytes(bytes).unwrap();
        let mut out = Vec::new();
        std::io::Read::read_to_end(&mut reader, &mut out).unwrap();
        assert_eq!(out, b"data");
    }
}
