//! # sparse-format
//!
//! Core library for the Android sparse image format.
//!
//! This crate provides:
//! - Header and chunk parsing for sparse images (format version 1.x)
//! - [`SparseReader`], a decoder exposing the expanded image as a flat,
//!   seekable byte stream without materializing it
//! - [`SparseBuilder`] for creating new sparse images
//!
//! ## Example
//!
//! ```ignore
//! use sparse_format::{SparseBuilder, SparseReader};
//! use std::fs::File;
//! use std::io::SeekFrom;
//!
//! // Create an image: one raw block followed by 255 blocks of zeros
//! SparseBuilder::new(4096)?
//!     .with_raw(vec![0xab; 4096])
//!     .with_dont_care(255)
//!     .write_to("system.simg")?;
//!
//! // Read it back at an arbitrary logical offset
//! let mut reader = SparseReader::open(File::open("system.simg")?)?;
//! assert_eq!(reader.size(), 256 * 4096);
//! reader.seek(SeekFrom::Start(4090))?;
//! let mut buf = [0u8; 16];
//! reader.read(&mut buf)?;
//! ```

mod builder;
mod error;
pub mod format;
mod reader;

pub use builder::SparseBuilder;
pub use error::{Error, Result};
pub use format::{Chunk, ChunkKind, SparseHeader};
pub use reader::SparseReader;
