//! # sparse-fs
//!
//! Expose the decoded contents of a sparse image as a single read-only
//! file, without expanding the image on disk.
//!
//! This crate provides:
//! - Backing-location handling ([`MountTarget`]), optionally pinned to the
//!   inode opened at startup
//! - One-shot size probing before mount ([`probe_size`])
//! - The callback-level virtual file ([`VirtualFile`]): attribute query,
//!   open, positioned read and release, with one decoder per open handle
//! - Translation of decoder failures into errno values ([`Error::errno`])
//! - FUSE filesystem support (with the `fuse` feature)
//!
//! ## Example
//!
//! ```ignore
//! use sparse_fs::{probe_size, MountConfig, MountTarget, SparseImage, VirtualFile};
//!
//! let image = SparseImage::new(MountTarget::path("system.simg"));
//! let size = probe_size(&image)?;
//! let file = VirtualFile::new(image, size, MountConfig::default());
//!
//! let fh = file.open(libc::O_RDONLY)?;
//! let mut buf = vec![0u8; 4096];
//! let n = file.read(fh, 0, &mut buf)?;
//! file.release(fh);
//! ```
//!
//! ## FUSE Support
//!
//! Enable the `fuse` feature to mount the virtual file:
//!
//! ```ignore
//! use sparse_fs::fuse::mount;
//!
//! mount(file, "/mnt/system.img")?;
//! ```

mod config;
mod context;
mod error;
mod file;
mod probe;
mod source;
mod target;

#[cfg(feature = "fuse")]
pub mod fuse;

pub use config::MountConfig;
pub use context::HandleContext;
pub use error::{Error, Result};
pub use file::{FileStat, VirtualFile, FILE_PERM};
pub use probe::probe_size;
pub use source::{ImageDecoder, ImageSource, SparseImage};
pub use target::MountTarget;

// Re-export sparse-format types for convenience
pub use sparse_format::{SparseBuilder, SparseReader};
