//! FUSE binding for the virtual file.
//!
//! Mounts the decoded contents of a sparse image as a single read-only
//! regular file. Tools can then `open`, `read` and `stat` the mount point
//! as if the image had been expanded on disk.
//!
//! # Features
//!
//! - **On-Demand Decoding**: Reads are resolved against the sparse chunk
//!   index; the expanded image is never written anywhere
//! - **Independent Handles**: Every `open()` gets its own decoder, so
//!   readers on different handles never wait on each other
//! - **Read-Only**: Write access is refused with `EROFS`
//!
//! # Example
//!
//! ```ignore
//! use sparse_fs::fuse::mount;
//! use sparse_fs::{probe_size, MountConfig, MountTarget, SparseImage, VirtualFile};
//!
//! let image = SparseImage::new(MountTarget::pinned("system.simg")?);
//! let size = probe_size(&image)?;
//! mount(VirtualFile::new(image, size, MountConfig::default()), "system.img")?;
//! ```

mod adapter;

pub use adapter::*;
