//! The single read-only file exposing the decoded image.

use crate::config::MountConfig;
use crate::context::HandleContext;
use crate::error::{Error, Result};
use crate::source::ImageSource;
use log::{debug, error, trace, warn};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

/// Permission bits of the exported file: read-only for everyone.
pub const FILE_PERM: u16 = 0o444;

/// Attributes of the exported file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Logical size of the decoded image.
    pub size: u64,
    /// Permission bits (always [`FILE_PERM`]).
    pub perm: u16,
    pub uid: u32,
    pub gid: u32,
    /// Used for every timestamp.
    pub mtime: SystemTime,
}

type Handles<D> = HashMap<u64, Arc<HandleContext<D>>>;

/// Callback-level view of the virtual file.
///
/// Every method takes `&self` and may be called from several threads at
/// once. Each open gets its own decoder; reads on one handle are serialized
/// by that handle's lock and never wait on another handle.
pub struct VirtualFile<S: ImageSource> {
    source: S,
    /// Probed once before mounting; never changes.
    size: u64,
    config: MountConfig,
    uid: u32,
    gid: u32,
    mount_time: SystemTime,
    handles: Mutex<Handles<S::Decoder>>,
    next_handle: AtomicU64,
}

impl<S: ImageSource> VirtualFile<S> {
    /// Create the file for an image whose logical size is already known.
    pub fn new(source: S, size: u64, config: MountConfig) -> Self {
        // Get current user/group IDs
        let uid = unsafe { libc::getuid() };
        let gid = unsafe { libc::getgid() };

        Self {
            source,
            size,
            config,
            uid,
            gid,
            mount_time: SystemTime::now(),
            handles: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Logical size reported for the file.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    /// Backing location of the image.
    pub fn location(&self) -> &Path {
        self.source.location()
    }

    /// Number of handles currently open.
    pub fn open_handles(&self) -> usize {
        self.table().len()
    }

    /// Attributes of the file. Performs no I/O.
    pub fn attr(&self) -> FileStat {
        FileStat {
            size: self.size,
            perm: FILE_PERM,
            uid: self.uid,
            gid: self.gid,
            mtime: self.mount_time,
        }
    }

    /// Open the file and return a new handle.
    ///
    /// Write access is refused with [`Error::ReadOnly`] before anything is
    /// allocated. Otherwise a fresh byte source and decoder are opened for
    /// the handle.
    pub fn open(&self, flags: i32) -> Result<u64> {
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            warn!(
                "{}: refusing open with write access (flags={:#o})",
                self.location().display(),
                flags
            );
            return Err(Error::ReadOnly);
        }

        let context = HandleContext::open(&self.source).map_err(|e| {
            error!("{}", e);
            e
        })?;

        let fh = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.table().insert(fh, Arc::new(context));
        debug!("Opened handle {} on {}", fh, self.location().display());

        Ok(fh)
    }

    /// Read up to `buf.len()` bytes at logical `offset` through handle `fh`.
    ///
    /// Offsets at or past the end read 0 bytes. The count returned may be
    /// short if the decoder returns less; it is not retried.
    pub fn read(&self, fh: u64, offset: u64, buf: &mut [u8]) -> Result<usize> {
        trace!("read(fh={}, offset={}, size={})", fh, offset, buf.len());

        // Only the lookup holds the table lock, not the decoder I/O
        let context = self.table().get(&fh).cloned().ok_or_else(|| {
            warn!("read: handle {} is not open", fh);
            Error::BadHandle(fh)
        })?;

        if offset >= self.size {
            trace!("read: offset {} beyond file size {}", offset, self.size);
            return Ok(0);
        }

        let remaining = self.size - offset;
        let len = (buf.len() as u64).min(remaining) as usize;
        context.read_at(offset, &mut buf[..len])
    }

    /// Close handle `fh`, dropping its decoder and byte source.
    ///
    /// Returns whether the handle was open.
    pub fn release(&self, fh: u64) -> bool {
        let context = self.table().remove(&fh);
        match context {
            Some(context) => {
                debug!("Released handle {} on {}", fh, context.location().display());
                true
            }
            None => {
                warn!("release: handle {} is not open", fh);
                false
            }
        }
    }

    fn table(&self) -> MutexGuard<'_, Handles<S::Decoder>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
