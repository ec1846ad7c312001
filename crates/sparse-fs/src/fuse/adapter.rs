//! FUSE adapter implementation for the virtual file.
//!
//! This module implements the `fuser::Filesystem` trait for `SparseFuseFS`.
//! The filesystem root is the file itself, so the mount point must be a
//! regular file.

use crate::config::MountConfig;
use crate::error::{Error, Result};
use crate::file::{FileStat, VirtualFile};
use crate::source::ImageSource;
use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, Request, FUSE_ROOT_ID,
};
use libc::{EINVAL, ENOENT, ENOTDIR};
use log::{debug, trace, warn};
use std::ffi::OsStr;
use std::path::Path;

/// Block size for filesystem statistics.
const BLOCK_SIZE: u32 = 512;

/// FUSE filesystem exposing one decoded sparse image.
pub struct SparseFuseFS<S: ImageSource> {
    file: VirtualFile<S>,
}

impl<S: ImageSource> SparseFuseFS<S> {
    pub fn new(file: VirtualFile<S>) -> Self {
        Self { file }
    }

    /// The wrapped virtual file.
    pub fn file(&self) -> &VirtualFile<S> {
        &self.file
    }

    fn root_attr(&self) -> FileAttr {
        file_attr(&self.file.attr())
    }
}

/// Build FUSE attributes for the exported file.
fn file_attr(stat: &FileStat) -> FileAttr {
    FileAttr {
        ino: FUSE_ROOT_ID,
        size: stat.size,
        blocks: stat.size.div_ceil(u64::from(BLOCK_SIZE)),
        atime: stat.mtime,
        mtime: stat.mtime,
        ctime: stat.mtime,
        crtime: stat.mtime,
        kind: FileType::RegularFile,
        perm: stat.perm,
        nlink: 1,
        uid: stat.uid,
        gid: stat.gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

impl<S: ImageSource> Filesystem for SparseFuseFS<S> {
    /// Get file attributes.
    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        trace!("getattr(ino={})", ino);

        if ino != FUSE_ROOT_ID {
            warn!("getattr: inode {} not found", ino);
            reply.error(ENOENT);
            return;
        }

        reply.attr(&self.file.config().attr_ttl, &self.root_attr());
    }

    /// There is no directory to look names up in.
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        trace!("lookup(parent={}, name='{}')", parent, name.to_string_lossy());
        reply.error(ENOENT);
    }

    fn opendir(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        trace!("opendir(ino={})", ino);
        reply.error(ENOTDIR);
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        reply: ReplyDirectory,
    ) {
        trace!("readdir(ino={}, offset={})", ino, offset);
        reply.error(ENOTDIR);
    }

    /// Open the file, creating a decoder for the new handle.
    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!("open(ino={}, flags={:#o})", ino, flags);

        if ino != FUSE_ROOT_ID {
            reply.error(ENOENT);
            return;
        }

        match self.file.open(flags) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    /// Read decoded data at a logical offset.
    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace!("read(ino={}, fh={}, offset={}, size={})", ino, fh, offset, size);

        let Ok(offset) = u64::try_from(offset) else {
            warn!("read: negative offset {}", offset);
            reply.error(EINVAL);
            return;
        };

        // Clamp the buffer to the remaining bytes
        let remaining = self.file.size().saturating_sub(offset);
        let mut buffer = vec![0u8; u64::from(size).min(remaining) as usize];

        match self.file.read(fh, offset, &mut buffer) {
            Ok(n) => reply.data(&buffer[..n]),
            Err(e) => reply.error(e.errno()),
        }
    }

    /// Drop the handle's decoder and byte source.
    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        trace!("release(fh={})", fh);
        self.file.release(fh);
        reply.ok();
    }

    /// Get filesystem statistics.
    fn statfs(&mut self, _req: &Request, _ino: u64, reply: fuser::ReplyStatfs) {
        trace!("statfs");

        let blocks = self.file.size().div_ceil(u64::from(BLOCK_SIZE));
        reply.statfs(blocks, 0, 0, 1, 0, BLOCK_SIZE, 255, BLOCK_SIZE);
    }
}

/// Translate the mount configuration into FUSE mount options.
pub fn mount_options(config: &MountConfig) -> Vec<MountOption> {
    let mut options = vec![
        MountOption::RO,
        MountOption::FSName(config.fs_name.clone()),
        MountOption::Subtype(config.subtype.clone()),
    ];

    if config.default_permissions {
        options.push(MountOption::DefaultPermissions);
    }
    if config.allow_other {
        options.push(MountOption::AllowOther);
    }
    if config.allow_root {
        options.push(MountOption::AllowRoot);
    }
    if config.auto_unmount {
        options.push(MountOption::AutoUnmount);
    }
    options.extend(config.custom.iter().cloned().map(MountOption::CUSTOM));

    options
}

/// Mount the virtual file at `mount_point`.
///
/// This function blocks until the filesystem is unmounted. The mount point
/// must be an existing regular file.
///
/// # Errors
///
/// Returns [`Error::Mount`] if FUSE mounting fails.
pub fn mount<S: ImageSource, P: AsRef<Path>>(file: VirtualFile<S>, mount_point: P) -> Result<()> {
    let mount_point = mount_point.as_ref();
    let options = mount_options(file.config());

    debug!(
        "Mounting {} at {} ({} bytes)",
        file.location().display(),
        mount_point.display(),
        file.size()
    );

    fuser::mount2(SparseFuseFS::new(file), mount_point, &options).map_err(Error::Mount)
}

/// Mount the virtual file in the background and return a session handle.
///
/// The filesystem stays mounted until the returned `BackgroundSession` is
/// dropped or `join()`ed after an external unmount.
pub fn mount_background<S: ImageSource, P: AsRef<Path>>(
    file: VirtualFile<S>,
    mount_point: P,
) -> Result<fuser::BackgroundSession> {
    let mount_point = mount_point.as_ref();
    let options = mount_options(file.config());

    debug!(
        "Mounting {} at {} (background, {} bytes)",
        file.location().display(),
        mount_point.display(),
        file.size()
    );

    fuser::spawn_mount2(SparseFuseFS::new(file), mount_point, &options).map_err(Error::Mount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    #[test]
    fn attr_is_read_only_regular_file() {
        let stat = FileStat {
            size: 1025,
            perm: 0o444,
            uid: 1000,
            gid: 1000,
            mtime: SystemTime::UNIX_EPOCH,
        };
        let attr = file_attr(&stat);

        assert_eq!(attr.ino, FUSE_ROOT_ID);
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.perm, 0o444);
        assert_eq!(attr.size, 1025);
        assert_eq!(attr.blocks, 3);
    }

    #[test]
    fn options_always_include_ro() {
        let mut config = MountConfig::default();
        config.apply_options("allow_other,max_read=4096");
        let options = mount_options(&config);

        assert_eq!(options[0], MountOption::RO);
        assert!(options.contains(&MountOption::AllowOther));
        assert!(options.contains(&MountOption::DefaultPermissions));
        assert!(options.contains(&MountOption::CUSTOM("max_read=4096".to_string())));
        assert!(!options.contains(&MountOption::AutoUnmount));
    }
}
