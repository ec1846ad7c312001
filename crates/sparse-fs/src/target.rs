use log::debug;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// Backing location of the mounted image, resolved once at startup.
///
/// Every open of the virtual file opens the target again, so each handle
/// gets a byte source of its own.
#[derive(Debug)]
pub struct MountTarget {
    /// Path shown in diagnostics.
    display_path: PathBuf,
    /// Path handed to `open(2)`.
    open_path: PathBuf,
    /// Keeps the descriptor behind `open_path` alive when pinned.
    pin: Option<File>,
}

impl MountTarget {
    /// Resolve the image by path on every open.
    ///
    /// If the file is removed or replaced while mounted, later opens see the
    /// change.
    pub fn path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            display_path: path.clone(),
            open_path: path,
            pin: None,
        }
    }

    /// Open the image now and keep reopening that same file.
    ///
    /// On Linux later opens go through `/proc/self/fd/<n>`, so they reach
    /// the inode opened here even if the path is unlinked or replaced.
    /// Elsewhere this behaves like [`MountTarget::path`] after checking that
    /// the file can be opened.
    pub fn pinned<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;

        #[cfg(target_os = "linux")]
        let open_path = {
            use std::os::unix::io::AsRawFd;
            PathBuf::from(format!("/proc/self/fd/{}", file.as_raw_fd()))
        };
        #[cfg(not(target_os = "linux"))]
        let open_path = path.to_path_buf();

        debug!("Pinned {} as {}", path.display(), open_path.display());

        Ok(Self {
            display_path: path.to_path_buf(),
            open_path,
            pin: Some(file),
        })
    }

    /// Path of the image as given by the user.
    pub fn location(&self) -> &Path {
        &self.display_path
    }

    /// Whether the target holds the image open.
    pub fn is_pinned(&self) -> bool {
        self.pin.is_some()
    }

    /// Open a fresh, read-only byte source for the image.
    pub fn open_read_only(&self) -> io::Result<File> {
        File::open(&self.open_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn path_target_sees_removal() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("image.simg");
        std::fs::write(&path, b"abc").unwrap();

        let target = MountTarget::path(&path);
        assert!(!target.is_pinned());
        assert!(target.open_read_only().is_ok());

        std::fs::remove_file(&path).unwrap();
        let err = target.open_read_only().unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn pinned_target_fails_for_missing_file() {
        let temp = TempDir::new().unwrap();
        assert!(MountTarget::pinned(temp.path().join("missing.simg")).is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn pinned_target_survives_unlink() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("image.simg");
        std::fs::write(&path, b"pinned").unwrap();

        let target = MountTarget::pinned(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        let mut contents = String::new();
        target
            .open_read_only()
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "pinned");
        assert_eq!(target.location(), path.as_path());
    }
}
