use log::warn;
use std::time::Duration;

/// Configuration for mounting the virtual file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountConfig {
    /// Filesystem name shown in the mount table (`fsname=`).
    pub fs_name: String,
    /// Filesystem subtype (`subtype=`).
    pub subtype: String,
    /// Let users other than the mounter access the file.
    pub allow_other: bool,
    /// Let root access the file.
    pub allow_root: bool,
    /// Unmount automatically when the process exits.
    pub auto_unmount: bool,
    /// Have the kernel enforce the file's permission bits.
    pub default_permissions: bool,
    /// Options not recognised here, passed through to FUSE verbatim.
    pub custom: Vec<String>,
    /// How long the kernel may cache attributes.
    pub attr_ttl: Duration,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            fs_name: "simg".to_string(),
            subtype: "sparse".to_string(),
            allow_other: false,
            allow_root: false,
            auto_unmount: false,
            default_permissions: true,
            custom: Vec::new(),
            attr_ttl: Duration::from_secs(1),
        }
    }
}

impl MountConfig {
    /// Apply a comma-separated `-o` option list.
    ///
    /// The mount is read-only whatever the options say: `ro` is accepted
    /// silently and `rw` is dropped with a warning.
    pub fn apply_options(&mut self, list: &str) {
        for option in list.split(',').map(str::trim).filter(|o| !o.is_empty()) {
            match option.split_once('=') {
                Some(("fsname", value)) => self.fs_name = value.to_string(),
                Some(("subtype", value)) => self.subtype = value.to_string(),
                Some(_) => self.custom.push(option.to_string()),
                None => match option {
                    "ro" => {}
                    "rw" => warn!("ignoring mount option 'rw': the image is always read-only"),
                    "allow_other" => self.allow_other = true,
                    "allow_root" => self.allow_root = true,
                    "auto_unmount" => self.auto_unmount = true,
                    "default_permissions" => self.default_permissions = true,
                    _ => self.custom.push(option.to_string()),
                },
            }
        }
    }
}
