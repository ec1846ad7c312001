//! simg-mount: Mount the decoded contents of a sparse image as a file.
//!
//! The target must be an existing regular file; after mounting it reads as
//! the fully expanded image, decoded on demand.
//!
//! # Usage
//!
//! ```bash
//! touch system.img
//! simg-mount system.simg system.img -o allow_other
//!
//! # In another shell
//! dd if=system.img of=/dev/sdX bs=4M
//! fusermount -u system.img
//! ```

use anyhow::{anyhow, bail};
use clap::Parser;
use env_logger::Env;
use log::{error, info};
use sparse_fs::fuse;
use sparse_fs::{probe_size, MountConfig, MountTarget, SparseImage, VirtualFile};
use std::path::PathBuf;
use std::process;

/// Mount a sparse image as a read-only file.
///
/// The mount point shows the decoded image; nothing is expanded on disk.
#[derive(Parser, Debug)]
#[command(name = "simg-mount")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the sparse image
    #[arg(value_name = "SPARSE_FILE")]
    source: PathBuf,

    /// Existing regular file to mount over
    #[arg(value_name = "TARGET_FILE")]
    target: PathBuf,

    /// Comma-separated list of mount options
    #[arg(short = 'o', value_name = "OPT[,OPT...]")]
    options: Vec<String>,

    /// Reopen the source by path instead of pinning the file opened at startup
    #[arg(long)]
    follow_path: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn run(args: Args) -> anyhow::Result<()> {
    if !args.target.is_file() {
        bail!(
            "{}: mount point must be an existing regular file",
            args.target.display()
        );
    }

    let target = if args.follow_path {
        MountTarget::path(&args.source)
    } else {
        MountTarget::pinned(&args.source)
            .map_err(|e| anyhow!("{}: failed to open: {}", args.source.display(), e))?
    };
    let image = SparseImage::new(target);

    let size = probe_size(&image)?;

    let mut config = MountConfig::default();
    for list in &args.options {
        config.apply_options(list);
    }

    info!(
        "Mounting {} at {}",
        args.source.display(),
        args.target.display()
    );
    fuse::mount(VirtualFile::new(image, size, config), &args.target)?;
    info!("Unmounted {}", args.target.display());

    Ok(())
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    if let Err(e) = run(args) {
        error!("{}", e);
        process::exit(1);
    }
}
