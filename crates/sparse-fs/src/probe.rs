use crate::error::Result;
use crate::source::{ImageDecoder, ImageSource};
use log::info;

/// Learn the logical size of the image before mounting.
///
/// Opens a throwaway decoder, asks it for its size and closes it again. The
/// attribute callback answers from this value and never performs I/O, so a
/// failure here must abort startup. The caller reports the error.
pub fn probe_size<S: ImageSource>(source: &S) -> Result<u64> {
    let decoder = source.open()?;
    let size = decoder.size();

    info!(
        "{}: sparse image expands to {} bytes",
        source.location().display(),
        size
    );

    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, MountTarget, SparseImage};
    use sparse_format::SparseBuilder;
    use tempfile::TempDir;

    #[test]
    fn probe_reports_logical_size() {
        let temp = TempDir::new().unwrap();
        let path = SparseBuilder::new(4096)
            .unwrap()
            .with_raw(vec![1u8; 4096])
            .with_dont_care(1023)
            .write_to(temp.path().join("big.simg"))
            .unwrap();

        let image = SparseImage::new(MountTarget::path(&path));
        assert_eq!(probe_size(&image).unwrap(), 4 * 1024 * 1024);
    }

    #[test]
    fn probe_fails_for_missing_source() {
        let temp = TempDir::new().unwrap();
        let image = SparseImage::new(MountTarget::path(temp.path().join("missing.simg")));

        let err = probe_size(&image).unwrap_err();
        assert!(matches!(err, Error::SourceOpen { .. }));
        assert_eq!(err.errno(), libc::ENOENT);
    }

    #[test]
    fn probe_fails_for_non_sparse_source() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("raw.img");
        std::fs::write(&path, vec![0u8; 8192]).unwrap();

        let err = probe_size(&SparseImage::new(MountTarget::path(&path))).unwrap_err();
        assert!(matches!(err, Error::DecoderOpen { .. }));
        assert_eq!(err.errno(), libc::EIO);
    }
}
