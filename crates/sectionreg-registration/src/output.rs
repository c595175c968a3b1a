//! Writing registered images and transform files.

use std::fs;
use std::path::{Path, PathBuf};

use burn::tensor::backend::Backend;
use sectionreg_core::image::Image;

use crate::error::{RegistrationError, Result};
use crate::transform::{parameters_path, RegistrationTransform};

/// Largest square side whose pixel count still fits a signed 32-bit array
/// index. Viewers built on Java arrays cannot open TIFFs past this.
pub const MAX_TAGGED_DIMENSION: usize = 46_340;

/// On-disk container for an output image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Tagged image file (`.tif`).
    Tiff,
    /// MetaImage with zlib-compressed data (`.mha`).
    MetaImage,
}

impl Encoding {
    pub fn extension(&self) -> &'static str {
        match self {
            Encoding::Tiff => "tif",
            Encoding::MetaImage => "mha",
        }
    }
}

/// Pick the container for an image of pixel extent `[width, height]`.
pub fn select_encoding(extent: [usize; 2]) -> Encoding {
    if extent.iter().all(|&side| side <= MAX_TAGGED_DIMENSION) {
        Encoding::Tiff
    } else {
        Encoding::MetaImage
    }
}

/// Create `dir` and its parents.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| RegistrationError::io_write(dir, e))
}

/// Encode into a temporary sibling of `path` and move it into place once
/// `encode` has succeeded. On failure nothing is left at `path` and the
/// temporary file is removed.
fn write_staged<F>(path: &Path, dir: &Path, encode: F) -> Result<()>
where
    F: FnOnce(&Path) -> anyhow::Result<()>,
{
    let staged = tempfile::Builder::new()
        .prefix(".staging-")
        .tempfile_in(dir)
        .map_err(|e| RegistrationError::io_write(dir, e))?;

    encode(staged.path()).map_err(|e| RegistrationError::io_write(path, e))?;
    staged.as_file().sync_all().map_err(|e| RegistrationError::io_write(path, e))?;
    staged
        .persist(path)
        .map_err(|e| RegistrationError::io_write(path, e.error))?;
    Ok(())
}

/// Writes images and transforms under caller-chosen directories.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputWriter;

impl OutputWriter {
    pub fn new() -> Self {
        Self
    }

    /// Write `image` as `<dir>/<stem>.tif` or `<dir>/<stem>.mha`, depending
    /// on its extent, and return the path written.
    pub fn write<B: Backend>(&self, image: &Image<B>, dir: &Path, stem: &str) -> Result<PathBuf> {
        ensure_dir(dir)?;
        let encoding = select_encoding(image.extent());
        let path = dir.join(format!("{}.{}", stem, encoding.extension()));

        write_staged(&path, dir, |staged| match encoding {
            Encoding::Tiff => sectionreg_io::write_tiff(image, staged),
            Encoding::MetaImage => sectionreg_io::write_mha(image, staged),
        })?;

        tracing::info!(path = %path.display(), ?encoding, extent = ?image.extent(), "wrote image");
        Ok(path)
    }

    /// Write `<dir>/<stem>.txt` with the transform parameters and
    /// `<dir>/<stem>_parameters.txt` with the map it was fitted with.
    pub fn write_transform(&self, transform: &RegistrationTransform, dir: &Path, stem: &str) -> Result<PathBuf> {
        ensure_dir(dir)?;
        let path = dir.join(format!("{}.txt", stem));
        fs::write(&path, transform.to_parameter_map().to_text())
            .map_err(|e| RegistrationError::io_write(&path, e))?;

        let companion = parameters_path(&path);
        fs::write(&companion, transform.parameter_map().to_text())
            .map_err(|e| RegistrationError::io_write(&companion, e))?;

        tracing::info!(path = %path.display(), transform = transform.model().elastix_name(), "wrote transform");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParameterStore;
    use crate::transform::TransformModel;
    use burn_ndarray::NdArray;
    use sectionreg_core::image::{ImageDomain, ImageMetadata};
    use sectionreg_core::spatial::{Point, Spacing};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_encoding_boundary() {
        assert_eq!(select_encoding([MAX_TAGGED_DIMENSION, MAX_TAGGED_DIMENSION]), Encoding::Tiff);
        assert_eq!(select_encoding([MAX_TAGGED_DIMENSION + 1, 10]), Encoding::MetaImage);
        assert_eq!(select_encoding([10, MAX_TAGGED_DIMENSION + 1]), Encoding::MetaImage);
    }

    #[test]
    fn test_write_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let image = Image::<TestBackend>::from_planar(
            vec![0.0, 0.25, 0.5, 1.0],
            [1, 2, 2],
            ImageMetadata::in_memory(),
            &Default::default(),
        )
        .unwrap();
        let nested = dir.path().join("a").join("b");
        let path = OutputWriter::new().write(&image, &nested, "out").unwrap();
        assert_eq!(path, nested.join("out.tif"));
        assert!(path.is_file());
    }

    #[test]
    fn test_transform_files_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let params = ParameterStore::preset_for(TransformModel::Euler);
        let transform = RegistrationTransform::linear(
            TransformModel::Euler,
            vec![0.1, 3.0, -2.0],
            Point::new([5.0, 5.0]),
            ImageDomain::new([11, 11], Spacing::uniform(1.0), Point::origin()),
            Spacing::uniform(1.0),
            params,
        )
        .unwrap();

        let path = OutputWriter::new().write_transform(&transform, dir.path(), "run_init").unwrap();
        assert!(dir.path().join("run_init_parameters.txt").is_file());
        assert_eq!(RegistrationTransform::load(&path).unwrap(), transform);
    }

    #[test]
    fn test_failed_encode_leaves_no_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_src_tgt_nl.tif");
        let err = write_staged(&path, dir.path(), |staged| {
            fs::write(staged, [0u8; 4096])?;
            anyhow::bail!("file size limit exceeded")
        })
        .unwrap_err();

        assert!(matches!(err, RegistrationError::IoWriteError { .. }));
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_failed_encode_keeps_previous_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tif");
        fs::write(&path, b"previous").unwrap();
        let result = write_staged(&path, dir.path(), |staged| {
            fs::write(staged, b"partial")?;
            anyhow::bail!("encoder failed")
        });

        assert!(result.is_err());
        assert_eq!(fs::read(&path).unwrap(), b"previous");
    }

    #[test]
    fn test_staged_write_moves_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tif");
        write_staged(&path, dir.path(), |staged| Ok(fs::write(staged, b"done")?)).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"done");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_unwritable_directory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"").unwrap();
        let image = Image::<TestBackend>::from_planar(vec![0.0], [1, 1, 1], ImageMetadata::in_memory(), &Default::default())
            .unwrap();
        let err = OutputWriter::new().write(&image, &blocker.join("sub"), "out").unwrap_err();
        assert!(matches!(err, RegistrationError::IoWriteError { .. }));
    }
}
