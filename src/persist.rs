use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use image::ImageFormat;

use crate::error::Result;
use crate::models::ImageArtifact;

/// Local time down to microseconds, e.g. `2024_02_14_09_30_05_123456`.
pub const FILENAME_TIMESTAMP_FORMAT: &str = "%Y_%m_%d_%H_%M_%S_%6f";

/// Writes finished images as timestamped PNG files.
///
/// Names are unique only down to the microsecond; two images written within
/// the same microsecond would land on the same path.
pub struct OutputPersister {
    output_dir: PathBuf,
}

impl OutputPersister {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn persist(&self, images: &[ImageArtifact]) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.output_dir)?;

        let mut written = Vec::with_capacity(images.len());
        for image in images {
            let timestamp = Local::now().format(FILENAME_TIMESTAMP_FORMAT);
            let path = self.output_dir.join(format!("{}.png", timestamp));
            image.pixels.save_with_format(&path, ImageFormat::Png)?;
            log::info!("💾 Image saved to: {}", path.display());
            written.push(path);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn artifact(seed: u32) -> ImageArtifact {
        ImageArtifact::new(RgbImage::from_pixel(16, 16, image::Rgb([seed as u8, 0, 0])), seed)
    }

    fn png_count(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .path()
                    .extension()
                    .map_or(false, |ext| ext == "png")
            })
            .count()
    }

    #[test]
    fn test_creates_directory_lazily() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("outputs");
        let persister = OutputPersister::new(&dir);
        assert!(!dir.exists());

        let paths = persister.persist(&[artifact(1)]).unwrap();
        assert!(dir.is_dir());
        assert_eq!(paths.len(), 1);
        assert!(paths[0].starts_with(&dir));
    }

    #[test]
    fn test_persist_twice_keeps_earlier_files() {
        let root = tempfile::tempdir().unwrap();
        let persister = OutputPersister::new(root.path().join("outputs"));

        let first = persister.persist(&[artifact(1)]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = persister.persist(&[artifact(2)]).unwrap();

        assert_ne!(first[0], second[0]);
        assert!(first[0].exists());
        assert!(second[0].exists());
        assert_eq!(png_count(persister.output_dir()), 2);
    }

    #[test]
    fn test_filename_layout() {
        let root = tempfile::tempdir().unwrap();
        let persister = OutputPersister::new(root.path());
        let paths = persister.persist(&[artifact(3)]).unwrap();

        let stem = paths[0].file_stem().unwrap().to_str().unwrap();
        let parts: Vec<&str> = stem.split('_').collect();
        assert_eq!(parts.len(), 7);
        assert_eq!(parts[0].len(), 4);
        assert_eq!(parts[6].len(), 6);
        assert!(parts.iter().all(|p| p.chars().all(|c| c.is_ascii_digit())));

        let reloaded = image::open(&paths[0]).unwrap().to_rgb8();
        assert_eq!(reloaded.get_pixel(0, 0), &image::Rgb([3, 0, 0]));
    }

    #[test]
    fn test_unwritable_directory_fails() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("not-a-dir");
        fs::write(&blocker, b"file").unwrap();
        let persister = OutputPersister::new(blocker.join("outputs"));
        assert!(persister.persist(&[artifact(1)]).is_err());
    }
}
