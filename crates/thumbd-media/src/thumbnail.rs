//! Thumbnail generation.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{MediaError, MediaResult};
use crate::fs_utils::{ensure_safe_path, remove_file_quietly};
use crate::resize::{self, OutputFormat, ResizeMode, SavedImage};

/// Smallest accepted thumbnail edge in pixels.
pub const MIN_DIMENSION: u32 = 100;

/// Default JPEG quality.
pub const DEFAULT_QUALITY: u8 = 90;

/// Produces fixed-size JPEG thumbnails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailGenerator {
    width: u32,
    height: u32,
    quality: u8,
}

impl ThumbnailGenerator {
    /// Edges below [`MIN_DIMENSION`] are raised to it.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(MIN_DIMENSION),
            height: height.max(MIN_DIMENSION),
            quality: DEFAULT_QUALITY,
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Output path for a new thumbnail inside `out_dir`.
    pub fn output_path(&self, out_dir: &Path) -> PathBuf {
        out_dir.join(format!(
            "{}x{}-{}.{}",
            self.width,
            self.height,
            Uuid::new_v4().simple(),
            OutputFormat::Jpeg.extension()
        ))
    }

    /// Crop `source` into the target box and write it under `out_dir`.
    ///
    /// The written file is measured; on any dimension mismatch it is deleted
    /// and [`MediaError::DimensionMismatch`] is returned.
    pub async fn generate(&self, source: &Path, out_dir: &Path) -> MediaResult<SavedImage> {
        ensure_safe_path(source)?;
        tokio::fs::create_dir_all(out_dir).await?;

        let target = self.output_path(out_dir);
        let source = source.to_path_buf();
        let generator = self.clone();
        let blocking_target = target.clone();

        let saved = tokio::task::spawn_blocking(move || -> MediaResult<Option<SavedImage>> {
            let image = resize::resize(&source, generator.width, generator.height, ResizeMode::Crop)?;
            resize::save(
                &image,
                &blocking_target,
                generator.quality,
                true,
                Some(OutputFormat::Jpeg),
            )
        })
        .await
        .map_err(|e| MediaError::Io(std::io::Error::other(e)))?;

        let saved = match saved {
            Ok(Some(saved)) => saved,
            Ok(None) => {
                return Err(MediaError::UnsupportedFormat(format!(
                    "thumbnail {} was not written",
                    target.display()
                )))
            }
            Err(e) => {
                remove_file_quietly(&target).await;
                return Err(e);
            }
        };

        self.verify(saved).await
    }

    async fn verify(&self, saved: SavedImage) -> MediaResult<SavedImage> {
        if saved.width == self.width && saved.height == self.height {
            debug!(
                "Thumbnail {} is {}x{}",
                saved.path.display(),
                saved.width,
                saved.height
            );
            return Ok(saved);
        }

        warn!(
            "Thumbnail {} is {}x{}, expected {}x{}",
            saved.path.display(),
            saved.width,
            saved.height,
            self.width,
            self.height
        );
        remove_file_quietly(&saved.path).await;
        Err(MediaError::DimensionMismatch {
            expected_width: self.width,
            expected_height: self.height,
            actual_width: saved.width,
            actual_height: saved.height,
        })
    }
}
