//! Image resize and encode.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, ImageOutputFormat};
use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{MediaError, MediaResult};

/// How the source is fitted into the target box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeMode {
    /// Fill the box and crop the overflow (centered)
    Crop,
    /// Fit inside the box, preserving aspect ratio
    Fit,
    /// Stretch to the exact box
    Exact,
}

/// Encoded output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Jpeg,
    Png,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
        }
    }

    /// Infer from a path extension, `None` for anything else.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(OutputFormat::Jpeg),
            "png" => Some(OutputFormat::Png),
            _ => None,
        }
    }
}

/// An encoded image on disk with its measured dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedImage {
    pub width: u32,
    pub height: u32,
    pub path: PathBuf,
}

/// Decode `source` and resize it into `width` x `height`.
///
/// The format is sniffed from the content, not the file name.
pub fn resize(source: &Path, width: u32, height: u32, mode: ResizeMode) -> MediaResult<DynamicImage> {
    if width == 0 || height == 0 {
        return Err(MediaError::UnsupportedFormat(format!(
            "invalid target size {}x{}",
            width, height
        )));
    }
    if !source.exists() {
        return Err(MediaError::FileNotFound(source.to_path_buf()));
    }

    let image = image::io::Reader::open(source)?
        .with_guessed_format()?
        .decode()?;

    let resized = match mode {
        ResizeMode::Crop => image.resize_to_fill(width, height, FilterType::Lanczos3),
        ResizeMode::Fit => image.resize(width, height, FilterType::Lanczos3),
        ResizeMode::Exact => image.resize_exact(width, height, FilterType::Lanczos3),
    };
    Ok(resized)
}

/// Encode `image` to `target`.
///
/// Returns `Ok(None)` when `target` exists and `overwrite` is false. When
/// `force_format` is set the target extension is replaced to match it.
/// Dimensions are measured from the written file.
pub fn save(
    image: &DynamicImage,
    target: &Path,
    quality: u8,
    overwrite: bool,
    force_format: Option<OutputFormat>,
) -> MediaResult<Option<SavedImage>> {
    let format = force_format
        .or_else(|| OutputFormat::from_path(target))
        .unwrap_or(OutputFormat::Jpeg);

    let target = match force_format {
        Some(forced) => target.with_extension(forced.extension()),
        None => target.to_path_buf(),
    };

    if target.exists() && !overwrite {
        return Ok(None);
    }
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = BufWriter::new(std::fs::File::create(&target)?);
    match format {
        OutputFormat::Jpeg => {
            let rgb = image.to_rgb8();
            JpegEncoder::new_with_quality(&mut writer, quality.clamp(1, 100)).encode(
                rgb.as_raw(),
                rgb.width(),
                rgb.height(),
                ColorType::Rgb8,
            )?;
        }
        OutputFormat::Png => image.write_to(&mut writer, ImageOutputFormat::Png)?,
    }
    writer.flush()?;

    let (width, height) = image::image_dimensions(&target)?;
    Ok(Some(SavedImage {
        width,
        height,
        path: target,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_source(dir: &Path, width: u32, height: u32) -> PathBuf {
        let path = dir.join("source.png");
        RgbImage::from_pixel(width, height, Rgb([200, 40, 40]))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_crop_fills_exact_box() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = write_source(dir.path(), 1920, 1080);

        let resized = resize(&source, 300, 300, ResizeMode::Crop).unwrap();
        let saved = save(&resized, &dir.path().join("out.jpg"), 90, true, None)
            .unwrap()
            .unwrap();

        assert_eq!((saved.width, saved.height), (300, 300));
    }

    #[test]
    fn test_fit_keeps_aspect_ratio() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = write_source(dir.path(), 400, 200);

        let resized = resize(&source, 200, 200, ResizeMode::Fit).unwrap();
        assert_eq!((resized.width(), resized.height()), (200, 100));
    }

    #[test]
    fn test_save_respects_overwrite() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = write_source(dir.path(), 150, 150);
        let image = resize(&source, 100, 100, ResizeMode::Exact).unwrap();
        let target = dir.path().join("thumb.jpg");

        assert!(save(&image, &target, 90, false, None).unwrap().is_some());
        assert!(save(&image, &target, 90, false, None).unwrap().is_none());
        assert!(save(&image, &target, 90, true, None).unwrap().is_some());
    }

    #[test]
    fn test_forced_format_rewrites_extension() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = write_source(dir.path(), 150, 150);
        let image = resize(&source, 100, 100, ResizeMode::Crop).unwrap();

        let saved = save(&image, &dir.path().join("thumb.png"), 90, true, Some(OutputFormat::Jpeg))
            .unwrap()
            .unwrap();
        assert_eq!(saved.path.extension().unwrap(), "jpg");
    }

    #[test]
    fn test_sniffs_format_regardless_of_name() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = write_source(dir.path(), 120, 120);
        let misnamed = dir.path().join("download.bin");
        std::fs::rename(&source, &misnamed).unwrap();

        assert!(resize(&misnamed, 100, 100, ResizeMode::Crop).is_ok());
    }
}
