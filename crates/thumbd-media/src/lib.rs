//! Media handling for thumbnail generation.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building and ffprobe queries
//! - Representative frame extraction from video sources
//! - Pull-based streaming HTTP downloads with progress
//! - Image resize/encode and fixed-size thumbnail generation

pub mod command;
pub mod download;
pub mod error;
pub mod frame;
pub mod fs_utils;
pub mod probe;
pub mod progress;
pub mod resize;
pub mod thumbnail;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegRunner, FrameCommand};
pub use download::{build_http_client, HttpDownload, MAX_IMAGE_BYTES, MAX_VIDEO_BYTES};
pub use error::{MediaError, MediaResult};
pub use frame::{FfmpegFrameExtractor, FrameSource};
pub use progress::{DownloadProgress, ProgressThrottle};
pub use resize::{OutputFormat, ResizeMode, SavedImage};
pub use thumbnail::ThumbnailGenerator;
