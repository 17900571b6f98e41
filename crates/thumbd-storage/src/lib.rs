//! Object storage for generated thumbnails.
//!
//! This crate provides:
//! - S3 credential and bucket validation
//! - An uploader with bounded retry and a sticky unauthenticated state
//! - Object key and public reference construction

pub mod client;
pub mod config;
pub mod error;

pub use client::{
    content_type_for, is_auth_failure, ObjectUploader, S3Uploader, UploadedObject,
    MAX_UPLOAD_ATTEMPTS,
};
pub use config::{S3Config, AVAILABLE_REGIONS, DEFAULT_KEY_PREFIX};
pub use error::{StorageError, StorageResult};
