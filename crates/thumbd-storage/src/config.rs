//! S3 credentials and bucket settings.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Regions an upload bucket may live in.
pub const AVAILABLE_REGIONS: &[&str] = &[
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "af-south-1",
    "ap-east-1",
    "ap-south-1",
    "ap-south-2",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-southeast-4",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-northeast-3",
    "ca-central-1",
    "eu-central-1",
    "eu-central-2",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "eu-south-1",
    "eu-south-2",
    "eu-north-1",
    "il-central-1",
    "me-south-1",
    "me-central-1",
    "sa-east-1",
];

/// Default key prefix for thumbnails.
pub const DEFAULT_KEY_PREFIX: &str = "content/thumbnails";

const SECRET_KEY_LEN: usize = 40;

fn access_key_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z0-9]{20}$").ok()).as_ref()
}

/// Configuration for the S3 uploader.
#[derive(Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    /// Custom S3-compatible endpoint (path-style addressing)
    pub endpoint_url: Option<String>,
    /// Base URL used for returned object references
    pub public_url: Option<String>,
    pub key_prefix: String,
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("bucket", &self.bucket)
            .field("endpoint_url", &self.endpoint_url)
            .field("public_url", &self.public_url)
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl S3Config {
    /// Check credentials and bucket settings before any network call.
    pub fn validate(&self) -> StorageResult<()> {
        if !AVAILABLE_REGIONS.contains(&self.region.as_str()) {
            return Err(StorageError::config_error(format!(
                "Region {:?} is not supported",
                self.region
            )));
        }

        let key_ok = access_key_regex().is_some_and(|re| re.is_match(&self.access_key_id));
        if !key_ok {
            return Err(StorageError::config_error(
                "Access key must be 20 uppercase letters or digits",
            ));
        }

        if self.secret_access_key.chars().count() != SECRET_KEY_LEN {
            return Err(StorageError::config_error(format!(
                "Secret key must be {} characters",
                SECRET_KEY_LEN
            )));
        }

        if self.bucket.trim().is_empty() {
            return Err(StorageError::config_error("Bucket name is empty"));
        }

        Ok(())
    }

    /// Object key for a row's thumbnail.
    pub fn thumbnail_key(&self, item_id: i64, basename: &str) -> String {
        let prefix = self.key_prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("{}/{}", item_id, basename)
        } else {
            format!("{}/{}/{}", prefix, item_id, basename)
        }
    }

    /// Public reference of an uploaded object.
    pub fn object_url(&self, key: &str) -> String {
        let key = key.trim_start_matches('/');
        if let Some(base) = self.public_url.as_deref().filter(|u| !u.trim().is_empty()) {
            return format!("{}/{}", base.trim_end_matches('/'), key);
        }
        if let Some(endpoint) = self.endpoint_url.as_deref().filter(|u| !u.trim().is_empty()) {
            return format!("{}/{}/{}", endpoint.trim_end_matches('/'), self.bucket, key);
        }
        format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            self.bucket, self.region, key
        )
    }
}
