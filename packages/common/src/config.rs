use std::path::PathBuf;

use serde::Deserialize;

use crate::media::MediaClass;

/// Blob storage and upload admission settings.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Storage root. Default: "./uploads".
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Largest non-video upload in bytes. Default: 10 MiB.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
    /// Largest video upload in bytes. Default: 200 MiB.
    #[serde(default = "default_max_video_upload_size")]
    pub max_video_upload_size: u64,
    /// Accepted MIME types.
    #[serde(default = "default_allowed_types")]
    pub allowed_types: Vec<String>,
    /// Check leading bytes against the declared MIME type. Default: true.
    #[serde(default = "default_verify_content_type")]
    pub verify_content_type: bool,
}

fn default_root() -> PathBuf {
    PathBuf::from("./uploads")
}
fn default_max_upload_size() -> u64 {
    10 << 20
}
fn default_max_video_upload_size() -> u64 {
    200 << 20
}
fn default_allowed_types() -> Vec<String> {
    [
        "image/jpeg",
        "image/png",
        "image/gif",
        "video/mp4",
        "video/mpeg",
        "video/webm",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_verify_content_type() -> bool {
    true
}

impl StorageConfig {
    /// Size limit for a media class.
    pub fn limit_for(&self, class: MediaClass) -> u64 {
        match class {
            MediaClass::Video => self.max_video_upload_size,
            MediaClass::Other => self.max_upload_size,
        }
    }

    /// The largest request any class may send.
    pub fn max_request_size(&self) -> u64 {
        self.max_upload_size.max(self.max_video_upload_size)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            max_upload_size: default_max_upload_size(),
            max_video_upload_size: default_max_video_upload_size(),
            allowed_types: default_allowed_types(),
            verify_content_type: default_verify_content_type(),
        }
    }
}
