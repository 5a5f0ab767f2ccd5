use serde::Deserialize;

/// Worker pool and transcoder settings.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent transcoding workers. Default: 3.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Jobs the queue holds before dropping new ones. Default: 100.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Transcoder executable. Default: "ffmpeg".
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: String,
    /// Wall-clock limit for one transcoder run. Default: 1800.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    /// Extra attempts for transient failures. Default: 2.
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
    /// First backoff delay. Default: 1000.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff ceiling. Default: 30000.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_workers() -> usize {
    3
}
fn default_queue_capacity() -> usize {
    100
}
fn default_ffmpeg_bin() -> String {
    "ffmpeg".into()
}
fn default_job_timeout_secs() -> u64 {
    1800
}
fn default_max_retries() -> u8 {
    2
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    30000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            ffmpeg_bin: default_ffmpeg_bin(),
            job_timeout_secs: default_job_timeout_secs(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}
