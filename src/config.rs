use serde::{Deserialize, Serialize};

/// Tunables for the installation pipeline.
///
/// Passed explicitly to [`crate::installer::Installer::new`]; there is no
/// process-wide configuration singleton.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Retries for the manifest fetch, covering both transport errors
    /// and a checksum mismatch of the downloaded blob
    pub max_manifest_download_retries: u32,

    /// Retries for a single chunk HTTP GET inside a downloader worker
    pub max_chunk_download_retries: u32,

    /// Download worker pool size. The verifier pools are sized by this
    /// knob too, not by `concurrent_hashchecks`
    pub concurrent_downloads: usize,

    /// Decompressor worker pool size
    pub concurrent_decompressions: usize,

    /// Reserved; no pipeline stage reads it yet
    pub concurrent_hashchecks: usize,

    pub download_chan_size: usize,
    pub verify_chan_size: usize,
    pub decompress_chan_size: usize,

    /// Seconds between queue-depth debug lines, 0 disables the reporter
    pub queue_length_print_interval: u64
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_manifest_download_retries: 5,
            max_chunk_download_retries: 5,

            concurrent_downloads: 16,
            concurrent_decompressions: 16,
            concurrent_hashchecks: 16,

            download_chan_size: 32,
            verify_chan_size: 32,
            decompress_chan_size: 32,

            queue_length_print_interval: 10
        }
    }
}
