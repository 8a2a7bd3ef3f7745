use md5::{Digest, Md5};
use protobuf::Message;
use reqwest::blocking::Client;
use thiserror::Error;

use crate::api::schemas::sophon_builds::SophonDownloadInfo;

pub mod protos;

pub use protos::{SophonChunkInfo, SophonFileInfo, SophonManifest};

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("reqwest error: {0}")]
    Reqwest(String),

    #[error("Encrypted manifests are not supported")]
    Encrypted,

    #[error("Manifest checksum mismatch: expected `{expected}`, got `{got}`")]
    ChecksumMismatch { expected: String, got: String },

    #[error("Failed to decompress manifest: {0}")]
    Decompress(std::io::Error),

    #[error("Failed to decode manifest: {0}")]
    Decode(#[from] protobuf::Error)
}

impl From<reqwest::Error> for ManifestError {
    #[inline(always)]
    fn from(error: reqwest::Error) -> Self {
        Self::Reqwest(error.to_string())
    }
}

fn manifest_url(download_info: &SophonDownloadInfo) -> String {
    let url_prefix = &download_info.manifest_download.url_prefix;
    let url_suffix = &download_info.manifest_download.url_suffix;
    let manifest_id = &download_info.manifest.id;

    if url_suffix.is_empty() {
        format!("{url_prefix}/{manifest_id}")
    }
    else {
        format!("{url_prefix}/{manifest_id}/{url_suffix}")
    }
}

fn md5_hash_str(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}

fn fetch_manifest_once(
    client: &Client,
    url: &str,
    expected_checksum: &str,
    compressed: bool
) -> Result<SophonManifest, ManifestError> {
    let response = client.get(url).send()?.error_for_status()?;

    let blob = response.bytes()?;

    // The catalogue checksum covers the blob exactly as served
    if !expected_checksum.is_empty() {
        let got = md5_hash_str(&blob);

        if !got.eq_ignore_ascii_case(expected_checksum) {
            return Err(ManifestError::ChecksumMismatch {
                expected: expected_checksum.to_owned(),
                got
            });
        }
    }

    let raw = if compressed {
        zstd::decode_all(&*blob).map_err(ManifestError::Decompress)?
    }
    else {
        blob.to_vec()
    };

    Ok(SophonManifest::parse_from_bytes(&raw)?)
}

/// Fetch and decode the build manifest described by a sophon download listing.
///
/// The fetch-check-decode attempt is retried up to `max_retries` times; a
/// checksum mismatch counts as a failed attempt like any transport error.
pub fn get_download_manifest(
    client: &Client,
    download_info: &SophonDownloadInfo,
    max_retries: u32
) -> Result<SophonManifest, ManifestError> {
    if download_info.manifest_download.encryption != 0 {
        return Err(ManifestError::Encrypted);
    }

    let url = manifest_url(download_info);
    let compressed = download_info.manifest_download.compression != 0;
    let checksum = &download_info.manifest.checksum;

    let mut attempt = 1;

    loop {
        match fetch_manifest_once(client, &url, checksum, compressed) {
            Ok(manifest) => {
                tracing::info!(
                    files = manifest.total_files(),
                    chunks = manifest.total_chunks(),
                    "Manifest decoded successfully"
                );

                return Ok(manifest);
            }

            Err(err) if attempt < max_retries => {
                tracing::warn!(attempt, ?err, "Failed to fetch manifest, retrying");

                attempt += 1;
            }

            Err(err) => return Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use protobuf::Message;

    use super::*;
    use crate::api::schemas::sophon_builds::{DownloadInfo, ManifestInfo};

    fn download_info(manifest_suffix: &str) -> SophonDownloadInfo {
        SophonDownloadInfo {
            matching_field: "game".to_string(),
            manifest: ManifestInfo {
                id: "manifest_abc".to_string(),
                checksum: String::new()
            },
            chunk_download: DownloadInfo {
                encryption: 0,
                compression: 1,
                url_prefix: "https://cdn.example.com/chunks".to_string(),
                url_suffix: String::new()
            },
            manifest_download: DownloadInfo {
                encryption: 0,
                compression: 1,
                url_prefix: "https://cdn.example.com/manifests".to_string(),
                url_suffix: manifest_suffix.to_string()
            }
        }
    }

    #[test]
    fn manifest_url_shapes() {
        assert_eq!(
            manifest_url(&download_info("")),
            "https://cdn.example.com/manifests/manifest_abc"
        );

        assert_eq!(
            manifest_url(&download_info("f_1")),
            "https://cdn.example.com/manifests/manifest_abc/f_1"
        );
    }

    #[test]
    fn encrypted_manifest_is_refused() {
        let client = Client::new();

        let mut info = download_info("");
        info.manifest_download.encryption = 1;

        assert!(matches!(
            get_download_manifest(&client, &info, 1),
            Err(ManifestError::Encrypted)
        ));
    }

    #[test]
    fn proto_roundtrip() {
        let mut manifest = SophonManifest::new();

        let mut file = SophonFileInfo::new();
        file.filename = "data/file.bin".to_string();
        file.size = 16;
        file.md5 = "d41d8cd98f00b204e9800998ecf8427e".to_string();

        let mut chunk = SophonChunkInfo::new();
        chunk.chunk_id = "chunk_0".to_string();
        chunk.compressed_size = 8;
        chunk.uncompressed_size = 16;
        chunk.offset = 0;

        file.chunks.push(chunk);
        manifest.files.push(file);

        let bytes = manifest.write_to_bytes().unwrap();
        let decoded = SophonManifest::parse_from_bytes(&bytes).unwrap();

        assert_eq!(decoded.total_files(), 1);
        assert_eq!(decoded.total_chunks(), 1);
        assert_eq!(decoded.total_bytes_compressed(), 8);
        assert_eq!(decoded.total_bytes_decompressed(), 16);
        assert_eq!(decoded.files[0].chunks[0].chunk_id, "chunk_0");
    }
}
