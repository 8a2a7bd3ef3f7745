use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct SophonBuild {
    pub build_id: String,
    pub tag: String,
    pub manifests: Vec<SophonDownloadInfo>
}

impl SophonBuild {
    /// Pick the listing entry for one category: `game` covers the base
    /// install, voiceover packs match their locale code
    pub fn get_manifests_for(&self, matching_field: &str) -> Option<&SophonDownloadInfo> {
        self.manifests.iter()
            .find(|man| man.matching_field == matching_field)
    }
}

/// The slice of a build listing entry the installer consumes: which category
/// it belongs to, where its manifest lives and where its chunks live.
///
/// The backend sends more per entry (category labels, size statistics);
/// nothing here reads those, so they are not modeled.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct SophonDownloadInfo {
    pub matching_field: String,
    pub manifest: ManifestInfo,
    pub chunk_download: DownloadInfo,
    pub manifest_download: DownloadInfo
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestInfo {
    pub id: String,
    /// hex MD5 of the manifest blob exactly as served
    pub checksum: String
}

/// Download descriptor shared by the manifest blob and the chunk store.
///
/// The compression and encryption codes are opaque: any nonzero compression
/// means zstd, any nonzero encryption is refused.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadInfo {
    pub encryption: u8,
    pub compression: u8,
    pub url_prefix: String,
    pub url_suffix: String
}

impl DownloadInfo {
    /// URL a chunk with the given id is served from
    pub fn download_url(&self, chunk_id: &str) -> String {
        if self.url_suffix.is_empty() {
            format!("{}/{}", self.url_prefix, chunk_id)
        }
        else {
            format!("{}/{}/{}", self.url_prefix, chunk_id, self.url_suffix)
        }
    }
}
