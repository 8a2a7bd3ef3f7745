use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use thiserror::Error;

use schemas::game_branches::{GameBranches, PackageInfo};
use schemas::game_configs::GameConfigs;
use schemas::sophon_builds::SophonBuild;
use schemas::ApiResponse;

pub mod schemas;

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum Region {
    Global,
    China
}

impl Region {
    #[inline]
    pub fn branches_host(&self) -> &str {
        match self {
            Self::Global => {
                concat!("https://", "s", "g-hy", "p-api.", "h", "oy", "over", "se", ".com")
            }
            Self::China => concat!("https://", "hy", "p-api.", "mi", "h", "oyo", ".com")
        }
    }

    #[inline]
    pub fn api_host(&self) -> &str {
        match self {
            Self::Global => concat!(
                "https://",
                "s",
                "g-pu",
                "blic-api.",
                "h",
                "oy",
                "over",
                "se",
                ".com"
            ),
            Self::China => concat!("https://", "api-t", "ak", "umi.", "mi", "h", "oyo", ".com")
        }
    }

    #[inline]
    pub fn launcher_id(&self) -> &str {
        match self {
            Self::Global => "VYTpXlbWo8",
            Self::China => "jGHBHlcOq1"
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("reqwest error: {0}")]
    Reqwest(String),

    #[error("API returned retcode {retcode}: {message}")]
    Retcode { retcode: i16, message: String }
}

impl From<reqwest::Error> for ApiError {
    #[inline(always)]
    fn from(error: reqwest::Error) -> Self {
        Self::Reqwest(error.to_string())
    }
}

fn api_get_request<T: DeserializeOwned>(
    client: &Client,
    url: impl AsRef<str>
) -> Result<T, ApiError> {
    let response = client.get(url.as_ref()).send()?.error_for_status()?;

    let response = response.json::<ApiResponse<T>>()?;

    match response.data {
        Some(data) if response.retcode == 0 => Ok(data),

        _ => Err(ApiError::Retcode {
            retcode: response.retcode,
            message: response.message
        })
    }
}

#[inline(always)]
fn get_game_branches_url(region: Region) -> String {
    format!(
        "{}/hyp/hyp-connect/api/getGameBranches?launcher_id={}",
        region.branches_host(),
        region.launcher_id()
    )
}

#[inline(always)]
fn get_game_configs_url(region: Region) -> String {
    format!(
        "{}/hyp/hyp-connect/api/getGameConfigs?launcher_id={}",
        region.branches_host(),
        region.launcher_id()
    )
}

/// List the game branches known to the launcher backend
#[inline]
pub fn get_game_branches(client: &Client, region: Region) -> Result<GameBranches, ApiError> {
    api_get_request(client, get_game_branches_url(region))
}

/// List the per-game launch configurations
#[inline]
pub fn get_game_configs(client: &Client, region: Region) -> Result<GameConfigs, ApiError> {
    api_get_request(client, get_game_configs_url(region))
}

/// Compose the sophon getBuild URL for a branch
pub fn build_sophon_get_build_url(region: Region, branch: &PackageInfo) -> String {
    format!(
        "{}/downloader/sophon_chunk/api/getBuild?package_id={}&branch={}&password={}",
        region.api_host(),
        branch.package_id,
        branch.branch,
        branch.password
    )
}

/// Fetch the build index with its list of per-category manifests
#[inline]
pub fn get_sophon_build(client: &Client, url: impl AsRef<str>) -> Result<SophonBuild, ApiError> {
    api_get_request(client, url)
}

#[inline]
pub fn get_sophon_build_by_branch(
    client: &Client,
    region: Region,
    branch: &PackageInfo
) -> Result<SophonBuild, ApiError> {
    get_sophon_build(client, build_sophon_get_build_url(region, branch))
}
