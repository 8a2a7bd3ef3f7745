pub mod api;
pub mod assembler;
pub mod config;
pub mod decompressor;
pub mod downloader;
pub mod installer;
pub mod logging;
pub mod manifest;
pub mod prettify_bytes;
pub mod verifier;

#[cfg(test)]
mod tests;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod prelude {
    pub use super::api::schemas::sophon_builds::{DownloadInfo, SophonBuild, SophonDownloadInfo};
    pub use super::api::Region;
    pub use super::config::Config;
    pub use super::installer::Installer;
    pub use super::prettify_bytes::prettify_bytes;
}
