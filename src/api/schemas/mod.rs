use serde::{Deserialize, Serialize};

pub mod game_branches;
pub mod game_configs;
pub mod sophon_builds;

/// Envelope every HYP endpoint wraps its payload in.
///
/// `data` is absent when the backend reports a logical error through `retcode`.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub retcode: i16,
    pub message: String,
    pub data: Option<T>
}
