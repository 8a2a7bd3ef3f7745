use serde::{Deserialize, Serialize};

use super::game_branches::Game;

#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameConfigs {
    pub launch_configs: Vec<LaunchConfig>
}

impl GameConfigs {
    pub fn get_config_by_id(&self, id: &str) -> Option<&LaunchConfig> {
        self.launch_configs.iter()
            .find(|config| config.game.id == id)
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchConfig {
    pub game: Game,
    pub exe_file_name: String,
    pub installation_dir: String,

    #[serde(default)]
    pub audio_pkg_scan_dir: String,

    #[serde(default)]
    pub game_screenshot_dir: String,

    #[serde(default)]
    pub default_download_mode: String,

    #[serde(default)]
    pub related_processes: Vec<String>
}
