use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameBranches {
    pub game_branches: Vec<GameBranchInfo>
}

impl GameBranches {
    /// Get `GameBranchInfo` of a specified id and tag
    pub fn get_game_by_id(&self, id: &str, tag: &str) -> Option<&GameBranchInfo> {
        self.game_branches.iter()
            .find(|gbi| gbi.game.id == id && gbi.main.tag == tag)
    }

    /// Get latest tagged branch of specified game by id
    pub fn get_game_latest_by_id(&self, id: &str) -> Option<&GameBranchInfo> {
        self.game_branches.iter()
            .filter(|gbi| gbi.game.id == id)
            .max_by_key(|gbi| &gbi.main.tag)
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameBranchInfo {
    pub game: Game,
    pub main: PackageInfo,
    pub pre_download: Option<PackageInfo>
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    pub id: String,
    pub biz: String
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub package_id: String,
    pub branch: String,
    pub password: String,
    pub tag: String,
    pub diff_tags: Vec<String>,
    pub categories: Vec<PackageCategory>
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageCategory {
    pub category_id: String,
    pub matching_field: String
}
