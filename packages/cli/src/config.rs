use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use stories_explorer::ExplorerConfig;

pub const DEFAULT_CONFIG_NAME: &str = "stories.config.json";

/// Stories configuration file format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// JSON database holding stories, documents and contents
    #[serde(default = "default_database")]
    pub database: String,

    /// Story used when no `--story` is given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_id: Option<String>,

    /// Explorer tuning
    #[serde(default)]
    pub explorer: ExplorerConfig,
}

fn default_database() -> String {
    "stories.db.json".to_string()
}

impl Config {
    /// Load config from a directory
    pub fn load(cwd: &Path) -> anyhow::Result<Self> {
        let config_path = cwd.join(DEFAULT_CONFIG_NAME);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    pub fn database_path(&self, cwd: &Path) -> PathBuf {
        cwd.join(&self.database)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: default_database(),
            story_id: None,
            explorer: ExplorerConfig::default(),
        }
    }
}
