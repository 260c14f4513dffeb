//! Story database opened for one command: loaded from the JSON file into an
//! in-memory backend, driven through the explorer, written back on save.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stories_explorer::{Database, Explorer, MemoryBackend};

use crate::config::Config;

pub struct StoryWorkspace {
    pub explorer: Explorer,
    backend: Arc<MemoryBackend>,
    path: PathBuf,
}

impl StoryWorkspace {
    /// Opens `story` (or the configured default story) with every document loaded
    pub async fn open(cwd: &Path, story: Option<String>) -> Result<Self> {
        let config = Config::load(cwd)?;
        let path = config.database_path(cwd);
        let db = load_database(&path)?;

        let story_id = story
            .or_else(|| config.story_id.clone())
            .or_else(|| db.stories.first().map(|s| s.story_id.clone()))
            .ok_or_else(|| anyhow!("No story in {}, run `stories init` first", path.display()))?;

        let backend = Arc::new(MemoryBackend::new(db));
        let explorer = Explorer::open(&story_id, backend.clone(), config.explorer.clone())
            .await
            .with_context(|| format!("Cannot open story {}", story_id))?;
        explorer.expand_all(&explorer.root().id).await?;

        tracing::debug!(story_id = %story_id, database = %path.display(), "workspace opened");
        Ok(Self {
            explorer,
            backend,
            path,
        })
    }

    /// Writes the backend state back to the database file
    pub fn save(&self) -> Result<()> {
        save_database(&self.path, &self.backend.snapshot())
    }
}

pub fn load_database(path: &Path) -> Result<Database> {
    if !path.exists() {
        return Ok(Database::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read {}", path.display()))?;
    let db = serde_json::from_str(&content)
        .with_context(|| format!("Invalid database {}", path.display()))?;
    Ok(db)
}

pub fn save_database(path: &Path, db: &Database) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(db)?)?;
    Ok(())
}
