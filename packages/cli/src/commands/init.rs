use crate::config::{Config, DEFAULT_CONFIG_NAME};
use crate::workspace::{load_database, save_database};
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::fs;
use std::path::Path;

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Title of the first story
    #[arg(short, long, default_value = "My story")]
    pub title: String,

    /// Id of the first story
    #[arg(short, long, default_value = "story-1")]
    pub story_id: String,

    /// Database file, relative to the current directory
    #[arg(short, long, default_value = "stories.db.json")]
    pub database: String,

    /// Force overwrite existing config
    #[arg(short, long)]
    pub force: bool,
}

pub fn init(args: InitArgs, cwd: &Path) -> Result<()> {
    let config_path = cwd.join(DEFAULT_CONFIG_NAME);

    if config_path.exists() && !args.force {
        println!(
            "{} {} already exists",
            "⚠️".yellow(),
            DEFAULT_CONFIG_NAME.bright_white()
        );
        println!("Use --force to overwrite");
        return Ok(());
    }

    println!("{}", "📝 Initializing stories...".bright_blue().bold());

    let config = Config {
        database: args.database.clone(),
        story_id: Some(args.story_id.clone()),
        ..Config::default()
    };

    let database_path = config.database_path(cwd);
    let mut db = load_database(&database_path)?;
    if db.story(&args.story_id).is_none() {
        let story = db.create_story(&args.story_id, &args.title);
        save_database(&database_path, &db)?;
        println!(
            "  {} Created story {} ({})",
            "✓".green(),
            story.title.bright_white(),
            story.story_id.dimmed()
        );
    }

    fs::write(&config_path, serde_json::to_string_pretty(&config)?)?;
    println!("  {} Created {}", "✓".green(), DEFAULT_CONFIG_NAME);
    println!();
    println!("{}", "✅ Stories initialized!".green().bold());
    println!();
    println!("Next steps:");
    println!("  1. Run: stories add <parent-id> \"First page\"");
    println!("  2. Run: stories tree");

    Ok(())
}
