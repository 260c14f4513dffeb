//! Structural edits: every command goes through the explorer, then the
//! database is written back.

use crate::workspace::StoryWorkspace;
use anyhow::Result;
use clap::{Args, ValueEnum};
use colored::Colorize;
use std::path::Path;
use stories_explorer::{Destination, DropDirection};

#[derive(Debug, Args)]
pub struct AddArgs {
    /// Parent node id
    pub parent: String,

    /// Title of the new document
    pub title: String,

    #[arg(long)]
    pub story: Option<String>,
}

#[derive(Debug, Args)]
pub struct RenameArgs {
    /// Node id (the root renames the story)
    pub id: String,

    pub title: String,

    #[arg(long)]
    pub story: Option<String>,
}

#[derive(Debug, Args)]
pub struct DeleteArgs {
    /// Document id; its whole subtree is deleted
    pub id: String,

    #[arg(long)]
    pub story: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Direction {
    Above,
    Below,
    Onto,
}

impl From<Direction> for DropDirection {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Above => DropDirection::Above,
            Direction::Below => DropDirection::Below,
            Direction::Onto => DropDirection::Onto,
        }
    }
}

#[derive(Debug, Args)]
pub struct MoveArgs {
    /// Document to move
    pub id: String,

    /// Node the document is dropped on
    pub reference: String,

    /// Drop above / below the reference, or onto it as last child
    #[arg(short, long, value_enum, default_value = "onto")]
    pub direction: Direction,

    #[arg(long)]
    pub story: Option<String>,
}

pub async fn add(args: AddArgs, cwd: &Path) -> Result<()> {
    let workspace = StoryWorkspace::open(cwd, args.story).await?;
    let node = workspace
        .explorer
        .create_document(&args.parent, &args.title)
        .await?;
    workspace.save()?;

    println!(
        "  {} Created {} {}",
        "✓".green(),
        node.name.bright_white(),
        node.id.dimmed()
    );
    Ok(())
}

pub async fn rename(args: RenameArgs, cwd: &Path) -> Result<()> {
    let workspace = StoryWorkspace::open(cwd, args.story).await?;
    let node = workspace.explorer.rename(&args.id, &args.title).await?;
    workspace.save()?;

    println!(
        "  {} Renamed {} to {}",
        "✓".green(),
        node.id.dimmed(),
        node.name.bright_white()
    );
    Ok(())
}

pub async fn delete(args: DeleteArgs, cwd: &Path) -> Result<()> {
    let workspace = StoryWorkspace::open(cwd, args.story).await?;
    let removed = workspace.explorer.delete(&args.id).await?;
    workspace.save()?;

    println!(
        "  {} Deleted {} ({} document(s))",
        "✓".green(),
        args.id.bright_white(),
        removed.len()
    );
    Ok(())
}

pub async fn move_node(args: MoveArgs, cwd: &Path) -> Result<()> {
    let workspace = StoryWorkspace::open(cwd, args.story).await?;
    let destination = Destination {
        reference_id: args.reference.clone(),
        direction: args.direction.into(),
    };
    let moved = workspace.explorer.move_node(&args.id, destination).await?;
    workspace.save()?;

    if !moved.changed {
        println!("  {} {} did not move", "•".yellow(), args.id);
        return Ok(());
    }
    println!(
        "  {} Moved {} under {} at {}",
        "✓".green(),
        args.id.bright_white(),
        moved.parent_id.bright_white(),
        moved.position.to_string().cyan()
    );
    if !moved.renumbered.is_empty() {
        println!("    renumbered {} sibling(s)", moved.renumbered.len());
    }
    Ok(())
}
