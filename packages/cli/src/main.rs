mod commands;
mod config;
mod workspace;

use clap::{Parser, Subcommand};
use colored::Colorize;
use commands::{
    add, content, delete, init, move_node, rename, tree, AddArgs, ContentArgs, DeleteArgs,
    InitArgs, MoveArgs, RenameArgs, TreeArgs,
};
use tracing_subscriber::EnvFilter;

/// Stories CLI - organize story documents from the terminal
#[derive(Parser, Debug)]
#[command(name = "stories")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log explorer activity (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the config file and a first story
    Init(InitArgs),

    /// Print the document tree of a story
    Tree(TreeArgs),

    /// Add a document under a parent
    Add(AddArgs),

    /// Rename a document or the story
    Rename(RenameArgs),

    /// Delete a document and its subtree
    Delete(DeleteArgs),

    /// Move a document relative to another node
    Move(MoveArgs),

    /// Show or replace a document's content
    Content(ContentArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(err) => {
            eprintln!("{} Cannot get current directory: {}", "Error:".red().bold(), err);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Command::Init(args) => init(args, &cwd),
        Command::Tree(args) => tree(args, &cwd).await,
        Command::Add(args) => add(args, &cwd).await,
        Command::Rename(args) => rename(args, &cwd).await,
        Command::Delete(args) => delete(args, &cwd).await,
        Command::Move(args) => move_node(args, &cwd).await,
        Command::Content(args) => content(args, &cwd).await,
    };

    if let Err(err) = result {
        eprintln!();
        eprintln!("{} {:#}", "Error:".red().bold(), err);
        eprintln!();
        std::process::exit(1);
    }
}
