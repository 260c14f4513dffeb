use crate::workspace::StoryWorkspace;
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::Path;

#[derive(Debug, Args)]
pub struct ContentArgs {
    /// Document id
    pub id: String,

    /// Replace the page html
    #[arg(long)]
    pub html: Option<String>,

    /// Replace the page css
    #[arg(long)]
    pub css: Option<String>,

    #[arg(long)]
    pub story: Option<String>,
}

pub async fn content(args: ContentArgs, cwd: &Path) -> Result<()> {
    let workspace = StoryWorkspace::open(cwd, args.story).await?;
    let explorer = &workspace.explorer;
    let mut content = explorer.load_content(&args.id).await?;

    if args.html.is_none() && args.css.is_none() {
        println!("{}", "html:".bold());
        println!("{}", content.html);
        println!("{}", "css:".bold());
        println!("{}", content.css);
        return Ok(());
    }

    if let Some(html) = args.html {
        content.html = html;
    }
    if let Some(css) = args.css {
        content.css = css;
    }
    explorer.content_changed(&args.id, content)?;
    explorer.save_content(&args.id).await?;
    workspace.save()?;

    println!("  {} Saved content of {}", "✓".green(), args.id.bright_white());
    Ok(())
}
