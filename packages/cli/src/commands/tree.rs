use crate::workspace::StoryWorkspace;
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::Path;
use stories_explorer::Explorer;

#[derive(Debug, Args)]
pub struct TreeArgs {
    /// Story to show (defaults to the configured story)
    #[arg(long)]
    pub story: Option<String>,

    /// Show sibling positions
    #[arg(short, long)]
    pub positions: bool,
}

pub async fn tree(args: TreeArgs, cwd: &Path) -> Result<()> {
    let workspace = StoryWorkspace::open(cwd, args.story).await?;
    for line in render(&workspace.explorer, args.positions)? {
        println!("{}", line);
    }
    Ok(())
}

/// One line per node, children indented under their parent
pub fn render(explorer: &Explorer, positions: bool) -> Result<Vec<String>> {
    let root = explorer.root();
    let mut lines = vec![format!("📖 {} {}", root.name.bold(), root.id.dimmed())];

    let mut stack: Vec<(String, usize)> = Vec::new();
    push_children(explorer, &root.id, 1, &mut stack)?;

    while let Some((id, depth)) = stack.pop() {
        let node = explorer.node(&id)?;
        let position = if positions {
            format!(" @{}", node.position).cyan().to_string()
        } else {
            String::new()
        };
        lines.push(format!(
            "{}📄 {} {}{}",
            "  ".repeat(depth),
            node.name,
            node.id.dimmed(),
            position
        ));
        push_children(explorer, &id, depth + 1, &mut stack)?;
    }
    Ok(lines)
}

fn push_children(
    explorer: &Explorer,
    id: &str,
    depth: usize,
    stack: &mut Vec<(String, usize)>,
) -> Result<()> {
    if let Some(children) = explorer.children(id)? {
        stack.extend(children.iter().rev().map(|child| (child.id.clone(), depth)));
    }
    Ok(())
}
