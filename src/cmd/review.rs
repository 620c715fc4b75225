//! Pull request commands: `taskforge review comments|merge`.

use anyhow::Result;
use console::style;

use taskforge::capability::{Comment, MergeMethod};
use taskforge::config::TaskforgeConfig;
use taskforge::engine::Orchestrator;

use super::super::ReviewCommands;
use super::build_orchestrator;

fn print_comment(comment: &Comment) {
    let location = match (&comment.path, comment.line) {
        (Some(path), Some(line)) => format!(" {}:{}", path, line),
        (Some(path), None) => format!(" {}", path),
        _ => String::new(),
    };
    println!(
        "  {}{}",
        style(format!("@{}", comment.author)).bold(),
        style(location).dim()
    );
    for line in comment.body.lines() {
        println!("    {}", line);
    }
}

pub async fn cmd_review(config: &TaskforgeConfig, command: ReviewCommands) -> Result<()> {
    let orchestrator: Orchestrator = build_orchestrator(config)?;

    match command {
        ReviewCommands::Comments { number, json } => {
            let comments = orchestrator.get_pr_comments(number).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&comments)?);
                return Ok(());
            }
            if comments.total() == 0 {
                println!("No comments on #{}.", number);
                return Ok(());
            }
            if !comments.issue_comments.is_empty() {
                println!("{}", style("Conversation").bold().cyan());
                comments.issue_comments.iter().for_each(print_comment);
            }
            if !comments.review_comments.is_empty() {
                println!("{}", style("Inline").bold().cyan());
                comments.review_comments.iter().for_each(print_comment);
            }
        }
        ReviewCommands::Merge { number, method } => {
            let method: MergeMethod = method.parse().map_err(anyhow::Error::msg)?;
            let outcome = orchestrator.merge_pr(number, method).await?;
            println!(
                "{} #{} ({}) as {}",
                style("Merged").green().bold(),
                number,
                method,
                outcome.merged_ref
            );
        }
    }

    Ok(())
}
