//! Queue commands: `taskforge add|list|show|retry|stats`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use console::style;

use taskforge::config::TaskforgeConfig;
use taskforge::queue::{Task, TaskOptions, TaskStatus};
use taskforge::util::truncate_chars;

use super::open_queue;

pub struct AddArgs {
    pub description: String,
    pub no_pr: bool,
    pub base_branch: String,
    pub branch_name: Option<String>,
    pub requirements: Option<String>,
    pub no_plan: bool,
    pub existing_files: Vec<PathBuf>,
}

impl AddArgs {
    /// Build task options, reading `--existing-file` paths relative to the project.
    fn into_options(self, config: &TaskforgeConfig) -> Result<(String, TaskOptions)> {
        let mut existing_files = BTreeMap::new();
        for path in &self.existing_files {
            let full = if path.is_absolute() {
                path.clone()
            } else {
                config.project_dir.join(path)
            };
            let content = std::fs::read_to_string(&full)
                .with_context(|| format!("Failed to read existing file {}", full.display()))?;
            existing_files.insert(path.to_string_lossy().replace('\\', "/"), content);
        }

        let options = TaskOptions {
            create_pr: !self.no_pr,
            base_branch: self.base_branch,
            branch_name: self.branch_name,
            requirements: self.requirements,
            existing_files,
            use_planning: self.no_plan.then_some(false),
            ..TaskOptions::default()
        }
        .with_defaults();
        Ok((self.description, options))
    }
}

pub async fn cmd_add(config: &TaskforgeConfig, args: AddArgs) -> Result<()> {
    if args.description.trim().is_empty() {
        anyhow::bail!("Task description must not be empty");
    }
    let (description, options) = args.into_options(config)?;
    let queue = open_queue(config)?;
    let task = queue.add_task(description, options).await?;

    println!("{} {}", style("Queued").green().bold(), task.id);
    println!("  branch: {}", task.options.branch_for(&task.id));
    if !task.options.create_pr {
        println!("  pull request: {}", style("disabled").dim());
    }
    Ok(())
}

fn styled_status(status: TaskStatus) -> String {
    let text = format!("{:<10}", status.as_str());
    match status {
        TaskStatus::Pending => style(text).yellow().to_string(),
        TaskStatus::Processing => style(text).cyan().to_string(),
        TaskStatus::Completed => style(text).green().to_string(),
        TaskStatus::Failed => style(text).red().to_string(),
    }
}

pub async fn cmd_list(config: &TaskforgeConfig, status: Option<&str>, json: bool) -> Result<()> {
    let status = match status {
        None | Some("all") => None,
        Some(s) => Some(s.parse::<TaskStatus>().map_err(anyhow::Error::msg)?),
    };
    let queue = open_queue(config)?;
    let tasks = queue.list_tasks(status).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }

    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }

    for task in &tasks {
        println!(
            "{}  {}  {}  {}",
            task.id,
            styled_status(task.status),
            task.created_at.format("%Y-%m-%d %H:%M:%S"),
            truncate_chars(task.description.lines().next().unwrap_or(""), 60)
        );
    }
    Ok(())
}

fn print_task(task: &Task) {
    println!("{}", style(&task.id).bold());
    println!("  status:      {}", styled_status(task.status));
    println!("  description: {}", task.description);
    println!("  branch:      {}", task.options.branch_for(&task.id));
    println!("  base branch: {}", task.options.base_branch);
    println!("  create PR:   {}", task.options.create_pr);
    println!("  planning:    {}", task.options.planning_enabled());
    if let Some(req) = &task.options.requirements {
        println!("  requirements: {}", req);
    }
    println!("  created:     {}", task.created_at.to_rfc3339());
    if let Some(at) = task.started_at {
        println!("  started:     {}", at.to_rfc3339());
    }
    if let Some(at) = task.completed_at {
        println!("  completed:   {}", at.to_rfc3339());
    }
    if let Some(at) = task.failed_at {
        println!("  failed:      {}", at.to_rfc3339());
    }
    if let Some(error) = &task.error {
        println!("  {} {}", style("error:").red().bold(), error);
    }
    if let Some(result) = &task.result {
        println!("  commit:      {}", result.commit_message);
        if let Some(pr) = &result.pr {
            println!("  pull request: #{} {}", pr.number, pr.url);
        }
        println!("  files:");
        for file in &result.files {
            println!("    - {}", file.path);
        }
    }
}

pub async fn cmd_show(config: &TaskforgeConfig, id: String) -> Result<()> {
    let queue = open_queue(config)?;
    let task = queue
        .get_task(id.clone())
        .await?
        .with_context(|| format!("Task {} not found", id))?;
    print_task(&task);
    Ok(())
}

pub async fn cmd_retry(config: &TaskforgeConfig, id: String) -> Result<()> {
    let queue = open_queue(config)?;
    let task = queue.retry_task(id).await?;
    println!("{} {} moved back to pending", style("Retrying").yellow().bold(), task.id);
    Ok(())
}

pub async fn cmd_stats(config: &TaskforgeConfig) -> Result<()> {
    let queue = open_queue(config)?;
    let stats = queue.stats().await?;
    println!("pending:    {}", stats.pending);
    println!("processing: {}", stats.processing);
    println!("completed:  {}", stats.completed);
    println!("failed:     {}", stats.failed);
    println!("total:      {}", stats.total);
    Ok(())
}
