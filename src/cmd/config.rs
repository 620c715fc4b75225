//! Configuration view and validation commands: `taskforge config`.

use anyhow::{Context, Result};

use taskforge::config::{TaskforgeConfig, TaskforgeToml};

use super::super::ConfigCommands;

pub fn cmd_config(config: &TaskforgeConfig, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = config.config_file();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("taskforge configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No taskforge.toml found at {}", config_path.display());
                println!("Using defaults. Run 'taskforge config init' to create one.");
            }
            println!();

            let rendered =
                toml::to_string_pretty(&config.toml).context("Failed to render configuration")?;
            println!("{}", rendered.trim_end());
            println!();

            println!("Effective values (with env/CLI overrides):");
            println!("  queue file = \"{}\"", config.queue_file().display());
            println!("  workspace dir = \"{}\"", config.workspace_dir().display());
            println!("  claude_cmd = \"{}\"", config.claude_cmd());
            match config.github_repository() {
                Some(repo) => println!("  github repository = \"{}\"", repo),
                None => println!("  github repository = (not set)"),
            }
            println!("  github api_url = \"{}\"", config.github_api_url());
            println!(
                "  github token = {}",
                if config.github_token().is_some() { "set" } else { "not set" }
            );
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("taskforge.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&config.state_dir).with_context(|| {
                format!("Failed to create {}", config.state_dir.display())
            })?;
            TaskforgeToml::default().save(&config_path)?;

            println!("Created taskforge.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [github] repository, api_url");
            println!("  - [generator] claude_cmd, model, timeout_secs");
            println!("  - [worker] poll_interval_secs, shutdown_grace_secs");
            println!();
        }
    }

    Ok(())
}
