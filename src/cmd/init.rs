//! Project initialization: `taskforge init`.

use anyhow::Result;

use taskforge::config::TaskforgeConfig;
use taskforge::init::init_project;

pub fn cmd_init(config: &TaskforgeConfig) -> Result<()> {
    let result = init_project(config)?;

    if result.created {
        println!(
            "Initialized taskforge project at {}",
            result.state_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .taskforge/");
        println!("  ├── taskforge.toml  # Configuration (use `taskforge config show`)");
        println!("  ├── queue.json      # Task queue");
        println!("  └── workspace/      # Generated files per branch");
        println!();
        println!("Next steps:");
        println!("  1. Set [github] repository and export GITHUB_TOKEN");
        println!("  2. Run `taskforge add \"<description>\"` to queue a task");
        println!("  3. Run `taskforge worker` to process the queue");
    } else {
        println!(
            "taskforge project already initialized at {}",
            result.state_dir.display()
        );
        if result.wrote_config {
            println!("Wrote missing taskforge.toml.");
        }
        println!("Directory structure verified.");
    }

    Ok(())
}
