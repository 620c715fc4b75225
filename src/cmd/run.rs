//! Long-running commands: `taskforge worker` and `taskforge serve`.

use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;
use tokio::sync::watch;

use taskforge::config::TaskforgeConfig;
use taskforge::engine::Worker;
use taskforge::server::{AppState, ServerConfig, start_server};

use super::{build_orchestrator, open_queue};

/// Flip the returned channel to `true` on the first Ctrl-C.
fn shutdown_channel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                println!("\nShutting down...");
                let _ = tx.send(true);
            }
            Err(e) => tracing::error!(error = %e, "Failed to install Ctrl+C handler"),
        }
    });
    rx
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            // Sender gone without a signal; never shut down from here.
            std::future::pending::<()>().await;
        }
    }
}

pub async fn cmd_worker(config: &TaskforgeConfig, once: bool) -> Result<()> {
    let queue = open_queue(config)?;
    let orchestrator = Arc::new(build_orchestrator(config)?);
    let worker = Worker::new(queue, orchestrator)
        .with_poll_interval(config.poll_interval())
        .with_shutdown_grace(config.shutdown_grace());

    if once {
        let processed = worker.run_once().await.context("Worker failed")?;
        if !processed {
            println!("Queue is empty.");
        }
        return Ok(());
    }

    println!(
        "{} polling {} every {}s (Ctrl-C to stop)",
        style("Worker").bold().cyan(),
        config.queue_file().display(),
        config.poll_interval().as_secs()
    );
    worker.run(shutdown_channel()).await;
    Ok(())
}

pub async fn cmd_serve(
    config: &TaskforgeConfig,
    port: Option<u16>,
    with_worker: bool,
    dev: bool,
) -> Result<()> {
    let queue = open_queue(config)?;
    let orchestrator = Arc::new(build_orchestrator(config)?);
    let shutdown = shutdown_channel();

    let worker_handle = with_worker.then(|| {
        let worker = Worker::new(queue.clone(), Arc::clone(&orchestrator))
            .with_poll_interval(config.poll_interval())
            .with_shutdown_grace(config.shutdown_grace());
        let rx = shutdown.clone();
        tokio::spawn(async move { worker.run(rx).await })
    });

    let server_config = ServerConfig {
        host: if dev {
            "0.0.0.0".to_string()
        } else {
            config.toml.server.host.clone()
        },
        port: port.unwrap_or(config.toml.server.port),
        dev_mode: dev,
    };
    let state = Arc::new(AppState {
        queue,
        orchestrator,
    });

    let served = start_server(server_config, state, wait_for_shutdown(shutdown)).await;

    if let Some(handle) = worker_handle {
        if served.is_err() {
            handle.abort();
        } else if let Err(e) = handle.await {
            tracing::error!(error = %e, "Worker task panicked");
        }
    }
    served
}
