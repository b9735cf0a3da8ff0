//! `taskboard serve`: run the live board server.

use std::path::Path;

use anyhow::{Context, Result};
use taskboard::config::TaskboardConfig;
use taskboard::server::{ServerState, SyncServer};
use tracing::warn;

pub async fn cmd_serve(config: &TaskboardConfig, watch_dir: &Path) -> Result<()> {
    let tasks_path = config.tasks_path(watch_dir);
    let server = SyncServer::start(config, tasks_path.clone())
        .await
        .context("Failed to start taskboard server")?;

    let url = if server.addr().ip().is_loopback() {
        format!("http://localhost:{}", server.port())
    } else {
        format!("http://{}", server.addr())
    };

    println!();
    println!(
        "{} {}",
        console::style("Taskboard is running at").bold(),
        console::style(&url).cyan().bold()
    );
    println!("Watching for tasks at: {}", tasks_path.display());
    println!("Viewers connect to: ws://{}/ws", server.addr());
    println!("{}", console::style("Press Ctrl+C to stop the server").dim());
    println!();

    if config.server.open {
        tokio::task::spawn_blocking(move || {
            if let Err(e) = open::that(&url) {
                warn!(error = %e, "failed to open browser");
            }
        });
    }

    let state = server.run_until_signal().await;
    if state == ServerState::Stopped {
        println!("Taskboard shut down.");
    }
    Ok(())
}
