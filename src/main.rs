use anyhow::Result;
use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "taskboard")]
#[command(version, about = "A Kanban dashboard for TaskMaster projects with real-time updates")]
pub struct Cli {
    /// Debug-level logging for taskboard itself
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the Taskboard dashboard server
    Serve {
        /// Preferred port; the next free port in 5000-5999 is used if taken
        #[arg(short, long)]
        port: Option<u16>,

        /// Project directory containing .taskmaster/tasks/tasks.json
        #[arg(short, long)]
        watch: Option<PathBuf>,

        /// Interface to listen on
        #[arg(long)]
        host: Option<IpAddr>,

        /// Open the dashboard in a browser once listening
        #[arg(short, long, conflicts_with = "no_open")]
        open: bool,

        /// Do not open a browser
        #[arg(long)]
        no_open: bool,
    },
    /// Follow a running server and redraw the board on every update
    Tail {
        /// Server WebSocket URL
        #[arg(long, default_value = "ws://127.0.0.1:5000/ws")]
        url: String,

        /// Delay before reconnecting after the connection drops
        #[arg(long)]
        reconnect_delay_ms: Option<u64>,
    },
    /// Print the board for a project once and exit
    Board {
        /// Project directory containing .taskmaster/tasks/tasks.json
        #[arg(short, long)]
        watch: Option<PathBuf>,

        /// Print the board as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_flags = cmd::LogFlags {
        verbose: cli.verbose,
        json: cli.json_logs,
    };

    match &cli.command {
        Commands::Serve {
            port,
            watch,
            host,
            open,
            no_open,
        } => {
            let (watch_dir, mut config) = cmd::load_config(watch.as_deref())?;
            if let Some(port) = port {
                config.server.port = *port;
            }
            if let Some(host) = host {
                config.server.host = *host;
            }
            if *open {
                config.server.open = true;
            }
            if *no_open {
                config.server.open = false;
            }
            cmd::finish_config(&mut config, log_flags)?;
            cmd::cmd_serve(&config, &watch_dir).await?;
        }
        Commands::Tail {
            url,
            reconnect_delay_ms,
        } => {
            let (_, mut config) = cmd::load_config(None)?;
            if let Some(ms) = reconnect_delay_ms {
                config.viewer.reconnect_delay_ms = *ms;
            }
            cmd::finish_config(&mut config, log_flags)?;
            cmd::cmd_tail(url, config.viewer.reconnect_delay()).await?;
        }
        Commands::Board { watch, json } => {
            let (watch_dir, mut config) = cmd::load_config(watch.as_deref())?;
            cmd::finish_config(&mut config, log_flags)?;
            cmd::cmd_board(&config.tasks_path(&watch_dir), *json)?;
        }
    }

    Ok(())
}
