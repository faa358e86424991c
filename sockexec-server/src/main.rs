//! sockexec server - WebSocket command execution daemon

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use sockexec_server::{ConfigLoader, ConfigOverrides, Server};
use sockexec_utils::{init_logging_with_config, LogConfig, Result};

/// sockexec-server - run shell commands and transfer files over WebSocket
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on (host:port)
    #[arg(long, env = "SOCKEXEC_LISTEN")]
    listen: Option<String>,

    /// Directory for uploaded and downloadable files
    #[arg(long, env = "SOCKEXEC_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Shell used to run commands
    #[arg(long)]
    shell: Option<String>,

    /// Configuration file (defaults to the XDG config location)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            listen: self.listen.clone(),
            workspace_dir: self.workspace.clone(),
            shell: self.shell.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging_with_config(LogConfig::server())?;

    match run(args).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("sockexec server error: {}", e);
            Err(e)
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = ConfigLoader::load_and_validate(args.config.as_deref())?
        .with_overrides(args.overrides());
    ConfigLoader::validate(&config)?;

    info!("sockexec server starting (pid {})", std::process::id());
    let server = Server::bind(config).await?;
    server.run_until(shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down sockexec server");
}
