//! sockexec client - interactive REPL for a sockexec server
//!
//! Reads commands from stdin and prints everything the server sends.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use sockexec_client::cli::Args;
use sockexec_client::{ClientConfig, Command, ConnectionManager, Dispatcher, Flow, WebSocketFactory};
use sockexec_utils::{init_logging_with_config, LogConfig, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    let log_config = if args.verbose {
        LogConfig::development()
    } else {
        LogConfig::client()
    };
    init_logging_with_config(log_config)?;
    tracing::debug!("CLI args: {:?}", args);

    match run(args).await {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::error!("sockexec client error: {}", e);
            eprintln!("Error: {}", e);
            Err(e)
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = ClientConfig::load(args.config.as_deref())?;
    let factory = WebSocketFactory::new().with_max_message_size(config.max_message_size());
    let (manager, mut events) =
        ConnectionManager::new(Arc::new(factory), config.reconnect_policy());
    let mut dispatcher = Dispatcher::new(manager, config, std::io::stdout());

    println!("sockexec client. Type 'help' for commands.");
    if let Some(url) = args.url {
        // Reconnects are already scheduled on failure
        if let Err(e) = dispatcher.execute(Command::Connect(url)).await {
            eprintln!("[error] {}", e);
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if dispatcher.execute_line(&line).await? == Flow::Quit {
                        break;
                    }
                }
                None => {
                    dispatcher.manager().disconnect();
                    break;
                }
            },
            Some(event) = events.recv() => dispatcher.handle_event(event).await?,
            _ = tokio::signal::ctrl_c() => {
                dispatcher.manager().disconnect();
                break;
            }
        }
    }

    tracing::info!("sockexec client exiting");
    Ok(())
}
