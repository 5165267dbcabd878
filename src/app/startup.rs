//! Application startup

use super::cli::args::{Args, Command};
use super::cli::config::{ensure_queue, load_config};
use super::commands;
use crate::core::logging::init_logging;
use crate::core::shutdown::ShutdownCoordinator;
use crate::queue::{ClientConfig, QueueClient, QueueResult};
use clap::Parser;
use std::io::IsTerminal;

/// Parse arguments, load configuration and run the selected command.
/// Returns the process exit code.
pub async fn startup() -> i32 {
    let args = Args::parse();

    let mut config = match load_config(args.config_file.as_deref()).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("partq: {}", e);
            return 1;
        }
    };
    if let Err(e) = args.apply_overrides(&mut config) {
        eprintln!("partq: {}", e);
        return 1;
    }
    if let Err(e) = init_logging(&config.log) {
        eprintln!("partq: failed to initialise logging: {}", e);
        return 1;
    }
    ensure_queue(&mut config, args.command.queue());

    let use_color = config.log.color && std::io::stdout().is_terminal();
    log::debug!("Starting partq against {}", config.client.store.url);

    let command = args.command;
    let result = ShutdownCoordinator::guard(|shutdown| {
        run_client(config.client, command, use_color, shutdown)
    })
    .await;

    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("partq: {}", e);
            1
        }
    }
}

/// Connect, run the command, then close the client whatever the outcome
async fn run_client(
    config: ClientConfig,
    command: Command,
    color: bool,
    shutdown: ShutdownCoordinator,
) -> QueueResult<()> {
    let client = QueueClient::connect(config).await?;
    let outcome = commands::run(&client, command, color, shutdown).await;
    client.close().await?;
    outcome
}
