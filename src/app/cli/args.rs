//! Command-line arguments
//!
//! Global flags override values loaded from the configuration file; the
//! subcommand selects the queue operation to run.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "partq")]
#[command(about = "Partitioned message queue on a Redis-compatible store")]
#[command(version)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long = "config-file", value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// Store URL (e.g. redis://127.0.0.1:6379/0)
    #[arg(short = 's', long = "store-url", value_name = "URL")]
    pub store_url: Option<String>,

    /// Key namespace
    #[arg(short = 'n', long = "namespace", value_name = "NAME")]
    pub namespace: Option<String>,

    /// Consumer name used for group reads
    #[arg(long = "consumer-name", value_name = "NAME")]
    pub consumer_name: Option<String>,

    /// Log level
    #[arg(short = 'l', long = "log-level", value_name = "LEVEL", value_parser = ["trace", "debug", "info", "warn", "error", "off"])]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(short = 'o', long = "log-format", value_name = "FORMAT", value_parser = ["text", "ext", "json"])]
    pub log_format: Option<String>,

    /// Log file path (use 'none' to disable file logging)
    #[arg(short = 'f', long = "log-file", value_name = "FILE")]
    pub log_file: Option<String>,

    /// Disable colored output
    #[arg(long = "no-color")]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send one message
    Send {
        queue: String,
        payload: String,
        /// Routing key; omitted keys go to the shortest partition
        #[arg(short = 'k', long = "key")]
        key: Option<String>,
        /// Deliver after this many milliseconds
        #[arg(short = 'd', long = "delay-ms", value_name = "MS")]
        delay_ms: Option<u64>,
    },
    /// Print messages as they arrive until interrupted
    Tail {
        queue: String,
        /// Consumer group (defaults to the queue's first group)
        #[arg(short = 'g', long = "group")]
        group: Option<String>,
        /// Read in batches instead of one message at a time
        #[arg(short = 'b', long = "batch")]
        batch: bool,
    },
    /// List expired messages
    Expired {
        queue: String,
        /// Delete them as well
        #[arg(long = "delete")]
        delete: bool,
    },
    /// Move a consumer group's cursor
    ResetOffset {
        queue: String,
        #[arg(short = 'g', long = "group")]
        group: Option<String>,
        /// Only this partition
        #[arg(short = 'p', long = "partition")]
        partition: Option<u32>,
        /// earliest, latest or an entry id
        #[arg(short = 't', long = "to", default_value = "earliest")]
        to: String,
    },
    /// Delete a consumer group from every partition
    DelGroup { queue: String, group: String },
    /// Delete all partitions and delayed messages of a queue
    DelQueue { queue: String },
}

impl Command {
    pub fn queue(&self) -> &str {
        match self {
            Command::Send { queue, .. }
            | Command::Tail { queue, .. }
            | Command::Expired { queue, .. }
            | Command::ResetOffset { queue, .. }
            | Command::DelGroup { queue, .. }
            | Command::DelQueue { queue } => queue,
        }
    }
}
