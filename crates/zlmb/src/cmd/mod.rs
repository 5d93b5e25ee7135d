use std::num::NonZeroUsize;
use std::path::PathBuf;

use clap::{Args, Subcommand};
use zlmb_queue::Shutdown;
use zlmb_transport::Endpoint;

use crate::exit::{transport_error, CliError, CliResult, INTERNAL};
use crate::output::OutputFormat;

pub mod broker;
pub mod inspect;
pub mod push;
pub mod version;
pub mod worker;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Push one or more multipart messages onto a queue.
    Push(PushArgs),
    /// Pull messages and run a handler for each.
    Worker(WorkerArgs),
    /// Run a queue broker between producers and workers.
    Broker(BrokerArgs),
    /// Decode the message handed to a handler process and print it.
    Inspect(InspectArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Push(args) => push::run(args, format),
        Command::Worker(args) => worker::run(args, format),
        Command::Broker(args) => broker::run(args, format),
        Command::Inspect(args) => inspect::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct PushArgs {
    /// Queue endpoint (tcp://host:port or ipc:///path).
    pub endpoint: String,
    /// Frames of a single message, in order.
    #[arg(required_unless_present = "file", conflicts_with = "file")]
    pub messages: Vec<String>,
    /// Read one frame per line from a file, or `-` for stdin.
    #[arg(long, value_name = "FILE")]
    pub file: Option<PathBuf>,
    /// Group every N input lines into one message. Default: the whole input.
    #[arg(long, value_name = "N", requires = "file")]
    pub multipart: Option<NonZeroUsize>,
}

#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Queue endpoint (tcp://host:port or ipc:///path).
    pub endpoint: String,
    /// Handler program run once per message. Without it, messages are printed.
    #[arg(long, short = 'c', value_name = "CMD")]
    pub command: Option<String>,
    /// Kill a handler that runs longer than this (e.g. 5s, 500ms).
    #[arg(long, short = 't', env = "ZLMB_TIMEOUT")]
    pub timeout: Option<String>,
    /// Worker threads, each with its own connection.
    #[arg(long, short = 'w', default_value = "1", env = "ZLMB_WORKERS")]
    pub workers: NonZeroUsize,
    /// Prefix for the FRAME, FRAME_LENGTH and LENGTH variables.
    #[arg(long, default_value = "", env = "ZLMB_ENV_PREFIX")]
    pub env_prefix: String,
    /// Start handlers with only the message variables in their environment.
    #[arg(long)]
    pub clear_env: bool,
    /// Stop each worker after it has received N messages.
    #[arg(long, value_name = "N")]
    pub max_messages: Option<u64>,
    /// Arguments passed to the handler command.
    #[arg(last = true, requires = "command")]
    pub handler_args: Vec<String>,
}

#[derive(Args, Debug)]
pub struct BrokerArgs {
    /// Endpoint to bind (tcp://host:port or ipc:///path).
    pub endpoint: String,
    /// Messages held before producers block.
    #[arg(long, default_value = "1024")]
    pub capacity: NonZeroUsize,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Prefix the worker used for the message variables.
    #[arg(long, default_value = "", env = "ZLMB_ENV_PREFIX")]
    pub env_prefix: String,
    /// Append output to a file instead of stdout.
    #[arg(long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn parse_endpoint(input: &str) -> CliResult<Endpoint> {
    Endpoint::parse(input).map_err(|err| transport_error("invalid endpoint", err))
}

pub(crate) fn install_ctrlc_handler(shutdown: Shutdown) -> CliResult<()> {
    ctrlc::set_handler(move || {
        shutdown.trigger();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
