use std::io::{self, Write};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};
use zlmb_queue::{QueueSocket, Role, Shutdown};
use zlmb_worker::{
    BridgeConfig, DispatchError, Envelope, ExternalProcessBridge, Handler, HandlerCommand,
    InspectHandler, ProcessHandler, WorkerConfig, WorkerLoop, WorkerStats,
};

use crate::cmd::{install_ctrlc_handler, parse_endpoint, WorkerArgs};
use crate::exit::{queue_error, worker_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE};
use crate::output::{print_stats, OutputFormat};

pub fn run(args: WorkerArgs, format: OutputFormat) -> CliResult<i32> {
    let endpoint = parse_endpoint(&args.endpoint)?;
    let timeout = args.timeout.as_deref().map(parse_duration).transpose()?;
    let bridge = ExternalProcessBridge::new(BridgeConfig {
        timeout,
        env_prefix: args.env_prefix.clone(),
        clear_env: args.clear_env,
        ..BridgeConfig::default()
    });
    let command = args
        .command
        .as_ref()
        .map(|program| HandlerCommand::new(program).args(&args.handler_args));

    // Connect every worker before starting any, so a bad endpoint fails fast.
    let mut sockets = Vec::with_capacity(args.workers.get());
    for _ in 0..args.workers.get() {
        let socket = QueueSocket::connect(&endpoint, Role::Pull)
            .map_err(|err| queue_error("connect failed", err))?;
        sockets.push(socket);
    }

    let shutdown = Shutdown::new();
    install_ctrlc_handler(shutdown.clone())?;
    info!(
        endpoint = %endpoint,
        workers = sockets.len(),
        handler = %command.as_ref().map_or_else(|| "inspect".to_string(), ToString::to_string),
        "worker started"
    );

    let outcomes = thread::scope(|scope| {
        let handles: Vec<_> = sockets
            .into_iter()
            .enumerate()
            .map(|(index, socket)| {
                let config = WorkerConfig {
                    name: format!("worker-{index}"),
                    max_messages: args.max_messages,
                };
                let shutdown = &shutdown;
                let handler = command
                    .clone()
                    .map(|command| ProcessHandler::new(bridge.clone(), command));
                thread::Builder::new()
                    .name(config.name.clone())
                    .spawn_scoped(scope, move || match handler {
                        Some(handler) => run_one(socket, handler, config, shutdown),
                        None => run_one(socket, print_envelope, config, shutdown),
                    })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| match handle {
                Ok(handle) => handle
                    .join()
                    .map_err(|_| CliError::new(INTERNAL, "worker thread panicked")),
                Err(err) => Err(CliError::new(
                    INTERNAL,
                    format!("failed to start worker thread: {err}"),
                )),
            })
            .collect::<Vec<_>>()
    });

    let mut total = WorkerStats::default();
    let mut failure = None;
    for outcome in outcomes {
        match outcome {
            Ok(Ok(stats)) => {
                total.received += stats.received;
                total.dispatched += stats.dispatched;
                total.failed += stats.failed;
                total.skipped += stats.skipped;
            }
            Ok(Err(err)) => {
                failure.get_or_insert(worker_error("worker terminated", err));
            }
            Err(err) => {
                shutdown.trigger();
                failure.get_or_insert(err);
            }
        }
    }

    info!(
        received = total.received,
        dispatched = total.dispatched,
        failed = total.failed,
        skipped = total.skipped,
        "all workers stopped"
    );
    if let Some(err) = failure {
        return Err(err);
    }
    // Stdout carries handler output when printing messages in-process.
    if command.is_some() {
        print_stats("worker", &total, format);
    }
    Ok(SUCCESS)
}

fn run_one<H: Handler>(
    socket: QueueSocket,
    handler: H,
    config: WorkerConfig,
    shutdown: &Shutdown,
) -> zlmb_worker::Result<WorkerStats> {
    let mut worker = WorkerLoop::with_config(socket, handler, config);
    match worker.run(shutdown) {
        Ok(_) => worker.close(),
        Err(err) => {
            // One worker losing the queue stops the rest.
            shutdown.trigger();
            if let Err(close_err) = worker.close() {
                warn!(error = %close_err, "worker close failed after error");
            }
            Err(err)
        }
    }
}

/// Print one envelope to stdout in a single write so workers don't interleave.
fn print_envelope(envelope: &Envelope) -> Result<(), DispatchError> {
    let mut inspect = InspectHandler::new(Vec::new());
    inspect.handle(envelope)?;
    let mut out = io::stdout().lock();
    out.write_all(&inspect.into_inner())?;
    out.flush()?;
    Ok(())
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
