//! Several in-process workers competing for messages from one broker.
//!
//! Run with:
//!   cargo run --example pipeline

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use zlmb::frame::Message;
use zlmb::queue::{Broker, EnvelopeTransport, QueueSocket, Role, Shutdown};
use zlmb::transport::Endpoint;
use zlmb::worker::{DispatchError, Envelope, WorkerConfig, WorkerLoop};

const MESSAGES: usize = 20;
const WORKERS: usize = 3;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let broker = Broker::bind(&Endpoint::Tcp("127.0.0.1:0".to_string()))?;
    let endpoint = broker.endpoint().clone();
    let shutdown = Shutdown::new();
    let handled = AtomicUsize::new(0);

    thread::scope(|scope| {
        scope.spawn(|| broker.run(&shutdown));
        let result = run_pipeline(scope, &endpoint, &shutdown, &handled);
        shutdown.trigger();
        result
    })?;

    eprintln!("Handled {} messages", handled.load(Ordering::SeqCst));
    Ok(())
}

fn run_pipeline<'scope>(
    scope: &'scope thread::Scope<'scope, '_>,
    endpoint: &Endpoint,
    shutdown: &'scope Shutdown,
    handled: &'scope AtomicUsize,
) -> Result<(), Box<dyn std::error::Error>> {
    for index in 0..WORKERS {
        let socket = QueueSocket::connect(endpoint, Role::Pull)?;
        scope.spawn(move || {
            let handler = |envelope: &Envelope| {
                println!(
                    "worker-{index}: {} frames, manifest {}",
                    envelope.frame_count(),
                    envelope.manifest()
                );
                handled.fetch_add(1, Ordering::SeqCst);
                Ok::<(), DispatchError>(())
            };
            let config = WorkerConfig {
                name: format!("worker-{index}"),
                ..WorkerConfig::default()
            };
            let mut worker = WorkerLoop::with_config(socket, handler, config);
            if let Err(err) = worker.run(shutdown) {
                eprintln!("worker-{index} stopped: {err}");
            }
        });
    }

    let mut producer = QueueSocket::connect(endpoint, Role::Push)?;
    for n in 0..MESSAGES {
        producer.send(&Message::from_frames([n.to_string(), "x".repeat(n)]))?;
    }
    producer.close()?;

    while handled.load(Ordering::SeqCst) < MESSAGES {
        thread::sleep(Duration::from_millis(10));
    }
    Ok(())
}
