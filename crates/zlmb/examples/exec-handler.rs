//! Run a shell handler for each message pulled from an in-process broker.
//!
//! Run with:
//!   cargo run --example exec-handler
//!
//! The handler sees the frame count, the manifest and the buffer length in
//! its environment, and the concatenated frames on stdin.

use std::thread;

use zlmb::frame::Message;
use zlmb::queue::{Broker, EnvelopeTransport, QueueSocket, Role, Shutdown};
use zlmb::transport::Endpoint;
use zlmb::worker::{
    BridgeConfig, ExternalProcessBridge, HandlerCommand, ProcessHandler, WorkerConfig, WorkerLoop,
    WorkerStats,
};

const SCRIPT: &str =
    r#"echo "frames=$FRAME manifest=$FRAME_LENGTH length=$LENGTH"; echo "buffer=$(cat)""#;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let broker = Broker::bind(&Endpoint::Tcp("127.0.0.1:0".to_string()))?;
    let endpoint = broker.endpoint().clone();
    eprintln!("Broker on {endpoint}");

    let shutdown = Shutdown::new();
    let stats = thread::scope(|scope| {
        let broker_thread = scope.spawn(|| broker.run(&shutdown));
        let result = produce_and_work(&endpoint, &shutdown);
        shutdown.trigger();
        if let Ok(Ok(stats)) = broker_thread.join() {
            eprintln!("Broker finished: {stats:?}");
        }
        result
    })?;

    eprintln!("Worker finished: {stats:?}");
    Ok(())
}

fn produce_and_work(
    endpoint: &Endpoint,
    shutdown: &Shutdown,
) -> Result<WorkerStats, Box<dyn std::error::Error>> {
    let mut producer = QueueSocket::connect(endpoint, Role::Push)?;
    producer.send(&Message::from_frames(["hello", "", "abc"]))?;
    producer.send(&Message::from_frames(["single"]))?;
    producer.close()?;

    let bridge = ExternalProcessBridge::new(BridgeConfig::default());
    let handler = ProcessHandler::new(bridge, HandlerCommand::new("sh").args(["-c", SCRIPT]));
    let socket = QueueSocket::connect(endpoint, Role::Pull)?;
    let config = WorkerConfig {
        name: "example".to_string(),
        max_messages: Some(2),
    };

    let mut worker = WorkerLoop::with_config(socket, handler, config);
    worker.run(shutdown)?;
    Ok(worker.close()?)
}
