use serde::Serialize;
use tracing::{debug, info, warn};
use zlmb_frame::Message;
use zlmb_queue::{EnvelopeTransport, Shutdown};

use crate::envelope::Envelope;
use crate::error::{DispatchError, Result, WorkerError};
use crate::handler::Handler;

/// Where a [`WorkerLoop`] is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    /// Waiting on the queue. The only state in which cancellation applies.
    Receiving,
    Decoding,
    Dispatching,
    /// Cancelled or failed; the loop will not receive again.
    Terminated,
}

/// Per-loop counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    /// Messages taken from the queue.
    pub received: u64,
    /// Messages the handler completed.
    pub dispatched: u64,
    /// Messages rejected by decoding or failed by the handler.
    pub failed: u64,
    /// Empty messages skipped.
    pub skipped: u64,
}

/// Worker loop settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Name used in log lines.
    pub name: String,
    /// Stop after this many received messages.
    pub max_messages: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "worker".to_string(),
            max_messages: None,
        }
    }
}

/// Receives messages one at a time and hands each to a [`Handler`].
///
/// Each message is processed fully before the next receive. Dispatch
/// failures are logged and the loop continues; a transport failure ends it.
pub struct WorkerLoop<T, H> {
    transport: T,
    handler: H,
    config: WorkerConfig,
    state: WorkerState,
    stats: WorkerStats,
}

impl<T: EnvelopeTransport, H: Handler> WorkerLoop<T, H> {
    pub fn new(transport: T, handler: H) -> Self {
        Self::with_config(transport, handler, WorkerConfig::default())
    }

    pub fn with_config(transport: T, handler: H, config: WorkerConfig) -> Self {
        Self {
            transport,
            handler,
            config,
            state: WorkerState::Idle,
            stats: WorkerStats::default(),
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    /// Loop until cancelled, the message limit is reached, or the transport fails.
    ///
    /// Cancellation through `shutdown` only takes effect while waiting for a
    /// message; a message already received is always dispatched first.
    pub fn run(&mut self, shutdown: &Shutdown) -> Result<WorkerStats> {
        info!(worker = %self.config.name, "worker started");
        loop {
            if self
                .config
                .max_messages
                .is_some_and(|max| self.stats.received >= max)
            {
                debug!(worker = %self.config.name, "message limit reached");
                break;
            }
            match self.step(shutdown) {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => {
                    warn!(worker = %self.config.name, error = %err, "worker terminated");
                    return Err(err);
                }
            }
        }
        self.state = WorkerState::Terminated;
        info!(
            worker = %self.config.name,
            received = self.stats.received,
            dispatched = self.stats.dispatched,
            failed = self.stats.failed,
            "worker stopped"
        );
        Ok(self.stats)
    }

    /// One receive/decode/dispatch cycle.
    ///
    /// Returns `Ok(false)` when cancelled while receiving.
    pub fn step(&mut self, shutdown: &Shutdown) -> Result<bool> {
        self.state = WorkerState::Receiving;
        let message = match self.transport.receive_until(shutdown) {
            Ok(Some(message)) => message,
            Ok(None) => {
                self.state = WorkerState::Terminated;
                return Ok(false);
            }
            Err(err) => {
                self.state = WorkerState::Terminated;
                return Err(WorkerError::Transport(err));
            }
        };
        self.dispatch(&message);
        Ok(true)
    }

    /// Count, process and log one received message.
    fn dispatch(&mut self, message: &Message) {
        self.stats.received += 1;
        match self.process(message) {
            Ok(()) => self.stats.dispatched += 1,
            Err(DispatchError::EmptyMessage) => {
                self.stats.skipped += 1;
                warn!(worker = %self.config.name, "empty message skipped");
            }
            Err(err) => {
                self.stats.failed += 1;
                warn!(
                    worker = %self.config.name,
                    frames = message.len(),
                    bytes = message.byte_len(),
                    error = %err,
                    "dispatch failed"
                );
            }
        }
        self.state = WorkerState::Idle;
    }

    /// Decode and dispatch one message without touching the transport.
    pub fn process(&mut self, message: &Message) -> std::result::Result<(), DispatchError> {
        self.state = WorkerState::Decoding;
        let envelope = Envelope::from_message(message)?;
        debug!(
            worker = %self.config.name,
            frames = envelope.frame_count(),
            manifest = %envelope.manifest(),
            "dispatching"
        );

        self.state = WorkerState::Dispatching;
        self.handler.handle(&envelope)
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Close the transport and return the final counters.
    ///
    /// A message the transport hands back while closing is dispatched
    /// before returning.
    pub fn close(mut self) -> Result<WorkerStats> {
        if let Some(message) = self.transport.close()? {
            debug!(worker = %self.config.name, "dispatching message received while closing");
            self.dispatch(&message);
        }
        Ok(self.stats)
    }

    pub fn into_parts(self) -> (T, H) {
        (self.transport, self.handler)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use zlmb_frame::FrameError;
    use zlmb_queue::QueueError;

    use super::*;

    /// Replays a fixed script of receive outcomes, then reports cancellation.
    #[derive(Default)]
    struct ScriptedTransport {
        script: VecDeque<std::result::Result<Message, QueueError>>,
        receives: usize,
        on_close: Option<Message>,
    }

    impl ScriptedTransport {
        fn with(script: Vec<std::result::Result<Message, QueueError>>) -> Self {
            Self {
                script: script.into(),
                ..Self::default()
            }
        }
    }

    impl EnvelopeTransport for ScriptedTransport {
        fn send(&mut self, _message: &Message) -> zlmb_queue::Result<()> {
            Err(QueueError::Protocol("scripted transport is receive-only".to_string()))
        }

        fn receive(&mut self) -> zlmb_queue::Result<Message> {
            self.receives += 1;
            self.script
                .pop_front()
                .unwrap_or_else(|| Err(QueueError::Disconnected("script exhausted".to_string())))
        }

        fn receive_until(&mut self, shutdown: &Shutdown) -> zlmb_queue::Result<Option<Message>> {
            if shutdown.is_triggered() || self.script.is_empty() {
                return Ok(None);
            }
            self.receive().map(Some)
        }

        fn close(&mut self) -> zlmb_queue::Result<Option<Message>> {
            Ok(self.on_close.take())
        }
    }

    #[derive(Default)]
    struct Recording {
        manifests: Vec<String>,
        lengths: Vec<usize>,
    }

    impl Handler for Recording {
        fn handle(&mut self, envelope: &Envelope) -> std::result::Result<(), DispatchError> {
            self.manifests.push(envelope.manifest().to_string());
            self.lengths.push(envelope.buffer_len());
            Ok(())
        }
    }

    fn msg(frames: &[&'static str]) -> Message {
        Message::from_frames(frames.iter().copied())
    }

    #[test]
    fn dispatches_in_order_until_cancelled() {
        let transport = ScriptedTransport::with(vec![
            Ok(msg(&["hello", "world"])),
            Ok(msg(&["a", "", "bcd"])),
        ]);
        let mut worker = WorkerLoop::new(transport, Recording::default());

        let stats = worker.run(&Shutdown::new()).unwrap();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.dispatched, 2);
        assert_eq!(worker.state(), WorkerState::Terminated);
        assert_eq!(worker.handler().manifests, ["5:5", "1:0:3"]);
        assert_eq!(worker.handler().lengths, [10, 4]);
    }

    #[test]
    fn empty_message_is_skipped_without_dispatch() {
        let transport = ScriptedTransport::with(vec![Ok(Message::new()), Ok(msg(&["after"]))]);
        let mut worker = WorkerLoop::new(transport, Recording::default());

        let stats = worker.run(&Shutdown::new()).unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.dispatched, 1);
        assert_eq!(worker.handler().manifests, ["5"]);
    }

    #[test]
    fn process_rejects_empty_message() {
        let mut calls = 0;
        let handler = |_: &Envelope| {
            calls += 1;
            Ok::<(), DispatchError>(())
        };
        let mut worker = WorkerLoop::new(ScriptedTransport::default(), handler);
        let err = worker.process(&Message::new()).unwrap_err();
        assert!(matches!(err, DispatchError::EmptyMessage));
        assert_eq!(worker.state(), WorkerState::Decoding);
        drop(worker);
        assert_eq!(calls, 0);
    }

    #[test]
    fn dispatch_failures_do_not_stop_the_loop() {
        let transport = ScriptedTransport::with(vec![
            Ok(msg(&["bad"])),
            Ok(msg(&["good"])),
            Ok(msg(&["bad"])),
        ]);
        let handler = |envelope: &Envelope| {
            if envelope.buffer().as_ref() == b"bad" {
                Err(DispatchError::Codec(FrameError::ManifestMismatch {
                    frames: 1,
                    declared: 3,
                    actual: 2,
                }))
            } else {
                Ok(())
            }
        };
        let mut worker = WorkerLoop::new(transport, handler);

        let stats = worker.run(&Shutdown::new()).unwrap();
        assert_eq!(stats.received, 3);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.dispatched, 1);
    }

    #[test]
    fn transport_error_terminates() {
        let transport = ScriptedTransport::with(vec![
            Ok(msg(&["one"])),
            Err(QueueError::Disconnected("reset".to_string())),
            Ok(msg(&["never"])),
        ]);
        let mut worker = WorkerLoop::new(transport, Recording::default());

        let err = worker.run(&Shutdown::new()).unwrap_err();
        assert!(matches!(
            err,
            WorkerError::Transport(QueueError::Disconnected(_))
        ));
        assert_eq!(worker.state(), WorkerState::Terminated);
        assert_eq!(worker.stats().dispatched, 1);

        let (transport, handler) = worker.into_parts();
        assert_eq!(transport.receives, 2);
        assert_eq!(handler.manifests, ["3"]);
    }

    #[test]
    fn triggered_shutdown_receives_nothing() {
        let transport = ScriptedTransport::with(vec![Ok(msg(&["pending"]))]);
        let shutdown = Shutdown::new();
        shutdown.trigger();

        let mut worker = WorkerLoop::new(transport, Recording::default());
        let stats = worker.run(&shutdown).unwrap();
        assert_eq!(stats, WorkerStats::default());

        let (transport, _) = worker.into_parts();
        assert_eq!(transport.receives, 0);
        assert_eq!(transport.script.len(), 1);
    }

    #[test]
    fn message_limit_stops_loop() {
        let transport = ScriptedTransport::with(vec![
            Ok(msg(&["1"])),
            Ok(msg(&["2"])),
            Ok(msg(&["3"])),
        ]);
        let config = WorkerConfig {
            max_messages: Some(2),
            ..WorkerConfig::default()
        };
        let mut worker = WorkerLoop::with_config(transport, Recording::default(), config);

        let stats = worker.run(&Shutdown::new()).unwrap();
        assert_eq!(stats.received, 2);

        let stats = worker.close().unwrap();
        assert_eq!(stats.dispatched, 2);
    }

    #[test]
    fn message_returned_on_close_is_dispatched() {
        let transport = ScriptedTransport {
            on_close: Some(msg(&["late", "!"])),
            ..ScriptedTransport::with(vec![Ok(msg(&["first"]))])
        };
        let mut worker = WorkerLoop::new(transport, Recording::default());
        let shutdown = Shutdown::new();
        assert!(worker.step(&shutdown).unwrap());
        shutdown.trigger();
        assert!(!worker.step(&shutdown).unwrap());

        let stats = worker.close().unwrap();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.dispatched, 2);
    }
}
