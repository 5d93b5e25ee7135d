use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, trace, warn};
use zlmb_frame::{
    decode_message, kind_name, FrameError, Message, Packet, PacketConfig, PacketReader,
    PacketWriter, CANCEL, CANCELLED, CONTROL, MESSAGE, READY,
};
use zlmb_transport::{Endpoint, EndpointListener, TransportError, TransportStream};

use crate::control::ControlMessage;
use crate::error::{QueueError, Result};
use crate::handshake::{handshake_server_with_config, HandshakeConfig, Role};
use crate::queue::{MessageQueue, DEFAULT_CAPACITY};
use crate::shutdown::Shutdown;

/// Configuration for a [`Broker`].
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Messages held before pushers block.
    pub capacity: usize,
    /// Granularity of shutdown checks and queue waits.
    pub tick: Duration,
    /// Handshake negotiation settings.
    pub handshake: HandshakeConfig,
    /// Packet limits; `write_timeout` bounds delivery to a stalled worker.
    pub packet: PacketConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            tick: Duration::from_millis(50),
            handshake: HandshakeConfig::default(),
            packet: PacketConfig {
                write_timeout: Some(Duration::from_secs(5)),
                ..PacketConfig::default()
            },
        }
    }
}

/// Counters reported by [`Broker::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    /// Connections that completed the handshake.
    pub connections: u64,
    /// Messages accepted from push peers.
    pub received: u64,
    /// Messages written to pull peers.
    pub delivered: u64,
    /// Messages put back after a failed delivery.
    pub requeued: u64,
    /// Messages waiting in the queue.
    pub pending: usize,
}

#[derive(Default)]
struct Counters {
    connections: AtomicU64,
    received: AtomicU64,
    delivered: AtomicU64,
    requeued: AtomicU64,
}

/// A minimal push/pull broker: one bounded FIFO, one thread per connection.
pub struct Broker {
    listener: EndpointListener,
    queue: MessageQueue,
    config: BrokerConfig,
    counters: Counters,
    next_peer_id: AtomicU64,
}

impl Broker {
    /// Bind to an endpoint with default configuration.
    pub fn bind(endpoint: &Endpoint) -> Result<Self> {
        Self::bind_with_config(endpoint, BrokerConfig::default())
    }

    /// Bind with explicit configuration.
    pub fn bind_with_config(endpoint: &Endpoint, config: BrokerConfig) -> Result<Self> {
        let listener = EndpointListener::bind(endpoint)?;
        Ok(Self {
            listener,
            queue: MessageQueue::new(config.capacity),
            config,
            counters: Counters::default(),
            next_peer_id: AtomicU64::new(1),
        })
    }

    /// Endpoint actually bound (resolved port for `tcp://host:0`).
    pub fn endpoint(&self) -> &Endpoint {
        self.listener.endpoint()
    }

    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            connections: self.counters.connections.load(Ordering::Relaxed),
            received: self.counters.received.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            requeued: self.counters.requeued.load(Ordering::Relaxed),
            pending: self.queue.len(),
        }
    }

    /// Accept and serve connections until `shutdown` fires.
    ///
    /// Returns once every connection thread has finished. Messages still
    /// queued at that point are dropped and counted in `pending`.
    pub fn run(&self, shutdown: &Shutdown) -> Result<BrokerStats> {
        self.listener.set_nonblocking(true)?;
        info!(
            endpoint = %self.endpoint(),
            capacity = self.queue.capacity(),
            "broker running"
        );

        thread::scope(|scope| {
            while !shutdown.is_triggered() {
                match self.listener.accept() {
                    Ok(stream) => {
                        let id = self.next_peer_id.fetch_add(1, Ordering::Relaxed);
                        let peer_id = format!("peer-{id}");
                        scope.spawn(move || self.serve(stream, &peer_id, shutdown));
                    }
                    Err(err) if is_would_block(&err) => thread::sleep(self.config.tick),
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        thread::sleep(self.config.tick);
                    }
                }
            }
        });

        let stats = self.stats();
        if stats.pending > 0 {
            warn!(pending = stats.pending, "broker stopped with undelivered messages");
        }
        info!(
            received = stats.received,
            delivered = stats.delivered,
            "broker stopped"
        );
        Ok(stats)
    }

    fn serve(&self, stream: TransportStream, peer_id: &str, shutdown: &Shutdown) {
        let peer = stream.peer_label();
        match self.serve_connection(stream, peer_id, shutdown) {
            Ok(()) => debug!(peer_id, %peer, "connection closed"),
            Err(QueueError::Disconnected(reason)) => debug!(peer_id, %peer, %reason, "peer gone"),
            Err(err) => warn!(peer_id, %peer, error = %err, "connection failed"),
        }
    }

    fn serve_connection(
        &self,
        stream: TransportStream,
        peer_id: &str,
        shutdown: &Shutdown,
    ) -> Result<()> {
        let reader_stream = stream.try_clone()?;
        let mut reader = PacketReader::with_config(reader_stream, self.config.packet.clone());
        let mut writer = PacketWriter::with_config(stream, self.config.packet.clone());

        let timeout = Some(self.config.handshake.timeout);
        reader.set_read_timeout(timeout)?;
        writer.get_ref().set_write_timeout(timeout)?;
        let handshake = handshake_server_with_config(
            &mut reader,
            &mut writer,
            peer_id,
            &self.config.handshake,
        )?;

        self.counters.connections.fetch_add(1, Ordering::Relaxed);
        info!(peer_id, role = %handshake.role, "peer connected");

        // Short reads let every connection notice shutdown.
        reader.set_read_timeout(Some(self.config.tick))?;
        writer
            .get_ref()
            .set_write_timeout(self.config.packet.write_timeout)?;

        match handshake.role {
            Role::Push => self.serve_pusher(&mut reader, shutdown),
            Role::Pull => self.serve_puller(&mut reader, &mut writer, peer_id, shutdown),
        }
    }

    fn serve_pusher(
        &self,
        reader: &mut PacketReader<TransportStream>,
        shutdown: &Shutdown,
    ) -> Result<()> {
        while let Some(packet) = next_packet(reader, shutdown)? {
            match packet.kind {
                MESSAGE => {
                    let message = decode_message(packet.payload)?;
                    self.enqueue(message, shutdown);
                }
                CONTROL if is_bye(&packet) => return Ok(()),
                other => {
                    return Err(QueueError::Protocol(format!(
                        "unexpected {} packet from push peer",
                        kind_name(other)
                    )));
                }
            }
        }
        Ok(())
    }

    fn enqueue(&self, message: Message, shutdown: &Shutdown) {
        let frames = message.len();
        let mut pending = message;
        loop {
            match self.queue.push_timeout(pending, self.config.tick) {
                Ok(()) => {
                    self.counters.received.fetch_add(1, Ordering::Relaxed);
                    trace!(frames, depth = self.queue.len(), "message queued");
                    return;
                }
                Err(message) if shutdown.is_triggered() => {
                    warn!(frames = message.len(), "queue full at shutdown; message dropped");
                    return;
                }
                Err(message) => pending = message,
            }
        }
    }

    fn serve_puller(
        &self,
        reader: &mut PacketReader<TransportStream>,
        writer: &mut PacketWriter<TransportStream>,
        peer_id: &str,
        shutdown: &Shutdown,
    ) -> Result<()> {
        while let Some(packet) = next_packet(reader, shutdown)? {
            match packet.kind {
                READY => {
                    if !self.serve_credit(reader, writer, peer_id, shutdown)? {
                        return Ok(());
                    }
                }
                // The credit it withdrew was already answered with a MESSAGE.
                CANCEL => continue,
                CONTROL if is_bye(&packet) => return Ok(()),
                other => {
                    return Err(QueueError::Protocol(format!(
                        "unexpected {} packet from pull peer",
                        kind_name(other)
                    )));
                }
            }
        }
        Ok(())
    }

    /// Answer one READY with a MESSAGE, or with CANCELLED if the peer
    /// withdraws it first. Returns `false` when the connection should end.
    fn serve_credit(
        &self,
        reader: &mut PacketReader<TransportStream>,
        writer: &mut PacketWriter<TransportStream>,
        peer_id: &str,
        shutdown: &Shutdown,
    ) -> Result<bool> {
        loop {
            if shutdown.is_triggered() {
                return Ok(false);
            }

            if let Some(message) = self.queue.pop_timeout(self.config.tick) {
                if let Err(err) = writer.send_message(MESSAGE, &message) {
                    self.queue.requeue_front(message);
                    self.counters.requeued.fetch_add(1, Ordering::Relaxed);
                    return Err(err.into());
                }
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                trace!(peer_id, frames = message.len(), "message delivered");
                return Ok(true);
            }

            match reader.read_packet() {
                Ok(packet) if packet.kind == CANCEL => {
                    writer.send(CANCELLED, b"")?;
                    debug!(peer_id, "credit cancelled");
                    return Ok(true);
                }
                Ok(packet) if packet.kind == CONTROL && is_bye(&packet) => return Ok(false),
                Ok(packet) => {
                    return Err(QueueError::Protocol(format!(
                        "unexpected {} packet while a READY is pending",
                        kind_name(packet.kind)
                    )));
                }
                Err(err) if err.is_timeout() => {}
                Err(err) => return Err(disconnect_or_frame(err)),
            }
        }
    }
}

/// Next packet from a peer, or `None` once shutdown fires.
fn next_packet(
    reader: &mut PacketReader<TransportStream>,
    shutdown: &Shutdown,
) -> Result<Option<Packet>> {
    loop {
        if shutdown.is_triggered() {
            return Ok(None);
        }
        match reader.read_packet() {
            Ok(packet) => return Ok(Some(packet)),
            Err(err) if err.is_timeout() => continue,
            Err(err) => return Err(disconnect_or_frame(err)),
        }
    }
}

fn disconnect_or_frame(err: FrameError) -> QueueError {
    match err {
        FrameError::ConnectionClosed => {
            QueueError::Disconnected("connection closed without bye".to_string())
        }
        other => QueueError::Frame(other),
    }
}

fn is_bye(packet: &Packet) -> bool {
    serde_json::from_slice::<ControlMessage>(&packet.payload)
        .map(|control| control.is_bye())
        .unwrap_or(false)
}

fn is_would_block(err: &TransportError) -> bool {
    err.io_source()
        .is_some_and(|io| io.kind() == std::io::ErrorKind::WouldBlock)
}
