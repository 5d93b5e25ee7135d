use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};
use zlmb_frame::{
    decode_message, kind_name, FrameError, Message, Packet, PacketConfig, PacketReader,
    PacketWriter, CANCEL, CANCELLED, CONTROL, MESSAGE, READY,
};
use zlmb_transport::{Endpoint, TransportStream};

use crate::control::ControlMessage;
use crate::error::{QueueError, Result};
use crate::handshake::{handshake_client_with_config, send_control_json, HandshakeConfig, Role};
use crate::shutdown::Shutdown;

/// Delivers and receives whole multipart messages over a queue.
///
/// A message is handed over atomically: `receive` yields every frame that
/// was sent, in order, or fails.
pub trait EnvelopeTransport {
    /// Send one message (producer side).
    fn send(&mut self, message: &Message) -> Result<()>;

    /// Block until the next message arrives.
    fn receive(&mut self) -> Result<Message>;

    /// Like [`receive`](Self::receive), but gives up once `shutdown` fires.
    ///
    /// Returns `Ok(None)` when cancelled. A message that was already on its
    /// way when the cancellation happened is returned rather than dropped.
    fn receive_until(&mut self, shutdown: &Shutdown) -> Result<Option<Message>> {
        if shutdown.is_triggered() {
            return Ok(None);
        }
        self.receive().map(Some)
    }

    /// Close the connection. Further calls fail.
    ///
    /// A message that arrived while an outstanding receive was being
    /// withdrawn is returned; the caller owns it from then on.
    fn close(&mut self) -> Result<Option<Message>>;
}

/// Configuration for a [`QueueSocket`].
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Handshake negotiation settings.
    pub handshake: HandshakeConfig,
    /// Packet limits and runtime socket timeouts.
    pub packet: PacketConfig,
    /// How often a cancellable receive checks its shutdown signal.
    pub poll_interval: Duration,
    /// How long to wait for the broker to answer a `CANCEL`.
    pub cancel_timeout: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            handshake: HandshakeConfig::default(),
            packet: PacketConfig::default(),
            poll_interval: Duration::from_millis(100),
            cancel_timeout: Duration::from_secs(5),
        }
    }
}

/// A client connection to a broker, in either the push or pull role.
///
/// Pull sockets use credit-based delivery: each receive sends one `READY`
/// and the broker answers with exactly one `MESSAGE`, or with `CANCELLED`
/// if the credit is withdrawn before a message was dispatched.
pub struct QueueSocket {
    reader: PacketReader<TransportStream>,
    writer: PacketWriter<TransportStream>,
    role: Role,
    peer_id: String,
    endpoint: Endpoint,
    config: SocketConfig,
    credit: bool,
    closed: bool,
}

impl QueueSocket {
    /// Connect to a broker with default configuration.
    pub fn connect(endpoint: &Endpoint, role: Role) -> Result<Self> {
        Self::connect_with_config(endpoint, role, SocketConfig::default())
    }

    /// Connect with explicit configuration.
    pub fn connect_with_config(
        endpoint: &Endpoint,
        role: Role,
        config: SocketConfig,
    ) -> Result<Self> {
        let stream = zlmb_transport::connect(endpoint)?;
        let reader_stream = stream.try_clone()?;

        let mut reader = PacketReader::with_config(reader_stream, config.packet.clone());
        let mut writer = PacketWriter::with_config(stream, config.packet.clone());

        // Socket timeouts are shared by both halves.
        let timeout = Some(config.handshake.timeout);
        writer.get_ref().set_read_timeout(timeout)?;
        writer.get_ref().set_write_timeout(timeout)?;

        let handshake =
            handshake_client_with_config(&mut reader, &mut writer, role, &config.handshake)?;

        reader.set_read_timeout(config.packet.read_timeout)?;
        writer.get_ref().set_write_timeout(config.packet.write_timeout)?;

        debug!(%endpoint, %role, peer_id = %handshake.peer_id, "queue socket connected");
        Ok(Self {
            reader,
            writer,
            role,
            peer_id: handshake.peer_id,
            endpoint: endpoint.clone(),
            config,
            credit: false,
            closed: false,
        })
    }

    /// Role negotiated for this connection.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Identifier the broker assigned to this connection.
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Endpoint this socket is connected to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn require(&self, role: Role, operation: &'static str) -> Result<()> {
        if self.closed {
            return Err(QueueError::Disconnected("socket is closed".to_string()));
        }
        if self.role != role {
            return Err(QueueError::WrongRole {
                role: self.role,
                operation,
            });
        }
        Ok(())
    }

    fn request_credit(&mut self) -> Result<()> {
        if !self.credit {
            self.writer.send(READY, b"")?;
            self.credit = true;
        }
        Ok(())
    }

    /// Handle a packet while a credit is outstanding.
    fn on_packet(&mut self, packet: Packet) -> Result<Option<Message>> {
        match packet.kind {
            MESSAGE => {
                self.credit = false;
                let message = decode_message(packet.payload)?;
                trace!(frames = message.len(), bytes = message.byte_len(), "message received");
                Ok(Some(message))
            }
            CONTROL => match serde_json::from_slice::<ControlMessage>(&packet.payload) {
                Ok(control) if control.is_bye() => Err(QueueError::Disconnected(
                    "broker closed the connection".to_string(),
                )),
                _ => Err(QueueError::Protocol(
                    "unexpected CONTROL packet after handshake".to_string(),
                )),
            },
            other => Err(QueueError::Protocol(format!(
                "unexpected {} packet while waiting for a message",
                kind_name(other)
            ))),
        }
    }

    fn read_error(err: FrameError) -> QueueError {
        match err {
            FrameError::ConnectionClosed => {
                QueueError::Disconnected("broker closed the connection".to_string())
            }
            other => QueueError::Frame(other),
        }
    }

    fn poll_until(&mut self, shutdown: &Shutdown) -> Result<Option<Message>> {
        loop {
            match self.reader.read_packet() {
                Ok(packet) => {
                    if let Some(message) = self.on_packet(packet)? {
                        return Ok(Some(message));
                    }
                }
                Err(err) if err.is_timeout() => {
                    if shutdown.is_triggered() {
                        return self.cancel_credit();
                    }
                }
                Err(err) => return Err(Self::read_error(err)),
            }
        }
    }

    /// Withdraw the outstanding credit.
    ///
    /// The broker answers with either the message it already dispatched or
    /// `CANCELLED`, never both.
    fn cancel_credit(&mut self) -> Result<Option<Message>> {
        debug!(peer_id = %self.peer_id, "cancelling outstanding receive");
        self.writer.send(CANCEL, b"")?;

        let deadline = Instant::now() + self.config.cancel_timeout;
        loop {
            match self.reader.read_packet() {
                Ok(packet) if packet.kind == CANCELLED => {
                    self.credit = false;
                    return Ok(None);
                }
                Ok(packet) => {
                    if let Some(message) = self.on_packet(packet)? {
                        return Ok(Some(message));
                    }
                }
                Err(err) if err.is_timeout() => {
                    if Instant::now() >= deadline {
                        return Err(QueueError::Timeout(self.config.cancel_timeout));
                    }
                }
                Err(err) => return Err(Self::read_error(err)),
            }
        }
    }
}

impl EnvelopeTransport for QueueSocket {
    fn send(&mut self, message: &Message) -> Result<()> {
        self.require(Role::Push, "send")?;
        self.writer.send_message(MESSAGE, message)?;
        trace!(frames = message.len(), bytes = message.byte_len(), "message sent");
        Ok(())
    }

    fn receive(&mut self) -> Result<Message> {
        self.require(Role::Pull, "receive")?;
        self.request_credit()?;
        loop {
            let packet = self.reader.read_packet().map_err(Self::read_error)?;
            if let Some(message) = self.on_packet(packet)? {
                return Ok(message);
            }
        }
    }

    fn receive_until(&mut self, shutdown: &Shutdown) -> Result<Option<Message>> {
        self.require(Role::Pull, "receive")?;
        if shutdown.is_triggered() && !self.credit {
            return Ok(None);
        }
        self.request_credit()?;

        self.reader.set_read_timeout(Some(self.config.poll_interval))?;
        let result = self.poll_until(shutdown);
        let restored = self.reader.set_read_timeout(self.config.packet.read_timeout);
        let message = result?;
        restored?;
        Ok(message)
    }

    fn close(&mut self) -> Result<Option<Message>> {
        if self.closed {
            return Ok(None);
        }
        let mut pending = None;
        if self.credit {
            self.reader.set_read_timeout(Some(self.config.poll_interval))?;
            pending = self.cancel_credit()?;
            if let Some(message) = &pending {
                debug!(frames = message.len(), "message arrived while closing");
            }
        }
        send_control_json(&mut self.writer, &ControlMessage::bye())?;
        self.closed = true;
        self.writer.get_ref().shutdown()?;
        debug!(peer_id = %self.peer_id, "queue socket closed");
        Ok(pending)
    }
}

impl Drop for QueueSocket {
    fn drop(&mut self) {
        if !self.closed {
            if let Ok(Some(message)) = self.close() {
                warn!(
                    peer_id = %self.peer_id,
                    frames = message.len(),
                    "socket dropped with a delivered message; it was not processed"
                );
            }
        }
    }
}
