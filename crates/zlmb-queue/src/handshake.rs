use std::fmt;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;
use zlmb_frame::{kind_name, FrameError, PacketReader, PacketWriter, CONTROL};

use crate::control::ControlMessage;
use crate::error::{QueueError, Result};

const MAX_PROTOCOL_LEN: usize = 32;
const MAX_VERSION_LEN: usize = 16;
const MAX_PEER_ID_LEN: usize = 128;

/// Which side of the queue a connection serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Producer: sends messages into the queue.
    Push,
    /// Worker: receives messages from the queue.
    Pull,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Push => f.write_str("push"),
            Role::Pull => f.write_str("pull"),
        }
    }
}

/// Client handshake request sent as a CONTROL packet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Protocol name. Must be `zlmb` by default.
    pub protocol: String,
    /// Protocol version string.
    pub version: String,
    /// Role the client takes on this connection.
    pub role: Role,
}

/// Server handshake response sent as a CONTROL packet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// Protocol name. Must match request protocol.
    pub protocol: String,
    /// Negotiated protocol version.
    pub version: String,
    /// Opaque server-assigned peer identifier.
    pub peer_id: String,
}

/// Result of a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    /// Server-assigned peer identifier.
    pub peer_id: String,
    /// Negotiated protocol version.
    pub protocol_version: String,
    /// Role of the client side.
    pub role: Role,
}

/// Configuration for handshake negotiation.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Timeout for the whole exchange.
    pub timeout: Duration,
    /// Expected protocol name.
    pub protocol_name: String,
    /// Local protocol version.
    pub protocol_version: String,
    /// Maximum handshake packet payload size in bytes.
    pub max_handshake_payload: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            protocol_name: "zlmb".to_string(),
            protocol_version: "1.0".to_string(),
            max_handshake_payload: 16 * 1024,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ServerReply {
    Welcome(HandshakeResponse),
    Control(ControlMessage),
}

/// Perform client-side handshake using default configuration.
pub fn handshake_client<R: Read, W: Write>(
    reader: &mut PacketReader<R>,
    writer: &mut PacketWriter<W>,
    role: Role,
) -> Result<HandshakeResult> {
    handshake_client_with_config(reader, writer, role, &HandshakeConfig::default())
}

/// Perform client-side handshake using explicit configuration.
pub fn handshake_client_with_config<R: Read, W: Write>(
    reader: &mut PacketReader<R>,
    writer: &mut PacketWriter<W>,
    role: Role,
    config: &HandshakeConfig,
) -> Result<HandshakeResult> {
    validate_protocol_name(&config.protocol_name)?;
    validate_version(&config.protocol_version)?;

    let req = HandshakeRequest {
        protocol: config.protocol_name.clone(),
        version: config.protocol_version.clone(),
        role,
    };
    send_control_json(writer, &req)?;

    let deadline = Instant::now() + config.timeout;
    let payload = recv_control_payload(
        reader,
        deadline,
        config.timeout,
        config.max_handshake_payload,
    )?;

    let resp = match serde_json::from_slice::<ServerReply>(&payload) {
        Ok(ServerReply::Welcome(resp)) => resp,
        Ok(ServerReply::Control(control)) if control.is_reject() => {
            return Err(QueueError::HandshakeFailed(format!(
                "rejected by server: {}",
                control.reason.as_deref().unwrap_or("no reason given")
            )));
        }
        Ok(ServerReply::Control(control)) => {
            return Err(QueueError::HandshakeFailed(format!(
                "unexpected control message '{}' during handshake",
                control.msg_type
            )));
        }
        // Re-parse for a precise error message.
        Err(_) => serde_json::from_slice::<HandshakeResponse>(&payload)?,
    };

    validate_protocol_name(&resp.protocol)?;
    validate_version(&resp.version)?;
    validate_peer_id(&resp.peer_id)?;

    if resp.protocol != config.protocol_name {
        return Err(QueueError::HandshakeFailed(format!(
            "unknown protocol '{}' (expected '{}')",
            resp.protocol, config.protocol_name
        )));
    }

    if !is_version_compatible(&config.protocol_version, &resp.version)? {
        return Err(QueueError::HandshakeFailed(format!(
            "incompatible version '{}' (local '{}')",
            resp.version, config.protocol_version
        )));
    }

    debug!(peer_id = %resp.peer_id, %role, "handshake complete");
    Ok(HandshakeResult {
        peer_id: resp.peer_id,
        protocol_version: resp.version,
        role,
    })
}

/// Perform server-side handshake using default configuration.
pub fn handshake_server<R: Read, W: Write>(
    reader: &mut PacketReader<R>,
    writer: &mut PacketWriter<W>,
    peer_id: &str,
) -> Result<HandshakeResult> {
    handshake_server_with_config(reader, writer, peer_id, &HandshakeConfig::default())
}

/// Perform server-side handshake using explicit configuration.
///
/// Requests that parse but cannot be accepted are answered with a
/// `reject` CONTROL message before the error is returned.
pub fn handshake_server_with_config<R: Read, W: Write>(
    reader: &mut PacketReader<R>,
    writer: &mut PacketWriter<W>,
    peer_id: &str,
    config: &HandshakeConfig,
) -> Result<HandshakeResult> {
    validate_protocol_name(&config.protocol_name)?;
    validate_version(&config.protocol_version)?;
    validate_peer_id(peer_id)?;

    let deadline = Instant::now() + config.timeout;
    let payload = recv_control_payload(
        reader,
        deadline,
        config.timeout,
        config.max_handshake_payload,
    )?;
    let req: HandshakeRequest = serde_json::from_slice(&payload)?;

    if let Err(err) = check_request(&req, config) {
        let reason = match &err {
            QueueError::HandshakeFailed(reason) => reason.clone(),
            other => other.to_string(),
        };
        // Best effort: the client may already be gone.
        let _ = send_control_json(writer, &ControlMessage::reject(reason));
        return Err(err);
    }

    let resp = HandshakeResponse {
        protocol: config.protocol_name.clone(),
        version: config.protocol_version.clone(),
        peer_id: peer_id.to_string(),
    };
    send_control_json(writer, &resp)?;

    Ok(HandshakeResult {
        peer_id: peer_id.to_string(),
        protocol_version: config.protocol_version.clone(),
        role: req.role,
    })
}

fn check_request(req: &HandshakeRequest, config: &HandshakeConfig) -> Result<()> {
    validate_protocol_name(&req.protocol)?;
    validate_version(&req.version)?;

    if req.protocol != config.protocol_name {
        return Err(QueueError::HandshakeFailed(format!(
            "unknown protocol '{}' (expected '{}')",
            req.protocol, config.protocol_name
        )));
    }

    if !is_version_compatible(&req.version, &config.protocol_version)? {
        return Err(QueueError::HandshakeFailed(format!(
            "incompatible version '{}' (server '{}')",
            req.version, config.protocol_version
        )));
    }

    Ok(())
}

pub(crate) fn send_control_json<T: Serialize, W: Write>(
    writer: &mut PacketWriter<W>,
    value: &T,
) -> Result<()> {
    let payload = serde_json::to_vec(value)?;
    writer.send(CONTROL, &payload)?;
    Ok(())
}

fn recv_control_payload<R: Read>(
    reader: &mut PacketReader<R>,
    deadline: Instant,
    timeout: Duration,
    max_handshake_payload: usize,
) -> Result<Vec<u8>> {
    loop {
        if Instant::now() >= deadline {
            return Err(QueueError::Timeout(timeout));
        }

        match reader.read_packet() {
            Ok(packet) => {
                if packet.kind != CONTROL {
                    return Err(QueueError::HandshakeFailed(format!(
                        "expected CONTROL packet, got {}",
                        kind_name(packet.kind)
                    )));
                }
                if packet.payload.len() > max_handshake_payload {
                    return Err(QueueError::HandshakeFailed(format!(
                        "handshake payload too large: {} (max {})",
                        packet.payload.len(),
                        max_handshake_payload
                    )));
                }
                return Ok(packet.payload.to_vec());
            }
            Err(err) if err.is_timeout() => continue,
            Err(FrameError::ConnectionClosed) => {
                return Err(QueueError::Disconnected(
                    "connection closed during handshake".to_string(),
                ));
            }
            Err(err) => return Err(QueueError::Frame(err)),
        }
    }
}

/// Reject empty or oversized handshake fields before they are used.
fn check_len(field: &str, value: &str, max: usize) -> Result<()> {
    if value.is_empty() || value.len() > max {
        return Err(QueueError::HandshakeFailed(format!(
            "{field} must be 1..={max} bytes, got {}",
            value.len()
        )));
    }
    Ok(())
}

fn validate_protocol_name(protocol: &str) -> Result<()> {
    check_len("protocol name", protocol, MAX_PROTOCOL_LEN)
}

fn validate_version(version: &str) -> Result<()> {
    check_len("protocol version", version, MAX_VERSION_LEN)?;
    version.parse::<ProtocolVersion>().map(drop)
}

fn validate_peer_id(peer_id: &str) -> Result<()> {
    check_len("peer_id", peer_id, MAX_PEER_ID_LEN)
}

/// `<major>.<minor>`; a client may be ahead of the server by minor versions only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProtocolVersion {
    major: u16,
    minor: u16,
}

impl std::str::FromStr for ProtocolVersion {
    type Err = QueueError;

    fn from_str(input: &str) -> Result<Self> {
        let bad = || QueueError::HandshakeFailed(format!("malformed version '{input}'"));
        let (major, minor) = input.split_once('.').ok_or_else(bad)?;
        Ok(Self {
            major: major.parse().map_err(|_| bad())?,
            minor: minor.parse().map_err(|_| bad())?,
        })
    }
}

fn is_version_compatible(client_version: &str, server_version: &str) -> Result<bool> {
    let client: ProtocolVersion = client_version.parse()?;
    let server: ProtocolVersion = server_version.parse()?;
    Ok(client.major == server.major && client.minor >= server.minor)
}
