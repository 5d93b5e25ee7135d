//! Push/pull work queue for zlmb.
//!
//! Producers connect with [`Role::Push`] and send whole multipart messages;
//! workers connect with [`Role::Pull`] and receive them one at a time. A
//! [`Broker`] sits in between and holds a bounded FIFO. Each message goes to
//! exactly one worker (competing consumers).

pub mod broker;
pub mod control;
pub mod error;
pub mod handshake;
pub mod queue;
pub mod shutdown;
pub mod socket;

pub use broker::{Broker, BrokerConfig, BrokerStats};
pub use control::{ControlMessage, CONTROL_BYE, CONTROL_REJECT};
pub use error::{QueueError, Result};
pub use handshake::{
    handshake_client, handshake_client_with_config, handshake_server, handshake_server_with_config,
    HandshakeConfig, HandshakeRequest, HandshakeResponse, HandshakeResult, Role,
};
pub use queue::{MessageQueue, DEFAULT_CAPACITY};
pub use shutdown::Shutdown;
pub use socket::{EnvelopeTransport, QueueSocket, SocketConfig};
