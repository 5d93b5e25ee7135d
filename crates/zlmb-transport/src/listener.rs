use std::net::{TcpListener, TcpStream};

use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::traits::TransportStream;
#[cfg(unix)]
use crate::uds::UnixDomainSocket;

/// A bound listener for any supported endpoint scheme.
pub struct EndpointListener {
    inner: ListenerInner,
    endpoint: Endpoint,
}

enum ListenerInner {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixDomainSocket),
}

impl EndpointListener {
    /// Bind to an endpoint.
    ///
    /// For `tcp://` endpoints with port 0 the returned listener's
    /// [`endpoint`](Self::endpoint) carries the port actually assigned.
    pub fn bind(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            Endpoint::Tcp(address) => {
                let listener =
                    TcpListener::bind(address.as_str()).map_err(|source| TransportError::Bind {
                        address: address.clone(),
                        source,
                    })?;
                let local = listener.local_addr()?;
                info!(%local, "listening on tcp");
                Ok(Self {
                    inner: ListenerInner::Tcp(listener),
                    endpoint: Endpoint::Tcp(local.to_string()),
                })
            }
            #[cfg(unix)]
            Endpoint::Ipc(path) => Ok(Self {
                inner: ListenerInner::Unix(UnixDomainSocket::bind(path)?),
                endpoint: endpoint.clone(),
            }),
            #[cfg(not(unix))]
            Endpoint::Ipc(_) => Err(TransportError::UnsupportedScheme {
                scheme: "ipc".to_string(),
                supported: "tcp://",
            }),
        }
    }

    /// Accept the next connection.
    pub fn accept(&self) -> Result<TransportStream> {
        match &self.inner {
            ListenerInner::Tcp(listener) => {
                let (stream, addr) = listener.accept().map_err(TransportError::Accept)?;
                stream.set_nonblocking(false)?;
                stream.set_nodelay(true)?;
                debug!(%addr, "accepted tcp connection");
                Ok(TransportStream::from_tcp(stream))
            }
            #[cfg(unix)]
            ListenerInner::Unix(socket) => socket.accept(),
        }
    }

    /// Make `accept` return `WouldBlock` instead of waiting.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        match &self.inner {
            ListenerInner::Tcp(listener) => listener.set_nonblocking(nonblocking)?,
            #[cfg(unix)]
            ListenerInner::Unix(socket) => socket.set_nonblocking(nonblocking)?,
        }
        Ok(())
    }

    /// The endpoint this listener is bound to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

/// Connect to a listening endpoint.
pub fn connect(endpoint: &Endpoint) -> Result<TransportStream> {
    match endpoint {
        Endpoint::Tcp(address) => {
            let stream =
                TcpStream::connect(address.as_str()).map_err(|source| TransportError::Connect {
                    address: address.clone(),
                    source,
                })?;
            stream.set_nodelay(true)?;
            debug!(%address, "connected over tcp");
            Ok(TransportStream::from_tcp(stream))
        }
        #[cfg(unix)]
        Endpoint::Ipc(path) => UnixDomainSocket::connect(path),
        #[cfg(not(unix))]
        Endpoint::Ipc(_) => Err(TransportError::UnsupportedScheme {
            scheme: "ipc".to_string(),
            supported: "tcp://",
        }),
    }
}
