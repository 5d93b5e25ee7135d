use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, TransportError};

#[cfg(unix)]
const SUPPORTED_SCHEMES: &str = "tcp://, ipc://";
#[cfg(not(unix))]
const SUPPORTED_SCHEMES: &str = "tcp://";

/// A parsed connection string.
///
/// ```text
/// tcp://127.0.0.1:5560
/// ipc:///tmp/zlmb/queue.sock
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// TCP `host:port`.
    Tcp(String),
    /// Unix domain socket path.
    Ipc(PathBuf),
}

impl Endpoint {
    /// Parse a `scheme://address` connection string.
    pub fn parse(input: &str) -> Result<Self> {
        let (scheme, address) = input
            .split_once("://")
            .ok_or_else(|| invalid(input, "missing scheme separator '://'"))?;

        if address.is_empty() {
            return Err(invalid(input, "empty address"));
        }

        match scheme {
            "tcp" => {
                let (host, port) = address
                    .rsplit_once(':')
                    .ok_or_else(|| invalid(input, "expected host:port"))?;
                if host.is_empty() {
                    return Err(invalid(input, "empty host"));
                }
                port.parse::<u16>()
                    .map_err(|_| invalid(input, &format!("invalid port '{port}'")))?;
                Ok(Endpoint::Tcp(address.to_string()))
            }
            "ipc" if cfg!(unix) => Ok(Endpoint::Ipc(PathBuf::from(address))),
            other => Err(TransportError::UnsupportedScheme {
                scheme: other.to_string(),
                supported: SUPPORTED_SCHEMES,
            }),
        }
    }

    /// The scheme name without the separator.
    pub fn scheme(&self) -> &'static str {
        match self {
            Endpoint::Tcp(_) => "tcp",
            Endpoint::Ipc(_) => "ipc",
        }
    }

    /// Socket path for `ipc://` endpoints.
    pub fn ipc_path(&self) -> Option<&Path> {
        match self {
            Endpoint::Ipc(path) => Some(path),
            Endpoint::Tcp(_) => None,
        }
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(address) => write!(f, "tcp://{address}"),
            Endpoint::Ipc(path) => write!(f, "ipc://{}", path.display()),
        }
    }
}

fn invalid(endpoint: &str, reason: &str) -> TransportError {
    TransportError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_endpoint() {
        let endpoint = Endpoint::parse("tcp://127.0.0.1:5560").unwrap();
        assert_eq!(endpoint, Endpoint::Tcp("127.0.0.1:5560".to_string()));
        assert_eq!(endpoint.scheme(), "tcp");
        assert_eq!(endpoint.to_string(), "tcp://127.0.0.1:5560");
    }

    #[test]
    #[cfg(unix)]
    fn parses_ipc_endpoint() {
        let endpoint: Endpoint = "ipc:///tmp/zlmb.sock".parse().unwrap();
        assert_eq!(endpoint.ipc_path(), Some(Path::new("/tmp/zlmb.sock")));
        assert_eq!(endpoint.to_string(), "ipc:///tmp/zlmb.sock");
    }

    #[test]
    fn rejects_missing_scheme() {
        let err = Endpoint::parse("127.0.0.1:5560").unwrap_err();
        assert!(matches!(err, TransportError::InvalidEndpoint { .. }));
    }

    #[test]
    fn rejects_bad_port() {
        assert!(matches!(
            Endpoint::parse("tcp://localhost:http"),
            Err(TransportError::InvalidEndpoint { .. })
        ));
        assert!(matches!(
            Endpoint::parse("tcp://localhost"),
            Err(TransportError::InvalidEndpoint { .. })
        ));
        assert!(matches!(
            Endpoint::parse("tcp://:5560"),
            Err(TransportError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn rejects_unknown_scheme() {
        let err = Endpoint::parse("pgm://eth0;239.192.1.1:5555").unwrap_err();
        match err {
            TransportError::UnsupportedScheme { scheme, .. } => assert_eq!(scheme, "pgm"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_empty_address() {
        assert!(matches!(
            Endpoint::parse("ipc://"),
            Err(TransportError::InvalidEndpoint { .. })
        ));
    }
}
