//! Transport seam: non-blocking send/receive of opaque frames, plus the built-in
//! `inproc://` and `tcp://` transports.

mod context;
mod inproc;
mod tcp;

use std::fmt;
use std::str::FromStr;

pub use context::Context;
pub use inproc::InprocTransport;
pub use tcp::TcpTransport;

use crate::error::Error;
use crate::pattern::Role;

/// Outcome of one non-blocking send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Sent,
    NotReady,
}

/// A point-to-point frame transport. Every call must return without blocking.
pub trait Transport: Send {
    /// Try to hand one frame to the transport.
    fn try_send(&mut self, frame: &[u8]) -> Result<SendStatus, TransportError>;
    /// Try to take one complete frame. `Ok(None)` means nothing is ready yet.
    fn try_recv(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
    /// Release the underlying resources. Further calls report `Disconnected`.
    fn close(&mut self);

    /// Concrete address actually bound, when it differs from what was asked (e.g. port 0).
    fn local_endpoint(&self) -> Option<Endpoint> {
        None
    }
}

/// Transport failure other than "not ready".
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("peer disconnected")]
    Disconnected,
    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),
}

/// Parsed endpoint address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `tcp://host:port`; `*` as host means every interface.
    Tcp { host: String, port: u16 },
    /// `inproc://name`, brokered by a [`Context`].
    Inproc(String),
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidEndpoint(s.to_string());
        let (scheme, rest) = s.split_once("://").ok_or_else(invalid)?;
        match scheme {
            "tcp" => {
                let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
                let host = host.trim_start_matches('[').trim_end_matches(']');
                if host.is_empty() {
                    return Err(invalid());
                }
                let port = port.parse::<u16>().map_err(|_| invalid())?;
                Ok(Endpoint::Tcp {
                    host: host.to_string(),
                    port,
                })
            }
            "inproc" if !rest.is_empty() => Ok(Endpoint::Inproc(rest.to_string())),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } if host.contains(':') => {
                write!(f, "tcp://[{host}]:{port}")
            }
            Endpoint::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Endpoint::Inproc(name) => write!(f, "inproc://{name}"),
        }
    }
}

/// Transport tuning shared by the built-in transports.
#[derive(Debug, Clone, Copy)]
pub struct TransportOptions {
    /// Frames buffered per direction before sends report not-ready (inproc).
    pub send_hwm: usize,
    /// Largest frame accepted on the wire (tcp).
    pub max_frame_len: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            send_hwm: 1000,
            max_frame_len: crate::envelope::MAX_ENVELOPE_LEN,
        }
    }
}

/// Create the transport for `endpoint`: bind for a server, connect for a client.
pub(crate) fn open(
    endpoint: &Endpoint,
    role: Role,
    context: &Context,
    options: TransportOptions,
) -> Result<Box<dyn Transport>, Error> {
    if context.is_terminated() {
        return Err(Error::Configuration("context has been shut down".into()));
    }
    match (endpoint, role) {
        (Endpoint::Inproc(name), Role::Server) => Ok(Box::new(InprocTransport::bind(
            context,
            name,
            options.send_hwm,
        )?)),
        (Endpoint::Inproc(name), Role::Client) => {
            Ok(Box::new(InprocTransport::connect(context, name)))
        }
        (Endpoint::Tcp { host, port }, Role::Server) => {
            let t = TcpTransport::bind(host, *port, options.max_frame_len).map_err(|source| {
                Error::Bind {
                    endpoint: endpoint.to_string(),
                    source,
                }
            })?;
            Ok(Box::new(t))
        }
        (Endpoint::Tcp { host, port }, Role::Client) => {
            let t = TcpTransport::connect(host, *port, options.max_frame_len)
                .map_err(|_| Error::InvalidEndpoint(endpoint.to_string()))?;
            Ok(Box::new(t))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tcp() {
        let e: Endpoint = "tcp://127.0.0.1:5555".parse().unwrap();
        assert_eq!(
            e,
            Endpoint::Tcp {
                host: "127.0.0.1".into(),
                port: 5555
            }
        );
        assert_eq!(e.to_string(), "tcp://127.0.0.1:5555");
    }

    #[test]
    fn parse_tcp_ipv6_and_wildcard() {
        let e: Endpoint = "tcp://[::1]:80".parse().unwrap();
        assert_eq!(
            e,
            Endpoint::Tcp {
                host: "::1".into(),
                port: 80
            }
        );
        assert_eq!(e.to_string(), "tcp://[::1]:80");
        let w: Endpoint = "tcp://*:7000".parse().unwrap();
        assert!(matches!(w, Endpoint::Tcp { ref host, port: 7000 } if host == "*"));
    }

    #[test]
    fn parse_inproc() {
        let e: Endpoint = "inproc://bus".parse().unwrap();
        assert_eq!(e, Endpoint::Inproc("bus".into()));
        assert_eq!(e.to_string(), "inproc://bus");
    }

    #[test]
    fn reject_malformed() {
        for bad in [
            "",
            "127.0.0.1:5555",
            "udp://127.0.0.1:1",
            "tcp://127.0.0.1",
            "tcp://:5555",
            "tcp://host:99999",
            "tcp://host:port",
            "inproc://",
        ] {
            assert!(
                matches!(bad.parse::<Endpoint>(), Err(Error::InvalidEndpoint(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}
