//! In-process transport: two bounded channels per binding, brokered by a [`Context`].

use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use parking_lot::Mutex;
use tracing::info;

use super::{Context, SendStatus, Transport, TransportError};
use crate::error::Error;

type Ends = (Sender<Vec<u8>>, Receiver<Vec<u8>>);

/// A bound inproc name. Holds the client's channel ends until one client claims them.
pub(crate) struct Binding {
    client_end: Mutex<Option<Ends>>,
    server_end: Mutex<Option<Ends>>,
}

impl Binding {
    pub(crate) fn new(hwm: usize) -> Arc<Self> {
        let hwm = hwm.max(1);
        let (to_client_tx, to_client_rx) = bounded(hwm);
        let (to_server_tx, to_server_rx) = bounded(hwm);
        Arc::new(Self {
            client_end: Mutex::new(Some((to_server_tx, to_client_rx))),
            server_end: Mutex::new(Some((to_client_tx, to_server_rx))),
        })
    }

    fn claim_client(&self) -> Option<Ends> {
        self.client_end.lock().take()
    }

    fn claim_server(&self) -> Option<Ends> {
        self.server_end.lock().take()
    }

    fn is_claimed(&self) -> bool {
        self.client_end.lock().is_none()
    }
}

enum Side {
    Server { binding: Arc<Binding>, ends: Ends },
    Client(Option<Ends>),
    Closed,
}

/// One end of an `inproc://` connection.
pub struct InprocTransport {
    name: String,
    context: Context,
    side: Side,
}

impl InprocTransport {
    /// Bind `name` in `context`. Binding a name twice is a configuration error.
    pub fn bind(context: &Context, name: &str, hwm: usize) -> Result<Self, Error> {
        let binding = Binding::new(hwm);
        let ends = binding
            .claim_server()
            .ok_or_else(|| Error::Configuration(format!("inproc://{name} unavailable")))?;
        if !context.bind(name, binding.clone()) {
            return Err(Error::Configuration(format!(
                "inproc://{name} already bound or context shut down"
            )));
        }
        info!(endpoint = %format!("inproc://{name}"), "bound");
        Ok(Self {
            name: name.to_string(),
            context: context.clone(),
            side: Side::Server { binding, ends },
        })
    }

    /// Connect to `name` lazily: until a server binds it, every call is not-ready.
    pub fn connect(context: &Context, name: &str) -> Self {
        let mut t = Self {
            name: name.to_string(),
            context: context.clone(),
            side: Side::Client(None),
        };
        t.try_connect();
        t
    }

    pub fn is_connected(&self) -> bool {
        match &self.side {
            Side::Server { binding, .. } => binding.is_claimed(),
            Side::Client(ends) => ends.is_some(),
            Side::Closed => false,
        }
    }

    fn try_connect(&mut self) {
        if let Side::Client(slot @ None) = &mut self.side {
            if let Some(ends) = self.context.lookup(&self.name).and_then(|b| b.claim_client()) {
                info!(endpoint = %format!("inproc://{}", self.name), "connected");
                *slot = Some(ends);
            }
        }
    }
}

impl Transport for InprocTransport {
    fn try_send(&mut self, frame: &[u8]) -> Result<SendStatus, TransportError> {
        self.try_connect();
        let tx = match &self.side {
            Side::Server { binding, ends } if binding.is_claimed() => &ends.0,
            Side::Server { .. } | Side::Client(None) => return Ok(SendStatus::NotReady),
            Side::Client(Some(ends)) => &ends.0,
            Side::Closed => return Err(TransportError::Disconnected),
        };
        match tx.try_send(frame.to_vec()) {
            Ok(()) => Ok(SendStatus::Sent),
            Err(TrySendError::Full(_)) => Ok(SendStatus::NotReady),
            Err(TrySendError::Disconnected(_)) => Err(TransportError::Disconnected),
        }
    }

    fn try_recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        self.try_connect();
        let rx = match &self.side {
            Side::Server { ends, .. } | Side::Client(Some(ends)) => &ends.1,
            Side::Client(None) => return Ok(None),
            Side::Closed => return Err(TransportError::Disconnected),
        };
        match rx.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TransportError::Disconnected),
        }
    }

    fn close(&mut self) {
        if let Side::Server { binding, .. } = &self.side {
            self.context.unbind(&self.name, binding);
        }
        self.side = Side::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_pending_until_bound() {
        let ctx = Context::new();
        let mut client = InprocTransport::connect(&ctx, "late");
        assert!(!client.is_connected());
        assert_eq!(client.try_send(b"x").unwrap(), SendStatus::NotReady);
        assert_eq!(client.try_recv().unwrap(), None);

        let mut server = InprocTransport::bind(&ctx, "late", 8).unwrap();
        assert!(!server.is_connected());
        assert_eq!(server.try_send(b"early").unwrap(), SendStatus::NotReady);

        assert_eq!(client.try_send(b"hello").unwrap(), SendStatus::Sent);
        assert!(client.is_connected());
        assert!(server.is_connected());
        assert_eq!(server.try_recv().unwrap(), Some(b"hello".to_vec()));
        assert_eq!(server.try_send(b"back").unwrap(), SendStatus::Sent);
        assert_eq!(client.try_recv().unwrap(), Some(b"back".to_vec()));
    }

    #[test]
    fn double_bind_is_configuration_error() {
        let ctx = Context::new();
        let _first = InprocTransport::bind(&ctx, "dup", 8).unwrap();
        assert!(matches!(
            InprocTransport::bind(&ctx, "dup", 8),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn full_channel_is_not_ready() {
        let ctx = Context::new();
        let mut server = InprocTransport::bind(&ctx, "hwm", 2).unwrap();
        let mut client = InprocTransport::connect(&ctx, "hwm");
        assert_eq!(client.try_send(b"1").unwrap(), SendStatus::Sent);
        assert_eq!(client.try_send(b"2").unwrap(), SendStatus::Sent);
        assert_eq!(client.try_send(b"3").unwrap(), SendStatus::NotReady);
        assert_eq!(server.try_recv().unwrap(), Some(b"1".to_vec()));
        assert_eq!(client.try_send(b"3").unwrap(), SendStatus::Sent);
    }

    #[test]
    fn peer_close_reports_disconnected() {
        let ctx = Context::new();
        let mut server = InprocTransport::bind(&ctx, "bye", 2).unwrap();
        let mut client = InprocTransport::connect(&ctx, "bye");
        assert!(client.is_connected());
        client.close();
        assert!(matches!(
            server.try_recv(),
            Err(TransportError::Disconnected)
        ));
        assert!(matches!(
            client.try_send(b"x"),
            Err(TransportError::Disconnected)
        ));
    }

    #[test]
    fn server_close_unbinds_name() {
        let ctx = Context::new();
        let mut server = InprocTransport::bind(&ctx, "gone", 2).unwrap();
        assert_eq!(ctx.bound_endpoints(), 1);
        server.close();
        assert_eq!(ctx.bound_endpoints(), 0);
        let _again = InprocTransport::bind(&ctx, "gone", 2).unwrap();
    }
}
