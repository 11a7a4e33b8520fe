//! Typed message exchange over point-to-point sockets.
//! Caller-driven: no background threads; `Socket::run` moves at most one frame per call.

pub mod envelope;
pub mod error;
pub mod message;
pub mod pattern;
pub mod queue;
pub mod registry;
pub mod socket;
pub mod transport;

pub use envelope::{decode, encode, DecodeError, EncodeError, Envelope, MAX_ENVELOPE_LEN};
pub use error::{Error, Result};
pub use message::Message;
pub use pattern::{FullDuplexPolicy, Pattern, Role, SocketPatternPolicy, Turn, TurnBasedPolicy};
pub use registry::{DispatchError, Registry};
pub use socket::{MessageSender, Socket, SocketOptions, Step};
pub use transport::{Context, Endpoint, SendStatus, Transport, TransportError};
