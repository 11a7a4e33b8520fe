//! Crate-level error returned by socket construction and the poll step.

use crate::envelope::{DecodeError, EncodeError};
use crate::registry::DispatchError;
use crate::transport::TransportError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid endpoint '{0}'")]
    InvalidEndpoint(String),
    #[error("cannot bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// Nobody subscribed to the received type: the peers disagree on the message contract.
    #[error("message type '{type_name}' not subscribed")]
    Unroutable { type_name: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl Error {
    /// True when polling can reasonably continue after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Decode(_) | Error::Transport(TransportError::Disconnected))
    }
}

impl From<DispatchError> for Error {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::Unroutable { type_name } => Error::Unroutable { type_name },
            DispatchError::Decode(d) => Error::Decode(d),
        }
    }
}
