//! Envelope: bincode `{ type_name, payload }` where payload is the bincode-encoded message.

use serde::{Deserialize, Serialize};

use crate::message::Message;

/// Largest encoded envelope accepted in either direction.
pub const MAX_ENVELOPE_LEN: usize = 16 * 1024 * 1024; // 16 MiB

/// Self-describing unit on the wire: the message type name plus its serialized body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub type_name: String,
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Serialize `msg` and tag it with its type name.
    pub fn wrap<M: Message>(msg: &M) -> Result<Self, EncodeError> {
        let payload = bincode::serialize(msg).map_err(EncodeError::Serialize)?;
        Ok(Self {
            type_name: M::TYPE_NAME.to_string(),
            payload,
        })
    }

    /// Encode this envelope into a single blob.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        let out = bincode::serialize(self).map_err(EncodeError::Serialize)?;
        if out.len() > MAX_ENVELOPE_LEN {
            return Err(EncodeError::TooLarge);
        }
        Ok(out)
    }

    /// Parse the payload as `M`. The caller is responsible for having matched `type_name`.
    pub fn open<M: Message>(&self) -> Result<M, DecodeError> {
        decode_payload(&self.type_name, &self.payload)
    }
}

/// Encode a message into one envelope blob.
pub fn encode<M: Message>(msg: &M) -> Result<Vec<u8>, EncodeError> {
    Envelope::wrap(msg)?.to_bytes()
}

/// Decode an envelope blob. The whole input must be exactly one envelope.
pub fn decode(bytes: &[u8]) -> Result<Envelope, DecodeError> {
    if bytes.len() > MAX_ENVELOPE_LEN {
        return Err(DecodeError::TooLarge);
    }
    let envelope: Envelope = bincode::deserialize(bytes).map_err(DecodeError::Envelope)?;
    let used = bincode::serialized_size(&envelope).map_err(DecodeError::Envelope)?;
    if used as usize != bytes.len() {
        return Err(DecodeError::TrailingBytes);
    }
    if envelope.type_name.is_empty() {
        return Err(DecodeError::MissingTypeName);
    }
    Ok(envelope)
}

/// Parse a payload into a message of a known type.
pub fn decode_payload<M: Message>(type_name: &str, payload: &[u8]) -> Result<M, DecodeError> {
    bincode::deserialize(payload).map_err(|source| DecodeError::Payload {
        type_name: type_name.to_string(),
        source,
    })
}

/// Error encoding a message into an envelope (bincode or size limit).
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("encode error: {0}")]
    Serialize(#[from] bincode::Error),
    #[error("envelope too large")]
    TooLarge,
}

/// Error decoding received bytes into an envelope or a message.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("envelope too large")]
    TooLarge,
    #[error("envelope has an empty type name")]
    MissingTypeName,
    #[error("trailing bytes after envelope")]
    TrailingBytes,
    #[error("malformed envelope: {0}")]
    Envelope(#[source] bincode::Error),
    #[error("malformed payload for '{type_name}': {source}")]
    Payload {
        type_name: String,
        #[source]
        source: bincode::Error,
    },
}
