//! Subscription registry: type name -> (decode target, callback). First registration wins.

use std::collections::HashMap;

use tracing::debug;

use crate::envelope::{self, DecodeError};
use crate::message::Message;

/// Type-erased subscription so entries of different message types share one map.
trait Handler: Send {
    fn handle(&mut self, type_name: &str, payload: &[u8]) -> Result<(), DecodeError>;
}

struct Subscription<M, F> {
    target: M,
    callback: F,
}

impl<M, F> Handler for Subscription<M, F>
where
    M: Message,
    F: FnMut(&M) + Send,
{
    fn handle(&mut self, type_name: &str, payload: &[u8]) -> Result<(), DecodeError> {
        self.target = envelope::decode_payload(type_name, payload)?;
        (self.callback)(&self.target);
        Ok(())
    }
}

/// Routes decoded payloads to the callback registered for their type name.
#[derive(Default)]
pub struct Registry {
    entries: HashMap<String, Box<dyn Handler>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `M`. Returns false (and changes nothing) if `M` already has one.
    pub fn register<M, F>(&mut self, target: M, callback: F) -> bool
    where
        M: Message,
        F: FnMut(&M) + Send + 'static,
    {
        if self.entries.contains_key(M::TYPE_NAME) {
            debug!(type_name = M::TYPE_NAME, "already subscribed, keeping first");
            return false;
        }
        self.entries.insert(
            M::TYPE_NAME.to_string(),
            Box::new(Subscription { target, callback }),
        );
        true
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.entries.contains_key(type_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decode `payload` into the subscriber's target and invoke its callback on this thread.
    pub fn dispatch(&mut self, type_name: &str, payload: &[u8]) -> Result<(), DispatchError> {
        let entry = self
            .entries
            .get_mut(type_name)
            .ok_or_else(|| DispatchError::Unroutable {
                type_name: type_name.to_string(),
            })?;
        entry.handle(type_name, payload)?;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Dispatch failure: nobody subscribed, or the payload did not parse as the subscribed type.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("message type '{type_name}' not subscribed")]
    Unroutable { type_name: String },
    #[error(transparent)]
    Decode(#[from] DecodeError),
}
