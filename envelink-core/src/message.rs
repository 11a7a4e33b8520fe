//! Message contract: a serde type plus a stable type name used for routing.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A typed message that can travel inside an envelope.
///
/// `TYPE_NAME` must be unique across every message type two peers exchange;
/// it is the only thing the receiver uses to pick a subscription.
pub trait Message: Serialize + DeserializeOwned + Send + 'static {
    const TYPE_NAME: &'static str;

    /// Type name of this instance (same as `TYPE_NAME`).
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }
}

/// Implement [`Message`] for a serde type with the given type name.
///
/// ```
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Ping {
///     seq: u64,
/// }
/// envelink_core::impl_message!(Ping, "demo.Ping");
/// ```
#[macro_export]
macro_rules! impl_message {
    ($ty:ty, $name:expr) => {
        impl $crate::Message for $ty {
            const TYPE_NAME: &'static str = $name;
        }
    };
}

#[cfg(test)]
pub(crate) mod fixtures {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct Ping {
        pub seq: u64,
        pub note: String,
    }
    crate::impl_message!(Ping, "envelink.test.Ping");

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct Pong {
        pub seq: u64,
        pub payload: Vec<u8>,
    }
    crate::impl_message!(Pong, "envelink.test.Pong");
}
