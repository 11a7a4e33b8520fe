//! Socket wrapper: subscriptions, outbound queue and the poll step over one transport.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::envelope::{self, EncodeError, MAX_ENVELOPE_LEN};
use crate::error::Result;
use crate::message::Message;
use crate::pattern::{Pattern, Role, SocketPatternPolicy};
use crate::queue::SendQueue;
use crate::registry::Registry;
use crate::transport::{
    self, Context, Endpoint, SendStatus, Transport, TransportError, TransportOptions,
};

/// Socket construction parameters. Deserializable so hosts can load them from config.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SocketOptions {
    pub endpoint: String,
    #[serde(default = "default_role")]
    pub role: Role,
    #[serde(default = "default_pattern")]
    pub pattern: Pattern,
    /// Frames buffered per direction by the inproc transport (default 1000).
    #[serde(default = "default_send_hwm")]
    pub send_hwm: usize,
    /// Largest envelope this socket queues, and largest frame the tcp transport
    /// accepts (default 16 MiB).
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

fn default_role() -> Role {
    Role::Server
}
fn default_pattern() -> Pattern {
    Pattern::Pair
}
fn default_send_hwm() -> usize {
    TransportOptions::default().send_hwm
}
fn default_max_frame_len() -> usize {
    TransportOptions::default().max_frame_len
}

impl SocketOptions {
    pub fn new(endpoint: impl Into<String>, role: Role, pattern: Pattern) -> Self {
        Self {
            endpoint: endpoint.into(),
            role,
            pattern,
            send_hwm: default_send_hwm(),
            max_frame_len: default_max_frame_len(),
        }
    }

    fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            send_hwm: self.send_hwm,
            max_frame_len: self.max_frame_len,
        }
    }
}

/// What one poll step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Nothing was allowed, nothing was queued, or the transport was not ready.
    Idle,
    /// The queue head was handed to the transport.
    Sent,
    /// One envelope was received and dispatched.
    Received,
}

/// Cloneable handle that encodes and enqueues messages from any thread.
///
/// Messages sent after the owning [`Socket`] is dropped are accepted and discarded.
#[derive(Clone)]
pub struct MessageSender {
    queue: Arc<SendQueue>,
    max_len: usize,
}

impl MessageSender {
    /// Encode `message` and append it to the send queue. Takes ownership of the message.
    /// An envelope over the socket's frame limit is rejected here and never queued.
    pub fn send<M: Message>(&self, message: M) -> std::result::Result<(), EncodeError> {
        let bytes = envelope::encode(&message)?;
        if bytes.len() > self.max_len {
            return Err(EncodeError::TooLarge);
        }
        debug!(type_name = M::TYPE_NAME, bytes = bytes.len(), "queued");
        self.queue.push(bytes);
        Ok(())
    }

    /// Envelopes waiting to be sent.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

/// A typed messaging socket driven by repeated calls to [`Socket::run`].
///
/// Subscribe before polling starts; `send_message` (or a [`MessageSender`]) may be
/// used from any thread at any time.
pub struct Socket {
    endpoint: Option<Endpoint>,
    role: Role,
    pattern: Pattern,
    transport: Box<dyn Transport>,
    policy: Box<dyn SocketPatternPolicy>,
    queue: Arc<SendQueue>,
    max_frame_len: usize,
    registry: Registry,
    context: Option<Context>,
    owns_context: bool,
}

impl Socket {
    /// Bind `endpoint` as a server with a context of its own.
    pub fn bind(endpoint: &str, pattern: Pattern) -> Result<Self> {
        Self::new(endpoint, Role::Server, pattern, None)
    }

    /// Connect to `endpoint` as a client with a context of its own.
    pub fn connect(endpoint: &str, pattern: Pattern) -> Result<Self> {
        Self::new(endpoint, Role::Client, pattern, None)
    }

    /// Create a socket. With `context` set, the socket borrows it and never shuts it
    /// down; otherwise it creates one and shuts it down on drop.
    pub fn new(
        endpoint: &str,
        role: Role,
        pattern: Pattern,
        context: Option<&Context>,
    ) -> Result<Self> {
        Self::with_options(&SocketOptions::new(endpoint, role, pattern), context)
    }

    pub fn with_options(options: &SocketOptions, context: Option<&Context>) -> Result<Self> {
        let endpoint: Endpoint = options.endpoint.parse()?;
        let (context, owns_context) = match context {
            Some(ctx) => (ctx.clone(), false),
            None => (Context::new(), true),
        };
        let transport = transport::open(
            &endpoint,
            options.role,
            &context,
            options.transport_options(),
        )?;
        let endpoint = transport.local_endpoint().unwrap_or(endpoint);
        debug!(
            %endpoint,
            role = ?options.role,
            pattern = ?options.pattern,
            owns_context,
            "socket ready"
        );
        let mut socket = Self::with_transport(transport, options.role, options.pattern);
        socket.endpoint = Some(endpoint);
        socket.max_frame_len = options.max_frame_len.min(MAX_ENVELOPE_LEN);
        socket.context = Some(context);
        socket.owns_context = owns_context;
        Ok(socket)
    }

    /// Wrap a caller-supplied transport. No context is involved.
    pub fn with_transport(transport: Box<dyn Transport>, role: Role, pattern: Pattern) -> Self {
        Self {
            endpoint: None,
            role,
            pattern,
            transport,
            policy: pattern.policy(role),
            queue: Arc::new(SendQueue::new()),
            max_frame_len: MAX_ENVELOPE_LEN,
            registry: Registry::new(),
            context: None,
            owns_context: false,
        }
    }

    /// Register `callback` for messages of type `M`; `target` receives each decoded
    /// value before the callback sees it. A second subscription for the same type is
    /// ignored. Returns whether this call registered.
    pub fn subscribe<M, F>(&mut self, target: M, callback: F) -> bool
    where
        M: Message,
        F: FnMut(&M) + Send + 'static,
    {
        self.registry.register(target, callback)
    }

    /// Encode and enqueue `message`.
    pub fn send_message<M: Message>(&self, message: M) -> std::result::Result<(), EncodeError> {
        self.sender().send(message)
    }

    pub fn sender(&self) -> MessageSender {
        MessageSender {
            queue: self.queue.clone(),
            max_len: self.max_frame_len,
        }
    }

    /// Advance one unit of I/O work: at most one send attempt, or else at most one
    /// receive attempt followed by dispatch. Never blocks.
    pub fn run(&mut self) -> Result<Step> {
        if self.policy.can_send() && !self.queue.is_empty() {
            let Self {
                queue,
                transport,
                policy,
                ..
            } = self;
            let sent = queue.pop_if_head_sent(
                |frame| -> std::result::Result<bool, TransportError> {
                    match transport.try_send(frame)? {
                        SendStatus::Sent => {
                            policy.did_send();
                            debug!(bytes = frame.len(), "sent");
                            Ok(true)
                        }
                        SendStatus::NotReady => Ok(false),
                    }
                },
            )?;
            return Ok(if sent { Step::Sent } else { Step::Idle });
        }
        if self.policy.can_recv() {
            let Some(frame) = self.transport.try_recv()? else {
                return Ok(Step::Idle);
            };
            self.policy.did_recv();
            let envelope = envelope::decode(&frame)?;
            debug!(type_name = %envelope.type_name, bytes = frame.len(), "received");
            self.registry
                .dispatch(&envelope.type_name, &envelope.payload)?;
            return Ok(Step::Received);
        }
        Ok(Step::Idle)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_server(&self) -> bool {
        self.role == Role::Server
    }

    pub fn pattern(&self) -> Pattern {
        self.pattern
    }

    /// Endpoint this socket bound or connected to (`None` for a supplied transport).
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    /// Context this socket uses; share it with other sockets for `inproc://`.
    pub fn context(&self) -> Option<&Context> {
        self.context.as_ref()
    }

    pub fn owns_context(&self) -> bool {
        self.owns_context
    }

    /// Envelopes waiting to be sent.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn can_send(&self) -> bool {
        self.policy.can_send()
    }

    pub fn can_recv(&self) -> bool {
        self.policy.can_recv()
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        let discarded = self.queue.drain();
        if discarded > 0 {
            warn!(discarded, "dropping socket with unsent envelopes");
        }
        self.registry.clear();
        self.transport.close();
        if self.owns_context {
            if let Some(ctx) = &self.context {
                ctx.shutdown();
            }
        }
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("endpoint", &self.endpoint)
            .field("role", &self.role)
            .field("pattern", &self.pattern)
            .field("pending", &self.queue.len())
            .field("max_frame_len", &self.max_frame_len)
            .field("subscriptions", &self.registry.len())
            .field("owns_context", &self.owns_context)
            .finish()
    }
}
