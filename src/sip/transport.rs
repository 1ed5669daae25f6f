//! Transport-agnostic SIP MESSAGE envelopes + adapter interface.
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::app::AgentConfig;
use crate::core::{Header, Origin};
use crate::sip::TransportError;

/// Options for an outbound SIP MESSAGE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageOptions {
    pub content_type: String,
    /// Headers added to the request besides Content-Type.
    pub extra_headers: Vec<Header>,
}

/// An inbound SIP MESSAGE delivered by the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipEvent {
    pub headers: Vec<Header>,
    pub body: String,
    /// `From` header value, e.g. `"Jane" <sip:jane@example.com>`.
    pub from: String,
    /// `To` header value.
    pub to: String,
    pub origin: Origin,
}

impl SipEvent {
    pub fn new(headers: Vec<Header>, body: impl Into<String>, from: &str, to: &str) -> Self {
        Self {
            headers,
            body: body.into(),
            from: from.to_string(),
            to: to.to_string(),
            origin: Origin::Remote,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        crate::core::multipart::header_values(&self.headers, name).next()
    }
}

/// The SIP stack the conversation core talks to.
///
/// Registration, dialogs, transactions and retransmissions are the adapter's
/// business. The core only sends MESSAGE requests and consumes inbound ones.
#[async_trait]
pub trait SipAdapter: Send + Sync + 'static {
    /// Send a SIP MESSAGE to `target`. Resolves once a final response arrived.
    async fn message(
        &self,
        target: &str,
        body: &str,
        options: MessageOptions,
    ) -> Result<(), TransportError>;

    /// Subscribe to inbound messages.
    ///
    /// Each call creates a new channel and registers its sender internally.
    /// Senders are pruned once their receiver is dropped.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<SipEvent>;
}

/// Builds the adapter an [`Agent`](crate::app::Agent) uses.
///
/// Passed in explicitly so the agent never has to guess which SIP stack is
/// available.
pub trait SipAdapterFactory {
    fn create(&self, config: &AgentConfig) -> Arc<dyn SipAdapter>;
}

impl<F> SipAdapterFactory for F
where
    F: Fn(&AgentConfig) -> Arc<dyn SipAdapter>,
{
    fn create(&self, config: &AgentConfig) -> Arc<dyn SipAdapter> {
        self(config)
    }
}
