//! In-memory SIP network.
//!
//! Every [`LoopbackAdapter`] registers its endpoint URI with a shared
//! [`LoopbackNetwork`]; `message()` delivers straight into the subscribers of
//! the target endpoint. Used by the demo binary and the integration tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::core::Header;
use crate::sip::{MessageOptions, SipAdapter, SipEvent, TransportError};

#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    endpoints: Arc<Mutex<HashMap<String, Vec<mpsc::UnboundedSender<SipEvent>>>>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an adapter bound to `endpoint`.
    pub fn adapter(&self, endpoint: &str, display_name: Option<&str>) -> Arc<LoopbackAdapter> {
        self.endpoints.lock().entry(endpoint.to_string()).or_default();
        Arc::new(LoopbackAdapter {
            network: self.clone(),
            endpoint: endpoint.to_string(),
            display_name: display_name.map(str::to_string),
        })
    }

    fn deliver(&self, target: &str, event: SipEvent) -> Result<(), TransportError> {
        let mut endpoints = self.endpoints.lock();
        let Some(senders) = endpoints.get_mut(target) else {
            return Err(TransportError::remote(404, "Not Found"));
        };

        senders.retain(|tx| tx.send(event.clone()).is_ok());
        if senders.is_empty() {
            return Err(TransportError::remote(480, "Temporarily Unavailable"));
        }
        Ok(())
    }

    fn register(&self, endpoint: &str, sender: mpsc::UnboundedSender<SipEvent>) {
        self.endpoints
            .lock()
            .entry(endpoint.to_string())
            .or_default()
            .push(sender);
    }
}

pub struct LoopbackAdapter {
    network: LoopbackNetwork,
    endpoint: String,
    display_name: Option<String>,
}

impl LoopbackAdapter {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn name_addr(&self) -> String {
        match &self.display_name {
            Some(name) => format!("\"{name}\" <{}>", self.endpoint),
            None => format!("<{}>", self.endpoint),
        }
    }
}

#[async_trait]
impl SipAdapter for LoopbackAdapter {
    async fn message(
        &self,
        target: &str,
        body: &str,
        options: MessageOptions,
    ) -> Result<(), TransportError> {
        let mut headers = options.extra_headers;
        headers.push(Header::new("Content-Type", options.content_type));

        let event = SipEvent::new(headers, body, &self.name_addr(), &format!("<{target}>"));
        debug!("[message] {} -> {}", self.endpoint, target);
        self.network.deliver(target, event)
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<SipEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.network.register(&self.endpoint, tx);
        rx
    }
}
