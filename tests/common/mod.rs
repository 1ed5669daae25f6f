#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use ng112::app::{Conversation, ConversationContext, Store};
use ng112::core::{ConversationState, Header, Message, MessageType, Origin, Role};
use ng112::namespace::{MessagePartsParams, NamespaceMapper};
use ng112::sip::{MessageOptions, SipAdapter, SipEvent, TransportError};

pub const CLIENT_URI: &str = "sip:client@example.com";
pub const PSAP_URI: &str = "sip:psap@example.com";

/// A request the adapter was asked to send.
#[derive(Clone, Debug)]
pub struct SentRequest {
    pub target: String,
    pub body: String,
    pub options: MessageOptions,
}

/// Records every outbound MESSAGE and answers with scripted failures.
#[derive(Default)]
pub struct RecordingAdapter {
    sent: Mutex<Vec<SentRequest>>,
    failures: Mutex<VecDeque<TransportError>>,
    inbound: Mutex<Vec<mpsc::UnboundedSender<SipEvent>>>,
}

impl RecordingAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The next send fails with `error`.
    pub fn fail_next(&self, error: TransportError) {
        self.failures.lock().push_back(error);
    }

    pub fn sent(&self) -> Vec<SentRequest> {
        self.sent.lock().clone()
    }

    /// Push an event to every subscriber, as if it came from the network.
    pub fn deliver(&self, event: SipEvent) {
        self.inbound.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[async_trait]
impl SipAdapter for RecordingAdapter {
    async fn message(&self, target: &str, body: &str, options: MessageOptions) -> Result<(), TransportError> {
        self.sent.lock().push(SentRequest {
            target: target.to_string(),
            body: body.to_string(),
            options,
        });
        match self.failures.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<SipEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inbound.lock().push(tx);
        rx
    }
}

pub fn context(
    mapper: Arc<dyn NamespaceMapper>,
    adapter: Arc<RecordingAdapter>,
    endpoint: &str,
) -> ConversationContext {
    let store = Arc::new(Store::new(mapper.default_heartbeat_interval()));
    ConversationContext {
        mapper,
        adapter,
        store,
        endpoint: endpoint.to_string(),
    }
}

/// Message type of a recorded request, read back through `mapper`.
pub fn sent_type(mapper: &dyn NamespaceMapper, request: &SentRequest) -> Option<MessageType> {
    let has_text = request.body.contains("text/plain");
    mapper.message_type_from_headers(&request.options.extra_headers, has_text)
}

/// Render `message` the way the remote side would put it on the wire.
pub fn remote_event(
    mapper: &dyn NamespaceMapper,
    conversation_id: &str,
    remote_role: Role,
    message: &Message,
) -> SipEvent {
    let (endpoint, target) = match remote_role {
        Role::Psap => (PSAP_URI, CLIENT_URI),
        Role::Client => (CLIENT_URI, PSAP_URI),
    };
    let params = MessagePartsParams {
        conversation_id,
        role: remote_role,
        target_uri: target,
        endpoint,
        is_test: false,
        message,
    };
    let parts = mapper.create_message_parts(&params).expect("remote message renders");
    let body = parts.multipart.create();
    let mut headers = parts.headers;
    headers.push(Header::new("Content-Type", body.content_type()));
    SipEvent::new(headers, body.body, &format!("\"Remote\" <{endpoint}>"), &format!("<{target}>"))
}

/// Replay a recorded request as an inbound event on the other side.
pub fn request_event(request: &SentRequest, from: &str, to: &str) -> SipEvent {
    let mut headers = request.options.extra_headers.clone();
    headers.push(Header::new("Content-Type", request.options.content_type.clone()));
    SipEvent::new(headers, request.body.clone(), &format!("<{from}>"), &format!("<{to}>"))
}

pub fn remote_message(id: u64, message_type: MessageType, text: Option<&str>) -> Message {
    let mut message = Message::outgoing(id, Origin::Remote, message_type);
    message.set_text(text.map(str::to_string));
    message
}

/// Yield until spawned transport tasks had a chance to run.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

pub async fn wait_for_state(conversation: &Conversation, state: ConversationState) {
    for _ in 0..200 {
        if conversation.state().value == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "conversation {} stuck in {} while waiting for {state}",
        conversation.id(),
        conversation.state().value
    );
}
