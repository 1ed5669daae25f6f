//! A single emergency conversation.
//!
//! The conversation owns the outbound queue, the state machine and the
//! heartbeat timer. Outgoing messages are appended to the message list
//! immediately and leave the queue once the conversation may send them:
//!
//! ```text
//!   send_message() ─► messages.push ─► listeners ─► queue
//!                                                    │ process_queue()
//!                     not started / stopped: START only, rest waits (FIFO)
//!                                                    ▼
//!                         mapper.create_message_parts ─► outbox (FIFO channel)
//!                                                    │ outbox task
//!                               adapter.message, in order, without waiting
//!                               for earlier sends to finish
//!                                                    │
//!                 Ok  ─► message SUCCESS, local state event, handle resolves
//!                 Err ─► message ERROR, ERROR state if remote, handle rejects
//!
//!   handle_event() ─► mapper.parse ─► state machine ─► URIs ─► process_queue
//!                                  ─► messages.push ─► message listeners ─► state listeners
//! ```
//!
//! All methods that send must run inside a Tokio runtime: the outbox and the
//! heartbeat timer are spawned tasks.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::app::listeners::{ListenerId, Listeners};
use crate::app::store::{Mode, Store};
use crate::core::message::TEXT_CONTENT_TYPE;
use crate::core::{
    Binary, ConversationState, ConversationStateMachine, Location, Message, MessageState,
    MessageType, MultipartPart, Origin, Role, StateEvent, StateObject, VCard,
};
use crate::error::{ConversationError, ValidationError};
use crate::namespace::{MessagePartsParams, NamespaceMapper};
use crate::sip::{MessageOptions, SipAdapter, SipEvent, TransportError};

const CONVERSATION_ID_LENGTH: usize = 30;

/// Random alphanumeric conversation id.
pub fn generate_conversation_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CONVERSATION_ID_LENGTH)
        .map(char::from)
        .collect()
}

/// Collaborators a conversation talks to.
#[derive(Clone)]
pub struct ConversationContext {
    pub mapper: Arc<dyn NamespaceMapper>,
    pub adapter: Arc<dyn SipAdapter>,
    pub store: Arc<Store>,
    /// Own SIP URI.
    pub endpoint: String,
}

/// Fields of a message to send. Everything not set is defaulted.
#[derive(Clone, Debug, Default)]
pub struct MessageDraft {
    /// Explicit protocol id. Must be unique within the conversation.
    pub id: Option<u64>,
    /// Defaults to IN_CHAT.
    pub message_type: Option<MessageType>,
    pub text: Option<String>,
    pub html: Option<String>,
    pub uris: Vec<String>,
    pub location: Option<Location>,
    pub vcard: Option<VCard>,
    pub did: Option<String>,
    pub binaries: Vec<Binary>,
    pub extra_parts: Vec<MultipartPart>,
}

impl MessageDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = Some(message_type);
        self
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    pub fn with_uris(mut self, uris: Vec<String>) -> Self {
        self.uris = uris;
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_vcard(mut self, vcard: VCard) -> Self {
        self.vcard = Some(vcard);
        self
    }

    pub fn with_did(mut self, did: impl Into<String>) -> Self {
        self.did = Some(did.into());
        self
    }

    pub fn with_binary(mut self, binary: Binary) -> Self {
        self.binaries.push(binary);
        self
    }

    pub fn with_part(mut self, part: MultipartPart) -> Self {
        self.extra_parts.push(part);
        self
    }
}

/// Completion of a single send attempt.
pub struct SendHandle(oneshot::Receiver<Result<(), ConversationError>>);

impl SendHandle {
    /// Wait for the transport outcome.
    ///
    /// Resolves to [`ConversationError::Discarded`] if the conversation was
    /// dropped while the message was still queued.
    pub async fn wait(self) -> Result<(), ConversationError> {
        self.0.await.unwrap_or(Err(ConversationError::Discarded))
    }
}

/// A message as it was appended, plus its pending completion.
pub struct SentMessage {
    pub message: Message,
    pub completion: SendHandle,
}

/// Persistable conversation metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub id: String,
    pub role: Role,
    pub target_uri: String,
    pub requested_uri: Option<String>,
    pub route_uri: Option<String>,
    pub remote_display_name: Option<String>,
    pub is_test: bool,
    /// Next local message id.
    pub next_message_id: u64,
    pub state: StateObject,
}

type Completion = oneshot::Sender<Result<(), ConversationError>>;

struct QueueItem {
    message: Message,
    completion: Completion,
}

/// A rendered message on its way to the transport.
struct Outgoing {
    target: String,
    body: String,
    options: MessageOptions,
    message: Message,
    completion: Completion,
}

struct Inner {
    target_uri: String,
    requested_uri: Option<String>,
    route_uri: Option<String>,
    remote_display_name: Option<String>,
    messages: Vec<Message>,
    next_message_id: u64,
    state_machine: ConversationStateMachine,
    queue: VecDeque<QueueItem>,
    /// Sender of the outbox task, spawned on first use.
    outbox: Option<mpsc::UnboundedSender<Outgoing>>,
}

struct Shared {
    id: String,
    role: Role,
    is_test: bool,
    ctx: ConversationContext,
    inner: Mutex<Inner>,
    message_listeners: Listeners<Message>,
    state_listeners: Listeners<StateObject>,
    heartbeat: Mutex<Option<CancellationToken>>,
    interval_listener: Mutex<Option<ListenerId>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(token) = self.heartbeat.get_mut().take() {
            token.cancel();
        }
        if let Some(id) = self.interval_listener.get_mut().take() {
            self.ctx.store.remove_heartbeat_interval_listener(id);
        }
        debug!("[drop] Conversation {} released", self.id);
    }
}

/// Cheap to clone; all clones refer to the same conversation.
#[derive(Clone)]
pub struct Conversation {
    shared: Arc<Shared>,
}

impl Conversation {
    pub fn new(ctx: ConversationContext, id: impl Into<String>, role: Role, target_uri: impl Into<String>, is_test: bool) -> Self {
        let state_machine = ConversationStateMachine::new(role, ctx.mapper.supports_psap_start_message());
        let inner = Inner {
            target_uri: target_uri.into(),
            requested_uri: None,
            route_uri: None,
            remote_display_name: None,
            messages: Vec::new(),
            next_message_id: 1,
            state_machine,
            queue: VecDeque::new(),
            outbox: None,
        };
        Self::build(ctx, id.into(), role, is_test, inner)
    }

    /// Rebuild a conversation from a snapshot. The message id sequence
    /// continues where the snapshot left off.
    pub fn restore(ctx: ConversationContext, snapshot: ConversationSnapshot) -> Self {
        let state_machine = ConversationStateMachine::restore(
            snapshot.role,
            ctx.mapper.supports_psap_start_message(),
            snapshot.state,
        );
        let inner = Inner {
            target_uri: snapshot.target_uri,
            requested_uri: snapshot.requested_uri,
            route_uri: snapshot.route_uri,
            remote_display_name: snapshot.remote_display_name,
            messages: Vec::new(),
            next_message_id: snapshot.next_message_id.max(1),
            state_machine,
            queue: VecDeque::new(),
            outbox: None,
        };
        Self::build(ctx, snapshot.id, snapshot.role, snapshot.is_test, inner)
    }

    fn build(ctx: ConversationContext, id: String, role: Role, is_test: bool, inner: Inner) -> Self {
        let shared = Arc::new(Shared {
            id,
            role,
            is_test,
            ctx,
            inner: Mutex::new(inner),
            message_listeners: Listeners::new(),
            state_listeners: Listeners::new(),
            heartbeat: Mutex::new(None),
            interval_listener: Mutex::new(None),
        });

        let weak = Arc::downgrade(&shared);
        let listener = shared.ctx.store.add_heartbeat_interval_listener(move |_| {
            if let Some(shared) = weak.upgrade() {
                Conversation { shared }.refresh_heartbeat();
            }
        });
        *shared.interval_listener.lock() = Some(listener);

        let conversation = Self { shared };
        conversation.refresh_heartbeat();
        conversation
    }

    // ─────────────────────────── Accessors ───────────────────────────

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn is_test(&self) -> bool {
        self.shared.is_test
    }

    pub fn mapper(&self) -> &Arc<dyn NamespaceMapper> {
        &self.shared.ctx.mapper
    }

    pub fn target_uri(&self) -> String {
        self.shared.inner.lock().target_uri.clone()
    }

    pub fn requested_uri(&self) -> Option<String> {
        self.shared.inner.lock().requested_uri.clone()
    }

    pub fn route_uri(&self) -> Option<String> {
        self.shared.inner.lock().route_uri.clone()
    }

    pub fn remote_display_name(&self) -> Option<String> {
        self.shared.inner.lock().remote_display_name.clone()
    }

    pub fn state(&self) -> StateObject {
        self.shared.inner.lock().state_machine.current_state()
    }

    /// Heartbeat interval of this conversation: the configured one, or the
    /// default of its namespace.
    pub fn heartbeat_interval(&self) -> Duration {
        let ctx = &self.shared.ctx;
        ctx.store.heartbeat_interval_or(ctx.mapper.default_heartbeat_interval())
    }

    pub fn has_been_started(&self) -> bool {
        self.shared.inner.lock().state_machine.has_been_started()
    }

    /// All messages in the order they were appended.
    pub fn messages(&self) -> Vec<Message> {
        self.shared.inner.lock().messages.clone()
    }

    /// Number of messages waiting for the conversation to become sendable.
    pub fn queued(&self) -> usize {
        self.shared.inner.lock().queue.len()
    }

    pub fn is_heartbeat_running(&self) -> bool {
        self.shared.heartbeat.lock().is_some()
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        let inner = self.shared.inner.lock();
        ConversationSnapshot {
            id: self.shared.id.clone(),
            role: self.shared.role,
            target_uri: inner.target_uri.clone(),
            requested_uri: inner.requested_uri.clone(),
            route_uri: inner.route_uri.clone(),
            remote_display_name: inner.remote_display_name.clone(),
            is_test: self.shared.is_test,
            next_message_id: inner.next_message_id,
            state: inner.state_machine.current_state(),
        }
    }

    // ─────────────────────────── Listeners ───────────────────────────

    pub fn add_message_listener(&self, listener: impl Fn(&Message) + Send + Sync + 'static) -> ListenerId {
        self.shared.message_listeners.add(listener)
    }

    pub fn remove_message_listener(&self, id: ListenerId) -> bool {
        self.shared.message_listeners.remove(id)
    }

    pub fn add_state_listener(&self, listener: impl Fn(&StateObject) + Send + Sync + 'static) -> ListenerId {
        self.shared.state_listeners.add(listener)
    }

    pub fn remove_state_listener(&self, id: ListenerId) -> bool {
        self.shared.state_listeners.remove(id)
    }

    // ─────────────────────────── Sending ───────────────────────────

    /// Append a local message and queue it for sending.
    ///
    /// Returns as soon as the message is queued; `completion` resolves once
    /// the transport attempt finished.
    ///
    /// # Errors
    /// [`ValidationError::InvalidUri`] if one of `draft.uris` is not a URI.
    pub fn send_message(&self, draft: MessageDraft) -> Result<SentMessage, ConversationError> {
        for uri in &draft.uris {
            Url::parse(uri).map_err(|source| ValidationError::InvalidUri {
                uri: uri.clone(),
                source,
            })?;
        }

        let role = self.shared.role;
        let store = &self.shared.ctx.store;
        let message = {
            let mut inner = self.shared.inner.lock();
            let id = match draft.id {
                Some(id) => {
                    inner.next_message_id = inner.next_message_id.max(id.saturating_add(1));
                    id
                }
                None => {
                    let id = inner.next_message_id;
                    inner.next_message_id += 1;
                    id
                }
            };

            let mut message_type = draft.message_type.unwrap_or(MessageType::IN_CHAT);
            if message_type == MessageType::IN_CHAT
                && role == Role::Psap
                && !inner.state_machine.has_been_started()
                && self.shared.ctx.mapper.allows_psap_auto_start()
            {
                debug!("[send_message] Promoting first PSAP message to START");
                message_type = MessageType::START;
            }
            if message_type.is_heartbeat() {
                message_type = message_type.toggle(MessageType::INACTIVE, store.mode() == Mode::Inactive);
            }

            let mut message = Message::outgoing(id, Origin::Local, message_type);
            message.set_text(draft.text);
            message.set_html(draft.html);
            message.set_uris(draft.uris);
            message.set_binaries(draft.binaries);
            message.set_extra_parts(draft.extra_parts);
            match role {
                Role::Client => {
                    message.set_location(draft.location.or_else(|| store.location()));
                    message.set_vcard(draft.vcard.or_else(|| store.vcard()));
                    message.set_did(draft.did.or_else(|| store.did()));
                }
                Role::Psap => {
                    message.set_location(None);
                    message.set_vcard(None);
                    message.set_did(draft.did);
                }
            }

            inner.messages.push(message.clone());
            message
        };

        self.shared.message_listeners.notify(&message);

        let (tx, rx) = oneshot::channel();
        self.shared.inner.lock().queue.push_back(QueueItem {
            message: message.clone(),
            completion: tx,
        });
        self.process_queue();

        Ok(SentMessage {
            message,
            completion: SendHandle(rx),
        })
    }

    /// Send a START message.
    pub fn start(&self, draft: MessageDraft) -> Result<SentMessage, ConversationError> {
        self.send_message(draft.with_type(MessageType::START))
    }

    /// Send a STOP message.
    pub fn stop(&self, draft: MessageDraft) -> Result<SentMessage, ConversationError> {
        self.send_message(draft.with_type(MessageType::STOP))
    }

    pub fn send_heartbeat(&self) -> Result<SentMessage, ConversationError> {
        self.send_message(MessageDraft::new().with_type(MessageType::HEARTBEAT))
    }

    /// Render every sendable queued message and pass it to the outbox, FIFO.
    ///
    /// Draining and hand-off happen under the conversation lock, so batches
    /// from concurrent callers never interleave.
    fn process_queue(&self) {
        let mut inner = self.shared.inner.lock();
        let open = inner.state_machine.has_been_started()
            && inner.state_machine.current_state().value != ConversationState::Stopped;
        let sendable = |item: &QueueItem| open || item.message.message_type() == MessageType::START;
        if !inner.queue.iter().any(sendable) {
            return;
        }

        let (ready, waiting): (VecDeque<_>, VecDeque<_>) = inner.queue.drain(..).partition(sendable);
        inner.queue = waiting;

        let target = inner.target_uri.clone();
        let outbox = inner
            .outbox
            .get_or_insert_with(|| {
                spawn_outbox(Arc::downgrade(&self.shared), Arc::clone(&self.shared.ctx.adapter))
            })
            .clone();

        for item in ready {
            let Some(outgoing) = self.render(&target, item) else {
                continue;
            };
            debug!(
                "[process_queue] Sending {} message {} to {target}",
                outgoing.message.message_type(),
                outgoing.message.id()
            );
            if let Err(mpsc::error::SendError(outgoing)) = outbox.send(outgoing) {
                warn!("[process_queue] Outbox of {} is closed", self.shared.id);
                outgoing.message.set_state(MessageState::Error);
                let _ = outgoing.completion.send(Err(ConversationError::Discarded));
            }
        }
    }

    fn render(&self, target: &str, item: QueueItem) -> Option<Outgoing> {
        let QueueItem { message, completion } = item;

        let params = MessagePartsParams {
            conversation_id: &self.shared.id,
            role: self.shared.role,
            target_uri: target,
            endpoint: &self.shared.ctx.endpoint,
            is_test: self.shared.is_test,
            message: &message,
        };
        let parts = match self.shared.ctx.mapper.create_message_parts(&params) {
            Ok(parts) => parts,
            Err(err) => {
                error!("[render] Unable to render message {}: {err}", message.id());
                message.set_state(MessageState::Error);
                let _ = completion.send(Err(err.into()));
                return None;
            }
        };

        let rendered = parts.multipart.create();
        let (content_type, body) = if rendered.is_empty() {
            (TEXT_CONTENT_TYPE.to_string(), String::new())
        } else {
            (rendered.content_type(), rendered.body)
        };

        Some(Outgoing {
            target: target.to_string(),
            body,
            options: MessageOptions {
                content_type,
                extra_headers: parts.headers,
            },
            message,
            completion,
        })
    }

    fn on_send_complete(&self, message: &Message, result: Result<(), TransportError>, completion: Completion) {
        let (state, event, outcome): (MessageState, Option<StateEvent>, Result<(), ConversationError>) = match result {
            Ok(()) => (
                MessageState::Success,
                Some(StateEvent::for_message(message.message_type(), Origin::Local)),
                Ok(()),
            ),
            Err(err) => {
                warn!(
                    "[on_send_complete] Message {} of conversation {} failed: {err}",
                    message.id(),
                    self.shared.id
                );
                let event = err.is_remote().then_some(StateEvent::Error {
                    origin: Origin::Remote,
                });
                (MessageState::Error, event, Err(err.into()))
            }
        };

        message.set_state(state);
        let transition = match event {
            Some(event) => self.shared.inner.lock().state_machine.send(event),
            None => Ok(None),
        };
        let _ = completion.send(outcome);

        let changed = transition.unwrap_or_else(|err| {
            error!("[on_send_complete] {err}");
            None
        });
        self.process_queue();
        if let Some(state) = changed {
            self.on_state_changed(state);
        }
    }

    // ─────────────────────────── Receiving ───────────────────────────

    /// Process an inbound SIP MESSAGE that belongs to this conversation.
    ///
    /// # Errors
    /// [`ConversationError::Namespace`] if the body cannot be parsed,
    /// [`ConversationError::ProtocolViolation`] if the state machine
    /// rejects the event.
    pub fn handle_event(&self, event: &SipEvent) -> Result<Message, ConversationError> {
        let parsed = self.shared.ctx.mapper.parse_message_from_event(event)?;
        let mut message = Message::incoming(parsed.id, event.origin, parsed.message_type, parsed.multipart);
        message.set_did(parsed.did);

        let changed = {
            let mut inner = self.shared.inner.lock();
            let changed = inner
                .state_machine
                .send(StateEvent::for_message(parsed.message_type, event.origin))?;

            if event.origin == Origin::Remote {
                if let Some(reply_to) = parsed.reply_to {
                    if reply_to != inner.target_uri {
                        info!("[handle_event] Target of {} is now {reply_to}", self.shared.id);
                        inner.target_uri = reply_to;
                    }
                }
                if inner.requested_uri.is_none() {
                    inner.requested_uri = parsed.history_info.or_else(|| parsed.to_uri.clone());
                }
                if inner.route_uri.is_none() {
                    inner.route_uri = parsed.to_uri;
                }
                if parsed.remote_display_name.is_some() {
                    inner.remote_display_name = parsed.remote_display_name;
                }
            }
            changed
        };

        self.process_queue();

        self.shared.inner.lock().messages.push(message.clone());
        self.shared.message_listeners.notify(&message);

        if let Some(state) = changed {
            self.on_state_changed(state);
        }
        Ok(message)
    }

    fn on_state_changed(&self, state: StateObject) {
        self.refresh_heartbeat();
        self.shared.state_listeners.notify(&state);
    }

    // ─────────────────────────── Heartbeat ───────────────────────────

    /// Tear down the heartbeat timer and start a new one if the conversation
    /// is STARTED, this side is the CLIENT and the interval is non-zero.
    fn refresh_heartbeat(&self) {
        // State and interval are read under the slot lock so the last
        // refresh always sees the latest values.
        let mut slot = self.shared.heartbeat.lock();
        let interval = self.heartbeat_interval();
        let state = self.state().value;

        if let Some(token) = slot.take() {
            token.cancel();
        }
        if state != ConversationState::Started || self.shared.role != Role::Client || interval.is_zero() {
            return;
        }

        let token = CancellationToken::new();
        spawn_heartbeat(Arc::downgrade(&self.shared), interval, token.clone());
        debug!(
            "[refresh_heartbeat] Heartbeat for {} every {} ms",
            self.shared.id,
            interval.as_millis()
        );
        *slot = Some(token);
    }
}

/// Hand outgoing messages to the transport in the order they arrive. Sends
/// are pipelined: a send starts without waiting for earlier ones to finish.
/// The task ends once the conversation is gone and in-flight sends resolved.
fn spawn_outbox(conversation: Weak<Shared>, adapter: Arc<dyn SipAdapter>) -> mpsc::UnboundedSender<Outgoing> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();

    tokio::spawn(async move {
        let mut in_flight = FuturesUnordered::new();
        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(outgoing) => in_flight.push(deliver(Arc::clone(&adapter), outgoing)),
                    None => break,
                },
                Some((message, completion, result)) = in_flight.next(), if !in_flight.is_empty() => {
                    complete(&conversation, message, completion, result);
                }
            }
        }
        while let Some((message, completion, result)) = in_flight.next().await {
            complete(&conversation, message, completion, result);
        }
    });

    tx
}

async fn deliver(
    adapter: Arc<dyn SipAdapter>,
    outgoing: Outgoing,
) -> (Message, Completion, Result<(), TransportError>) {
    let Outgoing {
        target,
        body,
        options,
        message,
        completion,
    } = outgoing;
    let result = adapter.message(&target, &body, options).await;
    (message, completion, result)
}

fn complete(conversation: &Weak<Shared>, message: Message, completion: Completion, result: Result<(), TransportError>) {
    match conversation.upgrade() {
        Some(shared) => Conversation { shared }.on_send_complete(&message, result, completion),
        None => {
            let state = if result.is_ok() { MessageState::Success } else { MessageState::Error };
            message.set_state(state);
            let _ = completion.send(result.map_err(ConversationError::from));
        }
    }
}

fn spawn_heartbeat(conversation: Weak<Shared>, interval: Duration, cancel: CancellationToken) {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(shared) = conversation.upgrade() else { break };
                    if let Err(err) = (Conversation { shared }).send_heartbeat() {
                        warn!("[heartbeat] Unable to send heartbeat: {err}");
                    }
                }
            }
        }
    });
}
