//! Entry point for applications: owns the store, the namespace mappers and
//! all conversations of one SIP endpoint.
//!
//! ```text
//!   SipAdapter::subscribe() ──► listen() ──► handle_event()
//!                                              │ first compatible mapper
//!                                              │ call id ─► registry
//!                                              ▼
//!                              existing conversation, or a new incoming one
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::app::conversation::{
    generate_conversation_id, Conversation, ConversationContext, ConversationSnapshot,
};
use crate::app::listeners::{ListenerId, Listeners};
use crate::app::store::Store;
use crate::app::AgentConfig;
use crate::error::{AgentError, ConversationError, ValidationError};
use crate::namespace::{mapper_for, NamespaceKind, NamespaceMapper};
use crate::sip::{SipAdapter, SipAdapterFactory, SipEvent};

/// Options for an outgoing conversation.
#[derive(Clone, Debug, Default)]
pub struct ConversationOptions {
    pub is_test: bool,
    /// Explicit conversation id, generated if not set.
    pub id: Option<String>,
}

struct AgentShared {
    config: AgentConfig,
    store: Arc<Store>,
    adapter: Arc<dyn SipAdapter>,
    /// Configured namespace first, then the fallback for inbound messages.
    mappers: Vec<Arc<dyn NamespaceMapper>>,
    conversations: Mutex<HashMap<String, Conversation>>,
    conversation_listeners: Listeners<Conversation>,
    cancel: CancellationToken,
}

/// Cheap to clone; all clones refer to the same agent.
#[derive(Clone)]
pub struct Agent {
    shared: Arc<AgentShared>,
}

impl Agent {
    /// Build an agent. The SIP adapter comes from `factory`.
    ///
    /// # Errors
    /// [`AgentError::Validation`] if the configured heartbeat interval is out
    /// of range.
    pub fn new(config: AgentConfig, factory: &dyn SipAdapterFactory) -> Result<Self, AgentError> {
        let fallback = match config.namespace {
            NamespaceKind::Etsi => NamespaceKind::Dec112,
            NamespaceKind::Dec112 => NamespaceKind::Etsi,
        };
        let mappers = vec![
            mapper_for(config.namespace, &config.domain, &config.client_info),
            mapper_for(fallback, &config.domain, &config.client_info),
        ];

        let store = Arc::new(Store::new(mappers[0].default_heartbeat_interval()));
        if let Some(interval) = config.heartbeat_interval_ms {
            store.set_heartbeat_interval(Some(interval))?;
        }

        let adapter = factory.create(&config);
        info!(
            "[new] Agent {} ({}, {}) ready",
            config.endpoint, config.role, config.namespace
        );

        Ok(Self {
            shared: Arc::new(AgentShared {
                config,
                store,
                adapter,
                mappers,
                conversations: Mutex::new(HashMap::new()),
                conversation_listeners: Listeners::new(),
                cancel: CancellationToken::new(),
            }),
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.shared.config
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.shared.store
    }

    fn context(&self, mapper: Arc<dyn NamespaceMapper>) -> ConversationContext {
        ConversationContext {
            mapper,
            adapter: Arc::clone(&self.shared.adapter),
            store: Arc::clone(&self.shared.store),
            endpoint: self.shared.config.endpoint.clone(),
        }
    }

    fn register(&self, conversation: &Conversation) {
        self.shared
            .conversations
            .lock()
            .insert(conversation.id().to_string(), conversation.clone());
        self.shared.conversation_listeners.notify(conversation);
    }

    /// Create an outgoing conversation to `target_uri` in the configured namespace.
    ///
    /// # Errors
    /// [`AgentError::Validation`] if `target_uri` is not a URI.
    pub fn create_conversation(
        &self,
        target_uri: &str,
        options: ConversationOptions,
    ) -> Result<Conversation, AgentError> {
        Url::parse(target_uri).map_err(|source| ValidationError::InvalidUri {
            uri: target_uri.to_string(),
            source,
        })?;

        let id = options.id.unwrap_or_else(generate_conversation_id);
        let conversation = Conversation::new(
            self.context(Arc::clone(&self.shared.mappers[0])),
            id,
            self.shared.config.role,
            target_uri,
            options.is_test,
        );
        info!(
            "[create_conversation] Created conversation {} to {target_uri}",
            conversation.id()
        );
        self.register(&conversation);
        Ok(conversation)
    }

    /// Re-register a persisted conversation in the configured namespace.
    pub fn restore_conversation(&self, snapshot: ConversationSnapshot) -> Conversation {
        let conversation = Conversation::restore(self.context(Arc::clone(&self.shared.mappers[0])), snapshot);
        self.register(&conversation);
        conversation
    }

    pub fn conversation(&self, id: &str) -> Option<Conversation> {
        self.shared.conversations.lock().get(id).cloned()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.shared.conversations.lock().values().cloned().collect()
    }

    /// Forget a conversation. Once the last handle is dropped its heartbeat
    /// stops and queued messages resolve to [`ConversationError::Discarded`].
    ///
    /// # Errors
    /// [`AgentError::ConversationNotFound`] for an unknown id.
    pub fn remove_conversation(&self, id: &str) -> Result<Conversation, AgentError> {
        let removed = self
            .shared
            .conversations
            .lock()
            .remove(id)
            .ok_or_else(|| AgentError::ConversationNotFound(id.to_string()))?;
        info!("[remove_conversation] Removed conversation {id}");
        Ok(removed)
    }

    /// Called with every conversation the agent registers, before the first
    /// inbound message of an incoming conversation is processed.
    pub fn add_conversation_listener(
        &self,
        listener: impl Fn(&Conversation) + Send + Sync + 'static,
    ) -> ListenerId {
        self.shared.conversation_listeners.add(listener)
    }

    pub fn remove_conversation_listener(&self, id: ListenerId) -> bool {
        self.shared.conversation_listeners.remove(id)
    }

    /// Route an inbound event to its conversation, creating an incoming
    /// conversation for an unknown call id.
    ///
    /// # Errors
    /// [`AgentError::IncompatibleNamespace`] if no mapper recognizes the
    /// headers. The message is dropped.
    pub fn handle_event(&self, event: &SipEvent) -> Result<Conversation, AgentError> {
        let Some(mapper) = self
            .shared
            .mappers
            .iter()
            .find(|m| m.is_compatible(&event.headers))
        else {
            warn!(
                "[handle_event] Dropping message from {}: no compatible namespace",
                event.from
            );
            return Err(AgentError::IncompatibleNamespace);
        };

        let call_id = mapper
            .call_id_from_headers(&event.headers)
            .ok_or(AgentError::MissingCallId)?;

        let conversation = match self.conversation(&call_id) {
            Some(conversation) => conversation,
            None => {
                let parsed = mapper
                    .parse_message_from_event(event)
                    .map_err(ConversationError::from)?;
                let target_uri = parsed
                    .reply_to
                    .or(parsed.from_uri)
                    .unwrap_or_else(|| event.from.clone());

                if mapper.kind() != self.shared.config.namespace {
                    debug!("[handle_event] Conversation {call_id} uses fallback namespace {}", mapper.kind());
                }
                let conversation = Conversation::new(
                    self.context(Arc::clone(mapper)),
                    call_id.clone(),
                    self.shared.config.role,
                    target_uri,
                    parsed.is_test,
                );
                info!("[handle_event] New incoming conversation {call_id}");
                self.register(&conversation);
                conversation
            }
        };

        conversation.handle_event(event)?;
        Ok(conversation)
    }

    /// Forward everything the adapter receives into [`Agent::handle_event`]
    /// until [`Agent::shutdown`] is called.
    pub fn listen(&self) -> JoinHandle<()> {
        let mut inbound = self.shared.adapter.subscribe();
        let cancel = self.shared.cancel.clone();
        let agent = self.clone();

        tokio::spawn(async move {
            info!("[listen] Forwarding inbound messages started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    maybe = inbound.recv() => {
                        let Some(event) = maybe else { break };
                        if let Err(err) = agent.handle_event(&event) {
                            warn!("[listen] Inbound message not processed: {err}");
                        }
                    }
                }
            }
            info!("[listen] Forwarding inbound messages stopped");
        })
    }

    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
    }
}
