//! Orchestration layer: conversations, the agent that owns them and the
//! settings they share.
//!
//! - [`Agent`] - routes inbound SIP messages and creates conversations
//! - [`Conversation`] - outbound queue, state machine and heartbeat timer
//! - [`Store`] - location, vcard, DID, mode and heartbeat interval
//! - [`AgentConfig`] - configuration from JSON or the environment
//!
//! ```ignore
//! use ng112::app::{Agent, AgentConfig, ConversationOptions, MessageDraft};
//!
//! let agent = Agent::new(config, &factory)?;
//! agent.listen();
//! let conversation = agent.create_conversation("sip:144@dec112.eu", ConversationOptions::default())?;
//! conversation.start(MessageDraft::text("Help, there is a fire"))?;
//! ```

mod agent;
mod config;
mod conversation;
mod listeners;
mod store;

pub use agent::{Agent, ConversationOptions};
pub use config::{parse_role, AgentConfig};
pub use conversation::{
    generate_conversation_id, Conversation, ConversationContext, ConversationSnapshot,
    MessageDraft, SendHandle, SentMessage,
};
pub use listeners::{ListenerId, Listeners};
pub use store::{Mode, Store, MAX_HEARTBEAT_INTERVAL_MS, MIN_HEARTBEAT_INTERVAL_MS};
