//! NG112 / DEC112 emergency conversations over SIP MESSAGE.
//!
//! A CLIENT (caller device) and a PSAP (call-taker) exchange text, location
//! and identity messages that together form an emergency conversation. This
//! crate implements the protocol logic on top of any SIP stack that can
//! send and receive MESSAGE requests.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        app::Agent                         │
//! │  registry by call id, Store, namespace mappers            │
//! ├───────────────────────────────────────────────────────────┤
//! │                     app::Conversation                     │
//! │  queue, heartbeat timer, listeners                        │
//! ├──────────────────────────┬────────────────────────────────┤
//! │ namespace (ETSI, DEC112) │ core                           │
//! │  headers + body <─> Msg  │  state machine, message type,  │
//! │                          │  multipart, message entity     │
//! ├──────────────────────────┴────────────────────────────────┤
//! │                  sip::SipAdapter (external)               │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`core`] - protocol pieces without I/O
//! - [`namespace`] - wire mapping for ETSI TS 103 698 and DEC112
//! - [`sip`] - SIP adapter contract and an in-memory loopback network
//! - [`app`] - conversations, agent, store and configuration
//! - [`logging`] - tracing subscriber setup

pub mod app;
pub mod core;
pub mod error;
pub mod logging;
pub mod namespace;
pub mod sip;

pub use error::{AgentError, ConversationError, LoggingError, NamespaceError, ValidationError};
