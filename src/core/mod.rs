//! Protocol core: codecs, the message entity and the conversation state machine.
//!
//! Nothing in here performs I/O. The orchestration that ties these pieces to a
//! transport lives in [`crate::app`].
//!
//! # Key Components
//!
//! - [`MessageType`] and [`message_type::dec112`] - ETSI / DEC112 bitmask codec
//! - [`Multipart`] - MIME multipart builder and permissive parser
//! - [`Message`] - message entity with lazily derived payload fields
//! - [`ConversationStateMachine`] - guarded state transitions

mod derived;
pub mod message;
pub mod message_type;
pub mod multipart;
pub mod payload;
pub mod state_machine;

pub use derived::Derived;
pub use message::{Message, MessageId, MessageState, Origin};
pub use message_type::{MessageType, UnsupportedTypeError};
pub use multipart::{Header, MalformedHeaderError, Multipart, MultipartBody, MultipartPart};
pub use payload::{Binary, Location, VCard};
pub use state_machine::{
    ConversationState, ConversationStateMachine, Role, StateEvent, StateMachineError, StateObject,
};
