//! Namespace mappers: how a logical message is put on the wire.
//!
//! Two dialects exist, the ETSI TS 103 698 standard ([`EtsiMapper`]) and the
//! DEC112 variant ([`Dec112Mapper`]). Both render a [`Message`] into SIP
//! headers plus a multipart body and parse inbound SIP MESSAGE events back
//! into message fields. Shared header and part building lives in
//! [`PartsBuilder`], which both mappers use by composition.
//!
//! ```text
//!   Message ──create_message_parts()──► MessageParts { headers, multipart }
//!   SipEvent ─parse_message_from_event()──► ParsedMessage
//! ```

mod common;
mod dec112;
mod etsi;

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{Header, Message, MessageId, MessageType, Multipart, Origin, Role};
use crate::error::NamespaceError;
use crate::sip::SipEvent;

pub use common::PartsBuilder;
pub use dec112::{Dec112Mapper, DEC112_DOMAIN};
pub use etsi::EtsiMapper;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceKind {
    #[default]
    Etsi,
    Dec112,
}

impl Display for NamespaceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            NamespaceKind::Etsi => "etsi",
            NamespaceKind::Dec112 => "dec112",
        };
        write!(f, "{kind}")
    }
}

impl std::str::FromStr for NamespaceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "etsi" => Ok(NamespaceKind::Etsi),
            "dec112" => Ok(NamespaceKind::Dec112),
            other => Err(format!("unknown namespace: {other}")),
        }
    }
}

/// Optional DEC112 client metadata, sent by the CLIENT role only.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub device_id: Option<String>,
    pub registration_id: Option<String>,
    pub client_version: Option<String>,
    pub language: Option<String>,
}

/// Conversation context needed to render a message.
#[derive(Clone, Copy, Debug)]
pub struct MessagePartsParams<'a> {
    pub conversation_id: &'a str,
    pub role: Role,
    pub target_uri: &'a str,
    /// This endpoint's own URI, used as reply address.
    pub endpoint: &'a str,
    pub is_test: bool,
    pub message: &'a Message,
}

/// Wire-ready headers and body for a message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageParts {
    pub headers: Vec<Header>,
    pub multipart: Multipart,
}

/// Message fields recovered from an inbound event.
#[derive(Clone, Debug)]
pub struct ParsedMessage {
    pub call_id: Option<String>,
    pub id: MessageId,
    pub message_type: MessageType,
    pub origin: Origin,
    pub multipart: Multipart,
    pub did: Option<String>,
    pub reply_to: Option<String>,
    pub history_info: Option<String>,
    /// URI from the `From` header.
    pub from_uri: Option<String>,
    /// URI from the `To` header.
    pub to_uri: Option<String>,
    pub remote_display_name: Option<String>,
    pub is_test: bool,
    pub client_info: ClientInfo,
}

/// Capability interface implemented by every namespace.
pub trait NamespaceMapper: Send + Sync {
    fn kind(&self) -> NamespaceKind;

    /// Render `params.message` into headers and a multipart body.
    ///
    /// # Errors
    /// [`NamespaceError::UnsupportedType`] if the message type cannot be
    /// expressed in this namespace.
    fn create_message_parts(&self, params: &MessagePartsParams<'_>) -> Result<MessageParts, NamespaceError>;

    /// Parse an inbound event.
    ///
    /// # Errors
    /// [`NamespaceError::Malformed`] if a multipart body announces no boundary.
    fn parse_message_from_event(&self, event: &SipEvent) -> Result<ParsedMessage, NamespaceError>;

    fn call_id_from_headers(&self, headers: &[Header]) -> Option<String>;

    fn message_id_from_headers(&self, headers: &[Header]) -> Option<MessageId>;

    /// `has_text_message` matters for DEC112 only, where an IN_CHAT message
    /// without text is a heartbeat.
    fn message_type_from_headers(&self, headers: &[Header], has_text_message: bool) -> Option<MessageType>;

    /// True if at least one header matches this namespace's URN pattern.
    fn is_compatible(&self, headers: &[Header]) -> bool;

    /// Whether the PSAP sends START messages (and the client waits for them).
    fn supports_psap_start_message(&self) -> bool;

    /// Whether the first chat message of a PSAP that has not started the
    /// conversation yet goes out as START.
    fn allows_psap_auto_start(&self) -> bool;

    fn default_heartbeat_interval(&self) -> Duration;
}

/// Build the mapper for `kind`.
pub fn mapper_for(kind: NamespaceKind, domain: &str, client_info: &ClientInfo) -> Arc<dyn NamespaceMapper> {
    match kind {
        NamespaceKind::Etsi => Arc::new(EtsiMapper::new(domain)),
        NamespaceKind::Dec112 => Arc::new(Dec112Mapper::new(client_info.clone())),
    }
}
