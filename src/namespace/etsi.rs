//! ETSI TS 103 698 namespace.
//!
//! Call metadata travels in `Call-Info` headers of the form
//!
//! ```text
//! Call-Info: <urn:emergency:uid:callid:{id}:{domain}>;purpose=EmergencyCallData.CallId
//! Call-Info: <urn:emergency:uid:msgid:{id}:{domain}>;purpose=EmergencyCallData.MsgId
//! Call-Info: <urn:emergency:uid:msgtype:{bits}:{domain}>;purpose=EmergencyCallData.MsgType
//! ```
//!
//! The message type is the ETSI bitmask as a decimal integer.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::{Header, MessageId, MessageType, Origin};
use crate::error::NamespaceError;
use crate::namespace::common::{self, call_info_capture, EventEnvelope, PartsBuilder};
use crate::namespace::{
    ClientInfo, MessageParts, MessagePartsParams, NamespaceKind, NamespaceMapper, ParsedMessage,
};
use crate::sip::SipEvent;

const UID_URN: &str = "urn:emergency:uid";
const PURPOSE: &str = "EmergencyCallData";
const TEST_SERVICE_PREFIX: &str = "urn:service:test.";
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(15_000);

static CALL_ID: Lazy<Regex> = Lazy::new(|| uid_pattern("callid", "CallId"));
static MESSAGE_ID: Lazy<Regex> = Lazy::new(|| uid_pattern("msgid", "MsgId"));
static MESSAGE_TYPE: Lazy<Regex> = Lazy::new(|| uid_pattern("msgtype", "MsgType"));
static DID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<\s*([^>\s]+)\s*>\s*;\s*purpose\s*=\s*EmergencyCallData\.DID\b").expect("valid did regex")
});
static COMPATIBLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<\s*urn:emergency:uid:[^>]*>\s*;\s*purpose\s*=\s*EmergencyCallData\.")
        .expect("valid compatibility regex")
});

fn uid_pattern(field: &str, purpose: &str) -> Regex {
    Regex::new(&format!(
        r"(?i)<\s*urn:emergency:uid:{field}:([^:>\s]+)(?::[^>]*)?>\s*;\s*purpose\s*=\s*EmergencyCallData\.{purpose}\b"
    ))
    .expect("valid uid regex")
}

#[derive(Clone, Debug)]
pub struct EtsiMapper {
    domain: String,
}

impl EtsiMapper {
    pub fn new(domain: impl Into<String>) -> Self {
        Self { domain: domain.into() }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    fn uid(&self, field: &str, value: impl std::fmt::Display, purpose: &str) -> String {
        format!("<{UID_URN}:{field}:{value}:{}>;purpose={PURPOSE}.{purpose}", self.domain)
    }
}

fn is_test_service(uri: Option<&str>) -> bool {
    uri.is_some_and(|u| u.to_ascii_lowercase().starts_with(TEST_SERVICE_PREFIX))
}

impl NamespaceMapper for EtsiMapper {
    fn kind(&self) -> NamespaceKind {
        NamespaceKind::Etsi
    }

    fn create_message_parts(&self, params: &MessagePartsParams<'_>) -> Result<MessageParts, NamespaceError> {
        let message = params.message;
        let mut builder = PartsBuilder::new();

        builder
            .call_info(self.uid("callid", params.conversation_id, "CallId"))
            .call_info(self.uid("msgid", message.id(), "MsgId"))
            .call_info(self.uid("msgtype", message.message_type().bits(), "MsgType"));
        if let Some(did) = message.did() {
            builder.call_info(format!("<{did}>;purpose={PURPOSE}.DID"));
        }

        builder.routing(params).payload(message, &self.domain);
        Ok(builder.finish())
    }

    fn parse_message_from_event(&self, event: &SipEvent) -> Result<ParsedMessage, NamespaceError> {
        let envelope = EventEnvelope::parse(event)?;
        let is_test = is_test_service(envelope.to_uri.as_deref())
            || is_test_service(envelope.history_info.as_deref());

        Ok(ParsedMessage {
            call_id: self.call_id_from_headers(&event.headers),
            id: common::message_id_or_default(self.message_id_from_headers(&event.headers)),
            message_type: common::message_type_or_in_chat(
                self.message_type_from_headers(&event.headers, envelope.has_text_message()),
            ),
            origin: Origin::Remote,
            did: call_info_capture(&event.headers, &DID),
            is_test,
            client_info: ClientInfo::default(),
            multipart: envelope.multipart,
            reply_to: envelope.reply_to,
            history_info: envelope.history_info,
            from_uri: envelope.from_uri,
            to_uri: envelope.to_uri,
            remote_display_name: envelope.remote_display_name,
        })
    }

    fn call_id_from_headers(&self, headers: &[Header]) -> Option<String> {
        call_info_capture(headers, &CALL_ID)
    }

    fn message_id_from_headers(&self, headers: &[Header]) -> Option<MessageId> {
        call_info_capture(headers, &MESSAGE_ID).map(|id| MessageId::parse(&id))
    }

    fn message_type_from_headers(&self, headers: &[Header], _has_text_message: bool) -> Option<MessageType> {
        call_info_capture(headers, &MESSAGE_TYPE)
            .and_then(|bits| bits.parse::<u16>().ok())
            .map(MessageType::from_bits)
    }

    fn is_compatible(&self, headers: &[Header]) -> bool {
        common::any_call_info_matches(headers, &COMPATIBLE)
    }

    fn supports_psap_start_message(&self) -> bool {
        true
    }

    fn allows_psap_auto_start(&self) -> bool {
        true
    }

    fn default_heartbeat_interval(&self) -> Duration {
        DEFAULT_HEARTBEAT_INTERVAL
    }
}
