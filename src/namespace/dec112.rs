//! DEC112 namespace.
//!
//! Same transport shape as ETSI but with `dec112-*` purposes, a fixed
//! domain and the DEC112 type bitmask, which also announces whether the
//! body carries location, vcard or text:
//!
//! ```text
//! Call-Info: <urn:dec112:uid:msgtype:{bits}:service.dec112.at>;purpose=dec112-MsgType
//! ```
//!
//! Clients additionally send their device and registration ids, client
//! version and language.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::message_type::dec112::{self, Modifiers};
use crate::core::{Header, MessageId, MessageType, Origin, Role};
use crate::error::NamespaceError;
use crate::namespace::common::{self, call_info_capture, EventEnvelope, PartsBuilder};
use crate::namespace::{
    ClientInfo, MessageParts, MessagePartsParams, NamespaceKind, NamespaceMapper, ParsedMessage,
};
use crate::sip::SipEvent;

pub const DEC112_DOMAIN: &str = "service.dec112.at";

const UID_URN: &str = "urn:dec112:uid";
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10_000);

static CALL_ID: Lazy<Regex> = Lazy::new(|| uid_pattern("callid", "CallId"));
static MESSAGE_ID: Lazy<Regex> = Lazy::new(|| uid_pattern("msgid", "MsgId"));
static MESSAGE_TYPE: Lazy<Regex> = Lazy::new(|| uid_pattern("msgtype", "MsgType"));
static DEVICE_ID: Lazy<Regex> = Lazy::new(|| uid_pattern("deviceid", "DeviceId"));
static REGISTRATION_ID: Lazy<Regex> = Lazy::new(|| uid_pattern("regid", "RegId"));
static CLIENT_VERSION: Lazy<Regex> = Lazy::new(|| uid_pattern("clientversion", "ClientVer"));
static LANGUAGE: Lazy<Regex> = Lazy::new(|| uid_pattern("language", "Lang"));
static DID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<\s*([^>\s]+)\s*>\s*;\s*purpose\s*=\s*dec112-DID\b").expect("valid did regex")
});
static TEST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)>\s*;\s*purpose\s*=\s*dec112-Test\b").expect("valid test regex"));
static COMPATIBLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<\s*urn:dec112:uid:[^>]*>\s*;\s*purpose\s*=\s*dec112-").expect("valid compatibility regex")
});

fn uid_pattern(field: &str, purpose: &str) -> Regex {
    Regex::new(&format!(
        r"(?i)<\s*urn:dec112:uid:{field}:([^:>\s]+)(?::[^>]*)?>\s*;\s*purpose\s*=\s*dec112-{purpose}\b"
    ))
    .expect("valid uid regex")
}

fn uid(field: &str, value: impl std::fmt::Display, purpose: &str) -> String {
    format!("<{UID_URN}:{field}:{value}:{DEC112_DOMAIN}>;purpose=dec112-{purpose}")
}

#[derive(Clone, Debug, Default)]
pub struct Dec112Mapper {
    client_info: ClientInfo,
}

impl Dec112Mapper {
    pub fn new(client_info: ClientInfo) -> Self {
        Self { client_info }
    }

    fn client_info_headers(&self, builder: &mut PartsBuilder) {
        let info = &self.client_info;
        let fields = [
            ("deviceid", &info.device_id, "DeviceId"),
            ("regid", &info.registration_id, "RegId"),
            ("clientversion", &info.client_version, "ClientVer"),
            ("language", &info.language, "Lang"),
        ];
        for (field, value, purpose) in fields {
            if let Some(value) = value {
                builder.call_info(uid(field, value, purpose));
            }
        }
    }
}

fn parse_client_info(headers: &[Header]) -> ClientInfo {
    ClientInfo {
        device_id: call_info_capture(headers, &DEVICE_ID),
        registration_id: call_info_capture(headers, &REGISTRATION_ID),
        client_version: call_info_capture(headers, &CLIENT_VERSION),
        language: call_info_capture(headers, &LANGUAGE),
    }
}

impl NamespaceMapper for Dec112Mapper {
    fn kind(&self) -> NamespaceKind {
        NamespaceKind::Dec112
    }

    fn create_message_parts(&self, params: &MessagePartsParams<'_>) -> Result<MessageParts, NamespaceError> {
        let message = params.message;
        let modifiers = Modifiers {
            has_location: message.location().is_some(),
            has_vcard: message.vcard().is_some(),
            has_text_message: message.has_text(),
        };
        let bits = dec112::encode(message.message_type(), modifiers)?;

        let mut builder = PartsBuilder::new();
        builder
            .call_info(uid("callid", params.conversation_id, "CallId"))
            .call_info(uid("msgid", message.id(), "MsgId"))
            .call_info(uid("msgtype", bits, "MsgType"));

        if params.role == Role::Client {
            self.client_info_headers(&mut builder);
        }
        if params.is_test {
            builder.call_info(uid("test", "true", "Test"));
        }
        if let Some(did) = message.did() {
            builder.call_info(format!("<{did}>;purpose=dec112-DID"));
        }

        builder.routing(params).payload(message, DEC112_DOMAIN);
        Ok(builder.finish())
    }

    fn parse_message_from_event(&self, event: &SipEvent) -> Result<ParsedMessage, NamespaceError> {
        let envelope = EventEnvelope::parse(event)?;
        let headers = &event.headers;

        Ok(ParsedMessage {
            call_id: self.call_id_from_headers(headers),
            id: common::message_id_or_default(self.message_id_from_headers(headers)),
            message_type: common::message_type_or_in_chat(
                self.message_type_from_headers(headers, envelope.has_text_message()),
            ),
            origin: Origin::Remote,
            did: call_info_capture(headers, &DID),
            is_test: common::any_call_info_matches(headers, &TEST),
            client_info: parse_client_info(headers),
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

    fn message_type_from_headers(&self, headers: &[Header], has_text_message: bool) -> Option<MessageType> {
        let bits = call_info_capture(headers, &MESSAGE_TYPE)?.parse::<u16>().ok()?;
        let has_text = has_text_message || dec112::modifiers(bits).has_text_message;
        Some(dec112::decode(bits, has_text))
    }

    fn is_compatible(&self, headers: &[Header]) -> bool {
        common::any_call_info_matches(headers, &COMPATIBLE)
    }

    fn supports_psap_start_message(&self) -> bool {
        false
    }

    fn allows_psap_auto_start(&self) -> bool {
        true
    }

    fn default_heartbeat_interval(&self) -> Duration {
        DEFAULT_HEARTBEAT_INTERVAL
    }
}
