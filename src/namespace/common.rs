//! Header and part building shared by all namespaces.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;
use uuid::Uuid;

use crate::core::message::{HTML_CONTENT_TYPE, TEXT_CONTENT_TYPE, URI_LIST_CONTENT_TYPE};
use crate::core::multipart::{header_values, media_type};
use crate::core::payload::{PIDF_CONTENT_TYPE, SUBSCRIBER_INFO_CONTENT_TYPE};
use crate::core::{Header, Message, MessageId, MessageType, Multipart, MultipartPart, Role};
use crate::error::NamespaceError;
use crate::namespace::{MessageParts, MessagePartsParams};
use crate::sip::SipEvent;

pub const CALL_INFO: &str = "Call-Info";
pub const SUBSCRIBER_INFO_PURPOSE: &str = "EmergencyCallData.SubscriberInfo";

static ANGLE_URI: Lazy<Regex> = Lazy::new(|| Regex::new(r"<\s*([^>\s]+)\s*>").expect("valid uri regex"));
static DISPLAY_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*(?:"((?:[^"\\]|\\.)*)"|([^<"]*?))\s*<"#).expect("valid display name regex")
});

/// Accumulates SIP headers and MIME parts for one outbound message.
#[derive(Debug, Default)]
pub struct PartsBuilder {
    headers: Vec<Header>,
    multipart: Multipart,
}

impl PartsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.headers.push(Header::new(name, value));
        self
    }

    pub fn call_info(&mut self, value: impl Into<String>) -> &mut Self {
        self.header(CALL_INFO, value)
    }

    pub fn part(&mut self, part: MultipartPart) -> &mut Self {
        self.multipart.add(part);
        self
    }

    /// History-Info for the target (skipped for URNs) and Reply-To for PSAPs.
    pub fn routing(&mut self, params: &MessagePartsParams<'_>) -> &mut Self {
        if !is_urn(params.target_uri) {
            self.header("History-Info", format!("<{}>;index=1", params.target_uri));
        }
        if params.role == Role::Psap {
            self.header("Reply-To", format!("<{}>", params.endpoint));
        }
        self
    }

    /// Location, vcard, uri-list, text and any further payload parts.
    pub fn payload(&mut self, message: &Message, domain: &str) -> &mut Self {
        if let Some(location) = message.location() {
            let content_id = content_id(domain);
            self.header("Geolocation", format!("<cid:{content_id}>"))
                .header("Geolocation-Routing", "yes")
                .part(MultipartPart::new(
                    vec![
                        Header::new("Content-Type", PIDF_CONTENT_TYPE),
                        Header::new("Content-ID", format!("<{content_id}>")),
                    ],
                    location.to_xml(),
                ));
        }

        if let Some(vcard) = message.vcard() {
            let content_id = content_id(domain);
            self.call_info(format!("<cid:{content_id}>;purpose={SUBSCRIBER_INFO_PURPOSE}"))
                .part(MultipartPart::new(
                    vec![
                        Header::new("Content-Type", SUBSCRIBER_INFO_CONTENT_TYPE),
                        Header::new("Content-ID", format!("<{content_id}>")),
                    ],
                    vcard.to_subscriber_info(),
                ));
        }

        if !message.uris().is_empty() {
            self.part(MultipartPart::new(
                vec![Header::new("Content-Type", URI_LIST_CONTENT_TYPE)],
                message.uris().join("\n"),
            ));
        }

        if let Some(text) = message.text() {
            self.part(MultipartPart::new(
                vec![Header::new("Content-Type", format!("{TEXT_CONTENT_TYPE}; charset=utf-8"))],
                text,
            ));
        }

        if let Some(html) = message.html() {
            self.part(MultipartPart::new(
                vec![Header::new("Content-Type", format!("{HTML_CONTENT_TYPE}; charset=utf-8"))],
                html,
            ));
        }

        for binary in message.binaries() {
            self.part(binary.to_part());
        }
        for part in message.extra_parts() {
            self.part(part.clone());
        }
        self
    }

    pub fn finish(self) -> MessageParts {
        MessageParts {
            headers: self.headers,
            multipart: self.multipart,
        }
    }
}

pub fn is_urn(uri: &str) -> bool {
    uri.trim_start().get(..4).is_some_and(|s| s.eq_ignore_ascii_case("urn:"))
}

fn content_id(domain: &str) -> String {
    format!("{}@{}", Uuid::new_v4().simple(), domain)
}

/// First URI in angle brackets, or the trimmed value if there are none.
pub fn uri_of(value: &str) -> Option<String> {
    let uri = ANGLE_URI
        .captures(value)
        .and_then(|c| c.get(1))
        .map_or_else(|| value.split(';').next().unwrap_or_default().trim(), |m| m.as_str());
    (!uri.is_empty()).then(|| uri.to_string())
}

/// Display name of a name-addr, e.g. `"Jane Doe" <sip:jane@example.com>`.
pub fn display_name_of(value: &str) -> Option<String> {
    let captures = DISPLAY_NAME.captures(value)?;
    let name = captures.get(1).or_else(|| captures.get(2))?.as_str().trim();
    (!name.is_empty()).then(|| name.replace("\\\"", "\""))
}

/// Capture group 1 of the first `Call-Info` value matching `pattern`.
pub fn call_info_capture(headers: &[Header], pattern: &Regex) -> Option<String> {
    header_values(headers, CALL_INFO).find_map(|value| {
        pattern
            .captures(value)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    })
}

pub fn any_call_info_matches(headers: &[Header], pattern: &Regex) -> bool {
    header_values(headers, CALL_INFO).any(|value| pattern.is_match(value))
}

pub fn message_id_or_default(id: Option<MessageId>) -> MessageId {
    id.unwrap_or_else(|| {
        warn!("[message_id_or_default] inbound message without message id header");
        MessageId::default()
    })
}

/// Missing or unrecognized message types are read as IN_CHAT.
pub fn message_type_or_in_chat(message_type: Option<MessageType>) -> MessageType {
    message_type.unwrap_or_else(|| {
        warn!("[message_type_or_in_chat] missing or unrecognized message type header, assuming IN_CHAT");
        MessageType::IN_CHAT
    })
}

/// Namespace-independent parts of an inbound event.
pub struct EventEnvelope {
    pub multipart: Multipart,
    pub reply_to: Option<String>,
    pub history_info: Option<String>,
    pub from_uri: Option<String>,
    pub to_uri: Option<String>,
    pub remote_display_name: Option<String>,
}

impl EventEnvelope {
    /// Parse the body according to its content type and pick up routing headers.
    ///
    /// A non-multipart body becomes a single-part multipart so that every
    /// message is read the same way.
    pub fn parse(event: &SipEvent) -> Result<Self, NamespaceError> {
        let content_type = event.header("Content-Type").unwrap_or(TEXT_CONTENT_TYPE);
        let multipart = if media_type(content_type).starts_with("multipart/") {
            Multipart::parse(&event.body, content_type)?
        } else if event.body.trim().is_empty() {
            Multipart::new()
        } else {
            Multipart::from_parts(vec![MultipartPart::new(
                vec![Header::new("Content-Type", content_type)],
                event.body.clone(),
            )])
        };

        Ok(Self {
            multipart,
            reply_to: event.header("Reply-To").and_then(uri_of),
            history_info: event.header("History-Info").and_then(uri_of),
            from_uri: uri_of(&event.from),
            to_uri: uri_of(&event.to),
            remote_display_name: display_name_of(&event.from),
        })
    }

    pub fn has_text_message(&self) -> bool {
        self.multipart
            .part_by_type(TEXT_CONTENT_TYPE)
            .is_some_and(|p| !p.body.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Location, MessageType, Origin};

    fn params<'a>(message: &'a Message, role: Role, target: &'a str) -> MessagePartsParams<'a> {
        MessagePartsParams {
            conversation_id: "abc",
            role,
            target_uri: target,
            endpoint: "sip:psap@example.com",
            is_test: false,
            message,
        }
    }

    #[test]
    fn test_routing_headers() {
        let message = Message::outgoing(1, Origin::Local, MessageType::IN_CHAT);

        let mut builder = PartsBuilder::new();
        builder.routing(&params(&message, Role::Client, "sip:144@dec112.eu"));
        let parts = builder.finish();
        assert_eq!(parts.headers, vec![Header::new("History-Info", "<sip:144@dec112.eu>;index=1")]);

        let mut builder = PartsBuilder::new();
        builder.routing(&params(&message, Role::Psap, "urn:service:sos"));
        let parts = builder.finish();
        assert_eq!(parts.headers, vec![Header::new("Reply-To", "<sip:psap@example.com>")]);
    }

    #[test]
    fn test_payload_without_fields_is_empty() {
        let message = Message::outgoing(1, Origin::Local, MessageType::HEARTBEAT);
        let mut builder = PartsBuilder::new();
        builder.payload(&message, "example.com");
        let parts = builder.finish();

        assert!(parts.headers.is_empty());
        assert!(parts.multipart.is_empty());
        assert_eq!(parts.multipart.create().body, "");
    }

    #[test]
    fn test_payload_part_order() {
        let mut message = Message::outgoing(1, Origin::Local, MessageType::IN_CHAT);
        message.set_text(Some("hello".into()));
        message.set_uris(vec!["https://a.example".into(), "https://b.example".into()]);
        message.set_location(Some(Location::from_xml("<presence/>")));

        let mut builder = PartsBuilder::new();
        builder.payload(&message, "example.com");
        let parts = builder.finish();

        let types: Vec<_> = parts
            .multipart
            .parts()
            .iter()
            .map(|p| p.content_type().unwrap_or_default())
            .collect();
        assert_eq!(types, ["application/pidf+xml", "text/uri-list", "text/plain"]);
        assert_eq!(parts.multipart.parts()[1].body, "https://a.example\nhttps://b.example");

        let geolocation = parts.headers.iter().find(|h| h.is("Geolocation")).unwrap();
        let content_id = parts.multipart.parts()[0].header("Content-ID").unwrap();
        assert_eq!(geolocation.value.replace("cid:", ""), content_id);
    }

    #[test]
    fn test_uri_and_display_name() {
        assert_eq!(uri_of("<sip:a@b.c>;index=1").as_deref(), Some("sip:a@b.c"));
        assert_eq!(uri_of("sip:a@b.c;tag=1").as_deref(), Some("sip:a@b.c"));
        assert_eq!(display_name_of("\"Jane Doe\" <sip:jane@x>").as_deref(), Some("Jane Doe"));
        assert_eq!(display_name_of("Jane <sip:jane@x>").as_deref(), Some("Jane"));
        assert_eq!(display_name_of("<sip:jane@x>"), None);
    }

    #[test]
    fn test_envelope_wraps_plain_text() {
        let event = SipEvent::new(
            vec![Header::new("Content-Type", "text/plain")],
            "plain body",
            "<sip:a@x>",
            "<sip:b@x>",
        );
        let envelope = EventEnvelope::parse(&event).unwrap();
        assert_eq!(envelope.multipart.parts().len(), 1);
        assert!(envelope.has_text_message());
        assert_eq!(envelope.to_uri.as_deref(), Some("sip:b@x"));
    }

    #[test]
    fn test_envelope_rejects_multipart_without_boundary() {
        let event = SipEvent::new(
            vec![Header::new("Content-Type", "multipart/mixed")],
            "--x\r\n\r\nbody\r\n--x--",
            "<sip:a@x>",
            "<sip:b@x>",
        );
        assert!(matches!(EventEnvelope::parse(&event), Err(NamespaceError::Malformed(_))));
    }
}
