//! The message entity exchanged inside a conversation.
//!
//! Outgoing messages are built from explicit fields (text, location, ...) and
//! only turned into a multipart body by the namespace mapper at send time.
//! Incoming messages carry the parsed multipart body and derive their fields
//! from it lazily, the first time each one is read.

use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::derived::Derived;
use crate::core::message_type::MessageType;
use crate::core::multipart::{media_type, Multipart, MultipartPart};
use crate::core::payload::{Binary, Location, VCard, PIDF_CONTENT_TYPE, SUBSCRIBER_INFO_CONTENT_TYPE};

pub const TEXT_CONTENT_TYPE: &str = "text/plain";
pub const HTML_CONTENT_TYPE: &str = "text/html";
pub const URI_LIST_CONTENT_TYPE: &str = "text/uri-list";

/// Content types that map to a dedicated message field. Anything else is a binary.
const KNOWN_CONTENT_TYPES: [&str; 5] = [
    TEXT_CONTENT_TYPE,
    HTML_CONTENT_TYPE,
    URI_LIST_CONTENT_TYPE,
    PIDF_CONTENT_TYPE,
    SUBSCRIBER_INFO_CONTENT_TYPE,
];

static NEXT_UNIQUE_ID: AtomicU64 = AtomicU64::new(1);

fn next_unique_id() -> u64 {
    NEXT_UNIQUE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Who caused a message or a state change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Origin {
    Local,
    Remote,
    System,
}

impl Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let origin = match self {
            Origin::Local => "LOCAL",
            Origin::Remote => "REMOTE",
            Origin::System => "SYSTEM",
        };
        write!(f, "{origin}")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageState {
    Pending,
    Success,
    Error,
}

/// Protocol-level message id. Outgoing ids are always numeric; remote
/// implementations may use arbitrary strings.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Numeric(u64),
    Text(String),
}

impl Default for MessageId {
    fn default() -> Self {
        MessageId::Numeric(0)
    }
}

impl MessageId {
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        value
            .parse::<u64>()
            .map(MessageId::Numeric)
            .unwrap_or_else(|_| MessageId::Text(value.to_string()))
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageId::Numeric(id) => write!(f, "{id}"),
            MessageId::Text(id) => write!(f, "{id}"),
        }
    }
}

/// A message of an emergency conversation.
#[derive(Clone, Debug)]
pub struct Message {
    id: MessageId,
    unique_id: u64,
    origin: Origin,
    message_type: MessageType,
    /// Shared by all clones, so every copy of a sent message sees the
    /// transport outcome.
    state: Arc<Mutex<MessageState>>,
    date_time: DateTime<Utc>,
    did: Option<String>,
    extra_parts: Vec<MultipartPart>,
    multipart: Option<Multipart>,

    text: Derived<Option<String>>,
    html: Derived<Option<String>>,
    uris: Derived<Vec<String>>,
    vcard: Derived<Option<VCard>>,
    location: Derived<Option<Location>>,
    binaries: Derived<Vec<Binary>>,
}

impl Message {
    fn new(id: MessageId, origin: Origin, message_type: MessageType) -> Self {
        Self {
            id,
            unique_id: next_unique_id(),
            origin,
            message_type,
            state: Arc::new(Mutex::new(MessageState::Pending)),
            date_time: Utc::now(),
            did: None,
            extra_parts: Vec::new(),
            multipart: None,
            text: Derived::new(derive_text),
            html: Derived::new(derive_html),
            uris: Derived::new(derive_uris),
            vcard: Derived::new(derive_vcard),
            location: Derived::new(derive_location),
            binaries: Derived::new(derive_binaries),
        }
    }

    /// A message created on this side. Fields are set explicitly and the
    /// multipart body is assembled when the message is sent.
    pub fn outgoing(id: u64, origin: Origin, message_type: MessageType) -> Self {
        Self::new(MessageId::Numeric(id), origin, message_type)
    }

    /// A message received from the network, backed by its parsed body.
    pub fn incoming(
        id: MessageId,
        origin: Origin,
        message_type: MessageType,
        multipart: Multipart,
    ) -> Self {
        let mut message = Self::new(id, origin, message_type);
        message.multipart = Some(multipart);
        message.set_state(MessageState::Success);
        message
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    /// Process-wide unique and monotonic id, independent of the protocol id.
    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn state(&self) -> MessageState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: MessageState) {
        *self.state.lock() = state;
    }

    pub fn date_time(&self) -> DateTime<Utc> {
        self.date_time
    }

    pub fn set_date_time(&mut self, date_time: DateTime<Utc>) {
        self.date_time = date_time;
    }

    pub fn did(&self) -> Option<&str> {
        self.did.as_deref()
    }

    pub fn set_did(&mut self, did: Option<String>) {
        self.did = did;
    }

    pub fn extra_parts(&self) -> &[MultipartPart] {
        &self.extra_parts
    }

    pub fn set_extra_parts(&mut self, parts: Vec<MultipartPart>) {
        self.extra_parts = parts;
    }

    pub fn multipart(&self) -> Option<&Multipart> {
        self.multipart.as_ref()
    }

    /// Replace the backing body. Derived fields that were not set explicitly
    /// are recomputed on their next read.
    pub fn set_multipart(&mut self, multipart: Multipart) {
        self.multipart = Some(multipart);
        self.text.invalidate();
        self.html.invalidate();
        self.uris.invalidate();
        self.vcard.invalidate();
        self.location.invalidate();
        self.binaries.invalidate();
    }

    pub fn text(&self) -> Option<&str> {
        self.text.get(self.multipart.as_ref()).as_deref()
    }

    pub fn set_text(&mut self, text: Option<String>) {
        self.text.set(text);
    }

    pub fn html(&self) -> Option<&str> {
        self.html.get(self.multipart.as_ref()).as_deref()
    }

    pub fn set_html(&mut self, html: Option<String>) {
        self.html.set(html);
    }

    pub fn uris(&self) -> &[String] {
        self.uris.get(self.multipart.as_ref())
    }

    pub fn set_uris(&mut self, uris: Vec<String>) {
        self.uris.set(uris);
    }

    pub fn vcard(&self) -> Option<&VCard> {
        self.vcard.get(self.multipart.as_ref()).as_ref()
    }

    pub fn set_vcard(&mut self, vcard: Option<VCard>) {
        self.vcard.set(vcard);
    }

    pub fn location(&self) -> Option<&Location> {
        self.location.get(self.multipart.as_ref()).as_ref()
    }

    pub fn set_location(&mut self, location: Option<Location>) {
        self.location.set(location);
    }

    pub fn binaries(&self) -> &[Binary] {
        self.binaries.get(self.multipart.as_ref())
    }

    pub fn set_binaries(&mut self, binaries: Vec<Binary>) {
        self.binaries.set(binaries);
    }

    /// True if the message carries non-empty text.
    pub fn has_text(&self) -> bool {
        self.text().is_some_and(|t| !t.is_empty())
    }
}

// ─────────────────────────── Derivations ───────────────────────────

fn body_of(multipart: &Multipart, content_type: &str) -> Option<String> {
    multipart.part_by_type(content_type).map(|p| p.body.clone())
}

fn derive_text(multipart: &Multipart) -> Option<String> {
    body_of(multipart, TEXT_CONTENT_TYPE)
}

fn derive_html(multipart: &Multipart) -> Option<String> {
    body_of(multipart, HTML_CONTENT_TYPE)
}

fn derive_uris(multipart: &Multipart) -> Vec<String> {
    multipart
        .parts()
        .iter()
        .filter(|p| p.content_type().as_deref() == Some(URI_LIST_CONTENT_TYPE))
        .flat_map(|p| p.body.lines())
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn derive_vcard(multipart: &Multipart) -> Option<VCard> {
    multipart
        .part_by_type(&SUBSCRIBER_INFO_CONTENT_TYPE.to_ascii_lowercase())
        .and_then(|p| VCard::from_subscriber_info(&p.body))
}

fn derive_location(multipart: &Multipart) -> Option<Location> {
    multipart
        .part_by_type(PIDF_CONTENT_TYPE)
        .map(|p| Location::from_xml(p.body.clone()))
}

fn derive_binaries(multipart: &Multipart) -> Vec<Binary> {
    multipart
        .parts()
        .iter()
        .filter(|p| {
            let content_type = p
                .header("Content-Type")
                .map(media_type)
                .unwrap_or_default();
            !KNOWN_CONTENT_TYPES
                .iter()
                .any(|known| known.eq_ignore_ascii_case(&content_type))
        })
        .map(Binary::from_part)
        .collect()
}
