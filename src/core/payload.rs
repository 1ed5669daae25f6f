//! Value objects carried alongside message text.
//!
//! Location (PIDF-LO) and vcard payloads are opaque XML documents here; the
//! crate only needs to compare them and move them in and out of MIME parts.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::multipart::{Header, MultipartPart};

pub const PIDF_CONTENT_TYPE: &str = "application/pidf+xml";
pub const SUBSCRIBER_INFO_CONTENT_TYPE: &str = "application/addCallSub+xml";

const SUBSCRIBER_INFO_NS: &str = "urn:ietf:params:xml:ns:EmergencyCallData:SubscriberInfo";
const VCARD_NS: &str = "urn:ietf:params:xml:ns:vcard-4.0";

static SUBSCRIBER_DATA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<(?:[\w-]+:)?SubscriberData\b[^>]*>(.*?)</(?:[\w-]+:)?SubscriberData\s*>")
        .expect("valid subscriber data regex")
});

/// Collapse whitespace between tags so formatting differences don't matter.
fn normalize_xml(xml: &str) -> String {
    xml.lines().map(str::trim).collect::<Vec<_>>().join("")
}

/// PIDF-LO location document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Location {
    xml: String,
}

impl Location {
    pub fn from_xml(xml: impl Into<String>) -> Self {
        Self { xml: xml.into() }
    }

    pub fn to_xml(&self) -> &str {
        &self.xml
    }
}

impl PartialEq for Location {
    fn eq(&self, other: &Self) -> bool {
        normalize_xml(&self.xml) == normalize_xml(&other.xml)
    }
}

/// vCard 4.0 XML (`<vcard>...</vcard>`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VCard {
    xml: String,
}

impl VCard {
    pub fn from_xml(xml: impl Into<String>) -> Self {
        Self { xml: xml.into() }
    }

    pub fn to_xml(&self) -> &str {
        &self.xml
    }

    /// Wrap the vcard into an RFC 7852 subscriber-info document.
    pub fn to_subscriber_info(&self) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <sub:EmergencyCallData.SubscriberInfo xmlns:sub=\"{SUBSCRIBER_INFO_NS}\" privacyRequested=\"false\">\
             <sub:SubscriberData xmlns=\"{VCARD_NS}\">{}</sub:SubscriberData>\
             </sub:EmergencyCallData.SubscriberInfo>",
            self.xml
        )
    }

    /// Extract the vcard from a subscriber-info document.
    pub fn from_subscriber_info(xml: &str) -> Option<Self> {
        let inner = SUBSCRIBER_DATA.captures(xml)?.get(1)?.as_str().trim();
        (!inner.is_empty()).then(|| Self::from_xml(inner))
    }
}

impl PartialEq for VCard {
    fn eq(&self, other: &Self) -> bool {
        normalize_xml(&self.xml) == normalize_xml(&other.xml)
    }
}

/// Binary attachment, base64-encoded on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binary {
    pub content_type: String,
    pub data: Vec<u8>,
}

impl Binary {
    pub fn new(content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            data,
        }
    }

    pub fn to_part(&self) -> MultipartPart {
        MultipartPart::new(
            vec![
                Header::new("Content-Type", self.content_type.clone()),
                Header::new("Content-Transfer-Encoding", "base64"),
            ],
            STANDARD.encode(&self.data),
        )
    }

    /// Read a binary back from a part. Parts without a base64 transfer
    /// encoding are taken verbatim.
    pub fn from_part(part: &MultipartPart) -> Self {
        let content_type = part
            .header("Content-Type")
            .unwrap_or("application/octet-stream")
            .to_string();
        let is_base64 = part
            .header("Content-Transfer-Encoding")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("base64"));

        let data = if is_base64 {
            let compact: String = part.body.split_whitespace().collect();
            STANDARD
                .decode(compact)
                .unwrap_or_else(|_| part.body.as_bytes().to_vec())
        } else {
            part.body.as_bytes().to_vec()
        };

        Self { content_type, data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VCARD: &str = "<vcard><fn><text>Jane Doe</text></fn></vcard>";

    #[test]
    fn test_subscriber_info_wrapping() {
        let vcard = VCard::from_xml(VCARD);
        let wrapped = vcard.to_subscriber_info();
        assert!(wrapped.contains("EmergencyCallData.SubscriberInfo"));
        assert_eq!(VCard::from_subscriber_info(&wrapped), Some(vcard));
    }

    #[test]
    fn test_subscriber_info_without_prefix() {
        let xml = format!("<SubscriberInfo><SubscriberData xmlns=\"x\">\n  {VCARD}\n</SubscriberData></SubscriberInfo>");
        assert_eq!(VCard::from_subscriber_info(&xml), Some(VCard::from_xml(VCARD)));
        assert_eq!(VCard::from_subscriber_info("<nothing/>"), None);
    }

    #[test]
    fn test_location_equality_ignores_indentation() {
        let a = Location::from_xml("<presence>\n  <tuple/>\n</presence>");
        let b = Location::from_xml("<presence><tuple/></presence>");
        assert_eq!(a, b);
        assert_ne!(a, Location::from_xml("<presence><other/></presence>"));
    }

    #[test]
    fn test_binary_part() {
        let binary = Binary::new("image/png", vec![0, 1, 2, 250]);
        let part = binary.to_part();
        assert_eq!(part.header("Content-Transfer-Encoding"), Some("base64"));
        assert_eq!(Binary::from_part(&part), binary);
    }
}
