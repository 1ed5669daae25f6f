//! Message-type bitmasks for the ETSI and DEC112 namespaces.
//!
//! [`MessageType`] is the universal (ETSI TS 103 698) representation used
//! everywhere inside the crate. The [`dec112`] module converts it to and from
//! the DEC112 wire bitmask, which has a different bit layout and carries
//! payload modifiers ("has location", "has vcard", "has text").
//!
//! ```text
//! ETSI                          DEC112
//! bit 1  START                  bit 1      START
//! bit 2  STOP                   bit 1|2    STOP
//! 1|2    IN_CHAT                bit 2      IN_CHAT / HEARTBEAT
//! bit 3  HEARTBEAT              bit 3      has location
//! bit 4  TRANSFER               bit 4      has vcard
//! bit 5  REDIRECT               bit 5      has text
//! bit 6  INACTIVE
//! bit 9  version flag
//! ```

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// ETSI message-type bitmask.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageType(u16);

impl MessageType {
    pub const UNKNOWN: Self = Self(0);
    pub const START: Self = Self(0b0000_0001);
    pub const STOP: Self = Self(0b0000_0010);
    pub const IN_CHAT: Self = Self(0b0000_0011);
    pub const HEARTBEAT: Self = Self(0b0000_0100);
    pub const TRANSFER: Self = Self(0b0000_1000);
    pub const REDIRECT: Self = Self(0b0001_0000);
    pub const INACTIVE: Self = Self(0b0010_0000);
    /// Reserved version flag, never interpreted as a message type.
    pub const VERSION: Self = Self(0b1_0000_0000);

    /// Build a type from raw wire bits. The version flag is stripped.
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits & !Self::VERSION.0)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    /// True if every bit of `other` is set in `self`.
    ///
    /// Note that this is trivially true for `other == UNKNOWN`; callers that
    /// need to detect UNKNOWN must compare for equality instead.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Set or clear `flag` depending on `enabled`.
    pub const fn toggle(self, flag: Self, enabled: bool) -> Self {
        if enabled {
            self.with(flag)
        } else {
            self.without(flag)
        }
    }

    /// START or HEARTBEAT bit present.
    pub fn is_started(self) -> bool {
        self.contains(Self::START) || self.contains(Self::HEARTBEAT)
    }

    /// STOP bit present without the START bit (IN_CHAT carries both).
    pub fn is_stopped(self) -> bool {
        self.contains(Self::STOP) && !self.contains(Self::START)
    }

    pub fn is_heartbeat(self) -> bool {
        self.contains(Self::HEARTBEAT)
    }

    pub fn is_interrupted(self) -> bool {
        self == Self::UNKNOWN
            || self.is_stopped()
            || self.contains(Self::TRANSFER)
            || self.contains(Self::REDIRECT)
            || self.contains(Self::INACTIVE)
    }
}

impl Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match *self {
            Self::UNKNOWN => "UNKNOWN",
            Self::START => "START",
            Self::STOP => "STOP",
            Self::IN_CHAT => "IN_CHAT",
            Self::HEARTBEAT => "HEARTBEAT",
            Self::TRANSFER => "TRANSFER",
            Self::REDIRECT => "REDIRECT",
            Self::INACTIVE => "INACTIVE",
            _ => return write!(f, "{:#011b}", self.0),
        };
        write!(f, "{name}")
    }
}

/// The message type cannot be expressed in the target namespace.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Message type {0} is not supported by the DEC112 namespace")]
pub struct UnsupportedTypeError(pub MessageType);

pub mod dec112 {
    //! DEC112 bit layout and conversion to/from [`MessageType`].

    use super::{MessageType, UnsupportedTypeError};

    pub const START: u16 = 0b0_0001;
    pub const IN_CHAT: u16 = 0b0_0010;
    pub const STOP: u16 = START | IN_CHAT;
    pub const HAS_LOCATION: u16 = 0b0_0100;
    pub const HAS_VCARD: u16 = 0b0_1000;
    pub const HAS_TEXT: u16 = 0b1_0000;

    /// Payload modifiers that DEC112 encodes into the message type.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Modifiers {
        pub has_location: bool,
        pub has_vcard: bool,
        pub has_text_message: bool,
    }

    impl Modifiers {
        fn bits(self) -> u16 {
            let mut bits = 0;
            if self.has_location {
                bits |= HAS_LOCATION;
            }
            if self.has_vcard {
                bits |= HAS_VCARD;
            }
            if self.has_text_message {
                bits |= HAS_TEXT;
            }
            bits
        }
    }

    /// Encode an ETSI type into the DEC112 bitmask.
    ///
    /// # Errors
    /// TRANSFER and REDIRECT have no DEC112 representation.
    pub fn encode(message_type: MessageType, modifiers: Modifiers) -> Result<u16, UnsupportedTypeError> {
        if message_type.contains(MessageType::TRANSFER) || message_type.contains(MessageType::REDIRECT) {
            return Err(UnsupportedTypeError(message_type));
        }

        let base = if message_type.contains(MessageType::IN_CHAT) {
            IN_CHAT
        } else if message_type.contains(MessageType::STOP) {
            STOP
        } else if message_type.contains(MessageType::START) {
            START
        } else if message_type.contains(MessageType::HEARTBEAT) {
            IN_CHAT
        } else {
            0
        };

        Ok(base | modifiers.bits())
    }

    /// Decode a DEC112 bitmask into an ETSI type.
    ///
    /// STOP wins over START. DEC112 has no heartbeat bit, so an IN_CHAT
    /// message without text is reported as HEARTBEAT.
    pub fn decode(bits: u16, has_text_message: bool) -> MessageType {
        if bits & STOP == STOP {
            MessageType::STOP
        } else if bits & START == START {
            MessageType::START
        } else if bits & IN_CHAT == IN_CHAT {
            if has_text_message {
                MessageType::IN_CHAT
            } else {
                MessageType::HEARTBEAT
            }
        } else {
            MessageType::UNKNOWN
        }
    }

    /// Modifier flags carried in a DEC112 bitmask.
    pub fn modifiers(bits: u16) -> Modifiers {
        Modifiers {
            has_location: bits & HAS_LOCATION != 0,
            has_vcard: bits & HAS_VCARD != 0,
            has_text_message: bits & HAS_TEXT != 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::dec112::{self, Modifiers};
    use super::*;

    #[test]
    fn test_predicates() {
        assert!(MessageType::START.is_started());
        assert!(MessageType::IN_CHAT.is_started());
        assert!(MessageType::HEARTBEAT.is_started());
        assert!(!MessageType::STOP.is_started());

        assert!(MessageType::STOP.is_stopped());
        assert!(!MessageType::IN_CHAT.is_stopped());

        assert!(MessageType::HEARTBEAT.is_heartbeat());
        assert!(MessageType::HEARTBEAT.with(MessageType::INACTIVE).is_heartbeat());
    }

    #[test]
    fn test_interrupted_special_cases_unknown() {
        assert!(MessageType::UNKNOWN.is_interrupted());
        assert!(!MessageType::HEARTBEAT.is_interrupted());
        assert!(!MessageType::IN_CHAT.is_interrupted());
        assert!(!MessageType::START.is_interrupted());
        assert!(MessageType::STOP.is_interrupted());
        assert!(MessageType::TRANSFER.is_interrupted());
        assert!(MessageType::REDIRECT.is_interrupted());
        assert!(MessageType::HEARTBEAT.with(MessageType::INACTIVE).is_interrupted());
    }

    #[test]
    fn test_version_flag_is_stripped() {
        let t = MessageType::from_bits(MessageType::VERSION.bits() | MessageType::START.bits());
        assert_eq!(t, MessageType::START);
    }

    #[test]
    fn test_toggle() {
        let t = MessageType::HEARTBEAT.toggle(MessageType::INACTIVE, true);
        assert!(t.contains(MessageType::INACTIVE));
        assert_eq!(t.toggle(MessageType::INACTIVE, false), MessageType::HEARTBEAT);
    }

    #[test]
    fn test_dec112_encode() {
        let none = Modifiers::default();
        assert_eq!(dec112::encode(MessageType::START, none), Ok(dec112::START));
        assert_eq!(dec112::encode(MessageType::STOP, none), Ok(dec112::STOP));
        assert_eq!(dec112::encode(MessageType::HEARTBEAT, none), Ok(dec112::IN_CHAT));

        let all = Modifiers {
            has_location: true,
            has_vcard: true,
            has_text_message: true,
        };
        assert_eq!(
            dec112::encode(MessageType::IN_CHAT, all),
            Ok(dec112::IN_CHAT | dec112::HAS_LOCATION | dec112::HAS_VCARD | dec112::HAS_TEXT)
        );
    }

    #[test]
    fn test_dec112_rejects_transfer_and_redirect() {
        let none = Modifiers::default();
        assert_eq!(
            dec112::encode(MessageType::TRANSFER, none),
            Err(UnsupportedTypeError(MessageType::TRANSFER))
        );
        assert!(dec112::encode(MessageType::REDIRECT, none).is_err());
    }

    #[test]
    fn test_dec112_decode() {
        assert_eq!(dec112::decode(dec112::STOP, false), MessageType::STOP);
        assert_eq!(dec112::decode(dec112::STOP | dec112::HAS_TEXT, true), MessageType::STOP);
        assert_eq!(dec112::decode(dec112::START, false), MessageType::START);
        assert_eq!(dec112::decode(0, true), MessageType::UNKNOWN);
    }

    #[test]
    fn test_dec112_in_chat_without_text_is_heartbeat() {
        for modifier in [0, dec112::HAS_LOCATION, dec112::HAS_VCARD, dec112::HAS_LOCATION | dec112::HAS_VCARD] {
            let bits = dec112::IN_CHAT | modifier;
            assert_eq!(dec112::decode(bits | dec112::HAS_TEXT, true), MessageType::IN_CHAT);
            assert_eq!(dec112::decode(bits, false), MessageType::HEARTBEAT);
        }
    }

    #[test]
    fn test_dec112_modifiers() {
        let m = dec112::modifiers(dec112::IN_CHAT | dec112::HAS_VCARD);
        assert!(m.has_vcard);
        assert!(!m.has_location);
        assert!(!m.has_text_message);
    }
}
