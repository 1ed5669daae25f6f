use crate::core::Origin;

/// A message could not be delivered by the SIP adapter.
///
/// `origin` tells who is to blame: [`Origin::Remote`] for a final error
/// response from the other party, [`Origin::System`] or [`Origin::Local`] for
/// local network or stack failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("SIP transport failure: {reason} (code {code:?}, origin {origin})")]
pub struct TransportError {
    pub reason: String,
    pub code: Option<u16>,
    pub origin: Origin,
}

impl TransportError {
    /// The remote party answered with an error response.
    pub fn remote(code: u16, reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            code: Some(code),
            origin: Origin::Remote,
        }
    }

    /// The message never reached the remote party.
    pub fn local(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            code: None,
            origin: Origin::System,
        }
    }

    pub fn is_remote(&self) -> bool {
        self.origin == Origin::Remote
    }
}
