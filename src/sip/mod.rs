//! SIP transport collaborator: the adapter contract and an in-memory network.
mod error;
mod loopback;
mod transport;

pub use error::TransportError;
pub use loopback::{LoopbackAdapter, LoopbackNetwork};
pub use transport::{MessageOptions, SipAdapter, SipAdapterFactory, SipEvent};
