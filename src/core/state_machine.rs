//! Conversation state machine.
//!
//! # States
//!
//! - **Unknown**: initial state, nothing has been exchanged yet
//! - **Started**: the emergency conversation is running
//! - **Interrupted**: the conversation was paused (client inactive, transfer, ...)
//! - **Error**: the remote party rejected a message
//! - **Stopped**: terminal, no transition leaves this state
//!
//! # State Transitions
//!
//! ```text
//! Unknown     -- START (guarded) --> Started
//! Started     -- STOP -----------> Stopped
//! Started     -- INTERRUPT ------> Interrupted
//! Started     -- ERROR ----------> Error
//! Interrupted -- START (guarded) --> Started
//! Interrupted -- STOP -----------> Stopped
//! Error       -- START (guarded) --> Started
//! Error       -- STOP -----------> Stopped
//! ```
//!
//! Events that have no entry in the table are ignored. The START guard only
//! lets a conversation start when the start is caused by the right party:
//!
//! - CLIENT role: the start must come from the remote PSAP. If the namespace
//!   requires PSAP-issued START messages the type must be exactly START,
//!   otherwise any type that [`MessageType::is_started`] accepts.
//! - PSAP role: the start must be a local message of type exactly START.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::message::Origin;
use crate::core::message_type::MessageType;

/// Which side of the emergency conversation this endpoint plays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    #[default]
    Client,
    Psap,
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let role = match self {
            Role::Client => "CLIENT",
            Role::Psap => "PSAP",
        };
        write!(f, "{role}")
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationState {
    #[default]
    Unknown,
    Started,
    Interrupted,
    Stopped,
    Error,
}

impl Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self {
            ConversationState::Unknown => "UNKNOWN",
            ConversationState::Started => "STARTED",
            ConversationState::Interrupted => "INTERRUPTED",
            ConversationState::Stopped => "STOPPED",
            ConversationState::Error => "ERROR",
        };
        write!(f, "{state}")
    }
}

/// Current state and whoever caused it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateObject {
    pub value: ConversationState,
    pub origin: Origin,
}

impl Default for StateObject {
    fn default() -> Self {
        Self {
            value: ConversationState::Unknown,
            origin: Origin::System,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateEvent {
    Start {
        origin: Origin,
        message_type: Option<MessageType>,
    },
    Stop {
        origin: Origin,
    },
    Error {
        origin: Origin,
    },
    Interrupt {
        origin: Origin,
    },
}

impl StateEvent {
    /// The event a message of `message_type` drives.
    ///
    /// START and HEARTBEAT win over the interrupt flags, so a heartbeat sent
    /// while the client is INACTIVE keeps the conversation STARTED.
    pub fn for_message(message_type: MessageType, origin: Origin) -> Self {
        if message_type.is_stopped() {
            StateEvent::Stop { origin }
        } else if !message_type.is_started() && message_type.is_interrupted() {
            StateEvent::Interrupt { origin }
        } else {
            StateEvent::Start {
                origin,
                message_type: Some(message_type),
            }
        }
    }

    pub fn origin(&self) -> Origin {
        match *self {
            StateEvent::Start { origin, .. }
            | StateEvent::Stop { origin }
            | StateEvent::Error { origin }
            | StateEvent::Interrupt { origin } => origin,
        }
    }
}

/// Errors from state machine operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    /// START events must say which message type caused them.
    #[error("START event without a message type")]
    MissingMessageType,
}

/// State machine for a single conversation.
#[derive(Debug, Clone)]
pub struct ConversationStateMachine {
    state: StateObject,
    role: Role,
    /// Whether the namespace requires the PSAP to send START.
    psap_start_required: bool,
    /// Set on the first transition into Started, never cleared.
    has_been_started: bool,
}

impl ConversationStateMachine {
    pub fn new(role: Role, psap_start_required: bool) -> Self {
        Self {
            state: StateObject::default(),
            role,
            psap_start_required,
            has_been_started: false,
        }
    }

    /// Rebuild a machine in a previously persisted state.
    pub fn restore(role: Role, psap_start_required: bool, state: StateObject) -> Self {
        Self {
            has_been_started: state.value != ConversationState::Unknown,
            state,
            role,
            psap_start_required,
        }
    }

    pub fn current_state(&self) -> StateObject {
        self.state
    }

    pub fn has_been_started(&self) -> bool {
        self.has_been_started
    }

    /// Run one event through the machine.
    ///
    /// # Returns
    /// The new state if the state value changed, `None` if the event was
    /// ignored or re-entered the current state.
    ///
    /// # Errors
    /// [`StateMachineError::MissingMessageType`] for a START without type.
    pub fn send(&mut self, event: StateEvent) -> Result<Option<StateObject>, StateMachineError> {
        let Some(target) = self.transition(event)? else {
            debug!(
                "[send] Ignoring {:?} in state {}",
                event, self.state.value
            );
            return Ok(None);
        };

        if target == self.state.value {
            return Ok(None);
        }

        info!(
            "[send] Transitioning from {} to {} (origin {})",
            self.state.value,
            target,
            event.origin()
        );
        self.state = StateObject {
            value: target,
            origin: event.origin(),
        };
        if target == ConversationState::Started {
            self.has_been_started = true;
        }
        Ok(Some(self.state))
    }

    fn transition(&self, event: StateEvent) -> Result<Option<ConversationState>, StateMachineError> {
        use ConversationState::*;

        let target = match (self.state.value, event) {
            (_, StateEvent::Start { message_type: None, .. }) => {
                return Err(StateMachineError::MissingMessageType)
            }
            (Started, StateEvent::Start { .. }) => Some(Started),
            (Unknown | Interrupted | Error, StateEvent::Start { origin, message_type: Some(t) }) => {
                self.may_start(origin, t).then_some(Started)
            }
            (Started, StateEvent::Stop { .. }) => Some(Stopped),
            (Started, StateEvent::Interrupt { .. }) => Some(Interrupted),
            (Started, StateEvent::Error { .. }) => Some(Error),
            (Interrupted | Error, StateEvent::Stop { .. }) => Some(Stopped),
            _ => None,
        };
        Ok(target)
    }

    fn may_start(&self, origin: Origin, message_type: MessageType) -> bool {
        match (self.role, origin) {
            (Role::Client, Origin::Remote) if self.psap_start_required => {
                message_type == MessageType::START
            }
            (Role::Client, Origin::Remote) => message_type.is_started(),
            (Role::Psap, Origin::Local) => message_type == MessageType::START,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(origin: Origin, message_type: MessageType) -> StateEvent {
        StateEvent::Start {
            origin,
            message_type: Some(message_type),
        }
    }

    #[test]
    fn test_state_machine_creation() {
        let machine = ConversationStateMachine::new(Role::Client, true);
        assert_eq!(machine.current_state(), StateObject::default());
        assert!(!machine.has_been_started());
    }

    #[test]
    fn test_client_started_by_remote_start() {
        let mut machine = ConversationStateMachine::new(Role::Client, true);
        let changed = machine.send(start(Origin::Remote, MessageType::START)).unwrap();

        assert_eq!(
            changed,
            Some(StateObject {
                value: ConversationState::Started,
                origin: Origin::Remote
            })
        );
        assert!(machine.has_been_started());
    }

    #[test]
    fn test_client_ignores_local_start() {
        let mut machine = ConversationStateMachine::new(Role::Client, true);
        assert_eq!(machine.send(start(Origin::Local, MessageType::START)).unwrap(), None);
        assert_eq!(machine.current_state().value, ConversationState::Unknown);
        assert!(!machine.has_been_started());
    }

    #[test]
    fn test_client_requires_exact_start_when_psap_start_required() {
        let mut machine = ConversationStateMachine::new(Role::Client, true);
        assert_eq!(machine.send(start(Origin::Remote, MessageType::IN_CHAT)).unwrap(), None);

        let mut machine = ConversationStateMachine::new(Role::Client, false);
        assert!(machine
            .send(start(Origin::Remote, MessageType::IN_CHAT))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_psap_started_by_local_start_only() {
        let mut machine = ConversationStateMachine::new(Role::Psap, true);
        assert_eq!(machine.send(start(Origin::Remote, MessageType::START)).unwrap(), None);
        assert_eq!(machine.send(start(Origin::Local, MessageType::IN_CHAT)).unwrap(), None);
        assert!(machine.send(start(Origin::Local, MessageType::START)).unwrap().is_some());
        assert_eq!(machine.current_state().origin, Origin::Local);
    }

    #[test]
    fn test_start_without_type_is_fatal() {
        let mut machine = ConversationStateMachine::new(Role::Psap, true);
        let result = machine.send(StateEvent::Start {
            origin: Origin::Local,
            message_type: None,
        });
        assert_eq!(result, Err(StateMachineError::MissingMessageType));
    }

    #[test]
    fn test_reentering_state_keeps_origin() {
        let mut machine = ConversationStateMachine::new(Role::Client, false);
        machine.send(start(Origin::Remote, MessageType::IN_CHAT)).unwrap();
        assert_eq!(machine.send(start(Origin::Local, MessageType::HEARTBEAT)).unwrap(), None);
        assert_eq!(machine.current_state().origin, Origin::Remote);
    }

    #[test]
    fn test_stopped_is_terminal() {
        let mut machine = ConversationStateMachine::new(Role::Client, true);
        machine.send(start(Origin::Remote, MessageType::START)).unwrap();
        machine.send(StateEvent::Stop { origin: Origin::Local }).unwrap();
        assert_eq!(machine.current_state().value, ConversationState::Stopped);

        for origin in [Origin::Local, Origin::Remote, Origin::System] {
            for t in [MessageType::START, MessageType::IN_CHAT, MessageType::HEARTBEAT] {
                assert_eq!(machine.send(start(origin, t)).unwrap(), None);
            }
            assert_eq!(machine.send(StateEvent::Error { origin }).unwrap(), None);
            assert_eq!(machine.send(StateEvent::Interrupt { origin }).unwrap(), None);
        }
        assert_eq!(machine.current_state().value, ConversationState::Stopped);
    }

    #[test]
    fn test_interrupt_and_resume() {
        let mut machine = ConversationStateMachine::new(Role::Client, false);
        machine.send(start(Origin::Remote, MessageType::IN_CHAT)).unwrap();
        machine.send(StateEvent::Interrupt { origin: Origin::Local }).unwrap();
        assert_eq!(machine.current_state().value, ConversationState::Interrupted);

        machine.send(start(Origin::Remote, MessageType::IN_CHAT)).unwrap();
        assert_eq!(machine.current_state().value, ConversationState::Started);
    }

    #[test]
    fn test_error_then_stop() {
        let mut machine = ConversationStateMachine::new(Role::Psap, true);
        machine.send(start(Origin::Local, MessageType::START)).unwrap();
        machine.send(StateEvent::Error { origin: Origin::Remote }).unwrap();
        assert_eq!(
            machine.current_state(),
            StateObject {
                value: ConversationState::Error,
                origin: Origin::Remote
            }
        );
        machine.send(StateEvent::Stop { origin: Origin::Remote }).unwrap();
        assert_eq!(machine.current_state().value, ConversationState::Stopped);
        assert!(machine.has_been_started());
    }

    #[test]
    fn test_inactive_heartbeat_keeps_started() {
        let mut machine = ConversationStateMachine::new(Role::Psap, true);
        machine.send(start(Origin::Local, MessageType::START)).unwrap();

        let inactive = MessageType::HEARTBEAT.with(MessageType::INACTIVE);
        assert_eq!(machine.send(StateEvent::for_message(inactive, Origin::Remote)).unwrap(), None);
        assert_eq!(machine.current_state().value, ConversationState::Started);
    }

    #[test]
    fn test_event_for_message() {
        assert_eq!(
            StateEvent::for_message(MessageType::STOP, Origin::Remote),
            StateEvent::Stop { origin: Origin::Remote }
        );
        assert_eq!(
            StateEvent::for_message(MessageType::HEARTBEAT.with(MessageType::INACTIVE), Origin::Local),
            StateEvent::Start {
                origin: Origin::Local,
                message_type: Some(MessageType::HEARTBEAT.with(MessageType::INACTIVE))
            }
        );
        assert_eq!(
            StateEvent::for_message(MessageType::TRANSFER, Origin::Remote),
            StateEvent::Interrupt { origin: Origin::Remote }
        );
        assert_eq!(
            StateEvent::for_message(MessageType::UNKNOWN, Origin::Remote),
            StateEvent::Interrupt { origin: Origin::Remote }
        );
        assert_eq!(
            StateEvent::for_message(MessageType::IN_CHAT, Origin::Remote),
            StateEvent::Start {
                origin: Origin::Remote,
                message_type: Some(MessageType::IN_CHAT)
            }
        );
    }
}
