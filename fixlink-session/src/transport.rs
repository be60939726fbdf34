//! Transport-level state machine sitting between the stream processor
//! and the admin machine: a simple loop through `Connected` with one
//! detour per frame and per quiescent tick.

use bytes::Bytes;
use tracing::debug;

use crate::InvalidStateTransition;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportState {
    Disconnected,
    Connected,
    Fix,
    Timeout,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportEvent {
    ConnectionReceived,
    FixReceived,
    FixHandled,
    TimeoutReceived,
    TimeoutHandled,
    DisconnectReceived,
}

/// A transport event with the raw frame that carried it, if any.
#[derive(Debug)]
pub struct TransportMessage {
    pub event: TransportEvent,
    pub buffer: Bytes,
}

impl TransportMessage {
    pub fn event(event: TransportEvent) -> TransportMessage {
        TransportMessage {
            event,
            buffer: Bytes::new(),
        }
    }

    pub fn fix(buffer: Bytes) -> TransportMessage {
        TransportMessage {
            event: TransportEvent::FixReceived,
            buffer,
        }
    }
}

fn transition(state: TransportState, event: TransportEvent) -> Option<TransportState> {
    use TransportEvent::*;
    use TransportState::*;
    match (state, event) {
        (Disconnected, ConnectionReceived) => Some(Connected),
        (Connected, FixReceived) => Some(Fix),
        (Fix, FixHandled) => Some(Connected),
        (Connected, TimeoutReceived) => Some(Timeout),
        (Timeout, TimeoutHandled) => Some(Connected),
        (Connected, DisconnectReceived) => Some(Disconnected),
        _ => None,
    }
}

#[derive(Debug)]
pub struct TransportStateMachine {
    state: TransportState,
}

impl Default for TransportStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportStateMachine {
    pub fn new() -> TransportStateMachine {
        TransportStateMachine {
            state: TransportState::Disconnected,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn transition(
        &mut self,
        event: TransportEvent,
    ) -> Result<TransportState, InvalidStateTransition> {
        let next = transition(self.state, event).ok_or_else(|| InvalidStateTransition {
            machine: "transport",
            state: format!("{:?}", self.state),
            event: format!("{event:?}"),
        })?;
        debug!(from = ?self.state, ?event, to = ?next, "transport transition");
        self.state = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn loops_through_connected() {
        let mut machine = TransportStateMachine::new();
        machine.transition(TransportEvent::ConnectionReceived).unwrap();
        assert_eq!(machine.state(), TransportState::Connected);
        machine.transition(TransportEvent::FixReceived).unwrap();
        machine.transition(TransportEvent::FixHandled).unwrap();
        machine.transition(TransportEvent::TimeoutReceived).unwrap();
        machine.transition(TransportEvent::TimeoutHandled).unwrap();
        assert_eq!(machine.state(), TransportState::Connected);
        machine.transition(TransportEvent::DisconnectReceived).unwrap();
        assert_eq!(machine.state(), TransportState::Disconnected);
    }

    #[test]
    fn frame_before_connection_is_an_error() {
        let mut machine = TransportStateMachine::new();
        assert_matches!(
            machine.transition(TransportEvent::FixReceived),
            Err(InvalidStateTransition { .. })
        );
    }
}
