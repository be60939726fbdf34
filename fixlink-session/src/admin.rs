//! Session-protocol state machine.
//!
//! Two transition tables, one per role, over a shared set of states and
//! events. Every table lookup is total: a `(state, event)` pair outside
//! the table is an [`InvalidStateTransition`], which is fatal to the
//! session.

use fixlink_codec::FieldMap;
use tracing::debug;

use crate::InvalidStateTransition;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AdminState {
    Disconnected,
    /// Initiator only: connection is up, Logon not yet sent.
    LogonRequested,
    LogonExpected,
    /// Acceptor only: Logon received, application callback pending.
    Authenticating,
    Authenticated,
    RejectLogon,
    AcknowledgeLogout,
    AcknowledgeHeartbeat,
    TestRequestRequested,
    SendSequenceReset,
    SetIncomingSeqnum,
    SendTestHeartbeat,
    ValidateTestHeartbeat,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AdminEvent {
    Connected,
    LogonSent,
    LogonReceived,
    LogonAccepted,
    LogonRejected,
    RejectReceived,
    SendLogout,
    LogoutReceived,
    LogoutAcknowledged,
    HeartbeatReceived,
    HeartbeatAcknowledged,
    TestRequestReceived,
    TestRequestSent,
    ResendRequestReceived,
    SequenceResetReceived,
    SequenceResetSent,
    IncomingSeqnumSet,
    TestHeartbeatRequired,
    TestHeartbeatSent,
    TestHeartbeatValid,
    TestHeartbeatInvalid,
}

impl AdminEvent {
    /// Map a decoded MsgType logical name to the inbound admin event.
    pub fn from_msg_type(msg_type: &str) -> Option<AdminEvent> {
        match msg_type {
            "LOGON" => Some(AdminEvent::LogonReceived),
            "LOGOUT" => Some(AdminEvent::LogoutReceived),
            "REJECT" => Some(AdminEvent::RejectReceived),
            "HEARTBEAT" => Some(AdminEvent::HeartbeatReceived),
            "TEST_REQUEST" => Some(AdminEvent::TestRequestReceived),
            "RESEND_REQUEST" => Some(AdminEvent::ResendRequestReceived),
            "SEQUENCE_RESET" => Some(AdminEvent::SequenceResetReceived),
            _ => None,
        }
    }
}

/// An admin event paired with the decoded message that raised it, when
/// there is one.
#[derive(Debug)]
pub struct AdminMessage {
    pub event: AdminEvent,
    pub fields: Option<FieldMap>,
}

impl AdminMessage {
    pub fn new(event: AdminEvent) -> AdminMessage {
        AdminMessage {
            event,
            fields: None,
        }
    }

    pub fn with_fields(event: AdminEvent, fields: FieldMap) -> AdminMessage {
        AdminMessage {
            event,
            fields: Some(fields),
        }
    }
}

/// Which endpoint of the session this engine plays.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    Initiator,
    Acceptor,
}

fn initiator_transition(state: AdminState, event: AdminEvent) -> Option<AdminState> {
    use AdminEvent::*;
    use AdminState::*;
    match (state, event) {
        (Disconnected, Connected) => Some(LogonRequested),
        (LogonRequested, LogonSent) => Some(LogonExpected),
        (LogonExpected, LogonReceived) => Some(Authenticated),
        (LogonExpected, RejectReceived) => Some(Disconnected),

        (Authenticated, HeartbeatReceived) => Some(AcknowledgeHeartbeat),
        (Authenticated, TestRequestReceived) => Some(TestRequestRequested),
        (Authenticated, ResendRequestReceived) => Some(SendSequenceReset),
        (Authenticated, SequenceResetReceived) => Some(SetIncomingSeqnum),
        (Authenticated, LogoutReceived) => Some(AcknowledgeLogout),
        (Authenticated, TestHeartbeatRequired) => Some(SendTestHeartbeat),
        (Authenticated, SendLogout) => Some(Disconnected),

        (AcknowledgeHeartbeat, HeartbeatAcknowledged) => Some(Authenticated),
        (TestRequestRequested, TestRequestSent) => Some(Authenticated),
        (SendSequenceReset, SequenceResetSent) => Some(Authenticated),
        (SetIncomingSeqnum, IncomingSeqnumSet) => Some(Authenticated),
        (AcknowledgeLogout, LogoutAcknowledged) => Some(Disconnected),

        (SendTestHeartbeat, TestHeartbeatSent) => Some(ValidateTestHeartbeat),
        (ValidateTestHeartbeat, HeartbeatReceived) => Some(ValidateTestHeartbeat),
        (ValidateTestHeartbeat, TestHeartbeatValid) => Some(Authenticated),
        // The initiator retries: the next stale timeout sends a new probe.
        (ValidateTestHeartbeat, TestHeartbeatInvalid) => Some(Authenticated),

        _ => None,
    }
}

fn acceptor_transition(state: AdminState, event: AdminEvent) -> Option<AdminState> {
    use AdminEvent::*;
    use AdminState::*;
    match (state, event) {
        (Disconnected, Connected) => Some(LogonExpected),
        (LogonExpected, LogonReceived) => Some(Authenticating),
        (Authenticating, LogonAccepted) => Some(Authenticated),
        (Authenticating, LogonRejected) => Some(RejectLogon),
        (RejectLogon, SendLogout) => Some(Disconnected),

        (Authenticated, HeartbeatReceived) => Some(AcknowledgeHeartbeat),
        (Authenticated, TestRequestReceived) => Some(TestRequestRequested),
        (Authenticated, ResendRequestReceived) => Some(SendSequenceReset),
        (Authenticated, SequenceResetReceived) => Some(SetIncomingSeqnum),
        (Authenticated, LogoutReceived) => Some(AcknowledgeLogout),
        (Authenticated, TestHeartbeatRequired) => Some(SendTestHeartbeat),
        (Authenticated, SendLogout) => Some(Disconnected),

        (AcknowledgeHeartbeat, HeartbeatAcknowledged) => Some(Authenticated),
        (TestRequestRequested, TestRequestSent) => Some(Authenticated),
        (SendSequenceReset, SequenceResetSent) => Some(Authenticated),
        (SetIncomingSeqnum, IncomingSeqnumSet) => Some(Authenticated),
        (AcknowledgeLogout, LogoutAcknowledged) => Some(Disconnected),

        (SendTestHeartbeat, TestHeartbeatSent) => Some(ValidateTestHeartbeat),
        (ValidateTestHeartbeat, HeartbeatReceived) => Some(ValidateTestHeartbeat),
        (ValidateTestHeartbeat, TestHeartbeatValid) => Some(Authenticated),
        (ValidateTestHeartbeat, TestHeartbeatInvalid) => Some(RejectLogon),

        _ => None,
    }
}

#[derive(Debug)]
pub struct AdminStateMachine {
    role: Role,
    state: AdminState,
}

impl AdminStateMachine {
    pub fn new(role: Role) -> AdminStateMachine {
        AdminStateMachine {
            role,
            state: AdminState::Disconnected,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> AdminState {
        self.state
    }

    pub fn transition(&mut self, event: AdminEvent) -> Result<AdminState, InvalidStateTransition> {
        let table = match self.role {
            Role::Initiator => initiator_transition,
            Role::Acceptor => acceptor_transition,
        };
        let next = table(self.state, event).ok_or_else(|| InvalidStateTransition {
            machine: "admin",
            state: format!("{:?}", self.state),
            event: format!("{event:?}"),
        })?;
        debug!(from = ?self.state, ?event, to = ?next, "admin transition");
        self.state = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn initiator_logon_flow() {
        let mut machine = AdminStateMachine::new(Role::Initiator);
        assert_eq!(
            machine.transition(AdminEvent::Connected).unwrap(),
            AdminState::LogonRequested
        );
        assert_eq!(
            machine.transition(AdminEvent::LogonSent).unwrap(),
            AdminState::LogonExpected
        );
        assert_eq!(
            machine.transition(AdminEvent::LogonReceived).unwrap(),
            AdminState::Authenticated
        );
        assert_eq!(
            machine.transition(AdminEvent::LogoutReceived).unwrap(),
            AdminState::AcknowledgeLogout
        );
        assert_eq!(
            machine.transition(AdminEvent::LogoutAcknowledged).unwrap(),
            AdminState::Disconnected
        );
    }

    #[test]
    fn acceptor_logon_flow() {
        let mut machine = AdminStateMachine::new(Role::Acceptor);
        machine.transition(AdminEvent::Connected).unwrap();
        assert_eq!(machine.state(), AdminState::LogonExpected);
        machine.transition(AdminEvent::LogonReceived).unwrap();
        assert_eq!(machine.state(), AdminState::Authenticating);
        machine.transition(AdminEvent::LogonAccepted).unwrap();
        assert_eq!(machine.state(), AdminState::Authenticated);
    }

    #[test]
    fn acceptor_rejects_logon() {
        let mut machine = AdminStateMachine::new(Role::Acceptor);
        machine.transition(AdminEvent::Connected).unwrap();
        machine.transition(AdminEvent::LogonReceived).unwrap();
        machine.transition(AdminEvent::LogonRejected).unwrap();
        assert_eq!(machine.state(), AdminState::RejectLogon);
        machine.transition(AdminEvent::SendLogout).unwrap();
        assert_eq!(machine.state(), AdminState::Disconnected);
    }

    #[test]
    fn undefined_pair_is_an_error() {
        let mut machine = AdminStateMachine::new(Role::Initiator);
        assert_matches!(
            machine.transition(AdminEvent::HeartbeatReceived),
            Err(InvalidStateTransition { .. })
        );
        // The failed transition leaves the state untouched.
        assert_eq!(machine.state(), AdminState::Disconnected);
    }

    #[test]
    fn probe_outcome_depends_on_role() {
        for (role, expected) in [
            (Role::Initiator, AdminState::Authenticated),
            (Role::Acceptor, AdminState::RejectLogon),
        ] {
            let mut machine = AdminStateMachine::new(role);
            machine.transition(AdminEvent::Connected).unwrap();
            if role == Role::Acceptor {
                machine.transition(AdminEvent::LogonReceived).unwrap();
                machine.transition(AdminEvent::LogonAccepted).unwrap();
            } else {
                machine.transition(AdminEvent::LogonSent).unwrap();
                machine.transition(AdminEvent::LogonReceived).unwrap();
            }
            machine.transition(AdminEvent::TestHeartbeatRequired).unwrap();
            machine.transition(AdminEvent::TestHeartbeatSent).unwrap();
            assert_eq!(machine.state(), AdminState::ValidateTestHeartbeat);
            machine.transition(AdminEvent::TestHeartbeatInvalid).unwrap();
            assert_eq!(machine.state(), expected, "{role:?}");
        }
    }

    #[test]
    fn admin_event_from_msg_type() {
        assert_eq!(
            AdminEvent::from_msg_type("LOGON"),
            Some(AdminEvent::LogonReceived)
        );
        assert_eq!(
            AdminEvent::from_msg_type("SEQUENCE_RESET"),
            Some(AdminEvent::SequenceResetReceived)
        );
        assert_eq!(AdminEvent::from_msg_type("NEW_ORDER_SINGLE"), None);
    }
}
