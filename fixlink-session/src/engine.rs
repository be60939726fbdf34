//! Per-connection session orchestrator.
//!
//! [`SessionEngine`] drives both state machines from the transport event
//! queue: it computes heartbeat and logon deadlines, classifies queue
//! timeouts, decodes inbound frames and walks the admin handler chain
//! until no follow-up event fires. [`EngineCore`] is the slice handed to
//! application callbacks; it owns outbound message construction,
//! sequence number assignment and the write queue.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use fixlink_codec::{
    DecodeError, DecodeOptions, EncodeOptions, FieldMap, FieldValue, decode_message,
    encode_message,
};
use fixlink_metadata::{MessageDef, MsgCat, Protocol};
use tokio::{
    sync::mpsc,
    time::{Duration, Instant, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    SessionError,
    admin::{AdminEvent, AdminMessage, AdminState, AdminStateMachine, Role},
    application::Application,
    clock,
    settings::Settings,
    store::SessionState,
    stream::WriteEvent,
    transport::{TransportEvent, TransportMessage, TransportState, TransportStateMachine},
};

/// Engine surface available to application callbacks.
#[derive(Debug)]
pub struct EngineCore<S> {
    protocol: Arc<Protocol>,
    settings: Settings,
    session: S,
    writer: mpsc::Sender<WriteEvent>,
    last_send_time: Option<Instant>,
}

impl<S: SessionState> EngineCore<S> {
    pub(crate) fn new(
        protocol: Arc<Protocol>,
        settings: Settings,
        session: S,
        writer: mpsc::Sender<WriteEvent>,
    ) -> EngineCore<S> {
        EngineCore {
            protocol,
            settings,
            session,
            writer,
            last_send_time: None,
        }
    }

    pub fn protocol(&self) -> &Arc<Protocol> {
        &self.protocol
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    fn encode_options(&self) -> EncodeOptions {
        EncodeOptions {
            separator: self.settings.separator,
            regenerate_integrity: true,
            convert_sep_for_checksum: self.settings.convert_sep_for_checksum,
        }
    }

    pub(crate) fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            separator: self.settings.separator,
            strict: true,
            validate: true,
            convert_sep_for_checksum: self.settings.convert_sep_for_checksum,
        }
    }

    fn message_def(&self, msg_type: &str) -> Result<Arc<MessageDef>, SessionError> {
        let token = self
            .protocol
            .field("MsgType")
            .and_then(|field| field.values())
            .and_then(|values| values.token_of(msg_type))
            .ok_or_else(|| SessionError::UnknownMsgType(msg_type.to_owned()))?;
        self.protocol
            .message_by_type(token)
            .cloned()
            .ok_or_else(|| SessionError::UnknownMsgType(msg_type.to_owned()))
    }

    async fn next_outgoing_seqnum(&self) -> std::io::Result<u64> {
        let seqnum = self.session.outgoing_seqnum().await? + 1;
        self.session.set_outgoing_seqnum(seqnum).await?;
        Ok(seqnum)
    }

    /// Send a message by its MsgType logical name, e.g. `"HEARTBEAT"`.
    ///
    /// Assigns the next outgoing sequence number, stamps SendingTime and
    /// the CompIDs, encodes with integrity regeneration and enqueues the
    /// frame for the writer.
    pub async fn send_message(
        &mut self,
        msg_type: &str,
        body: Option<FieldMap>,
    ) -> Result<(), SessionError> {
        let message = self.message_def(msg_type)?;
        let sending_time = Utc::now();
        let seqnum = self.next_outgoing_seqnum().await?;

        let mut data = FieldMap::new();
        data.insert(
            "BeginString".to_owned(),
            FieldValue::Str(String::from_utf8_lossy(self.protocol.begin_string()).into_owned()),
        );
        data.insert("MsgType".to_owned(), FieldValue::Str(msg_type.to_owned()));
        data.insert("MsgSeqNum".to_owned(), FieldValue::Int(seqnum as i64));
        data.insert(
            "SenderCompID".to_owned(),
            FieldValue::Str(self.settings.sender_comp_id.clone()),
        );
        data.insert(
            "TargetCompID".to_owned(),
            FieldValue::Str(self.settings.target_comp_id.clone()),
        );
        data.insert("SendingTime".to_owned(), FieldValue::DateTime(sending_time));
        if let Some(body) = body {
            data.extend(body);
        }

        let frame = encode_message(&self.protocol, &data, &message, &self.encode_options())?;
        info!(msg_type, seqnum, "sending");
        self.writer
            .send(WriteEvent::Message(frame))
            .await
            .map_err(|_| SessionError::ConnectionClosed)?;
        self.last_send_time = Some(Instant::now());
        Ok(())
    }

    /// Ask the peer to resend from `begin_seqnum`; an `end_seqnum` of 0
    /// means "up to the latest".
    pub async fn send_resend_request(
        &mut self,
        begin_seqnum: u64,
        end_seqnum: u64,
    ) -> Result<(), SessionError> {
        let mut body = FieldMap::new();
        body.insert(
            "BeginSeqNo".to_owned(),
            FieldValue::Int(begin_seqnum as i64),
        );
        body.insert("EndSeqNo".to_owned(), FieldValue::Int(end_seqnum as i64));
        self.send_message("RESEND_REQUEST", Some(body)).await
    }

    pub(crate) fn last_send_time(&self) -> Option<Instant> {
        self.last_send_time
    }

    pub(crate) async fn disconnect_writer(&self) {
        let _ = self.writer.send(WriteEvent::Disconnect).await;
    }
}

/// The per-connection session task.
#[derive(Debug)]
pub struct SessionEngine<S, A> {
    core: EngineCore<S>,
    app: A,
    admin: AdminStateMachine,
    transport: TransportStateMachine,
    last_receive_time: Option<Instant>,
    probe_token: Option<String>,
    logout_time: Option<DateTime<Utc>>,
    was_connected: bool,
    cancellation: CancellationToken,
}

impl<S: SessionState, A: Application<S>> SessionEngine<S, A> {
    pub fn new(
        role: Role,
        protocol: Arc<Protocol>,
        settings: Settings,
        session: S,
        app: A,
        writer: mpsc::Sender<WriteEvent>,
        cancellation: CancellationToken,
    ) -> SessionEngine<S, A> {
        SessionEngine {
            core: EngineCore::new(protocol, settings, session, writer),
            app,
            admin: AdminStateMachine::new(role),
            transport: TransportStateMachine::new(),
            last_receive_time: None,
            probe_token: None,
            logout_time: None,
            was_connected: false,
            cancellation,
        }
    }

    pub fn settings(&self) -> &Settings {
        self.core.settings()
    }

    pub fn admin_state(&self) -> AdminState {
        self.admin.state()
    }

    pub fn transport_state(&self) -> TransportState {
        self.transport.state()
    }

    /// Drive the session until logout, disconnect or a fatal error.
    pub async fn run(
        mut self,
        mut receiver: mpsc::Receiver<TransportMessage>,
    ) -> Result<(), SessionError> {
        let result = self.main_loop(&mut receiver).await;
        if let Err(error) = &result {
            error!(%error, "session failed");
            if self.admin.state() == AdminState::Authenticated
                && let Err(error) = self.core.send_message("LOGOUT", None).await
            {
                warn!(%error, "failed to send final logout");
            }
        }
        self.core.disconnect_writer().await;
        info!("session task finished");
        result
    }

    async fn main_loop(
        &mut self,
        receiver: &mut mpsc::Receiver<TransportMessage>,
    ) -> Result<(), SessionError> {
        loop {
            self.logout_if_window_expired().await?;
            let wait = self.next_timeout().await?;
            let message = match timeout(wait, receiver.recv()).await {
                Ok(Some(message)) => message,
                Ok(None) => TransportMessage::event(TransportEvent::DisconnectReceived),
                Err(_elapsed) => TransportMessage::event(TransportEvent::TimeoutReceived),
            };
            self.process_transport(message).await?;
            if self.transport.state() != TransportState::Connected {
                info!("transport disconnected");
                return Ok(());
            }
            if self.was_connected && self.admin.state() == AdminState::Disconnected {
                info!("session logged out");
                return Ok(());
            }
        }
    }

    /// Deadline until the next quiescent tick. Also emits the outbound
    /// heartbeat when the idle window has already elapsed.
    async fn next_timeout(&mut self) -> Result<Duration, SessionError> {
        let state = self.admin.state();
        if state != AdminState::Authenticated && state != AdminState::ValidateTestHeartbeat {
            return Ok(self.core.settings().logon_timeout);
        }
        let heartbeat_timeout = self.core.settings().heartbeat_timeout;
        let Some(last_send) = self.core.last_send_time() else {
            return Ok(heartbeat_timeout);
        };
        let mut idle = last_send.elapsed();
        if idle >= heartbeat_timeout && state == AdminState::Authenticated {
            self.core.send_message("HEARTBEAT", None).await?;
            idle = Duration::ZERO;
        }
        Ok(heartbeat_timeout.saturating_sub(idle))
    }

    async fn logout_if_window_expired(&mut self) -> Result<(), SessionError> {
        if self.admin.state() != AdminState::Authenticated {
            return Ok(());
        }
        if let Some(logout_time) = self.logout_time
            && Utc::now() >= logout_time
        {
            info!("session window closed, logging out");
            self.process_admin(Some(AdminMessage::new(AdminEvent::SendLogout)))
                .await?;
        }
        Ok(())
    }

    async fn process_transport(&mut self, message: TransportMessage) -> Result<(), SessionError> {
        let mut next = Some(message);
        while let Some(message) = next {
            let event = message.event;
            self.transport.transition(event)?;
            next = match event {
                TransportEvent::ConnectionReceived => self.handle_connected().await?,
                TransportEvent::FixReceived => self.handle_fix(message.buffer).await?,
                TransportEvent::TimeoutReceived => self.handle_timeout().await?,
                TransportEvent::FixHandled
                | TransportEvent::TimeoutHandled
                | TransportEvent::DisconnectReceived => None,
            };
        }
        Ok(())
    }

    async fn handle_connected(&mut self) -> Result<Option<TransportMessage>, SessionError> {
        info!("connected");
        self.process_admin(Some(AdminMessage::new(AdminEvent::Connected)))
            .await?;
        self.was_connected = true;
        Ok(None)
    }

    async fn handle_fix(
        &mut self,
        buffer: Bytes,
    ) -> Result<Option<TransportMessage>, SessionError> {
        self.core.session().save_message(&buffer).await?;
        let (fields, message) =
            decode_message(self.core.protocol(), &buffer, &self.core.decode_options())?;
        debug!(message = message.name(), "received");

        let msg_seq_num = fields
            .get("MsgSeqNum")
            .and_then(FieldValue::as_int)
            .ok_or_else(|| DecodeError::RequiredMemberMissing("MsgSeqNum".to_owned()))?
            as u64;

        match message.category() {
            MsgCat::Admin => {
                if let Err(error) = self.app.on_admin_message(&fields, &mut self.core).await {
                    warn!(%error, "admin message callback failed");
                }
                let msg_type = fields
                    .get("MsgType")
                    .and_then(FieldValue::as_str)
                    .unwrap_or_default()
                    .to_owned();
                match AdminEvent::from_msg_type(&msg_type) {
                    Some(event) => {
                        self.process_admin(Some(AdminMessage::with_fields(event, fields)))
                            .await?;
                    }
                    None => warn!(msg_type, "unhandled admin message type"),
                }
            }
            MsgCat::App => {
                if let Err(error) = self
                    .app
                    .on_application_message(&fields, &mut self.core)
                    .await
                {
                    warn!(%error, "application callback failed");
                }
            }
        }

        self.core.session().set_incoming_seqnum(msg_seq_num).await?;
        self.last_receive_time = Some(Instant::now());
        Ok(Some(TransportMessage::event(TransportEvent::FixHandled)))
    }

    async fn handle_timeout(&mut self) -> Result<Option<TransportMessage>, SessionError> {
        match self.admin.state() {
            AdminState::Authenticated => {
                let settings = self.core.settings();
                let stale = settings.heartbeat_timeout + settings.heartbeat_threshold;
                if let Some(last_receive) = self.last_receive_time
                    && last_receive.elapsed() > stale
                {
                    self.process_admin(Some(AdminMessage::new(AdminEvent::TestHeartbeatRequired)))
                        .await?;
                }
            }
            AdminState::ValidateTestHeartbeat => {
                // The probe went unanswered for a whole further interval.
                self.process_admin(Some(AdminMessage::new(AdminEvent::TestHeartbeatInvalid)))
                    .await?;
            }
            AdminState::Disconnected
            | AdminState::LogonRequested
            | AdminState::LogonExpected
            | AdminState::Authenticating => {
                return Err(SessionError::LogonNeverReceived);
            }
            _ => {}
        }
        Ok(Some(TransportMessage::event(TransportEvent::TimeoutHandled)))
    }

    /// Walk the admin handler chain: select the handler for the
    /// pre-transition `(state, event)` pair, transition, run it, repeat
    /// with its follow-up until no handler fires.
    async fn process_admin(&mut self, mut message: Option<AdminMessage>) -> Result<(), SessionError> {
        while let Some(msg) = message {
            let state = self.admin.state();
            self.admin.transition(msg.event)?;
            message = self.dispatch_admin(state, msg).await?;
        }
        Ok(())
    }

    async fn dispatch_admin(
        &mut self,
        state: AdminState,
        message: AdminMessage,
    ) -> Result<Option<AdminMessage>, SessionError> {
        use AdminEvent::*;
        use AdminState::*;

        let role = self.admin.role();
        let next = match (state, message.event) {
            (Disconnected, Connected) => match role {
                Role::Initiator => {
                    let mut body = FieldMap::new();
                    body.insert(
                        "EncryptMethod".to_owned(),
                        FieldValue::Str("NONE".to_owned()),
                    );
                    body.insert(
                        "HeartBtInt".to_owned(),
                        FieldValue::Int(self.core.settings().heartbeat_timeout.as_secs() as i64),
                    );
                    self.core.send_message("LOGON", Some(body)).await?;
                    Some(AdminMessage::new(LogonSent))
                }
                Role::Acceptor => {
                    if let Some(window) = self.core.settings().session_window {
                        match clock::wait_for_window(&window, &self.cancellation).await {
                            Some(logout_time) => self.logout_time = Some(logout_time),
                            None => return Err(SessionError::ConnectionClosed),
                        }
                    }
                    None
                }
            },
            (LogonExpected, LogonReceived) if role == Role::Acceptor => {
                let fields = message.fields.unwrap_or_default();
                match self.app.on_logon(&fields, &mut self.core).await {
                    Ok(()) => Some(AdminMessage::new(LogonAccepted)),
                    Err(error) => {
                        info!(%error, "logon rejected");
                        Some(AdminMessage::new(LogonRejected))
                    }
                }
            }
            (LogonExpected, LogonReceived) => {
                let fields = message.fields.unwrap_or_default();
                if let Err(error) = self.app.on_logon(&fields, &mut self.core).await {
                    warn!(%error, "logon callback failed");
                }
                None
            }
            (Authenticating, LogonAccepted) => {
                let mut body = FieldMap::new();
                body.insert(
                    "EncryptMethod".to_owned(),
                    FieldValue::Str("NONE".to_owned()),
                );
                body.insert(
                    "HeartBtInt".to_owned(),
                    FieldValue::Int(self.core.settings().heartbeat_timeout.as_secs() as i64),
                );
                self.core.send_message("LOGON", Some(body)).await?;
                None
            }
            (Authenticating, LogonRejected) => Some(AdminMessage::new(SendLogout)),
            (RejectLogon, SendLogout) | (Authenticated, SendLogout) => {
                self.core.send_message("LOGOUT", None).await?;
                let fields = message.fields.unwrap_or_default();
                if let Err(error) = self.app.on_logout(&fields, &mut self.core).await {
                    warn!(%error, "logout callback failed");
                }
                None
            }
            (Authenticated, HeartbeatReceived) => {
                let fields = message.fields.unwrap_or_default();
                if let Err(error) = self.app.on_heartbeat(&fields, &mut self.core).await {
                    warn!(%error, "heartbeat callback failed");
                }
                Some(AdminMessage::new(HeartbeatAcknowledged))
            }
            (Authenticated, TestRequestReceived) => {
                // Echo the peer's token back in a Heartbeat.
                let fields = message.fields.unwrap_or_default();
                let mut body = FieldMap::new();
                if let Some(test_req_id) = fields.get("TestReqID").cloned() {
                    body.insert("TestReqID".to_owned(), test_req_id);
                }
                self.core.send_message("HEARTBEAT", Some(body)).await?;
                Some(AdminMessage::new(TestRequestSent))
            }
            (Authenticated, ResendRequestReceived) => {
                // No replay: gap-fill past everything sent so far.
                let new_seq_no = self.core.session().outgoing_seqnum().await? + 2;
                let mut body = FieldMap::new();
                body.insert("GapFillFlag".to_owned(), FieldValue::Bool(false));
                body.insert("NewSeqNo".to_owned(), FieldValue::Int(new_seq_no as i64));
                self.core.send_message("SEQUENCE_RESET", Some(body)).await?;
                Some(AdminMessage::new(SequenceResetSent))
            }
            (Authenticated, SequenceResetReceived) => {
                let fields = message.fields.unwrap_or_default();
                let new_seq_no = fields
                    .get("NewSeqNo")
                    .and_then(FieldValue::as_int)
                    .ok_or_else(|| DecodeError::RequiredMemberMissing("NewSeqNo".to_owned()))?;
                self.core
                    .session()
                    .set_incoming_seqnum(new_seq_no as u64)
                    .await?;
                Some(AdminMessage::new(IncomingSeqnumSet))
            }
            (Authenticated, LogoutReceived) => {
                let fields = message.fields.unwrap_or_default();
                if let Err(error) = self.app.on_logout(&fields, &mut self.core).await {
                    warn!(%error, "logout callback failed");
                }
                Some(AdminMessage::new(LogoutAcknowledged))
            }
            (Authenticated, TestHeartbeatRequired) => {
                let token = Uuid::new_v4().to_string();
                let mut body = FieldMap::new();
                body.insert("TestReqID".to_owned(), FieldValue::Str(token.clone()));
                self.core.send_message("TEST_REQUEST", Some(body)).await?;
                self.probe_token = Some(token);
                Some(AdminMessage::new(TestHeartbeatSent))
            }
            (ValidateTestHeartbeat, HeartbeatReceived) => {
                let fields = message.fields.unwrap_or_default();
                let valid = self.probe_token.take().is_some_and(|token| {
                    fields.get("TestReqID").and_then(FieldValue::as_str) == Some(token.as_str())
                });
                if valid {
                    Some(AdminMessage::new(TestHeartbeatValid))
                } else {
                    warn!("test heartbeat carried a stale TestReqID");
                    Some(AdminMessage::new(TestHeartbeatInvalid))
                }
            }
            (ValidateTestHeartbeat, TestHeartbeatInvalid) if role == Role::Acceptor => {
                Some(AdminMessage::new(SendLogout))
            }
            _ => None,
        };
        Ok(next)
    }
}
