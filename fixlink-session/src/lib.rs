//! FIX session layer: initiator and acceptor endpoints over any async
//! byte stream.
//!
//! A session is a per-connection task built from three pieces:
//!
//! - the [`stream`] processor, which owns the socket, frames inbound
//!   bytes and drains the outbound queue,
//! - the [`transport`] state machine, classifying raw connection events,
//! - the [`admin`] state machine, encoding the session protocol rules
//!   (logon, heartbeats, test requests, resend, sequence reset, logout)
//!   with one transition table per role.
//!
//! User code supplies an [`application::Application`] for the business
//! callbacks and a [`store::SessionStore`] for durable sequence numbers,
//! then calls [`initiator::connect`] or [`acceptor::serve`].

pub mod acceptor;
pub mod admin;
pub mod application;
pub mod clock;
pub mod engine;
pub mod initiator;
pub mod settings;
pub mod store;
pub mod stream;
pub mod transport;

use thiserror::Error;

pub use admin::{AdminEvent, AdminMessage, AdminState, AdminStateMachine, Role};
pub use application::{Application, LoginError};
pub use engine::{EngineCore, SessionEngine};
pub use settings::{SessionWindow, Settings};
pub use store::{MemoryStore, SessionState, SessionStore};
pub use stream::fix_stream_processor;
pub use transport::{TransportEvent, TransportMessage, TransportState, TransportStateMachine};

/// An event arrived that the current state of one of the session state
/// machines does not define. Fatal to the session.
#[derive(Debug, Error)]
#[error("no {machine} transition from {state} on {event}")]
pub struct InvalidStateTransition {
    pub machine: &'static str,
    pub state: String,
    pub event: String,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("decoding failed: {0}")]
    Decode(#[from] fixlink_codec::DecodeError),
    #[error("encoding failed: {0}")]
    Encode(#[from] fixlink_codec::EncodeError),
    #[error("framing violation: {0}")]
    Frame(#[from] fixlink_codec::FrameError),
    #[error(transparent)]
    InvalidTransition(#[from] InvalidStateTransition),
    #[error("unknown message type `{0}`")]
    UnknownMsgType(String),
    #[error("never received logon from peer")]
    LogonNeverReceived,
    #[error("connection closed")]
    ConnectionClosed,
}
