//! Application callback surface.
//!
//! The engine hands every decoded message to the application together
//! with an [`EngineCore`] handle, so callbacks can send messages from
//! within the session task. Only [`Application::on_logon`] can veto
//! anything (the acceptor turns a [`LoginError`] into a rejected logon);
//! failures from the other callbacks are logged and the session
//! continues.

use fixlink_codec::FieldMap;
use thiserror::Error;

use crate::{engine::EngineCore, store::SessionState};

/// Rejection raised by the acceptor's logon callback.
#[derive(Debug, Error)]
#[error("logon rejected: {reason}")]
pub struct LoginError {
    reason: String,
}

impl LoginError {
    pub fn new(reason: impl Into<String>) -> LoginError {
        LoginError {
            reason: reason.into(),
        }
    }
}

pub trait Application<S: SessionState> {
    /// A Logon was received. On the acceptor, returning a [`LoginError`]
    /// rejects the session.
    fn on_logon(
        &mut self,
        message: &FieldMap,
        engine: &mut EngineCore<S>,
    ) -> impl Future<Output = Result<(), LoginError>> {
        let _ = (message, engine);
        async { Ok(()) }
    }

    fn on_logout(
        &mut self,
        message: &FieldMap,
        engine: &mut EngineCore<S>,
    ) -> impl Future<Output = anyhow::Result<()>> {
        let _ = (message, engine);
        async { Ok(()) }
    }

    fn on_heartbeat(
        &mut self,
        message: &FieldMap,
        engine: &mut EngineCore<S>,
    ) -> impl Future<Output = anyhow::Result<()>> {
        let _ = (message, engine);
        async { Ok(()) }
    }

    /// Informational: every inbound admin message passes through here
    /// before the admin state machine sees it.
    fn on_admin_message(
        &mut self,
        message: &FieldMap,
        engine: &mut EngineCore<S>,
    ) -> impl Future<Output = anyhow::Result<()>> {
        let _ = (message, engine);
        async { Ok(()) }
    }

    fn on_application_message(
        &mut self,
        message: &FieldMap,
        engine: &mut EngineCore<S>,
    ) -> impl Future<Output = anyhow::Result<()>>;
}
