//! Fixlink: a metadata-driven FIX 4.x engine.
//!
//! The protocol is described by a QuickFIX dictionary loaded at startup
//! ([`metadata`]), messages travel as ordered name → value maps
//! ([`codec`]), and the optional [`session`] layer provides initiator
//! and acceptor endpoints over tokio.

pub use fixlink_codec as codec;
pub use fixlink_metadata as metadata;
#[cfg(feature = "session")]
pub use fixlink_session as session;
