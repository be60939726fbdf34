//! Durable per-session state: sequence numbers and the raw inbound
//! message journal.
//!
//! The store is shared across sessions; every handle serializes access
//! to its own `(SenderCompID, TargetCompID)` entry. All operations are
//! asynchronous and must be durable before returning.

use std::{
    collections::HashMap,
    io,
    sync::{Arc, Mutex as StdMutex},
};

use tokio::sync::Mutex;

mod file;
pub use file::{FileSession, FileStore};

pub trait SessionState {
    fn outgoing_seqnum(&self) -> impl Future<Output = io::Result<u64>>;
    fn set_outgoing_seqnum(&self, seqnum: u64) -> impl Future<Output = io::Result<()>>;
    fn incoming_seqnum(&self) -> impl Future<Output = io::Result<u64>>;
    fn set_incoming_seqnum(&self, seqnum: u64) -> impl Future<Output = io::Result<()>>;
    fn seqnums(&self) -> impl Future<Output = io::Result<(u64, u64)>>;
    fn set_seqnums(&self, outgoing: u64, incoming: u64) -> impl Future<Output = io::Result<()>>;
    /// Append one raw inbound frame to the session journal.
    fn save_message(&self, frame: &[u8]) -> impl Future<Output = io::Result<()>>;
}

pub trait SessionStore {
    type Session: SessionState;

    fn session(
        &self,
        sender_comp_id: &str,
        target_comp_id: &str,
    ) -> impl Future<Output = io::Result<Self::Session>>;
}

#[derive(Debug, Default)]
struct MemoryEntry {
    outgoing_seqnum: u64,
    incoming_seqnum: u64,
    messages: Vec<Vec<u8>>,
}

/// Volatile store, mostly for tests and fan-out prototypes. Counters
/// start at zero, so the first assigned sequence number is 1.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    sessions: Arc<StdMutex<HashMap<(String, String), Arc<Mutex<MemoryEntry>>>>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }
}

impl SessionStore for MemoryStore {
    type Session = MemorySession;

    async fn session(
        &self,
        sender_comp_id: &str,
        target_comp_id: &str,
    ) -> io::Result<MemorySession> {
        let key = (sender_comp_id.to_owned(), target_comp_id.to_owned());
        let entry = self
            .sessions
            .lock()
            .expect("session table poisoned")
            .entry(key)
            .or_default()
            .clone();
        Ok(MemorySession { entry })
    }
}

#[derive(Clone, Debug)]
pub struct MemorySession {
    entry: Arc<Mutex<MemoryEntry>>,
}

impl MemorySession {
    /// Raw frames journaled so far, oldest first.
    pub async fn messages(&self) -> Vec<Vec<u8>> {
        self.entry.lock().await.messages.clone()
    }
}

impl SessionState for MemorySession {
    async fn outgoing_seqnum(&self) -> io::Result<u64> {
        Ok(self.entry.lock().await.outgoing_seqnum)
    }

    async fn set_outgoing_seqnum(&self, seqnum: u64) -> io::Result<()> {
        self.entry.lock().await.outgoing_seqnum = seqnum;
        Ok(())
    }

    async fn incoming_seqnum(&self) -> io::Result<u64> {
        Ok(self.entry.lock().await.incoming_seqnum)
    }

    async fn set_incoming_seqnum(&self, seqnum: u64) -> io::Result<()> {
        self.entry.lock().await.incoming_seqnum = seqnum;
        Ok(())
    }

    async fn seqnums(&self) -> io::Result<(u64, u64)> {
        let entry = self.entry.lock().await;
        Ok((entry.outgoing_seqnum, entry.incoming_seqnum))
    }

    async fn set_seqnums(&self, outgoing: u64, incoming: u64) -> io::Result<()> {
        let mut entry = self.entry.lock().await;
        entry.outgoing_seqnum = outgoing;
        entry.incoming_seqnum = incoming;
        Ok(())
    }

    async fn save_message(&self, frame: &[u8]) -> io::Result<()> {
        self.entry.lock().await.messages.push(frame.to_vec());
        Ok(())
    }
}
