//! File-backed session store: one seqnum file (`<sender>-<target>-seqnum.txt`,
//! rewritten and synced on every change) and one append-only message
//! journal per session.

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};

use super::{SessionState, SessionStore};

#[derive(Clone, Debug)]
pub struct FileStore {
    directory: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `directory`, creating it if needed.
    pub async fn open(directory: impl AsRef<Path>) -> io::Result<FileStore> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory).await?;
        Ok(FileStore { directory })
    }
}

impl SessionStore for FileStore {
    type Session = FileSession;

    async fn session(
        &self,
        sender_comp_id: &str,
        target_comp_id: &str,
    ) -> io::Result<FileSession> {
        let prefix = format!("{sender_comp_id}-{target_comp_id}");
        let seqnum_path = self.directory.join(format!("{prefix}-seqnum.txt"));
        let message_path = self.directory.join(format!("{prefix}-messages.txt"));

        let (outgoing, incoming) = match fs::read_to_string(&seqnum_path).await {
            Ok(line) => parse_seqnums(&line)?,
            Err(error) if error.kind() == io::ErrorKind::NotFound => (0, 0),
            Err(error) => return Err(error),
        };

        let session = FileSession {
            inner: Arc::new(Mutex::new(Inner {
                seqnum_path,
                message_path,
                outgoing,
                incoming,
            })),
        };
        // Make sure a fresh session leaves its seqnum file behind.
        session.inner.lock().await.save().await?;
        Ok(session)
    }
}

fn parse_seqnums(line: &str) -> io::Result<(u64, u64)> {
    let line = line.trim_end();
    let (outgoing, incoming) = line
        .split_once(':')
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed seqnum file"))?;
    let parse = |text: &str| {
        text.parse::<u64>()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "malformed seqnum file"))
    };
    Ok((parse(outgoing)?, parse(incoming)?))
}

#[derive(Debug)]
struct Inner {
    seqnum_path: PathBuf,
    message_path: PathBuf,
    outgoing: u64,
    incoming: u64,
}

impl Inner {
    async fn save(&self) -> io::Result<()> {
        let mut file = File::create(&self.seqnum_path).await?;
        file.write_all(format!("{}:{}\n", self.outgoing, self.incoming).as_bytes())
            .await?;
        file.sync_all().await
    }
}

#[derive(Clone, Debug)]
pub struct FileSession {
    inner: Arc<Mutex<Inner>>,
}

impl SessionState for FileSession {
    async fn outgoing_seqnum(&self) -> io::Result<u64> {
        Ok(self.inner.lock().await.outgoing)
    }

    async fn set_outgoing_seqnum(&self, seqnum: u64) -> io::Result<()> {
        let mut inner = self.inner.lock().await;
        inner.outgoing = seqnum;
        inner.save().await
    }

    async fn incoming_seqnum(&self) -> io::Result<u64> {
        Ok(self.inner.lock().await.incoming)
    }

    async fn set_incoming_seqnum(&self, seqnum: u64) -> io::Result<()> {
        let mut inner = self.inner.lock().await;
        inner.incoming = seqnum;
        inner.save().await
    }

    async fn seqnums(&self) -> io::Result<(u64, u64)> {
        let inner = self.inner.lock().await;
        Ok((inner.outgoing, inner.incoming))
    }

    async fn set_seqnums(&self, outgoing: u64, incoming: u64) -> io::Result<()> {
        let mut inner = self.inner.lock().await;
        inner.outgoing = outgoing;
        inner.incoming = incoming;
        inner.save().await
    }

    async fn save_message(&self, frame: &[u8]) -> io::Result<()> {
        let inner = self.inner.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&inner.message_path)
            .await?;
        file.write_all(frame).await?;
        file.write_all(b"\n").await?;
        file.sync_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("fixlink-store-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn seqnums_survive_reopen() {
        let dir = scratch_dir();
        {
            let store = FileStore::open(&dir).await.unwrap();
            let session = store.session("SENDER", "TARGET").await.unwrap();
            assert_eq!(session.seqnums().await.unwrap(), (0, 0));
            session.set_seqnums(12, 34).await.unwrap();
        }
        {
            let store = FileStore::open(&dir).await.unwrap();
            let session = store.session("SENDER", "TARGET").await.unwrap();
            assert_eq!(session.seqnums().await.unwrap(), (12, 34));
        }
        fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn messages_are_appended() {
        let dir = scratch_dir();
        let store = FileStore::open(&dir).await.unwrap();
        let session = store.session("S", "T").await.unwrap();
        session.save_message(b"8=FIX.4.4\x019=5\x01...").await.unwrap();
        session.save_message(b"second").await.unwrap();

        let journal = fs::read_to_string(dir.join("S-T-messages.txt"))
            .await
            .unwrap();
        assert_eq!(journal.lines().count(), 2);
        fs::remove_dir_all(&dir).await.unwrap();
    }
}
