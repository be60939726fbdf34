//! Acceptor endpoint: wait for connections, expect a Logon on each, run
//! one session task per peer.

use std::{io, sync::Arc};

use fixlink_metadata::Protocol;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    SessionError, admin::Role, application::Application, settings::Settings,
    store::SessionStore, stream::session_task,
};

/// Run an acceptor session over an already established stream pair.
pub async fn run<R, W, St, App>(
    reader: R,
    writer: W,
    protocol: Arc<Protocol>,
    settings: Settings,
    store: &St,
    app: App,
    cancellation: CancellationToken,
) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    St: SessionStore,
    App: Application<St::Session>,
{
    session_task(
        Role::Acceptor,
        reader,
        writer,
        protocol,
        settings,
        store,
        app,
        cancellation,
    )
    .await
}

/// Run an acceptor session over one accepted TCP connection.
pub async fn accept<St, App>(
    stream: TcpStream,
    protocol: Arc<Protocol>,
    settings: Settings,
    store: &St,
    app: App,
    cancellation: CancellationToken,
) -> Result<(), SessionError>
where
    St: SessionStore,
    App: Application<St::Session>,
{
    stream.set_nodelay(true)?;
    let (reader, writer) = stream.into_split();
    run(reader, writer, protocol, settings, store, app, cancellation).await
}

/// Accept connections until cancelled, spawning a session task per peer.
///
/// Sessions are spawned with `spawn_local`, so this must run inside a
/// `tokio::task::LocalSet`.
pub async fn serve<St, App, F>(
    listener: TcpListener,
    protocol: Arc<Protocol>,
    settings: Settings,
    store: St,
    mut make_app: F,
    cancellation: CancellationToken,
) -> io::Result<()>
where
    St: SessionStore + Clone + 'static,
    St::Session: 'static,
    App: Application<St::Session> + 'static,
    F: FnMut() -> App,
{
    loop {
        let (stream, peer) = tokio::select! {
            _ = cancellation.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted?,
        };
        info!(%peer, "connection accepted");

        let protocol = protocol.clone();
        let settings = settings.clone();
        let store = store.clone();
        let app = make_app();
        let cancellation = cancellation.clone();
        tokio::task::spawn_local(async move {
            match accept(stream, protocol, settings, &store, app, cancellation).await {
                Ok(()) => info!(%peer, "session closed"),
                Err(SessionError::ConnectionClosed) => info!(%peer, "connection closed"),
                Err(error) => error!(%peer, %error, "session failed"),
            }
        });
    }
}
