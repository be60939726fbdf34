//! Initiator endpoint: open the connection, send the Logon, run the
//! session until logout or disconnect.

use std::sync::Arc;

use fixlink_metadata::Protocol;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpStream, ToSocketAddrs},
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    SessionError, admin::Role, application::Application, settings::Settings,
    store::SessionStore, stream::session_task,
};

/// Run an initiator session over an already established stream pair.
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
        Role::Initiator,
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

/// Connect over TCP and run an initiator session.
pub async fn connect<St, App>(
    address: impl ToSocketAddrs,
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
    let stream = TcpStream::connect(address).await?;
    stream.set_nodelay(true)?;
    info!(peer = %stream.peer_addr()?, "connected");
    let (reader, writer) = stream.into_split();
    run(reader, writer, protocol, settings, store, app, cancellation).await
}
