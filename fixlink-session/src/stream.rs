//! Stream processor: one task per connection multiplexing the framed
//! input stream, the outbound write queue, the session engine and the
//! cancellation signal. Whichever completes first decides the next step.

use std::{io, sync::Arc};

use async_stream::stream;
use bytes::Bytes;
use fixlink_codec::{FrameBuffer, FrameError, FrameEvent, SOH};
use fixlink_metadata::Protocol;
use futures::{Stream, StreamExt, pin_mut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span};

use crate::{
    SessionError,
    admin::Role,
    application::Application,
    engine::SessionEngine,
    settings::Settings,
    store::{SessionState, SessionStore},
    transport::{TransportEvent, TransportMessage},
};

/// Depth of the per-session read and write queues.
const QUEUE_DEPTH: usize = 16;

/// Events drained from the write queue by the stream processor.
#[derive(Debug)]
pub enum WriteEvent {
    /// A framed message to put on the socket.
    Message(Vec<u8>),
    /// Close the socket; nothing may be written afterwards.
    Disconnect,
}

/// Events produced by the framed input stream.
#[derive(Debug)]
pub enum InputEvent {
    Frame(Bytes),
    Corrupt(FrameError),
    Io(io::Error),
}

fn printable(frame: &[u8]) -> String {
    String::from_utf8_lossy(frame).replace(SOH as char, "|")
}

/// Adapt an async reader into a stream of framed messages.
pub fn frame_stream(
    mut reader: impl AsyncRead + Unpin,
    mut framer: FrameBuffer,
) -> impl Stream<Item = InputEvent> {
    stream! {
        let mut chunk = [0u8; 4096];
        loop {
            loop {
                match framer.next_event() {
                    Ok(FrameEvent::DataReady(frame)) => {
                        debug!("raw data input :: {}", printable(&frame));
                        yield InputEvent::Frame(frame);
                    }
                    Ok(FrameEvent::NeedsMoreData { .. }) => break,
                    Ok(FrameEvent::EndOfFile) => return,
                    Err(error) => {
                        yield InputEvent::Corrupt(error);
                        return;
                    }
                }
            }
            match reader.read(&mut chunk).await {
                Ok(0) => framer.receive(&[]),
                Ok(count) => framer.receive(&chunk[..count]),
                Err(error) => {
                    yield InputEvent::Io(error);
                    return;
                }
            }
        }
    }
}

async fn write_frame(writer: &mut (impl AsyncWrite + Unpin), frame: &[u8]) -> io::Result<()> {
    debug!("raw data output :: {}", printable(frame));
    writer.write_all(frame).await?;
    writer.flush().await
}

enum Exit {
    EngineDone(Result<(), SessionError>),
    Eof,
    Cancelled,
    SocketClosed,
    Failed(SessionError),
}

/// Drive one connection to completion.
///
/// Normal write events are flushed to the socket; a disconnect event
/// closes it. EOF or cancellation triggers graceful shutdown: a
/// synthetic disconnect is posted to the engine, which then has
/// `shutdown_timeout` to finish while its remaining writes are drained.
pub async fn fix_stream_processor<S, A, R, W>(
    engine: SessionEngine<S, A>,
    reader: R,
    mut writer: W,
    read_tx: mpsc::Sender<TransportMessage>,
    read_rx: mpsc::Receiver<TransportMessage>,
    mut write_rx: mpsc::Receiver<WriteEvent>,
    cancellation: CancellationToken,
) -> Result<(), SessionError>
where
    S: SessionState,
    A: Application<S>,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if cancellation.is_cancelled() {
        return Ok(());
    }
    let settings = engine.settings();
    let shutdown_timeout = settings.shutdown_timeout;
    let framer =
        FrameBuffer::with_options(settings.separator, settings.convert_sep_for_checksum, true);

    if read_tx
        .send(TransportMessage::event(TransportEvent::ConnectionReceived))
        .await
        .is_err()
    {
        return Err(SessionError::ConnectionClosed);
    }

    let input = frame_stream(reader, framer);
    pin_mut!(input);
    let engine_task = engine.run(read_rx);
    tokio::pin!(engine_task);

    let exit = loop {
        tokio::select! {
            result = &mut engine_task => break Exit::EngineDone(result),
            _ = cancellation.cancelled() => {
                info!("cancellation requested");
                break Exit::Cancelled;
            }
            event = input.next() => match event {
                Some(InputEvent::Frame(frame)) => {
                    if read_tx.send(TransportMessage::fix(frame)).await.is_err() {
                        break Exit::SocketClosed;
                    }
                }
                Some(InputEvent::Corrupt(error)) => {
                    error!(%error, "input framing error");
                    break Exit::Failed(error.into());
                }
                Some(InputEvent::Io(error)) => {
                    error!(%error, "input error");
                    break Exit::Failed(error.into());
                }
                None => {
                    info!("end of stream");
                    break Exit::Eof;
                }
            },
            event = write_rx.recv() => match event {
                Some(WriteEvent::Message(frame)) => {
                    if let Err(error) = write_frame(&mut writer, &frame).await {
                        // The input side will observe the same failure and
                        // drive the disconnect.
                        error!(%error, "output write error");
                    }
                }
                Some(WriteEvent::Disconnect) | None => {
                    let _ = writer.shutdown().await;
                    break Exit::SocketClosed;
                }
            },
        }
    };

    match exit {
        Exit::EngineDone(result) => {
            drain_writes(&mut writer, &mut write_rx).await;
            result
        }
        exit => {
            // Tell the engine the connection is gone; it may already have
            // returned, in which case nobody is listening and that is fine.
            let _ = read_tx.try_send(TransportMessage::event(TransportEvent::DisconnectReceived));

            let deadline = Instant::now() + shutdown_timeout;
            let result = loop {
                tokio::select! {
                    result = &mut engine_task => break Some(result),
                    _ = tokio::time::sleep_until(deadline) => {
                        error!("session task did not finish in time, cancelling it");
                        break None;
                    }
                    event = write_rx.recv() => match event {
                        Some(WriteEvent::Message(frame)) => {
                            let _ = write_frame(&mut writer, &frame).await;
                        }
                        Some(WriteEvent::Disconnect) | None => {
                            let _ = writer.shutdown().await;
                        }
                    },
                }
            };
            let _ = writer.shutdown().await;
            debug!("shutdown complete");

            match exit {
                Exit::Failed(error) => Err(error),
                _ => result.unwrap_or(Ok(())),
            }
        }
    }
}

async fn drain_writes(writer: &mut (impl AsyncWrite + Unpin), write_rx: &mut mpsc::Receiver<WriteEvent>) {
    // The engine has returned; everything still queued was submitted
    // before it did.
    while let Ok(event) = write_rx.try_recv() {
        match event {
            WriteEvent::Message(frame) => {
                if let Err(error) = write_frame(writer, &frame).await {
                    error!(%error, "output write error");
                    break;
                }
            }
            WriteEvent::Disconnect => break,
        }
    }
    let _ = writer.shutdown().await;
}

/// Resolve the session from the store, wire the queues up and run the
/// stream processor for one connection.
pub(crate) async fn session_task<St, App, R, W>(
    role: Role,
    reader: R,
    writer: W,
    protocol: Arc<Protocol>,
    settings: Settings,
    store: &St,
    app: App,
    cancellation: CancellationToken,
) -> Result<(), SessionError>
where
    St: SessionStore,
    App: Application<St::Session>,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let span = info_span!(
        "session",
        sender = %settings.sender_comp_id,
        target = %settings.target_comp_id,
    );
    async {
        let session = store
            .session(&settings.sender_comp_id, &settings.target_comp_id)
            .await?;
        let (read_tx, read_rx) = mpsc::channel(QUEUE_DEPTH);
        let (write_tx, write_rx) = mpsc::channel(QUEUE_DEPTH);
        let engine = SessionEngine::new(
            role,
            protocol,
            settings,
            session,
            app,
            write_tx,
            cancellation.clone(),
        );
        fix_stream_processor(engine, reader, writer, read_tx, read_rx, write_rx, cancellation)
            .await
    }
    .instrument(span)
    .await
}
