use std::sync::Arc;

use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use crate::config::RedirectorConfig;
use crate::error::{Result, TunnelError};
use crate::fragment::FragmentOutcome;
use crate::frame::{Frame, FrameCodec, DEFAULT_MAX_PACKET_SIZE};
use crate::session::CHANNEL_CAPACITY;

use super::listener::run_public_listener;
use super::shared::Shared;
use super::state::RedirectorState;

/// Runs the redirector forever: one control connection at a time (§4.3).
/// A new control connection always replaces the previous one after
/// teardown, so this is an infinite `Listening` loop around
/// [`handle_control_session`].
pub async fn run_redirector(config: RedirectorConfig) -> Result<()> {
    loop {
        tracing::info!(state = %RedirectorState::Listening, port = config.listen, "awaiting control connection");
        let listener = TcpListener::bind(("0.0.0.0", config.listen)).await?;
        let (socket, peer) = listener.accept().await?;
        tracing::info!(%peer, "control connection accepted");

        if let Err(e) = handle_control_session(socket, &config).await {
            tracing::warn!(error = %e, "control session ended");
        }
    }
}

async fn handle_control_session(socket: TcpStream, config: &RedirectorConfig) -> Result<()> {
    let codec = FrameCodec::new(config.separator.clone());
    let mut framed = Framed::new(socket, codec);

    tracing::info!(state = %RedirectorState::Authenticating, "awaiting AUTH frame");
    let ports = match framed.next().await {
        Some(Ok(Frame::Auth { secret, ports })) => {
            if secret != config.auth {
                tracing::warn!("AUTH rejected: secret mismatch");
                return Err(TunnelError::AuthFailed);
            }
            if ports.is_empty() {
                tracing::warn!("AUTH rejected: empty port list");
                return Err(TunnelError::AuthFailed);
            }
            ports
        }
        Some(Ok(_)) => {
            tracing::warn!("AUTH rejected: first frame was not AUTH");
            return Err(TunnelError::AuthFailed);
        }
        Some(Err(e)) => return Err(e),
        None => return Err(TunnelError::Protocol("control connection closed before AUTH".into())),
    };

    tracing::info!(state = %RedirectorState::Established, ?ports, "starter authenticated");
    let (mut sink, mut stream) = framed.split();

    let (to_control_tx, mut to_control_rx) = mpsc::channel::<Frame>(CHANNEL_CAPACITY);
    let shared = Arc::new(Shared::new(to_control_tx, DEFAULT_MAX_PACKET_SIZE));

    let writer_task: JoinHandle<()> = tokio::spawn(async move {
        while let Some(frame) = to_control_rx.recv().await {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
    });

    let mut listener_tasks = Vec::new();
    for port in ports {
        let shared = Arc::clone(&shared);
        listener_tasks.push(tokio::spawn(async move {
            if let Err(e) = run_public_listener(port, shared).await {
                tracing::error!(port, error = %e, "public listener exited");
            }
        }));
    }

    let result = control_reader_loop(&mut stream, &shared).await;

    tracing::info!(state = %RedirectorState::TearingDown, "tearing down control session");
    for task in listener_tasks {
        task.abort();
    }
    shared.teardown().await;
    writer_task.abort();

    result
}

async fn control_reader_loop(
    stream: &mut SplitStream<Framed<TcpStream, FrameCodec>>,
    shared: &Arc<Shared>,
) -> Result<()> {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Frame::Data { id, body, .. }) => deliver(id, body, shared).await,
            Ok(Frame::Shred {
                id,
                body,
                index,
                total,
                ..
            }) => {
                let outcome = shared.fragments.lock().await.ingest(id, index, total, body);
                match outcome {
                    Ok(FragmentOutcome::Complete(joined)) => deliver(id, joined, shared).await,
                    Ok(FragmentOutcome::Pending) => {}
                    Err(e) => {
                        tracing::warn!(%id, error = %e, "closing session after fragment protocol error");
                        close_session(id, shared).await;
                    }
                }
            }
            Ok(Frame::Close { id }) => {
                tracing::debug!(%id, "peer closed session");
                close_session(id, shared).await;
            }
            Ok(Frame::Auth { .. }) => {
                tracing::warn!("discarding unexpected AUTH frame mid-session");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

async fn deliver(id: crate::session::SessionId, body: Vec<u8>, shared: &Arc<Shared>) {
    let sender = shared.table.lock().await.get(&id).map(|h| h.sender.clone());
    match sender {
        Some(sender) => {
            if sender.send(body).await.is_err() {
                shared.table.lock().await.remove(&id);
            }
        }
        None => {
            tracing::debug!(%id, "DATA/SHRED for unknown session, replying CLOSE");
            let _ = shared.to_control.send(Frame::Close { id }).await;
        }
    }
}

/// Ends session `id` in both directions: removing it from the table drops
/// its body-forwarding sender, which drains and shuts down the owning
/// socket's writer half; the kill signal stops that socket's blocked read
/// loop, which would otherwise keep running under an id the table no
/// longer knows about (§4.3 "On inbound CLOSE: close the matching public
/// socket, remove from table").
async fn close_session(id: crate::session::SessionId, shared: &Arc<Shared>) {
    if let Some(handle) = shared.table.lock().await.remove(&id) {
        let _ = handle.kill.send(()).await;
    }
    shared.fragments.lock().await.discard(id);
}
