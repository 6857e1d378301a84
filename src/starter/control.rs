use std::sync::Arc;
use std::time::Duration;

use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use crate::config::StarterConfig;
use crate::error::{Result, TunnelError};
use crate::fragment::FragmentOutcome;
use crate::frame::{Frame, FrameCodec, DEFAULT_MAX_PACKET_SIZE};
use crate::session::CHANNEL_CAPACITY;

use super::backend::ensure_session;
use super::shared::Shared;
use super::state::StarterState;

/// Fixed reconnect delay mandated by §4.4/§5 ("the 5-second reconnect
/// sleep" is explicitly named as a suspension point).
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Runs the starter forever, reconnecting on any control-channel failure.
pub async fn run_starter(config: StarterConfig) -> Result<()> {
    run_starter_with_reconnect_delay(config, DEFAULT_RECONNECT_DELAY).await
}

/// Same as [`run_starter`] but with an overridable reconnect delay, so
/// tests don't have to wait 5 real seconds to see a reconnect happen.
pub async fn run_starter_with_reconnect_delay(
    config: StarterConfig,
    reconnect_delay: Duration,
) -> Result<()> {
    loop {
        tracing::info!(
            state = %StarterState::Dialing,
            address = %config.redirect_to.address,
            port = config.redirect_to.port,
            "dialing redirector"
        );
        match TcpStream::connect((config.redirect_to.address.as_str(), config.redirect_to.port))
            .await
        {
            Ok(socket) => {
                if let Err(e) = handle_control_session(socket, &config).await {
                    tracing::warn!(error = %e, "control session ended");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to dial redirector");
            }
        }

        tracing::info!(delay_secs = reconnect_delay.as_secs(), "reconnecting");
        tokio::time::sleep(reconnect_delay).await;
    }
}

async fn handle_control_session(socket: TcpStream, config: &StarterConfig) -> Result<()> {
    let codec = FrameCodec::new(config.separator.clone());
    let mut framed = Framed::new(socket, codec);

    tracing::info!(state = %StarterState::Authenticating, "sending AUTH");
    let ports: Vec<u16> = config.targets.iter().map(|t| t.port).collect();
    framed
        .send(Frame::Auth {
            secret: config.auth.clone(),
            ports,
        })
        .await?;

    tracing::info!(state = %StarterState::Established, "control session established");
    let (mut sink, mut stream) = framed.split();

    let (to_control_tx, mut to_control_rx) = mpsc::channel::<Frame>(CHANNEL_CAPACITY);
    let shared = Arc::new(Shared::new(
        to_control_tx,
        DEFAULT_MAX_PACKET_SIZE,
        config.clone(),
    ));

    let writer_task: JoinHandle<()> = tokio::spawn(async move {
        while let Some(frame) = to_control_rx.recv().await {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
    });

    let result = control_reader_loop(&mut stream, &shared).await;

    tracing::info!(state = %StarterState::TearingDown, "tearing down control session");
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
            Ok(Frame::Data { id, port, body }) => {
                let Some(port) = port else {
                    tracing::warn!(%id, "DATA frame from redirector missing target port, discarding");
                    continue;
                };
                if let Err(e) = ensure_session(id, port, shared).await {
                    tracing::warn!(%id, error = %e, "failed to open backend session");
                    let _ = shared.to_control.send(Frame::Close { id }).await;
                    continue;
                }
                deliver(id, body, shared).await;
            }
            Ok(Frame::Shred {
                id,
                port,
                body,
                index,
                total,
            }) => {
                let Some(port) = port else {
                    tracing::warn!(%id, "SHRED frame from redirector missing target port, discarding");
                    continue;
                };
                if let Err(e) = ensure_session(id, port, shared).await {
                    tracing::warn!(%id, error = %e, "failed to open backend session");
                    let _ = shared.to_control.send(Frame::Close { id }).await;
                    continue;
                }
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
            tracing::debug!(%id, "DATA/SHRED for unknown session after failed dial, discarding");
        }
    }
}

/// Ends session `id` in both directions, the same way the redirector's
/// `close_session` does: dropping the table entry shuts down the backend
/// writer half, and the kill signal stops the backend reader's blocked
/// `read_half.read()` (§4.4 "On inbound CLOSE: end the backend socket and
/// remove from table").
async fn close_session(id: crate::session::SessionId, shared: &Arc<Shared>) {
    if let Some(handle) = shared.table.lock().await.remove(&id) {
        let _ = handle.kill.send(()).await;
    }
    shared.fragments.lock().await.discard(id);
}
