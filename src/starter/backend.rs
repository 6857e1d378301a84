use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::error::{Result, TunnelError};
use crate::frame::{frames_for_payload, Frame};
use crate::session::{SessionHandle, SessionId, CHANNEL_CAPACITY};

use super::shared::Shared;

const READ_BUF_SIZE: usize = 8192;

/// Lazily creates the backend connection for a session id the first time
/// it's seen, per §4.4: "if no session exists for i, dial
/// `config.targets[p].address:p` ... register the resulting socket under
/// i, and attach a read fiber". A no-op if the session already exists.
pub async fn ensure_session(id: SessionId, port: u16, shared: &Arc<Shared>) -> Result<()> {
    if shared.table.lock().await.contains(&id) {
        return Ok(());
    }

    let address = shared.config.target_address(port);
    let socket = TcpStream::connect((address.as_str(), port)).await.map_err(|e| {
        tracing::warn!(%id, port, address, error = %e, "failed to dial backend");
        TunnelError::Io(e)
    })?;
    tracing::info!(%id, port, address, "backend connection opened");

    let (mut read_half, mut write_half) = socket.into_split();
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(CHANNEL_CAPACITY);
    let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);

    // Insert before spawning the reader so a DATA frame racing the dial
    // never sees a session that doesn't exist yet.
    shared.table.lock().await.insert_if_absent(
        id,
        SessionHandle {
            sender: tx,
            port,
            kill: kill_tx,
        },
    );

    let writer = tokio::spawn(async move {
        while let Some(body) = rx.recv().await {
            if write_half.write_all(&body).await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let reader_shared = Arc::clone(shared);
    let reader = tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUF_SIZE];
        let mut killed = false;
        loop {
            tokio::select! {
                res = read_half.read(&mut buf) => {
                    let n = match res {
                        Ok(0) => break,
                        Ok(n) => n,
                        Err(e) => {
                            tracing::debug!(%id, error = %e, "backend socket read error");
                            break;
                        }
                    };
                    let frames = frames_for_payload(
                        id,
                        None,
                        buf[..n].to_vec(),
                        reader_shared.max_packet_size,
                    );
                    let mut send_failed = false;
                    for frame in frames {
                        if reader_shared.to_control.send(frame).await.is_err() {
                            send_failed = true;
                            break;
                        }
                    }
                    if send_failed {
                        return;
                    }
                }
                _ = kill_rx.recv() => {
                    tracing::debug!(%id, "backend socket closed by inbound CLOSE");
                    killed = true;
                    break;
                }
            }
        }
        tracing::info!(%id, "backend connection closed");
        reader_shared.table.lock().await.remove(&id);
        reader_shared.fragments.lock().await.discard(id);
        if !killed {
            let _ = reader_shared.to_control.send(Frame::Close { id }).await;
        }
    });

    shared.push_task(writer).await;
    shared.push_task(reader).await;
    Ok(())
}
