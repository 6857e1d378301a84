use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::frame::{frames_for_payload, Frame};
use crate::session::{SessionHandle, CHANNEL_CAPACITY};

use super::shared::Shared;

/// Read buffer for public sockets. Deliberately larger than the default
/// fragmentation threshold so a single read commonly produces one SHRED
/// sequence rather than many tiny ones.
const READ_BUF_SIZE: usize = 8192;

/// Runs one public listener for `port` until the task is aborted at
/// control-session teardown (§4.3 Established: "accept public connections
/// on each advertised port").
pub async fn run_public_listener(port: u16, shared: Arc<Shared>) -> crate::error::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "public listener bound");

    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(port, error = %e, "failed to accept public connection");
                continue;
            }
        };
        tracing::debug!(port, %peer, "public connection accepted");
        let shared = Arc::clone(&shared);
        let handle = tokio::spawn(async move {
            handle_public_connection(socket, port, shared).await;
        });
        shared.push_task(handle).await;
    }
}

async fn handle_public_connection(socket: tokio::net::TcpStream, port: u16, shared: Arc<Shared>) {
    let (mut read_half, mut write_half) = socket.into_split();
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(CHANNEL_CAPACITY);
    let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);

    let id = shared.table.lock().await.insert_fresh(SessionHandle {
        sender: tx,
        port,
        kill: kill_tx,
    });
    tracing::info!(%id, port, "session created");

    let writer = tokio::spawn(async move {
        while let Some(body) = rx.recv().await {
            if write_half.write_all(&body).await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let mut buf = vec![0u8; READ_BUF_SIZE];
    let mut killed = false;
    loop {
        tokio::select! {
            res = read_half.read(&mut buf) => {
                let n = match res {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        tracing::debug!(%id, error = %e, "public socket read error");
                        break;
                    }
                };
                let frames = frames_for_payload(id, Some(port), buf[..n].to_vec(), shared.max_packet_size);
                let mut send_failed = false;
                for frame in frames {
                    if shared.to_control.send(frame).await.is_err() {
                        // control channel writer is gone; the control session is
                        // tearing down, this connection will be cleaned up with it.
                        send_failed = true;
                        break;
                    }
                }
                if send_failed {
                    writer.abort();
                    return;
                }
            }
            _ = kill_rx.recv() => {
                tracing::debug!(%id, "public socket closed by inbound CLOSE");
                killed = true;
                break;
            }
        }
    }

    tracing::info!(%id, port, "public connection closed");
    shared.table.lock().await.remove(&id);
    shared.fragments.lock().await.discard(id);
    if !killed {
        let _ = shared.to_control.send(Frame::Close { id }).await;
    }
    writer.abort();
}
