//! End-to-end scenarios from spec §8: a real redirector and starter talk
//! to each other over loopback TCP, with a fake public client and a fake
//! backend service standing in for the opaque peers.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use revtun::config::{Endpoint, RedirectorConfig, StarterConfig};
use revtun::redirector::run_redirector;
use revtun::starter::run_starter_with_reconnect_delay;

async fn connect_with_retry(port: u16) -> TcpStream {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        match TcpStream::connect(("127.0.0.1", port)).await {
            Ok(s) => return s,
            Err(_) if tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(e) => panic!("failed to connect to 127.0.0.1:{port}: {e}"),
        }
    }
}

/// Spawns a redirector and a starter pointed at each other, with `port`
/// advertised by the starter and proxied to `backend_port` on localhost.
fn spawn_tunnel(control_port: u16, public_port: u16, backend_port: u16, auth: &str) {
    let redirector_config = RedirectorConfig {
        auth: auth.to_string(),
        separator: "\r\n".to_string(),
        listen: control_port,
    };
    let starter_config = StarterConfig {
        auth: auth.to_string(),
        separator: "\r\n".to_string(),
        redirect_to: Endpoint {
            address: "127.0.0.1".to_string(),
            port: control_port,
        },
        targets: vec![Endpoint {
            address: "127.0.0.1".to_string(),
            port: backend_port,
        }],
    };
    assert_eq!(public_port, backend_port, "test harness advertises the backend's own port");

    tokio::spawn(run_redirector(redirector_config));
    tokio::spawn(run_starter_with_reconnect_delay(
        starter_config,
        Duration::from_millis(100),
    ));
}

#[tokio::test]
async fn scenario_1_echo_round_trip_and_close_propagates() {
    let control_port = 19100;
    let port = 19101;

    let backend_listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    spawn_tunnel(control_port, port, port, "hunter2");

    let mut client = connect_with_retry(port).await;
    client
        .write_all(b"GET / HTTP/1.0\r\n\r\n")
        .await
        .unwrap();

    let (mut backend, _) = timeout(Duration::from_secs(2), backend_listener.accept())
        .await
        .expect("backend should receive a connection")
        .unwrap();

    let mut buf = vec![0u8; 64];
    let n = timeout(Duration::from_secs(2), backend.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"GET / HTTP/1.0\r\n\r\n");

    backend
        .write_all(b"HTTP/1.0 200 OK\r\n\r\nhi")
        .await
        .unwrap();

    let mut reply = vec![0u8; 64];
    let n = timeout(Duration::from_secs(2), client.read(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&reply[..n], b"HTTP/1.0 200 OK\r\n\r\nhi");

    drop(client);

    // Closing the client propagates a CLOSE upstream, ending the backend
    // socket: the next read on it observes EOF.
    let mut probe = [0u8; 1];
    let n = timeout(Duration::from_secs(2), backend.read(&mut probe))
        .await
        .expect("backend socket should be ended after client disconnects")
        .unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn scenario_3_oversize_payload_is_fragmented_and_reassembled() {
    let control_port = 19110;
    let port = 19111;

    let backend_listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    spawn_tunnel(control_port, port, port, "hunter2");

    let mut client = connect_with_retry(port).await;
    let payload = vec![0x42u8; 1024];
    client.write_all(&payload).await.unwrap();

    let (mut backend, _) = timeout(Duration::from_secs(2), backend_listener.accept())
        .await
        .unwrap()
        .unwrap();

    let mut received = Vec::new();
    while received.len() < payload.len() {
        let mut buf = vec![0u8; 1024];
        let n = timeout(Duration::from_secs(2), backend.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(n, 0, "backend should not see EOF before the full payload arrives");
        received.extend_from_slice(&buf[..n]);
    }

    assert_eq!(received, payload);
}

#[tokio::test]
async fn scenario_6_two_concurrent_sessions_stay_isolated() {
    let control_port = 19120;
    let port = 19121;

    let backend_listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    spawn_tunnel(control_port, port, port, "hunter2");

    let mut client_a = connect_with_retry(port).await;
    let mut client_b = connect_with_retry(port).await;

    client_a.write_all(b"from-a").await.unwrap();
    client_b.write_all(b"from-b").await.unwrap();

    let (mut backend_1, _) = timeout(Duration::from_secs(2), backend_listener.accept())
        .await
        .unwrap()
        .unwrap();
    let (mut backend_2, _) = timeout(Duration::from_secs(2), backend_listener.accept())
        .await
        .unwrap()
        .unwrap();

    let mut buf1 = vec![0u8; 16];
    let n1 = timeout(Duration::from_secs(2), backend_1.read(&mut buf1))
        .await
        .unwrap()
        .unwrap();
    let mut buf2 = vec![0u8; 16];
    let n2 = timeout(Duration::from_secs(2), backend_2.read(&mut buf2))
        .await
        .unwrap()
        .unwrap();

    let mut streams = vec![buf1[..n1].to_vec(), buf2[..n2].to_vec()];
    streams.sort();
    assert_eq!(streams, vec![b"from-a".to_vec(), b"from-b".to_vec()]);
}

#[tokio::test]
async fn scenario_2_wrong_secret_is_rejected_before_any_listener_opens() {
    let control_port = 19130;
    let wrong_port = 19131;

    let redirector_config = RedirectorConfig {
        auth: "correct-horse".to_string(),
        separator: "\r\n".to_string(),
        listen: control_port,
    };
    tokio::spawn(run_redirector(redirector_config));

    // Give the control listener a moment to bind before dialing it directly.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let socket = connect_with_retry(control_port).await;
    let codec = revtun::frame::FrameCodec::new("\r\n");
    let mut framed = tokio_util::codec::Framed::new(socket, codec);

    use futures::{SinkExt, StreamExt};
    framed
        .send(revtun::frame::Frame::Auth {
            secret: "wrong-secret".to_string(),
            ports: vec![wrong_port],
        })
        .await
        .unwrap();

    // The redirector must close the control socket rather than ack.
    let next = timeout(Duration::from_secs(2), framed.next()).await.unwrap();
    assert!(
        next.is_none() || next.unwrap().is_err(),
        "control socket should be closed after a bad AUTH"
    );

    // No listener should have opened on the advertised port.
    assert!(TcpStream::connect(("127.0.0.1", wrong_port)).await.is_err());
}

#[tokio::test]
async fn scenario_5_reconnect_resends_auth_after_control_drop() {
    let control_port = 19140;

    let listener = TcpListener::bind(("127.0.0.1", control_port)).await.unwrap();
    let starter_config = StarterConfig {
        auth: "hunter2".to_string(),
        separator: "\r\n".to_string(),
        redirect_to: Endpoint {
            address: "127.0.0.1".to_string(),
            port: control_port,
        },
        targets: vec![Endpoint {
            address: "127.0.0.1".to_string(),
            port: 19141,
        }],
    };
    tokio::spawn(run_starter_with_reconnect_delay(
        starter_config,
        Duration::from_millis(50),
    ));

    let codec = revtun::frame::FrameCodec::new("\r\n");

    let (socket, _) = timeout(Duration::from_secs(2), listener.accept())
        .await
        .unwrap()
        .unwrap();
    let mut framed = tokio_util::codec::Framed::new(socket, codec.clone());
    use futures::StreamExt;
    let first_auth = timeout(Duration::from_secs(2), framed.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(matches!(first_auth, revtun::frame::Frame::Auth { .. }));

    // Simulate a dropped control channel.
    drop(framed);

    // The starter should dial again and resend AUTH.
    let (socket, _) = timeout(Duration::from_secs(3), listener.accept())
        .await
        .unwrap()
        .unwrap();
    let mut framed = tokio_util::codec::Framed::new(socket, codec);
    let second_auth = timeout(Duration::from_secs(2), framed.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(matches!(second_auth, revtun::frame::Frame::Auth { .. }));
}
