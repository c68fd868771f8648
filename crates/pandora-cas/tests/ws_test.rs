//! Push channel sessions against a local WebSocket server

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use pandora_cas::{
    ChannelListener, ListenOptions, PandoraAccount, PandoraClientConfig, PandoraError,
    UpdateMessage,
};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

type Socket = WebSocketStream<TcpStream>;

/// Serves the push channel plus the few HTTP routes the account needs
struct TestServer {
    base_url: String,
    sessions: Arc<AtomicUsize>,
    token_checks: Arc<AtomicUsize>,
}

impl TestServer {
    /// `session` runs for every WebSocket connection with its index
    async fn start<F, Fut>(token_status: u16, session: F) -> Self
    where
        F: Fn(usize, Socket) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let sessions = Arc::new(AtomicUsize::new(0));
        let token_checks = Arc::new(AtomicUsize::new(0));
        let session = Arc::new(session);

        let (sessions_seen, checks_seen) = (sessions.clone(), token_checks.clone());
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let (session, sessions, checks) =
                    (session.clone(), sessions_seen.clone(), checks_seen.clone());
                tokio::spawn(async move {
                    let request_line = peek_request_line(&stream).await;
                    if request_line.contains("/api/v4/updates/ws") {
                        let index = sessions.fetch_add(1, Ordering::SeqCst);
                        let socket = accept_async(stream).await.unwrap();
                        session(index, socket).await;
                    } else {
                        serve_http(stream, &request_line, token_status, &checks).await;
                    }
                });
            }
        });

        Self {
            base_url,
            sessions,
            token_checks,
        }
    }

    fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    fn token_checks(&self) -> usize {
        self.token_checks.load(Ordering::SeqCst)
    }

    async fn account(&self) -> PandoraAccount {
        let config = PandoraClientConfig::new("user", "secret")
            .with_base_url(&self.base_url)
            .with_access_token("tok")
            .with_retries(0, 10);
        let account = PandoraAccount::new(config).unwrap();
        account.refresh_devices().await.unwrap();
        account
    }
}

async fn peek_request_line(stream: &TcpStream) -> String {
    let mut buf = [0u8; 256];
    loop {
        let n = stream.peek(&mut buf).await.unwrap();
        let head = String::from_utf8_lossy(&buf[..n]).to_string();
        if let Some((line, _)) = head.split_once("\r\n") {
            return line.to_string();
        }
        if n == 0 || n == buf.len() {
            return head;
        }
        tokio::task::yield_now().await;
    }
}

async fn serve_http(
    mut stream: TcpStream,
    request_line: &str,
    token_status: u16,
    token_checks: &AtomicUsize,
) {
    // Consume the whole request before answering
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    let header_end = loop {
        let n = stream.read(&mut buf).await.unwrap();
        if n == 0 {
            return;
        }
        request.extend_from_slice(&buf[..n]);
        if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&request[..header_end]).to_lowercase();
    let content_length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while request.len() < header_end + content_length {
        let n = stream.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        request.extend_from_slice(&buf[..n]);
    }

    let (status, body): (u16, Value) = if request_line.contains("/api/devices") {
        (200, json!([{"id": 7, "name": "Car"}]))
    } else if request_line.contains("/api/iamalive") {
        token_checks.fetch_add(1, Ordering::SeqCst);
        match token_status {
            200 => (200, json!({"status": "success"})),
            status => (status, json!({"status": "wrong access token"})),
        }
    } else {
        (400, json!({"error_text": "access denied"}))
    };

    let body = body.to_string();
    let response = format!(
        "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

async fn drain(mut socket: Socket) {
    while let Some(Ok(_)) = socket.next().await {}
}

async fn send_json(socket: &mut Socket, value: Value) {
    socket.send(Message::Text(value.to_string())).await.unwrap();
}

#[tokio::test]
async fn test_orderly_close_returns_ws_closed() {
    let server = TestServer::start(200, |_, mut socket| async move {
        let _ = socket.close(None).await;
        drain(socket).await;
    })
    .await;
    let account = server.account().await;
    let (listener, _receiver) = ChannelListener::channel();

    let result = account
        .listen_for_updates(&listener, &ListenOptions::default())
        .await;

    assert!(matches!(result, Err(PandoraError::WsClosed)));
    assert_eq!(server.sessions(), 1);
}

#[tokio::test]
async fn test_silent_socket_times_out() {
    let server = TestServer::start(200, |_, socket| drain(socket)).await;
    let account = server.account().await;
    let (listener, _receiver) = ChannelListener::channel();
    let options =
        ListenOptions::default().with_read_timeout(Some(Duration::from_millis(300)));

    let started = Instant::now();
    let result = account.listen_for_updates(&listener, &options).await;

    assert!(matches!(result, Err(PandoraError::ReadTimeout)));
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn test_messages_reset_read_deadline() {
    let server = TestServer::start(200, |_, mut socket| async move {
        for speed in [10, 20, 30] {
            tokio::time::sleep(Duration::from_millis(200)).await;
            send_json(
                &mut socket,
                json!({"type": "state", "data": {"dev_id": 7, "speed": speed}}),
            )
            .await;
        }
        let _ = socket.close(None).await;
        drain(socket).await;
    })
    .await;
    let account = server.account().await;
    let (listener, mut receiver) = ChannelListener::channel();
    let options = ListenOptions::default()
        .with_read_timeout(Some(Duration::from_millis(350)))
        .with_reconnect_on_device_online(false);

    let result = account.listen_for_updates(&listener, &options).await;

    assert!(matches!(result, Err(PandoraError::WsClosed)));
    let mut states = 0;
    while let Ok(message) = receiver.try_recv() {
        if matches!(message, UpdateMessage::State { .. }) {
            states += 1;
        }
    }
    assert_eq!(states, 3);
}

#[tokio::test]
async fn test_device_online_reconnects_immediately() {
    let server = TestServer::start(200, |index, mut socket| async move {
        if index == 0 {
            send_json(
                &mut socket,
                json!({"type": "initial-state", "data": {
                    "dev_id": 7, "online_mode": 0, "state": 1_700_000_000
                }}),
            )
            .await;
            send_json(
                &mut socket,
                json!({"type": "state", "data": {
                    "dev_id": 7, "online_mode": 1, "state": 1_700_000_010
                }}),
            )
            .await;
        } else {
            let _ = socket.close(None).await;
        }
        drain(socket).await;
    })
    .await;
    let account = server.account().await;
    let (listener, mut receiver) = ChannelListener::channel();

    let started = Instant::now();
    let result = account
        .listen_for_updates(&listener, &ListenOptions::default())
        .await;

    assert!(matches!(result, Err(PandoraError::WsClosed)));
    assert_eq!(server.sessions(), 2);
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(account.device(7).unwrap().is_online());
    assert!(matches!(
        receiver.try_recv().unwrap(),
        UpdateMessage::State { device_id: 7, .. }
    ));
}

#[tokio::test]
async fn test_auto_restart_checks_token_before_reconnecting() {
    let server = TestServer::start(200, |index, mut socket| async move {
        if index == 0 {
            let _ = socket.close(None).await;
        }
        drain(socket).await;
    })
    .await;
    let account = server.account().await;
    let (listener, _receiver) = ChannelListener::channel();
    let options = ListenOptions::default().with_auto_restart(true);

    let listening = account.listen_for_updates(&listener, &options);
    let result = tokio::time::timeout(Duration::from_secs(1), listening).await;

    assert!(result.is_err(), "listener should still be running");
    assert_eq!(server.sessions(), 2);
    assert_eq!(server.token_checks(), 1);
}

#[tokio::test]
async fn test_auto_restart_without_reauth_waits() {
    let server = TestServer::start(200, |index, mut socket| async move {
        if index == 0 {
            let _ = socket.close(None).await;
        }
        drain(socket).await;
    })
    .await;
    let account = server.account().await;
    let (listener, _receiver) = ChannelListener::channel();
    let options = ListenOptions::default()
        .with_auto_restart(true)
        .with_auto_reauth(false);

    let listening = account.listen_for_updates(&listener, &options);
    tokio::pin!(listening);

    assert!(
        tokio::time::timeout(Duration::from_secs(1), &mut listening)
            .await
            .is_err()
    );
    assert_eq!(server.sessions(), 1);

    assert!(
        tokio::time::timeout(Duration::from_secs(3), &mut listening)
            .await
            .is_err()
    );
    assert_eq!(server.sessions(), 2);
    assert_eq!(server.token_checks(), 0);
}

#[tokio::test]
async fn test_auto_restart_stops_on_rejected_credentials() {
    let server = TestServer::start(401, |_, mut socket| async move {
        let _ = socket.close(None).await;
        drain(socket).await;
    })
    .await;
    let account = server.account().await;
    let (listener, _receiver) = ChannelListener::channel();
    let options = ListenOptions::default().with_auto_restart(true);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        account.listen_for_updates(&listener, &options),
    )
    .await
    .expect("listener should stop");

    let error = result.unwrap_err();
    assert!(error.is_auth_error(), "unexpected error: {error}");
    assert_eq!(server.sessions(), 1);
}
