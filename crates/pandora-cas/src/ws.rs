//! WebSocket push channel session

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

use crate::account::PandoraAccount;
use crate::constants::{WS_HEARTBEAT_SECS, api_path};
use crate::error::{PandoraError, Result};
use crate::listener::{DispatchOutcome, ListenOptions, UpdateListener};

/// How a session ended without an error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SessionEnd {
    Closed,
    /// A device came online; reconnect immediately for a fresh initial state
    Reconnect,
}

/// Push channel URL for an API base URL
pub fn ws_url(base_url: &str, access_token: &str) -> Result<Url> {
    let mut url = Url::parse(base_url).map_err(|e| {
        PandoraError::InvalidArgument(format!("invalid base url {base_url}: {e}"))
    })?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(PandoraError::InvalidArgument(format!(
                "unsupported url scheme: {other}"
            )));
        }
    };
    url.set_scheme(scheme).map_err(|_| {
        PandoraError::InvalidArgument(format!("cannot switch {base_url} to {scheme}"))
    })?;
    url.set_path(api_path::WS_UPDATES);
    url.query_pairs_mut()
        .clear()
        .append_pair("access_token", access_token);
    Ok(url)
}

/// Run one connection until it closes, fails or asks for a reconnect
pub(crate) async fn run_session<L: UpdateListener + ?Sized>(
    account: &PandoraAccount,
    listener: &L,
    options: &ListenOptions,
) -> Result<SessionEnd> {
    let token = account.api().http().require_token()?;
    let url = ws_url(account.api().http().base_url(), &token)?;

    let (socket, _) = connect_async(url.as_str()).await?;
    debug!("WebSockets connected");
    let (mut sink, mut stream) = socket.split();

    let mut heartbeat = tokio::time::interval(Duration::from_secs(WS_HEARTBEAT_SECS));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;

    let mut deadline = options.read_timeout.map(|timeout| Instant::now() + timeout);

    loop {
        let read_timeout = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = heartbeat.tick() => {
                sink.send(Message::Ping(Vec::new())).await?;
            }
            _ = read_timeout => {
                let _ = sink.close().await;
                return Err(PandoraError::ReadTimeout);
            }
            message = stream.next() => {
                let Some(message) = message else {
                    return Ok(SessionEnd::Closed);
                };
                match message? {
                    Message::Text(text) => {
                        deadline = options.read_timeout.map(|timeout| Instant::now() + timeout);

                        let contents = match serde_json::from_str::<Value>(&text) {
                            Ok(Value::Object(contents)) => contents,
                            Ok(_) => {
                                warn!("Received message is not a mapping: {}", text);
                                continue;
                            }
                            Err(_) => {
                                warn!("Unknown message data: {}", text);
                                continue;
                            }
                        };
                        debug!("Received WS message: {:?}", contents);

                        let outcome = account
                            .dispatch_ws_message(listener, &contents, options.reconnect_on_device_online)
                            .await;
                        if outcome == DispatchOutcome::Reconnect {
                            let _ = sink.close().await;
                            return Ok(SessionEnd::Reconnect);
                        }
                    }
                    Message::Close(frame) => {
                        debug!("WebSockets closed by server: {:?}", frame);
                        return Ok(SessionEnd::Closed);
                    }
                    // Pongs are answered by the protocol layer
                    _ => {}
                }
            }
        }
    }
}
