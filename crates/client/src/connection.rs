//! The job socket.
//!
//! A single background task owns the websocket. It connects immediately and
//! then checks on every reconnect tick whether the socket is down, so there is
//! never more than one live connection. Inbound messages and connection
//! changes are forwarded as [`Event`]s; outbound messages sent while the socket
//! is down are dropped.

use std::time::Duration;

use depoview::protocol::ClientMessage;
use depoview::session::Event;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::ClientError;

/// Socket endpoint for a server page URL: same host and port, `ws`/`wss`, path suffix `socket`.
pub fn socket_url(server: &Url) -> Result<Url, ClientError> {
    let scheme = match server.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => return Err(ClientError::Scheme(other.to_string())),
    };
    let mut base = server.clone();
    base.set_query(None);
    base.set_fragment(None);
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    let mut url = base.join("socket")?;
    url.set_scheme(scheme)
        .map_err(|_| ClientError::Scheme(scheme.to_string()))?;
    Ok(url)
}

pub fn cookie_value(token: &str) -> String {
    format!("id={token}")
}

fn upgrade_request(url: &Url, token: Option<&str>) -> Result<Request, tungstenite::Error> {
    let mut request = url.as_str().into_client_request()?;
    if let Some(token) = token {
        if let Ok(value) = HeaderValue::from_str(&cookie_value(token)) {
            request.headers_mut().insert(COOKIE, value);
        } else {
            warn!("token is not a valid header value, connecting without it");
        }
    }
    Ok(request)
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub url: Url,
    pub token: Option<String>,
    pub reconnect_interval: Duration,
}

/// Sending half of the socket, held by the job runner.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    outbound: mpsc::UnboundedSender<ClientMessage>,
}

impl ConnectionHandle {
    /// Fire and forget. Dropped if the socket is down when it is picked up.
    pub fn send(&self, message: ClientMessage) {
        if self.outbound.send(message).is_err() {
            debug!("connection task gone, dropping outbound message");
        }
    }
}

pub struct ConnectionManager;

impl ConnectionManager {
    /// Start the connection task. It runs until `shutdown` is cancelled or `events` is closed.
    pub fn spawn(
        config: ConnectionConfig,
        events: mpsc::Sender<Event>,
        shutdown: CancellationToken,
    ) -> (ConnectionHandle, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(config, rx, events, shutdown));
        (ConnectionHandle { outbound: tx }, task)
    }
}

async fn run(
    config: ConnectionConfig,
    mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
    events: mpsc::Sender<Event>,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.reconnect_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // Wait for the next reconnect check, dropping anything queued while down.
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {}
            msg = outbound.recv() => {
                match msg {
                    Some(msg) => debug!(?msg, "not connected, dropping outbound message"),
                    None => return,
                }
                continue;
            }
        }

        let request = match upgrade_request(&config.url, config.token.as_deref()) {
            Ok(r) => r,
            Err(e) => {
                warn!("bad socket request for {}: {}", config.url, e);
                continue;
            }
        };
        let ws = tokio::select! {
            _ = shutdown.cancelled() => return,
            result = tokio_tungstenite::connect_async(request) => match result {
                Ok((ws, _response)) => ws,
                Err(e) => {
                    debug!("connect to {} failed: {}", config.url, e);
                    continue;
                }
            },
        };
        info!("socket open: {}", config.url);
        if events.send(Event::Connected).await.is_err() {
            return;
        }

        let (mut write, mut read) = ws.split();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return;
                }
                msg = outbound.recv() => {
                    let Some(msg) = msg else {
                        let _ = write.send(Message::Close(None)).await;
                        return;
                    };
                    if let Err(e) = write.send(Message::Text(msg.into_text().into())).await {
                        warn!("socket send failed: {}", e);
                        break;
                    }
                }
                frame = read.next() => {
                    let event = match frame {
                        Some(Ok(Message::Text(text))) => Event::Text(text.as_str().to_string()),
                        Some(Ok(Message::Binary(bytes))) => Event::Binary(bytes.to_vec()),
                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "server closed the socket");
                            break;
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            warn!("socket error: {}", e);
                            break;
                        }
                        None => break,
                    };
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
            }
        }

        warn!("socket closed, retrying every {:?}", config.reconnect_interval);
        if events.send(Event::Disconnected).await.is_err() {
            return;
        }
    }
}
