//! WebSocket push channel with auto-reconnect.
//!
//! A background task owns the socket. Callers only ever send it two
//! commands — `Connect` and `Close` — so connect-on-demand, the reconnect
//! loop and liveness probing all live in one place.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use pushrpc_core::error::RpcError;
use pushrpc_core::key::{ClientId, CLIENT_ID_HEADER};
use pushrpc_core::message::{PushFrame, TEXT_PING, TEXT_PONG};
use pushrpc_core::transport::{PushHandler, PushTransport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration for [`PushChannel`].
#[derive(Debug, Clone)]
pub struct PushChannelConfig {
    /// Reconnect backoff starting duration.
    pub reconnect_delay: Duration,
    /// Maximum reconnect backoff.
    pub reconnect_delay_max: Duration,
    /// Liveness probe period. A ping unanswered by the next interval
    /// boundary terminates the socket.
    pub ping_interval: Duration,
    /// Open the socket eagerly at construction instead of on the first
    /// subscribe.
    pub connect_on_create: bool,
}

impl Default for PushChannelConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(60),
            ping_interval: Duration::from_secs(30),
            connect_on_create: false,
        }
    }
}

/// Command sent from callers to the background socket task.
enum PushCommand {
    Connect,
    Close,
}

/// WebSocket-based delivery path for pushed data.
///
/// Owns its socket through a background task that handles reconnect with
/// bounded exponential backoff, ping/pong liveness and inbound frame
/// dispatch. Pushed frames and reconnect notifications reach the client
/// core through the constructor-supplied [`PushHandler`].
pub struct PushChannel {
    cmd_tx: mpsc::UnboundedSender<PushCommand>,
}

impl PushChannel {
    /// Start the background task. The socket is opened lazily on the
    /// first `connect()` unless `connect_on_create` is set.
    pub fn spawn(
        url: impl Into<String>,
        client_id: ClientId,
        config: PushChannelConfig,
        handler: Arc<dyn PushHandler>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(push_task(url.into(), client_id, config, cmd_rx, handler));
        Self { cmd_tx }
    }
}

impl PushTransport for PushChannel {
    fn connect(&self) {
        let _ = self.cmd_tx.send(PushCommand::Connect);
    }

    fn close(&self) {
        let _ = self.cmd_tx.send(PushCommand::Close);
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(PushCommand::Close);
    }
}

/// Next backoff step: double, capped at `max`.
fn doubled(delay: Duration, max: Duration) -> Duration {
    (delay * 2).min(max)
}

/// Background task that owns the socket for the channel's lifetime.
async fn push_task(
    url: String,
    client_id: ClientId,
    config: PushChannelConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<PushCommand>,
    handler: Arc<dyn PushHandler>,
) {
    let mut backoff = config.reconnect_delay;
    let mut want_connection = config.connect_on_create;
    let mut connected_before = false;

    loop {
        if !want_connection {
            match cmd_rx.recv().await {
                None | Some(PushCommand::Close) => return,
                Some(PushCommand::Connect) => want_connection = true,
            }
        }

        tracing::debug!(url = %url, "connecting push channel");
        match open_socket(&url, &client_id).await {
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "push connect failed, retrying in {backoff:?}");
                if !backoff_wait(backoff, &mut cmd_rx).await {
                    return;
                }
                backoff = doubled(backoff, config.reconnect_delay_max);
            }
            Ok(stream) => {
                backoff = config.reconnect_delay;
                if connected_before {
                    tracing::info!(url = %url, "push channel reconnected");
                    handler.on_reconnected();
                } else {
                    tracing::debug!(url = %url, "push channel connected");
                }
                connected_before = true;

                match run_session(stream, &config, &mut cmd_rx, handler.as_ref()).await {
                    SessionEnd::Closed => return,
                    SessionEnd::Dropped => {
                        tracing::warn!(url = %url, "push channel disconnected, reconnecting in {backoff:?}");
                        if !backoff_wait(backoff, &mut cmd_rx).await {
                            return;
                        }
                        backoff = doubled(backoff, config.reconnect_delay_max);
                    }
                }
            }
        }
    }
}

/// Sleep out the backoff while staying responsive to `Close`. Returns
/// `false` if the channel was closed during the wait.
async fn backoff_wait(delay: Duration, cmd_rx: &mut mpsc::UnboundedReceiver<PushCommand>) -> bool {
    let sleep = time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = cmd_rx.recv() => {
                match cmd {
                    None | Some(PushCommand::Close) => return false,
                    // Already on our way to connecting.
                    Some(PushCommand::Connect) => {}
                }
            }
        }
    }
}

async fn open_socket(url: &str, client_id: &ClientId) -> Result<WsStream, RpcError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| RpcError::Transport(e.to_string()))?;
    let id_value = HeaderValue::from_str(client_id.as_str())
        .map_err(|e| RpcError::Transport(e.to_string()))?;
    request.headers_mut().insert(CLIENT_ID_HEADER, id_value);

    let (stream, _) = connect_async(request)
        .await
        .map_err(|e| RpcError::Transport(e.to_string()))?;
    Ok(stream)
}

enum SessionEnd {
    /// `Close` command: terminal.
    Closed,
    /// Socket error, close frame or missed pong: re-enter the backoff loop.
    Dropped,
}

async fn run_session(
    stream: WsStream,
    config: &PushChannelConfig,
    cmd_rx: &mut mpsc::UnboundedReceiver<PushCommand>,
    handler: &dyn PushHandler,
) -> SessionEnd {
    let (mut sink, mut stream) = stream.split();
    let mut ping = time::interval(config.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick of an interval completes immediately.
    ping.tick().await;
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    None | Some(PushCommand::Close) => {
                        let _ = sink.send(Message::Close(None)).await;
                        return SessionEnd::Closed;
                    }
                    // Already connected.
                    Some(PushCommand::Connect) => {}
                }
            }
            _ = ping.tick() => {
                if awaiting_pong {
                    tracing::warn!("pong overdue, terminating socket");
                    return SessionEnd::Dropped;
                }
                awaiting_pong = true;
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    return SessionEnd::Dropped;
                }
            }
            msg = stream.next() => {
                match msg {
                    None => return SessionEnd::Dropped,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "push receive error");
                        return SessionEnd::Dropped;
                    }
                    Some(Ok(Message::Pong(_))) => awaiting_pong = false,
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Text(text))) => {
                        if text == TEXT_PING {
                            let _ = sink.send(Message::Text(TEXT_PONG.to_string())).await;
                        } else {
                            dispatch(&text, handler);
                        }
                    }
                    Some(Ok(Message::Close(_))) => return SessionEnd::Dropped,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

fn dispatch(text: &str, handler: &dyn PushHandler) {
    match PushFrame::decode(text) {
        Some(frame) => {
            tracing::debug!(item = %frame.item, "dispatching pushed data");
            handler.on_data(&frame.item, &frame.params, frame.data);
        }
        None => tracing::debug!("ignoring non-data frame"),
    }
}
