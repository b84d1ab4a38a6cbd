//! In-process wire-protocol server for the end-to-end suite.
//!
//! Implements the command routes and the push socket the client expects:
//! per-item values with optional supplier delay and failure injection, a
//! `(client, key)`-idempotent subscription table, trigger-to-push fanout,
//! and force-close of live sockets to exercise the reconnect path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use pushrpc::{PushFrame, SubscriptionKey, CLIENT_ID_HEADER};

struct ItemState {
    value: Value,
    delay: Duration,
    fail: bool,
}

#[derive(Clone)]
struct SubEntry {
    item: String,
    params: Vec<Value>,
}

#[derive(Default)]
struct ServerState {
    items: Mutex<HashMap<String, ItemState>>,
    /// (client id, canonical subscription key) → entry. The tuple key
    /// makes duplicate subscribes from one client idempotent.
    subs: Mutex<HashMap<(String, String), SubEntry>>,
    sockets: Mutex<HashMap<String, mpsc::UnboundedSender<Message>>>,
    next_message_id: AtomicU64,
}

pub struct TestServer {
    pub base_url: String,
    state: Arc<ServerState>,
}

impl TestServer {
    pub async fn start() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();

        let state = Arc::new(ServerState::default());
        let app = Router::new()
            .route("/rpc/call/{*item}", post(call_handler))
            .route("/rpc/subscribe/{*item}", post(subscribe_handler))
            .route("/rpc/unsubscribe/{*item}", post(unsubscribe_handler))
            .route("/rpc/ws", get(ws_handler))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}/rpc"),
            state,
        }
    }

    pub fn set_item(&self, name: &str, value: Value) {
        let mut items = self.state.items.lock().unwrap();
        match items.get_mut(name) {
            Some(item) => item.value = value,
            None => {
                items.insert(
                    name.to_string(),
                    ItemState {
                        value,
                        delay: Duration::ZERO,
                        fail: false,
                    },
                );
            }
        }
    }

    /// Artificial supplier latency for the item's command handlers.
    pub fn set_delay(&self, name: &str, delay: Duration) {
        if let Some(item) = self.state.items.lock().unwrap().get_mut(name) {
            item.delay = delay;
        }
    }

    pub fn set_fail(&self, name: &str, fail: bool) {
        if let Some(item) = self.state.items.lock().unwrap().get_mut(name) {
            item.fail = fail;
        }
    }

    /// Push the item's current value to every subscriber.
    pub fn trigger(&self, name: &str) {
        let value = self
            .state
            .items
            .lock()
            .unwrap()
            .get(name)
            .map(|item| item.value.clone())
            .unwrap_or(Value::Null);
        let targets: Vec<(String, SubEntry)> = self
            .state
            .subs
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, entry)| entry.item == name)
            .map(|((client, _), entry)| (client.clone(), entry.clone()))
            .collect();

        let sockets = self.state.sockets.lock().unwrap();
        for (client, entry) in targets {
            let Some(tx) = sockets.get(&client) else {
                continue;
            };
            let frame = PushFrame {
                message_id: json!(self.state.next_message_id.fetch_add(1, Ordering::Relaxed)),
                item: entry.item,
                params: entry.params,
                data: value.clone(),
            };
            let _ = tx.send(Message::Text(frame.encode().into()));
        }
    }

    pub fn subscription_count(&self, name: &str) -> usize {
        self.state
            .subs
            .lock()
            .unwrap()
            .values()
            .filter(|entry| entry.item == name)
            .count()
    }

    pub fn total_subscriptions(&self) -> usize {
        self.state.subs.lock().unwrap().len()
    }

    pub fn socket_count(&self) -> usize {
        self.state.sockets.lock().unwrap().len()
    }

    /// Force-close every live push socket, as a dropped connection would.
    /// The broker forgets a client's subscriptions when its socket goes
    /// away; the client is expected to resubscribe after reconnecting.
    pub fn close_sockets(&self) {
        self.state.sockets.lock().unwrap().clear();
        self.state.subs.lock().unwrap().clear();
    }
}

/// Look up the item, apply its delay and failure injection, and produce
/// the value its supplier would return.
async fn run_item(state: &ServerState, item: &str) -> Result<Value, Response> {
    let (value, delay, fail) = {
        let items = state.items.lock().unwrap();
        match items.get(item) {
            None => {
                return Err((
                    StatusCode::NOT_FOUND,
                    Json(json!({"code": 404, "message": format!("unknown item: {item}")})),
                )
                    .into_response())
            }
            Some(def) => (def.value.clone(), def.delay, def.fail),
        }
    };
    tokio::time::sleep(delay).await;
    if fail {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"code": 500, "message": "supplier failure"})),
        )
            .into_response());
    }
    Ok(value)
}

fn client_id(headers: &HeaderMap) -> String {
    headers
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn call_handler(
    State(state): State<Arc<ServerState>>,
    Path(item): Path<String>,
    Json(_params): Json<Vec<Value>>,
) -> Response {
    match run_item(&state, &item).await {
        Ok(value) => Json(value).into_response(),
        Err(response) => response,
    }
}

async fn subscribe_handler(
    State(state): State<Arc<ServerState>>,
    Path(item): Path<String>,
    headers: HeaderMap,
    Json(params): Json<Vec<Value>>,
) -> Response {
    match run_item(&state, &item).await {
        Ok(value) => {
            let key = SubscriptionKey::new(&item, &params).to_string();
            state.subs.lock().unwrap().insert(
                (client_id(&headers), key),
                SubEntry {
                    item,
                    params,
                },
            );
            Json(value).into_response()
        }
        Err(response) => response,
    }
}

async fn unsubscribe_handler(
    State(state): State<Arc<ServerState>>,
    Path(item): Path<String>,
    headers: HeaderMap,
    Json(params): Json<Vec<Value>>,
) -> Response {
    let key = SubscriptionKey::new(&item, &params).to_string();
    state
        .subs
        .lock()
        .unwrap()
        .remove(&(client_id(&headers), key));
    Json(Value::Null).into_response()
}

async fn ws_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let client = client_id(&headers);
    ws.on_upgrade(move |socket| handle_socket(socket, client, state))
}

async fn handle_socket(mut socket: WebSocket, client: String, state: Arc<ServerState>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let tx_handle = tx.clone();
    state.sockets.lock().unwrap().insert(client.clone(), tx);

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    // Sender dropped: force-close requested.
                    None => {
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                    Some(message) => {
                        if socket.send(message).await.is_err() {
                            break;
                        }
                    }
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    None | Some(Err(_)) => break,
                    Some(Ok(Message::Close(_))) => break,
                    // Pings are answered by the socket layer.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    // The client is gone: drop the socket routing and this client's
    // server-side subscriptions, as the broker would. Guard against a
    // newer socket having replaced ours while we were shutting down.
    let mut sockets = state.sockets.lock().unwrap();
    if sockets
        .get(&client)
        .is_some_and(|stored| stored.same_channel(&tx_handle))
    {
        sockets.remove(&client);
        drop(sockets);
        state
            .subs
            .lock()
            .unwrap()
            .retain(|(owner, _), _| owner != &client);
    }
}
