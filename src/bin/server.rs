use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use dots_boxes_rust_server::config::ServerConfig;
use dots_boxes_rust_server::engine::now_ms;
use dots_boxes_rust_server::persistence::GameArchive;
use dots_boxes_rust_server::server_protocol::{
    parse_client_message, ParsedClientMessage, ServerMessage,
};
use dots_boxes_rust_server::server_utils::normalize_code;
use dots_boxes_rust_server::store::{DocumentStore, MemoryStore};
use dots_boxes_rust_server::types::GameDoc;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::services::{ServeDir, ServeFile};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const OUTBOUND_QUEUE: usize = 256;
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

type SharedState = Arc<AppState>;

struct AppState {
    store: Arc<MemoryStore>,
    archive: GameArchive,
    idle_game_ttl_ms: u64,
}

struct ClientContext {
    id: String,
    tx: mpsc::Sender<String>,
    subscriptions: HashMap<String, JoinHandle<()>>,
}

impl ClientContext {
    fn new(id: String, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            tx,
            subscriptions: HashMap::new(),
        }
    }

    fn send(&self, message: &ServerMessage) {
        if let Some(payload) = encode(message) {
            if self.tx.try_send(payload).is_err() {
                warn!(client = %self.id, "outbound queue full, message dropped");
            }
        }
    }

    fn unsubscribe(&mut self, code: &str) -> bool {
        match self.subscriptions.remove(code) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    fn close(&mut self) {
        for (_, task) in self.subscriptions.drain() {
            task.abort();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env();
    let archive = GameArchive::new(config.game_db_path.clone());
    let restored = archive.load();
    info!(
        count = restored.len(),
        path = %archive.path().display(),
        "restored games from archive"
    );

    let state = Arc::new(AppState {
        store: Arc::new(MemoryStore::with_documents(restored)),
        archive,
        idle_game_ttl_ms: config.idle_game_ttl_ms,
    });
    start_prune_loop(state.clone());
    start_autosave_loop(state.clone(), config.autosave_interval);

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/games", get(games_handler))
        .route("/api/games/{code}", get(game_handler))
        .route("/ws", get(ws_handler))
        .with_state(state.clone());

    let app = if let Some(static_dir) = config.static_dir.clone() {
        let index_file = static_dir.join("index.html");
        info!(root = %static_dir.display(), "serving static files");
        app.fallback_service(
            ServeDir::new(static_dir).not_found_service(ServeFile::new(index_file)),
        )
    } else {
        warn!("static file root not found; only the API and websocket are served");
        app
    };

    let bind_addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind server socket on {bind_addr}"))?;

    info!(port = config.port, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server runtime failed")?;

    state.archive.save(&state.store.documents());
    info!("archive saved, shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn games_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let games: Vec<Value> = state.store.documents().iter().map(game_summary).collect();
    Json(json!({
        "generatedAtIso": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "games": games,
    }))
}

fn game_summary(doc: &GameDoc) -> Value {
    json!({
        "code": doc.code,
        "status": doc.status,
        "players": doc
            .players
            .iter()
            .map(|player| json!({ "name": player.name, "score": player.score }))
            .collect::<Vec<_>>(),
        "maxPlayers": doc.max_players,
        "lastActivity": doc.last_activity,
    })
}

async fn game_handler(
    State(state): State<SharedState>,
    Path(raw_code): Path<String>,
) -> Response {
    let Some(code) = normalize_code(&raw_code) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid join code" })),
        )
            .into_response();
    };
    match state.store.get(&code) {
        Ok(doc) => Json(doc).into_response(),
        Err(error) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": error.to_string() })),
        )
            .into_response(),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);
    let mut client = ClientContext::new(make_id("client"), tx);
    debug!(client = %client.id, "client connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if ws_sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(received) = ws_receiver.next().await {
        let Ok(message) = received else {
            break;
        };

        match message {
            Message::Text(raw) => handle_client_message(&state, &mut client, raw.as_str()),
            Message::Binary(raw) => match std::str::from_utf8(&raw) {
                Ok(text) => handle_client_message(&state, &mut client, text),
                Err(_) => client.send(&ServerMessage::error("invalid utf8 message")),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    debug!(
        client = %client.id,
        subscriptions = client.subscriptions.len(),
        "client disconnected"
    );
    client.close();
    drop(client);
    let _ = writer.await;
}

fn handle_client_message(state: &AppState, client: &mut ClientContext, raw: &str) {
    let Some(message) = parse_client_message(raw) else {
        client.send(&ServerMessage::error("invalid message"));
        return;
    };

    match message {
        ParsedClientMessage::Create { doc } => {
            let code = doc.code.clone();
            match state.store.create(*doc) {
                Ok(()) => {
                    info!(client = %client.id, %code, "game created");
                    client.send(&ServerMessage::Ack { code, op: "create" });
                }
                Err(error) => client.send(&ServerMessage::error(error.to_string())),
            }
        }
        ParsedClientMessage::Get { code } => match state.store.get(&code) {
            Ok(doc) => client.send(&ServerMessage::Snapshot { code, doc }),
            Err(error) => client.send(&ServerMessage::error(error.to_string())),
        },
        ParsedClientMessage::Subscribe { code } => subscribe(state, client, code),
        ParsedClientMessage::Unsubscribe { code } => {
            if client.unsubscribe(&code) {
                client.send(&ServerMessage::Ack {
                    code,
                    op: "unsubscribe",
                });
            } else {
                client.send(&ServerMessage::error(format!("not subscribed to {code}")));
            }
        }
        ParsedClientMessage::Update { code, patch } => {
            match state.store.update(&code, &patch) {
                Ok(()) => client.send(&ServerMessage::Ack { code, op: "update" }),
                Err(error) => client.send(&ServerMessage::error(error.to_string())),
            }
        }
        ParsedClientMessage::Ping { t } => client.send(&ServerMessage::Pong {
            t,
            server_time: now_ms(),
        }),
    }
}

fn subscribe(state: &AppState, client: &mut ClientContext, code: String) {
    let mut subscription = match state.store.subscribe(&code) {
        Ok(subscription) => subscription,
        Err(error) => {
            client.send(&ServerMessage::error(error.to_string()));
            return;
        }
    };

    let tx = client.tx.clone();
    let client_id = client.id.clone();
    let task_code = code.clone();
    let task = tokio::spawn(async move {
        while let Some(doc) = subscription.changed().await {
            let message = ServerMessage::Snapshot {
                code: task_code.clone(),
                doc: doc.as_ref().clone(),
            };
            let Some(payload) = encode(&message) else {
                continue;
            };
            if tx.send(payload).await.is_err() {
                return;
            }
        }
        debug!(client = %client_id, code = %task_code, "subscribed game closed");
        if let Some(payload) = encode(&ServerMessage::error(format!("game {task_code} closed"))) {
            let _ = tx.send(payload).await;
        }
    });

    if let Some(previous) = client.subscriptions.insert(code, task) {
        previous.abort();
    }
}

fn encode(message: &ServerMessage) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(payload) => Some(payload),
        Err(error) => {
            warn!(%error, "failed to encode server message");
            None
        }
    }
}

fn start_prune_loop(state: SharedState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            interval.tick().await;
            let pruned = state.store.prune_idle(now_ms(), state.idle_game_ttl_ms);
            if !pruned.is_empty() {
                debug!(codes = ?pruned, "idle games pruned");
            }
        }
    });
}

fn start_autosave_loop(state: SharedState, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            let documents = state.store.documents();
            let archive_state = state.clone();
            let saved = tokio::task::spawn_blocking(move || {
                archive_state.archive.save(&documents);
            })
            .await;
            if let Err(error) = saved {
                warn!(%error, "autosave task failed");
            }
        }
    });
}

fn make_id(prefix: &str) -> String {
    let seq = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{seq}")
}
