//! HTTP surface
//!
//! | Path | Description |
//! |------|-------------|
//! | `GET /ws` | WebSocket, `{"event", "data"}` JSON frames both ways |
//! | `POST /api/upload/slot/:index` | Multipart field `file`, MP3 only |
//! | `GET /api/files/:file_id` | Download a stored file |
//! | `DELETE /api/slot/:index/file` | Clear a slot's file |
//! | `GET /api/health` | Connection and slot counts |

use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;

use ens_core::{ControlRegistry, EnsResult, SystemClock};
use ens_session::{ClientMessage, Hub, HubError, HubHandle, Mp3Error};

use crate::config::ServerConfig;
use crate::files::{FileStore, is_mp3};

/// Headroom for multipart framing on top of the file size limit
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    hub: HubHandle,
    files: Arc<FileStore>,
    cfg: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(hub: HubHandle, files: FileStore, cfg: ServerConfig) -> Self {
        Self {
            hub,
            files: Arc::new(files),
            cfg: Arc::new(cfg),
        }
    }
}

pub fn app(state: AppState) -> Router {
    let upload_limit = state.cfg.max_upload_bytes + MULTIPART_OVERHEAD;
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route(
            "/api/upload/slot/:index",
            post(upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/files/:file_id", get(download))
        .route("/api/slot/:index/file", delete(clear_slot))
        .route("/api/health", get(health))
        .with_state(state)
}

/// Wire everything together and serve until ctrl-c or a listener failure
pub async fn run(cfg: ServerConfig) -> EnsResult<()> {
    let files = FileStore::open(&cfg.upload_dir).await?;
    let hub = Hub::new(
        Arc::new(SystemClock),
        ControlRegistry::default(),
        cfg.mp3_config(),
    );
    let (handle, _hub_task) = hub.start();

    match cfg.osc_addr {
        Some(addr) => {
            let wire = handle.clone();
            ens_osc::spawn(addr, move |cmd| {
                wire.wire(cmd);
            });
        }
        None => log::info!("[Server] datagram listener disabled"),
    }

    let listener = TcpListener::bind(cfg.listen_addr).await?;
    log::info!("[Server] listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app(AppState::new(handle, files, cfg)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    log::info!("[Server] stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("[Server] shutdown requested"),
        Err(e) => {
            log::error!("[Server] cannot listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// GET /ws
// ═══════════════════════════════════════════════════════════════

async fn ws_upgrade(ws: WebSocketUpgrade, State(st): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, st.hub))
}

async fn handle_socket(socket: WebSocket, hub: HubHandle) {
    let (conn, mut outbound) = hub.connect();
    let (mut sink, mut stream) = socket.split();
    log::debug!("[WS] {conn} open");

    loop {
        tokio::select! {
            msg = outbound.recv() => {
                let Some(msg) = msg else { break };
                match msg.to_json() {
                    Ok(text) => {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => log::error!("[WS] cannot encode {msg:?}: {e}"),
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(message) => {
                            hub.send(conn, message);
                        }
                        Err(e) => log::debug!("[WS] {conn} sent unusable frame: {e}"),
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }

    hub.disconnect(conn);
    log::debug!("[WS] {conn} closed");
}

// ═══════════════════════════════════════════════════════════════
// FILES
// ═══════════════════════════════════════════════════════════════

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    let body = json!({"ok": false, "error": message.into()});
    (status, Json(body)).into_response()
}

fn hub_error(e: HubError) -> Response {
    match e {
        HubError::Mp3(Mp3Error::NoSuchSlot { .. }) => error(StatusCode::BAD_REQUEST, e.to_string()),
        HubError::Closed => error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
        other => error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

async fn upload(
    State(st): State<AppState>,
    Path(index): Path<usize>,
    mut multipart: Multipart,
) -> Response {
    if index >= st.cfg.mp3_slots {
        return error(StatusCode::BAD_REQUEST, format!("slot {index} does not exist"));
    }

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return error(StatusCode::BAD_REQUEST, "missing multipart field 'file'"),
            Err(e) => return error(e.status(), e.body_text()),
        };
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or("upload.mp3").to_string();
        if !is_mp3(&file_name, field.content_type()) {
            return error(StatusCode::BAD_REQUEST, "only MP3 files are allowed");
        }
        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => return error(e.status(), e.body_text()),
        };
        if bytes.len() > st.cfg.max_upload_bytes {
            return error(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("file exceeds {} bytes", st.cfg.max_upload_bytes),
            );
        }

        let stored = match st.files.save(&file_name, &bytes).await {
            Ok(stored) => stored,
            Err(e) => {
                log::error!("[Files] cannot store upload: {e}");
                return error(StatusCode::INTERNAL_SERVER_ERROR, "cannot store file");
            }
        };
        return match st.hub.assign_file(index, stored.clone()).await {
            Ok(previous) => {
                if let Some(previous) = previous {
                    discard(&st.files, &previous.file_id).await;
                }
                let body = json!({
                    "ok": true,
                    "slotIndex": index,
                    "fileId": stored.file_id,
                    "fileName": stored.file_name,
                });
                (StatusCode::OK, Json(body)).into_response()
            }
            Err(e) => {
                discard(&st.files, &stored.file_id).await;
                hub_error(e)
            }
        };
    }
}

async fn discard(files: &FileStore, file_id: &str) {
    if let Err(e) = files.remove(file_id).await {
        log::warn!("[Files] cannot delete {file_id}: {e}");
    }
}

async fn download(State(st): State<AppState>, Path(file_id): Path<String>) -> Response {
    match st.files.read(&file_id).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "audio/mpeg")], bytes).into_response(),
        Err(_) => error(StatusCode::NOT_FOUND, "file not found"),
    }
}

async fn clear_slot(State(st): State<AppState>, Path(index): Path<usize>) -> Response {
    match st.hub.remove_file(index).await {
        Ok(previous) => {
            let removed = previous.is_some();
            if let Some(previous) = previous {
                discard(&st.files, &previous.file_id).await;
            }
            (StatusCode::OK, Json(json!({"ok": true, "removed": removed}))).into_response()
        }
        Err(e) => hub_error(e),
    }
}

// ═══════════════════════════════════════════════════════════════
// GET /api/health
// ═══════════════════════════════════════════════════════════════

async fn health(State(st): State<AppState>) -> Response {
    match st.hub.stats().await {
        Ok(stats) => (StatusCode::OK, Json(json!({"ok": true, "stats": stats}))).into_response(),
        Err(e) => hub_error(e),
    }
}
