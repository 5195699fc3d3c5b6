use crate::config::Config;
use crate::coordinator::{Coordinator, SubmitError};
use crate::db::{self, DbPool};
use crate::embed::ui_router;
use crate::files::{BlobError, BlobStore};
use crate::housekeeping;
use crate::model::WireEvent;
use crate::registry::Session;
use crate::store::{MessageStore, SqliteStore};
use anyhow::Result;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::{
    body::StreamBody,
    extract::{Multipart, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, net::SocketAddr, sync::Arc};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::io::ReaderStream;

static ALLOWED_EXTENSIONS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["png", "jpg", "jpeg", "gif"].into_iter().collect());

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub store: Arc<dyn MessageStore>,
    pub blobs: Arc<BlobStore>,
    pub pool: DbPool,
    pub config: Config,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self> {
        let upload_dir = config.data_dir.join("uploads");
        tokio::fs::create_dir_all(&upload_dir).await?;
        let pool = db::init_pool(config.data_dir.join("chat.db"))?;
        let store: Arc<dyn MessageStore> = Arc::new(SqliteStore::new(pool.clone()));
        let blobs = Arc::new(BlobStore::new(upload_dir, config.max_upload_bytes()));
        let coordinator = Arc::new(Coordinator::new(store.clone()));
        Ok(Self {
            coordinator,
            store,
            blobs,
            pool,
            config,
        })
    }
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    let upload = Router::new().route("/upload", post(upload_image)).layer(
        // generous transport bound; the blob store enforces the real cap
        axum::extract::DefaultBodyLimit::max(2 * state.config.max_upload_bytes() as usize),
    );
    let ui: Router<AppState> = ui_router().with_state(());
    Router::new()
        .route("/healthz", get(healthz))
        .route("/history", get(history))
        .route("/uploads/:id", get(download_blob))
        .route("/ws", get(ws_handler))
        .merge(upload)
        .merge(ui)
        .with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

async fn history(State(state): State<AppState>) -> Result<Json<Vec<WireEvent>>, StatusCode> {
    let events = state.store.list_all().map_err(|e| {
        tracing::error!(error = %e, "history read failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(events.iter().map(WireEvent::from_event).collect()))
}

#[derive(Serialize)]
struct ErrorResp {
    error: String,
}

fn err(status: StatusCode, msg: &str) -> (StatusCode, Json<ErrorResp>) {
    (status, Json(ErrorResp { error: msg.into() }))
}

/// The lowercased extension, if it names an allowed image type.
fn allowed_extension(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(ext.as_str()).then_some(ext)
}

async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<StatusCode, (StatusCode, Json<ErrorResp>)> {
    let mut user: Option<String> = None;
    let mut file: Option<(Bytes, String, String)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| err(StatusCode::BAD_REQUEST, "malformed_upload"))?
    {
        let field_name = field.name().map(|s| s.to_string());
        match field_name.as_deref() {
            Some("user") => {
                user = field.text().await.ok();
            }
            Some("file") => {
                let file_name = field
                    .file_name()
                    .map(|s| s.to_string())
                    .unwrap_or_default();
                let Some(ext) = allowed_extension(&file_name) else {
                    return Err(err(StatusCode::BAD_REQUEST, "unsupported_file_type"));
                };
                let mime = field
                    .content_type()
                    .map(|m| m.to_string())
                    .or_else(|| {
                        mime_guess::from_path(&file_name)
                            .first()
                            .map(|m| m.to_string())
                    })
                    .unwrap_or_else(|| "application/octet-stream".into());
                let data = field
                    .bytes()
                    .await
                    .map_err(|_| err(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large"))?;
                file = Some((data, ext, mime));
            }
            _ => {}
        }
    }
    let Some((data, ext, mime)) = file else {
        return Err(err(StatusCode::BAD_REQUEST, "missing_file"));
    };

    // store-then-announce: bytes are durable before the event exists
    let id = state.blobs.put(data, &ext).await.map_err(|e| match e {
        BlobError::PayloadTooLarge { .. } => err(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large"),
        _ => err(StatusCode::INTERNAL_SERVER_ERROR, "blob_store"),
    })?;
    let image_url = format!("/uploads/{}", id);
    state
        .coordinator
        .submit_image(user.as_deref(), &image_url, &mime)
        .await
        .map_err(|e| match e {
            SubmitError::Storage(e) => {
                tracing::error!(error = %e, "image announce failed");
                err(StatusCode::INTERNAL_SERVER_ERROR, "storage_unavailable")
            }
            SubmitError::EmptyMessage => err(StatusCode::BAD_REQUEST, "empty"),
        })?;
    Ok(StatusCode::NO_CONTENT)
}

async fn download_blob(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let (file, mime) = state
        .blobs
        .open(&id)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;
    let body = StreamBody::new(ReaderStream::new(file));
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_str(&mime).unwrap(),
    );
    // blob ids are content hashes; the bytes behind an id never change
    headers.insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("public, max-age=31536000, immutable"),
    );
    Ok((headers, body))
}

#[derive(Deserialize)]
struct InboundText {
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: String,
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(stream: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = stream.split();
    let (session, rx) = Session::new();
    let session_id = session.id;
    if let Err(e) = state.coordinator.connect(session).await {
        // without the transcript the client would start with a gap it can
        // never recover from
        tracing::warn!(error = %e, "refusing connection, history unavailable");
        let _ = sender.send(Message::Close(None)).await;
        return;
    }
    tracing::info!(
        session = %session_id,
        sessions = state.coordinator.session_count(),
        "client connected"
    );
    let mut rx = UnboundedReceiverStream::new(rx);
    loop {
        tokio::select! {
            frame = rx.next() => {
                match frame {
                    Some(frame) => {
                        if sender.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        submit_inbound(&state, &mut sender, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }
    state.coordinator.disconnect(&session_id);
    tracing::info!(session = %session_id, "client disconnected");
}

async fn submit_inbound(state: &AppState, sender: &mut SplitSink<WebSocket, Message>, text: &str) {
    let Ok(req) = serde_json::from_str::<InboundText>(text) else {
        return;
    };
    match state
        .coordinator
        .submit_text(req.user.as_deref(), &req.text)
        .await
    {
        Ok(_) => {}
        // empty submissions vanish without a reply
        Err(SubmitError::EmptyMessage) => {}
        Err(SubmitError::Storage(e)) => {
            tracing::error!(error = %e, "submission lost to storage failure");
            let _ = sender
                .send(Message::Text(r#"{"error":"storage_unavailable"}"#.into()))
                .await;
        }
    }
}

/// Run the HTTP server with the provided configuration.
pub async fn run_http_server(config: Config) -> Result<()> {
    let state = AppState::new(config).await?;
    housekeeping::spawn(state.clone());
    let addr: SocketAddr = state.config.bind.parse()?;
    tracing::info!(%addr, "listening");
    axum::Server::bind(&addr)
        .serve(build_router(state).into_make_service())
        .await?;
    Ok(())
}
