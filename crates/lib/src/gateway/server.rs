//! Gateway HTTP + WebSocket server (single port) hosting the web widget endpoints.

use crate::attachments::AttachmentStore;
use crate::channels::web::{
    new_session_id, session_id_from_cookie, WebQuery, WebSession, SESSION_COOKIE,
};
use crate::channels::{ChannelData, ChannelError, ChannelRegistry};
use crate::config::Config;
use crate::gateway::protocol::{SocketMethod, WsRequest, WsResponse, PROTOCOL_VERSION};
use crate::runtime::Runtime;
use crate::subscriber::Subscriber;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Path, Query, State,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};

const SHUTDOWN_EVENT_JSON: &str = r#"{"type":"event","event":"shutdown","payload":{}}"#;

/// Messages returned with a subscription.
const HISTORY_LIMIT: usize = 30;

/// Shared state for the gateway.
#[derive(Clone)]
pub struct GatewayState {
    pub runtime: Arc<Runtime>,
    /// Broadcasts events to connected sockets (e.g. shutdown).
    pub event_tx: broadcast::Sender<String>,
}

/// Runs the gateway: builds the runtime, binds, serves until shutdown (Ctrl+C or SIGTERM).
pub async fn run_gateway(config: Config, config_path: PathBuf) -> Result<()> {
    let bind_addr = format!("{}:{}", config.gateway.bind.trim(), config.gateway.port);
    let runtime = Arc::new(Runtime::start(config, config_path).await?);
    let (event_tx, _) = broadcast::channel(64);
    let state = GatewayState {
        runtime: runtime.clone(),
        event_tx: event_tx.clone(),
    };

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(event_tx, runtime.channels.clone()))
    .await
    .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route(
            "/webhook/web",
            get(web_get).post(web_post).options(web_preflight),
        )
        .route("/webhook/web/ws", get(ws_handler))
        .route("/webhook/web/download/:name", get(download))
        .with_state(state)
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Broadcasts a shutdown event to sockets, then stops the registered channels.
async fn shutdown_signal(event_tx: broadcast::Sender<String>, channels: Arc<ChannelRegistry>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, broadcasting shutdown and draining connections");

    let _ = event_tx.send(SHUTDOWN_EVENT_JSON.to_string());
    channels.stop_all().await;
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "protocol": PROTOCOL_VERSION,
        "port": state.runtime.config.gateway.port,
        "channels": state.runtime.channels.names().await,
        "stats": state.runtime.stats.snapshot().await,
    }))
}

fn origin(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::ORIGIN).and_then(|v| v.to_str().ok())
}

/// Session id from the cookie, or a fresh one (`true`) when the request carries none.
fn session_cookie(headers: &HeaderMap) -> (String, bool) {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(session_id_from_cookie)
        .map(|id| (id, false))
        .unwrap_or_else(|| (new_session_id(), true))
}

fn set_session_cookie(out: &mut HeaderMap, id: &str) {
    let cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, id);
    if let Ok(v) = HeaderValue::from_str(&cookie) {
        out.insert(header::SET_COOKIE, v);
    }
}

fn channel_data(headers: &HeaderMap, addr: SocketAddr, is_socket: bool) -> ChannelData {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    ChannelData {
        is_socket,
        ip_address: forwarded.unwrap_or_else(|| addr.ip().to_string()),
        agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string(),
    }
}

fn error_status(e: &ChannelError) -> StatusCode {
    match e {
        ChannelError::CorsRejected { .. } | ChannelError::Unauthorized(_) => StatusCode::FORBIDDEN,
        ChannelError::MalformedEvent(_) | ChannelError::Upload(_) => StatusCode::BAD_REQUEST,
        ChannelError::InboundClosed => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(e: ChannelError, out: HeaderMap) -> Response {
    let status = error_status(&e);
    if status.is_server_error() {
        log::warn!("web channel: {}", e);
    } else {
        log::debug!("web channel: {}", e);
    }
    (status, out, Json(json!({ "error": e.to_string() }))).into_response()
}

async fn subscribe_payload(runtime: &Runtime, profile: Subscriber) -> serde_json::Value {
    let messages = runtime.messages.history(&profile.id, HISTORY_LIMIT).await;
    json!({ "profile": profile, "messages": messages })
}

/// OPTIONS /webhook/web: CORS preflight.
async fn web_preflight(State(state): State<GatewayState>, headers: HeaderMap) -> Response {
    let mut out = HeaderMap::new();
    match state
        .runtime
        .web
        .validate_cors(origin(&headers), true, &mut out)
        .await
    {
        Ok(()) => (StatusCode::NO_CONTENT, out).into_response(),
        Err(e) => error_response(e, out),
    }
}

/// GET /webhook/web: subscribe (default), `?_get=settings`, `?_get=polling`, `?_disconnect`.
async fn web_get(
    State(state): State<GatewayState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<WebQuery>,
    headers: HeaderMap,
) -> Response {
    let web = &state.runtime.web;
    let mut out = HeaderMap::new();
    if let Err(e) = web.validate_cors(origin(&headers), false, &mut out).await {
        return error_response(e, out);
    }
    let (sid, fresh) = session_cookie(&headers);

    if query.disconnect.is_some() {
        web.disconnect(&sid).await;
        return (StatusCode::OK, out, Json(json!({ "disconnected": true }))).into_response();
    }
    if query.get.as_deref() == Some("settings") {
        return match web.widget_settings().await {
            Ok(settings) => (StatusCode::OK, out, Json(settings)).into_response(),
            Err(e) => error_response(e, out),
        };
    }

    if fresh {
        set_session_cookie(&mut out, &sid);
    }
    let handle = web.sessions.get_or_insert(&sid).await;
    let mut session = handle.lock().await;
    let profile = match web
        .get_or_create_session(&mut session, &query, channel_data(&headers, addr, false))
        .await
    {
        Ok(p) => p,
        Err(e) => return error_response(e, out),
    };

    if query.get.as_deref() == Some("polling") {
        session.polling = true;
        let messages = web.poll(&profile.id).await;
        return (StatusCode::OK, out, Json(messages)).into_response();
    }
    let payload = subscribe_payload(&state.runtime, profile).await;
    (StatusCode::OK, out, Json(payload)).into_response()
}

/// POST /webhook/web: one widget event; responds with the echoed event.
async fn web_post(
    State(state): State<GatewayState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let web = &state.runtime.web;
    let mut out = HeaderMap::new();
    if let Err(e) = web.validate_cors(origin(&headers), false, &mut out).await {
        return error_response(e, out);
    }
    let (sid, fresh) = session_cookie(&headers);
    let handle = match web.sessions.get(&sid).await {
        Some(h) if !fresh => h,
        _ => {
            return error_response(
                ChannelError::Unauthorized("subscribe before sending messages".to_string()),
                out,
            )
        }
    };
    let raw: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return error_response(ChannelError::MalformedEvent(e.to_string()), out),
    };
    let session = handle.lock().await;
    match web
        .handle_inbound(&session, raw, channel_data(&headers, addr, false))
        .await
    {
        Ok(outcome) => (StatusCode::OK, out, Json(outcome.echo)).into_response(),
        Err(e) => error_response(e, out),
    }
}

/// GET /webhook/web/download/:name serves a stored upload.
async fn download(State(state): State<GatewayState>, Path(name): Path<String>) -> Response {
    match state.runtime.attachments.read(&name).await {
        Ok(Some(bytes)) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            log::warn!("download {}: {}", name, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /webhook/web/ws upgrades to a widget socket after the CORS check.
async fn ws_handler(
    State(state): State<GatewayState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let mut out = HeaderMap::new();
    if let Err(e) = state
        .runtime
        .web
        .validate_cors(origin(&headers), false, &mut out)
        .await
    {
        return error_response(e, out);
    }
    let (sid, fresh) = session_cookie(&headers);
    if fresh {
        set_session_cookie(&mut out, &sid);
    }
    let data = channel_data(&headers, addr, true);
    let mut res = ws.on_upgrade(move |socket| handle_socket(socket, state, sid, data));
    res.headers_mut().extend(out);
    res
}

async fn handle_socket(socket: WebSocket, state: GatewayState, sid: String, data: ChannelData) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut event_rx = state.event_tx.subscribe();
    let session = state.runtime.web.sessions.get_or_insert(&sid).await;
    let mut subscriber_id: Option<String> = None;

    loop {
        tokio::select! {
            biased;

            event = event_rx.recv() => {
                match event {
                    Ok(text) => {
                        let is_shutdown = text == SHUTDOWN_EVENT_JSON;
                        let _ = tx.send(text);
                        if is_shutdown {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::debug!("ws client lagged {} broadcast messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = stream.next() => {
                let Some(Ok(msg)) = msg else { break };
                let Message::Text(text) = msg else { continue };
                let Ok(req): Result<WsRequest, _> = serde_json::from_str(&text) else { continue };
                if req.typ != "req" {
                    continue;
                }
                let res = handle_request(&state, &session, &req, &data, &tx, &mut subscriber_id).await;
                if let Ok(frame) = serde_json::to_string(&res) {
                    let _ = tx.send(frame);
                }
            }
        }
    }

    if let Some(id) = subscriber_id {
        let web = &state.runtime.web;
        web.detach_socket(&id).await;
        let mut session = session.lock().await;
        let polling = ChannelData {
            is_socket: false,
            ..data
        };
        if let Err(e) = web
            .get_or_create_session(&mut session, &WebQuery::default(), polling)
            .await
        {
            log::debug!("web channel: resetting socket session: {}", e);
        }
    }
    drop(tx);
    let _ = writer.await;
}

async fn handle_request(
    state: &GatewayState,
    session: &Mutex<WebSession>,
    req: &WsRequest,
    data: &ChannelData,
    tx: &mpsc::UnboundedSender<String>,
    subscriber_id: &mut Option<String>,
) -> WsResponse {
    let method = match SocketMethod::parse(req) {
        Ok(m) => m,
        Err(e) => return WsResponse::err(&req.id, e),
    };
    let web = &state.runtime.web;
    let result = match method {
        SocketMethod::Settings => web.widget_settings().await,
        SocketMethod::Subscribe(query) => {
            let mut session = session.lock().await;
            match web
                .get_or_create_session(&mut session, &query, data.clone())
                .await
            {
                Ok(profile) => {
                    web.attach_socket(&profile.id, tx.clone()).await;
                    *subscriber_id = Some(profile.id.clone());
                    Ok(subscribe_payload(&state.runtime, profile).await)
                }
                Err(e) => Err(e),
            }
        }
        SocketMethod::Message(raw) => {
            let session = session.lock().await;
            web.handle_inbound(&session, raw, data.clone())
                .await
                .and_then(|outcome| {
                    serde_json::to_value(outcome.echo)
                        .map_err(|e| ChannelError::MalformedEvent(e.to_string()))
                })
        }
    };
    match result {
        Ok(payload) => WsResponse::ok(&req.id, payload),
        Err(e) => WsResponse::err(&req.id, e.to_string()),
    }
}
