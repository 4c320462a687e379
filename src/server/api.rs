use crate::agent::ChatAgent;
use crate::cli::Args;
use crate::models::chat::Message;
use crate::session::{ SessionRegistry, SessionStatus, SubmitError };
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use axum::{
    routing::{ get, post },
    Router,
    Json,
    extract::{ State, Path },
    response::{ Html, IntoResponse, Response },
    http::StatusCode,
};
use serde::{ Deserialize, Serialize };
use tower_http::cors::{ Any, CorsLayer };
use log::{ info, warn, error };

const INDEX_TEMPLATE: &str = include_str!("../../static/index.html");

#[derive(Deserialize)]
pub struct SubmitRequest {
    pub content: String,
    #[serde(default)]
    pub attachment: Option<String>,
}

#[derive(Serialize)]
struct SessionCreated {
    session_id: String,
}

#[derive(Serialize)]
struct SessionView<'a> {
    session_id: &'a str,
    status: SessionStatus,
    messages: &'a [Message],
    message_count: usize,
}

#[derive(Serialize)]
struct SubmitResponse {
    answer: String,
    message_id: String,
    message_count: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_count: Option<usize>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    sessions: usize,
}

#[derive(Clone)]
pub struct AppState {
    agent: Arc<ChatAgent>,
    sessions: Arc<SessionRegistry>,
    page: Arc<String>,
}

impl AppState {
    pub fn new(agent: Arc<ChatAgent>, sessions: Arc<SessionRegistry>, page: String) -> Self {
        Self { agent, sessions, page: Arc::new(page) }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/api/sessions", post(create_session_handler))
        .route("/api/sessions/{id}", get(get_session_handler).delete(end_session_handler))
        .route("/api/sessions/{id}/messages", post(submit_handler))
        .route("/api/sessions/{id}/clear", post(clear_session_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn start_http_server(
    agent: Arc<ChatAgent>,
    sessions: Arc<SessionRegistry>,
    args: Args,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = args.http_addr.parse::<SocketAddr>()?;
    let page = render_index(
        &args.app_title,
        &args.assistant_name,
        args.public_ws_url.as_deref(),
        args.ws_port()
    );
    let app = router(AppState::new(agent, sessions, page));

    if args.tls_enabled() {
        let (Some(cert_path), Some(key_path)) = (&args.tls_cert_path, &args.tls_key_path) else {
            return Err("TLS enabled without cert/key".into());
        };
        let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
            cert_path,
            key_path
        ).await?;

        info!("Starting HTTPS server on: https://{}", addr);
        tokio::spawn(async move {
            let result = axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await;

            if let Err(e) = result {
                error!("HTTPS server error: {}", e);
            }
        });
    } else {
        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            format!("Failed to bind HTTP server to {}: {}", addr, e)
        })?;

        info!("Starting HTTP server on: http://{}", addr);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                error!("HTTP server error: {}", e);
            }
        });
    }

    Ok(())
}

/// Fills the page template. Names are HTML-escaped and the WebSocket URL is
/// embedded as a JSON string literal with `<` escaped, so it cannot close the
/// surrounding script element.
pub fn render_index(
    title: &str,
    assistant_name: &str,
    ws_url: Option<&str>,
    ws_port: Option<u16>
) -> String {
    let ws_url_literal = serde_json::to_string(ws_url.unwrap_or(""))
        .unwrap_or_else(|_| "\"\"".into())
        .replace('<', "\\u003c");
    let ws_port_literal = ws_port.map(|p| p.to_string()).unwrap_or_else(|| "null".into());

    INDEX_TEMPLATE
        .replace("{{APP_TITLE}}", &escape_html(title))
        .replace("{{ASSISTANT_NAME}}", &escape_html(assistant_name))
        .replace("{{WS_URL}}", &ws_url_literal)
        .replace("{{WS_PORT}}", &ws_port_literal)
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn error_response(code: StatusCode, error: impl Into<String>) -> Response {
    (code, Json(ErrorResponse {
        error: error.into(),
        kind: None,
        message_count: None,
    })).into_response()
}

fn unknown_session(id: &str) -> Response {
    error_response(StatusCode::NOT_FOUND, format!("Unknown session: {}", id))
}

async fn index_handler(State(state): State<AppState>) -> Html<String> {
    Html(state.page.as_str().to_owned())
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        sessions: state.sessions.len().await,
    })
}

async fn create_session_handler(State(state): State<AppState>) -> Response {
    match state.sessions.create().await {
        Some(session_id) => (StatusCode::CREATED, Json(SessionCreated { session_id })).into_response(),
        None => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("Session limit of {} reached", state.sessions.max_sessions())
        ),
    }
}

async fn get_session_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let Some(session) = state.sessions.get(&id).await else {
        return unknown_session(&id);
    };
    let conversation = session.lock().await;
    let response = Json(SessionView {
        session_id: &id,
        status: conversation.status(),
        messages: conversation.messages(),
        message_count: conversation.len(),
    }).into_response();
    response
}

async fn submit_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SubmitRequest>,
) -> Response {
    let Some(session) = state.sessions.get(&id).await else {
        return unknown_session(&id);
    };
    let mut conversation = session.lock().await;

    let result = state.agent.submit(&mut conversation, &req.content, req.attachment.as_deref()).await;
    match result {
        Ok(reply) => Json(SubmitResponse {
            answer: reply.answer,
            message_id: reply.message_id,
            message_count: conversation.len(),
        }).into_response(),
        Err(SubmitError::EmptyUtterance) => {
            error_response(StatusCode::UNPROCESSABLE_ENTITY, SubmitError::EmptyUtterance.to_string())
        }
        Err(SubmitError::Chat(e)) => {
            warn!("Session {} chat call failed: {}", id, e);
            (StatusCode::BAD_GATEWAY, Json(ErrorResponse {
                error: e.to_string(),
                kind: Some(e.kind()),
                message_count: Some(conversation.len()),
            })).into_response()
        }
    }
}

async fn clear_session_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let Some(session) = state.sessions.get(&id).await else {
        return unknown_session(&id);
    };
    session.lock().await.clear();
    info!("Cleared session {}", id);
    StatusCode::NO_CONTENT.into_response()
}

async fn end_session_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    if state.sessions.remove(&id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        unknown_session(&id)
    }
}
