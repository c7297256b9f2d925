use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_shared::models::{ConversationSummary, Message, PageRequest};
use parley_shared::protocol::{MarkReadResponse, PresenceResponse, SendMessageRequest};
use parley_shared::types::UserId;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::gateway::ws_handler;
use crate::persistence::SharedStore;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::router::RouterHandle;

/// Response header carrying the cursor for the next history page.
pub const NEXT_CURSOR_HEADER: &str = "x-next-cursor";

#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub router: RouterHandle,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([axum::http::HeaderName::from_static(NEXT_CURSOR_HEADER)]);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/messages/send", post(send_message))
        .route("/messages/conversations", get(list_conversations))
        .route(
            "/messages/conversation/:counterpart_id",
            get(get_conversation),
        )
        .route(
            "/messages/conversation/:counterpart_id/read",
            patch(mark_conversation_read),
        )
        .route("/presence/:user_id", get(presence))
        .route("/ws", get(ws_handler))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    online_users: usize,
    connections: usize,
    joined_connections: usize,
}

/// Optional history paging: `?after=<seq>&limit=<n>`.
#[derive(Debug, Default, Deserialize)]
struct PageQuery {
    after: Option<i64>,
    limit: Option<u32>,
}

impl From<PageQuery> for PageRequest {
    fn from(q: PageQuery) -> Self {
        PageRequest {
            after: q.after,
            limit: q.limit,
        }
    }
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Result<Json<ServerInfoResponse>, ServerError> {
    let stats = state.router.stats().await?;
    Ok(Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        online_users: stats.online_users,
        connections: stats.open_connections,
        joined_connections: stats.joined_connections,
    }))
}

/// Authenticated caller, as asserted by the auth layer in front of us.
pub(crate) fn caller_id(headers: &HeaderMap, config: &ServerConfig) -> Result<UserId, ServerError> {
    let raw = headers
        .get(config.identity_header.as_str())
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ServerError::MissingIdentity(config.identity_header.clone()))?;

    Ok(UserId::parse(raw)?)
}

fn path_user(raw: String) -> Result<UserId, ServerError> {
    Ok(UserId::parse(raw)?)
}

async fn send_message(
    headers: HeaderMap,
    State(state): State<AppState>,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Message>), ServerError> {
    let sender = caller_id(&headers, &state.config)?;
    let Json(req) = body?;
    let message = state
        .store
        .append(sender, req.receiver_id, req.message)
        .await?;

    info!(
        id = %message.id,
        sender = %message.sender_id.short(),
        receiver = %message.receiver_id.short(),
        "Message persisted"
    );
    Ok((StatusCode::CREATED, Json(message)))
}

async fn get_conversation(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(counterpart_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Response, ServerError> {
    let caller = caller_id(&headers, &state.config)?;
    let counterpart = path_user(counterpart_id)?;

    let page = state
        .store
        .list_conversation(caller, counterpart, query.into())
        .await?;

    let mut response = Json(page.messages).into_response();
    if let Some(next) = page.next {
        let value = HeaderValue::from_str(&next.to_string())
            .map_err(|e| ServerError::Internal(format!("Bad cursor header: {e}")))?;
        response.headers_mut().insert(NEXT_CURSOR_HEADER, value);
    }
    Ok(response)
}

async fn mark_conversation_read(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(counterpart_id): Path<String>,
) -> Result<Json<MarkReadResponse>, ServerError> {
    let reader = caller_id(&headers, &state.config)?;
    let counterpart = path_user(counterpart_id)?;

    let updated = state.store.mark_read(reader, counterpart).await?;
    Ok(Json(MarkReadResponse { updated }))
}

async fn list_conversations(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<ConversationSummary>>, ServerError> {
    let caller = caller_id(&headers, &state.config)?;
    Ok(Json(state.store.list_for_user(caller).await?))
}

async fn presence(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<PresenceResponse>, ServerError> {
    let user = path_user(user_id)?;
    let info = state.router.presence(user.clone()).await?;
    Ok(Json(PresenceResponse {
        user_id: user,
        online: info.online,
        connections: info.connections,
    }))
}

/// Serve until `shutdown` resolves, then let in-flight requests finish.
pub async fn serve<F>(state: AppState, addr: std::net::SocketAddr, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    Ok(())
}
