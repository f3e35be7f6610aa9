//! HTTP Handlers

use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use agent_core::{SessionId, ToolResult};
use broker_gateway::{AuthState, BrokerError, ChatOutcome, GatewayStatus, PortfolioSnapshot, Verification};

use crate::state::AppState;

/// Header carrying the caller's session id
pub const SESSION_HEADER: &str = "x-session-id";

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub provider: String,
    pub provider_connected: bool,
    pub brokers: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ConnectResponse {
    pub session: String,
    pub broker: String,
    #[serde(flatten)]
    pub state: AuthState,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub session: String,
    pub broker: String,
    pub login_url: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct VerifyQuery {
    /// Keep polling up to this many seconds before giving up
    #[serde(default)]
    pub wait_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub closed: usize,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Request failure rendered as an HTTP response
#[derive(Debug)]
pub enum ApiError {
    /// The request did not name its session
    MissingSession,
    Broker(BrokerError),
}

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        Self::Broker(err)
    }
}

impl ApiError {
    pub const fn status(&self) -> StatusCode {
        let Self::Broker(err) = self else {
            return StatusCode::BAD_REQUEST;
        };
        match err {
            BrokerError::NotAuthenticated { .. } => StatusCode::UNAUTHORIZED,
            BrokerError::AlreadyAuthenticated { .. } | BrokerError::NoActiveBroker => StatusCode::CONFLICT,
            BrokerError::UnknownBroker(_) => StatusCode::NOT_FOUND,
            BrokerError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            BrokerError::Connection(_)
            | BrokerError::Login(_)
            | BrokerError::Rpc { .. }
            | BrokerError::ToolExecution { .. }
            | BrokerError::MalformedToolOutput(_) => StatusCode::BAD_GATEWAY,
            BrokerError::SessionClosed => StatusCode::GONE,
            BrokerError::Unsupported(_) => StatusCode::BAD_REQUEST,
            BrokerError::Config(_) | BrokerError::Serialization(_) | BrokerError::Agent(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::MissingSession => ErrorResponse {
                error: format!("Send the {SESSION_HEADER} header with every request."),
                code: "missing_session".into(),
            },
            Self::Broker(err) => {
                if status.is_server_error() {
                    tracing::error!(code = err.code(), "Request failed: {}", err);
                } else {
                    tracing::debug!(code = err.code(), "Request rejected: {}", err);
                }
                ErrorResponse {
                    error: err.user_message(),
                    code: err.code().into(),
                }
            }
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Session named by the request header.
///
/// The header is required: a session nobody can name again would strand
/// its broker connections in the registry.
pub fn session_from(headers: &HeaderMap) -> ApiResult<SessionId> {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(SessionId::from_string)
        .ok_or(ApiError::MissingSession)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let provider_connected = state.provider.health_check().await.unwrap_or(false);

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        provider: state.provider.info().name,
        provider_connected,
        brokers: state.gateway.catalog().names().map(String::from).collect(),
    })
}

/// Every configured broker's state for this session
pub async fn status(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<GatewayStatus>> {
    let session = session_from(&headers)?;
    Ok(Json(state.gateway.status(&session).await?))
}

pub async fn connect(
    State(state): State<AppState>,
    Path(broker): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<ConnectResponse>> {
    let session = session_from(&headers)?;
    let auth = state.gateway.connect(&session, &broker).await?;
    Ok(Json(ConnectResponse {
        session: session.to_string(),
        broker,
        state: auth,
    }))
}

pub async fn login(
    State(state): State<AppState>,
    Path(broker): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<LoginResponse>> {
    let session = session_from(&headers)?;
    let login_url = state.gateway.login(&session, &broker).await?;
    Ok(Json(LoginResponse {
        session: session.to_string(),
        broker,
        login_url,
    }))
}

/// Check whether the browser login finished, optionally waiting for it
pub async fn verify(
    State(state): State<AppState>,
    Path(broker): Path<String>,
    Query(query): Query<VerifyQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<Verification>> {
    let session = session_from(&headers)?;
    let verification = match query.wait_secs.filter(|secs| *secs > 0) {
        Some(secs) => {
            state
                .gateway
                .verify_until(&session, &broker, Duration::from_secs(secs))
                .await?
        }
        None => state.gateway.verify(&session, &broker).await?,
    };
    Ok(Json(verification))
}

/// Attach an access token obtained from a REST broker's redirect
pub async fn attach_token(
    State(state): State<AppState>,
    Path(broker): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<TokenRequest>,
) -> ApiResult<Json<Verification>> {
    let session = session_from(&headers)?;
    Ok(Json(state.gateway.attach_token(&session, &broker, &payload.token).await?))
}

pub async fn activate(
    State(state): State<AppState>,
    Path(broker): Path<String>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let session = session_from(&headers)?;
    state.gateway.activate(&session, &broker).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Clear the conversation history of one broker's agent
pub async fn reset(
    State(state): State<AppState>,
    Path(broker): Path<String>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let session = session_from(&headers)?;
    state.gateway.reset(&session, &broker).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn logout(
    State(state): State<AppState>,
    Path(broker): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<LogoutResponse>> {
    let session = session_from(&headers)?;
    let closed = state.gateway.logout(&session, &broker).await?;
    Ok(Json(LogoutResponse { closed: usize::from(closed) }))
}

pub async fn logout_all(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<LogoutResponse>> {
    let session = session_from(&headers)?;
    let closed = state.gateway.logout_all(&session).await?;
    Ok(Json(LogoutResponse { closed }))
}

pub async fn snapshot(
    State(state): State<AppState>,
    Path(broker): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<Option<PortfolioSnapshot>>> {
    let session = session_from(&headers)?;
    Ok(Json(state.gateway.snapshot(&session, &broker).await?))
}

/// Chat with the active broker's agent
pub async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ChatRequest>,
) -> ApiResult<Json<ChatOutcome>> {
    let session = session_from(&headers)?;
    Ok(Json(state.gateway.chat(&session, &payload.message).await?))
}

/// Invoke one tool on the active broker directly
pub async fn call_tool(
    State(state): State<AppState>,
    Path(tool): Path<String>,
    headers: HeaderMap,
    body: Option<Json<Value>>,
) -> ApiResult<Json<ToolResult>> {
    let session = session_from(&headers)?;
    let arguments = body.map_or_else(|| Value::Object(serde_json::Map::new()), |Json(value)| value);
    Ok(Json(state.gateway.call_tool(&session, &tool, arguments).await?))
}
