//! broker-agent HTTP Server
//!
//! Axum-based server exposing the broker login flow and the per-session
//! chat agent as a small REST API. The caller's session travels in the
//! `x-session-id` header.

mod handlers;
mod state;

use std::sync::Arc;

use axum::{routing::{get, post}, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_core::{LlmProvider, MemorySessionStore};
use agent_runtime::{OpenAiConfig, OpenAiProvider};
use broker_gateway::{BrokerCatalog, BrokerGateway, GatewayConfig, MemorySnapshotStore};

use crate::handlers::{
    activate, attach_token, call_tool, chat, connect, health_check, login, logout, logout_all, reset, snapshot,
    status, verify,
};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    // Initialize LLM provider
    let config = match std::env::var("LLM_PROVIDER").as_deref() {
        Ok("ollama") => OpenAiConfig::ollama_from_env(),
        _ => OpenAiConfig::from_env(),
    };
    let provider: Arc<dyn LlmProvider> = Arc::new(OpenAiProvider::from_config(config)?);
    let info = provider.info();

    match provider.health_check().await {
        Ok(true) => {
            tracing::info!("✓ Connected to {} at {}", info.name, info.endpoint);
            if let Ok(models) = provider.list_models().await {
                for model in models {
                    tracing::info!("  Model: {}", model.id);
                }
            }
        }
        Ok(false) | Err(_) => {
            tracing::warn!("⚠ {} not reachable at {} - chat will fail", info.name, info.endpoint);
        }
    }

    // Broker gateway
    let catalog = BrokerCatalog::from_env();
    tracing::info!("Configured {} brokers:", catalog.len());
    for spec in catalog.specs() {
        tracing::info!("  • {} ({})", spec.name, spec.display_name);
    }

    let gateway = Arc::new(
        BrokerGateway::builder()
            .catalog(catalog)
            .provider(Arc::clone(&provider))
            .config(GatewayConfig::from_env())
            .sessions(Arc::new(MemorySessionStore::new()))
            .snapshots(Arc::new(MemorySnapshotStore::default()))
            .build()?,
    );

    let state = AppState {
        gateway: Arc::clone(&gateway),
        provider,
    };

    let app = router(state);

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 broker-agent server running on http://{}", addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                          - Health check");
    tracing::info!("  GET  /api/status                      - Broker states for this session");
    tracing::info!("  POST /api/brokers/{{broker}}/login      - Start browser login");
    tracing::info!("  POST /api/brokers/{{broker}}/verify     - Confirm login (?wait_secs=N)");
    tracing::info!("  POST /api/chat                        - Chat with the active broker");
    tracing::info!("  POST /api/tools/{{tool}}                - Call a broker tool directly");
    tracing::info!("");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(gateway))
        .await?;

    Ok(())
}

/// API routes with CORS and request tracing
fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health & info
        .route("/health", get(health_check))
        .route("/api/status", get(status))

        // Broker login flow
        .route("/api/brokers/{broker}/connect", post(connect))
        .route("/api/brokers/{broker}/login", post(login))
        .route("/api/brokers/{broker}/verify", post(verify))
        .route("/api/brokers/{broker}/token", post(attach_token))
        .route("/api/brokers/{broker}/activate", post(activate))
        .route("/api/brokers/{broker}/reset", post(reset))
        .route("/api/brokers/{broker}/logout", post(logout))
        .route("/api/brokers/{broker}/snapshot", get(snapshot))
        .route("/api/logout", post(logout_all))

        // Agent API
        .route("/api/chat", post(chat))
        .route("/api/tools/{tool}", post(call_tool))

        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wait for Ctrl-C, then close every broker session
async fn shutdown_signal(gateway: Arc<BrokerGateway>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    let closed = gateway.shutdown().await;
    tracing::info!("Shutting down; closed {} broker sessions", closed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use broker_gateway::BrokerSpec;
    use serde_json::Value;
    use tower::ServiceExt;

    fn test_app() -> Router {
        // Nothing listens on the discard port; no request in these tests reaches it
        let provider: Arc<dyn LlmProvider> =
            Arc::new(OpenAiProvider::from_config(OpenAiConfig::ollama("http://127.0.0.1", 9)).unwrap());
        let gateway = BrokerGateway::builder()
            .catalog(BrokerCatalog::new([BrokerSpec::kite("http://127.0.0.1:9/mcp")]))
            .provider(Arc::clone(&provider))
            .build()
            .unwrap();
        router(AppState {
            gateway: Arc::new(gateway),
            provider,
        })
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, body)
    }

    fn post(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header("x-session-id", "tab-1")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_lists_brokers() {
        let request = Request::get("/health").body(Body::empty()).unwrap();
        let (status, body) = send(test_app(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["brokers"], serde_json::json!(["kite"]));
        assert_eq!(body["provider_connected"], false);
    }

    #[tokio::test]
    async fn chat_without_active_broker_is_a_conflict() {
        let (status, body) = send(test_app(), post("/api/chat", r#"{"message": "hi"}"#)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "no_active_broker");
    }

    #[tokio::test]
    async fn unknown_broker_is_not_found() {
        let (status, body) = send(test_app(), post("/api/brokers/nope/connect", "{}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "unknown_broker");
    }

    #[tokio::test]
    async fn activating_before_login_is_unauthorized() {
        let (status, body) = send(test_app(), post("/api/brokers/kite/activate", "{}")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "not_authenticated");
    }

    #[tokio::test]
    async fn requests_without_a_session_are_rejected() {
        let request = Request::post("/api/brokers/kite/connect").body(Body::empty()).unwrap();
        let (status, body) = send(test_app(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "missing_session");

        let request = Request::get("/api/status").body(Body::empty()).unwrap();
        let (status, _) = send(test_app(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn status_reports_every_broker_disconnected() {
        let request = Request::get("/api/status")
            .header("x-session-id", "tab-2")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(test_app(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session"], "tab-2");
        assert_eq!(body["brokers"][0]["state"], "disconnected");
        assert!(body["active_broker"].is_null());
    }
}
