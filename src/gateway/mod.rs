//! Axum-based HTTP gateway for account registration and sign-in.
//!
//! Every route shares the same hardening: a request body limit, a request
//! timeout and a CORS policy for browser clients.

use crate::auth::{
    AuthError, CredentialHasher, CredentialVerifier, Registrar, SignInInput, SignUpInput,
    SqliteAccountStore, TokenIssuer,
};
use crate::config::Config;
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size (64KB). Auth payloads are tiny.
pub const MAX_BODY_SIZE: usize = 65_536;
/// Default request timeout (30s). Covers one full hash at production rounds.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

type ApiResponse = (StatusCode, Json<serde_json::Value>);

/// Shared state for all gateway handlers
#[derive(Clone)]
pub struct AppState {
    pub registrar: Arc<Registrar>,
    pub verifier: Arc<CredentialVerifier>,
}

impl AppState {
    /// Wire the store, hasher and token issuer described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = Arc::new(
            SqliteAccountStore::open(&config.database.path, config.database.pool_size)
                .context("Failed to open account store")?,
        );
        let hasher = CredentialHasher::new(config.auth.hash_rounds);
        let tokens = TokenIssuer::new(
            config.auth.jwt_secret.as_deref(),
            config.auth.token_ttl(),
        );

        let registrar = Registrar::new(
            store.clone(),
            hasher.clone(),
            tokens.clone(),
            config.auth.transaction_timeout(),
        )
        .with_policy(config.auth.registration_policy());
        let verifier = CredentialVerifier::new(store, hasher, tokens);

        Ok(Self {
            registrar: Arc::new(registrar),
            verifier: Arc::new(verifier),
        })
    }
}

/// Build the router with all routes and middleware.
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    let auth_routes = Router::new()
        .route("/sign-up", post(handle_sign_up))
        .route("/sign-in", post(handle_sign_in))
        .route("/me", get(handle_me));

    Router::new()
        .route("/health", get(handle_health))
        .nest("/api/v1/auth", auth_routes)
        .with_state(state)
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
}

/// Run the HTTP gateway until Ctrl-C.
pub async fn run_gateway(config: Config) -> Result<()> {
    let state = AppState::from_config(&config)?;
    let request_timeout = if config.gateway.request_timeout_secs == 0 {
        Duration::from_secs(REQUEST_TIMEOUT_SECS)
    } else {
        Duration::from_secs(config.gateway.request_timeout_secs)
    };
    let app = build_router(state, request_timeout);

    let host = &config.gateway.host;
    let addr: SocketAddr = format!("{host}:{}", config.gateway.port)
        .parse()
        .with_context(|| format!("Invalid bind address {host}:{}", config.gateway.port))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;

    tracing::info!(
        addr = %local,
        database = %config.database.path.display(),
        "Gateway listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

/// GET /health — always public
async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /api/v1/auth/sign-up
async fn handle_sign_up(
    State(state): State<AppState>,
    body: Result<Json<SignUpInput>, JsonRejection>,
) -> Result<ApiResponse, AuthError> {
    let Json(input) = body.map_err(invalid_body)?;
    let request = input.validate()?;
    let session = state.registrar.register(request).await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "success": true,
            "message": "User created successfully",
            "data": { "user": session.account, "token": session.token },
        })),
    ))
}

/// POST /api/v1/auth/sign-in
async fn handle_sign_in(
    State(state): State<AppState>,
    body: Result<Json<SignInInput>, JsonRejection>,
) -> Result<ApiResponse, AuthError> {
    let Json(input) = body.map_err(invalid_body)?;
    let request = input.validate()?;
    let session = state.verifier.sign_in(request).await?;

    Ok((
        StatusCode::OK,
        Json(serde_json::json!({
            "success": true,
            "message": "User signed in successfully",
            "data": { "user": session.account, "token": session.token },
        })),
    ))
}

/// GET /api/v1/auth/me — requires `Authorization: Bearer <token>`
async fn handle_me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<ApiResponse, AuthError> {
    let token = extract_bearer_token(&headers).ok_or(AuthError::TokenInvalid)?;
    let account = state.verifier.authenticate_token(token).await?;

    Ok((
        StatusCode::OK,
        Json(serde_json::json!({
            "success": true,
            "data": { "user": account },
        })),
    ))
}

fn invalid_body(e: JsonRejection) -> AuthError {
    AuthError::Validation(format!("Invalid request: {}", e.body_text()))
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
