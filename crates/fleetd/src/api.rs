//! HTTP API: health, metrics and the authenticated fleet routes

use axum::{
    extract::{Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Extension, Json, Router,
};
use fleet_core::{
    health::{components, ComponentStatus, HealthRegistry},
    lifecycle::{ChannelSink, LogSink, OperationEvent},
    AuthenticatedPrincipal, CatalogSync, CompatibilityPatcher, DaemonError, FleetCatalog,
    FleetError, FleetMetrics, LifecycleController, Operation, OperationOutcome, ResourceProbe,
    UnitLocks, UnitStatus,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio_stream::{wrappers::UnboundedReceiverStream, Stream, StreamExt};
use tracing::{info, warn};

/// Subject recorded for callers holding the shared API token
const TOKEN_SUBJECT: &str = "api-token";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: FleetMetrics,
    pub catalog: Arc<FleetCatalog>,
    pub lifecycle: Arc<LifecycleController>,
    pub patcher: Arc<CompatibilityPatcher>,
    pub probe: Arc<ResourceProbe>,
    pub sync: Arc<CatalogSync>,
    pub locks: UnitLocks,
    pub api_token: Option<String>,
    pub log_tail_lines: usize,
}

/// Error body with a status derived from the failure
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<FleetError> for ApiError {
    fn from(err: FleetError) -> Self {
        let status = match &err {
            FleetError::UnitNotFound(_) => StatusCode::NOT_FOUND,
            FleetError::InvalidUnitName(_) => StatusCode::BAD_REQUEST,
            FleetError::Daemon(DaemonError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            FleetError::Daemon(DaemonError::Api { .. }) => StatusCode::BAD_GATEWAY,
            FleetError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<DaemonError> for ApiError {
    fn from(err: DaemonError) -> Self {
        FleetError::from(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn tokens_match(expected: &str, provided: &str) -> bool {
    let (a, b) = (expected.as_bytes(), provided.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Session layer: admit bearer-token holders and attach their principal
async fn require_principal(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match (state.api_token.as_deref(), provided) {
        (Some(expected), Some(token)) if tokens_match(expected, token) => {
            request
                .extensions_mut()
                .insert(AuthenticatedPrincipal::from_session(TOKEN_SUBJECT));
            next.run(request).await
        }
        _ => ApiError::new(StatusCode::UNAUTHORIZED, "missing or invalid bearer token")
            .into_response(),
    }
}

/// Health check response - 200 while operational, 503 when unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn list_units(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
) -> ApiResult<impl IntoResponse> {
    match state.catalog.list_units(&principal).await {
        Ok(units) => {
            state.health_registry.set_healthy(components::CATALOG).await;
            if units.iter().any(|u| u.status == UnitStatus::Unknown) {
                state
                    .health_registry
                    .set_degraded(components::DAEMON, "container state unavailable")
                    .await;
            } else if !units.is_empty() {
                state.health_registry.set_healthy(components::DAEMON).await;
            }
            Ok(Json(units))
        }
        Err(e) => {
            state
                .health_registry
                .set_degraded(components::CATALOG, e.to_string())
                .await;
            Err(e.into())
        }
    }
}

async fn get_unit(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.catalog.get_unit(&principal, &name).await?))
}

async fn get_readme(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Path(name): Path<String>,
) -> Response {
    match state.catalog.get_readme(&principal, &name).await {
        Some(text) => (
            [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
            text,
        )
            .into_response(),
        None => ApiError::new(StatusCode::NOT_FOUND, format!("no README for {}", name))
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub tail: Option<usize>,
}

async fn unit_logs(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Path(name): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<impl IntoResponse> {
    let tail = query.tail.unwrap_or(state.log_tail_lines);
    Ok(Json(state.catalog.unit_logs(&principal, &name, tail).await?))
}

#[derive(Debug, Deserialize)]
pub struct StartQuery {
    pub port: Option<u16>,
}

/// Run one lifecycle operation in the background, streaming its output as
/// `log` events and its outcome as a final `result` event.
///
/// The unit is resolved up front so unknown units get a plain error
/// response. The operation waits for the unit's lock before spawning.
async fn stream_operation(
    state: Arc<AppState>,
    principal: AuthenticatedPrincipal,
    name: String,
    operation: Operation,
    port: Option<u16>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    state.catalog.resolve_unit(&name).await?;

    let (sink, rx) = ChannelSink::new();
    tokio::spawn(async move {
        let _guard = state.locks.acquire(&name).await;
        info!(unit = %name, operation = %operation, "Lifecycle operation started");

        let log: Arc<dyn LogSink> = Arc::new(sink.clone());
        let lifecycle = &state.lifecycle;
        let result = match operation {
            Operation::Build => lifecycle.build(&principal, &name, log).await,
            Operation::Start => lifecycle.start(&principal, &name, port, log).await,
            Operation::Stop => lifecycle.stop(&principal, &name, log).await,
            Operation::Restart => lifecycle.restart(&principal, &name, log).await,
            Operation::RemoveImages => lifecycle.remove_images(&principal, &name, log).await,
        };

        let outcome = result.unwrap_or_else(|e| {
            warn!(unit = %name, operation = %operation, error = %e, "Lifecycle operation rejected");
            OperationOutcome::failed(operation, &name, e.to_string())
        });
        sink.done(outcome);
    });

    let events = UnboundedReceiverStream::new(rx).map(|event| match event {
        OperationEvent::Line(line) => Event::default().event("log").json_data(line),
        OperationEvent::Done(outcome) => Event::default().event("result").json_data(outcome),
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn build_unit(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    stream_operation(state, principal, name, Operation::Build, None).await
}

async fn start_unit(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Path(name): Path<String>,
    Query(query): Query<StartQuery>,
) -> ApiResult<impl IntoResponse> {
    stream_operation(state, principal, name, Operation::Start, query.port).await
}

async fn stop_unit(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    stream_operation(state, principal, name, Operation::Stop, None).await
}

async fn restart_unit(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    stream_operation(state, principal, name, Operation::Restart, None).await
}

async fn remove_unit_images(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    stream_operation(state, principal, name, Operation::RemoveImages, None).await
}

async fn analyze_fixes(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let path = state.catalog.resolve_unit(&name).await?;
    Ok(Json(state.patcher.analyze(&principal, &path).await?))
}

async fn apply_fixes(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let path = state.catalog.resolve_unit(&name).await?;
    let _guard = state.locks.acquire(&name).await;
    Ok(Json(state.patcher.fix(&principal, &path).await?))
}

async fn resources(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
) -> impl IntoResponse {
    let snapshot = state.probe.sample(&principal).await;
    state.health_registry.set_healthy(components::PROBE).await;
    Json(snapshot)
}

async fn daemon_info(
    State(state): State<Arc<AppState>>,
    Extension(_principal): Extension<AuthenticatedPrincipal>,
) -> impl IntoResponse {
    let info = state.catalog.gateway().daemon_info().await;
    state.health_registry.record_daemon(&info).await;
    Json(info)
}

#[derive(Debug, Deserialize)]
pub struct ExecRequest {
    pub argv: Vec<String>,
}

async fn exec_in_container(
    State(state): State<Arc<AppState>>,
    Extension(_principal): Extension<AuthenticatedPrincipal>,
    Path(id): Path<String>,
    Json(request): Json<ExecRequest>,
) -> ApiResult<impl IntoResponse> {
    if request.argv.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "argv must not be empty"));
    }
    Ok(Json(state.catalog.gateway().exec(&id, &request.argv).await?))
}

async fn sync_catalog(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<AuthenticatedPrincipal>,
) -> impl IntoResponse {
    Json(state.sync.refresh(&principal).await)
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let fleet = Router::new()
        .route("/api/units", get(list_units))
        .route("/api/units/:name", get(get_unit))
        .route("/api/units/:name/readme", get(get_readme))
        .route("/api/units/:name/logs", get(unit_logs))
        .route("/api/units/:name/build", post(build_unit))
        .route("/api/units/:name/start", post(start_unit))
        .route("/api/units/:name/stop", post(stop_unit))
        .route("/api/units/:name/restart", post(restart_unit))
        .route("/api/units/:name/remove-images", post(remove_unit_images))
        .route("/api/units/:name/fixes", get(analyze_fixes).post(apply_fixes))
        .route("/api/resources", get(resources))
        .route("/api/daemon", get(daemon_info))
        .route("/api/containers/:id/exec", post(exec_in_container))
        .route("/api/catalog/sync", post(sync_catalog))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_principal,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .merge(fleet)
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
