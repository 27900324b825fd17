use anchorwatch_core::{
    geojson,
    settings::{clamp_inner_radius_m, clamp_sector_deg, wrap_heading_deg},
    trace::RENDER_LIMIT,
    watch::DEFAULT_MUTE_MS,
    AnchorConfig, SectorConfig, TraceBuffer, TraceEvent, WatchError,
};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
};
use thiserror::Error;
use tokio::{net::TcpListener, sync::broadcast};
use tokio_graceful_shutdown::SubsystemHandle;

use anchorwatch_server::{
    now_ms,
    trace::{TraceError, TracePipeline},
    Session, StatusApi,
};

const STATUS_URI: &str = "/v1/api/status";
const ANCHOR_URI: &str = "/v1/api/anchor";
const ARM_URI: &str = "/v1/api/arm";
const DISARM_URI: &str = "/v1/api/disarm";
const MUTE_URI: &str = "/v1/api/mute";
const LOCATION_URI: &str = "/v1/api/location";
const SETTINGS_URI: &str = "/v1/api/settings";
const FOREGROUND_URI: &str = "/v1/api/foreground";
const ALERTS_URI: &str = "/v1/api/alerts";
// Trace
const TRACE_URI: &str = "/v1/api/trace";
const TRACE_LIVE_URI: &str = "/v1/api/trace/live";
const TRACE_SNAPSHOTS_URI: &str = "/v1/api/trace/snapshots";
// Map layers
const ZONE_GEOJSON_URI: &str = "/v1/api/zone.geojson";
const TRACE_GEOJSON_URI: &str = "/v1/api/trace.geojson";
const POSITION_GEOJSON_URI: &str = "/v1/api/position.geojson";

/// Upper bound for `GET trace?limit=`
const MAX_TRACE_LIMIT: usize = 50_000;

#[derive(Error, Debug)]
pub enum WebError {
    #[error("Socket operation failed")]
    Io(#[from] io::Error),
}

#[derive(Clone)]
pub struct Web {
    session: Session,
    shutdown_tx: broadcast::Sender<()>,
}

impl Web {
    pub fn new(session: Session) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Web {
            session,
            shutdown_tx,
        }
    }

    fn router(self) -> Router {
        Router::new()
            .route(STATUS_URI, get(get_status))
            .route(ANCHOR_URI, put(set_anchor).delete(lift_anchor))
            .route(ARM_URI, post(arm))
            .route(DISARM_URI, post(disarm))
            .route(MUTE_URI, post(mute))
            .route(LOCATION_URI, post(request_location))
            .route(SETTINGS_URI, put(set_settings))
            .route(FOREGROUND_URI, put(set_foreground))
            .route(ALERTS_URI, get(alerts_handler))
            .route(TRACE_URI, get(get_trace))
            .route(TRACE_LIVE_URI, get(trace_live_handler))
            .route(TRACE_SNAPSHOTS_URI, get(trace_snapshots_handler))
            .route(ZONE_GEOJSON_URI, get(get_zone_geojson))
            .route(TRACE_GEOJSON_URI, get(get_trace_geojson))
            .route(POSITION_GEOJSON_URI, get(get_position_geojson))
            .layer(middleware::from_fn(no_cache_middleware))
            .with_state(self)
    }

    pub async fn run(self, subsys: SubsystemHandle) -> Result<(), WebError> {
        let port = self.session.read().args.port;
        let listener =
            TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port))
                .await
                .map_err(WebError::Io)?;

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let shutdown_tx = self.shutdown_tx.clone(); // self is consumed by router()
        let app = self.router();

        log::info!("Starting HTTP web server on port {}", port);

        tokio::select! { biased;
            _ = subsys.on_shutdown_requested() => {
                let _ = shutdown_tx.send(());
            },
            r = axum::serve(listener, app)
                    .with_graceful_shutdown(
                        async move {
                            _ = shutdown_rx.recv().await;
                        }
                    ) => {
                return r.map_err(WebError::Io);
            }
        }
        Ok(())
    }
}

/// Middleware to add no-cache headers to API responses
async fn no_cache_middleware(request: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    response
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Error, Debug)]
enum ApiError {
    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error(transparent)]
    Trace(#[from] TraceError),

    #[error("{0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Watch(WatchError::NoAnchor)
            | ApiError::Watch(WatchError::NotArmed)
            | ApiError::Watch(WatchError::NotAlarming)
            | ApiError::Watch(WatchError::OutsideZone { .. }) => StatusCode::CONFLICT,
            ApiError::Watch(WatchError::InvalidAnchor { .. })
            | ApiError::Watch(WatchError::InvalidFix { .. })
            | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Watch(WatchError::Location(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Trace(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        debug!("Request failed with {}: {}", status, self);
        let body = match &self {
            ApiError::Watch(WatchError::OutsideZone { distance }) => {
                json!({ "error": self.to_string(), "distanceMeters": distance })
            }
            _ => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// Watch control
// =============================================================================

async fn get_status(State(state): State<Web>) -> Json<StatusApi> {
    Json(state.session.status())
}

async fn set_anchor(
    State(state): State<Web>,
    Json(anchor): Json<AnchorConfig>,
) -> ApiResult<Json<StatusApi>> {
    state.session.write().watch.set_anchor(anchor)?;
    Ok(Json(state.session.status()))
}

async fn lift_anchor(State(state): State<Web>) -> Json<StatusApi> {
    state.session.write().watch.lift_anchor();
    Json(state.session.status())
}

#[derive(Deserialize)]
struct ArmParams {
    #[serde(default)]
    force: bool,
}

/// Arm the watch. Refused with 409 while the last known position is outside
/// the zone, unless `force=true`.
async fn arm(
    State(state): State<Web>,
    Query(params): Query<ArmParams>,
) -> ApiResult<Json<StatusApi>> {
    state.session.write().watch.arm_checked(params.force)?;
    Ok(Json(state.session.status()))
}

async fn disarm(State(state): State<Web>) -> Json<StatusApi> {
    state.session.write().watch.disarm();
    Json(state.session.status())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MuteParams {
    duration_ms: Option<i64>,
}

async fn mute(
    State(state): State<Web>,
    Query(params): Query<MuteParams>,
) -> ApiResult<Json<StatusApi>> {
    let duration_ms = params.duration_ms.unwrap_or(DEFAULT_MUTE_MS);
    if duration_ms <= 0 {
        return Err(ApiError::BadRequest(format!(
            "durationMs must be positive, got {}",
            duration_ms
        )));
    }
    state.session.write().watch.mute(now_ms(), duration_ms)?;
    Ok(Json(state.session.status()))
}

/// Retry the location request, e.g. after fixing socket permissions
async fn request_location(State(state): State<Web>) -> ApiResult<Json<StatusApi>> {
    state.session.write().watch.request_location()?;
    Ok(Json(state.session.status()))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct SettingsRequest {
    interval_sec: Option<i64>,
    sector_enabled: Option<bool>,
    heading_deg: Option<i64>,
    sector_deg: Option<i64>,
    inner_radius_m: Option<i64>,
}

impl SettingsRequest {
    fn touches_sector(&self) -> bool {
        self.sector_enabled.is_some()
            || self.heading_deg.is_some()
            || self.sector_deg.is_some()
            || self.inner_radius_m.is_some()
    }

    fn merge_sector(&self, current: SectorConfig) -> SectorConfig {
        SectorConfig {
            enabled: self.sector_enabled.unwrap_or(current.enabled),
            heading_deg: self
                .heading_deg
                .map_or(current.heading_deg, |h| wrap_heading_deg(h) as i32),
            sector_width_deg: self
                .sector_deg
                .map_or(current.sector_width_deg, |w| clamp_sector_deg(w) as i32),
            inner_radius_meters: self
                .inner_radius_m
                .map_or(current.inner_radius_meters, |r| clamp_inner_radius_m(r) as f64),
        }
    }
}

async fn set_settings(
    State(state): State<Web>,
    Json(request): Json<SettingsRequest>,
) -> ApiResult<Json<StatusApi>> {
    {
        let mut inner = state.session.write();
        if let Some(sec) = request.interval_sec {
            inner.watch.set_interval_sec(sec)?;
        }
        if request.touches_sector() {
            let sector = request.merge_sector(inner.watch.sector());
            inner.watch.update_sector(sector);
        }
    }
    Ok(Json(state.session.status()))
}

#[derive(Deserialize)]
struct ForegroundRequest {
    foreground: bool,
}

async fn set_foreground(
    State(state): State<Web>,
    Json(request): Json<ForegroundRequest>,
) -> ApiResult<Json<StatusApi>> {
    state.session.write().watch.set_foreground(request.foreground)?;
    Ok(Json(state.session.status()))
}

// =============================================================================
// Trace
// =============================================================================

#[derive(Deserialize)]
struct TraceParams {
    limit: Option<usize>,
}

impl TraceParams {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(RENDER_LIMIT).clamp(1, MAX_TRACE_LIMIT)
    }
}

/// Latest stored points, newest first
async fn get_trace(
    State(state): State<Web>,
    Query(params): Query<TraceParams>,
) -> ApiResult<Response> {
    let points = state.session.trace.latest(params.limit()).await?;
    Ok(Json(points).into_response())
}

async fn get_zone_geojson(State(state): State<Web>) -> Json<serde_json::Value> {
    let zone = state.session.read().watch.zone();
    Json(geojson::zone_collection(zone.as_ref()))
}

async fn get_trace_geojson(State(state): State<Web>) -> ApiResult<Json<serde_json::Value>> {
    let mut buffer = TraceBuffer::default();
    buffer.load(&state.session.trace.latest(RENDER_LIMIT).await?);
    Ok(Json(geojson::trace_line(&buffer.coordinates())))
}

async fn get_position_geojson(State(state): State<Web>) -> ApiResult<Json<serde_json::Value>> {
    let latest = state.session.trace.latest(1).await?;
    Ok(Json(match latest.first() {
        Some(p) => geojson::me_point(p.lat, p.lon),
        None => geojson::empty_collection(),
    }))
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum LiveMessage<'a> {
    Snapshot {
        points: Vec<&'a anchorwatch_core::LivePoint>,
    },
}

async fn trace_live_handler(State(state): State<Web>, ws: WebSocketUpgrade) -> Response {
    let shutdown_rx = state.shutdown_tx.subscribe();
    let trace = state.session.trace.clone();
    ws.on_upgrade(move |socket| trace_live_stream(socket, trace, shutdown_rx))
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, value: &T) -> Result<(), ()> {
    let message = match serde_json::to_string(value) {
        Ok(message) => message,
        Err(e) => {
            warn!("Cannot serialize websocket message: {}", e);
            return Err(());
        }
    };
    trace!("Sending {}", message);
    socket.send(Message::Text(message.into())).await.map_err(|e| {
        debug!("send to websocket client: {e}");
    })
}

/// Pull the latest points into `buffer` and send them as one snapshot
async fn send_snapshot(
    socket: &mut WebSocket,
    trace: &TracePipeline,
    buffer: &mut TraceBuffer,
) -> Result<(), ()> {
    match trace.latest(RENDER_LIMIT).await {
        Ok(latest) => buffer.load(&latest),
        Err(e) => {
            warn!("Trace snapshot failed: {}", e);
            return Err(());
        }
    }
    let message = LiveMessage::Snapshot {
        points: buffer.points().collect(),
    };
    send_json(socket, &message).await
}

/// Snapshot, then every live point newer than it (one task per connection)
async fn trace_live_stream(
    mut socket: WebSocket,
    trace: TracePipeline,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    // Subscribe before the pull so nothing falls in between
    let mut live_rx = trace.subscribe();
    let mut buffer = TraceBuffer::default();

    if send_snapshot(&mut socket, &trace, &mut buffer).await.is_err() {
        return;
    }
    debug!("Started /trace/live websocket with {} points", buffer.len());

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Shutdown of /trace/live websocket");
                break;
            },
            r = live_rx.recv() => {
                match r {
                    Ok(event) => {
                        let forward = buffer.apply(&event) || event == TraceEvent::Cleared;
                        if forward && send_json(&mut socket, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("Live trace subscriber lagged, skipped {} points", n);
                        if send_snapshot(&mut socket, &trace, &mut buffer).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            },
            r = socket.recv() => {
                match r {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Trace websocket closed");
                        break;
                    }
                    Some(Ok(message)) => {
                        debug!("Dropping unexpected message {:?}", message);
                    }
                    Some(Err(e)) => {
                        debug!("Error reading websocket: {}", e);
                        break;
                    }
                }
            }
        }
    }
}

async fn trace_snapshots_handler(
    State(state): State<Web>,
    Query(params): Query<TraceParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let shutdown_rx = state.shutdown_tx.subscribe();
    let trace = state.session.trace.clone();
    let limit = params.limit();
    ws.on_upgrade(move |socket| trace_snapshots_stream(socket, trace, limit, shutdown_rx))
}

/// One JSON array of the latest points per store change
async fn trace_snapshots_stream(
    mut socket: WebSocket,
    trace: TracePipeline,
    limit: usize,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut snapshots = trace.db().subscribe_latest(limit);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            r = snapshots.changed() => {
                if r.is_err() {
                    break;
                }
                let points = snapshots.borrow_and_update().clone();
                if send_json(&mut socket, &points).await.is_err() {
                    break;
                }
            },
            r = socket.recv() => {
                if !matches!(r, Some(Ok(_))) || matches!(r, Some(Ok(Message::Close(_)))) {
                    break;
                }
            }
        }
    }
    debug!("Trace snapshot websocket ended");
}

async fn alerts_handler(State(state): State<Web>, ws: WebSocketUpgrade) -> Response {
    let shutdown_rx = state.shutdown_tx.subscribe();
    let session = state.session.clone();
    ws.on_upgrade(move |socket| alerts_stream(socket, session, shutdown_rx))
}

/// Current alert state, then every change
async fn alerts_stream(
    mut socket: WebSocket,
    session: Session,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut alerts_rx = session.alerts.subscribe();
    if send_json(&mut socket, &session.alerts.snapshot()).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            r = alerts_rx.recv() => {
                let snapshot = match r {
                    Ok(snapshot) => snapshot,
                    Err(broadcast::error::RecvError::Lagged(_)) => session.alerts.snapshot(),
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if send_json(&mut socket, &snapshot).await.is_err() {
                    break;
                }
            },
            r = socket.recv() => {
                if !matches!(r, Some(Ok(_))) || matches!(r, Some(Ok(Message::Close(_)))) {
                    break;
                }
            }
        }
    }
}
