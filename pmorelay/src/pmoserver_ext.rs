//! pmoserver integration for the relay
//!
//! Adds the listener endpoint (`GET /stream`) and a JSON status endpoint
//! (`GET /api/relay/status`, documented under `/swagger-ui/relay`) to a
//! `pmoserver::Server`.

use crate::hub::{BroadcastHub, HubState, HubStatus};
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::{OpenApi, ToSchema};

/// Track on air, as reported by the status endpoint
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TrackInfo {
    pub id: String,
    pub title: String,
    pub artist: Option<String>,
    pub permalink_url: String,
    pub duration_ms: Option<u64>,
}

/// Relay status
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RelayStatusResponse {
    /// loading, playing or degraded
    pub state: String,
    pub current_track: Option<TrackInfo>,
    /// Index of the current track in the shuffled playlist
    pub position: usize,
    pub playlist_len: usize,
    /// Bytes of the current track already broadcast
    pub buffer_position: usize,
    pub buffer_len: usize,
    /// Connected listeners
    pub listeners: usize,
    pub chunks_broadcast: u64,
    pub consecutive_failures: usize,
}

impl From<HubStatus> for RelayStatusResponse {
    fn from(status: HubStatus) -> Self {
        Self {
            state: status.state.to_string(),
            current_track: status.current_track.map(|t| TrackInfo {
                id: t.id,
                title: t.title,
                artist: t.artist,
                permalink_url: t.permalink_url,
                duration_ms: t.duration_ms,
            }),
            position: status.position,
            playlist_len: status.playlist_len,
            buffer_position: status.buffer_position,
            buffer_len: status.buffer_len,
            listeners: status.consumers,
            chunks_broadcast: status.chunks_broadcast,
            consecutive_failures: status.consecutive_failures,
        }
    }
}

/// GET /status - Relay state and track on air
#[utoipa::path(
    get,
    path = "/status",
    responses(
        (status = 200, description = "Relay status", body = RelayStatusResponse)
    ),
    tag = "Relay"
)]
async fn get_status(State(hub): State<Arc<BroadcastHub>>) -> Json<RelayStatusResponse> {
    Json(hub.status().into())
}

/// GET /stream - Live audio stream
///
/// The listener joins at the current program position. It is unregistered as
/// soon as the response body is dropped.
async fn stream_relay(State(hub): State<Arc<BroadcastHub>>) -> Result<impl IntoResponse, StatusCode> {
    if hub.state() == HubState::Degraded {
        warn!("Rejecting listener: relay is degraded");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let consumer = hub.subscribe();
    info!("Listener {} connected", consumer.id());

    let body = Body::from_stream(consumer.map(Ok::<Bytes, std::io::Error>));

    let mime = HeaderValue::from_str(&hub.output_format().mime_type)
        .unwrap_or_else(|_| HeaderValue::from_static("audio/mpeg"));
    let name = HeaderValue::from_str(&hub.config().stream_name)
        .unwrap_or_else(|_| HeaderValue::from_static("PMORelay"));

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, mime);
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(HeaderName::from_static("icy-name"), name);
    headers.insert(
        HeaderName::from_static("icy-br"),
        HeaderValue::from(hub.output_format().bitrate_kbps),
    );

    Ok((headers, body))
}

/// OpenAPI documentation of the relay API
#[derive(OpenApi)]
#[openapi(
    info(
        title = "PMORelay API",
        version = "1.0.0",
        description = "Status of the internet radio relay"
    ),
    paths(get_status),
    components(schemas(RelayStatusResponse, TrackInfo)),
    tags(
        (name = "Relay", description = "Broadcast hub")
    )
)]
pub struct RelayApiDoc;

/// Router serving `/status`, nested under `/api/relay`
pub fn create_api_router(hub: Arc<BroadcastHub>) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .with_state(hub)
}

/// Router serving the audio stream at `/stream`
pub fn create_stream_router(hub: Arc<BroadcastHub>) -> Router {
    Router::new()
        .route("/stream", get(stream_relay))
        .with_state(hub)
}

/// Extension trait for pmoserver::Server
pub trait RelayServerExt {
    /// Register the relay routes
    ///
    /// # Routes
    ///
    /// - `/stream`: MP3 stream
    /// - `/api/relay/status`: JSON status
    /// - Swagger: `/swagger-ui/relay`
    async fn init_relay(&mut self, hub: Arc<BroadcastHub>);
}

impl RelayServerExt for pmoserver::Server {
    async fn init_relay(&mut self, hub: Arc<BroadcastHub>) {
        self.add_router("/", create_stream_router(hub.clone())).await;
        self.add_openapi(create_api_router(hub), RelayApiDoc::openapi(), "relay")
            .await;
    }
}
