//! WHIP/WHEP HTTP endpoints
//!
//! | Method | Path                  | Purpose                          |
//! |--------|-----------------------|----------------------------------|
//! | POST   | `/whip`               | Broadcaster offer                |
//! | DELETE | `/whip`               | Broadcaster stops                |
//! | POST   | `/whep`               | Viewer offer                     |
//! | GET    | `/whep/sse/{id}`      | Layer list as server-sent events |
//! | POST   | `/whep/layer/{id}`    | Switch a viewer's layer          |
//! | GET    | `/status`             | Keys of live streams             |
//! | GET    | `/status/{key}`       | Counters for one stream          |

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, LINK, LOCATION};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::{Error, Result};
use crate::registry::RegistryError;
use crate::session::UNKNOWN_CODEC;

use super::handler::RelayHandler;
use super::service::RelayService;

const SDP_CONTENT_TYPE: &str = "application/sdp";
const SSE_REL: &str = r#"rel="urn:ietf:params:whep:ext:core:server-sent-events"; events="layers""#;
const LAYER_REL: &str = r#"rel="urn:ietf:params:whep:ext:core:layer""#;

/// Entry of the `/status` response
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamStatus {
    #[serde(rename = "streamKey")]
    pub stream_key: String,
}

/// Body of the `/status/{key}` response
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StreamDetail {
    pub stream_key: String,
    pub viewers: usize,
    pub uptime_secs: u64,
    /// Inbound video bitrate across all layers, bits per second
    pub bitrate: u64,
    pub has_video: bool,
    pub video_codec: String,
    pub layers: Vec<LayerDetail>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LayerDetail {
    pub encoding_id: String,
    pub packets: u64,
    pub bitrate: u64,
}

/// Body of a layer switch request
#[derive(Debug, Deserialize)]
pub struct LayerRequest {
    #[serde(rename = "mediaId", default)]
    pub media_id: String,
    #[serde(rename = "encodingId")]
    pub encoding_id: String,
}

/// Build the signaling router
pub fn router<H: RelayHandler>(service: Arc<RelayService<H>>) -> Router {
    Router::new()
        .route("/whip", post(whip_offer::<H>).delete(whip_delete::<H>))
        .route("/whep", post(whep_offer::<H>))
        .route("/whep/sse/:session_id", get(whep_layers::<H>))
        .route("/whep/layer/:session_id", post(whep_select_layer::<H>))
        .route("/status", get(status::<H>))
        .route("/status/:stream_key", get(stream_status::<H>))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = if self.is_not_found() {
            StatusCode::NOT_FOUND
        } else if matches!(self, Error::Io(_)) {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::BAD_REQUEST
        };

        tracing::warn!(status = %status, error = %self, "Request failed");
        (status, self.to_string()).into_response()
    }
}

/// Stream key from a WHIP `Authorization: Bearer <key>` header
fn bearer_key(headers: &HeaderMap) -> Result<String> {
    let key = authorization(headers)
        .strip_prefix("Bearer ")
        .unwrap_or_default()
        .trim();
    if key.is_empty() {
        return Err(Error::MissingAuthorization);
    }
    Ok(key.to_string())
}

/// Stream key from a WHEP `Authorization` header, with or without `Bearer `
fn viewer_key(headers: &HeaderMap) -> Result<String> {
    let value = authorization(headers);
    let key = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    if key.is_empty() {
        return Err(Error::MissingAuthorization);
    }
    Ok(key.to_string())
}

fn authorization(headers: &HeaderMap) -> &str {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| Error::InvalidRequest(e.to_string()))
}

async fn whip_offer<H: RelayHandler>(
    State(service): State<Arc<RelayService<H>>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    offer: String,
) -> Result<Response> {
    let stream_key = bearer_key(&headers)?;
    let remote_addr = connect_info.map(|ConnectInfo(addr)| addr);

    let answer = service.ingest(&offer, &stream_key, remote_addr).await?;

    Ok((
        StatusCode::CREATED,
        [
            (LOCATION, HeaderValue::from_static("/whip")),
            (CONTENT_TYPE, HeaderValue::from_static(SDP_CONTENT_TYPE)),
        ],
        answer,
    )
        .into_response())
}

async fn whip_delete<H: RelayHandler>(
    State(service): State<Arc<RelayService<H>>>,
    headers: HeaderMap,
) -> Result<StatusCode> {
    let stream_key = bearer_key(&headers)?;
    if !service.validator().validate(&stream_key) {
        return Err(Error::Unauthorized);
    }

    service.disconnect(&stream_key).await;
    Ok(StatusCode::OK)
}

async fn whep_offer<H: RelayHandler>(
    State(service): State<Arc<RelayService<H>>>,
    headers: HeaderMap,
    offer: String,
) -> Result<Response> {
    let stream_key = viewer_key(&headers)?;

    let (answer, session_id) = service.create_session(&offer, &stream_key).await?;

    let mut response = (
        StatusCode::CREATED,
        [
            (LOCATION, HeaderValue::from_static("/whep")),
            (CONTENT_TYPE, HeaderValue::from_static(SDP_CONTENT_TYPE)),
        ],
        answer,
    )
        .into_response();

    let links = response.headers_mut();
    links.append(
        LINK,
        header_value(&format!("</whep/sse/{session_id}>; {SSE_REL}"))?,
    );
    links.append(
        LINK,
        header_value(&format!("</whep/layer/{session_id}>; {LAYER_REL}"))?,
    );

    Ok(response)
}

/// Layer list in the shape WHEP players expect
fn layers_event_data(layers: &[String]) -> String {
    let layers: Vec<_> = layers
        .iter()
        .map(|layer| serde_json::json!({ "encodingId": layer }))
        .collect();
    serde_json::json!({ "1": { "layers": layers } }).to_string()
}

async fn whep_layers<H: RelayHandler>(
    State(service): State<Arc<RelayService<H>>>,
    Path(session_id): Path<String>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let layers = service.list_layers(&session_id).await?;

    let event = Event::default()
        .event("layers")
        .data(layers_event_data(&layers));

    Ok(Sse::new(stream::iter(vec![Ok(event)])))
}

async fn whep_select_layer<H: RelayHandler>(
    State(service): State<Arc<RelayService<H>>>,
    Path(session_id): Path<String>,
    body: Bytes,
) -> Result<StatusCode> {
    let request: LayerRequest =
        serde_json::from_slice(&body).map_err(|e| Error::InvalidRequest(e.to_string()))?;

    tracing::debug!(
        session_id = %session_id,
        media_id = %request.media_id,
        encoding_id = %request.encoding_id,
        "Layer request"
    );

    service.set_layer(&session_id, &request.encoding_id).await?;
    Ok(StatusCode::OK)
}

async fn status<H: RelayHandler>(
    State(service): State<Arc<RelayService<H>>>,
) -> Json<Vec<StreamStatus>> {
    let statuses = service
        .active_keys()
        .await
        .into_iter()
        .map(|stream_key| StreamStatus { stream_key })
        .collect();
    Json(statuses)
}

async fn stream_status<H: RelayHandler>(
    State(service): State<Arc<RelayService<H>>>,
    Path(stream_key): Path<String>,
) -> Result<Json<StreamDetail>> {
    let stats = service
        .stream_stats(&stream_key)
        .await
        .ok_or_else(|| RegistryError::StreamNotFound(stream_key.clone()))?;
    let broadcaster = service
        .registry()
        .get(&stream_key)
        .await
        .and_then(|stream| stream.broadcaster());

    Ok(Json(StreamDetail {
        bitrate: stats.bitrate(),
        viewers: stats.viewer_count,
        uptime_secs: stats.uptime.as_secs(),
        has_video: broadcaster.as_ref().is_some_and(|info| info.has_video()),
        video_codec: broadcaster
            .map(|info| info.video_codec)
            .unwrap_or_else(|| UNKNOWN_CODEC.to_string()),
        layers: stats
            .layers
            .iter()
            .map(|layer| LayerDetail {
                encoding_id: layer.layer.clone(),
                packets: layer.packets,
                bitrate: layer.bitrate(),
            })
            .collect(),
        stream_key: stats.stream_key,
    }))
}
