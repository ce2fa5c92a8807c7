//! Surface HTTP du portail de streaming.
//!
//! Une seule route générique : tout chemin sous la racine du portail est
//! soumis à la sélection de plugin, et la réponse est une redirection,
//! un flux proxifié, ou un statut d'échec sans corps.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures::stream;
use tracing::{debug, warn};

use crate::proxy::{self, READ_CHUNK};
use crate::resolver::{StreamPlan, StreamResolver, TRACK_ID_PARAM};

/// Construit le routeur du portail de streaming.
pub fn streaming_router(resolver: Arc<StreamResolver>) -> Router {
    Router::new()
        .route("/{*path}", get(handle_stream))
        .with_state(resolver)
}

async fn handle_stream(
    State(resolver): State<Arc<StreamResolver>>,
    Path(path): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let path = format!("/{path}");
    let track_id = params.get(TRACK_ID_PARAM).map(String::as_str);

    match resolver.plan_request(&path, track_id).await {
        Ok(StreamPlan::Redirect(url)) => redirect_to(&url),
        Ok(StreamPlan::Proxy { media_url, kbps }) => proxy_stream(&media_url, kbps, &headers).await,
        Err(err) => {
            warn!(path = %path, error = %err, "Streaming request failed");
            err.status().into_response()
        }
    }
}

/// 302 avec l'URL résolue, telle quelle, dans `Location`.
fn redirect_to(url: &str) -> Response {
    debug!(url = %url, "Redirecting to resolved media URL");
    match Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, url)
        .body(Body::empty())
    {
        Ok(response) => response,
        Err(err) => {
            warn!(url = %url, error = %err, "Resolved URL is not a valid Location header");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

/// Ouvre l'URL résolue et sert les octets, avec gestion d'un éventuel
/// en-tête `Range: bytes=N-` traduit en seek avant la première lecture.
async fn proxy_stream(media_url: &str, kbps: Option<u32>, headers: &HeaderMap) -> Response {
    let mut stream = match proxy::open_media(media_url, kbps).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(url = %media_url, error = %err, "Proxy open failed");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };
    let total = stream.length();

    let range_offset = range_start(headers);
    if let Some(offset) = range_offset {
        if let Err(err) = stream.seek(SeekFrom::Start(offset)).await {
            warn!(offset = %offset, error = %err, "Range seek failed");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    }

    let mut builder = Response::builder();
    builder = match (range_offset, total) {
        (Some(offset), Some(total)) => builder
            .status(StatusCode::PARTIAL_CONTENT)
            .header(
                header::CONTENT_RANGE,
                format!("bytes {offset}-{}/{total}", total.saturating_sub(1)),
            )
            .header(header::CONTENT_LENGTH, total.saturating_sub(offset)),
        (Some(_), None) => builder.status(StatusCode::PARTIAL_CONTENT),
        (None, Some(total)) => builder
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, total),
        (None, None) => builder.status(StatusCode::OK),
    };

    let body = Body::from_stream(stream::unfold((stream, false), |(mut stream, done)| {
        async move {
            if done {
                return None;
            }
            match stream.read(READ_CHUNK).await {
                Ok(chunk) if chunk.is_empty() => {
                    stream.close().await;
                    None
                }
                Ok(chunk) => Some((Ok(chunk), (stream, false))),
                Err(err) => Some((Err(std::io::Error::other(err.to_string())), (stream, true))),
            }
        }
    }));

    match builder.body(body) {
        Ok(response) => response,
        Err(err) => {
            warn!(error = %err, "Proxy response assembly failed");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

/// Extrait l'offset de départ d'un `Range: bytes=N-` ou `bytes=N-M`.
/// Les autres formes sont ignorées et le flux part du début.
fn range_start(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(header::RANGE)?.to_str().ok()?;
    let spec = value.strip_prefix("bytes=")?;
    let (start, _) = spec.split_once('-')?;
    start.parse().ok()
}
