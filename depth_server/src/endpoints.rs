//! Endpoints of HTTP server.
//!
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Query},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use common::protocol::MAX_IMAGE_BYTES;
use serde::Deserialize;

use crate::{inferer::RenderOptions, service::DepthService, status::ModelState};

pub const DEPTH_WIDTH_HEADER: &str = "x-depth-width";
pub const DEPTH_HEIGHT_HEADER: &str = "x-depth-height";

/// Search parameters of the depth endpoint.
#[derive(Debug, Deserialize)]
pub struct DepthParams {
    #[serde(default)]
    fit_input: bool,
}

/// Build the HTTP application around a shared service.
pub fn router(service: Arc<DepthService>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthcheck", get(healthcheck))
        .route("/status", get(status))
        .route("/depth", post(depth))
        .layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES))
        .layer(Extension(service))
}

/// Browser page to upload images or take camera snapshots.
pub async fn index() -> Html<&'static str> {
    Html(include_str!("../resources/index.html"))
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

/// Current state of the depth model.
pub async fn status(Extension(service): Extension<Arc<DepthService>>) -> Json<ModelState> {
    Json(service.status().get())
}

/// Estimate depth of an uploaded image and return it as grayscale PNG.
///
/// The image is taken from the multipart field `image`, or the first field if there is none
/// with that name.
pub async fn depth(
    Extension(service): Extension<Arc<DepthService>>,
    Query(params): Query<DepthParams>,
    mut multipart: Multipart,
) -> Response {
    let mut data = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                let is_image = field.name() == Some("image");
                match field.bytes().await {
                    Ok(bytes) if is_image || data.is_none() => {
                        data = Some(bytes.to_vec());
                        if is_image {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
                }
            }
            Ok(None) => break,
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        }
    }

    let data = match data {
        Some(data) if !data.is_empty() => data,
        _ => return (StatusCode::BAD_REQUEST, "no image uploaded").into_response(),
    };
    log::info!("Received image upload ({} bytes)", data.len());

    let options = RenderOptions {
        fit_input: params.fit_input,
    };
    match service.process(data, options).await {
        Ok(depth_map) => (
            [
                ("content-type", "image/png".to_owned()),
                (DEPTH_WIDTH_HEADER, depth_map.width.to_string()),
                (DEPTH_HEIGHT_HEADER, depth_map.height.to_string()),
            ],
            depth_map.png,
        )
            .into_response(),
        Err(e) => {
            log::warn!("Depth request failed: {e}");
            e.into_response()
        }
    }
}
