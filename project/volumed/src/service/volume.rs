//! HTTP handlers for the volume API.
//!
//! Bodies are decoded by hand from the collected bytes so that malformed
//! JSON is a 400; strategy problems surface separately as 422 from the
//! resolver. Only `error.rs` decides status codes.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::TryStreamExt;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::io;
use tokio_util::io::{ReaderStream, StreamReader};
use uuid::Uuid;

use crate::error::{Result, VolumeError};
use crate::utils::state::AppState;
use crate::volume::strategy;
use crate::volume::{
    Properties, PrivilegedRequest, PropertyRequest, TtlRequest, VolumeRequest,
};

fn decode<T: DeserializeOwned>(body: &Bytes) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|err| VolumeError::BadRequest(format!("failed to decode request: {err}")))
}

pub(crate) async fn create_volume_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response> {
    let request: VolumeRequest = decode(&body)?;

    let handle = match request.handle.as_deref() {
        Some(handle) if !handle.is_empty() => handle.to_string(),
        _ => Uuid::new_v4().to_string(),
    };
    let strategy = strategy::resolve(&request)?;

    let volume = state
        .repository
        .create_volume(
            &handle,
            strategy,
            request.properties.unwrap_or_default(),
            request.ttl_in_seconds.unwrap_or(0),
            request.privileged.unwrap_or(false),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(volume)).into_response())
}

pub(crate) async fn list_volumes_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<Vec<(String, String)>>,
) -> Result<Response> {
    let mut filter = Properties::new();
    for (name, value) in query {
        if name.is_empty() {
            return Err(VolumeError::BadFilter("empty property name".into()));
        }
        if filter.insert(name.clone(), value).is_some() {
            return Err(VolumeError::BadFilter(format!(
                "property {name} given more than once"
            )));
        }
    }

    let volumes = state.repository.list_volumes(&filter).await;
    Ok(Json(volumes).into_response())
}

pub(crate) async fn get_volume_handler(
    State(state): State<Arc<AppState>>,
    Path(handle): Path<String>,
) -> Result<Response> {
    let volume = state.repository.get_volume(&handle).await?;
    Ok(Json(volume).into_response())
}

pub(crate) async fn get_volume_stats_handler(
    State(state): State<Arc<AppState>>,
    Path(handle): Path<String>,
) -> Result<Response> {
    let volume = state.repository.get_volume_stats(&handle).await?;
    Ok(Json(volume).into_response())
}

pub(crate) async fn set_property_handler(
    State(state): State<Arc<AppState>>,
    Path((handle, property)): Path<(String, String)>,
    body: Bytes,
) -> Result<Response> {
    let request: PropertyRequest = decode(&body)?;
    state
        .repository
        .set_property(&handle, &property, &request.value)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub(crate) async fn set_ttl_handler(
    State(state): State<Arc<AppState>>,
    Path(handle): Path<String>,
    body: Bytes,
) -> Result<Response> {
    let request: TtlRequest = decode(&body)?;
    state.repository.set_ttl(&handle, request.value).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub(crate) async fn set_privileged_handler(
    State(state): State<Arc<AppState>>,
    Path(handle): Path<String>,
    body: Bytes,
) -> Result<Response> {
    let request: PrivilegedRequest = decode(&body)?;
    state
        .repository
        .set_privileged(&handle, request.value)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub(crate) async fn stream_in_handler(
    State(state): State<Arc<AppState>>,
    Path(handle): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    request: Request,
) -> Result<Response> {
    let sub_path = params.get("path").cloned().unwrap_or_default();

    let body = request.into_body().into_data_stream().map_err(io::Error::other);
    let reader = StreamReader::new(body);

    state.repository.stream_in(&handle, &sub_path, reader).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub(crate) async fn stream_out_handler(
    State(state): State<Arc<AppState>>,
    Path(handle): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response> {
    let sub_path = params.get("path").cloned().unwrap_or_default();

    let archive = state.repository.stream_out(&handle, &sub_path).await?;

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(Body::from_stream(ReaderStream::new(archive)))
        .map_err(|err| VolumeError::Internal(io::Error::other(err)))?;
    Ok(response)
}

pub(crate) async fn destroy_volume_handler(
    State(state): State<Arc<AppState>>,
    Path(handle): Path<String>,
) -> Result<Response> {
    state.repository.destroy_volume(&handle).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
