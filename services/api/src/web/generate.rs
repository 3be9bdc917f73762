//! services/api/src/web/generate.rs
//!
//! Handlers that call the generation models and record the results on a history item.

use crate::web::{rest::port_error, state::AppState};
use asset_history_core::{HistoryItem, InteractionRequest, Session};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    Extension,
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
pub struct AnalyzeRequest {
    pub pid: String,
}

#[derive(Deserialize, ToSchema, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct InteractionPayload {
    pub custom_prompt: Option<String>,
    /// Reference picture of a model, as a URL or data URL.
    pub model_image: Option<String>,
}

#[derive(Deserialize, ToSchema, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ScriptPayload {
    pub custom_prompt: Option<String>,
}

/// Analyze a product and start a new history item for it.
///
/// The new item becomes the active item of the session's asset selection.
#[utoipa::path(
    post,
    path = "/products",
    request_body = AnalyzeRequest,
    responses(
        (status = 201, description = "The new history item"),
        (status = 400, description = "Empty product id"),
        (status = 502, description = "Product analysis failed")
    )
)]
pub async fn analyze_product_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<(StatusCode, Json<HistoryItem>), (StatusCode, String)> {
    let item = state
        .workflow
        .analyze_product(&session, &req.pid)
        .await
        .map_err(|e| port_error("Product analysis failed", e))?;
    state.follow_active(session.token(), &item).await;
    Ok((StatusCode::CREATED, Json(item)))
}

/// Generate a three-view product image.
///
/// Every successful generation makes its item the active one, both in the stored
/// history and in the session's asset selection.
#[utoipa::path(
    post,
    path = "/history/{id}/three-views",
    params(("id" = String, Path, description = "History item id")),
    responses(
        (status = 200, description = "The updated item"),
        (status = 404, description = "Item not found or in the trash"),
        (status = 502, description = "Image generation failed")
    )
)]
pub async fn three_view_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> Result<Json<HistoryItem>, (StatusCode, String)> {
    let item = state
        .workflow
        .generate_three_view(&session, &id)
        .await
        .map_err(|e| port_error("Three-view generation failed", e))?;
    state.follow_active(session.token(), &item).await;
    Ok(Json(item))
}

/// Generate a model interaction image.
#[utoipa::path(
    post,
    path = "/history/{id}/interactions",
    params(("id" = String, Path, description = "History item id")),
    request_body = InteractionPayload,
    responses(
        (status = 200, description = "The updated item"),
        (status = 404, description = "Item not found or in the trash"),
        (status = 502, description = "Image generation failed")
    )
)]
pub async fn interaction_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    Json(req): Json<InteractionPayload>,
) -> Result<Json<HistoryItem>, (StatusCode, String)> {
    let request = InteractionRequest {
        custom_prompt: req.custom_prompt,
        model_image: req.model_image,
    };
    let item = state
        .workflow
        .generate_interaction(&session, &id, request)
        .await
        .map_err(|e| port_error("Interaction generation failed", e))?;
    state.follow_active(session.token(), &item).await;
    Ok(Json(item))
}

/// Generate selling points. Replaces the previous AI-derived points.
#[utoipa::path(
    post,
    path = "/history/{id}/selling-points",
    params(("id" = String, Path, description = "History item id")),
    responses(
        (status = 200, description = "The updated item"),
        (status = 404, description = "Item not found or in the trash"),
        (status = 502, description = "Selling point generation failed")
    )
)]
pub async fn selling_points_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> Result<Json<HistoryItem>, (StatusCode, String)> {
    let item = state
        .workflow
        .generate_selling_points(&session, &id)
        .await
        .map_err(|e| port_error("Selling point generation failed", e))?;
    state.follow_active(session.token(), &item).await;
    Ok(Json(item))
}

/// Generate a video script from the selected points and the selected assets.
#[utoipa::path(
    post,
    path = "/history/{id}/script",
    params(("id" = String, Path, description = "History item id")),
    request_body = ScriptPayload,
    responses(
        (status = 200, description = "The updated item"),
        (status = 400, description = "No selling points selected"),
        (status = 404, description = "Item not found or in the trash"),
        (status = 502, description = "Script generation failed")
    )
)]
pub async fn script_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    Json(req): Json<ScriptPayload>,
) -> Result<Json<HistoryItem>, (StatusCode, String)> {
    let selection = state.selection(session.token()).await;
    let item = state
        .workflow
        .generate_script(&session, &id, req.custom_prompt, &selection)
        .await
        .map_err(|e| port_error("Script generation failed", e))?;
    state.follow_active(session.token(), &item).await;
    Ok(Json(item))
}
