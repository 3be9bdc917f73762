//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the history, trash, point and selection endpoints,
//! and the master definition for the OpenAPI specification.

use crate::web::{admin, auth, generate, state::AppState};
use asset_history_core::{HistoryItem, ItemCommand, PortError, Session, SelectionState, SyncStatus};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    Extension,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::{OpenApi, ToSchema};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::login_handler,
        auth::logout_handler,
        list_history_handler,
        active_item_handler,
        list_trash_handler,
        move_to_trash_handler,
        restore_handler,
        delete_item_handler,
        empty_trash_handler,
        export_item_handler,
        add_custom_point_handler,
        remove_custom_point_handler,
        toggle_selected_point_handler,
        get_selection_handler,
        set_active_item_handler,
        toggle_asset_handler,
        sync_status_handler,
        generate::analyze_product_handler,
        generate::three_view_handler,
        generate::interaction_handler,
        generate::selling_points_handler,
        generate::script_handler,
        admin::list_users_handler,
        admin::add_user_handler,
        admin::remove_user_handler,
    ),
    components(
        schemas(
            auth::LoginRequest,
            auth::LoginResponse,
            PointRequest,
            ActiveItemRequest,
            AssetRequest,
            EmptyTrashResponse,
            generate::AnalyzeRequest,
            generate::InteractionPayload,
            generate::ScriptPayload,
            admin::AddUserRequest,
        )
    ),
    tags(
        (name = "Asset History API", description = "Per-user history of generated e-commerce marketing assets.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Error Mapping
//=========================================================================================

/// Maps a port error to the HTTP error tuple returned by every handler.
pub fn port_error(context: &str, e: PortError) -> (StatusCode, String) {
    let status = match &e {
        PortError::NotFound(_) => StatusCode::NOT_FOUND,
        PortError::Unauthorized => StatusCode::UNAUTHORIZED,
        PortError::Conflict(_) => StatusCode::CONFLICT,
        PortError::Invalid(_) => StatusCode::BAD_REQUEST,
        PortError::Generation(_) => StatusCode::BAD_GATEWAY,
        PortError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("{}: {:?}", context, e);
    } else {
        warn!("{}: {}", context, e);
    }
    match e {
        PortError::Unexpected(_) => (status, context.to_string()),
        other => (status, other.to_string()),
    }
}

fn not_found(id: &str) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, format!("History item {} not found", id))
}

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// The history view: live items, newest first, plus what loading had to clean up.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub last_active_id: Option<String>,
    pub items: Vec<HistoryItem>,
    pub skipped: usize,
    pub purged: usize,
    /// Items read from an older record layout, not yet written back.
    pub legacy: usize,
}

#[derive(Deserialize, ToSchema)]
pub struct PointRequest {
    pub point: String,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActiveItemRequest {
    pub item_id: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct AssetRequest {
    pub url: String,
}

#[derive(Serialize, ToSchema)]
pub struct EmptyTrashResponse {
    pub removed: usize,
}

//=========================================================================================
// History Handlers
//=========================================================================================

/// List the live history items, newest first.
#[utoipa::path(
    get,
    path = "/history",
    responses(
        (status = 200, description = "The user's live history"),
        (status = 401, description = "No active session")
    )
)]
pub async fn list_history_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> Result<Json<HistoryResponse>, (StatusCode, String)> {
    let loaded = state
        .store
        .load(&session)
        .await
        .map_err(|e| port_error("Failed to load history", e))?;

    let response = match loaded {
        Some((data, report)) => HistoryResponse {
            last_active_id: data.last_active_id.clone(),
            items: data.active_items().into_iter().cloned().collect(),
            skipped: report.skipped,
            purged: report.purged,
            legacy: report.legacy,
        },
        None => HistoryResponse {
            last_active_id: None,
            items: Vec::new(),
            skipped: 0,
            purged: 0,
            legacy: 0,
        },
    };
    Ok(Json(response))
}

/// The last active item, or `null` if there is none or it is in the trash.
#[utoipa::path(
    get,
    path = "/history/active",
    responses(
        (status = 200, description = "The active item or null"),
        (status = 401, description = "No active session")
    )
)]
pub async fn active_item_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> Result<Json<Option<HistoryItem>>, (StatusCode, String)> {
    let data = state
        .store
        .get_current(&session)
        .await
        .map_err(|e| port_error("Failed to load history", e))?;
    Ok(Json(data.and_then(|d| d.active_item().cloned())))
}

/// List the items in the trash, most recently deleted first.
#[utoipa::path(
    get,
    path = "/history/trash",
    responses(
        (status = 200, description = "Items in the trash"),
        (status = 401, description = "No active session")
    )
)]
pub async fn list_trash_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> Result<Json<Vec<HistoryItem>>, (StatusCode, String)> {
    let data = state
        .store
        .get_current(&session)
        .await
        .map_err(|e| port_error("Failed to load trash", e))?;
    let items = data
        .map(|d| d.trash_items().into_iter().cloned().collect())
        .unwrap_or_default();
    Ok(Json(items))
}

/// Move an item to the trash. Trashing an item that is already there succeeds.
#[utoipa::path(
    post,
    path = "/history/{id}/trash",
    params(("id" = String, Path, description = "History item id")),
    responses(
        (status = 204, description = "Item is in the trash"),
        (status = 404, description = "Item not found")
    )
)]
pub async fn move_to_trash_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    let moved = state
        .store
        .move_to_trash(&session, &id)
        .await
        .map_err(|e| port_error("Failed to move item to trash", e))?;
    if !moved {
        require_state(&state, &session, &id, true).await?;
    }
    release_selection(&state, &session, &id).await;
    Ok(StatusCode::NO_CONTENT)
}

/// Restore an item from the trash. Restoring a live item succeeds.
#[utoipa::path(
    post,
    path = "/history/{id}/restore",
    params(("id" = String, Path, description = "History item id")),
    responses(
        (status = 204, description = "Item is live"),
        (status = 404, description = "Item not found")
    )
)]
pub async fn restore_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    let restored = state
        .store
        .restore(&session, &id)
        .await
        .map_err(|e| port_error("Failed to restore item", e))?;
    if !restored {
        require_state(&state, &session, &id, false).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

/// For a trash or restore that changed nothing: succeeds if the item exists and is
/// already where the request wanted it.
async fn require_state(
    state: &AppState,
    session: &Session,
    id: &str,
    trashed: bool,
) -> Result<(), (StatusCode, String)> {
    let item = state
        .store
        .item(session, id)
        .await
        .map_err(|e| port_error("Failed to look up item", e))?;
    if item.is_trashed() == trashed {
        Ok(())
    } else {
        Err(not_found(id))
    }
}

/// Permanently delete an item, trashed or not.
#[utoipa::path(
    delete,
    path = "/history/{id}",
    params(("id" = String, Path, description = "History item id")),
    responses(
        (status = 204, description = "Item deleted"),
        (status = 404, description = "Item not found")
    )
)]
pub async fn delete_item_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    let deleted = state
        .store
        .permanent_delete(&session, &id)
        .await
        .map_err(|e| port_error("Failed to delete item", e))?;
    if !deleted {
        return Err(not_found(&id));
    }
    release_selection(&state, &session, &id).await;
    Ok(StatusCode::NO_CONTENT)
}

/// Permanently delete everything in the trash.
#[utoipa::path(
    delete,
    path = "/trash",
    responses(
        (status = 200, description = "Trash emptied", body = EmptyTrashResponse)
    )
)]
pub async fn empty_trash_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> Result<Json<EmptyTrashResponse>, (StatusCode, String)> {
    let removed = state
        .store
        .empty_trash(&session)
        .await
        .map_err(|e| port_error("Failed to empty trash", e))?;
    info!(username = session.username(), removed, "Emptied trash");
    Ok(Json(EmptyTrashResponse { removed }))
}

/// Download one item as a JSON file.
#[utoipa::path(
    get,
    path = "/history/{id}/export",
    params(("id" = String, Path, description = "History item id")),
    responses(
        (status = 200, description = "The item as a JSON attachment"),
        (status = 404, description = "Item not found")
    )
)]
pub async fn export_item_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let export = state
        .store
        .export_item(&session, &id)
        .await
        .map_err(|e| port_error("Failed to export item", e))?;

    let disposition = format!("attachment; filename=\"{}\"", export.file_name);
    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        export.json,
    ))
}

//=========================================================================================
// Selling Point Handlers
//=========================================================================================

/// Add a user-authored selling point.
#[utoipa::path(
    post,
    path = "/history/{id}/custom-points",
    params(("id" = String, Path, description = "History item id")),
    request_body = PointRequest,
    responses(
        (status = 200, description = "The updated item"),
        (status = 400, description = "Empty point"),
        (status = 404, description = "Item not found")
    )
)]
pub async fn add_custom_point_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    Json(req): Json<PointRequest>,
) -> Result<Json<HistoryItem>, (StatusCode, String)> {
    apply(&state, &session, &id, ItemCommand::AddCustomPoint(req.point)).await
}

/// Remove a user-authored selling point.
#[utoipa::path(
    delete,
    path = "/history/{id}/custom-points",
    params(("id" = String, Path, description = "History item id")),
    request_body = PointRequest,
    responses(
        (status = 200, description = "The updated item"),
        (status = 404, description = "Item not found")
    )
)]
pub async fn remove_custom_point_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    Json(req): Json<PointRequest>,
) -> Result<Json<HistoryItem>, (StatusCode, String)> {
    apply(&state, &session, &id, ItemCommand::RemoveCustomPoint(req.point)).await
}

/// Toggle whether a point is selected for script generation.
#[utoipa::path(
    post,
    path = "/history/{id}/selected-points",
    params(("id" = String, Path, description = "History item id")),
    request_body = PointRequest,
    responses(
        (status = 200, description = "The updated item"),
        (status = 400, description = "Not one of the item's points"),
        (status = 404, description = "Item not found")
    )
)]
pub async fn toggle_selected_point_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    Json(req): Json<PointRequest>,
) -> Result<Json<HistoryItem>, (StatusCode, String)> {
    apply(&state, &session, &id, ItemCommand::TogglePoint(req.point)).await
}

async fn apply(
    state: &AppState,
    session: &Session,
    id: &str,
    command: ItemCommand,
) -> Result<Json<HistoryItem>, (StatusCode, String)> {
    let item = state
        .store
        .apply(session, id, command)
        .await
        .map_err(|e| port_error("Failed to update item", e))?;
    state.follow_active(session.token(), &item).await;
    Ok(Json(item))
}

//=========================================================================================
// Asset Selection Handlers
//=========================================================================================

/// The session's current asset selection.
#[utoipa::path(
    get,
    path = "/selection",
    responses((status = 200, description = "The active item and its selected assets"))
)]
pub async fn get_selection_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> Json<SelectionState> {
    Json(state.selection(session.token()).await)
}

/// Switch the active item. Switching to another item clears the asset selection.
#[utoipa::path(
    put,
    path = "/selection/active",
    request_body = ActiveItemRequest,
    responses(
        (status = 200, description = "The updated selection"),
        (status = 404, description = "Item not found")
    )
)]
pub async fn set_active_item_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Json(req): Json<ActiveItemRequest>,
) -> Result<Json<SelectionState>, (StatusCode, String)> {
    if let Some(id) = &req.item_id {
        let item = state
            .store
            .item(&session, id)
            .await
            .map_err(|e| port_error("Failed to select item", e))?;
        if item.is_trashed() {
            return Err(not_found(id));
        }
    }
    let selection = state
        .update_selection(session.token(), |s| s.set_active(req.item_id.as_deref()))
        .await;
    Ok(Json(selection))
}

/// Toggle an asset URL in the selection of the active item.
#[utoipa::path(
    post,
    path = "/selection/assets",
    request_body = AssetRequest,
    responses(
        (status = 200, description = "The updated selection"),
        (status = 409, description = "No active item")
    )
)]
pub async fn toggle_asset_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Json(req): Json<AssetRequest>,
) -> Result<Json<SelectionState>, (StatusCode, String)> {
    if state.selection(session.token()).await.active_item().is_none() {
        return Err((StatusCode::CONFLICT, "No active item to select assets for".to_string()));
    }
    let selection = state
        .update_selection(session.token(), |s| {
            s.toggle(&req.url);
        })
        .await;
    Ok(Json(selection))
}

/// Clears the selection if it belonged to an item that just left the live history.
async fn release_selection(state: &AppState, session: &Session, id: &str) {
    state
        .update_selection(session.token(), |s| {
            if s.active_item() == Some(id) {
                s.set_active(None);
            }
        })
        .await;
}

//=========================================================================================
// Sync Status
//=========================================================================================

/// Replication state of the user's history to the remote mirror.
#[utoipa::path(
    get,
    path = "/sync/status",
    responses((status = 200, description = "The last known sync state"))
)]
pub async fn sync_status_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> Json<SyncStatus> {
    Json(state.sync.status(session.username()).await)
}
