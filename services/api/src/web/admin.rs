//! services/api/src/web/admin.rs
//!
//! Account administration. Guarded by `require_admin`.

use crate::web::{rest::port_error, state::AppState};
use asset_history_core::Account;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
pub struct AddUserRequest {
    pub username: String,
    pub password: String,
}

/// List the authorized accounts.
#[utoipa::path(
    get,
    path = "/admin/users",
    params(("x-admin-token" = String, Header, description = "Administrator token")),
    responses(
        (status = 200, description = "Account usernames"),
        (status = 403, description = "Missing or wrong admin token")
    )
)]
pub async fn list_users_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Account>>, (StatusCode, String)> {
    state
        .accounts
        .list_accounts()
        .await
        .map(Json)
        .map_err(|e| port_error("Failed to list accounts", e))
}

/// Authorize an account, or reset the password of an existing one.
#[utoipa::path(
    post,
    path = "/admin/users",
    params(("x-admin-token" = String, Header, description = "Administrator token")),
    request_body = AddUserRequest,
    responses(
        (status = 204, description = "Account saved"),
        (status = 400, description = "Empty username or password"),
        (status = 403, description = "Missing or wrong admin token")
    )
)]
pub async fn add_user_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddUserRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .accounts
        .add_account(&req.username, &req.password)
        .await
        .map_err(|e| port_error("Failed to save account", e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Revoke an account. Its history partition is kept.
#[utoipa::path(
    delete,
    path = "/admin/users/{username}",
    params(
        ("username" = String, Path, description = "Account to remove"),
        ("x-admin-token" = String, Header, description = "Administrator token")
    ),
    responses(
        (status = 204, description = "Account removed"),
        (status = 404, description = "Account not found"),
        (status = 403, description = "Missing or wrong admin token")
    )
)]
pub async fn remove_user_handler(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .accounts
        .remove_account(&username)
        .await
        .map_err(|e| port_error("Failed to remove account", e))?;
    Ok(StatusCode::NO_CONTENT)
}
