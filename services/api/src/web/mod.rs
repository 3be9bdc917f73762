pub mod admin;
pub mod auth;
pub mod generate;
pub mod middleware;
pub mod rest;
pub mod state;

use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;

pub use middleware::{require_admin, require_auth};
pub use rest::ApiDoc;
pub use state::AppState;

/// Builds the API router: public auth routes, session routes and admin routes.
///
/// CORS and the Swagger UI are layered on by the server binary.
pub fn router(app_state: Arc<AppState>) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/logout", post(auth::logout_handler));

    // Session routes
    let protected_routes = Router::new()
        .route("/history", get(rest::list_history_handler))
        .route("/history/active", get(rest::active_item_handler))
        .route("/history/trash", get(rest::list_trash_handler))
        .route("/history/{id}", delete(rest::delete_item_handler))
        .route("/history/{id}/trash", post(rest::move_to_trash_handler))
        .route("/history/{id}/restore", post(rest::restore_handler))
        .route("/history/{id}/export", get(rest::export_item_handler))
        .route(
            "/history/{id}/custom-points",
            post(rest::add_custom_point_handler).delete(rest::remove_custom_point_handler),
        )
        .route(
            "/history/{id}/selected-points",
            post(rest::toggle_selected_point_handler),
        )
        .route("/history/{id}/three-views", post(generate::three_view_handler))
        .route("/history/{id}/interactions", post(generate::interaction_handler))
        .route(
            "/history/{id}/selling-points",
            post(generate::selling_points_handler),
        )
        .route("/history/{id}/script", post(generate::script_handler))
        .route("/products", post(generate::analyze_product_handler))
        .route("/trash", delete(rest::empty_trash_handler))
        .route("/selection", get(rest::get_selection_handler))
        .route("/selection/active", put(rest::set_active_item_handler))
        .route("/selection/assets", post(rest::toggle_asset_handler))
        .route("/sync/status", get(rest::sync_status_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    let admin_routes = Router::new()
        .route(
            "/admin/users",
            get(admin::list_users_handler).post(admin::add_user_handler),
        )
        .route("/admin/users/{username}", delete(admin::remove_user_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_admin,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(admin_routes)
        .with_state(app_state)
}
