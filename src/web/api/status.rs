use axum::{extract::State, Json};

use crate::scheduler::SchedulerStatus;
use crate::web::api::error::{ApiResult, ErrorResponse};
use crate::web::auth::{require_permission, AppState, AuthenticatedUser};
use crate::web::config::Permission;

#[utoipa::path(
    get,
    path = "/api/status",
    tag = "status",
    security(
        ("api_key" = [])
    ),
    responses(
        (status = 200, description = "Scheduler state, times in Unix seconds", body = SchedulerStatus),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Insufficient permissions", body = ErrorResponse)
    )
)]
pub async fn status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ApiResult<Json<SchedulerStatus>> {
    require_permission(&user, Permission::ViewStatus)?;
    Ok(Json(state.scheduler.status()))
}

pub async fn health() -> &'static str {
    "OK"
}
