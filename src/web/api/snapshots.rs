use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::scheduler::ForceSnapshotAccepted;
use crate::snapshot::{Snapshot, SnapshotSummary};
use crate::web::api::error::{ApiResult, ErrorResponse, RateLimitedResponse};
use crate::web::auth::{require_permission, AppState, AuthenticatedUser};
use crate::web::config::Permission;

#[utoipa::path(
    get,
    path = "/api/snapshots",
    tag = "snapshots",
    responses(
        (status = 200, description = "Stored snapshots, oldest first", body = Vec<SnapshotSummary>)
    )
)]
pub async fn list_snapshots(State(state): State<AppState>) -> ApiResult<Json<Vec<SnapshotSummary>>> {
    Ok(Json(state.scheduler.list_snapshots().await?))
}

#[utoipa::path(
    get,
    path = "/api/snapshots/{id}",
    tag = "snapshots",
    params(
        ("id" = i64, Path, description = "Snapshot ID")
    ),
    responses(
        (status = 200, description = "Snapshot contents", body = Snapshot),
        (status = 404, description = "Snapshot not found", body = ErrorResponse)
    )
)]
pub async fn get_snapshot(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Snapshot>> {
    Ok(Json(state.scheduler.get_snapshot(id).await?))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ForceSnapshotRequest {
    /// Wait for an aircraft fetch first when no aircraft data is loaded.
    #[serde(default = "default_wait_for_aircraft")]
    pub wait_for_aircraft: bool,
}

fn default_wait_for_aircraft() -> bool {
    true
}

#[utoipa::path(
    post,
    path = "/api/snapshots/force",
    tag = "snapshots",
    request_body = ForceSnapshotRequest,
    security(
        ("api_key" = [])
    ),
    responses(
        (status = 200, description = "Snapshot saved", body = ForceSnapshotAccepted),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 403, description = "Insufficient permissions", body = ErrorResponse),
        (status = 429, description = "Cooldown active", body = RateLimitedResponse)
    )
)]
pub async fn force_snapshot(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    request: Option<Json<ForceSnapshotRequest>>,
) -> ApiResult<Json<ForceSnapshotAccepted>> {
    require_permission(&user, Permission::ForceSnapshot)?;

    // no body waits, like an omitted field
    let wait_for_aircraft = request.is_none_or(|Json(r)| r.wait_for_aircraft);
    log::info!(
        "Force snapshot requested by {} (wait_for_aircraft={})",
        user.name,
        wait_for_aircraft
    );

    Ok(Json(
        state.scheduler.force_snapshot(wait_for_aircraft).await?,
    ))
}
