use axum::{extract::State, Json};

use crate::scheduler::LiveVisibility;
use crate::web::auth::AppState;

#[utoipa::path(
    get,
    path = "/api/visibility/latest",
    tag = "visibility",
    responses(
        (status = 200, description = "Most recent visibility computation", body = LiveVisibility)
    )
)]
pub async fn latest(State(state): State<AppState>) -> Json<LiveVisibility> {
    Json(state.scheduler.latest_visibility().as_ref().clone())
}
