use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, Http, HttpAuthScheme, SecurityScheme},
    Modify, OpenApi,
};

use super::api::error::{ErrorResponse, RateLimitedResponse};
use super::api::snapshots::ForceSnapshotRequest;

#[derive(OpenApi)]
#[openapi(
    paths(
        super::api::visibility::latest,
        super::api::snapshots::list_snapshots,
        super::api::snapshots::get_snapshot,
        super::api::snapshots::force_snapshot,
        super::api::status::status,
    ),
    components(
        schemas(
            ErrorResponse,
            RateLimitedResponse,
            ForceSnapshotRequest,
            crate::scheduler::LiveVisibility,
            crate::scheduler::SchedulerStatus,
            crate::scheduler::ForceSnapshotAccepted,
            crate::snapshot::Snapshot,
            crate::snapshot::SnapshotSummary,
            crate::visibility::VisibilityReport,
            crate::visibility::VisibleObject,
            crate::visibility::ObjectKind,
            crate::visibility::EcefPosition,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "Sky Monitor API",
        description = "Satellites and aircraft visible above the observatory horizon",
        version = "0.1.0"
    ),
    tags(
        (name = "visibility", description = "Live visibility"),
        (name = "snapshots", description = "Stored snapshots"),
        (name = "status", description = "Scheduler status")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "api_key",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
            components.add_security_scheme(
                "api_token",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-API-Token"))),
            );
        }
    }
}
