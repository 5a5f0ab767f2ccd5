use axum::routing::get;
use common::StorageConfig;
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

use crate::handlers;
use crate::state::AppState;

pub fn routes(storage: &StorageConfig) -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest("/files", file_routes(storage))
}

fn file_routes(storage: &StorageConfig) -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(handlers::files::upload_file))
        .routes(routes!(
            handlers::files::get_file,
            handlers::files::delete_file
        ))
        .routes(routes!(handlers::files::download_content))
        // Catch-all segments are registered directly; the operation is
        // documented through `ApiDoc`.
        .route(
            "/{id}/stream/{*path}",
            get(handlers::files::stream_artifact),
        )
        .layer(handlers::files::upload_body_limit(storage.max_request_size()))
}
