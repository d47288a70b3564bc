use crate::state::AppState;
use crate::{api, auth, limits, logging};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "diagnet API",
        description = "Machine telemetry ingestion, queries, and health analysis",
    ),
    tags(
        (name = "Health", description = "Liveness and pipeline counters"),
        (name = "Auth", description = "Token issue and verification"),
        (name = "Data", description = "Reading queries over the time-partitioned store"),
        (name = "Analysis", description = "On-demand machine health assessment")
    ),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(utoipa::openapi::security::Http::new(
                utoipa::openapi::security::HttpAuthScheme::Bearer,
            )),
        );
    }
}

pub fn build_http_app(state: AppState) -> Router {
    let (public_router, public_spec) = api::public_routes().split_for_parts();
    let (auth_router, auth_spec) = auth::auth_routes().split_for_parts();
    let (protected_router, protected_spec) = api::protected_routes().split_for_parts();

    let mut spec = ApiDoc::openapi();
    spec.merge(public_spec);
    spec.merge(auth_spec);
    spec.merge(protected_spec);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    public_router
        .merge(auth_router)
        .merge(protected_router.layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::bearer_auth_middleware,
        )))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            limits::request_deadline,
        ))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", spec))
        .layer(cors)
        .layer(axum::middleware::from_fn(logging::request_logging))
}
