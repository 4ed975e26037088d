pub mod auth;
pub mod config;
pub mod dlq;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod health;
pub mod log_parser;
pub mod metrics;
pub mod models;
pub mod routes;
pub mod schemas;
pub mod state;

use anyhow::Context;
use axum::Router;
use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_scalar::{Scalar, Servable as ScalarServable};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::ApiSettings;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Cotizador API",
        version = "1.0.0",
        description = "Orquestador de bots de cotización: encola tareas en MQTT \
                       para ser procesadas por workers"
    ),
    servers((url = "/api", description = "API autenticada")),
    tags(
        (name = "Cotizaciones", description = "Encolado de tareas de cotización"),
        (name = "DLQ", description = "Inspección y reintento de mensajes fallidos"),
        (name = "Health", description = "Estado del servicio"),
        (name = "Metrics", description = "Métricas agregadas del sistema"),
    ),
    paths(
        handlers::cotizaciones::crear_cotizacion,
        handlers::cotizaciones::crear_cotizaciones_batch,
        handlers::dlq::list_dlq,
        handlers::dlq::list_dlq_by_vendor,
        handlers::dlq::retry_dlq,
        handlers::health::health_check,
        handlers::metrics::get_metrics,
    ),
    modifiers(&SecurityAddon),
)]
struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_default();
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

/// Build the application router with CORS and API docs.
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let cors = cors_layer(&state.config.api)?;
    let api = ApiDoc::openapi();

    Ok(Router::new()
        .merge(routes::open_routes())
        .nest("/api", routes::api_routes())
        .with_state(state)
        .layer(cors)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api.clone()))
        .merge(Scalar::with_url("/scalar", api)))
}

fn cors_layer(api: &ApiSettings) -> anyhow::Result<CorsLayer> {
    let origin_wildcard = api.cors_origins.iter().any(|o| o == "*");
    let header_wildcard = api.cors_headers.iter().any(|h| h == "*");

    let mut cors = CorsLayer::new();

    cors = if origin_wildcard {
        cors.allow_origin(AllowOrigin::any())
    } else {
        let origins = api
            .cors_origins
            .iter()
            .map(|origin| {
                origin
                    .parse::<HeaderValue>()
                    .with_context(|| format!("Invalid CORS origin: {}", origin))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        cors.allow_origin(origins)
    };

    let methods = api
        .cors_methods
        .iter()
        .map(|method| {
            method
                .parse::<Method>()
                .with_context(|| format!("Invalid CORS method: {}", method))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    cors = cors.allow_methods(methods);

    cors = if header_wildcard {
        cors.allow_headers(Any)
    } else {
        let headers = api
            .cors_headers
            .iter()
            .map(|header| {
                header
                    .parse::<HeaderName>()
                    .with_context(|| format!("Invalid CORS header: {}", header))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        cors.allow_headers(headers)
    };

    // Credentials cannot be combined with wildcards.
    if api.cors_allow_credentials && !origin_wildcard && !header_wildcard {
        cors = cors.allow_credentials(true);
    }

    Ok(cors)
}
