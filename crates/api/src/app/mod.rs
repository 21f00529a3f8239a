//! Axum router and service wiring.
//!
//! - `services.rs`: state store, queue, executor and watchdog timer wiring
//! - `routes/`: HTTP handlers
//! - `dto.rs`: response bodies
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::middleware::{self, AdminAuth};

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{build_services, AppServices};

/// Build the full HTTP router around already-wired services.
///
/// `/health` stays public; everything under `/recalc` requires the admin
/// token when one is configured.
pub fn build_app(services: Arc<AppServices>, admin_token: Option<String>) -> Router {
    let auth = AdminAuth::new(admin_token);

    let protected = Router::new()
        .nest("/recalc", routes::recalc::router())
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            auth,
            middleware::admin_auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new())
}
