//! HTTP surface: greeting handler, admission middleware and server.

mod handlers;
mod middleware;
mod server;

pub use handlers::{greet, Greeting};
pub use middleware::{rate_limit, too_many_requests};
pub use server::HttpServer;

use axum::Router;

use crate::ratelimit::SharedRegistry;

/// Build the application router.
///
/// Every method and path is greeted, behind per-client rate limiting.
pub fn router(registry: SharedRegistry) -> Router {
    Router::new()
        .fallback(greet)
        .layer(axum::middleware::from_fn_with_state(registry, rate_limit))
}
