//! Request handlers served behind the admission middleware.

use axum::Json;
use serde::Serialize;

/// Greeting payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Greeting {
    /// Greeting text
    pub message: String,
}

/// Greet the client, whatever the method or path.
pub async fn greet() -> Json<Greeting> {
    Json(Greeting {
        message: "Hello, World!".to_string(),
    })
}
