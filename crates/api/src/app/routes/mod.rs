use axum::{
    Router,
    routing::{get, post},
};

pub mod system;
pub mod upload;
pub mod ws;

pub fn router() -> Router {
    Router::new()
        .route("/ws/:client_id", get(ws::relay_connection))
        .route("/upload", post(upload::upload))
}
