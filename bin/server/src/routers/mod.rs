use axum::Router;

pub mod optimize;

/// Create the main API router
pub fn create_router() -> Router {
    Router::new().nest("/gepa", optimize::create_router())
}
