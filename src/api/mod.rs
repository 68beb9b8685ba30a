/// API routes and handlers
pub mod comments;
pub mod followers;
pub mod gifters;
pub mod likers;
pub mod webhook;
pub mod ws;

use crate::context::AppContext;
use axum::Router;

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(comments::routes())
        .merge(gifters::routes())
        .merge(likers::routes())
        .merge(followers::routes())
        .merge(webhook::routes())
        .merge(ws::routes())
}
