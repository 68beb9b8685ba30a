/// Follower count query endpoint
use crate::context::AppContext;
use axum::{extract::State, response::Json, routing::get, Router};
use serde_json::{json, Value};

pub fn routes() -> Router<AppContext> {
    Router::new().route("/api/follower-count", get(follower_count))
}

async fn follower_count(State(ctx): State<AppContext>) -> Json<Value> {
    Json(json!({ "count": ctx.followers.count() }))
}
