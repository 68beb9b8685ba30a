/// Comment log query and moderation endpoints
use crate::{context::AppContext, error::Result};
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_RECENT_LIMIT: usize = 50;

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/comments", get(recent_comments))
        .route("/api/comments/pinned", get(pinned_comments))
        .route("/api/comments/user/:unique_id", get(user_comments))
        .route("/api/comments/pin/:comment_id", post(pin_comment))
        .route("/api/comments/highlight/:comment_id", post(highlight_comment))
}

#[derive(Debug, Deserialize)]
struct RecentParams {
    limit: Option<usize>,
}

async fn recent_comments(
    State(ctx): State<AppContext>,
    Query(params): Query<RecentParams>,
) -> Json<Value> {
    let limit = params.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
    Json(json!(ctx.comments.recent_comments(limit)))
}

async fn pinned_comments(State(ctx): State<AppContext>) -> Json<Value> {
    Json(json!({ "comments": ctx.comments.pinned_comments() }))
}

async fn user_comments(
    State(ctx): State<AppContext>,
    Path(unique_id): Path<String>,
) -> Json<Value> {
    Json(json!(ctx.comments.user_comments(&unique_id)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PinRequest {
    is_pinned: bool,
}

async fn pin_comment(
    State(ctx): State<AppContext>,
    Path(comment_id): Path<String>,
    Json(request): Json<PinRequest>,
) -> Result<Json<Value>> {
    let found = ctx.comments.toggle_pin(&comment_id, request.is_pinned)?;
    Ok(Json(json!({
        "success": found,
        "commentId": comment_id,
        "isPinned": request.is_pinned,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HighlightRequest {
    is_highlighted: bool,
}

async fn highlight_comment(
    State(ctx): State<AppContext>,
    Path(comment_id): Path<String>,
    Json(request): Json<HighlightRequest>,
) -> Result<Json<Value>> {
    let found = ctx
        .comments
        .toggle_highlight(&comment_id, request.is_highlighted)?;
    Ok(Json(json!({
        "success": found,
        "commentId": comment_id,
        "isHighlighted": request.is_highlighted,
    })))
}
