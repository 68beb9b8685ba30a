/// Like rank query endpoints
use crate::context::AppContext;
use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_RANK_SIZE: usize = 10;

pub fn routes() -> Router<AppContext> {
    Router::new().route("/api/like-rank", get(like_rank))
}

#[derive(Debug, Deserialize)]
struct RankParams {
    limit: Option<usize>,
}

async fn like_rank(
    State(ctx): State<AppContext>,
    Query(params): Query<RankParams>,
) -> Json<Value> {
    let limit = params.limit.unwrap_or(DEFAULT_RANK_SIZE);
    Json(json!({
        "topLikers": ctx.likers.top_likers(limit),
        "totalLikes": ctx.likers.total_likes(),
    }))
}
