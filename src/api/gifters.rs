/// Gifter rank query endpoints
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
    Router::new()
        .route("/api/gifter-rank", get(gifter_rank))
        .route("/api/gift-count", get(gift_count))
}

#[derive(Debug, Deserialize)]
struct RankParams {
    limit: Option<usize>,
}

async fn gifter_rank(
    State(ctx): State<AppContext>,
    Query(params): Query<RankParams>,
) -> Json<Value> {
    let limit = params.limit.unwrap_or(DEFAULT_RANK_SIZE);
    Json(json!({ "topGifters": ctx.gifters.top_gifters(limit) }))
}

async fn gift_count(State(ctx): State<AppContext>) -> Json<Value> {
    Json(json!({ "count": ctx.gifters.total_diamonds() }))
}
