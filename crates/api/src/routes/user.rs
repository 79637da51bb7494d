//! Customer endpoints under `/user/orders`.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::{OrderId, OrderStatus};
use domain::SubmitOrder;
use order_store::{OrderStore, TransitionEvent};
use payment::PrepayHandle;
use serde::Deserialize;

use super::views::{OrderView, PageView};
use crate::AppState;
use crate::auth::UserContext;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Deserialize)]
pub struct PayRequest {
    /// Payer identity at the gateway.
    pub openid: String,
}

/// POST /user/orders
#[tracing::instrument(skip(state, ctx, req))]
pub async fn submit<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    UserContext(ctx): UserContext,
    Json(req): Json<SubmitOrder>,
) -> Result<(StatusCode, Json<OrderView>), ApiError> {
    let order = state.lifecycle.submit(&ctx, req).await?;
    Ok((StatusCode::CREATED, Json(order.into())))
}

/// GET /user/orders
pub async fn history<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    UserContext(ctx): UserContext,
    Query(params): Query<HistoryParams>,
) -> Result<Json<PageView>, ApiError> {
    let page = state
        .lifecycle
        .history(
            &ctx,
            params.page.unwrap_or(1),
            params.page_size.unwrap_or(10),
            params.status,
        )
        .await?;
    Ok(Json(page.into()))
}

/// GET /user/orders/{id}
pub async fn get<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    UserContext(ctx): UserContext,
    Path(id): Path<OrderId>,
) -> Result<Json<OrderView>, ApiError> {
    let order = state.lifecycle.get(&ctx, id).await?;
    Ok(Json(order.into()))
}

/// GET /user/orders/{id}/transitions
pub async fn transitions<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    UserContext(ctx): UserContext,
    Path(id): Path<OrderId>,
) -> Result<Json<Vec<TransitionEvent>>, ApiError> {
    Ok(Json(state.lifecycle.transitions(&ctx, id).await?))
}

/// POST /user/orders/{id}/pay, returning what the client needs to open the payment sheet.
#[tracing::instrument(skip(state, ctx, req))]
pub async fn pay<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    UserContext(ctx): UserContext,
    Path(id): Path<OrderId>,
    Json(req): Json<PayRequest>,
) -> Result<Json<PrepayHandle>, ApiError> {
    Ok(Json(state.lifecycle.pay(&ctx, id, &req.openid).await?))
}

/// POST /user/orders/{id}/cancel
#[tracing::instrument(skip(state, ctx))]
pub async fn cancel<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    UserContext(ctx): UserContext,
    Path(id): Path<OrderId>,
) -> Result<Json<OrderView>, ApiError> {
    let order = state.lifecycle.cancel(&ctx, id, None).await?;
    Ok(Json(order.into()))
}

/// POST /user/orders/{id}/remind
pub async fn remind<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    UserContext(ctx): UserContext,
    Path(id): Path<OrderId>,
) -> Result<StatusCode, ApiError> {
    state.lifecycle.remind(&ctx, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
