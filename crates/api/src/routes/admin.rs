//! Back-office endpoints under `/admin/orders`.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::{DateTime, Utc};
use common::{OrderId, OrderStatus, UserId};
use domain::OrderStatistics;
use order_store::{OrderQuery, OrderStore, TransitionEvent};
use serde::Deserialize;

use super::views::{OrderView, PageView};
use crate::AppState;
use crate::auth::AdminContext;
use crate::error::ApiError;

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub number: Option<String>,
    pub status: Option<OrderStatus>,
    pub user_id: Option<i64>,
    pub begin_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

impl SearchParams {
    fn into_query(self) -> OrderQuery {
        let mut query =
            OrderQuery::new().page(self.page.unwrap_or(1), self.page_size.unwrap_or(10));
        query.number = self.number;
        query.status = self.status;
        query.user_id = self.user_id.map(UserId::new);
        query.from_timestamp = self.begin_time;
        query.to_timestamp = self.end_time;
        query
    }
}

#[derive(Debug, Deserialize)]
pub struct ReasonRequest {
    pub reason: String,
}

/// GET /admin/orders
pub async fn search<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AdminContext(ctx): AdminContext,
    Query(params): Query<SearchParams>,
) -> Result<Json<PageView>, ApiError> {
    if let (Some(begin), Some(end)) = (params.begin_time, params.end_time)
        && begin > end
    {
        return Err(ApiError::BadRequest("begin_time is after end_time".to_string()));
    }
    let page = state.lifecycle.search(&ctx, params.into_query()).await?;
    Ok(Json(page.into()))
}

/// GET /admin/orders/statistics
pub async fn statistics<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AdminContext(ctx): AdminContext,
) -> Result<Json<OrderStatistics>, ApiError> {
    Ok(Json(state.lifecycle.statistics(&ctx).await?))
}

/// GET /admin/orders/{id}
pub async fn get<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AdminContext(ctx): AdminContext,
    Path(id): Path<OrderId>,
) -> Result<Json<OrderView>, ApiError> {
    Ok(Json(state.lifecycle.get(&ctx, id).await?.into()))
}

/// GET /admin/orders/{id}/transitions
pub async fn transitions<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AdminContext(ctx): AdminContext,
    Path(id): Path<OrderId>,
) -> Result<Json<Vec<TransitionEvent>>, ApiError> {
    Ok(Json(state.lifecycle.transitions(&ctx, id).await?))
}

/// POST /admin/orders/{id}/confirm
#[tracing::instrument(skip(state, ctx))]
pub async fn confirm<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AdminContext(ctx): AdminContext,
    Path(id): Path<OrderId>,
) -> Result<Json<OrderView>, ApiError> {
    Ok(Json(state.lifecycle.confirm(&ctx, id).await?.into()))
}

/// POST /admin/orders/{id}/reject
#[tracing::instrument(skip(state, ctx, req))]
pub async fn reject<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AdminContext(ctx): AdminContext,
    Path(id): Path<OrderId>,
    Json(req): Json<ReasonRequest>,
) -> Result<Json<OrderView>, ApiError> {
    Ok(Json(state.lifecycle.reject(&ctx, id, req.reason).await?.into()))
}

/// POST /admin/orders/{id}/cancel
#[tracing::instrument(skip(state, ctx, req))]
pub async fn cancel<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AdminContext(ctx): AdminContext,
    Path(id): Path<OrderId>,
    Json(req): Json<ReasonRequest>,
) -> Result<Json<OrderView>, ApiError> {
    let order = state.lifecycle.cancel(&ctx, id, Some(req.reason)).await?;
    Ok(Json(order.into()))
}

/// POST /admin/orders/{id}/dispatch
#[tracing::instrument(skip(state, ctx))]
pub async fn dispatch<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AdminContext(ctx): AdminContext,
    Path(id): Path<OrderId>,
) -> Result<Json<OrderView>, ApiError> {
    Ok(Json(state.lifecycle.dispatch(&ctx, id).await?.into()))
}

/// POST /admin/orders/{id}/complete
#[tracing::instrument(skip(state, ctx))]
pub async fn complete<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AdminContext(ctx): AdminContext,
    Path(id): Path<OrderId>,
) -> Result<Json<OrderView>, ApiError> {
    Ok(Json(state.lifecycle.complete(&ctx, id).await?.into()))
}
