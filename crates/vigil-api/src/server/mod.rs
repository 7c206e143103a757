use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use contracts::{Actor, ApiError, ErrorCode, LedgerDirection, Role, SCHEMA_VERSION_V1};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::{
    RecordEncounterRequest, TrackerApi, TrackerError, UpdateEncounterRequest,
};

include!("error.rs");
include!("state.rs");
include!("routes/meta.rs");
include!("routes/encounters.rs");
include!("routes/treasury.rs");
include!("util.rs");

pub async fn serve(addr: SocketAddr, api: TrackerApi) -> Result<(), ServerError> {
    let state = AppState::new(api);
    let app = router(state);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "tracker api listening");
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/time/now", get(get_now))
        .route("/api/v1/kinds", get(get_kinds))
        .route("/api/v1/admin/seed-kinds", post(seed_kinds))
        .route("/api/v1/groups/{group_id}/board", get(get_board))
        .route(
            "/api/v1/groups/{group_id}/encounters",
            post(create_encounter).get(list_encounters),
        )
        .route(
            "/api/v1/groups/{group_id}/encounters/{encounter_id}",
            get(get_encounter)
                .put(update_encounter)
                .delete(delete_encounter),
        )
        .route(
            "/api/v1/groups/{group_id}/encounters/{encounter_id}/items/{item_id}/sell",
            post(sell_item),
        )
        .route(
            "/api/v1/groups/{group_id}/encounters/{encounter_id}/shares/{share_id}/paid",
            post(pay_share),
        )
        .route(
            "/api/v1/groups/{group_id}/kinds/{kind_id}/no-spawn",
            post(press_no_spawn),
        )
        .route("/api/v1/groups/{group_id}/treasury", get(get_treasury))
        .route(
            "/api/v1/groups/{group_id}/treasury/deposit",
            post(treasury_deposit),
        )
        .route(
            "/api/v1/groups/{group_id}/treasury/withdraw",
            post(treasury_withdraw),
        )
        .route("/api/v1/groups/{group_id}/import", post(import_history))
        .layer(middleware::from_fn(cors_middleware))
        .with_state(state)
}

async fn cors_middleware(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = Response::new(axum::body::Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return response;
    }

    let mut response = next.run(request).await;
    apply_cors_headers(response.headers_mut());
    response
}

#[cfg(test)]
mod tests;
