#[derive(Debug, Deserialize, Default)]
struct TreasuryQuery {
    page: Option<u32>,
    size: Option<u32>,
    filter: Option<String>,
}

#[derive(Debug, Serialize)]
struct TreasuryResponse {
    schema_version: String,
    #[serde(flatten)]
    page: crate::LedgerPage,
}

async fn get_treasury(
    Path(group_id): Path<u64>,
    State(state): State<AppState>,
    Query(query): Query<TreasuryQuery>,
    headers: HeaderMap,
) -> Result<Json<TreasuryResponse>, HttpApiError> {
    let actor = actor_from_headers(&headers)?;
    authorize_group(&actor, group_id)?;

    let filter = match query.filter.as_deref().map(str::trim).filter(|f| !f.is_empty()) {
        None => None,
        Some(raw) => Some(LedgerDirection::parse(raw).ok_or_else(|| {
            HttpApiError::invalid_request(
                "filter must be IN or OUT",
                Some(format!("filter={raw}")),
            )
        })?),
    };

    let api = state.inner.lock().await;
    let page = api
        .list_ledger(group_id, query.page, query.size, filter)
        .map_err(HttpApiError::from_tracker)?;
    Ok(Json(TreasuryResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        page,
    }))
}

#[derive(Debug, Deserialize)]
struct ManualEntryRequest {
    amount: i64,
    note: Option<String>,
}

#[derive(Debug, Serialize)]
struct ManualEntryResponse {
    schema_version: String,
    entry: contracts::LedgerEntry,
}

async fn treasury_deposit(
    Path(group_id): Path<u64>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ManualEntryRequest>,
) -> Result<Json<ManualEntryResponse>, HttpApiError> {
    let actor = actor_from_headers(&headers)?;
    authorize_group(&actor, group_id)?;

    let mut api = state.inner.lock().await;
    let entry = api
        .manual_in(group_id, request.amount, request.note, &actor, Utc::now())
        .map_err(HttpApiError::from_tracker)?;
    Ok(Json(ManualEntryResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        entry,
    }))
}

async fn treasury_withdraw(
    Path(group_id): Path<u64>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ManualEntryRequest>,
) -> Result<Json<ManualEntryResponse>, HttpApiError> {
    let actor = actor_from_headers(&headers)?;
    authorize_group(&actor, group_id)?;

    let mut api = state.inner.lock().await;
    let entry = api
        .manual_out(group_id, request.amount, request.note, &actor, Utc::now())
        .map_err(HttpApiError::from_tracker)?;
    Ok(Json(ManualEntryResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        entry,
    }))
}

#[derive(Debug, Deserialize)]
struct ImportRequest {
    text: String,
}

#[derive(Debug, Serialize)]
struct ImportResponse {
    schema_version: String,
    #[serde(flatten)]
    report: crate::ImportReport,
}

async fn import_history(
    Path(group_id): Path<u64>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ImportRequest>,
) -> Result<Json<ImportResponse>, HttpApiError> {
    let actor = actor_from_headers(&headers)?;
    authorize_group(&actor, group_id)?;

    let mut api = state.inner.lock().await;
    let report = api
        .import_history(group_id, &request.text, &actor, Utc::now())
        .map_err(HttpApiError::from_tracker)?;
    Ok(Json(ImportResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        report,
    }))
}
