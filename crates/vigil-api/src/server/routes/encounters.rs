#[derive(Debug, Serialize)]
struct TimelineResponse {
    schema_version: String,
    encounters: Vec<crate::EncounterView>,
}

async fn list_encounters(
    Path(group_id): Path<u64>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<TimelineResponse>, HttpApiError> {
    let actor = actor_from_headers(&headers)?;
    authorize_group(&actor, group_id)?;

    let api = state.inner.lock().await;
    let encounters = api.timeline(group_id).map_err(HttpApiError::from_tracker)?;
    Ok(Json(TimelineResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        encounters,
    }))
}

#[derive(Debug, Serialize)]
struct CreateEncounterResponse {
    schema_version: String,
    #[serde(with = "contracts::serde_u64_string")]
    encounter_id: u64,
}

async fn create_encounter(
    Path(group_id): Path<u64>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RecordEncounterRequest>,
) -> Result<Json<CreateEncounterResponse>, HttpApiError> {
    let actor = actor_from_headers(&headers)?;
    authorize_group(&actor, group_id)?;

    let mut api = state.inner.lock().await;
    let encounter_id = api
        .record_encounter(group_id, &request, &actor, Utc::now())
        .map_err(HttpApiError::from_tracker)?;
    Ok(Json(CreateEncounterResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        encounter_id,
    }))
}

#[derive(Debug, Serialize)]
struct EncounterResponse {
    schema_version: String,
    #[serde(flatten)]
    view: crate::EncounterView,
}

async fn get_encounter(
    Path((group_id, encounter_id)): Path<(u64, u64)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<EncounterResponse>, HttpApiError> {
    let actor = actor_from_headers(&headers)?;
    authorize_group(&actor, group_id)?;

    let api = state.inner.lock().await;
    let view = api
        .encounter_detail(group_id, encounter_id)
        .map_err(HttpApiError::from_tracker)?;
    Ok(Json(EncounterResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        view,
    }))
}

#[derive(Debug, Serialize)]
struct UpdateEncounterResponse {
    schema_version: String,
    #[serde(flatten)]
    outcome: crate::UpdateOutcome,
}

async fn update_encounter(
    Path((group_id, encounter_id)): Path<(u64, u64)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<UpdateEncounterRequest>,
) -> Result<Json<UpdateEncounterResponse>, HttpApiError> {
    let actor = actor_from_headers(&headers)?;
    authorize_group(&actor, group_id)?;

    let mut api = state.inner.lock().await;
    let outcome = api
        .update_encounter(group_id, encounter_id, &request, &actor, Utc::now())
        .map_err(HttpApiError::from_tracker)?;
    Ok(Json(UpdateEncounterResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        outcome,
    }))
}

#[derive(Debug, Serialize)]
struct PurgeResponse {
    schema_version: String,
    purged: bool,
}

async fn delete_encounter(
    Path((group_id, encounter_id)): Path<(u64, u64)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<PurgeResponse>, HttpApiError> {
    let actor = actor_from_headers(&headers)?;
    authorize_group(&actor, group_id)?;

    let mut api = state.inner.lock().await;
    api.purge_encounter(group_id, encounter_id, &actor)
        .map_err(HttpApiError::from_tracker)?;
    Ok(Json(PurgeResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        purged: true,
    }))
}

#[derive(Debug, Deserialize)]
struct SellRequest {
    amount: i64,
}

#[derive(Debug, Serialize)]
struct SellResponse {
    schema_version: String,
    item: contracts::LootItem,
    ledger_entry: Option<contracts::LedgerEntry>,
}

async fn sell_item(
    Path((group_id, encounter_id, item_id)): Path<(u64, u64, u64)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SellRequest>,
) -> Result<Json<SellResponse>, HttpApiError> {
    let actor = actor_from_headers(&headers)?;
    authorize_group(&actor, group_id)?;

    let mut api = state.inner.lock().await;
    let (item, ledger_entry) = api
        .mark_item_sold(
            group_id,
            encounter_id,
            item_id,
            request.amount,
            &actor,
            Utc::now(),
        )
        .map_err(HttpApiError::from_tracker)?;
    Ok(Json(SellResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        item,
        ledger_entry,
    }))
}

#[derive(Debug, Deserialize)]
struct PayShareRequest {
    paid: Option<bool>,
}

#[derive(Debug, Serialize)]
struct PayShareResponse {
    schema_version: String,
    share: contracts::DistributionShare,
}

async fn pay_share(
    Path((group_id, encounter_id, share_id)): Path<(u64, u64, u64)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PayShareRequest>,
) -> Result<Json<PayShareResponse>, HttpApiError> {
    let actor = actor_from_headers(&headers)?;
    authorize_group(&actor, group_id)?;

    let mut api = state.inner.lock().await;
    let share = api
        .mark_share_paid(
            group_id,
            encounter_id,
            share_id,
            request.paid.unwrap_or(true),
            &actor,
            Utc::now(),
        )
        .map_err(HttpApiError::from_tracker)?;
    Ok(Json(PayShareResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        share,
    }))
}

#[derive(Debug, Deserialize, Default)]
struct NoSpawnRequest {
    delta: Option<i64>,
}

#[derive(Debug, Serialize)]
struct NoSpawnResponse {
    schema_version: String,
    missed: i64,
}

async fn press_no_spawn(
    Path((group_id, kind_id)): Path<(u64, u64)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<NoSpawnRequest>,
) -> Result<Json<NoSpawnResponse>, HttpApiError> {
    let actor = actor_from_headers(&headers)?;
    authorize_group(&actor, group_id)?;

    let mut api = state.inner.lock().await;
    let missed = api
        .press_no_spawn(group_id, kind_id, request.delta.unwrap_or(1))
        .map_err(HttpApiError::from_tracker)?;
    Ok(Json(NoSpawnResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        missed,
    }))
}
