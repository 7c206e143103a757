#[derive(Debug, Serialize)]
struct NowResponse {
    schema_version: String,
    now: String,
    wall: String,
}

async fn get_now() -> Json<NowResponse> {
    let now = Utc::now();
    Json(NowResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        now: now.to_rfc3339(),
        wall: vigil_core::clock::format_wall(now),
    })
}

#[derive(Debug, Serialize)]
struct KindsResponse {
    schema_version: String,
    kinds: Vec<contracts::EncounterKind>,
}

async fn get_kinds(State(state): State<AppState>) -> Result<Json<KindsResponse>, HttpApiError> {
    let api = state.inner.lock().await;
    let kinds = api.list_kinds().map_err(HttpApiError::from_tracker)?;
    Ok(Json(KindsResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        kinds,
    }))
}

#[derive(Debug, Serialize)]
struct SeedResponse {
    schema_version: String,
    seeded: usize,
}

async fn seed_kinds(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SeedResponse>, HttpApiError> {
    let actor = actor_from_headers(&headers)?;
    if actor.role != Role::PlatformAdmin {
        return Err(HttpApiError::forbidden(
            "seeding the catalog requires a platform admin",
            Some(format!("role={:?}", actor.role)),
        ));
    }

    let mut api = state.inner.lock().await;
    let seeded = api.seed_kinds().map_err(HttpApiError::from_tracker)?;
    Ok(Json(SeedResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        seeded,
    }))
}

#[derive(Debug, Serialize)]
struct BoardResponse {
    schema_version: String,
    #[serde(flatten)]
    board: crate::BoardView,
}

async fn get_board(
    Path(group_id): Path<u64>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<BoardResponse>, HttpApiError> {
    let actor = actor_from_headers(&headers)?;
    authorize_group(&actor, group_id)?;

    let api = state.inner.lock().await;
    let board = api
        .board(group_id, Utc::now())
        .map_err(HttpApiError::from_tracker)?;
    Ok(Json(BoardResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        board,
    }))
}
