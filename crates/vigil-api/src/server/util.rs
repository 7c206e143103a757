fn apply_cors_headers(headers: &mut axum::http::HeaderMap) {
    headers.insert(
        HeaderName::from_static("access-control-allow-origin"),
        HeaderValue::from_static("*"),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-methods"),
        HeaderValue::from_static("GET,POST,OPTIONS,PUT,PATCH,DELETE"),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-headers"),
        HeaderValue::from_static("*"),
    );
    headers.insert(
        HeaderName::from_static("access-control-max-age"),
        HeaderValue::from_static("3600"),
    );
}

/// Identity comes from trusted headers set by the fronting identity
/// service; the tracker takes them as given and only enforces the
/// group-scoping rules.
fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, HttpApiError> {
    let login_id = header_value(headers, "x-actor-id")?
        .ok_or_else(|| HttpApiError::invalid_request("missing x-actor-id header", None))?;

    let role_raw = header_value(headers, "x-actor-role")?
        .ok_or_else(|| HttpApiError::invalid_request("missing x-actor-role header", None))?;
    let role = Role::parse(&role_raw).ok_or_else(|| {
        HttpApiError::invalid_request("unknown actor role", Some(format!("role={role_raw}")))
    })?;

    let group_id = match header_value(headers, "x-group-id")? {
        Some(raw) => Some(raw.parse::<u64>().map_err(|_| {
            HttpApiError::invalid_request("x-group-id must be an integer", Some(format!("value={raw}")))
        })?),
        None => None,
    };

    Ok(Actor {
        login_id,
        role,
        group_id,
    })
}

fn header_value(headers: &HeaderMap, name: &str) -> Result<Option<String>, HttpApiError> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    let text = value.to_str().map_err(|_| {
        HttpApiError::invalid_request("header is not valid UTF-8", Some(format!("header={name}")))
    })?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    Ok(Some(trimmed.to_string()))
}

/// The group in the path must be the actor's own group; platform admins may
/// act across groups.
fn authorize_group(actor: &Actor, group_id: u64) -> Result<(), HttpApiError> {
    if actor.role == Role::PlatformAdmin || actor.group_id == Some(group_id) {
        return Ok(());
    }
    Err(HttpApiError::forbidden(
        "actor is not a member of this group",
        Some(format!(
            "group_id={group_id} actor_group={:?}",
            actor.group_id
        )),
    ))
}
