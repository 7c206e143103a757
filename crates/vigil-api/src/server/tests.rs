use super::*;

fn header_set(entries: &[(&'static str, &str)]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in entries {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_str(value).expect("header value"),
        );
    }
    headers
}

#[test]
fn actor_parses_from_trusted_headers() {
    let headers = header_set(&[
        ("x-actor-id", "rin"),
        ("x-actor-role", "member"),
        ("x-group-id", "7"),
    ]);
    let actor = actor_from_headers(&headers).expect("actor");
    assert_eq!(actor.login_id, "rin");
    assert_eq!(actor.role, Role::Member);
    assert_eq!(actor.group_id, Some(7));
}

#[test]
fn actor_accepts_legacy_role_spellings() {
    let headers = header_set(&[("x-actor-id", "lee"), ("x-actor-role", "LEADER")]);
    let actor = actor_from_headers(&headers).expect("actor");
    assert_eq!(actor.role, Role::GroupAdmin);
    assert_eq!(actor.group_id, None);
}

#[test]
fn actor_rejects_missing_identity() {
    let headers = header_set(&[("x-actor-role", "member")]);
    let err = actor_from_headers(&headers).expect_err("no actor id");
    assert_eq!(err.status, StatusCode::BAD_REQUEST);

    let headers = header_set(&[
        ("x-actor-id", "rin"),
        ("x-actor-role", "member"),
        ("x-group-id", "not-a-number"),
    ]);
    let err = actor_from_headers(&headers).expect_err("bad group id");
    assert_eq!(err.status, StatusCode::BAD_REQUEST);
}

#[test]
fn group_scope_is_enforced_except_for_platform_admins() {
    let member = Actor::new("rin", Role::Member, Some(1));
    assert!(authorize_group(&member, 1).is_ok());
    let err = authorize_group(&member, 2).expect_err("wrong group");
    assert_eq!(err.status, StatusCode::FORBIDDEN);

    let admin = Actor::new("ops", Role::PlatformAdmin, None);
    assert!(authorize_group(&admin, 1).is_ok());
    assert!(authorize_group(&admin, 2).is_ok());
}

#[test]
fn tracker_errors_map_to_http_statuses() {
    let cases = [
        (
            TrackerError::Validation("bad".into()),
            StatusCode::BAD_REQUEST,
        ),
        (TrackerError::NotFound("gone".into()), StatusCode::NOT_FOUND),
        (TrackerError::Forbidden("no".into()), StatusCode::FORBIDDEN),
        (TrackerError::Conflict("dup".into()), StatusCode::CONFLICT),
    ];
    for (err, status) in cases {
        assert_eq!(HttpApiError::from_tracker(err).status, status);
    }
}

#[test]
fn router_builds_with_fresh_state() {
    let api = TrackerApi::open_in_memory().expect("open");
    let _app = router(AppState::new(api));
}
