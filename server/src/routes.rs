use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json,
    body::Bytes,
    extract::{ConnectInfo, Path, Query, State as AxumState},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{CONTENT_TYPE, REFERER, SET_COOKIE},
    },
    response::{IntoResponse, Redirect},
};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::{
    analytics::{self, EventKind, MAX_REPORT_DAYS, ip_hash, sha256_hex},
    database::{
        MESSAGE_CAP, clear_messages, delete_profile, get_messages, get_profile, list_profiles,
        profile_exists, put_profile, rate_limit_exceeded,
    },
    error::AppError,
    models::{Block, ContactMessage, Link, Profile, Theme},
    referrer::classify,
    session::{Session, clear_cookie_header, cookie_from_headers, set_cookie_header},
    state::State,
    utils::{client_ip, sanitize_slug, valid_slug},
};

const DEFAULT_MESSAGE_LIMIT: isize = 100;
const DEFAULT_REPORT_DAYS: u32 = 30;
const MAX_AVATAR_BYTES: usize = 2 * 1024 * 1024;
const MAX_LINKS: usize = 100;
const MAX_BLOCKS: usize = 200;

pub async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}

// --- public ---

pub async fn profile_handler(
    AxumState(state): AxumState<Arc<State>>,
    Path(slug): Path<String>,
) -> Result<Json<Profile>, AppError> {
    let mut conn = state.redis_connection.clone();

    let profile = get_profile(&mut conn, &slug)
        .await?
        .filter(|profile| profile.published)
        .ok_or(AppError::NotFound)?;

    Ok(Json(profile))
}

#[derive(Deserialize)]
pub struct EventPayload {
    pub slug: String,
    pub kind: EventKind,
    #[serde(default)]
    pub link_id: Option<Uuid>,
    #[serde(default)]
    pub referrer: Option<String>,
}

/// Clicks must name a link that is currently on the profile; views carry none.
pub fn validate_click_target(
    profile: &Profile,
    kind: EventKind,
    link_id: Option<Uuid>,
) -> Result<Option<Uuid>, AppError> {
    match kind {
        EventKind::Click => {
            let id = link_id.ok_or(AppError::MalformedPayload)?;

            if profile.link(id).is_none() {
                return Err(AppError::Invalid("link id"));
            }

            Ok(Some(id))
        }
        EventKind::View => Ok(None),
    }
}

pub async fn events_handler(
    AxumState(state): AxumState<Arc<State>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<EventPayload>,
) -> Result<StatusCode, AppError> {
    let mut conn = state.redis_connection.clone();

    let profile = get_profile(&mut conn, &payload.slug)
        .await?
        .filter(|profile| profile.published)
        .ok_or(AppError::NotFound)?;

    let link_id = validate_click_target(&profile, payload.kind, payload.link_id)?;

    let source = classify(payload.referrer.as_deref());
    let today = Utc::now().date_naive();
    let visitor = ip_hash(
        &state.config.session_secret,
        &client_ip(&headers, &peer.ip()),
        today,
    );

    analytics::record_event(
        &mut conn,
        &profile.slug,
        payload.kind,
        link_id,
        source,
        &visitor,
        today,
    )
    .await?;

    Ok(StatusCode::ACCEPTED)
}

pub async fn redirect_handler(
    AxumState(state): AxumState<Arc<State>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path((slug, link_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
) -> Result<Redirect, AppError> {
    let mut conn = state.redis_connection.clone();

    let profile = get_profile(&mut conn, &slug)
        .await?
        .filter(|profile| profile.published)
        .ok_or(AppError::NotFound)?;

    let link = profile
        .link(link_id)
        .filter(|link| link.enabled)
        .ok_or(AppError::NotFound)?;

    let referrer = headers.get(REFERER).and_then(|v| v.to_str().ok());
    let source = classify(referrer);

    let today = Utc::now().date_naive();
    let visitor = ip_hash(
        &state.config.session_secret,
        &client_ip(&headers, &peer.ip()),
        today,
    );

    analytics::record_event(
        &mut conn,
        &profile.slug,
        EventKind::Click,
        Some(link_id),
        source,
        &visitor,
        today,
    )
    .await?;

    Ok(Redirect::temporary(&link.url))
}

#[derive(Deserialize)]
pub struct MessagePayload {
    pub name: String,
    pub email: String,
    pub body: String,
}

pub fn validate_message(payload: &MessagePayload) -> Result<(), AppError> {
    if payload.name.trim().is_empty() || payload.name.len() > 100 {
        return Err(AppError::Invalid("name"));
    }

    if !payload.email.contains('@') || payload.email.len() > 200 {
        return Err(AppError::Invalid("email"));
    }

    if payload.body.trim().is_empty() || payload.body.len() > 2000 {
        return Err(AppError::Invalid("body"));
    }

    Ok(())
}

pub async fn message_handler(
    AxumState(state): AxumState<Arc<State>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(slug): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<MessagePayload>,
) -> Result<StatusCode, AppError> {
    let mut conn = state.redis_connection.clone();

    let profile = get_profile(&mut conn, &slug)
        .await?
        .filter(|profile| profile.published)
        .ok_or(AppError::NotFound)?;

    validate_message(&payload)?;

    let today = Utc::now().date_naive();
    let visitor = ip_hash(
        &state.config.session_secret,
        &client_ip(&headers, &peer.ip()),
        today,
    );

    if rate_limit_exceeded(
        &mut conn,
        "messages",
        &visitor,
        state.config.rate_limit_per_minute,
    )
    .await?
    {
        return Err(AppError::RateLimited);
    }

    let message = ContactMessage {
        id: Uuid::new_v4(),
        name: payload.name.trim().to_string(),
        email: payload.email.trim().to_string(),
        body: payload.body.trim().to_string(),
        received_at: Utc::now(),
    };

    crate::database::push_message(&mut conn, &profile.slug, &message).await?;

    Ok(StatusCode::CREATED)
}

// --- admin ---

fn require_session(state: &State, headers: &HeaderMap) -> Result<Session, AppError> {
    let cookie = cookie_from_headers(headers).ok_or(AppError::Unauthorized)?;

    Ok(state.sessions.open(&cookie)?)
}

#[derive(Deserialize)]
pub struct LoginPayload {
    pub username: String,
    pub password: String,
}

/// Case-insensitive on the hex so an uppercase secret still matches. Both
/// sides are already digests, so the comparison need not be constant-time.
pub fn password_matches(password: &str, expected_hex: &str) -> bool {
    sha256_hex(password.as_bytes()).eq_ignore_ascii_case(expected_hex)
}

pub async fn login_handler(
    AxumState(state): AxumState<Arc<State>>,
    Json(payload): Json<LoginPayload>,
) -> Result<impl IntoResponse, AppError> {
    if payload.username != state.config.admin_user
        || !password_matches(&payload.password, &state.config.admin_password_hash)
    {
        return Err(AppError::Unauthorized);
    }

    let cookie = state
        .sessions
        .seal(&payload.username)
        .map_err(|e| AppError::InternalError(Box::new(e)))?;

    let mut headers = HeaderMap::new();
    headers.insert(
        SET_COOKIE,
        HeaderValue::from_str(&set_cookie_header(
            &cookie,
            state.sessions.ttl_secs(),
            state.config.secure_cookies,
        ))
        .map_err(|e| AppError::InternalError(Box::new(e)))?,
    );

    info!("Admin {} logged in", payload.username);

    Ok((StatusCode::OK, headers))
}

pub async fn logout_handler(
    AxumState(state): AxumState<Arc<State>>,
) -> Result<impl IntoResponse, AppError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        SET_COOKIE,
        HeaderValue::from_str(&clear_cookie_header(state.config.secure_cookies))
            .map_err(|e| AppError::InternalError(Box::new(e)))?,
    );

    Ok((StatusCode::OK, headers))
}

pub async fn list_profiles_handler(
    AxumState(state): AxumState<Arc<State>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Profile>>, AppError> {
    require_session(&state, &headers)?;

    let mut conn = state.redis_connection.clone();

    Ok(Json(list_profiles(&mut conn).await?))
}

#[derive(Deserialize)]
pub struct CreateProfilePayload {
    pub slug: String,
    pub display_name: String,
}

pub async fn create_profile_handler(
    AxumState(state): AxumState<Arc<State>>,
    headers: HeaderMap,
    Json(payload): Json<CreateProfilePayload>,
) -> Result<impl IntoResponse, AppError> {
    require_session(&state, &headers)?;

    let slug = sanitize_slug(&payload.slug);
    if !valid_slug(&slug) {
        return Err(AppError::Invalid("slug"));
    }

    let display_name = payload.display_name.trim().to_string();
    if display_name.is_empty() || display_name.len() > 100 {
        return Err(AppError::Invalid("display name"));
    }

    let mut conn = state.redis_connection.clone();

    if profile_exists(&mut conn, &slug).await? {
        return Err(AppError::Conflict);
    }

    let profile = Profile::new(slug, display_name);
    put_profile(&mut conn, &profile).await?;

    info!("Created profile {}", profile.slug);

    Ok((StatusCode::CREATED, Json(profile)))
}

pub async fn get_profile_handler(
    AxumState(state): AxumState<Arc<State>>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<Json<Profile>, AppError> {
    require_session(&state, &headers)?;

    let mut conn = state.redis_connection.clone();

    let profile = get_profile(&mut conn, &slug)
        .await?
        .ok_or(AppError::NotFound)?;

    Ok(Json(profile))
}

#[derive(Deserialize)]
pub struct UpdateProfilePayload {
    pub display_name: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub published: bool,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub theme: Theme,
}

pub fn validate_profile_update(payload: &UpdateProfilePayload) -> Result<(), AppError> {
    if payload.display_name.trim().is_empty() || payload.display_name.len() > 100 {
        return Err(AppError::Invalid("display name"));
    }

    if payload.bio.len() > 1000 {
        return Err(AppError::Invalid("bio"));
    }

    if payload.links.len() > MAX_LINKS {
        return Err(AppError::Invalid("link count"));
    }

    for link in &payload.links {
        if link.label.trim().is_empty() || link.label.len() > 100 {
            return Err(AppError::Invalid("link label"));
        }

        if link.url.len() > 1000
            || !(link.url.starts_with("https://") || link.url.starts_with("http://"))
        {
            return Err(AppError::Invalid("link url"));
        }
    }

    if payload.blocks.len() > MAX_BLOCKS {
        return Err(AppError::Invalid("block count"));
    }

    for block in &payload.blocks {
        if block.body.len() > 2000 {
            return Err(AppError::Invalid("block body"));
        }
    }

    Ok(())
}

pub async fn update_profile_handler(
    AxumState(state): AxumState<Arc<State>>,
    headers: HeaderMap,
    Path(slug): Path<String>,
    Json(payload): Json<UpdateProfilePayload>,
) -> Result<Json<Profile>, AppError> {
    require_session(&state, &headers)?;
    validate_profile_update(&payload)?;

    let mut conn = state.redis_connection.clone();

    let mut profile = get_profile(&mut conn, &slug)
        .await?
        .ok_or(AppError::NotFound)?;

    // Links and blocks posted without ids already got fresh ones from serde.
    profile.display_name = payload.display_name.trim().to_string();
    profile.bio = payload.bio;
    profile.avatar_url = payload.avatar_url;
    profile.published = payload.published;
    profile.links = payload.links;
    profile.blocks = payload.blocks;
    profile.theme = payload.theme;
    profile.updated_at = Utc::now();

    put_profile(&mut conn, &profile).await?;

    Ok(Json(profile))
}

pub async fn delete_profile_handler(
    AxumState(state): AxumState<Arc<State>>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<StatusCode, AppError> {
    require_session(&state, &headers)?;

    let mut conn = state.redis_connection.clone();

    if !delete_profile(&mut conn, &slug).await? {
        return Err(AppError::NotFound);
    }

    info!("Deleted profile {slug}");

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct MessagesQuery {
    pub limit: Option<isize>,
}

pub async fn list_messages_handler(
    AxumState(state): AxumState<Arc<State>>,
    headers: HeaderMap,
    Path(slug): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Vec<ContactMessage>>, AppError> {
    require_session(&state, &headers)?;

    let limit = query.limit.unwrap_or(DEFAULT_MESSAGE_LIMIT).clamp(1, MESSAGE_CAP);

    let mut conn = state.redis_connection.clone();

    if !profile_exists(&mut conn, &slug).await? {
        return Err(AppError::NotFound);
    }

    Ok(Json(get_messages(&mut conn, &slug, limit).await?))
}

pub async fn clear_messages_handler(
    AxumState(state): AxumState<Arc<State>>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<StatusCode, AppError> {
    require_session(&state, &headers)?;

    let mut conn = state.redis_connection.clone();

    if !profile_exists(&mut conn, &slug).await? {
        return Err(AppError::NotFound);
    }

    clear_messages(&mut conn, &slug).await?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct StatsQuery {
    pub days: Option<u32>,
}

pub fn validate_days(days: Option<u32>) -> Result<u32, AppError> {
    let days = days.unwrap_or(DEFAULT_REPORT_DAYS);

    if days == 0 || days > MAX_REPORT_DAYS {
        return Err(AppError::Invalid("days"));
    }

    Ok(days)
}

pub async fn stats_handler(
    AxumState(state): AxumState<Arc<State>>,
    headers: HeaderMap,
    Path(slug): Path<String>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<analytics::StatsReport>, AppError> {
    require_session(&state, &headers)?;

    let days = validate_days(query.days)?;

    let mut conn = state.redis_connection.clone();

    let profile = get_profile(&mut conn, &slug)
        .await?
        .ok_or(AppError::NotFound)?;

    Ok(Json(analytics::stats(&mut conn, &profile, days).await?))
}

pub fn avatar_extension(content_type: Option<&str>) -> Option<&'static str> {
    match content_type? {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

/// File name behind a locally served avatar url; None for external urls or
/// anything that would escape the uploads directory.
pub fn avatar_file_name(avatar_url: &str) -> Option<&str> {
    let name = avatar_url.strip_prefix("/uploads/")?;

    (!name.is_empty() && !name.contains('/')).then_some(name)
}

pub async fn avatar_handler(
    AxumState(state): AxumState<Arc<State>>,
    headers: HeaderMap,
    Path(slug): Path<String>,
    body: Bytes,
) -> Result<Json<Profile>, AppError> {
    require_session(&state, &headers)?;

    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let ext = avatar_extension(content_type).ok_or(AppError::UnsupportedMedia)?;

    if body.is_empty() || body.len() > MAX_AVATAR_BYTES {
        return Err(AppError::Invalid("avatar size"));
    }

    let mut conn = state.redis_connection.clone();

    let mut profile = get_profile(&mut conn, &slug)
        .await?
        .ok_or(AppError::NotFound)?;

    let file_name = format!("{slug}.{ext}");

    // A re-upload with a new content-type changes the extension; drop the old
    // file so it stops being served. Missing files are not an error.
    if let Some(previous) = profile.avatar_url.as_deref().and_then(avatar_file_name) {
        if previous != file_name {
            let _ = tokio::fs::remove_file(format!("{}/{previous}", state.config.uploads_dir))
                .await;
        }
    }

    tokio::fs::write(format!("{}/{file_name}", state.config.uploads_dir), &body).await?;

    profile.avatar_url = Some(format!("/uploads/{file_name}"));
    profile.updated_at = Utc::now();
    put_profile(&mut conn, &profile).await?;

    Ok(Json(profile))
}

#[cfg(test)]
mod tests {
    use super::{
        EventPayload, MessagePayload, UpdateProfilePayload, avatar_extension, avatar_file_name,
        password_matches, validate_click_target, validate_days, validate_message,
        validate_profile_update,
    };
    use crate::{
        analytics::EventKind,
        error::AppError,
        models::{Link, Profile},
    };

    fn message(name: &str, email: &str, body: &str) -> MessagePayload {
        MessagePayload {
            name: name.to_string(),
            email: email.to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_message_validation() {
        assert!(validate_message(&message("Ada", "ada@example.com", "hi")).is_ok());

        assert!(matches!(
            validate_message(&message("", "ada@example.com", "hi")),
            Err(AppError::Invalid("name"))
        ));
        assert!(matches!(
            validate_message(&message("Ada", "not-an-email", "hi")),
            Err(AppError::Invalid("email"))
        ));
        assert!(matches!(
            validate_message(&message("Ada", "ada@example.com", "   ")),
            Err(AppError::Invalid("body"))
        ));
        assert!(matches!(
            validate_message(&message("Ada", "ada@example.com", &"x".repeat(2001))),
            Err(AppError::Invalid("body"))
        ));
    }

    fn update_with_link(url: &str) -> UpdateProfilePayload {
        UpdateProfilePayload {
            display_name: "P".to_string(),
            bio: String::new(),
            avatar_url: None,
            published: true,
            links: vec![Link {
                id: uuid::Uuid::new_v4(),
                label: "Blog".to_string(),
                url: url.to_string(),
                enabled: true,
            }],
            blocks: Vec::new(),
            theme: Default::default(),
        }
    }

    #[test]
    fn test_profile_update_validation() {
        assert!(validate_profile_update(&update_with_link("https://example.com")).is_ok());

        assert!(matches!(
            validate_profile_update(&update_with_link("javascript:alert(1)")),
            Err(AppError::Invalid("link url"))
        ));

        let mut payload = update_with_link("https://example.com");
        payload.display_name = String::new();
        assert!(matches!(
            validate_profile_update(&payload),
            Err(AppError::Invalid("display name"))
        ));
    }

    #[test]
    fn test_event_payload_decoding() {
        let payload: EventPayload =
            serde_json::from_str(r#"{"slug": "p", "kind": "view"}"#).unwrap();

        assert_eq!(payload.kind, EventKind::View);
        assert!(payload.link_id.is_none());
        assert!(payload.referrer.is_none());

        let payload: EventPayload = serde_json::from_str(
            r#"{"slug": "p", "kind": "click",
                "link_id": "9e107d9d-372b-4c81-90c1-9e107d9d372b",
                "referrer": "https://t.co/x"}"#,
        )
        .unwrap();

        assert_eq!(payload.kind, EventKind::Click);
        assert!(payload.link_id.is_some());
    }

    #[test]
    fn test_days_validation() {
        assert!(matches!(validate_days(None), Ok(30)));
        assert!(matches!(validate_days(Some(1)), Ok(1)));
        assert!(matches!(validate_days(Some(90)), Ok(90)));

        assert!(matches!(
            validate_days(Some(0)),
            Err(AppError::Invalid("days"))
        ));
        assert!(matches!(
            validate_days(Some(91)),
            Err(AppError::Invalid("days"))
        ));
    }

    #[test]
    fn test_click_target_validation() {
        let id = uuid::Uuid::new_v4();
        let mut profile = Profile::new("p".to_string(), "P".to_string());
        profile.links.push(Link {
            id,
            label: "Blog".to_string(),
            url: "https://example.com".to_string(),
            enabled: true,
        });

        assert_eq!(
            validate_click_target(&profile, EventKind::Click, Some(id)).unwrap(),
            Some(id)
        );

        // Views never carry a target, even when one is sent.
        assert_eq!(
            validate_click_target(&profile, EventKind::View, Some(id)).unwrap(),
            None
        );

        assert!(matches!(
            validate_click_target(&profile, EventKind::Click, None),
            Err(AppError::MalformedPayload)
        ));
        assert!(matches!(
            validate_click_target(&profile, EventKind::Click, Some(uuid::Uuid::new_v4())),
            Err(AppError::Invalid("link id"))
        ));
    }

    #[test]
    fn test_password_matching() {
        // sha256("hunter2")
        let hash = "f52fbd32b2b3b86ff88ef6c490628285f482af15ddcb29541f94bcf526a3f6c7";

        assert!(password_matches("hunter2", hash));
        assert!(password_matches("hunter2", &hash.to_uppercase()));
        assert!(!password_matches("hunter3", hash));
    }

    #[test]
    fn test_avatar_file_names() {
        assert_eq!(avatar_file_name("/uploads/p.png"), Some("p.png"));
        assert_eq!(avatar_file_name("https://cdn.example.com/p.png"), None);
        assert_eq!(avatar_file_name("/uploads/"), None);
        assert_eq!(avatar_file_name("/uploads/a/b.png"), None);
    }

    #[test]
    fn test_avatar_extensions() {
        assert_eq!(avatar_extension(Some("image/png")), Some("png"));
        assert_eq!(avatar_extension(Some("image/webp")), Some("webp"));
        assert_eq!(avatar_extension(Some("text/html")), None);
        assert_eq!(avatar_extension(None), None);
    }
}
