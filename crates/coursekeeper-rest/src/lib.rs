//! coursekeeper-rest - read-only HTTP API for user data.
//!
//! Endpoints:
//! - GET /health - liveness probe
//! - GET /users - paginated user listing
//! - GET /user_preferences - paginated preference listing, optional `?key=` filter
//!
//! When the server is configured with an API key, every request must
//! carry it in the `X-Api-Key` header; without one the API is open.
//! Both listings paginate with `page` (1-based) and `page_size`
//! (default 10, capped at 100).

use std::path::Path;
use std::sync::{Arc, Mutex};

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use coursekeeper_core::store;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

const DEFAULT_PAGE_SIZE: u32 = 10;
const MAX_PAGE_SIZE: u32 = 100;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    db: Arc<Mutex<Connection>>,
    api_key: Option<String>,
}

impl AppState {
    /// Wrap an open connection. The schema is migrated if needed.
    pub fn new(mut conn: Connection, api_key: Option<String>) -> anyhow::Result<Self> {
        store::schema::migrate(&mut conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            api_key,
        })
    }

    /// Open the store database at `db_path`.
    pub fn open(db_path: &Path, api_key: Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            db: Arc::new(Mutex::new(store::open(db_path)?)),
            api_key,
        })
    }
}

/// Build the router with all routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/users", get(list_users))
        .route("/user_preferences", get(list_preferences))
        .with_state(state)
}

/// API error type with HTTP status mapping.
#[derive(Debug)]
pub enum ApiError {
    Forbidden,
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::Forbidden => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "missing or invalid API key".to_string(),
            ),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            Self::Internal(msg) => {
                // Storage detail stays in the log, not the response.
                tracing::error!("internal error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "internal error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}

/// One page of results.
#[derive(Debug, Serialize)]
pub struct Page<T> {
    /// Total matching rows, across all pages.
    pub count: u64,
    pub page: u32,
    pub page_size: u32,
    pub results: Vec<T>,
}

#[derive(Debug, Serialize)]
pub struct UserOut {
    pub id: i64,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct PreferenceOut {
    pub id: i64,
    pub user_id: i64,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    /// Preference key filter; ignored by /users.
    pub key: Option<String>,
}

fn check_api_key(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = &state.api_key else {
        return Ok(());
    };
    let presented = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());
    if presented == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

fn paging(params: &ListParams) -> Result<(u32, u32, i64), ApiError> {
    let page = params.page.unwrap_or(1);
    if page == 0 {
        return Err(ApiError::BadRequest("page is 1-based".to_string()));
    }
    let page_size = params.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return Err(ApiError::BadRequest(format!(
            "page_size must be between 1 and {MAX_PAGE_SIZE}"
        )));
    }
    // Both params are attacker-controlled; widen before multiplying.
    let offset = i64::try_from(u64::from(page - 1) * u64::from(page_size))
        .map_err(|_| ApiError::BadRequest("page out of range".to_string()))?;
    Ok((page, page_size, offset))
}

async fn health_check() -> &'static str {
    "ok"
}

async fn list_users(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
) -> Result<Json<Page<UserOut>>, ApiError> {
    check_api_key(&state, &headers)?;
    let (page, page_size, offset) = paging(&params)?;

    let conn = state
        .db
        .lock()
        .map_err(|_| ApiError::Internal("db lock poisoned".to_string()))?;

    let count: u64 = conn
        .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    let mut stmt = conn
        .prepare("SELECT id, username, email FROM users ORDER BY id LIMIT ?1 OFFSET ?2")
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    let results = stmt
        .query_map(params![page_size, offset], |row| {
            Ok(UserOut {
                id: row.get(0)?,
                username: row.get(1)?,
                email: row.get(2)?,
            })
        })
        .and_then(Iterator::collect::<rusqlite::Result<Vec<_>>>)
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    Ok(Json(Page {
        count,
        page,
        page_size,
        results,
    }))
}

async fn list_preferences(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
) -> Result<Json<Page<PreferenceOut>>, ApiError> {
    check_api_key(&state, &headers)?;
    let (page, page_size, offset) = paging(&params)?;

    let conn = state
        .db
        .lock()
        .map_err(|_| ApiError::Internal("db lock poisoned".to_string()))?;

    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<PreferenceOut> {
        Ok(PreferenceOut {
            id: row.get(0)?,
            user_id: row.get(1)?,
            key: row.get(2)?,
            value: row.get(3)?,
        })
    };

    let (count, results) = if let Some(key) = &params.key {
        let count: u64 = conn
            .query_row(
                "SELECT COUNT(*) FROM user_preferences WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .map_err(|err| ApiError::Internal(err.to_string()))?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, key, value FROM user_preferences
                 WHERE key = ?1 ORDER BY id LIMIT ?2 OFFSET ?3",
            )
            .map_err(|err| ApiError::Internal(err.to_string()))?;
        let results = stmt
            .query_map(params![key, page_size, offset], map_row)
            .and_then(Iterator::collect::<rusqlite::Result<Vec<_>>>)
            .map_err(|err| ApiError::Internal(err.to_string()))?;
        (count, results)
    } else {
        let count: u64 = conn
            .query_row("SELECT COUNT(*) FROM user_preferences", [], |row| row.get(0))
            .map_err(|err| ApiError::Internal(err.to_string()))?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, key, value FROM user_preferences
                 ORDER BY id LIMIT ?1 OFFSET ?2",
            )
            .map_err(|err| ApiError::Internal(err.to_string()))?;
        let results = stmt
            .query_map(params![page_size, offset], map_row)
            .and_then(Iterator::collect::<rusqlite::Result<Vec<_>>>)
            .map_err(|err| ApiError::Internal(err.to_string()))?;
        (count, results)
    };

    Ok(Json(Page {
        count,
        page,
        page_size,
        results,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn seeded_state(api_key: Option<&str>) -> AppState {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        let state =
            AppState::new(conn, api_key.map(ToString::to_string)).expect("migrate schema");
        {
            let conn = state.db.lock().expect("lock");
            for i in 1..=25i64 {
                conn.execute(
                    "INSERT INTO users (id, username, email) VALUES (?1, ?2, ?3)",
                    params![i, format!("user{i:02}"), format!("user{i:02}@example.com")],
                )
                .expect("insert user");
            }
            for (user_id, key, value) in [
                (1, "pref-lang", "en"),
                (2, "pref-lang", "fr"),
                (2, "time_zone", "Europe/Paris"),
            ] {
                conn.execute(
                    "INSERT INTO user_preferences (user_id, key, value) VALUES (?1, ?2, ?3)",
                    params![user_id, key, value],
                )
                .expect("insert preference");
            }
        }
        state
    }

    async fn get_json(app: Router, uri: &str, api_key: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().uri(uri);
        if let Some(key) = api_key {
            builder = builder.header(API_KEY_HEADER, key);
        }
        let response = app
            .oneshot(builder.body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn users_default_page_size_is_ten() {
        let app = router(seeded_state(None));
        let (status, json) = get_json(app, "/users", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["count"], 25);
        assert_eq!(json["page"], 1);
        assert_eq!(json["page_size"], 10);
        assert_eq!(json["results"].as_array().expect("results").len(), 10);
        assert_eq!(json["results"][0]["username"], "user01");
    }

    #[tokio::test]
    async fn users_last_page_is_partial() {
        let app = router(seeded_state(None));
        let (status, json) = get_json(app, "/users?page=3", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["results"].as_array().expect("results").len(), 5);
        assert_eq!(json["results"][0]["id"], 21);
    }

    #[tokio::test]
    async fn preferences_filter_by_key() {
        let app = router(seeded_state(None));
        let (status, json) = get_json(app, "/user_preferences?key=pref-lang", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["count"], 2);
        let results = json["results"].as_array().expect("results");
        assert!(results.iter().all(|p| p["key"] == "pref-lang"));
    }

    #[tokio::test]
    async fn preferences_without_filter_list_everything() {
        let app = router(seeded_state(None));
        let (status, json) = get_json(app, "/user_preferences", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["count"], 3);
    }

    #[tokio::test]
    async fn api_key_is_enforced_when_configured() {
        let state = seeded_state(Some("sekrit"));

        let (status, _) = get_json(router(state.clone()), "/users", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = get_json(router(state.clone()), "/users", Some("wrong")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, json) = get_json(router(state), "/users", Some("sekrit")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["count"], 25);
    }

    #[tokio::test]
    async fn invalid_paging_is_a_bad_request() {
        let app = router(seeded_state(None));
        let (status, json) = get_json(app, "/users?page=0", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "BAD_REQUEST");

        let app = router(seeded_state(None));
        let (status, _) = get_json(app, "/users?page_size=9999", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn huge_page_numbers_page_past_the_end_without_overflow() {
        let app = router(seeded_state(None));
        let (status, json) = get_json(app, "/users?page=50000000&page_size=100", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["count"], 25);
        assert!(json["results"].as_array().expect("results").is_empty());

        let app = router(seeded_state(None));
        let uri = format!("/users?page={}&page_size=100", u32::MAX);
        let (status, json) = get_json(app, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["results"].as_array().expect("results").is_empty());
    }

    #[tokio::test]
    async fn health_needs_no_key() {
        let app = router(seeded_state(Some("sekrit")));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }
}
