//! Shared helpers for the TAPI conformance test suite.
//!
//! Provides [`spawn_mock_api`]: an in-process imitation of the S5 API bound
//! to an ephemeral port. It serves the token, endpoint list and Swagger
//! routes from the session crate's fixtures, and a `Company` resource whose
//! records live in a real SQLite file, so that database verification can be
//! exercised end to end with [`tapi_session::SqliteExecutor`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Form, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rusqlite::{params, Connection};
use serde_json::{json, Map, Value};
use tapi_session::fixtures;

pub const CLIENT_ID: &str = "conformance";
pub const CLIENT_SECRET: &str = "s3cret";
pub const ACCESS_TOKEN: &str = "mock-token";
pub const OPERATOR: &str = "operator";

/// Delay of `GET /v1.0/Person`, for out-of-order delivery tests.
pub const SLOW_DELAY: Duration = Duration::from_millis(150);

/// One request as the mock received it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub authorization: Option<String>,
    pub body: Value,
}

pub struct MockState {
    agenda: Mutex<Connection>,
    recorded: Mutex<Vec<Recorded>>,
    /// Acknowledge writes without storing them.
    pub drop_writes: AtomicBool,
}

impl MockState {
    pub fn recorded(&self) -> Vec<Recorded> {
        self.recorded.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn last(&self) -> Option<Recorded> {
        self.recorded().pop()
    }

    /// Insert a live company directly, bypassing the API.
    pub fn seed_company(&self, name: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let conn = self.agenda.lock().expect("agenda lock");
        conn.execute(
            "INSERT INTO Adresar_Firma (ID, Name, Code, Deleted) VALUES (?1, ?2, '', 0)",
            params![id, name],
        )
        .expect("seed company");
        id
    }

    fn record(
        &self,
        method: &str,
        path: &str,
        query: &HashMap<String, String>,
        headers: &HeaderMap,
        body: Value,
    ) {
        let authorization = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if let Ok(mut r) = self.recorded.lock() {
            r.push(Recorded {
                method: method.into(),
                path: path.into(),
                query: query.clone(),
                authorization,
                body,
            });
        }
    }
}

/// A running mock API. Its database directory is removed on drop.
pub struct MockApi {
    /// `http://127.0.0.1:<port>`
    pub base_url: String,
    pub host: String,
    pub port: u16,
    /// Directory holding `Agenda.db` and `System.db`.
    pub db_dir: PathBuf,
    pub state: Arc<MockState>,
}

impl Drop for MockApi {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.db_dir) {
            eprintln!("mock API: cannot remove {}: {e}", self.db_dir.display());
        }
    }
}

/// Start an ephemeral mock API in a background `tokio` task.
///
/// # Panics
///
/// Panics if the listener cannot be bound or the databases cannot be created.
pub async fn spawn_mock_api() -> MockApi {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("get local addr");

    let db_dir = std::env::temp_dir().join(format!("tapi-conformance-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&db_dir).expect("create database dir");
    let agenda = create_databases(&db_dir);

    let state = Arc::new(MockState {
        agenda: Mutex::new(agenda),
        recorded: Mutex::new(Vec::new()),
        drop_writes: AtomicBool::new(false),
    });
    let router = build_router(Arc::clone(&state));

    tokio::spawn(async move {
        axum::serve(listener, router)
            .await
            .expect("mock API error");
    });

    MockApi {
        base_url: format!("http://{addr}"),
        host: addr.ip().to_string(),
        port: addr.port(),
        db_dir,
        state,
    }
}

fn create_databases(dir: &std::path::Path) -> Connection {
    let system = Connection::open(dir.join("System.db")).expect("open System.db");
    system
        .execute_batch(
            "CREATE TABLE System_Users (ID TEXT, userName TEXT, Deleted INTEGER NOT NULL);
             INSERT INTO System_Users VALUES ('u-1', 'operator', 0);",
        )
        .expect("create System.db");

    let agenda = Connection::open(dir.join("Agenda.db")).expect("open Agenda.db");
    agenda
        .execute_batch(&format!(
            "CREATE TABLE Adresar_Firma (
                 ID TEXT PRIMARY KEY, Name TEXT, Code TEXT, Deleted INTEGER NOT NULL);
             CREATE TABLE CSWSystem_UsersAPIKeys (
                 User_ID TEXT, ClientID TEXT, ClientSecret TEXT, TypOvereni INTEGER,
                 Create_Date TEXT, Deleted INTEGER NOT NULL);
             INSERT INTO CSWSystem_UsersAPIKeys VALUES
                 ('u-1', 'old', 'old', 0, '2020-01-01', 0),
                 ('u-1', '{CLIENT_ID}', '{CLIENT_SECRET}', 0, '2024-01-01', 0);"
        ))
        .expect("create Agenda.db");
    agenda
}

fn build_router(state: Arc<MockState>) -> Router {
    Router::new()
        .route("/", get(|| async { Html("<html><body>S5 API</body></html>") }))
        .route("/connect/token", post(token))
        .route("/Admin/Roles/Endpoints", get(|| async { json_text(fixtures::ENDPOINTS) }))
        .route("/swaggerDoc/index.html", get(|| async { Html(fixtures::SWAGGER_INDEX) }))
        .route(
            "/swagger/v1.0/swagger.json",
            get(|| async { json_text(fixtures::SWAGGER_DOCUMENT) }),
        )
        .route("/v1.0/Company", get(list_companies).post(create_companies))
        .route(
            "/v1.0/Company/{id}",
            get(get_company).put(update_company).delete(delete_company),
        )
        .route("/v1.0/Person", get(list_persons))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn token(Form(form): Form<HashMap<String, String>>) -> Response {
    let field = |k: &str| form.get(k).map(String::as_str).unwrap_or("");
    if field("client_id") != CLIENT_ID
        || field("client_secret") != CLIENT_SECRET
        || field("scope") != tapi::token::SCOPE
    {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid_client" }))).into_response();
    }
    Json(json!({
        "access_token": ACCESS_TOKEN,
        "token_type": "Bearer",
        "expires_in": 3600,
    }))
    .into_response()
}

async fn list_companies(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.record("GET", "/v1.0/Company", &query, &headers, Value::Null);
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let select = query.get("select.Properties").map(String::as_str);
    let records: Vec<Value> = query_companies(&state, None)
        .into_iter()
        .map(|r| project(r, select))
        .collect();
    let n = records.len();
    ok(Value::Array(records), Some(n), None)
}

async fn get_company(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.record("GET", &format!("/v1.0/Company/{id}"), &query, &headers, Value::Null);
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let select = query.get("select.Properties").map(String::as_str);
    match query_companies(&state, Some(&id)).pop() {
        Some(r) => ok(json!([project(r, select)]), Some(1), None),
        None => not_found(),
    }
}

async fn create_companies(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.record("POST", "/v1.0/Company", &HashMap::new(), &headers, body.clone());
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let Some(items) = body.as_array() else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let mut ids = Vec::new();
    for item in items {
        let id = uuid::Uuid::new_v4().to_string();
        if !state.drop_writes.load(Ordering::SeqCst) {
            write_company(&state, &id, item, true);
        }
        ids.push(id);
    }
    let n = ids.len();
    ok(json!(ids), Some(n), Some("Records were created."))
}

async fn update_company(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    state.record("PUT", &format!("/v1.0/Company/{id}"), &HashMap::new(), &headers, body.clone());
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if query_companies(&state, Some(&id)).is_empty() {
        return not_found();
    }
    let item = body.get(0).cloned().unwrap_or(Value::Null);
    if !state.drop_writes.load(Ordering::SeqCst) {
        write_company(&state, &id, &item, false);
    }
    ok(json!([id]), Some(1), Some("Record was updated."))
}

async fn delete_company(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.record("DELETE", &format!("/v1.0/Company/{id}"), &query, &headers, Value::Null);
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if !state.drop_writes.load(Ordering::SeqCst) && !mark_deleted(&state, &id) {
        return not_found();
    }
    ok(json!(id), None, Some("Record was deleted."))
}

async fn list_persons(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.record("GET", "/v1.0/Person", &query, &headers, Value::Null);
    tokio::time::sleep(SLOW_DELAY).await;
    ok(json!([]), Some(0), None)
}

// --- helpers -----------------------------------------------------------------

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {ACCESS_TOKEN}"))
}

fn json_text(text: &'static str) -> Response {
    ([("content-type", "application/json")], text).into_response()
}

fn ok(data: Value, row_count: Option<usize>, message: Option<&str>) -> Response {
    let mut body = Map::new();
    body.insert("Data".into(), data);
    if let Some(n) = row_count {
        body.insert("PageCount".into(), json!(1));
        body.insert("RowCount".into(), json!(n));
    }
    body.insert("Status".into(), json!("OK"));
    body.insert("Message".into(), message.map_or(Value::Null, |m| json!(m)));
    Json(Value::Object(body)).into_response()
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "Status": "Error", "Message": "Record not found." })),
    )
        .into_response()
}

fn query_companies(state: &MockState, id: Option<&str>) -> Vec<Value> {
    let Ok(conn) = state.agenda.lock() else {
        return Vec::new();
    };
    let Ok(mut stmt) = conn.prepare(
        "SELECT ID, Name, Code FROM Adresar_Firma \
         WHERE Deleted = 0 AND (?1 IS NULL OR ID = ?1) ORDER BY Name",
    ) else {
        return Vec::new();
    };
    let records = stmt
        .query_map(params![id], |row| {
            Ok(json!({
                "ID": row.get::<_, String>(0)?,
                "Name": row.get::<_, Option<String>>(1)?,
                "Code": row.get::<_, Option<String>>(2)?,
            }))
        })
        .map(|rows| rows.filter_map(Result::ok).collect())
        .unwrap_or_default();
    records
}

/// Logical delete. False when no live record has `id`.
fn mark_deleted(state: &MockState, id: &str) -> bool {
    let Ok(conn) = state.agenda.lock() else {
        return false;
    };
    conn.execute(
        "UPDATE Adresar_Firma SET Deleted = 1 WHERE ID = ?1 AND Deleted = 0",
        params![id],
    )
    .is_ok_and(|n| n == 1)
}

fn write_company(state: &MockState, id: &str, item: &Value, insert: bool) {
    let text = |k: &str| item.get(k).and_then(Value::as_str).map(str::to_string);
    let Ok(conn) = state.agenda.lock() else {
        return;
    };
    let result = if insert {
        conn.execute(
            "INSERT INTO Adresar_Firma (ID, Name, Code, Deleted) VALUES (?1, ?2, ?3, 0)",
            params![id, text("Name"), text("Code")],
        )
    } else {
        conn.execute(
            "UPDATE Adresar_Firma SET Name = COALESCE(?2, Name), Code = COALESCE(?3, Code) \
             WHERE ID = ?1",
            params![id, text("Name"), text("Code")],
        )
    };
    if let Err(e) = result {
        eprintln!("mock: writing company {id}: {e}");
    }
}

/// Keep only the comma-separated `select` fields of a record.
fn project(record: Value, select: Option<&str>) -> Value {
    let (Some(select), Value::Object(map)) = (select, &record) else {
        return record;
    };
    let keep: Vec<&str> = select.split(',').map(str::trim).collect();
    let projected: Map<String, Value> = map
        .iter()
        .filter(|(k, _)| keep.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Value::Object(projected)
}
