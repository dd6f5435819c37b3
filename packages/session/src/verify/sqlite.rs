//! SQLite-backed query executor.
//!
//! Each logical database name maps to its own `rusqlite` connection, wrapped
//! in an `Arc<Mutex<Connection>>` to satisfy `Send + Sync`. Connections are
//! either registered up front or opened read-only from `<dir>/<name>.db` on
//! first use. All blocking calls are offloaded via
//! `tokio::task::spawn_blocking`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use tracing::debug;

use super::QueryExecutor;
use crate::error::ConnectionError;

type Shared = Arc<Mutex<Connection>>;

pub struct SqliteExecutor {
    dir: Option<PathBuf>,
    connections: Mutex<HashMap<String, Shared>>,
}

impl SqliteExecutor {
    /// Open databases from `dir` on demand.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Only registered connections are available.
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Make `conn` available under `name`, replacing any earlier one.
    pub fn register(&self, name: &str, conn: Connection) {
        if let Ok(mut map) = self.connections.lock() {
            map.insert(name.to_string(), Arc::new(Mutex::new(conn)));
        }
    }

    fn connection(&self, database: &str) -> Result<Shared, ConnectionError> {
        let mut map = self
            .connections
            .lock()
            .map_err(|_| map_err(database, "connection registry poisoned"))?;
        if let Some(conn) = map.get(database) {
            return Ok(Arc::clone(conn));
        }

        let dir = self
            .dir
            .as_ref()
            .ok_or_else(|| map_err(database, "unknown database"))?;
        let path = dir.join(format!("{database}.db"));
        debug!("verify: opening {}", path.display());
        let conn = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| map_err(database, e))?;
        let conn = Arc::new(Mutex::new(conn));
        map.insert(database.to_string(), Arc::clone(&conn));
        Ok(conn)
    }
}

// ---------------------------------------------------------------------------
// Error conversions
// ---------------------------------------------------------------------------

fn map_err(database: &str, e: impl std::fmt::Display) -> ConnectionError {
    ConnectionError::Database {
        database: database.to_string(),
        detail: e.to_string(),
    }
}

fn column_text(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) | ValueRef::Blob(t) => String::from_utf8_lossy(t).into_owned(),
    }
}

// ---------------------------------------------------------------------------
// QueryExecutor impl
// ---------------------------------------------------------------------------

#[async_trait]
impl QueryExecutor for SqliteExecutor {
    async fn query_row(
        &self,
        database: &str,
        sql: &str,
        params: &[String],
    ) -> Result<Option<Vec<String>>, ConnectionError> {
        let conn = self.connection(database)?;
        let database = database.to_string();
        let sql = sql.to_string();
        let params = params.to_vec();

        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| map_err(&database, "connection poisoned"))?;
            let mut stmt = conn.prepare(&sql).map_err(|e| map_err(&database, e))?;
            let columns = stmt.column_count();
            let mut rows = stmt
                .query(params_from_iter(params.iter()))
                .map_err(|e| map_err(&database, e))?;

            let first = match rows.next().map_err(|e| map_err(&database, e))? {
                Some(row) => {
                    let mut out = Vec::with_capacity(columns);
                    for i in 0..columns {
                        let value = row.get_ref(i).map_err(|e| map_err(&database, e))?;
                        out.push(column_text(value));
                    }
                    Ok(Some(out))
                }
                None => Ok(None),
            };
            first
        })
        .await
        .map_err(|e| ConnectionError::Database {
            database: String::new(),
            detail: format!("query task failed: {e}"),
        })?
    }
}
