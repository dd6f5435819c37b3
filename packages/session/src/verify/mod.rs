//! Cross-checking API results against the database of record.
//!
//! After a mutation the API reports the IDs of the records it touched. The
//! verifier counts those IDs in the backing table, live (`Deleted = 0`) and
//! logically deleted (`Deleted = 1`), and decides whether the database agrees
//! with what the API claimed.
//!
//! The same connection layer looks up the operator's API key, so the token
//! request can be made without typing credentials.
//!
//! # Implementations
//!
//! | Type | When to use |
//! |------|-------------|
//! | [`SqliteExecutor`] | One SQLite file (or registered connection) per logical database |
//!
//! [`SqliteExecutor`]: sqlite::SqliteExecutor

pub mod sqlite;

use async_trait::async_trait;
use tapi::tables;
use tapi::{Credentials, GrantType, HttpMethod};
use tracing::{info, warn};

use crate::config::DbSettings;
use crate::error::{ConnectionError, VerificationError};

/// Runs single-row queries against named logical databases.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// First row of `sql` with `?` placeholders bound to `params`, each column
    /// rendered as text (`NULL` as empty). `None` when there is no row.
    async fn query_row(
        &self,
        database: &str,
        sql: &str,
        params: &[String],
    ) -> Result<Option<Vec<String>>, ConnectionError>;
}

/// Outcome of verifying one communication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerificationState {
    #[default]
    Unknown,
    Verified,
    NotVerified,
    /// The database could not be queried.
    NotVerifiedError,
}

impl std::fmt::Display for VerificationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            VerificationState::Unknown => "unknown",
            VerificationState::Verified => "verified",
            VerificationState::NotVerified => "not verified",
            VerificationState::NotVerifiedError => "not verified (database error)",
        })
    }
}

/// Database holding `table`: the agenda, or the document database for
/// tables flagged as such.
pub fn database_for(table: &str, db: &DbSettings) -> String {
    if tables::is_doc_table(table) {
        db.doc_db_name()
    } else {
        db.agenda_db.clone()
    }
}

/// `SELECT` with two counts over `ids` in `table`: live and deleted.
fn count_query(table: &str, ids: usize) -> String {
    let placeholders = vec!["?"; ids].join(",");
    let core = format!("SELECT COUNT(*) FROM {table} WHERE ID IN ({placeholders}) AND Deleted = ");
    format!("SELECT ({core}0), ({core}1)")
}

/// Check that the records a mutation reported are in the expected state.
///
/// - POST and PUT: every ID is live.
/// - DELETE: no ID is live, and either none remain at all (physical delete)
///   or all are marked deleted (logical delete).
///
/// Other methods, and an empty ID list, are never verified.
pub async fn verify_table_records(
    executor: &dyn QueryExecutor,
    db: &DbSettings,
    table: &str,
    ids: &[String],
    method: HttpMethod,
) -> VerificationState {
    if ids.is_empty() || !matches!(method, HttpMethod::Post | HttpMethod::Put | HttpMethod::Delete)
    {
        return VerificationState::NotVerified;
    }

    let database = database_for(table, db);
    let sql = count_query(table, ids.len());
    let params: Vec<String> = ids.iter().chain(ids.iter()).cloned().collect();

    let row = match executor.query_row(&database, &sql, &params).await {
        Ok(Some(row)) => row,
        Ok(None) => return VerificationState::NotVerifiedError,
        Err(e) => {
            warn!("verify: {table} in {database}: {e}");
            return VerificationState::NotVerifiedError;
        }
    };
    let count = |i: usize| row.get(i).and_then(|c| c.parse::<usize>().ok());
    let (Some(live), Some(deleted)) = (count(0), count(1)) else {
        return VerificationState::NotVerifiedError;
    };

    let n = ids.len();
    let verified = match method {
        HttpMethod::Post | HttpMethod::Put => live == n,
        HttpMethod::Delete => live == 0 && (deleted == 0 || deleted == n),
        HttpMethod::Get => false,
    };
    info!("verify: {table} {method} ids={n} live={live} deleted={deleted} verified={verified}");

    if verified {
        VerificationState::Verified
    } else {
        VerificationState::NotVerified
    }
}

/// Look up the operator's newest API key: user ID from the system database,
/// then client id, secret and grant type from the agenda.
pub async fn load_credentials(
    executor: &dyn QueryExecutor,
    db: &DbSettings,
) -> Result<Credentials, VerificationError> {
    if let Some(missing) = db.missing_setting() {
        return Err(VerificationError::MissingSetting(missing));
    }

    let user = executor
        .query_row(
            &db.system_db,
            "SELECT ID FROM System_Users WHERE userName = ? AND Deleted = 0 LIMIT 1",
            &[db.s5_user.clone()],
        )
        .await?
        .and_then(|row| row.into_iter().next())
        .ok_or_else(|| VerificationError::UserNotFound(db.s5_user.clone()))?;

    let row = executor
        .query_row(
            &db.agenda_db,
            "SELECT ClientID, ClientSecret, TypOvereni FROM CSWSystem_UsersAPIKeys \
             WHERE User_ID = ? AND Deleted = 0 ORDER BY Create_Date DESC LIMIT 1",
            &[user],
        )
        .await?
        .ok_or_else(|| VerificationError::ApiKeyNotFound(db.s5_user.clone()))?;

    let [client_id, client_secret, grant] = <[String; 3]>::try_from(row)
        .map_err(|_| VerificationError::ApiKeyNotFound(db.s5_user.clone()))?;
    let grant_type = grant
        .parse::<i64>()
        .ok()
        .and_then(GrantType::from_index)
        .unwrap_or_default();

    info!("verify: loaded API key for {}", db.s5_user);
    Ok(Credentials {
        client_id,
        client_secret,
        grant_type,
    })
}

#[cfg(test)]
mod tests {
    use super::sqlite::SqliteExecutor;
    use super::*;
    use rusqlite::Connection;

    const A: &str = "7c9e6679-7425-40de-944b-e07fc1f90ae7";
    const B: &str = "1b4e28ba-2fa1-41d2-883f-0016d3cca427";

    fn settings() -> DbSettings {
        DbSettings {
            agenda_db: "Agenda".into(),
            system_db: "System".into(),
            s5_user: "admin".into(),
            ..DbSettings::default()
        }
    }

    fn agenda(rows: &[(&str, i64)]) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE Adresar_Firma (ID TEXT PRIMARY KEY, Deleted INTEGER NOT NULL);
             CREATE TABLE CSWSystem_UsersAPIKeys (
                User_ID TEXT, ClientID TEXT, ClientSecret TEXT, TypOvereni INTEGER,
                Deleted INTEGER, Create_Date TEXT);",
        )
        .unwrap();
        for (id, deleted) in rows {
            conn.execute(
                "INSERT INTO Adresar_Firma (ID, Deleted) VALUES (?1, ?2)",
                rusqlite::params![id, deleted],
            )
            .unwrap();
        }
        conn
    }

    fn executor(rows: &[(&str, i64)]) -> SqliteExecutor {
        let ex = SqliteExecutor::in_memory();
        ex.register("Agenda", agenda(rows));
        ex
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn post_verified_when_all_live() {
        let ex = executor(&[(A, 0), (B, 0)]);
        let state =
            verify_table_records(&ex, &settings(), "Adresar_Firma", &ids(&[A, B]), HttpMethod::Post)
                .await;
        assert_eq!(state, VerificationState::Verified);
    }

    #[tokio::test]
    async fn put_not_verified_when_one_missing() {
        let ex = executor(&[(A, 0)]);
        let state =
            verify_table_records(&ex, &settings(), "Adresar_Firma", &ids(&[A, B]), HttpMethod::Put)
                .await;
        assert_eq!(state, VerificationState::NotVerified);
    }

    #[tokio::test]
    async fn delete_logical_and_physical() {
        let table = "Adresar_Firma";
        let logical = executor(&[(A, 1), (B, 1)]);
        let physical = executor(&[]);
        let partial = executor(&[(A, 1)]);
        let s = settings();
        let both = ids(&[A, B]);
        assert_eq!(
            verify_table_records(&logical, &s, table, &both, HttpMethod::Delete).await,
            VerificationState::Verified
        );
        assert_eq!(
            verify_table_records(&physical, &s, table, &both, HttpMethod::Delete).await,
            VerificationState::Verified
        );
        assert_eq!(
            verify_table_records(&partial, &s, table, &both, HttpMethod::Delete).await,
            VerificationState::NotVerified
        );
    }

    #[tokio::test]
    async fn get_and_empty_ids_never_verified() {
        let ex = executor(&[(A, 0)]);
        let s = settings();
        assert_eq!(
            verify_table_records(&ex, &s, "Adresar_Firma", &ids(&[A]), HttpMethod::Get).await,
            VerificationState::NotVerified
        );
        assert_eq!(
            verify_table_records(&ex, &s, "Adresar_Firma", &[], HttpMethod::Post).await,
            VerificationState::NotVerified
        );
    }

    #[tokio::test]
    async fn query_failure_is_error_state() {
        let ex = executor(&[]);
        let state =
            verify_table_records(&ex, &settings(), "Missing_Table", &ids(&[A]), HttpMethod::Post)
                .await;
        assert_eq!(state, VerificationState::NotVerifiedError);

        // doc table lives in Agenda_Doc, which is not registered
        let state = verify_table_records(
            &ex,
            &settings(),
            "System_Attachment",
            &ids(&[A]),
            HttpMethod::Post,
        )
        .await;
        assert_eq!(state, VerificationState::NotVerifiedError);
    }

    #[tokio::test]
    async fn verification_is_idempotent() {
        let ex = executor(&[(A, 0)]);
        let s = settings();
        let first =
            verify_table_records(&ex, &s, "Adresar_Firma", &ids(&[A]), HttpMethod::Post).await;
        let second =
            verify_table_records(&ex, &s, "Adresar_Firma", &ids(&[A]), HttpMethod::Post).await;
        assert_eq!(first, second);
    }

    #[test]
    fn doc_tables_use_doc_database() {
        let mut s = settings();
        assert_eq!(database_for("System_Attachment", &s), "Agenda_Doc");
        s.doc_db = Some("Documents".into());
        assert_eq!(database_for("System_Attachment", &s), "Documents");
        assert_eq!(database_for("Adresar_Firma", &s), "Agenda");
    }

    #[tokio::test]
    async fn credentials_from_newest_key() {
        let system = Connection::open_in_memory().unwrap();
        system
            .execute_batch(
                "CREATE TABLE System_Users (ID TEXT, userName TEXT, Deleted INTEGER);
                 INSERT INTO System_Users VALUES ('u-1', 'admin', 0);",
            )
            .unwrap();
        let agenda = agenda(&[]);
        agenda
            .execute_batch(
                "INSERT INTO CSWSystem_UsersAPIKeys VALUES
                    ('u-1', 'old-id', 'old-secret', 0, 0, '2020-01-01'),
                    ('u-1', 'new-id', 'new-secret', 1, 0, '2021-01-01'),
                    ('u-1', 'gone-id', 'gone-secret', 0, 1, '2022-01-01');",
            )
            .unwrap();

        let ex = SqliteExecutor::in_memory();
        ex.register("System", system);
        ex.register("Agenda", agenda);

        let c = load_credentials(&ex, &settings()).await.unwrap();
        assert_eq!(c.client_id, "new-id");
        assert_eq!(c.client_secret, "new-secret");
        assert_eq!(c.grant_type, GrantType::AuthorizationCode);
    }

    #[tokio::test]
    async fn credentials_need_settings_and_user() {
        let ex = SqliteExecutor::in_memory();
        let err = load_credentials(&ex, &DbSettings::default()).await.unwrap_err();
        assert!(matches!(err, VerificationError::MissingSetting(_)));

        let system = Connection::open_in_memory().unwrap();
        system
            .execute_batch("CREATE TABLE System_Users (ID TEXT, userName TEXT, Deleted INTEGER);")
            .unwrap();
        ex.register("System", system);
        let err = load_credentials(&ex, &settings()).await.unwrap_err();
        assert!(matches!(err, VerificationError::UserNotFound(_)));
    }
}
