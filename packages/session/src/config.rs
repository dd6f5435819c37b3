//! Session configuration, populated from environment variables and the
//! target system's JSON configuration file.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tapi::{Credentials, GrantType};

use crate::error::FileError;

/// Index page that lists the Swagger documents, relative to the server root.
pub const DEFAULT_SWAGGER_URL: &str = "/swaggerDoc/index.html";

pub const DEFAULT_PORT: u16 = 80;

/// Host names the workbench recognises: `localhost`, a short domain with an
/// optional path, or an IPv4 address.
static HOST_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^localhost$",
        r"^([a-zA-Z-]+.)?\w+\.[a-zA-Z-]{2}(/\w+)?$",
        r"^((25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)(\.|$)){4}$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("invalid host regex"))
    .collect()
});

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("{var}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// ApiServer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl FromStr for Protocol {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            other => Err(format!("unknown protocol {other:?}; expected http or https")),
        }
    }
}

/// Address of the API under test.
///
/// `host` may carry a path prefix after its first `/` (`server/api`); the
/// prefix is put in front of every request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiServer {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
}

impl Default for ApiServer {
    fn default() -> Self {
        Self {
            protocol: Protocol::Http,
            host: "localhost".into(),
            port: DEFAULT_PORT,
        }
    }
}

impl ApiServer {
    /// Host name and path prefix (empty when there is none).
    pub fn split_host(&self) -> (&str, &str) {
        match self.host.find('/') {
            Some(i) => (&self.host[..i], &self.host[i..]),
            None => (self.host.as_str(), ""),
        }
    }

    /// `protocol://host:port`, without the path prefix.
    pub fn origin(&self) -> String {
        let (host, _) = self.split_host();
        format!("{}://{}:{}", self.protocol.as_str(), host, self.port)
    }

    /// Full URL of `path` on this server, path prefix included.
    pub fn url_for(&self, path: &str) -> String {
        let (_, prefix) = self.split_host();
        format!("{}{}{}", self.origin(), prefix, path)
    }

    pub fn has_valid_host(&self) -> bool {
        HOST_RES.iter().any(|re| re.is_match(&self.host))
    }
}

// ---------------------------------------------------------------------------
// DbSettings
// ---------------------------------------------------------------------------

/// `Configuration.S5Db` of the target system's configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct S5DbSection {
    s5_user_name: String,
    agenda_db_name: String,
    document_db_name: String,
    system_db_name: String,
    sql_user_name: String,
    sql_server: String,
}

/// Where the agenda and system databases live and whose API key to use.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DbSettings {
    /// Directory holding one SQLite file per logical database.
    pub dir: Option<PathBuf>,
    pub server: String,
    pub user: String,
    pub password: String,
    pub agenda_db: String,
    /// Document database; defaults to `<agenda_db>_Doc`.
    pub doc_db: Option<String>,
    pub system_db: String,
    /// Operator's user name in the target system.
    pub s5_user: String,
}

impl DbSettings {
    pub fn doc_db_name(&self) -> String {
        match &self.doc_db {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("{}_Doc", self.agenda_db),
        }
    }

    /// First setting required for credential lookup that is still empty.
    pub fn missing_setting(&self) -> Option<&'static str> {
        [
            ("agenda database", &self.agenda_db),
            ("system database", &self.system_db),
            ("user name", &self.s5_user),
        ]
        .into_iter()
        .find(|(_, v)| v.is_empty())
        .map(|(name, _)| name)
    }

    /// Read the `Configuration.S5Db` section of the target system's
    /// configuration file. Fields it does not carry (password, directory)
    /// keep their current values.
    pub fn apply_config_json(&mut self, path: &str, contents: &[u8]) -> Result<(), FileError> {
        let not_parsed = |detail: &str| FileError::NotParsed {
            path: path.to_string(),
            detail: detail.to_string(),
        };
        let doc: Value = serde_json::from_slice(contents).map_err(|e| not_parsed(&e.to_string()))?;
        let section = doc
            .get("Configuration")
            .and_then(|c| c.get("S5Db"))
            .filter(|s| s.as_object().is_some_and(|o| !o.is_empty()))
            .cloned()
            .ok_or_else(|| not_parsed("no Configuration.S5Db section"))?;
        let section: S5DbSection =
            serde_json::from_value(section).map_err(|e| not_parsed(&e.to_string()))?;

        self.s5_user = section.s5_user_name;
        self.agenda_db = section.agenda_db_name;
        self.doc_db = Some(section.document_db_name).filter(|d| !d.is_empty());
        self.system_db = section.system_db_name;
        self.user = section.sql_user_name;
        self.server = section.sql_server;
        Ok(())
    }

    /// [`open_file`] followed by [`apply_config_json`](Self::apply_config_json).
    pub fn load_config_file(&mut self, path: impl AsRef<Path>) -> Result<(), FileError> {
        let path = path.as_ref();
        let contents = open_file(path)?;
        self.apply_config_json(&path.display().to_string(), &contents)
    }
}

/// Read a whole file. A missing or unopenable file is [`FileError::NotOpen`],
/// an empty one [`FileError::NotRead`].
pub fn open_file(path: impl AsRef<Path>) -> Result<Vec<u8>, FileError> {
    let path = path.as_ref();
    let display = path.display().to_string();
    let contents = std::fs::read(path).map_err(|e| FileError::NotOpen {
        path: display.clone(),
        detail: e.to_string(),
    })?;
    if contents.is_empty() {
        return Err(FileError::NotRead {
            path: display,
            detail: "file is empty".into(),
        });
    }
    Ok(contents)
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Runtime configuration for a session.
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | `TAPI_PROTOCOL` | `http` | `http` or `https` |
/// | `TAPI_HOST` | `localhost` | API host, optionally with a path prefix (`server/api`) |
/// | `TAPI_PORT` | `80` | API port |
/// | `TAPI_CLIENT_ID` | (empty) | OAuth client id |
/// | `TAPI_CLIENT_SECRET` | (empty) | OAuth client secret |
/// | `TAPI_GRANT_TYPE` | `client_credentials` | or `authorization_code` |
/// | `TAPI_SWAGGER_URL` | `/swaggerDoc/index.html` | Swagger index page |
/// | `TAPI_TEST_MODE` | `false` | Substitute canned replies, send nothing |
/// | `TAPI_DB_DIR` | (absent) | Directory of `<database>.db` SQLite files |
/// | `TAPI_SQL_SERVER` | (empty) | Database server name, informational |
/// | `TAPI_SQL_USER` | (empty) | Database user |
/// | `TAPI_SQL_PASSWORD` | (empty) | Database password |
/// | `TAPI_AGENDA_DB` | (empty) | Agenda database name |
/// | `TAPI_DOC_DB` | `<agenda>_Doc` | Document database name |
/// | `TAPI_SYSTEM_DB` | (empty) | System database name |
/// | `TAPI_S5_USER` | (empty) | Operator's user name for API key lookup |
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub server: ApiServer,
    pub credentials: Credentials,
    pub swagger_url: String,
    pub test_mode: bool,
    pub db: DbSettings,
}

impl SessionConfig {
    /// Populate config from environment variables, applying defaults where absent.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let text = |key: &str| get(key).unwrap_or_default();

        let protocol = match get("TAPI_PROTOCOL") {
            Some(p) => p.parse().map_err(|reason| ConfigError {
                var: "TAPI_PROTOCOL",
                reason,
            })?,
            None => Protocol::Http,
        };
        let port = match get("TAPI_PORT") {
            Some(p) => p.parse::<u16>().map_err(|e| ConfigError {
                var: "TAPI_PORT",
                reason: e.to_string(),
            })?,
            None => DEFAULT_PORT,
        };
        let grant_type = match get("TAPI_GRANT_TYPE") {
            Some(g) => g.parse::<GrantType>().map_err(|reason| ConfigError {
                var: "TAPI_GRANT_TYPE",
                reason,
            })?,
            None => GrantType::ClientCredentials,
        };
        let test_mode = get("TAPI_TEST_MODE")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);

        Ok(Self {
            server: ApiServer {
                protocol,
                host: get("TAPI_HOST").unwrap_or_else(|| "localhost".into()),
                port,
            },
            credentials: Credentials {
                client_id: text("TAPI_CLIENT_ID"),
                client_secret: text("TAPI_CLIENT_SECRET"),
                grant_type,
            },
            swagger_url: get("TAPI_SWAGGER_URL").unwrap_or_else(|| DEFAULT_SWAGGER_URL.into()),
            test_mode,
            db: DbSettings {
                dir: get("TAPI_DB_DIR").map(PathBuf::from),
                server: text("TAPI_SQL_SERVER"),
                user: text("TAPI_SQL_USER"),
                password: text("TAPI_SQL_PASSWORD"),
                agenda_db: text("TAPI_AGENDA_DB"),
                doc_db: get("TAPI_DOC_DB"),
                system_db: text("TAPI_SYSTEM_DB"),
                s5_user: text("TAPI_S5_USER"),
            },
        })
    }

    /// Test-mode configuration against the default server.
    pub fn test_mode() -> Self {
        Self {
            swagger_url: DEFAULT_SWAGGER_URL.into(),
            test_mode: true,
            ..Self::default()
        }
    }
}
