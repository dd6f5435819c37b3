//! The session orchestrator.
//!
//! A [`Session`] owns everything one operator works with: the server address
//! and credentials, the current token, the endpoint catalog, and the
//! communication log. Requests are built with [`Session::prepare_request`],
//! sent with [`Session::dispatch`], and their replies correlated back by ID
//! with [`Session::next_reply`] / [`Session::wait_for`]. The workflow methods
//! (`request_token`, `discover_endpoints`, `discover_schema`, `send_general`)
//! chain those steps with the matching parse step.
//!
//! # Test mode
//!
//! With [`SessionConfig::test_mode`] set, requests are still built and logged
//! but never sent. Each parse step stores a canned reply with status
//! [`ReplyStatus::Test`] and parses that instead.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, LazyLock};

use chrono::Utc;
use regex::Regex;
use serde_json::Value;
use tapi::tables;
use tapi::{
    Catalog, Communication, CommunicationLog, ContentType, CorrelationId, Credentials, Endpoint,
    HttpMethod, RawReply, ReplyStatus, Request, RequestPurpose, Response, Selection,
    StateAttributes, Token,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{
    ConnectionError, DiscoveryError, FileError, RequestError, SessionError, VerificationError,
};
use crate::fixtures;
use crate::transport::Transport;
use crate::verify::{self, QueryExecutor, VerificationState};

pub const USER_AGENT: &str = "TAPI";
pub const TOKEN_PATH: &str = "/connect/token";
pub const ENDPOINTS_PATH: &str = "/Admin/Roles/Endpoints";

/// Query parameter carrying the select clause, by path marker. First match
/// wins; the empty marker matches every path.
const SELECT_PARAMS: &[(&str, &str)] = &[("/v2.0", "select"), ("", "select.Properties")];

/// The `urls` array embedded in the Swagger UI index page.
static SWAGGER_URLS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""urls":\[\{.+\}\]"#).expect("invalid swagger urls regex"));

/// Everything [`Session::prepare_request`] needs to build one request.
#[derive(Debug, Clone)]
pub struct RequestParts {
    pub method: HttpMethod,
    /// Path below the server root, with a leading `/`, or empty for the root.
    pub path: String,
    pub content_type: Option<ContentType>,
    pub accept: Option<ContentType>,
    pub purpose: RequestPurpose,
    pub auth_required: bool,
    pub body: Vec<u8>,
    pub query: Vec<(String, String)>,
}

impl RequestParts {
    pub fn new(method: HttpMethod, path: impl Into<String>, purpose: RequestPurpose) -> Self {
        Self {
            method,
            path: path.into(),
            content_type: None,
            accept: None,
            purpose,
            auth_required: false,
            body: Vec::new(),
            query: Vec::new(),
        }
    }
}

/// An operator's general request.
#[derive(Debug, Clone)]
pub struct GeneralRequest {
    pub method: HttpMethod,
    /// Path as typed; empty means the selected endpoint's path with its
    /// parameter values substituted.
    pub path: String,
    pub accept: Option<ContentType>,
    /// Select clause typed by the operator, replacing the endpoint's own.
    pub select: Option<String>,
}

impl GeneralRequest {
    pub fn new(method: HttpMethod) -> Self {
        Self {
            method,
            path: String::new(),
            accept: Some(ContentType::Json),
            select: None,
        }
    }
}

pub struct Session {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    executor: Option<Arc<dyn QueryExecutor>>,
    catalog: Catalog,
    log: CommunicationLog,
    token: Token,
    dispatched: HashSet<CorrelationId>,
    verification: HashMap<CorrelationId, VerificationState>,
    replies_tx: mpsc::UnboundedSender<RawReply>,
    replies_rx: mpsc::UnboundedReceiver<RawReply>,
}

impl Session {
    pub fn new(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        Self {
            config,
            transport,
            executor: None,
            catalog: Catalog::new(),
            log: CommunicationLog::new(),
            token: Token::default(),
            dispatched: HashSet::new(),
            verification: HashMap::new(),
            replies_tx,
            replies_rx,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn QueryExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut SessionConfig {
        &mut self.config
    }

    pub fn in_test_mode(&self) -> bool {
        self.config.test_mode
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }

    pub fn log(&self) -> &CommunicationLog {
        &self.log
    }

    pub fn communication(&self, id: CorrelationId) -> Option<&Communication> {
        self.log.get(id)
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn set_token(&mut self, token: Token) {
        self.token = token;
    }

    pub fn verification_state(&self, id: CorrelationId) -> VerificationState {
        self.verification.get(&id).copied().unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Building and correlating
    // -----------------------------------------------------------------------

    /// Build a request and append it to the log under the next ID.
    ///
    /// Authorization is attached only when required, outside test mode, and
    /// when a complete token is held. A complete token that has expired
    /// fails the build and consumes no ID.
    pub fn prepare_request(&mut self, parts: RequestParts) -> Result<CorrelationId, RequestError> {
        let authorize = parts.auth_required && !self.config.test_mode && self.token.is_complete();
        if authorize && self.token.is_expired(Utc::now()) {
            warn!("session: token expired, {} {} not built", parts.method, parts.path);
            return Err(RequestError::TokenExpired);
        }

        let mut url = self.config.server.url_for(&parts.path);
        if !parts.query.is_empty() {
            let query: Vec<String> = parts
                .query
                .iter()
                .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
                .collect();
            url.push('?');
            url.push_str(&query.join("&"));
        }

        let id = self.log.next_id();
        let mut request = Request::new(id, parts.purpose, parts.method, url)
            .with_header("User-Agent", USER_AGENT);
        if authorize {
            request = request.with_header("Authorization", self.token.authorization());
        }
        let request = request
            .with_content_type(parts.content_type)
            .with_accept(parts.accept)
            .with_body(parts.body);

        info!(
            "session: #{id} {} {} ({})",
            request.method(),
            request.url(),
            request.purpose()
        );
        Ok(self.log.push(request))
    }

    /// Send a logged request in the background. Its reply arrives through
    /// [`next_reply`](Self::next_reply). In test mode nothing is sent.
    /// A request that is already in flight or answered is not sent again.
    pub fn dispatch(&mut self, id: CorrelationId) -> Result<(), RequestError> {
        let comm = self.log.get(id).ok_or(RequestError::UnknownId(id))?;
        if !comm.is_pending() || self.dispatched.contains(&id) {
            debug!("session: #{id} already sent");
            return Ok(());
        }
        let request = comm.request().clone();
        if self.config.test_mode {
            debug!("session: #{id} not sent (test mode)");
            return Ok(());
        }

        self.dispatched.insert(id);
        let transport = Arc::clone(&self.transport);
        let tx = self.replies_tx.clone();
        tokio::spawn(async move {
            let reply = transport.send(&request).await;
            // the receiver lives as long as the session
            let _ = tx.send(reply);
        });
        Ok(())
    }

    /// Wait for the next reply from any dispatched request and store it.
    /// Returns the ID it was stored under, or `None` if it matched nothing.
    pub async fn next_reply(&mut self) -> Option<CorrelationId> {
        let raw = self.replies_rx.recv().await?;
        let id = raw.id;
        self.accept_reply(raw).then_some(id)
    }

    /// Keep storing replies until the one for `id` has arrived. Replies for
    /// other requests that arrive first are stored on the way.
    pub async fn wait_for(&mut self, id: CorrelationId) -> Result<(), RequestError> {
        let comm = self.log.get(id).ok_or(RequestError::UnknownId(id))?;
        if !comm.is_pending() {
            return Ok(());
        }
        if !self.dispatched.contains(&id) {
            return Err(RequestError::NotDispatched(id));
        }
        loop {
            let raw = self.replies_rx.recv().await.ok_or(RequestError::NoReply(id))?;
            let got = raw.id;
            self.accept_reply(raw);
            if got == id {
                return Ok(());
            }
        }
    }

    /// Store a raw reply into the communication with the same ID.
    pub fn accept_reply(&mut self, raw: RawReply) -> bool {
        let id = raw.id;
        let Some(comm) = self.log.get_mut(id) else {
            warn!("session: reply for unknown #{id} dropped");
            return false;
        };
        let status = raw.status;
        if !comm.store_reply(Response::from_raw(raw)) {
            warn!("session: second reply for #{id} dropped");
            return false;
        }
        self.dispatched.remove(&id);
        info!("session: #{id} replied {status}");
        true
    }

    /// Dispatch and wait, or do nothing in test mode.
    async fn complete(&mut self, id: CorrelationId) -> Result<(), RequestError> {
        if self.config.test_mode {
            return Ok(());
        }
        self.dispatch(id)?;
        self.wait_for(id).await
    }

    /// In test mode, store `body` as the reply to `id`.
    fn substitute_test_reply(&mut self, id: CorrelationId, body: &str) -> Result<(), RequestError> {
        if !self.config.test_mode {
            return Ok(());
        }
        let comm = self.log.get_mut(id).ok_or(RequestError::UnknownId(id))?;
        comm.store_reply(Response::test(body.as_bytes().to_vec()));
        Ok(())
    }

    /// The communication for `id`, once a reply has been delivered.
    fn replied(&self, id: CorrelationId) -> Result<&Communication, SessionError> {
        let comm = self.log.get(id).ok_or(RequestError::UnknownId(id))?;
        match comm.response().status() {
            ReplyStatus::Pending => Err(RequestError::NoReply(id).into()),
            ReplyStatus::NoReply => {
                Err(ConnectionError::Http(comm.response().status_text().to_string()).into())
            }
            _ => Ok(comm),
        }
    }

    // -----------------------------------------------------------------------
    // Connectivity
    // -----------------------------------------------------------------------

    pub fn prepare_test_connection_request(&mut self) -> Result<CorrelationId, RequestError> {
        let mut parts = RequestParts::new(HttpMethod::Get, "", RequestPurpose::ConnectivityTest);
        parts.accept = Some(ContentType::Html);
        self.prepare_request(parts)
    }

    /// Ask the server root for its HTML page and report the status.
    pub async fn test_connection(&mut self) -> Result<ReplyStatus, SessionError> {
        let id = self.prepare_test_connection_request()?;
        self.complete(id).await?;
        self.substitute_test_reply(id, "")?;
        let comm = self.log.get(id).ok_or(RequestError::UnknownId(id))?;
        Ok(comm.response().status())
    }

    // -----------------------------------------------------------------------
    // Token
    // -----------------------------------------------------------------------

    pub fn prepare_token_request(&mut self) -> Result<CorrelationId, RequestError> {
        let body = self
            .config
            .credentials
            .form_fields()
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let mut parts = RequestParts::new(HttpMethod::Post, TOKEN_PATH, RequestPurpose::Token);
        parts.content_type = Some(ContentType::UrlEncoded);
        parts.body = body.into_bytes();
        self.prepare_request(parts)
    }

    /// Read `access_token`, `token_type` and `expires_in` from the reply and
    /// make the result the session's token, valid from now.
    pub fn parse_token_reply(&mut self, id: CorrelationId) -> Result<&Token, SessionError> {
        self.substitute_test_reply(id, fixtures::TOKEN)?;
        let comm = self.replied(id)?;
        let token = Token::from_reply(comm.response().body(), Utc::now())
            .map_err(|e| RequestError::TokenNotParsed(e.to_string()))?;
        info!("session: token {} valid until {:?}", token.token_type, token.valid_to);
        self.token = token;
        Ok(&self.token)
    }

    pub async fn request_token(&mut self) -> Result<&Token, SessionError> {
        let id = self.prepare_token_request()?;
        self.complete(id).await?;
        self.parse_token_reply(id)
    }

    /// Fill the credentials from the operator's API key in the database.
    pub async fn load_credentials(&mut self) -> Result<&Credentials, SessionError> {
        let executor = self.executor.clone().ok_or(VerificationError::NoExecutor)?;
        let credentials = verify::load_credentials(executor.as_ref(), &self.config.db).await?;
        self.config.credentials = credentials;
        Ok(&self.config.credentials)
    }

    // -----------------------------------------------------------------------
    // Endpoint discovery
    // -----------------------------------------------------------------------

    pub fn prepare_endpoints_request(&mut self) -> Result<CorrelationId, RequestError> {
        let mut parts =
            RequestParts::new(HttpMethod::Get, ENDPOINTS_PATH, RequestPurpose::EndpointDiscovery);
        parts.content_type = Some(ContentType::Json);
        self.prepare_request(parts)
    }

    /// Replace the catalog with the endpoints listed in the reply.
    pub fn parse_endpoints_reply(&mut self, id: CorrelationId) -> Result<usize, SessionError> {
        self.substitute_test_reply(id, fixtures::ENDPOINTS)?;
        let body = self.replied(id)?.response().body().to_vec();
        let count = self.catalog.parse_endpoints_reply(&body)?;
        info!("session: catalog holds {count} endpoints");
        Ok(count)
    }

    pub async fn discover_endpoints(&mut self) -> Result<usize, SessionError> {
        let id = self.prepare_endpoints_request()?;
        self.complete(id).await?;
        self.parse_endpoints_reply(id)
    }

    // -----------------------------------------------------------------------
    // Schema discovery
    // -----------------------------------------------------------------------

    pub fn prepare_swagger_index_request(&mut self) -> Result<CorrelationId, RequestError> {
        let path = self.config.swagger_url.clone();
        let mut parts = RequestParts::new(HttpMethod::Get, path, RequestPurpose::SchemaDiscovery);
        parts.content_type = Some(ContentType::Html);
        self.prepare_request(parts)
    }

    /// Locations of the Swagger documents listed on the index page.
    pub fn parse_swagger_index(&mut self, id: CorrelationId) -> Result<Vec<String>, SessionError> {
        self.substitute_test_reply(id, fixtures::SWAGGER_INDEX)?;
        let comm = self.log.get(id).ok_or(RequestError::UnknownId(id))?;
        let response = comm.response();
        if matches!(response.status(), ReplyStatus::Pending | ReplyStatus::NoReply) {
            return Err(DiscoveryError::SourceNotAvailable(response.status_text().to_string()).into());
        }
        Ok(swagger_sources(response.body())?)
    }

    /// Download a Swagger document. Relative locations are resolved against
    /// the server origin. Test mode returns the canned document.
    pub async fn download_schema(&self, source: &str) -> Result<Vec<u8>, DiscoveryError> {
        if self.config.test_mode {
            return Ok(fixtures::SWAGGER_DOCUMENT.as_bytes().to_vec());
        }
        let url = if source.starts_with("http://") || source.starts_with("https://") {
            source.to_string()
        } else {
            format!("{}{}", self.config.server.origin(), source)
        };
        debug!("session: downloading {url}");
        let body = self
            .transport
            .fetch(&url)
            .await
            .map_err(DiscoveryError::FileNotDownloaded)?;
        if body.is_empty() {
            return Err(DiscoveryError::FileNotDownloaded(ConnectionError::Http(
                "empty document".into(),
            )));
        }
        Ok(body)
    }

    /// Fill the catalog's endpoint schemas from a downloaded document.
    pub fn apply_schema(&mut self, document: &[u8]) -> Result<usize, DiscoveryError> {
        let filled = self
            .catalog
            .apply_schema_document(document)
            .map_err(DiscoveryError::FileNotParsed)?;
        info!("session: schema filled {filled} endpoints");
        Ok(filled)
    }

    /// Index page, choice of document, download, and application. `choose`
    /// is asked only when the index lists more than one document; returning
    /// `None` abandons the discovery.
    pub async fn discover_schema<F>(&mut self, choose: F) -> Result<usize, SessionError>
    where
        F: FnOnce(&[String]) -> Option<usize>,
    {
        let id = self.prepare_swagger_index_request()?;
        self.complete(id).await?;
        let sources = self.parse_swagger_index(id)?;
        let source = select_source(&sources, choose)?;
        let document = self.download_schema(&source).await?;
        Ok(self.apply_schema(&document)?)
    }

    /// Fill the catalog's endpoint schemas from a local Swagger file.
    /// A file that cannot be read or parsed leaves the catalog untouched.
    pub fn load_schema_file(&mut self, path: impl AsRef<Path>) -> Result<usize, SessionError> {
        let path = path.as_ref();
        let contents = crate::config::open_file(path)?;
        let filled = self
            .catalog
            .apply_schema_document(&contents)
            .map_err(|e| FileError::NotParsed {
                path: path.display().to_string(),
                detail: e.to_string(),
            })?;
        info!("session: {filled} endpoint schemas from {}", path.display());
        Ok(filled)
    }

    // -----------------------------------------------------------------------
    // General requests
    // -----------------------------------------------------------------------

    /// Build a GET/POST/PUT/DELETE request for the operator.
    ///
    /// POST and PUT carry the selected endpoint's attribute values as body
    /// and fail when none has a value. GET and DELETE carry the select
    /// clause: the operator's own, else the selected endpoint's.
    pub fn prepare_general_request(
        &mut self,
        general: &GeneralRequest,
        selection: Option<&Selection>,
    ) -> Result<CorrelationId, SessionError> {
        let endpoint = selection.and_then(|s| self.catalog.get(s));
        let path = resolve_path(&general.path, endpoint);

        let mut parts = RequestParts::new(general.method, path, RequestPurpose::General);
        parts.content_type = Some(ContentType::Json);
        parts.accept = general.accept;
        parts.auth_required = true;

        if general.method.body_required() {
            parts.body = endpoint
                .and_then(prepare_post_request_body)
                .ok_or(RequestError::NothingToSend)?;
        } else {
            let clause = match &general.select {
                Some(own) => own.clone(),
                None => endpoint.map(Endpoint::build_select_clause).unwrap_or_default(),
            };
            parts.query.extend(select_query(&parts.path, clause));
        }

        Ok(self.prepare_request(parts)?)
    }

    /// Read the API's state fields from the reply to a general request.
    pub fn parse_reply_to_general_request(
        &mut self,
        id: CorrelationId,
    ) -> Result<StateAttributes, SessionError> {
        if self.config.test_mode {
            let comm = self.log.get(id).ok_or(RequestError::UnknownId(id))?;
            let request = comm.request();
            let canned = fixtures::general(request.method(), is_collection_url(request.url()));
            self.substitute_test_reply(id, canned)?;
        }

        let comm = self.log.get_mut(id).ok_or(RequestError::UnknownId(id))?;
        let response = comm.response_mut();
        if serde_json::from_slice::<Value>(response.body()).is_err() {
            return Err(RequestError::ReplyNotParsed.into());
        }
        let state = response.extract_state();
        response.set_state(state.clone());
        Ok(state)
    }

    /// Build, send, and parse a general request. The reply is parsed only
    /// when it succeeded.
    pub async fn send_general(
        &mut self,
        general: &GeneralRequest,
        selection: Option<&Selection>,
    ) -> Result<CorrelationId, SessionError> {
        let id = self.prepare_general_request(general, selection)?;
        self.complete(id).await?;
        let succeeded = self.in_test_mode()
            || self
                .log
                .get(id)
                .is_some_and(|c| c.response().status().is_success());
        if succeeded {
            self.parse_reply_to_general_request(id)?;
        }
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // Verification
    // -----------------------------------------------------------------------

    /// Table behind the entity named in the request URL of `id`.
    pub fn table_name_for(&self, id: CorrelationId) -> Result<&'static str, SessionError> {
        let comm = self.log.get(id).ok_or(RequestError::UnknownId(id))?;
        let url = comm.request().url();
        tables::table_from_url(url)
            .map(|t| t.table)
            .ok_or_else(|| VerificationError::UnknownTable(url.to_string()).into())
    }

    /// Record IDs reported in the reply to `id`.
    pub fn record_ids(&self, id: CorrelationId) -> Result<Vec<String>, SessionError> {
        let comm = self.log.get(id).ok_or(RequestError::UnknownId(id))?;
        let mut ids = Vec::new();
        comm.response().data_from_body(&mut ids);
        Ok(ids)
    }

    /// Check the records reported by the reply to `id` against the database
    /// and remember the outcome.
    pub async fn verify(&mut self, id: CorrelationId) -> Result<VerificationState, SessionError> {
        let executor = self.executor.clone().ok_or(VerificationError::NoExecutor)?;
        let table = self.table_name_for(id)?;
        let ids = self.record_ids(id)?;
        let method = self.replied(id)?.request().method();

        let state =
            verify::verify_table_records(executor.as_ref(), &self.config.db, table, &ids, method)
                .await;
        self.verification.insert(id, state);
        Ok(state)
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

/// `[ {"name": value,...} ]` from every attribute holding a valid value, or
/// `None` when none does.
pub fn prepare_post_request_body(endpoint: &Endpoint) -> Option<Vec<u8>> {
    let pairs: Vec<String> = endpoint
        .attributes()
        .iter()
        .filter_map(|a| {
            let value = a.value().typed()?;
            Some(format!(
                "{}: {}",
                Value::String(a.name().to_string()),
                value.to_json_fragment()
            ))
        })
        .collect();
    if pairs.is_empty() {
        return None;
    }
    Some(format!("[ {{{}}} ]", pairs.join(",")).into_bytes())
}

/// The select clause as a query pair, named by the path's API version.
pub fn select_query(path: &str, clause: String) -> Option<(String, String)> {
    if clause.is_empty() {
        return None;
    }
    SELECT_PARAMS
        .iter()
        .find(|(marker, _)| path.contains(marker))
        .map(|(_, name)| (name.to_string(), clause))
}

/// The operator's path, or the endpoint's substituted path when none was
/// typed, always with a leading `/`.
fn resolve_path(typed: &str, endpoint: Option<&Endpoint>) -> String {
    let path = match endpoint {
        Some(e) if typed.is_empty() => e.path_with_parameters(),
        Some(e) if typed != e.path_with_parameters() => {
            debug!("session: hand-made path {typed}");
            typed.to_string()
        }
        _ => typed.to_string(),
    };
    if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    }
}

/// A URL addressing an entity as a whole rather than one of its records.
fn is_collection_url(url: &str) -> bool {
    let path = url.split('?').next().unwrap_or("");
    let last = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    tables::entity_from_url(url) == Some(last)
}

/// Extract the document locations from a Swagger UI index page.
pub fn swagger_sources(page: &[u8]) -> Result<Vec<String>, DiscoveryError> {
    let page = String::from_utf8_lossy(page);
    let found = SWAGGER_URLS_RE
        .find(&page)
        .ok_or(DiscoveryError::SourceNotParsed)?;
    let wrapped = format!("{{{}}}", found.as_str());
    let doc: Value = serde_json::from_str(&wrapped).map_err(|_| DiscoveryError::SourceNotParsed)?;
    let sources: Vec<String> = doc
        .get("urls")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|u| u.get("url").and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    if sources.is_empty() {
        return Err(DiscoveryError::SourceNotParsed);
    }
    Ok(sources)
}

/// The only source, or the one `choose` picks among several.
fn select_source<F>(sources: &[String], choose: F) -> Result<String, DiscoveryError>
where
    F: FnOnce(&[String]) -> Option<usize>,
{
    let index = if sources.len() == 1 {
        Some(0)
    } else {
        choose(sources)
    };
    index
        .and_then(|i| sources.get(i))
        .cloned()
        .ok_or(DiscoveryError::FileNamesNotExtracted)
}
