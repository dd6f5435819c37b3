//! Requests, responses, and the communication log that pairs them.
//!
//! Every request the session builds is appended to the [`CommunicationLog`]
//! under a fresh [`CorrelationId`]. The transport echoes that ID back with the
//! reply so the response can be stored into the matching [`Communication`]
//! whatever order replies arrive in.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::http::{ContentType, HttpMethod};

/// Session-unique identifier of one request/response pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CorrelationId(pub u32);

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a request was built; decides how its reply is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPurpose {
    ConnectivityTest,
    Token,
    EndpointDiscovery,
    SchemaDiscovery,
    General,
}

impl std::fmt::Display for RequestPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RequestPurpose::ConnectivityTest => "connectivity-test",
            RequestPurpose::Token => "token",
            RequestPurpose::EndpointDiscovery => "endpoint-discovery",
            RequestPurpose::SchemaDiscovery => "schema-discovery",
            RequestPurpose::General => "general",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A fully built HTTP request. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    id: CorrelationId,
    purpose: RequestPurpose,
    method: HttpMethod,
    url: String,
    content_type: Option<ContentType>,
    accept: Option<ContentType>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Request {
    pub fn new(
        id: CorrelationId,
        purpose: RequestPurpose,
        method: HttpMethod,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id,
            purpose,
            method,
            url: url.into(),
            content_type: None,
            accept: None,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Sets the content type and its `Content-Type` header.
    pub fn with_content_type(mut self, content_type: Option<ContentType>) -> Self {
        self.content_type = content_type;
        if let Some(ct) = content_type {
            self.headers.push(("Content-Type".into(), ct.mime().into()));
        }
        self
    }

    /// Sets the accepted type and its `Accept` header.
    pub fn with_accept(mut self, accept: Option<ContentType>) -> Self {
        self.accept = accept;
        if let Some(ct) = accept {
            self.headers.push(("Accept".into(), ct.mime().into()));
        }
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the body and, when it is non-empty, its `Content-Length` header.
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        if !body.is_empty() {
            self.headers
                .push(("Content-Length".into(), body.len().to_string()));
        }
        self.body = body;
        self
    }

    pub fn id(&self) -> CorrelationId {
        self.id
    }

    pub fn purpose(&self) -> RequestPurpose {
        self.purpose
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn content_type(&self) -> Option<ContentType> {
        self.content_type
    }

    pub fn accept(&self) -> Option<ContentType> {
        self.accept
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// First header value with this name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

// ---------------------------------------------------------------------------
// Reply
// ---------------------------------------------------------------------------

/// What the transport hands back for one request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawReply {
    pub id: CorrelationId,
    /// HTTP status code, or 0 when no reply was received.
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawReply {
    /// A reply standing in for a failed connection. `error` becomes the
    /// status text.
    pub fn no_reply(id: CorrelationId, error: impl Into<String>) -> Self {
        Self {
            id,
            status: 0,
            status_text: error.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    /// No reply yet.
    Pending,
    /// Canned payload substituted in test mode.
    Test,
    /// The request could not be delivered.
    NoReply,
    Http(u16),
}

impl ReplyStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ReplyStatus::Test | ReplyStatus::Http(200..=299))
    }
}

impl std::fmt::Display for ReplyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplyStatus::Pending => f.write_str("pending"),
            ReplyStatus::Test => f.write_str("test"),
            ReplyStatus::NoReply => f.write_str("no reply"),
            ReplyStatus::Http(code) => write!(f, "{code}"),
        }
    }
}

/// State fields reported by the API alongside the data. `None` when the reply
/// does not carry the field.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StateAttributes {
    pub page_count: Option<String>,
    pub row_count: Option<String>,
    pub status: Option<String>,
    pub message: Option<String>,
    pub stack_trace: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    status: ReplyStatus,
    status_text: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    state: StateAttributes,
}

impl Default for Response {
    fn default() -> Self {
        Self::pending()
    }
}

impl Response {
    pub fn pending() -> Self {
        Self {
            status: ReplyStatus::Pending,
            status_text: String::new(),
            headers: Vec::new(),
            body: Vec::new(),
            state: StateAttributes::default(),
        }
    }

    pub fn from_raw(raw: RawReply) -> Self {
        let status = match raw.status {
            0 => ReplyStatus::NoReply,
            code => ReplyStatus::Http(code),
        };
        Self {
            status,
            status_text: raw.status_text,
            headers: raw.headers,
            body: raw.body,
            state: StateAttributes::default(),
        }
    }

    /// A canned test-mode reply.
    pub fn test(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: ReplyStatus::Test,
            status_text: "Test mode".into(),
            headers: Vec::new(),
            body: body.into(),
            state: StateAttributes::default(),
        }
    }

    pub fn status(&self) -> ReplyStatus {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn state(&self) -> &StateAttributes {
        &self.state
    }

    pub fn set_state(&mut self, state: StateAttributes) {
        self.state = state;
    }

    fn body_object(&self) -> Option<serde_json::Map<String, Value>> {
        match serde_json::from_slice::<Value>(&self.body).ok()? {
            Value::Object(map) if !map.is_empty() => Some(map),
            _ => None,
        }
    }

    /// A top-level field of a JSON object body, as text.
    ///
    /// Integral numbers that fit `i32` print as integers, other numbers as
    /// floats. Nulls, arrays, objects and absent fields give `None`.
    pub fn parse_body(&self, tag: &str) -> Option<String> {
        match self.body_object()?.remove(tag)? {
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => match n.as_i64().and_then(|i| i32::try_from(i).ok()) {
                Some(i) => Some(i.to_string()),
                None => n.as_f64().map(|f| f.to_string()),
            },
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The `Data` section of a JSON object body, pretty-printed.
    ///
    /// Record IDs found there (string array elements or a bare string that are
    /// valid non-nil UUIDs) are appended to `record_ids`.
    pub fn data_from_body(&self, record_ids: &mut Vec<String>) -> Option<String> {
        let data = self.body_object()?.remove("Data")?;
        match data {
            Value::Array(items) => {
                record_ids.extend(
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .filter(|s| is_record_id(s))
                        .map(str::to_string),
                );
                serde_json::to_string_pretty(&Value::Array(items)).ok()
            }
            Value::Object(_) => serde_json::to_string_pretty(&data).ok(),
            Value::String(s) => {
                if is_record_id(&s) {
                    record_ids.push(s.clone());
                }
                Some(s)
            }
            _ => None,
        }
    }

    /// Read the API's state fields out of the body.
    pub fn extract_state(&self) -> StateAttributes {
        StateAttributes {
            page_count: self.parse_body("PageCount"),
            row_count: self.parse_body("RowCount"),
            status: self.parse_body("Status"),
            message: self.parse_body("Message"),
            stack_trace: self.parse_body("StackTrace"),
        }
    }
}

fn is_record_id(s: &str) -> bool {
    uuid::Uuid::parse_str(s).is_ok_and(|id| !id.is_nil())
}

// ---------------------------------------------------------------------------
// Communication log
// ---------------------------------------------------------------------------

/// One request and the reply it received.
#[derive(Debug, Clone)]
pub struct Communication {
    created_at: DateTime<Utc>,
    request: Request,
    response: Response,
}

impl Communication {
    pub fn id(&self) -> CorrelationId {
        self.request.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    pub fn is_pending(&self) -> bool {
        self.response.status == ReplyStatus::Pending
    }

    /// Store the reply. Only the first reply is kept; later ones are refused.
    pub fn store_reply(&mut self, response: Response) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.response = response;
        true
    }
}

/// Append-only log of communications, indexed by correlation ID.
#[derive(Debug, Default)]
pub struct CommunicationLog {
    entries: Vec<Communication>,
    index: HashMap<CorrelationId, usize>,
    next_id: u32,
}

impl CommunicationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The ID the next appended request must carry.
    pub fn next_id(&self) -> CorrelationId {
        CorrelationId(self.next_id)
    }

    /// Append a request built with [`next_id`](Self::next_id) and advance the
    /// counter. Returns the request's ID.
    pub fn push(&mut self, request: Request) -> CorrelationId {
        let id = request.id;
        debug_assert_eq!(id, self.next_id(), "request built with a stale id");
        self.next_id = self.next_id.max(id.0) + 1;
        self.index.insert(id, self.entries.len());
        self.entries.push(Communication {
            created_at: Utc::now(),
            request,
            response: Response::pending(),
        });
        id
    }

    pub fn get(&self, id: CorrelationId) -> Option<&Communication> {
        self.index.get(&id).map(|&i| &self.entries[i])
    }

    pub fn get_mut(&mut self, id: CorrelationId) -> Option<&mut Communication> {
        self.index.get(&id).map(|&i| &mut self.entries[i])
    }

    pub fn last(&self) -> Option<&Communication> {
        self.entries.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Communication> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(body: &str) -> Response {
        Response::test(body.as_bytes().to_vec())
    }

    #[test]
    fn parse_body_types() {
        let r = reply(
            r#"{"PageCount":1,"RowCount":2.5,"Status":"OK","Flag":false,"Big":4294967296,"Data":[]}"#,
        );
        assert_eq!(r.parse_body("PageCount").as_deref(), Some("1"));
        assert_eq!(r.parse_body("RowCount").as_deref(), Some("2.5"));
        assert_eq!(r.parse_body("Status").as_deref(), Some("OK"));
        assert_eq!(r.parse_body("Flag").as_deref(), Some("false"));
        assert_eq!(r.parse_body("Big").as_deref(), Some("4294967296"));
        assert_eq!(r.parse_body("Data"), None);
        assert_eq!(r.parse_body("Missing"), None);
    }

    #[test]
    fn parse_body_needs_an_object() {
        assert_eq!(reply("[1,2]").parse_body("x"), None);
        assert_eq!(reply("not json").parse_body("x"), None);
        assert_eq!(reply("{}").parse_body("x"), None);
    }

    #[test]
    fn data_array_collects_uuid_strings() {
        let r = reply(
            r#"{"Data":["7c9e6679-7425-40de-944b-e07fc1f90ae7","nope",{"ID":"x"},
                "00000000-0000-0000-0000-000000000000"]}"#,
        );
        let mut ids = Vec::new();
        let text = r.data_from_body(&mut ids).unwrap();
        assert_eq!(ids, vec!["7c9e6679-7425-40de-944b-e07fc1f90ae7"]);
        assert!(text.starts_with('['));
        assert!(text.contains('\n'));
    }

    #[test]
    fn data_string_and_object() {
        let mut ids = Vec::new();
        let id = "{7c9e6679-7425-40de-944b-e07fc1f90ae7}";
        let r = reply(&format!(r#"{{"Data":"{id}"}}"#));
        assert_eq!(r.data_from_body(&mut ids).as_deref(), Some(id));
        assert_eq!(ids, vec![id]);

        let r = reply(r#"{"Data":{"Name":"ACME"}}"#);
        let text = r.data_from_body(&mut ids).unwrap();
        assert!(text.contains("\"Name\": \"ACME\""));
        assert_eq!(ids.len(), 1);

        assert_eq!(reply(r#"{"Data":null}"#).data_from_body(&mut ids), None);
    }

    #[test]
    fn state_attributes_absent_fields_are_none() {
        let r = reply(r#"{"Status":"OK","Message":"done"}"#);
        let s = r.extract_state();
        assert_eq!(s.status.as_deref(), Some("OK"));
        assert_eq!(s.message.as_deref(), Some("done"));
        assert_eq!(s.page_count, None);
        assert_eq!(s.stack_trace, None);
    }

    #[test]
    fn request_headers_follow_optional_parts() {
        let r = Request::new(
            CorrelationId(0),
            RequestPurpose::General,
            HttpMethod::Get,
            "http://h/x",
        )
        .with_content_type(None)
        .with_accept(Some(ContentType::Html))
        .with_body(Vec::new());
        assert_eq!(r.header("accept"), Some("text/html"));
        assert_eq!(r.header("Content-Type"), None);
        assert_eq!(r.header("Content-Length"), None);

        let r = Request::new(CorrelationId(1), RequestPurpose::General, HttpMethod::Post, "u")
            .with_body(b"[{}]".to_vec());
        assert_eq!(r.header("Content-Length"), Some("4"));
    }

    #[test]
    fn log_ids_are_unique_and_indexed() {
        let mut log = CommunicationLog::new();
        for _ in 0..3 {
            let id = log.next_id();
            let req = Request::new(id, RequestPurpose::General, HttpMethod::Get, "u");
            log.push(req);
        }
        let ids: Vec<_> = log.iter().map(Communication::id).collect();
        assert_eq!(ids, vec![CorrelationId(0), CorrelationId(1), CorrelationId(2)]);
        assert_eq!(log.get(CorrelationId(1)).unwrap().id(), CorrelationId(1));
        assert!(log.get(CorrelationId(9)).is_none());
        assert!(log.iter().all(Communication::is_pending));
    }

    #[test]
    fn reply_is_stored_once() {
        let mut log = CommunicationLog::new();
        let id = log.push(Request::new(
            log.next_id(),
            RequestPurpose::General,
            HttpMethod::Get,
            "u",
        ));
        let c = log.get_mut(id).unwrap();
        assert!(c.store_reply(Response::from_raw(RawReply {
            id,
            status: 200,
            status_text: "OK".into(),
            ..Default::default()
        })));
        assert!(!c.store_reply(Response::test(Vec::new())));
        assert_eq!(c.response().status(), ReplyStatus::Http(200));
    }
}
