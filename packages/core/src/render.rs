//! Plain-text rendering of the catalog, endpoints, and communication log.
//!
//! The output is meant for terminals and logs. It is not a stable format.

use crate::catalog::Catalog;
use crate::endpoint::Endpoint;
use crate::message::{Communication, CommunicationLog, ReplyStatus};

/// Render the catalog as one line per endpoint.
///
/// ```text
/// Endpoints  3
/// ────────────
///   GET     v1.0/Company           List companies
///   POST    v1.0/Company           Create companies
/// ! GET     v1.0/Company/{id}
/// ```
///
/// `!` marks endpoints that cannot be used as described (see
/// [`Endpoint::item_not_eligible`]).
pub fn render_catalog(catalog: &Catalog) -> String {
    let header = format!("Endpoints  {}", catalog.len());
    let rule = "─".repeat(header.chars().count());
    let mut out = format!("{header}\n{rule}\n");

    let width = catalog
        .endpoints()
        .iter()
        .map(|e| e.path().len())
        .max()
        .unwrap_or(0);

    for e in catalog.endpoints() {
        let mark = if e.item_not_eligible() { '!' } else { ' ' };
        let line = format!(
            "{mark} {:<7} {:<width$}  {}",
            e.method().as_str(),
            e.path(),
            truncate(e.summary(), 60)
        );
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

/// Render one endpoint with its parameters and attributes.
pub fn render_endpoint(endpoint: &Endpoint) -> String {
    let mut out = endpoint.complete_path();
    if !endpoint.summary().is_empty() {
        out.push_str(&format!("  {}", endpoint.summary()));
    }
    out.push('\n');

    if endpoint.has_path_params() {
        out.push_str("\nParameters:\n");
        for p in endpoint.parameters() {
            let required = if p.required() { "*" } else { " " };
            out.push_str(&format!(
                "  {required}{}  {}  {}\n",
                p.name(),
                p.type_label(),
                p.value().raw().unwrap_or("-")
            ));
        }
    }

    if endpoint.has_body_attributes() {
        out.push_str(&format!("\nAttributes ({}):\n", endpoint.dto_label()));
        for a in endpoint.attributes() {
            let used = if a.use_in_request() { "[x]" } else { "[ ]" };
            let value = match a.value().raw() {
                Some(raw) if !a.value().is_valid() => format!("{raw} (invalid)"),
                Some(raw) => raw.to_string(),
                None => "-".to_string(),
            };
            out.push_str(&format!("  {used} {}  {}  {value}\n", a.name(), a.type_label()));
        }
    }
    out
}

/// One line per communication: id, time, status, method, URL.
pub fn render_log(log: &CommunicationLog) -> String {
    let mut out = String::new();
    for c in log.iter() {
        out.push_str(&format!(
            "#{:<4} {}  {:<8} {:<6} {}\n",
            c.id().0,
            c.created_at().format("%H:%M:%S"),
            c.response().status().to_string(),
            c.request().method().as_str(),
            c.request().url()
        ));
    }
    out
}

/// Full detail of one communication: request headers and body, response
/// status, state attributes, and body.
pub fn render_communication(comm: &Communication) -> String {
    let req = comm.request();
    let resp = comm.response();
    let mut out = format!(
        "#{} {} {}  [{}]\n",
        comm.id(),
        req.method(),
        req.url(),
        req.purpose()
    );
    for (name, value) in req.headers() {
        out.push_str(&format!("  {name}: {value}\n"));
    }
    if !req.body().is_empty() {
        out.push('\n');
        out.push_str(&String::from_utf8_lossy(req.body()));
        out.push('\n');
    }

    out.push('\n');
    match resp.status() {
        ReplyStatus::Pending => {
            out.push_str("(pending)\n");
            return out;
        }
        status => out.push_str(&format!("Status: {status} {}\n", resp.status_text())),
    }

    let state = resp.state();
    let fields = [
        ("PageCount", &state.page_count),
        ("RowCount", &state.row_count),
        ("Status", &state.status),
        ("Message", &state.message),
        ("StackTrace", &state.stack_trace),
    ];
    for (label, value) in fields {
        if let Some(v) = value {
            out.push_str(&format!("  {label}: {v}\n"));
        }
    }

    if !resp.body().is_empty() {
        out.push('\n');
        out.push_str(&pretty_body(resp.body()));
        out.push('\n');
    }
    out
}

// --- helpers -----------------------------------------------------------------

fn pretty_body(body: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| serde_json::to_string_pretty(&v).ok())
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned())
}

fn truncate(s: &str, max: usize) -> String {
    let s = s.trim();
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max - 1).collect();
    format!("{cut}…")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{DataFlow, HttpMethod};
    use crate::message::{CorrelationId, RawReply, Request, RequestPurpose, Response};

    #[test]
    fn catalog_marks_ineligible() {
        let catalog = Catalog::from_endpoints(vec![
            Endpoint::new("v1.0/Company/{id}", HttpMethod::Get),
            Endpoint::new("v1.0/Company", HttpMethod::Delete),
        ]);
        let text = render_catalog(&catalog);
        assert!(text.starts_with("Endpoints  2\n"));
        assert!(text.contains("  DELETE  v1.0/Company"));
        assert!(text.contains("! GET     v1.0/Company/{id}"));
    }

    #[test]
    fn endpoint_lists_attributes() {
        let mut e = Endpoint::new("v1.0/Company", HttpMethod::Post);
        e.set_dto_attributes(
            &serde_json::json!({ "": { "properties": { "Name": { "type": "string" } } } }),
            DataFlow::Input,
        );
        e.attribute_mut("Name").unwrap().set_value("ACME");
        let text = render_endpoint(&e);
        assert!(text.contains("[x] Name  string  ACME"));
    }

    #[test]
    fn communication_shows_state() {
        let mut log = CommunicationLog::new();
        let id = log.push(Request::new(
            CorrelationId(0),
            RequestPurpose::General,
            HttpMethod::Get,
            "http://localhost:80/v1.0/Company",
        ));
        let text = render_communication(log.get(id).unwrap());
        assert!(text.contains("(pending)"));

        let c = log.get_mut(id).unwrap();
        let mut resp = Response::from_raw(RawReply {
            id,
            status: 200,
            status_text: "OK".into(),
            body: br#"{"RowCount":2}"#.to_vec(),
            ..Default::default()
        });
        resp.set_state(resp.extract_state());
        c.store_reply(resp);

        let text = render_communication(log.get(id).unwrap());
        assert!(text.contains("Status: 200 OK"));
        assert!(text.contains("RowCount: 2"));
        assert!(render_log(&log).contains("#0"));
    }
}
