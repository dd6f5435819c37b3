//! HTTP method table and the content types the workbench negotiates.

use std::str::FromStr;

/// Direction in which an endpoint's DTO travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFlow {
    /// No body in either direction (DELETE).
    NoFlow,
    /// The endpoint returns the DTO (reads).
    Output,
    /// The endpoint accepts the DTO as its body (writes).
    Input,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 4] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Delete,
    ];

    /// Upper-case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Whether requests with this method must carry a body.
    pub fn body_required(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put)
    }

    pub fn data_flow(&self) -> DataFlow {
        match self {
            HttpMethod::Get => DataFlow::Output,
            HttpMethod::Post | HttpMethod::Put => DataFlow::Input,
            HttpMethod::Delete => DataFlow::NoFlow,
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses a method name case-insensitively (`"get"`, `"GET"`).
impl FromStr for HttpMethod {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HttpMethod::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                format!("unknown HTTP method {s:?}; expected one of: GET, POST, PUT, DELETE")
            })
    }
}

/// Media types used for `Content-Type` and `Accept`.
///
/// "Not used" is expressed as `Option::<ContentType>::None` wherever a header
/// is optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Json,
    Xml,
    UrlEncoded,
    Html,
}

impl ContentType {
    pub fn mime(&self) -> &'static str {
        match self {
            ContentType::Json => "application/json",
            ContentType::Xml => "application/xml",
            ContentType::UrlEncoded => "application/x-www-form-urlencoded",
            ContentType::Html => "text/html",
        }
    }
}

impl FromStr for ContentType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" | "application/json" => Ok(ContentType::Json),
            "xml" | "application/xml" => Ok(ContentType::Xml),
            "form" | "application/x-www-form-urlencoded" => Ok(ContentType::UrlEncoded),
            "html" | "text/html" => Ok(ContentType::Html),
            _ => Err(format!(
                "unknown content type {s:?}; expected one of: json, xml, form, html"
            )),
        }
    }
}
