//! The endpoint catalog and the Swagger document that fills it.
//!
//! The catalog is built in two phases. [`Catalog::parse_endpoints_reply`]
//! reads the list of `(path, method)` pairs the API exposes, producing bare
//! endpoints. [`Catalog::apply_schema_document`] then fills summary,
//! parameters and DTO attributes from a Swagger 2.0 document. Both phases
//! build their result off to the side and only swap it in on success, so a
//! malformed payload never leaves a half-filled catalog behind.

use serde_json::Value;
use thiserror::Error;

use crate::endpoint::Endpoint;
use crate::http::HttpMethod;

/// Module of the discovery reply that lists the API's entities.
const CORE_MODULE: &str = "Core";

#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("payload is not valid JSON: {0}")]
    NotJson(String),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("entity {0:?} lists no methods")]
    EntityWithoutMethods(String),

    #[error("document has no \"paths\" section")]
    MissingPaths,

    #[error("document has no \"definitions\" section")]
    MissingDefinitions,
}

/// An explicit reference to one catalog endpoint, passed to request building
/// in place of a "current endpoint".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub path: String,
    pub method: HttpMethod,
}

/// All endpoints the target API exposes, sorted by `(path, method)`.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    endpoints: Vec<Endpoint>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_endpoints(mut endpoints: Vec<Endpoint>) -> Self {
        endpoints.sort();
        endpoints.dedup();
        Self { endpoints }
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    fn position(&self, path: &str, method: HttpMethod) -> Option<usize> {
        self.endpoints
            .binary_search_by(|e| (e.path(), e.method()).cmp(&(path, method)))
            .ok()
    }

    /// Select an endpoint by identity. A leading `/` on `path` is ignored.
    pub fn select(&self, path: &str, method: HttpMethod) -> Option<Selection> {
        let path = path.strip_prefix('/').unwrap_or(path);
        self.position(path, method).map(|_| Selection {
            path: path.to_string(),
            method,
        })
    }

    pub fn get(&self, selection: &Selection) -> Option<&Endpoint> {
        self.position(&selection.path, selection.method)
            .map(|i| &self.endpoints[i])
    }

    pub fn get_mut(&mut self, selection: &Selection) -> Option<&mut Endpoint> {
        self.position(&selection.path, selection.method)
            .map(|i| &mut self.endpoints[i])
    }

    /// Replace the catalog with the endpoints listed in a discovery reply.
    ///
    /// Expected shape:
    /// `{"Data":[{"Modules":[{"Name":"Core","Entities":[{"Methods":[{"Name":path,"HttpMethod":m}]}]}]}]}`.
    /// Methods with an unknown HTTP verb are skipped. An entity without
    /// methods rejects the whole reply and leaves the catalog untouched.
    pub fn parse_endpoints_reply(&mut self, body: &[u8]) -> Result<usize, SchemaError> {
        let doc = parse_object(body)?;
        let mut endpoints = Vec::new();

        let versions = doc.get("Data").and_then(Value::as_array);
        for version in versions.into_iter().flatten() {
            let modules = version.get("Modules").and_then(Value::as_array);
            for module in modules.into_iter().flatten() {
                if module.get("Name").and_then(Value::as_str) != Some(CORE_MODULE) {
                    continue;
                }
                let entities = module.get("Entities").and_then(Value::as_array);
                for entity in entities.into_iter().flatten() {
                    let methods = entity
                        .get("Methods")
                        .and_then(Value::as_array)
                        .filter(|m| !m.is_empty())
                        .ok_or_else(|| {
                            let name = entity.get("Name").and_then(Value::as_str).unwrap_or("");
                            SchemaError::EntityWithoutMethods(name.to_string())
                        })?;

                    for method in methods {
                        let path = method.get("Name").and_then(Value::as_str).unwrap_or("");
                        let verb = method.get("HttpMethod").and_then(Value::as_str).unwrap_or("");
                        if let Ok(verb) = verb.parse::<HttpMethod>() {
                            endpoints.push(Endpoint::new(path, verb));
                        }
                    }
                }
            }
        }

        *self = Catalog::from_endpoints(endpoints);
        Ok(self.len())
    }

    /// Fill every endpoint whose properties are not yet set from a Swagger
    /// document. Endpoints already filled are left alone, so applying the
    /// same document twice changes nothing.
    ///
    /// Returns the number of endpoints filled.
    pub fn apply_schema_document(&mut self, body: &[u8]) -> Result<usize, SchemaError> {
        let doc = parse_object(body)?;
        let paths = non_empty_object(&doc, "paths").ok_or(SchemaError::MissingPaths)?;
        let definitions =
            non_empty_object(&doc, "definitions").ok_or(SchemaError::MissingDefinitions)?;

        let mut filled = self.endpoints.clone();
        let mut count = 0;
        for endpoint in filled.iter_mut().filter(|e| e.properties_are_not_set()) {
            let key = format!("/{}", endpoint.path());
            let verb = endpoint.method().as_str().to_ascii_lowercase();
            let method = paths
                .get(&key)
                .and_then(|p| p.get(&verb))
                .cloned()
                .unwrap_or(Value::Null);
            endpoint.apply_method_schema(&method, definitions);
            if !endpoint.properties_are_not_set() {
                count += 1;
            }
        }

        self.endpoints = filled;
        Ok(count)
    }
}

// --- helpers -----------------------------------------------------------------

fn parse_object(body: &[u8]) -> Result<Value, SchemaError> {
    let doc: Value =
        serde_json::from_slice(body).map_err(|e| SchemaError::NotJson(e.to_string()))?;
    if !doc.is_object() {
        return Err(SchemaError::NotAnObject);
    }
    Ok(doc)
}

fn non_empty_object<'a>(doc: &'a Value, key: &str) -> Option<&'a Value> {
    doc.get(key)
        .filter(|v| v.as_object().is_some_and(|o| !o.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn discovery() -> Vec<u8> {
        json!({
            "Data": [{
                "Modules": [
                    { "Name": "Admin", "Entities": [{ "Methods": [{ "Name": "x", "HttpMethod": "GET" }] }] },
                    { "Name": "Core", "Entities": [
                        { "Name": "Company", "Methods": [
                            { "Name": "v1.0/Company/{id}", "HttpMethod": "GET" },
                            { "Name": "v1.0/Company", "HttpMethod": "POST" },
                            { "Name": "v1.0/Company", "HttpMethod": "GET" },
                            { "Name": "v1.0/Company", "HttpMethod": "PATCH" }
                        ]}
                    ]}
                ]
            }]
        })
        .to_string()
        .into_bytes()
    }

    fn swagger() -> Vec<u8> {
        json!({
            "paths": {
                "/v1.0/Company": {
                    "get": {
                        "summary": "List companies",
                        "responses": { "200": { "schema": { "$ref": "#/definitions/Company" } } }
                    },
                    "post": {
                        "summary": "Create companies",
                        "parameters": [{ "name": "items", "schema": { "items": { "$ref": "#/definitions/Company" } } }]
                    }
                },
                "/v1.0/Company/{id}": {
                    "get": {
                        "summary": "One company",
                        "parameters": [{ "name": "id", "required": true, "type": "string", "format": "uuid" }],
                        "responses": { "200": { "schema": { "$ref": "#/definitions/Company" } } }
                    }
                }
            },
            "definitions": {
                "Company": { "properties": {
                    "ID": { "type": "string", "format": "uuid" },
                    "Name": { "type": "string" }
                }}
            }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn discovery_reads_core_module_sorted() {
        let mut c = Catalog::new();
        assert_eq!(c.parse_endpoints_reply(&discovery()), Ok(3));
        let ids: Vec<_> = c.endpoints().iter().map(Endpoint::complete_path).collect();
        assert_eq!(
            ids,
            vec!["GET v1.0/Company", "POST v1.0/Company", "GET v1.0/Company/{id}"]
        );
        assert!(c.endpoints().iter().all(Endpoint::properties_are_not_set));
    }

    #[test]
    fn entity_without_methods_keeps_old_catalog() {
        let mut c = Catalog::new();
        c.parse_endpoints_reply(&discovery()).unwrap();
        let bad = json!({ "Data": [{ "Modules": [{ "Name": "Core", "Entities": [{ "Name": "Empty", "Methods": [] }] }] }] });
        let err = c.parse_endpoints_reply(bad.to_string().as_bytes()).unwrap_err();
        assert_eq!(err, SchemaError::EntityWithoutMethods("Empty".into()));
        assert_eq!(c.len(), 3);
    }

    #[test]
    fn schema_fills_endpoints_once() {
        let mut c = Catalog::new();
        c.parse_endpoints_reply(&discovery()).unwrap();
        assert_eq!(c.apply_schema_document(&swagger()), Ok(3));

        let sel = c.select("/v1.0/Company/{id}", HttpMethod::Get).unwrap();
        let e = c.get(&sel).unwrap();
        assert_eq!(e.summary(), "One company");
        assert_eq!(e.parameters().len(), 1);
        assert_eq!(e.attributes().len(), 2);
        assert!(e.attributes().iter().all(|a| a.use_in_request()));

        let post = c.get(&c.select("v1.0/Company", HttpMethod::Post).unwrap()).unwrap();
        assert_eq!(post.dto_label(), "Company");
        assert!(post.attributes().iter().all(|a| !a.use_in_request()));

        assert_eq!(c.apply_schema_document(&swagger()), Ok(0));
    }

    #[test]
    fn schema_without_definitions_is_rejected_untouched() {
        let mut c = Catalog::new();
        c.parse_endpoints_reply(&discovery()).unwrap();
        let doc = json!({ "paths": { "/v1.0/Company": {} }, "definitions": {} });
        assert_eq!(
            c.apply_schema_document(doc.to_string().as_bytes()),
            Err(SchemaError::MissingDefinitions)
        );
        assert!(c.endpoints().iter().all(Endpoint::properties_are_not_set));
        assert!(matches!(
            c.apply_schema_document(b"<html>"),
            Err(SchemaError::NotJson(_))
        ));
    }

    #[test]
    fn select_unknown_is_none() {
        let c = Catalog::from_endpoints(vec![Endpoint::new("a", HttpMethod::Get)]);
        assert!(c.select("a", HttpMethod::Delete).is_none());
        assert!(c.select("a", HttpMethod::Get).is_some());
    }
}
