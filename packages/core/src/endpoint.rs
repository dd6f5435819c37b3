//! Endpoints, their path parameters, and their DTO attributes.
//!
//! An [`Endpoint`] is created bare (path + method) from the catalog discovery
//! reply, then filled once from the Swagger document by
//! [`Catalog::apply_schema_document`](crate::Catalog::apply_schema_document).
//! After that only operator-supplied values change.

use std::collections::HashSet;
use std::sync::LazyLock;

use rand::Rng;
use regex::Regex;
use serde_json::Value;

use crate::http::{DataFlow, HttpMethod};
use crate::random::random_value_with;
use crate::types::{DataKind, FieldValue};

/// `{name}` placeholder inside an endpoint path.
static PARAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[a-zA-Z]+?\}").expect("invalid path parameter regex"));

/// Names of the request parameter that wraps a write endpoint's DTO schema.
///
/// Collection bodies use `items`, singleton updates `item`, and the generic
/// request wrappers `data` (POST) and `resultData` (PUT).
pub const INPUT_WRAPPER_NAMES: &[&str] = &["items", "item", "data", "resultData"];

// ---------------------------------------------------------------------------
// Parameter
// ---------------------------------------------------------------------------

/// A path-embedded input value, e.g. the `{id}` in `v1.0/Company/{id}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Placeholder including braces, exactly as it appears in the path.
    name: String,
    required: bool,
    type_label: String,
    value: FieldValue,
}

impl Parameter {
    pub fn new(name: impl Into<String>, required: bool, type_label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required,
            type_label: type_label.into(),
            value: FieldValue::Unset,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name without its surrounding braces.
    pub fn bare_name(&self) -> &str {
        self.name.trim_start_matches('{').trim_end_matches('}')
    }

    pub fn required(&self) -> bool {
        self.required
    }

    pub fn type_label(&self) -> &str {
        &self.type_label
    }

    pub fn kind(&self) -> DataKind {
        DataKind::from_label(&self.type_label)
    }

    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    /// Store operator text. Returns whether it converted to the declared kind.
    pub fn set_value(&mut self, raw: impl Into<String>) -> bool {
        self.value = FieldValue::from_raw(self.kind(), raw);
        self.value.is_valid()
    }

    pub fn clear_value(&mut self) {
        self.value = FieldValue::Unset;
    }

    pub fn is_supplied(&self) -> bool {
        self.value.is_valid()
    }
}

// ---------------------------------------------------------------------------
// Attribute
// ---------------------------------------------------------------------------

/// A DTO field of an endpoint, read (output) or written (input).
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    name: String,
    type_label: String,
    value: FieldValue,
    use_in_request: bool,
}

impl Attribute {
    /// Output attributes are included by default; input and no-flow ones are not.
    pub fn new(name: impl Into<String>, type_label: impl Into<String>, flow: DataFlow) -> Self {
        Self {
            name: name.into(),
            type_label: type_label.into(),
            value: FieldValue::Unset,
            use_in_request: flow == DataFlow::Output,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_label(&self) -> &str {
        &self.type_label
    }

    pub fn kind(&self) -> DataKind {
        DataKind::from_label(&self.type_label)
    }

    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    pub fn use_in_request(&self) -> bool {
        self.use_in_request
    }

    pub fn toggle_use_in_request(&mut self) {
        self.use_in_request ^= true;
    }

    pub fn set_use_in_request(&mut self, include: bool) {
        self.use_in_request = include;
    }

    /// Store operator text and keep the inclusion flag in step with it: a
    /// valid value includes the attribute, anything else excludes it.
    pub fn set_value(&mut self, raw: impl Into<String>) -> bool {
        self.value = FieldValue::from_raw(self.kind(), raw);
        self.use_in_request = self.value.is_valid();
        self.value.is_valid()
    }

    pub fn set_typed(&mut self, value: FieldValue) {
        self.use_in_request = value.is_valid();
        self.value = value;
    }

    pub fn clear_value(&mut self) {
        self.value = FieldValue::Unset;
        self.use_in_request = false;
    }

    pub fn is_supplied(&self) -> bool {
        self.value.is_valid()
    }
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// One `(path, method)` operation of the target API.
///
/// Ordering and equality use only the identity pair.
#[derive(Debug, Clone)]
pub struct Endpoint {
    path: String,
    method: HttpMethod,
    summary: String,
    dto_label: String,
    parameters: Vec<Parameter>,
    attributes: Vec<Attribute>,
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.method == other.method
    }
}

impl Eq for Endpoint {}

impl PartialOrd for Endpoint {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Endpoint {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.path, self.method).cmp(&(&other.path, other.method))
    }
}

impl Endpoint {
    pub fn new(path: impl Into<String>, method: HttpMethod) -> Self {
        Self {
            path: path.into(),
            method,
            summary: String::new(),
            dto_label: String::new(),
            parameters: Vec::new(),
            attributes: Vec::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// `"GET v1.0/Company"`
    pub fn complete_path(&self) -> String {
        format!("{} {}", self.method, self.path)
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn set_summary(&mut self, summary: impl Into<String>) {
        self.summary = summary.into();
    }

    pub fn dto_label(&self) -> &str {
        &self.dto_label
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut [Parameter] {
        &mut self.parameters
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut [Attribute] {
        &mut self.attributes
    }

    /// Look up a parameter by name, with or without braces.
    pub fn parameter_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        let bare = name.trim_start_matches('{').trim_end_matches('}');
        self.parameters.iter_mut().find(|p| p.bare_name() == bare)
    }

    pub fn attribute_mut(&mut self, name: &str) -> Option<&mut Attribute> {
        self.attributes.iter_mut().find(|a| a.name == name)
    }

    // --- Path ----------------------------------------------------------------

    /// All `{token}` placeholders of the path, braces included, in order.
    pub fn extract_input_params_from_path(&self) -> Vec<String> {
        PARAM_RE
            .find_iter(&self.path)
            .map(|m| m.as_str().to_string())
            .collect()
    }

    /// The path with every placeholder replaced by its parameter's value.
    /// Placeholders without a value keep their name, stripped of braces.
    pub fn path_with_parameters(&self) -> String {
        if !self.has_path_params() {
            return self.path.clone();
        }
        let substituted = PARAM_RE.replace_all(&self.path, |caps: &regex::Captures<'_>| {
            let token = &caps[0];
            match self.parameters.iter().find(|p| p.name == token) {
                Some(p) if p.value.is_set() => p.value.text(),
                _ => token.to_string(),
            }
        });
        substituted.replace(['{', '}'], "")
    }

    // --- Select clause -------------------------------------------------------

    pub fn all_attributes_selected(&self) -> bool {
        self.attributes.iter().all(Attribute::use_in_request)
    }

    /// Comma-joined names of the included attributes, or empty when every
    /// attribute is included (no restriction).
    pub fn build_select_clause(&self) -> String {
        if self.all_attributes_selected() {
            return String::new();
        }
        self.attributes
            .iter()
            .filter(|a| a.use_in_request)
            .map(Attribute::name)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Include (`true`) or exclude every attribute.
    pub fn select_all_attributes(&mut self, include: bool) {
        for a in &mut self.attributes {
            a.use_in_request = include;
        }
    }

    // --- Eligibility ---------------------------------------------------------

    pub fn has_path_params(&self) -> bool {
        !self.parameters.is_empty()
    }

    pub fn has_body_attributes(&self) -> bool {
        !self.attributes.is_empty()
    }

    pub fn is_at_least_one_path_parameter_supplied(&self) -> bool {
        !self.has_path_params() || self.parameters.iter().any(Parameter::is_supplied)
    }

    pub fn are_required_path_params_supplied(&self) -> bool {
        self.parameters
            .iter()
            .all(|p| !p.required || p.is_supplied())
    }

    /// Zero attributes, or a method without a body, always pass.
    pub fn is_at_least_one_body_attribute_supplied(&self) -> bool {
        if !self.has_body_attributes() || !self.method.body_required() {
            return true;
        }
        self.attributes.iter().any(Attribute::is_supplied)
    }

    /// The path names a placeholder but no parameter was parsed for it, or the
    /// method needs a body but there is no DTO.
    pub fn item_not_eligible(&self) -> bool {
        let params_missing = PARAM_RE.is_match(&self.path) && !self.has_path_params();
        let attributes_missing = self.method.body_required() && !self.has_body_attributes();
        params_missing || attributes_missing
    }

    /// True until the Swagger document has been applied.
    pub fn properties_are_not_set(&self) -> bool {
        self.summary.is_empty() && !self.has_path_params() && !self.has_body_attributes()
    }

    /// Every eligibility predicate that gates sending, in one call.
    pub fn ready_to_send(&self) -> bool {
        !self.item_not_eligible()
            && self.are_required_path_params_supplied()
            && self.is_at_least_one_body_attribute_supplied()
    }

    // --- Schema --------------------------------------------------------------

    /// Create one [`Parameter`] per path placeholder that the method's
    /// `parameters` array declares. Query parameters are ignored.
    pub fn set_params(&mut self, method: &Value) {
        self.parameters.clear();
        let mut tokens = self.extract_input_params_from_path();
        let mut seen = HashSet::new();
        tokens.retain(|t| seen.insert(t.clone()));
        let Some(declared) = method.get("parameters").and_then(Value::as_array) else {
            return;
        };

        for param in declared {
            let name = str_field(param, "name");
            for token in &tokens {
                if name == &token[1..token.len() - 1]
                    && !self.parameters.iter().any(|p| p.name() == token.as_str())
                {
                    let required = param
                        .get("required")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    self.parameters
                        .push(Parameter::new(token.clone(), required, make_type(param)));
                }
            }
        }
    }

    /// Locate the body DTO of a write method under one of the
    /// [`INPUT_WRAPPER_NAMES`] parameters.
    pub fn set_dto_input_definition_link(&mut self, method: &Value) {
        let Some(params) = method.get("parameters").and_then(Value::as_array) else {
            return;
        };
        for param in params {
            let name = str_field(param, "name");
            if INPUT_WRAPPER_NAMES
                .iter()
                .any(|w| w.eq_ignore_ascii_case(name))
            {
                self.dto_label = definition_label(param.get("schema"));
            }
        }
    }

    /// Locate the DTO returned by a read method in its `200` response.
    pub fn set_dto_output_definition_link(&mut self, method: &Value) {
        let schema = method
            .get("responses")
            .and_then(|r| r.get("200"))
            .and_then(|ok| ok.get("schema"));
        self.dto_label = definition_label(schema);
    }

    /// Rebuild the attribute list from the definition named by the DTO label.
    /// An unknown label leaves the endpoint without attributes.
    pub fn set_dto_attributes(&mut self, definitions: &Value, flow: DataFlow) {
        self.attributes.clear();
        let Some(properties) = definitions
            .get(&self.dto_label)
            .filter(|d| d.is_object())
            .and_then(|d| d.get("properties"))
            .and_then(Value::as_object)
        else {
            return;
        };
        for (name, property) in properties {
            self.attributes
                .push(Attribute::new(name.clone(), make_type(property), flow));
        }
    }

    /// Fill summary, parameters and DTO attributes from one Swagger
    /// method object.
    pub fn apply_method_schema(&mut self, method: &Value, definitions: &Value) {
        self.set_summary(str_field(method, "summary"));
        self.set_params(method);

        let flow = self.method.data_flow();
        match flow {
            DataFlow::Input => self.set_dto_input_definition_link(method),
            DataFlow::Output => self.set_dto_output_definition_link(method),
            DataFlow::NoFlow => {}
        }
        self.set_dto_attributes(definitions, flow);
    }

    // --- Operator data -------------------------------------------------------

    /// Fill every parameter with a generated value of its declared kind.
    pub fn generate_parameters<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for p in &mut self.parameters {
            if let Some(v) = random_value_with(rng, p.kind()) {
                p.value = FieldValue::from_typed(v);
            }
        }
    }

    /// Fill every attribute with a generated value of its declared kind.
    pub fn generate_attributes<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for a in &mut self.attributes {
            if let Some(v) = random_value_with(rng, a.kind()) {
                a.set_typed(FieldValue::from_typed(v));
            }
        }
    }

    pub fn clear_parameters(&mut self) {
        self.parameters.iter_mut().for_each(Parameter::clear_value);
    }

    pub fn clear_attributes(&mut self) {
        self.attributes.iter_mut().for_each(Attribute::clear_value);
    }
}

// --- helpers -----------------------------------------------------------------

fn str_field<'a>(obj: &'a Value, key: &str) -> &'a str {
    obj.get(key).and_then(Value::as_str).unwrap_or("")
}

fn make_type(obj: &Value) -> String {
    DataKind::make_label(str_field(obj, "type"), str_field(obj, "format"))
}

/// Last path segment of the `$ref` under `schema`, unwrapping one level of
/// `items` for array schemas.
fn definition_label(schema: Option<&Value>) -> String {
    let Some(mut schema) = schema else {
        return String::new();
    };
    if let Some(items) = schema.get("items").filter(|i| i.is_object()) {
        schema = items;
    }
    let link = str_field(schema, "$ref");
    link.rsplit('/').next().unwrap_or("").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn company_by_id() -> Endpoint {
        Endpoint::new("v1.0/Company/{id}/Person/{personId}", HttpMethod::Get)
    }

    #[test]
    fn set_params_matches_path_tokens_only() {
        let mut e = company_by_id();
        e.set_params(&json!({
            "parameters": [
                { "name": "id", "required": true, "type": "string", "format": "uuid" },
                { "name": "personId", "required": false, "type": "string", "format": "uuid" },
                { "name": "select", "in": "query", "type": "string" }
            ]
        }));
        let names: Vec<_> = e.parameters().iter().map(Parameter::name).collect();
        assert_eq!(names, vec!["{id}", "{personId}"]);
        assert!(e.parameters()[0].required());
        assert_eq!(e.parameters()[0].type_label(), "string/uuid");
        assert_eq!(e.parameters()[0].bare_name(), "id");

        let mut repeated = Endpoint::new("v1.0/Company/{id}/Copy/{id}", HttpMethod::Get);
        repeated.set_params(&json!({
            "parameters": [
                { "name": "id", "in": "path", "required": true, "type": "string" },
                { "name": "id", "in": "query", "type": "integer" }
            ]
        }));
        assert_eq!(repeated.parameters().len(), 1);
        assert_eq!(repeated.parameters()[0].type_label(), "string");
        repeated.parameter_mut("id").unwrap().set_value("A1");
        assert_eq!(repeated.path_with_parameters(), "v1.0/Company/A1/Copy/A1");
    }

    #[test]
    fn set_params_is_case_sensitive() {
        let mut e = Endpoint::new("v1.0/Company/{id}", HttpMethod::Get);
        e.set_params(&json!({ "parameters": [{ "name": "ID", "type": "string" }] }));
        assert!(e.parameters().is_empty());
        assert!(e.item_not_eligible());
    }

    #[test]
    fn path_with_all_parameters_has_no_braces() {
        let mut e = company_by_id();
        e.set_params(&json!({
            "parameters": [
                { "name": "id", "required": true, "type": "string" },
                { "name": "personId", "required": true, "type": "string" }
            ]
        }));
        e.parameter_mut("id").unwrap().set_value("A1");
        e.parameter_mut("{personId}").unwrap().set_value("B2");
        let path = e.path_with_parameters();
        assert_eq!(path, "v1.0/Company/A1/Person/B2");
        assert!(!path.contains('{') && !path.contains('}'));
    }

    #[test]
    fn unresolved_placeholder_is_stripped_of_braces() {
        let mut e = Endpoint::new("v1.0/Company/{id}", HttpMethod::Delete);
        e.set_params(&json!({ "parameters": [{ "name": "id", "type": "string" }] }));
        assert_eq!(e.path_with_parameters(), "v1.0/Company/id");
    }

    #[test]
    fn select_clause_empty_iff_all_included() {
        let mut e = Endpoint::new("v1.0/Company", HttpMethod::Get);
        e.attributes = vec![
            Attribute::new("ID", "string/uuid", DataFlow::Output),
            Attribute::new("Name", "string", DataFlow::Output),
            Attribute::new("Deleted", "boolean", DataFlow::Output),
        ];
        assert_eq!(e.build_select_clause(), "");

        e.attributes[1].toggle_use_in_request();
        assert_eq!(e.build_select_clause(), "ID,Deleted");

        e.select_all_attributes(false);
        e.attributes[2].toggle_use_in_request();
        assert_eq!(e.build_select_clause(), "Deleted");
    }

    #[test]
    fn input_link_uses_wrapper_table() {
        let mut e = Endpoint::new("v1.0/Company", HttpMethod::Post);
        e.set_dto_input_definition_link(&json!({
            "parameters": [{
                "name": "Items",
                "schema": { "type": "array", "items": { "$ref": "#/definitions/CompanyDto" } }
            }]
        }));
        assert_eq!(e.dto_label(), "CompanyDto");

        let mut e = Endpoint::new("v1.0/UpdateCompany", HttpMethod::Put);
        e.set_dto_input_definition_link(&json!({
            "parameters": [{ "name": "resultData", "schema": { "$ref": "#/definitions/CompanyRequest" } }]
        }));
        assert_eq!(e.dto_label(), "CompanyRequest");
    }

    #[test]
    fn output_link_unwraps_items() {
        let mut e = Endpoint::new("v1.0/Company", HttpMethod::Get);
        e.set_dto_output_definition_link(&json!({
            "responses": { "200": { "schema": { "items": { "$ref": "#/definitions/Company" } } } }
        }));
        assert_eq!(e.dto_label(), "Company");
    }

    #[test]
    fn unknown_definition_leaves_no_attributes() {
        let mut e = Endpoint::new("v1.0/Company", HttpMethod::Post);
        e.dto_label = "Missing".into();
        e.attributes = vec![Attribute::new("X", "string", DataFlow::Input)];
        e.set_dto_attributes(&json!({ "Other": { "properties": {} } }), DataFlow::Input);
        assert!(e.attributes().is_empty());
        assert!(e.item_not_eligible());
    }

    #[test]
    fn attribute_inclusion_defaults_follow_flow() {
        assert!(Attribute::new("a", "string", DataFlow::Output).use_in_request());
        assert!(!Attribute::new("a", "string", DataFlow::Input).use_in_request());
        assert!(!Attribute::new("a", "string", DataFlow::NoFlow).use_in_request());
    }

    #[test]
    fn attribute_inclusion_tracks_value_presence() {
        let mut a = Attribute::new("Count", "integer/int32", DataFlow::Input);
        assert!(a.set_value("3"));
        assert!(a.use_in_request());
        assert!(!a.set_value("three"));
        assert!(!a.use_in_request());
        a.set_value("4");
        a.clear_value();
        assert!(!a.use_in_request());
    }

    #[test]
    fn eligibility_predicates() {
        let mut e = Endpoint::new("v1.0/Company/{id}", HttpMethod::Put);
        e.set_params(&json!({ "parameters": [{ "name": "id", "required": true, "type": "string" }] }));
        e.attributes = vec![Attribute::new("Name", "string", DataFlow::Input)];

        assert!(!e.item_not_eligible());
        assert!(!e.are_required_path_params_supplied());
        assert!(!e.is_at_least_one_path_parameter_supplied());
        assert!(!e.is_at_least_one_body_attribute_supplied());
        assert!(!e.ready_to_send());

        e.parameter_mut("id").unwrap().set_value("x");
        e.attribute_mut("Name").unwrap().set_value("ACME");
        assert!(e.are_required_path_params_supplied());
        assert!(e.is_at_least_one_body_attribute_supplied());
        assert!(e.ready_to_send());
        // Predicates are pure: asking twice gives the same answer.
        assert_eq!(e.ready_to_send(), e.ready_to_send());
    }

    #[test]
    fn endpoints_order_by_path_then_method() {
        let mut v = vec![
            Endpoint::new("b", HttpMethod::Get),
            Endpoint::new("a", HttpMethod::Post),
            Endpoint::new("a", HttpMethod::Get),
        ];
        v.sort();
        let ids: Vec<_> = v.iter().map(Endpoint::complete_path).collect();
        assert_eq!(ids, vec!["GET a", "POST a", "GET b"]);
    }
}
