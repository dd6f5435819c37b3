//! Value-type taxonomy for Swagger-declared fields.
//!
//! A Swagger property or parameter declares its type as a `type[/format]`
//! label (e.g. `"integer/int32"`). [`DataKind::from_label`] maps that label to
//! one of six kinds the workbench knows how to coerce, serialise, and generate.
//! Unknown combinations map to [`DataKind::Undetermined`], which never
//! converts.
//!
//! Operator input is carried as a [`FieldValue`], which keeps the raw text the
//! operator typed alongside its coerced [`TypedValue`] when coercion succeeded.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat};
use uuid::Uuid;

/// The value kinds the workbench understands.
///
/// Serialised declared labels are listed in [`LABELS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    /// The declared label is not one of the known `type[/format]` combinations.
    Undetermined,
    String,
    Uuid,
    Date,
    Bool,
    Int,
    Float,
}

/// Declared `type[/format]` labels and the kind each maps to.
pub const LABELS: &[(&str, DataKind)] = &[
    ("string", DataKind::String),
    ("string/uuid", DataKind::Uuid),
    ("string/date-time", DataKind::Date),
    ("boolean", DataKind::Bool),
    ("integer/int32", DataKind::Int),
    ("number/double", DataKind::Float),
];

impl DataKind {
    /// Map a declared type label to its kind. Unknown labels yield
    /// [`DataKind::Undetermined`].
    pub fn from_label(label: &str) -> Self {
        LABELS
            .iter()
            .find(|(l, _)| *l == label)
            .map(|(_, kind)| *kind)
            .unwrap_or(DataKind::Undetermined)
    }

    /// Build the `type[/format]` label from the two Swagger fields, omitting
    /// the slash when either side is empty.
    pub fn make_label(type_name: &str, format: &str) -> String {
        if type_name.is_empty() || format.is_empty() {
            format!("{type_name}{format}")
        } else {
            format!("{type_name}/{format}")
        }
    }
}

impl std::fmt::Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataKind::Undetermined => write!(f, "undetermined"),
            DataKind::String => write!(f, "string"),
            DataKind::Uuid => write!(f, "uuid"),
            DataKind::Date => write!(f, "date"),
            DataKind::Bool => write!(f, "bool"),
            DataKind::Int => write!(f, "int"),
            DataKind::Float => write!(f, "float"),
        }
    }
}

/// A date-time as supplied by the operator: either with an explicit UTC
/// offset or without one.
#[derive(Debug, Clone, PartialEq)]
pub enum DateValue {
    Zoned(DateTime<FixedOffset>),
    Naive(NaiveDateTime),
}

impl DateValue {
    fn parse(raw: &str) -> Option<Self> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(DateValue::Zoned(dt));
        }
        for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
                return Some(DateValue::Naive(dt));
            }
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(DateValue::Naive)
    }

    /// ISO-8601 text with whole seconds.
    pub fn to_iso(&self) -> String {
        match self {
            DateValue::Zoned(dt) => dt.to_rfc3339_opts(SecondsFormat::Secs, true),
            DateValue::Naive(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
        }
    }
}

/// A successfully coerced value of one of the six known kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    String(String),
    Uuid(Uuid),
    Date(DateValue),
    Bool(bool),
    Int(i32),
    Float(f64),
}

impl TypedValue {
    /// Coerce raw operator text into a value of `kind`.
    ///
    /// Returns `None` when the text is not convertible. `Bool` always
    /// converts; [`DataKind::Undetermined`] never does.
    pub fn coerce(kind: DataKind, raw: &str) -> Option<Self> {
        match kind {
            DataKind::String => (!raw.is_empty()).then(|| TypedValue::String(raw.to_string())),
            DataKind::Uuid => Uuid::parse_str(raw.trim())
                .ok()
                .filter(|id| !id.is_nil())
                .map(TypedValue::Uuid),
            DataKind::Date => DateValue::parse(raw.trim()).map(TypedValue::Date),
            DataKind::Bool => Some(TypedValue::Bool(matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "true" | "1" | "yes" | "on"
            ))),
            DataKind::Int => raw.trim().parse::<i32>().ok().map(TypedValue::Int),
            DataKind::Float => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(TypedValue::Float),
            DataKind::Undetermined => None,
        }
    }

    pub fn kind(&self) -> DataKind {
        match self {
            TypedValue::String(_) => DataKind::String,
            TypedValue::Uuid(_) => DataKind::Uuid,
            TypedValue::Date(_) => DataKind::Date,
            TypedValue::Bool(_) => DataKind::Bool,
            TypedValue::Int(_) => DataKind::Int,
            TypedValue::Float(_) => DataKind::Float,
        }
    }

    /// Canonical text form. Coercing this text again yields the same value.
    pub fn canonical_text(&self) -> String {
        match self {
            TypedValue::String(s) => s.clone(),
            TypedValue::Uuid(id) => id.hyphenated().to_string(),
            TypedValue::Date(d) => d.to_iso(),
            TypedValue::Bool(b) => b.to_string(),
            TypedValue::Int(i) => i.to_string(),
            TypedValue::Float(f) => f.to_string(),
        }
    }

    /// The value as a JSON fragment for a request body: strings, dates and
    /// UUIDs quoted, booleans and numbers bare.
    pub fn to_json_fragment(&self) -> String {
        match self {
            TypedValue::String(_) | TypedValue::Uuid(_) | TypedValue::Date(_) => {
                serde_json::Value::String(self.canonical_text()).to_string()
            }
            TypedValue::Bool(_) | TypedValue::Int(_) | TypedValue::Float(_) => {
                self.canonical_text()
            }
        }
    }
}

/// Check whether `value` converts to `kind`, rewriting it to its canonical
/// text when it does.
pub fn is_value_convertible(kind: DataKind, value: &mut String) -> bool {
    match TypedValue::coerce(kind, value) {
        Some(typed) => {
            *value = typed.canonical_text();
            true
        }
        None => false,
    }
}

/// An operator-supplied value for a parameter or attribute.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldValue {
    /// Nothing supplied yet.
    #[default]
    Unset,
    /// Text was supplied but does not convert to the declared kind.
    Invalid { raw: String },
    /// Text was supplied and converted.
    Valid { raw: String, value: TypedValue },
}

impl FieldValue {
    /// Build a value from operator text. Empty text is [`FieldValue::Unset`].
    pub fn from_raw(kind: DataKind, raw: impl Into<String>) -> Self {
        let raw = raw.into();
        if raw.is_empty() {
            return FieldValue::Unset;
        }
        match TypedValue::coerce(kind, &raw) {
            Some(value) => FieldValue::Valid { raw, value },
            None => FieldValue::Invalid { raw },
        }
    }

    /// Wrap an already typed value (e.g. from the random generator).
    pub fn from_typed(value: TypedValue) -> Self {
        FieldValue::Valid {
            raw: value.canonical_text(),
            value,
        }
    }

    pub fn is_set(&self) -> bool {
        !matches!(self, FieldValue::Unset)
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, FieldValue::Valid { .. })
    }

    pub fn raw(&self) -> Option<&str> {
        match self {
            FieldValue::Unset => None,
            FieldValue::Invalid { raw } | FieldValue::Valid { raw, .. } => Some(raw),
        }
    }

    pub fn typed(&self) -> Option<&TypedValue> {
        match self {
            FieldValue::Valid { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Text used when substituting the value into a path: the canonical form
    /// for valid values, the raw text otherwise.
    pub fn text(&self) -> String {
        match self {
            FieldValue::Unset => String::new(),
            FieldValue::Invalid { raw } => raw.clone(),
            FieldValue::Valid { value, .. } => value.canonical_text(),
        }
    }
}
