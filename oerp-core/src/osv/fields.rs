//! # Field Descriptors
//!
//! A [`FieldDescriptor`] is the local representation of one field of a remote model, built
//! from the metadata returned by `fields_get`. The `type` reported by the server is mapped
//! once, at schema-build time, onto the closed [`FieldKind`] enum.
//!
//! Each descriptor knows how to:
//!
//! * **decode** a raw value, as returned by `read`, into the [`FieldValue`] exposed to callers
//!   (e.g. a `[id, label]` pair becomes a [`RecordRef`]),
//! * **validate and encode** a value assigned by the caller back into the raw wire shape.
//!
//! | Kind         | Raw value          | Exposed value             |
//! |--------------|--------------------|---------------------------|
//! | plain value  | any                | [`FieldValue::Value`]     |
//! | selection    | selection code     | [`FieldValue::Value`]     |
//! | date         | `YYYY-MM-DD`       | [`FieldValue::Date`]      |
//! | datetime     | `YYYY-MM-DD HH:MM:SS` | [`FieldValue::DateTime`] |
//! | many2one     | `[id, label]`      | [`FieldValue::Record`]    |
//! | one2many / many2many | `[id, ...]` | [`FieldValue::Records`] |
//! | reference    | `"model,id"`       | [`FieldValue::Record`]    |
//!
//! The ERP `false` of an unset relation is exposed as [`FieldValue::Empty`].
use super::record::{Record, RecordRef};
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{Map, Value, json};
use std::fmt;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Errors raised locally when reading or assigning a field, before any network call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FieldError {
    #[error("Invalid value for the '{field}' field: {reason}")]
    Validation { field: String, reason: String },

    #[error("Record of '{found}' supplied doesn't match the relation '{expected}' of the '{field}' field")]
    RelationMismatch {
        field: String,
        expected: String,
        found: String,
    },

    #[error("Assigning the {kind} field '{field}' is not supported")]
    NotSupported { field: String, kind: &'static str },

    #[error("The '{model}' model has no field named '{field}'")]
    UnknownField { model: String, field: String },

    #[error("The '{field}' field is read-only")]
    ReadOnly { field: String },

    #[error("The '{field}' field has not been loaded")]
    NotLoaded { field: String },
}

/// Scalar field types, stored and exposed as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Char,
    Float,
    Integer,
    Boolean,
    Text,
    Binary,
}

impl ValueType {
    fn from_type(kind: &str) -> Option<Self> {
        match kind {
            "char" => Some(ValueType::Char),
            "float" => Some(ValueType::Float),
            "integer" => Some(ValueType::Integer),
            "boolean" => Some(ValueType::Boolean),
            "text" => Some(ValueType::Text),
            "binary" => Some(ValueType::Binary),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Char => "char",
            ValueType::Float => "float",
            ValueType::Integer => "integer",
            ValueType::Boolean => "boolean",
            ValueType::Text => "text",
            ValueType::Binary => "binary",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Value(ValueType),
    /// Allowed `(code, label)` pairs.
    Selection {
        choices: Vec<(Value, String)>,
    },
    Date,
    DateTime,
    Many2One {
        relation: String,
    },
    One2Many {
        relation: String,
        relation_field: Option<String>,
    },
    Many2Many {
        relation: String,
    },
    /// Allowed `(model, label)` targets.
    Reference {
        models: Vec<(String, String)>,
    },
}

impl FieldKind {
    /// The server type name (`char`, `many2one`, ...).
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::Value(value_type) => value_type.as_str(),
            FieldKind::Selection { .. } => "selection",
            FieldKind::Date => "date",
            FieldKind::DateTime => "datetime",
            FieldKind::Many2One { .. } => "many2one",
            FieldKind::One2Many { .. } => "one2many",
            FieldKind::Many2Many { .. } => "many2many",
            FieldKind::Reference { .. } => "reference",
        }
    }

    /// The related model of relational kinds.
    pub fn relation(&self) -> Option<&str> {
        match self {
            FieldKind::Many2One { relation }
            | FieldKind::One2Many { relation, .. }
            | FieldKind::Many2Many { relation } => Some(relation),
            _ => None,
        }
    }
}

/// A value read from, or assigned to, a record field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(Value),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Record(RecordRef),
    Records(Vec<RecordRef>),
    /// No relation (or no date) set: the ERP `false`.
    Empty,
}

impl FieldValue {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            FieldValue::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_value().and_then(Value::as_f64)
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_value().and_then(Value::as_i64)
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_value().and_then(Value::as_bool)
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            FieldValue::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&RecordRef> {
        match self {
            FieldValue::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_records(&self) -> Option<&[RecordRef]> {
        match self {
            FieldValue::Records(refs) => Some(refs),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, FieldValue::Empty)
    }

    /// A JSON rendering of the value, for display purposes.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Value(v) => v.clone(),
            FieldValue::Date(d) => Value::String(d.format(DATE_FORMAT).to_string()),
            FieldValue::DateTime(dt) => Value::String(dt.format(DATETIME_FORMAT).to_string()),
            FieldValue::Record(r) => json!({ "model": r.model, "id": r.id }),
            FieldValue::Records(refs) => {
                Value::Array(refs.iter().map(|r| Value::from(r.id)).collect())
            }
            FieldValue::Empty => Value::Bool(false),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            FieldValue::Value(_) => "plain",
            FieldValue::Date(_) => "date",
            FieldValue::DateTime(_) => "datetime",
            FieldValue::Record(_) => "record",
            FieldValue::Records(_) => "record list",
            FieldValue::Empty => "empty",
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Value(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Value(Value::String(value.to_string()))
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Value(Value::String(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Value(Value::from(value))
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Value(Value::from(value))
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Value(Value::from(value))
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Value(Value::Bool(value))
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(value: NaiveDate) -> Self {
        FieldValue::Date(value)
    }
}

impl From<NaiveDateTime> for FieldValue {
    fn from(value: NaiveDateTime) -> Self {
        FieldValue::DateTime(value)
    }
}

impl From<RecordRef> for FieldValue {
    fn from(value: RecordRef) -> Self {
        FieldValue::Record(value)
    }
}

impl From<&RecordRef> for FieldValue {
    fn from(value: &RecordRef) -> Self {
        FieldValue::Record(value.clone())
    }
}

impl From<&Record> for FieldValue {
    fn from(value: &Record) -> Self {
        FieldValue::Record(value.reference())
    }
}

impl From<Vec<RecordRef>> for FieldValue {
    fn from(value: Vec<RecordRef>) -> Self {
        FieldValue::Records(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Empty, Into::into)
    }
}

/// The local description of one remote field.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    name: String,
    kind: FieldKind,
    string: Option<String>,
    help: Option<String>,
    size: Option<usize>,
    required: bool,
    readonly: bool,
    domain: Option<Value>,
    context: Option<Value>,
    synthetic: bool,
}

impl FieldDescriptor {
    /// Builds a descriptor from one entry of a `fields_get` result.
    ///
    /// Returns `None` if the reported `type` is missing or unknown.
    pub fn from_metadata(name: &str, meta: &Map<String, Value>) -> Option<Self> {
        let type_name = meta.get("type").and_then(Value::as_str)?;

        let relation = || {
            meta.get("relation")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let kind = match type_name {
            "selection" => FieldKind::Selection {
                choices: selection_pairs(meta.get("selection"))
                    .into_iter()
                    .map(|(code, label)| (code.clone(), label))
                    .collect(),
            },
            "date" => FieldKind::Date,
            "datetime" => FieldKind::DateTime,
            "many2one" => FieldKind::Many2One {
                relation: relation(),
            },
            "one2many" => FieldKind::One2Many {
                relation: relation(),
                relation_field: non_empty_str(meta.get("relation_field")),
            },
            "many2many" => FieldKind::Many2Many {
                relation: relation(),
            },
            "reference" => FieldKind::Reference {
                models: selection_pairs(meta.get("selection"))
                    .into_iter()
                    .filter_map(|(code, label)| code.as_str().map(|m| (m.to_string(), label)))
                    .collect(),
            },
            other => FieldKind::Value(ValueType::from_type(other)?),
        };

        Some(Self {
            name: name.to_string(),
            kind,
            string: non_empty_str(meta.get("string")),
            help: non_empty_str(meta.get("help")),
            size: meta
                .get("size")
                .and_then(Value::as_u64)
                .filter(|size| *size > 0)
                .and_then(|size| usize::try_from(size).ok()),
            required: meta.get("required").is_some_and(is_truthy),
            readonly: meta.get("readonly").is_some_and(is_truthy),
            domain: meta.get("domain").filter(|d| is_truthy(d)).cloned(),
            context: meta.get("context").filter(|c| is_truthy(c)).cloned(),
            synthetic: false,
        })
    }

    /// The read-only `name` field added to models that don't declare one.
    /// Its value is filled from `name_get`.
    pub fn synthetic_name() -> Self {
        Self {
            name: "name".to_string(),
            kind: FieldKind::Value(ValueType::Text),
            string: Some("Name".to_string()),
            help: None,
            size: None,
            required: false,
            readonly: true,
            domain: None,
            context: None,
            synthetic: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    pub fn relation(&self) -> Option<&str> {
        self.kind.relation()
    }

    /// The human readable label of the field.
    pub fn string(&self) -> Option<&str> {
        self.string.as_deref()
    }

    pub fn help(&self) -> Option<&str> {
        self.help.as_deref()
    }

    pub fn size(&self) -> Option<usize> {
        self.size
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn domain(&self) -> Option<&Value> {
        self.domain.as_ref()
    }

    pub fn context(&self) -> Option<&Value> {
        self.context.as_ref()
    }

    /// Whether the field was added locally rather than reported by the server.
    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    /// Turns a raw value, as returned by `read`, into the exposed value.
    pub fn decode(&self, raw: &Value) -> FieldValue {
        match &self.kind {
            FieldKind::Value(_) | FieldKind::Selection { .. } => FieldValue::Value(raw.clone()),
            FieldKind::Date => raw
                .as_str()
                .and_then(|s| NaiveDate::parse_from_str(s, DATE_FORMAT).ok())
                .map_or_else(|| FieldValue::Value(raw.clone()), FieldValue::Date),
            FieldKind::DateTime => raw
                .as_str()
                .and_then(|s| NaiveDateTime::parse_from_str(s, DATETIME_FORMAT).ok())
                .map_or_else(|| FieldValue::Value(raw.clone()), FieldValue::DateTime),
            FieldKind::Many2One { relation } => {
                let id = match raw {
                    Value::Array(pair) => pair.first().and_then(Value::as_i64),
                    Value::Number(n) => n.as_i64(),
                    _ => None,
                };
                id.filter(|id| *id > 0)
                    .map_or(FieldValue::Empty, |id| {
                        FieldValue::Record(RecordRef::new(relation.as_str(), id))
                    })
            }
            FieldKind::One2Many { relation, .. } | FieldKind::Many2Many { relation } => {
                let ids = raw.as_array().map(Vec::as_slice).unwrap_or_default();
                FieldValue::Records(
                    ids.iter()
                        .filter_map(Value::as_i64)
                        .map(|id| RecordRef::new(relation.as_str(), id))
                        .collect(),
                )
            }
            FieldKind::Reference { .. } => raw
                .as_str()
                .and_then(parse_reference)
                .map_or(FieldValue::Empty, FieldValue::Record),
        }
    }

    /// Validates an assigned value and turns it into its raw shape.
    ///
    /// # Returns
    ///
    /// * `Ok(Value)` - The raw value to store in the record.
    /// * `Err(FieldError)` - The value is rejected; nothing must be stored.
    pub fn encode(&self, value: FieldValue) -> Result<Value, FieldError> {
        match &self.kind {
            FieldKind::Value(_) => {
                let raw = self.plain(value)?;
                self.check_common(&raw)?;
                Ok(raw)
            }
            FieldKind::Selection { choices } => {
                let raw = self.plain(value)?;
                self.check_common(&raw)?;
                if is_truthy(&raw) && !choices.iter().any(|(code, _)| *code == raw) {
                    let codes: Vec<String> = choices.iter().map(|(c, _)| c.to_string()).collect();
                    return Err(self.invalid(format!(
                        "the value {raw} doesn't match the possible values [{}]",
                        codes.join(", ")
                    )));
                }
                Ok(raw)
            }
            FieldKind::Date => {
                let raw = match value {
                    FieldValue::Date(d) => Value::String(d.format(DATE_FORMAT).to_string()),
                    FieldValue::DateTime(dt) => {
                        Value::String(dt.date().format(DATE_FORMAT).to_string())
                    }
                    FieldValue::Value(Value::String(s)) => {
                        if NaiveDate::parse_from_str(&s, DATE_FORMAT).is_err() {
                            return Err(self.invalid(format!(
                                "'{s}' is not well formatted, expecting '{DATE_FORMAT}'"
                            )));
                        }
                        Value::String(s)
                    }
                    v if is_falsy_input(&v) => Value::Bool(false),
                    other => {
                        return Err(self.invalid(format!(
                            "expecting a date or a string, got a {} value",
                            other.describe()
                        )));
                    }
                };
                self.check_common(&raw)?;
                Ok(raw)
            }
            FieldKind::DateTime => {
                let raw = match value {
                    FieldValue::DateTime(dt) => {
                        Value::String(dt.format(DATETIME_FORMAT).to_string())
                    }
                    FieldValue::Value(Value::String(s)) => {
                        if NaiveDateTime::parse_from_str(&s, DATETIME_FORMAT).is_err() {
                            return Err(self.invalid(format!(
                                "'{s}' is not well formatted, expecting '{DATETIME_FORMAT}'"
                            )));
                        }
                        Value::String(s)
                    }
                    v if is_falsy_input(&v) => Value::Bool(false),
                    other => {
                        return Err(self.invalid(format!(
                            "expecting a datetime or a string, got a {} value",
                            other.describe()
                        )));
                    }
                };
                self.check_common(&raw)?;
                Ok(raw)
            }
            FieldKind::Many2One { relation } => {
                let target = match value {
                    FieldValue::Record(r) => Some(r),
                    FieldValue::Value(Value::Number(n)) => {
                        return Err(self.invalid(format!(
                            "the ID {n} must be browsed first, use `Session::set_many2one`"
                        )));
                    }
                    v if is_falsy_input(&v) => None,
                    other => {
                        return Err(self.invalid(format!(
                            "expecting a record or false, got a {} value",
                            other.describe()
                        )));
                    }
                };

                if let Some(target) = &target
                    && target.model != *relation
                {
                    return Err(FieldError::RelationMismatch {
                        field: self.name.clone(),
                        expected: relation.clone(),
                        found: target.model.clone(),
                    });
                }

                match target {
                    Some(target) => Ok(json!([target.id, false])),
                    None if self.required => Err(self.invalid("a value is required")),
                    None => Ok(Value::Bool(false)),
                }
            }
            FieldKind::One2Many { .. } | FieldKind::Many2Many { .. } => {
                Err(FieldError::NotSupported {
                    field: self.name.clone(),
                    kind: self.type_name(),
                })
            }
            FieldKind::Reference { models } => {
                let raw = match value {
                    FieldValue::Record(r) => {
                        self.check_reference_target(models, &r.model)?;
                        Value::String(format!("{},{}", r.model, r.id))
                    }
                    FieldValue::Value(Value::String(s)) => {
                        let Some(target) = parse_reference(&s) else {
                            return Err(self.invalid(format!(
                                "'{s}' is not well formatted, expecting '{{model}},{{id}}'"
                            )));
                        };
                        self.check_reference_target(models, &target.model)?;
                        Value::String(s)
                    }
                    v if is_falsy_input(&v) => Value::Bool(false),
                    other => {
                        return Err(self.invalid(format!(
                            "expecting a record or a string, got a {} value",
                            other.describe()
                        )));
                    }
                };
                self.check_common(&raw)?;
                Ok(raw)
            }
        }
    }

    fn plain(&self, value: FieldValue) -> Result<Value, FieldError> {
        match value {
            FieldValue::Value(v) => Ok(v),
            FieldValue::Empty => Ok(Value::Bool(false)),
            other => Err(self.invalid(format!(
                "a {} value can't be assigned to a {} field",
                other.describe(),
                self.type_name()
            ))),
        }
    }

    /// Size and required checks shared by every kind.
    fn check_common(&self, raw: &Value) -> Result<(), FieldError> {
        if let Some(size) = self.size
            && is_truthy(raw)
        {
            let Some(s) = raw.as_str() else {
                return Err(self.invalid("the value supplied has to be a string"));
            };
            if s.chars().count() > size {
                return Err(self.invalid(format!("the length is limited to {size}")));
            }
        }

        if self.required && !is_truthy(raw) {
            return Err(self.invalid("a value is required"));
        }

        Ok(())
    }

    fn check_reference_target(
        &self,
        models: &[(String, String)],
        model: &str,
    ) -> Result<(), FieldError> {
        // An empty selection is computed server-side, any target is accepted then.
        if models.is_empty() || models.iter().any(|(m, _)| m == model) {
            return Ok(());
        }

        let allowed: Vec<&str> = models.iter().map(|(m, _)| m.as_str()).collect();
        Err(FieldError::RelationMismatch {
            field: self.name.clone(),
            expected: allowed.join(" | "),
            found: model.to_string(),
        })
    }

    fn invalid(&self, reason: impl Into<String>) -> FieldError {
        FieldError::Validation {
            field: self.name.clone(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut attrs = Vec::new();
        if let Some(string) = &self.string {
            attrs.push(format!("string='{string}'"));
        }
        if let Some(relation) = self.relation().filter(|r| !r.is_empty()) {
            attrs.push(format!("relation='{relation}'"));
        }
        if self.required {
            attrs.push("required=true".to_string());
        }
        if self.readonly {
            attrs.push("readonly=true".to_string());
        }
        if let Some(size) = self.size {
            attrs.push(format!("size={size}"));
        }
        if let Some(domain) = &self.domain {
            attrs.push(format!("domain={domain}"));
        }
        write!(f, "{}({})", self.type_name(), attrs.join(", "))
    }
}

/// The ERP notion of truthiness: `false`, `null`, `0`, `""`, `[]` and `{}` are all falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(members) => !members.is_empty(),
    }
}

/// Parses a `"model,id"` reference.
pub fn parse_reference(value: &str) -> Option<RecordRef> {
    let (model, id) = value.rsplit_once(',')?;
    let model = model.trim();
    let id = id.trim().parse::<i64>().ok()?;
    if model.is_empty() || id <= 0 {
        return None;
    }
    Some(RecordRef::new(model, id))
}

fn is_falsy_input(value: &FieldValue) -> bool {
    match value {
        FieldValue::Empty => true,
        FieldValue::Value(v) => v.is_null() || *v == Value::Bool(false),
        _ => false,
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn selection_pairs(value: Option<&Value>) -> Vec<(&Value, String)> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let pair = item.as_array()?;
            let code = pair.first()?;
            let label = pair
                .get(1)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Some((code, label))
        })
        .collect()
}
