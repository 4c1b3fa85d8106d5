//! # Records
//!
//! A [`Record`] is the local image of one remote record: the raw values last read from the
//! server, the decoded values built from them, and the list of fields edited locally since.
//!
//! Records are plain data. Everything that needs the network (`refresh`, `write`, `unlink`)
//! goes through the [`super::ModelProxy`] of their model.
use super::{
    Model,
    fields::{FieldDescriptor, FieldError, FieldKind, FieldValue},
};
use serde_json::{Map, Value};
use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};
use tracing::trace;

/// A lightweight `(model, id)` pointer to a record, as found in relational fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordRef {
    pub model: String,
    pub id: i64,
}

impl RecordRef {
    pub fn new(model: impl Into<String>, id: i64) -> Self {
        Self {
            model: model.into(),
            id,
        }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.model, self.id)
    }
}

impl PartialEq<Record> for RecordRef {
    fn eq(&self, other: &Record) -> bool {
        self.model == other.model() && self.id == other.id()
    }
}

#[derive(Debug, Clone)]
pub struct Record {
    schema: Arc<Model>,
    id: i64,
    /// Values as last read from the server, plus the raw shape of local edits.
    raw_data: Map<String, Value>,
    values: Map<String, Value>,
    fields_updated: Vec<String>,
}

impl Record {
    /// An empty record, nothing is loaded until the first refresh.
    pub(crate) fn new(schema: Arc<Model>, id: i64) -> Self {
        Self {
            schema,
            id,
            raw_data: Map::new(),
            values: Map::new(),
            fields_updated: Vec::new(),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// The name of the model this record belongs to.
    pub fn model(&self) -> &str {
        self.schema.name()
    }

    pub fn schema(&self) -> &Arc<Model> {
        &self.schema
    }

    pub fn reference(&self) -> RecordRef {
        RecordRef::new(self.model(), self.id)
    }

    /// The raw values last read from the server.
    pub fn raw_data(&self) -> &Map<String, Value> {
        &self.raw_data
    }

    /// Names of the fields edited since the last refresh, in assignment order.
    pub fn dirty_fields(&self) -> &[String] {
        &self.fields_updated
    }

    pub fn is_dirty(&self) -> bool {
        !self.fields_updated.is_empty()
    }

    /// Reads the current (possibly locally edited) value of `field`.
    ///
    /// # Returns
    ///
    /// * `Ok(FieldValue)` - The decoded value.
    /// * `Err(FieldError::UnknownField)` - If the model has no such field.
    /// * `Err(FieldError::NotLoaded)` - If the record was never refreshed.
    pub fn get(&self, field: &str) -> Result<FieldValue, FieldError> {
        if field == "id" {
            return Ok(FieldValue::Value(Value::from(self.id)));
        }

        let descriptor = self.descriptor(field)?;
        let raw = self
            .values
            .get(field)
            .ok_or_else(|| FieldError::NotLoaded {
                field: field.to_string(),
            })?;

        Ok(descriptor.decode(raw))
    }

    /// Assigns `value` to `field` after validating it.
    ///
    /// A rejected value leaves the record untouched.
    pub fn set(&mut self, field: &str, value: impl Into<FieldValue>) -> Result<(), FieldError> {
        if field == "id" {
            return Err(FieldError::ReadOnly {
                field: field.to_string(),
            });
        }

        let descriptor = self.descriptor(field)?;
        if descriptor.is_synthetic() {
            return Err(FieldError::ReadOnly {
                field: field.to_string(),
            });
        }

        let raw = descriptor.encode(value.into())?;
        trace!(model = self.model(), id = self.id, field, value = %raw, "field assigned");

        self.values.insert(field.to_string(), raw);
        if !self.fields_updated.iter().any(|f| f == field) {
            self.fields_updated.push(field.to_string());
        }

        Ok(())
    }

    /// Drops local edits, values are rebuilt from the last raw data.
    pub fn reset(&mut self) {
        self.fields_updated.clear();
        self.values = self
            .schema
            .fields()
            .filter_map(|f| {
                self.raw_data
                    .get(f.name())
                    .map(|raw| (f.name().to_string(), raw.clone()))
            })
            .collect();
    }

    /// Replaces the raw data with a fresh server read and drops local edits.
    pub(crate) fn load(&mut self, raw_data: Map<String, Value>) {
        self.raw_data = raw_data;
        self.reset();
    }

    #[cfg(test)]
    pub(crate) fn set_raw(&mut self, field: &str, value: Value) {
        self.raw_data.insert(field.to_string(), value);
    }

    /// The `write` payload of the dirty fields.
    ///
    /// Only fields present in the raw data are sent. Relations are sent as ids and
    /// x2many fields are skipped, the server would reject them in their read shape.
    pub(crate) fn changes(&self) -> Map<String, Value> {
        let mut changes = Map::new();
        for field in &self.fields_updated {
            if !self.raw_data.contains_key(field) {
                continue;
            }
            let (Some(descriptor), Some(raw)) = (self.schema.field(field), self.values.get(field))
            else {
                continue;
            };

            let value = match descriptor.kind() {
                FieldKind::Many2One { .. } => match raw {
                    Value::Array(pair) => pair.first().cloned().unwrap_or(Value::Bool(false)),
                    Value::Number(_) => raw.clone(),
                    _ => Value::Bool(false),
                },
                FieldKind::One2Many { .. } | FieldKind::Many2Many { .. } => continue,
                _ => raw.clone(),
            };
            changes.insert(field.clone(), value);
        }
        changes
    }

    fn descriptor(&self, field: &str) -> Result<&FieldDescriptor, FieldError> {
        self.schema
            .field(field)
            .ok_or_else(|| FieldError::UnknownField {
                model: self.model().to_string(),
                field: field.to_string(),
            })
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.model() == other.model() && self.id == other.id
    }
}

impl Eq for Record {}

impl PartialEq<RecordRef> for Record {
    fn eq(&self, other: &RecordRef) -> bool {
        other == self
    }
}

impl Hash for Record {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.model().hash(state);
        self.id.hash(state);
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "browse_record({}, {})", self.model(), self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn partner_schema() -> Arc<Model> {
        let Value::Object(fields) = json!({
            "name": {"type": "char", "string": "Name", "required": true, "size": 64},
            "credit_limit": {"type": "float"},
            "comment": {"type": "text"},
            "country_id": {"type": "many2one", "relation": "res.country"},
            "category_id": {"type": "many2many", "relation": "res.partner.category"},
        }) else {
            unreachable!()
        };
        Arc::new(Model::from_fields_get("res.partner", &fields).unwrap())
    }

    fn loaded_partner() -> Record {
        let mut record = Record::new(partner_schema(), 42);
        let Value::Object(raw) = json!({
            "id": 42,
            "name": "Acme",
            "credit_limit": 100.0,
            "comment": false,
            "country_id": [74, "France"],
            "category_id": [1, 2],
        }) else {
            unreachable!()
        };
        record.load(raw);
        record
    }

    #[test]
    fn test_get_decodes_values() {
        let record = loaded_partner();

        assert_eq!(record.get("id").unwrap().as_i64(), Some(42));
        assert_eq!(record.get("name").unwrap().as_str(), Some("Acme"));
        assert_eq!(
            record.get("country_id").unwrap(),
            FieldValue::Record(RecordRef::new("res.country", 74))
        );
        assert_eq!(
            record.get("missing"),
            Err(FieldError::UnknownField {
                model: "res.partner".to_string(),
                field: "missing".to_string(),
            })
        );
    }

    #[test]
    fn test_unloaded_record() {
        let record = Record::new(partner_schema(), 7);
        assert_eq!(
            record.get("name"),
            Err(FieldError::NotLoaded {
                field: "name".to_string()
            })
        );
    }

    #[test]
    fn test_dirty_fields_are_deduplicated_in_order() {
        let mut record = loaded_partner();

        record.set("credit_limit", 250.0).unwrap();
        record.set("comment", "vip").unwrap();
        record.set("credit_limit", 300.0).unwrap();

        assert_eq!(record.dirty_fields(), ["credit_limit", "comment"]);
        assert_eq!(record.get("credit_limit").unwrap().as_f64(), Some(300.0));
        assert_eq!(record.raw_data()["credit_limit"], json!(100.0));
    }

    #[test]
    fn test_rejected_value_leaves_record_unchanged() {
        let mut record = loaded_partner();

        assert!(record.set("name", false).is_err());
        assert!(record.set("country_id", RecordRef::new("res.partner", 1)).is_err());
        let tags = vec![RecordRef::new("res.partner.category", 3)];
        assert!(record.set("category_id", tags).is_err());
        assert!(matches!(
            record.set("id", 3),
            Err(FieldError::ReadOnly { .. })
        ));

        assert!(!record.is_dirty());
        assert_eq!(record.get("name").unwrap().as_str(), Some("Acme"));
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut record = loaded_partner();
        record.set("credit_limit", 250.0).unwrap();

        record.reset();
        let first: Vec<_> = ["name", "credit_limit", "country_id"]
            .iter()
            .map(|f| record.get(f).unwrap())
            .collect();
        record.reset();
        let second: Vec<_> = ["name", "credit_limit", "country_id"]
            .iter()
            .map(|f| record.get(f).unwrap())
            .collect();

        assert_eq!(first, second);
        assert!(!record.is_dirty());
        assert_eq!(record.get("credit_limit").unwrap().as_f64(), Some(100.0));
    }

    #[test]
    fn test_changes_payload() {
        let mut record = loaded_partner();
        assert!(record.changes().is_empty());

        record.set("credit_limit", 250.0).unwrap();
        record.set("country_id", RecordRef::new("res.country", 75)).unwrap();
        assert_eq!(
            Value::Object(record.changes()),
            json!({"credit_limit": 250.0, "country_id": 75})
        );

        record.set("country_id", FieldValue::Empty).unwrap();
        assert_eq!(record.changes()["country_id"], json!(false));
    }

    #[test]
    fn test_identity() {
        let schema = partner_schema();
        let a = Record::new(schema.clone(), 1);
        let mut b = Record::new(schema, 1);
        b.set_raw("name", json!("changed"));
        let c = Record::new(partner_schema(), 2);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, RecordRef::new("res.partner", 1));
        assert_eq!(RecordRef::new("res.partner", 1), a);
        assert_ne!(a, RecordRef::new("res.users", 1));

        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_display() {
        let record = Record::new(partner_schema(), 42);
        assert_eq!(record.to_string(), "browse_record(res.partner, 42)");
        assert_eq!(record.reference().to_string(), "res.partner,42");
    }
}
