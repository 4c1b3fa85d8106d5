//! # Models
//!
//! A remote model is described locally by a [`Model`]: its name and the [`FieldDescriptor`]s
//! built from one `fields_get` call. Schemas are immutable once built and shared through an
//! `Arc` between the session cache and every [`Record`] browsed from the model.
//!
//! A [`ModelProxy`] borrows the [`Session`] and binds it to one model. It browses records and
//! forwards any other method verbatim to the server, the method surface of a model being
//! open-ended.
pub mod fields;
pub mod record;

use crate::{
    error::{Error, Result},
    rpc::{Connector, Transport},
    session::{SearchParams, Session},
};
use fields::FieldDescriptor;
use futures_util::{Stream, stream};
use record::Record;
use serde_json::{Map, Value};
use std::{collections::BTreeMap, sync::Arc};
use tracing::debug;

/// The schema of one remote model.
#[derive(Debug, Clone)]
pub struct Model {
    name: String,
    fields: BTreeMap<String, FieldDescriptor>,
}

impl Model {
    /// Builds the schema from the result of `fields_get`.
    ///
    /// `id` and the `__`-prefixed bookkeeping fields are skipped. A read-only `name` field is
    /// synthesized if the model doesn't declare one.
    ///
    /// # Returns
    ///
    /// * `Ok(Model)` - The schema.
    /// * `Err(Error::UnsupportedFieldKind)` - If a field has a type this client doesn't know.
    pub fn from_fields_get(name: &str, fields_get: &Map<String, Value>) -> Result<Self> {
        let mut fields = BTreeMap::new();

        for (field_name, meta) in fields_get {
            if field_name == "id" || field_name.starts_with("__") {
                continue;
            }

            let descriptor = meta
                .as_object()
                .and_then(|meta| FieldDescriptor::from_metadata(field_name, meta))
                .ok_or_else(|| Error::UnsupportedFieldKind {
                    model: name.to_string(),
                    field: field_name.clone(),
                    kind: meta
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or("<missing>")
                        .to_string(),
                })?;

            fields.insert(field_name.clone(), descriptor);
        }

        if !fields.contains_key("name") {
            fields.insert("name".to_string(), FieldDescriptor::synthetic_name());
        }

        debug!(model = name, fields = fields.len(), "schema built");

        Ok(Self {
            name: name.to_string(),
            fields,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field descriptors, sorted by name.
    pub fn fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.values()
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.get(name)
    }

    /// Whether the `name` field is local and filled from `name_get`.
    pub fn has_synthetic_name(&self) -> bool {
        self.fields.get("name").is_some_and(FieldDescriptor::is_synthetic)
    }
}

/// A [`Session`] bound to one remote model.
pub struct ModelProxy<'s, T: Transport = Connector> {
    session: &'s mut Session<T>,
    schema: Arc<Model>,
}

impl<'s, T: Transport> ModelProxy<'s, T> {
    pub(crate) fn new(session: &'s mut Session<T>, schema: Arc<Model>) -> Self {
        Self { session, schema }
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn schema(&self) -> &Arc<Model> {
        &self.schema
    }

    /// Browses one record, read from the server immediately.
    ///
    /// # Returns
    ///
    /// * `Ok(Record)` - The loaded record.
    /// * `Err(Error::UnknownRecord)` - If the server has no record with this id.
    pub async fn browse(&mut self, id: i64) -> Result<Record> {
        let mut record = Record::new(self.schema.clone(), id);
        self.session.refresh(&mut record).await?;
        Ok(record)
    }

    /// Browses the records of `ids` lazily: one read per record, when the stream is polled.
    ///
    /// The stream is finite and can be rebuilt from the same ids to iterate again.
    pub fn browse_many(self, ids: Vec<i64>) -> impl Stream<Item = Result<Record>> + 's {
        stream::unfold((self, ids.into_iter()), |(mut proxy, mut ids)| async move {
            let id = ids.next()?;
            let record = proxy.browse(id).await;
            Some((record, (proxy, ids)))
        })
    }

    /// Searches the ids matching `domain`, then browses them lazily.
    pub async fn browse_all(
        mut self,
        domain: Value,
    ) -> Result<impl Stream<Item = Result<Record>> + 's> {
        let ids = self.search(domain).await?;
        Ok(self.browse_many(ids))
    }

    pub async fn search(&mut self, domain: Value) -> Result<Vec<i64>> {
        self.session.search(self.schema.name(), domain).await
    }

    pub async fn search_with(&mut self, domain: Value, params: SearchParams) -> Result<Vec<i64>> {
        self.session.search_with(self.schema.name(), domain, params).await
    }

    /// Counts the records matching `domain`.
    pub async fn count(&mut self, domain: Value) -> Result<i64> {
        self.session.search_count(self.schema.name(), domain).await
    }

    pub async fn create(&mut self, values: Map<String, Value>) -> Result<i64> {
        self.session.create(self.schema.name(), values).await
    }

    /// Forwards any method of the model verbatim: `execute(model, method, *args)`.
    pub async fn call(&mut self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.session.execute(self.schema.name(), method, args).await
    }

    /// Points the many2one `field` of `record` to the browsed record `id`.
    pub async fn set_many2one(&mut self, record: &mut Record, field: &str, id: i64) -> Result<()> {
        self.session.set_many2one(record, field, id).await
    }

    /// Sends the dirty fields of `record` in one `write`, then refreshes it.
    pub async fn write_record(&mut self, record: &mut Record) -> Result<bool> {
        self.session.write_record(record).await
    }

    /// Reloads `record` from the server, dropping local edits.
    pub async fn refresh(&mut self, record: &mut Record) -> Result<()> {
        self.session.refresh(record).await
    }

    /// Drops the local edits of `record`, without any round trip.
    pub fn reset(&self, record: &mut Record) {
        record.reset();
    }

    /// Deletes `record` on the server.
    ///
    /// Other in-memory copies of the record are left untouched.
    pub async fn unlink_record(&mut self, record: &Record) -> Result<bool> {
        self.session.unlink_record(record).await
    }
}
