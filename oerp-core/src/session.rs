//! # Session
//!
//! A [`Session`] holds everything needed to talk to one server on behalf of one user:
//!
//! * the [`Transport`] performing the round trips,
//! * the credentials of the last successful login,
//! * the default context sent along business calls,
//! * the cache of model schemas, each fetched once per login through `fields_get`.
//!
//! Every operation borrows the session mutably, so at most one call is ever in flight per
//! session. Share a session between tasks by wrapping it in a mutex, or open one per task.
//!
//! ## Example
//!
//! ```rust,no_run
//! use oerp_core::{Config, Session, testing::MockServer};
//!
//! # async fn run() -> oerp_core::Result<()> {
//! let server = MockServer::new().with_database("demo").with_user(1, "admin", "admin");
//! let mut session = Session::with_transport(server, Some("demo"), Config::default());
//!
//! let user = session.login("admin", "admin", None).await?;
//! println!("Logged in as {user}");
//! # Ok(())
//! # }
//! ```
pub mod service;

use crate::{
    error::{Error, Result},
    osv::{
        Model, ModelProxy,
        fields::{FieldDescriptor, FieldError, FieldKind},
        record::{Record, RecordRef},
    },
    rpc::{Connector, Protocol, Transport},
};
use futures_util::{StreamExt, stream::LocalBoxStream};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use service::{CommonService, DbService, WizardService};
use std::{collections::HashMap, fmt, sync::Arc, time::Duration};
use tracing::{debug, info, warn};

pub const DEFAULT_PORT: u16 = 8069;

/// Tunables of a [`Session`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Timeout of every round trip, in seconds.
    pub timeout: u64,
    /// Whether the session context is sent along business calls.
    pub auto_context: bool,
    /// The server version, when known. Selects the XML-RPC endpoints layout.
    pub version: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: 120,
            auto_context: true,
            version: None,
        }
    }
}

impl Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Builds a [`Session`] speaking to a real server.
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    server: String,
    port: u16,
    protocol: Protocol,
    database: Option<String>,
    config: Config,
}

impl SessionBuilder {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            port: DEFAULT_PORT,
            protocol: Protocol::default(),
            database: None,
            config: Config::default(),
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// The database used when `login` is not given one.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// # Returns
    ///
    /// * `Ok(Session)` - A session, not logged in yet. No connection is opened.
    /// * `Err(Error::Configuration)` - If the server name is empty or the port is zero.
    pub fn build(self) -> Result<Session<Connector>> {
        let server = self.server.trim();
        if server.is_empty() {
            return Err(Error::Configuration(
                "The server name can't be empty".to_string(),
            ));
        }

        let transport = Connector::new(self.protocol, server, self.port, &self.config)?;
        debug!(server, port = self.port, protocol = %self.protocol, "session created");

        Ok(Session::with_transport(
            transport,
            self.database.as_deref(),
            self.config,
        ))
    }
}

/// Options of a `search` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchParams {
    pub offset: i64,
    pub limit: Option<i64>,
    pub order: Option<String>,
    /// Merged over the session context.
    pub context: Option<Map<String, Value>>,
}

#[derive(Clone)]
struct Credentials {
    database: String,
    uid: i64,
    login: String,
    password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("database", &self.database)
            .field("uid", &self.uid)
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug)]
pub struct Session<T = Connector> {
    transport: T,
    database: Option<String>,
    credentials: Option<Credentials>,
    user: Option<Record>,
    context: Map<String, Value>,
    config: Config,
    models: HashMap<String, Arc<Model>>,
}

impl<T: Transport> Session<T> {
    /// A session over any transport. `database` is used when `login` is not given one.
    pub fn with_transport(mut transport: T, database: Option<&str>, config: Config) -> Self {
        transport.set_timeout(config.timeout());
        Self {
            transport,
            database: database.map(str::to_string),
            credentials: None,
            user: None,
            context: Map::new(),
            config,
            models: HashMap::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Updates the timeout of every following round trip.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.config.timeout = timeout.as_secs();
        self.transport.set_timeout(timeout);
    }

    /// The database of the logged in user, or the default one.
    pub fn database(&self) -> Option<&str> {
        self.credentials
            .as_ref()
            .map(|c| c.database.as_str())
            .or(self.database.as_deref())
    }

    pub fn uid(&self) -> Option<i64> {
        self.credentials.as_ref().map(|c| c.uid)
    }

    /// The logged in user, as a `res.users` record.
    pub fn user(&self) -> Option<&Record> {
        self.user.as_ref()
    }

    /// The default context sent along business calls.
    pub fn context(&self) -> &Map<String, Value> {
        &self.context
    }

    pub fn set_context(&mut self, context: Map<String, Value>) {
        self.context = context;
    }

    /// Logs in on `database`, or on the default database.
    ///
    /// May be called again to switch user or database. The schema cache is cleared on
    /// success. On failure the session keeps its previous user, database and context.
    ///
    /// # Returns
    ///
    /// * `Ok(Record)` - The `res.users` record of the user.
    /// * `Err(Error::Configuration)` - If no database is given nor configured.
    /// * `Err(Error::Authentication)` - If the server rejects the credentials or can't be reached.
    pub async fn login(
        &mut self,
        user: &str,
        password: &str,
        database: Option<&str>,
    ) -> Result<Record> {
        let database = database
            .map(str::to_string)
            .or_else(|| self.database.clone())
            .ok_or_else(|| Error::Configuration("No database specified".to_string()))?;

        let result = self
            .transport
            .call("common", "login", vec![json!(database), json!(user), json!(password)])
            .await
            .map_err(|source| {
                warn!(user, %database, error = %source, "login failed");
                Error::Authentication {
                    message: source.to_string(),
                    source: Some(source),
                }
            })?;

        let Some(uid) = result.as_i64().filter(|uid| *uid > 0) else {
            warn!(user, %database, "login rejected");
            return Err(Error::Authentication {
                message: "Wrong login ID or password".to_string(),
                source: None,
            });
        };

        let previous_credentials = self.credentials.replace(Credentials {
            database: database.clone(),
            uid,
            login: user.to_string(),
            password: password.to_string(),
        });
        let previous_models = std::mem::take(&mut self.models);
        let previous_context = self.context.clone();

        match self.load_user(uid).await {
            Ok(record) => {
                self.database = Some(database.clone());
                self.user = Some(record.clone());
                info!(user, %database, uid, "logged in");
                Ok(record)
            }
            Err(e) => {
                warn!(user, %database, error = %e, "failed to load the user, login rolled back");
                self.credentials = previous_credentials;
                self.models = previous_models;
                self.context = previous_context;
                Err(e)
            }
        }
    }

    /// Fetches the context and the `res.users` record of the freshly authenticated user.
    async fn load_user(&mut self, uid: i64) -> Result<Record> {
        if self.config.auto_context {
            match self.execute("res.users", "context_get", vec![]).await {
                Ok(Value::Object(context)) => self.context = context,
                Ok(other) => {
                    warn!(value = %other, "unexpected user context, keeping the previous one")
                }
                Err(e) => {
                    warn!(error = %e, "failed to fetch the user context, keeping the previous one")
                }
            }
        }

        self.browse("res.users", uid).await
    }

    /// Calls `method` of `model` through the `object.execute` service.
    ///
    /// # Returns
    ///
    /// * `Ok(Value)` - The raw result.
    /// * `Err(Error::NotAuthenticated)` - If no login succeeded yet.
    /// * `Err(Error::RemoteCall)` - If the round trip failed.
    pub async fn execute(&mut self, model: &str, method: &str, args: Vec<Value>) -> Result<Value> {
        let mut params = self.object_params(model, method)?;
        params.extend(args);
        self.call_object("execute", model, method, params).await
    }

    /// Calls `method` of `model` through `object.execute_kw`, with keyword arguments.
    ///
    /// The session context is added to `kwargs` unless it already carries one.
    pub async fn execute_kw(
        &mut self,
        model: &str,
        method: &str,
        args: Vec<Value>,
        mut kwargs: Map<String, Value>,
    ) -> Result<Value> {
        if self.config.auto_context && !self.context.is_empty() && !kwargs.contains_key("context")
        {
            kwargs.insert("context".to_string(), Value::Object(self.context.clone()));
        }

        let mut params = self.object_params(model, method)?;
        params.push(Value::Array(args));
        params.push(Value::Object(kwargs));
        self.call_object("execute_kw", model, method, params).await
    }

    /// Sends the workflow `signal` to the record `id` of `model`.
    pub async fn exec_workflow(&mut self, model: &str, signal: &str, id: i64) -> Result<Value> {
        let mut params = self.object_params(model, signal)?;
        params.push(json!(id));
        self.call_object("exec_workflow", model, signal, params).await
    }

    fn object_params(&self, model: &str, method: &str) -> Result<Vec<Value>> {
        let credentials = self.credentials.as_ref().ok_or(Error::NotAuthenticated)?;
        Ok(vec![
            json!(credentials.database),
            json!(credentials.uid),
            json!(credentials.password),
            json!(model),
            json!(method),
        ])
    }

    async fn call_object(
        &mut self,
        service_method: &str,
        model: &str,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Value> {
        debug!(model, method, "object.{service_method}");
        self.transport
            .call("object", service_method, params)
            .await
            .map_err(|source| Error::RemoteCall {
                model: model.to_string(),
                method: method.to_string(),
                source,
            })
    }

    /// The context of a business call: the session context when `auto_context` is on,
    /// overridden by `extra`.
    fn call_context(&self, extra: Option<Map<String, Value>>) -> Option<Value> {
        let mut context = if self.config.auto_context {
            self.context.clone()
        } else {
            Map::new()
        };
        if let Some(extra) = extra {
            context.extend(extra);
        }
        (!context.is_empty()).then_some(Value::Object(context))
    }

    fn with_context(&self, mut args: Vec<Value>) -> Vec<Value> {
        if let Some(context) = self.call_context(None) {
            args.push(context);
        }
        args
    }

    /// Ids of the `model` records matching `domain`.
    ///
    /// The domain is forwarded as-is, e.g. `[["name", "=", "Acme"]]`.
    pub async fn search(&mut self, model: &str, domain: Value) -> Result<Vec<i64>> {
        self.search_with(model, domain, SearchParams::default()).await
    }

    pub async fn search_with(
        &mut self,
        model: &str,
        domain: Value,
        params: SearchParams,
    ) -> Result<Vec<i64>> {
        let args = self.search_args(domain, params, false);
        let result = self.execute(model, "search", args).await?;
        parse_ids("search", result)
    }

    /// Number of `model` records matching `domain`.
    pub async fn search_count(&mut self, model: &str, domain: Value) -> Result<i64> {
        let args = self.search_args(domain, SearchParams::default(), true);
        let result = self.execute(model, "search", args).await?;
        result
            .as_i64()
            .ok_or_else(|| Error::unexpected("search", result))
    }

    fn search_args(&self, domain: Value, params: SearchParams, count: bool) -> Vec<Value> {
        vec![
            domain,
            json!(params.offset),
            params.limit.map_or(Value::Bool(false), Value::from),
            params.order.map_or(Value::Bool(false), Value::from),
            self.call_context(params.context)
                .unwrap_or_else(|| Value::Object(Map::new())),
            json!(count),
        ]
    }

    /// Reads `fields` (all of them if empty) of the `ids` records.
    pub async fn read(
        &mut self,
        model: &str,
        ids: &[i64],
        fields: &[&str],
    ) -> Result<Vec<Map<String, Value>>> {
        let args = self.with_context(vec![json!(ids), json!(fields)]);
        let result = self.execute(model, "read", args).await?;

        match result {
            Value::Bool(false) | Value::Null => Ok(Vec::new()),
            Value::Array(rows) => rows
                .into_iter()
                .map(|row| match row {
                    Value::Object(row) => Ok(row),
                    other => Err(Error::unexpected("read", other)),
                })
                .collect(),
            other => Err(Error::unexpected("read", other)),
        }
    }

    /// Creates a `model` record, returns its id.
    pub async fn create(&mut self, model: &str, values: Map<String, Value>) -> Result<i64> {
        let args = self.with_context(vec![Value::Object(values)]);
        let result = self.execute(model, "create", args).await?;
        result
            .as_i64()
            .ok_or_else(|| Error::unexpected("create", result))
    }

    pub async fn write(
        &mut self,
        model: &str,
        ids: &[i64],
        values: Map<String, Value>,
    ) -> Result<bool> {
        let args = self.with_context(vec![json!(ids), Value::Object(values)]);
        let result = self.execute(model, "write", args).await?;
        Ok(crate::osv::fields::is_truthy(&result))
    }

    pub async fn unlink(&mut self, model: &str, ids: &[i64]) -> Result<bool> {
        let args = self.with_context(vec![json!(ids)]);
        let result = self.execute(model, "unlink", args).await?;
        Ok(crate::osv::fields::is_truthy(&result))
    }

    /// The proxy of `model`. Its schema is fetched on first use and cached.
    ///
    /// # Returns
    ///
    /// * `Ok(ModelProxy)` - The proxy, bound to this session.
    /// * `Err(Error::UnknownModel)` - If the server doesn't know the model.
    /// * `Err(Error::UnsupportedFieldKind)` - If a field type is unknown to this client.
    pub async fn get(&mut self, model: &str) -> Result<ModelProxy<'_, T>> {
        let schema = self.schema(model).await?;
        Ok(ModelProxy::new(self, schema))
    }

    async fn schema(&mut self, model: &str) -> Result<Arc<Model>> {
        if let Some(schema) = self.models.get(model) {
            return Ok(schema.clone());
        }

        let fields = self
            .execute(model, "fields_get", vec![])
            .await
            .map_err(|e| match e {
                Error::RemoteCall { model, source, .. } => Error::UnknownModel { model, source },
                other => other,
            })?;

        let Value::Object(fields) = fields else {
            return Err(Error::unexpected("fields_get", fields));
        };

        let schema = Arc::new(Model::from_fields_get(model, &fields)?);
        self.models.insert(model.to_string(), schema.clone());
        Ok(schema)
    }

    /// Drops the cached schema of `model`, it will be fetched again on next use.
    pub fn invalidate(&mut self, model: &str) {
        if self.models.remove(model).is_some() {
            debug!(model, "schema evicted");
        }
    }

    pub fn clear_models(&mut self) {
        self.models.clear();
    }

    pub async fn browse(&mut self, model: &str, id: i64) -> Result<Record> {
        self.get(model).await?.browse(id).await
    }

    /// Browses the records of `ids` lazily, one read per polled item.
    pub async fn browse_many(
        &mut self,
        model: &str,
        ids: Vec<i64>,
    ) -> Result<LocalBoxStream<'_, Result<Record>>> {
        Ok(self.get(model).await?.browse_many(ids).boxed_local())
    }

    /// Browses the record a relational field points to.
    pub async fn browse_ref(&mut self, reference: &RecordRef) -> Result<Record> {
        self.browse(&reference.model, reference.id).await
    }

    /// Points the many2one `field` of `record` to the record `id` of its relation.
    ///
    /// The target is browsed first, so an id the server doesn't know is reported here and
    /// never reaches a `write`.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The field holds the target and is marked dirty.
    /// * `Err(Error::UnknownRecord)` - If the relation has no record with this id.
    /// * `Err(Error::Field)` - If `field` is not a many2one field of the record's model.
    pub async fn set_many2one(&mut self, record: &mut Record, field: &str, id: i64) -> Result<()> {
        let relation = match record.schema().field(field).map(FieldDescriptor::kind) {
            Some(FieldKind::Many2One { relation }) => relation.clone(),
            Some(kind) => {
                return Err(FieldError::Validation {
                    field: field.to_string(),
                    reason: format!(
                        "expecting a many2one field, got a {} field",
                        kind.type_name()
                    ),
                }
                .into());
            }
            None => {
                return Err(FieldError::UnknownField {
                    model: record.model().to_string(),
                    field: field.to_string(),
                }
                .into());
            }
        };

        let target = self.browse(&relation, id).await?;
        record.set(field, &target)?;
        Ok(())
    }

    /// Reloads `record` from the server, dropping its local edits.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The record holds the server values.
    /// * `Err(Error::UnknownRecord)` - If the record doesn't exist anymore.
    pub async fn refresh(&mut self, record: &mut Record) -> Result<()> {
        let model = record.model().to_string();
        let id = record.id();

        let mut raw_data = self
            .read(&model, &[id], &[])
            .await?
            .into_iter()
            .next()
            .filter(|row| !row.is_empty())
            .ok_or_else(|| Error::UnknownRecord {
                model: model.clone(),
                id,
            })?;

        if record.schema().has_synthetic_name() {
            match self.execute(&model, "name_get", vec![json!([id])]).await {
                Ok(labels) => {
                    if let Some(label) = labels.get(0).and_then(|pair| pair.get(1)) {
                        raw_data.insert("name".to_string(), label.clone());
                    }
                }
                Err(e) => debug!(%model, id, error = %e, "name_get failed"),
            }
        }

        record.load(raw_data);
        Ok(())
    }

    /// Drops the local edits of `record`.
    pub fn reset(&self, record: &mut Record) {
        record.reset();
    }

    /// Sends the dirty fields of `record` in exactly one `write`, then refreshes it.
    pub async fn write_record(&mut self, record: &mut Record) -> Result<bool> {
        let model = record.model().to_string();
        let changes = record.changes();
        debug!(
            %model,
            id = record.id(),
            fields = ?changes.keys().collect::<Vec<_>>(),
            "writing record"
        );

        let result = self.write(&model, &[record.id()], changes).await?;
        self.refresh(record).await?;
        Ok(result)
    }

    /// Deletes `record` on the server. Other copies of it in memory are not invalidated.
    pub async fn unlink_record(&mut self, record: &Record) -> Result<bool> {
        self.unlink(record.model(), &[record.id()]).await
    }

    /// The `common` service, usable without logging in.
    pub fn common(&mut self) -> CommonService<'_, T> {
        CommonService::new(&mut self.transport)
    }

    /// The `db` service, to manage the databases of the server.
    pub fn db(&mut self) -> DbService<'_, T> {
        DbService::new(&mut self.transport)
    }

    /// The `wizard` service, to run old-style wizards as the logged in user.
    ///
    /// # Returns
    ///
    /// * `Ok(WizardService)` - The service, calls are sent with the session credentials.
    /// * `Err(Error::NotAuthenticated)` - If no login succeeded yet.
    pub fn wizard(&mut self) -> Result<WizardService<'_, T>> {
        let credentials = self.credentials.as_ref().ok_or(Error::NotAuthenticated)?;
        let prefix = vec![
            json!(credentials.database),
            json!(credentials.uid),
            json!(credentials.password),
        ];
        Ok(WizardService::new(&mut self.transport, prefix))
    }
}

fn parse_ids(method: &str, value: Value) -> Result<Vec<i64>> {
    let ids = value
        .as_array()
        .and_then(|items| items.iter().map(Value::as_i64).collect::<Option<Vec<_>>>());
    ids.ok_or_else(|| Error::unexpected(method, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.timeout(), Duration::from_secs(120));
        assert!(config.auto_context);
        assert_eq!(config.version, None);

        let config: Config = serde_json::from_value(json!({"timeout": 5})).unwrap();
        assert_eq!(config.timeout, 5);
        assert!(config.auto_context);
    }

    #[test]
    fn test_builder_validation() {
        assert!(matches!(
            SessionBuilder::new("  ").build(),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            SessionBuilder::new("localhost").port(0).build(),
            Err(Error::Configuration(_))
        ));

        let session = SessionBuilder::new("localhost").database("demo").build().unwrap();
        assert_eq!(session.database(), Some("demo"));
        assert_eq!(session.uid(), None);
    }

    #[test]
    fn test_credentials_are_redacted() {
        let credentials = Credentials {
            database: "demo".to_string(),
            uid: 1,
            login: "admin".to_string(),
            password: "secret".to_string(),
        };
        let debug = format!("{credentials:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_parse_ids() {
        assert_eq!(parse_ids("search", json!([1, 2, 3])).unwrap(), [1, 2, 3]);
        assert!(parse_ids("search", json!(false)).is_err());
        assert!(parse_ids("search", json!([1, "x"])).is_err());
    }
}
