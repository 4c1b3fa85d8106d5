//! # Testing
//!
//! [`MockServer`] is an in-memory [`Transport`] behaving like a small OpenERP server. It keeps
//! databases, users and records, answers the `common`, `db`, `object` and `wizard` services
//! and records every call it receives, so tests can assert on the exact payloads sent by a
//! [`Session`].
//!
//! Clones share the same state: keep one clone to inspect what the session did with the other.
//!
//! ```rust
//! use oerp_core::{Config, Session, testing::MockServer};
//! use serde_json::json;
//!
//! # async fn run() -> oerp_core::Result<()> {
//! let server = MockServer::new()
//!     .with_database("demo")
//!     .with_user(1, "admin", "admin")
//!     .with_model("res.partner", json!({"name": {"type": "char"}}))
//!     .with_record("res.partner", 42, json!({"name": "Acme"}));
//!
//! let mut session = Session::with_transport(server.clone(), Some("demo"), Config::default());
//! session.login("admin", "admin", None).await?;
//! assert_eq!(session.search("res.partner", json!([])).await?, [42]);
//! assert_eq!(server.object_calls("search").len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! [`Session`]: crate::Session
use crate::rpc::{Transport, TransportError};
use serde_json::{Map, Value, json};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// One call received by a [`MockServer`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub service: String,
    pub method: String,
    pub args: Vec<Value>,
}

impl RecordedCall {
    /// The model targeted by an `object` call.
    pub fn model(&self) -> Option<&str> {
        self.args.get(3).and_then(Value::as_str)
    }

    /// The model method (or workflow signal) of an `object` call.
    pub fn model_method(&self) -> Option<&str> {
        self.args.get(4).and_then(Value::as_str)
    }

    /// The arguments following the credentials, model and method of an `object` call.
    pub fn model_args(&self) -> &[Value] {
        self.args.get(5..).unwrap_or_default()
    }
}

/// A failure a [`MockServer`] can be told to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Fault,
    Timeout,
}

#[derive(Debug, Default)]
struct MockModel {
    fields: Map<String, Value>,
    records: BTreeMap<i64, Map<String, Value>>,
    methods: HashMap<String, Value>,
}

#[derive(Debug)]
struct State {
    databases: Vec<String>,
    users: Vec<(i64, String, String)>,
    models: BTreeMap<String, MockModel>,
    context: Map<String, Value>,
    version: String,
    progress_steps: u32,
    creations: HashMap<i64, (String, String, u32)>,
    next_creation: i64,
    wizards: HashMap<String, Value>,
    wizard_instances: Vec<String>,
    failures: Vec<(String, String, Failure)>,
    calls: Vec<RecordedCall>,
    timeout: Option<Duration>,
}

impl Default for State {
    fn default() -> Self {
        let mut models = BTreeMap::new();
        let users = MockModel {
            fields: as_object(json!({
                "login": {"type": "char", "string": "Login", "required": true, "size": 64},
                "name": {"type": "char", "string": "Name", "required": true, "size": 64},
                "active": {"type": "boolean", "string": "Active"},
            })),
            ..MockModel::default()
        };
        models.insert("res.users".to_string(), users);

        Self {
            databases: Vec::new(),
            users: Vec::new(),
            models,
            context: Map::new(),
            version: "7.0".to_string(),
            progress_steps: 0,
            creations: HashMap::new(),
            next_creation: 1,
            wizards: HashMap::new(),
            wizard_instances: Vec::new(),
            failures: Vec::new(),
            calls: Vec::new(),
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockServer {
    state: Arc<Mutex<State>>,
}

impl MockServer {
    /// A server without databases, knowing only the `res.users` model.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_database(self, name: &str) -> Self {
        self.lock().databases.push(name.to_string());
        self
    }

    /// Registers a user able to log in, and its `res.users` record.
    pub fn with_user(self, uid: i64, login: &str, password: &str) -> Self {
        {
            let mut state = self.lock();
            state
                .users
                .push((uid, login.to_string(), password.to_string()));
            let record = as_object(json!({"login": login, "name": login, "active": true}));
            state
                .models
                .entry("res.users".to_string())
                .or_default()
                .records
                .insert(uid, record);
        }
        self
    }

    /// Registers a model, `fields` being its `fields_get` result.
    pub fn with_model(self, name: &str, fields: Value) -> Self {
        self.lock().models.entry(name.to_string()).or_default().fields = as_object(fields);
        self
    }

    pub fn with_record(self, model: &str, id: i64, values: Value) -> Self {
        self.lock()
            .models
            .entry(model.to_string())
            .or_default()
            .records
            .insert(id, as_object(values));
        self
    }

    /// A canned answer to a custom model method.
    pub fn with_method(self, model: &str, method: &str, result: Value) -> Self {
        self.lock()
            .models
            .entry(model.to_string())
            .or_default()
            .methods
            .insert(method.to_string(), result);
        self
    }

    /// Registers an old-style wizard, `result` being what `wizard.execute` answers.
    pub fn with_wizard(self, name: &str, result: Value) -> Self {
        self.lock().wizards.insert(name.to_string(), result);
        self
    }

    /// The context returned by `res.users.context_get`.
    pub fn with_context(self, context: Value) -> Self {
        self.lock().context = as_object(context);
        self
    }

    pub fn with_version(self, version: &str) -> Self {
        self.lock().version = version.to_string();
        self
    }

    /// Number of `db.get_progress` polls answered before a database creation completes.
    pub fn with_progress_steps(self, steps: u32) -> Self {
        self.lock().progress_steps = steps;
        self
    }

    /// Makes every following call to `target.method` fail. `target` is a service name
    /// (`common`, `db`, `wizard`) or, for `object` calls, a model name.
    pub fn fail(self, target: &str, method: &str, failure: Failure) -> Self {
        self.lock()
            .failures
            .push((target.to_string(), method.to_string(), failure));
        self
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// The `object` calls to the model method `method`.
    pub fn object_calls(&self, method: &str) -> Vec<RecordedCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.service == "object" && call.model_method() == Some(method))
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// The stored values of a record.
    pub fn record(&self, model: &str, id: i64) -> Option<Map<String, Value>> {
        self.lock()
            .models
            .get(model)
            .and_then(|m| m.records.get(&id))
            .cloned()
    }

    pub fn databases(&self) -> Vec<String> {
        self.lock().databases.clone()
    }

    /// The last timeout set by the session.
    pub fn timeout(&self) -> Option<Duration> {
        self.lock().timeout
    }
}

impl Transport for MockServer {
    async fn call(
        &mut self,
        service: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, TransportError> {
        let mut state = self.lock();
        state.calls.push(RecordedCall {
            service: service.to_string(),
            method: method.to_string(),
            args: args.clone(),
        });
        state.dispatch(service, method, args)
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.lock().timeout = Some(timeout);
    }
}

impl State {
    fn dispatch(
        &mut self,
        service: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, TransportError> {
        match service {
            "common" => {
                self.check_failure(service, method)?;
                self.common(method, &args)
            }
            "db" => {
                self.check_failure(service, method)?;
                self.db(method, &args)
            }
            "object" => self.object(method, args),
            "wizard" => {
                self.check_failure(service, method)?;
                self.wizard(method, args)
            }
            other => Err(fault(format!("Unknown service '{other}'"))),
        }
    }

    fn check_failure(&self, target: &str, method: &str) -> Result<(), TransportError> {
        let failure = self
            .failures
            .iter()
            .find(|(t, m, _)| t == target && m == method)
            .map(|(_, _, failure)| *failure);

        match failure {
            Some(Failure::Fault) => Err(TransportError::Fault {
                message: format!("Injected fault on '{target}.{method}'"),
                traceback: Some("Traceback (most recent call last):\n  ...".to_string()),
            }),
            Some(Failure::Timeout) => Err(TransportError::Timeout {
                url: format!("mock://{target}/{method}"),
            }),
            None => Ok(()),
        }
    }

    fn common(&mut self, method: &str, args: &[Value]) -> Result<Value, TransportError> {
        match method {
            "login" => {
                let [database, login, password] = args else {
                    return Err(fault("login expects 3 arguments"));
                };
                if !self.has_database(database) {
                    return Err(fault(format!("database {database} does not exist")));
                }
                let uid = self
                    .users
                    .iter()
                    .find(|(_, l, p)| {
                        Some(l.as_str()) == login.as_str() && Some(p.as_str()) == password.as_str()
                    })
                    .map(|(uid, _, _)| *uid);
                Ok(uid.map_or(Value::Bool(false), Value::from))
            }
            "version" => Ok(json!({
                "server_version": self.version,
                "protocol_version": 1,
            })),
            other => Err(fault(format!("common.{other} is not available"))),
        }
    }

    fn db(&mut self, method: &str, args: &[Value]) -> Result<Value, TransportError> {
        match method {
            "list" => Ok(json!(self.databases)),
            "server_version" => Ok(json!(self.version)),
            "create" => {
                let name = arg_str(args, 1)?;
                if self.databases.iter().any(|db| db == name) {
                    return Err(fault(format!("database {name} already exists")));
                }
                let admin_password = args.get(4).and_then(Value::as_str).unwrap_or("admin");

                let id = self.next_creation;
                self.next_creation += 1;
                self.creations
                    .insert(id, (name.to_string(), admin_password.to_string(), 0));
                Ok(json!(id))
            }
            "get_progress" => {
                let id = args.get(1).and_then(Value::as_i64).unwrap_or_default();
                let steps = self.progress_steps;
                let Some((name, admin_password, polls)) = self.creations.get_mut(&id) else {
                    return Err(fault(format!("no database creation with ID {id}")));
                };

                if *polls < steps {
                    *polls += 1;
                    return Ok(json!([f64::from(*polls - 1) / f64::from(steps), []]));
                }

                let users = json!([
                    {"login": "admin", "password": admin_password, "name": "Administrator"},
                ]);
                let name = name.clone();
                if !self.databases.contains(&name) {
                    self.databases.push(name);
                }
                Ok(json!([1.0, users]))
            }
            "drop" => {
                let name = arg_str(args, 1)?;
                let before = self.databases.len();
                self.databases.retain(|db| db != name);
                if self.databases.len() == before {
                    return Err(fault(format!("database {name} does not exist")));
                }
                Ok(Value::Bool(true))
            }
            other => Err(fault(format!("db.{other} is not available"))),
        }
    }

    fn object(&mut self, method: &str, args: Vec<Value>) -> Result<Value, TransportError> {
        let mut args = args.into_iter();
        let (Some(database), Some(uid), Some(password), Some(model), Some(model_method)) =
            (args.next(), args.next(), args.next(), args.next(), args.next())
        else {
            return Err(fault(format!("object.{method} expects at least 5 arguments")));
        };

        self.authenticate(&database, &uid, &password)?;

        let model = model.as_str().unwrap_or_default().to_string();
        let model_method = model_method.as_str().unwrap_or_default().to_string();
        self.check_failure(&model, &model_method)?;

        let rest: Vec<Value> = args.collect();
        match method {
            "execute" => self.model_call(&model, &model_method, &rest),
            "execute_kw" => {
                let positional = match rest.first() {
                    Some(Value::Array(positional)) => positional.clone(),
                    _ => Vec::new(),
                };
                self.model_call(&model, &model_method, &positional)
            }
            "exec_workflow" => {
                let id = rest.first().and_then(Value::as_i64).unwrap_or_default();
                let exists = self
                    .models
                    .get(&model)
                    .is_some_and(|m| m.records.contains_key(&id));
                if !exists {
                    return Err(fault(format!("Record {model},{id} does not exist")));
                }
                Ok(Value::Bool(true))
            }
            other => Err(fault(format!("object.{other} is not available"))),
        }
    }

    fn model_call(
        &mut self,
        model: &str,
        method: &str,
        args: &[Value],
    ) -> Result<Value, TransportError> {
        if !self.models.contains_key(model) {
            return Err(fault(format!("Object {model} doesn't exist")));
        }

        match method {
            "fields_get" => Ok(Value::Object(self.models[model].fields.clone())),
            "context_get" => Ok(Value::Object(self.context.clone())),
            "read" => Ok(self.read(model, args)),
            "search" => Ok(self.search(model, args)),
            "name_get" => {
                let ids = ids_arg(args.first());
                let records = &self.models[model].records;
                let labels: Vec<Value> = ids
                    .into_iter()
                    .filter_map(|id| {
                        let record = records.get(&id)?;
                        let label = record
                            .get("name")
                            .and_then(Value::as_str)
                            .map_or_else(|| format!("{model},{id}"), str::to_string);
                        Some(json!([id, label]))
                    })
                    .collect();
                Ok(Value::Array(labels))
            }
            "create" => {
                let values = args.first().cloned().map(as_object).unwrap_or_default();
                let values = self.normalize(model, values);
                let mock = self.models.entry(model.to_string()).or_default();
                let id = mock.records.keys().next_back().copied().unwrap_or_default() + 1;
                mock.records.insert(id, values);
                Ok(json!(id))
            }
            "write" => {
                let ids = ids_arg(args.first());
                let values = args.get(1).cloned().map(as_object).unwrap_or_default();
                let values = self.normalize(model, values);
                let mock = self.models.entry(model.to_string()).or_default();
                if let Some(missing) = ids.iter().find(|id| !mock.records.contains_key(id)) {
                    return Err(fault(format!("Record {model},{missing} does not exist")));
                }
                for id in ids {
                    if let Some(record) = mock.records.get_mut(&id) {
                        record.extend(values.clone());
                    }
                }
                Ok(Value::Bool(true))
            }
            "unlink" => {
                let ids = ids_arg(args.first());
                let mock = self.models.entry(model.to_string()).or_default();
                for id in ids {
                    mock.records.remove(&id);
                }
                Ok(Value::Bool(true))
            }
            other => self.models[model]
                .methods
                .get(other)
                .cloned()
                .ok_or_else(|| fault(format!("'{model}' object has no attribute '{other}'"))),
        }
    }

    fn read(&self, model: &str, args: &[Value]) -> Value {
        let mock = &self.models[model];
        let ids = ids_arg(args.first());
        let wanted: Vec<&str> = args
            .get(1)
            .and_then(Value::as_array)
            .map(|fields| fields.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let rows: Vec<Value> = ids
            .iter()
            .filter_map(|id| {
                let record = mock.records.get(id)?;
                let mut row = Map::new();
                row.insert("id".to_string(), json!(id));
                for (name, meta) in &mock.fields {
                    if !wanted.is_empty() && !wanted.contains(&name.as_str()) {
                        continue;
                    }
                    let value = record.get(name).cloned().unwrap_or_else(|| {
                        match meta.get("type").and_then(Value::as_str) {
                            Some("one2many" | "many2many") => json!([]),
                            _ => Value::Bool(false),
                        }
                    });
                    row.insert(name.clone(), value);
                }
                Some(Value::Object(row))
            })
            .collect();

        if rows.is_empty() && !ids.is_empty() {
            Value::Bool(false)
        } else {
            Value::Array(rows)
        }
    }

    fn search(&self, model: &str, args: &[Value]) -> Value {
        let mock = &self.models[model];
        let leaves: Vec<&[Value]> = args
            .first()
            .and_then(Value::as_array)
            .map(|domain| {
                domain
                    .iter()
                    .filter_map(Value::as_array)
                    .map(Vec::as_slice)
                    .collect()
            })
            .unwrap_or_default();

        let ids: Vec<i64> = mock
            .records
            .iter()
            .filter(|(id, record)| leaves.iter().all(|leaf| leaf_matches(**id, record, leaf)))
            .map(|(id, _)| *id)
            .collect();

        if args.get(5).and_then(Value::as_bool).unwrap_or(false) {
            return json!(ids.len());
        }

        let offset = args
            .get(1)
            .and_then(Value::as_u64)
            .and_then(|o| usize::try_from(o).ok())
            .unwrap_or(0);
        let limit = args
            .get(2)
            .and_then(Value::as_u64)
            .and_then(|l| usize::try_from(l).ok())
            .unwrap_or(usize::MAX);

        json!(ids.into_iter().skip(offset).take(limit).collect::<Vec<_>>())
    }

    /// Stores many2one ids with their label, like the server returns them.
    fn normalize(&self, model: &str, mut values: Map<String, Value>) -> Map<String, Value> {
        let Some(mock) = self.models.get(model) else {
            return values;
        };

        for (name, value) in values.iter_mut() {
            let Some(meta) = mock.fields.get(name) else {
                continue;
            };
            if meta.get("type").and_then(Value::as_str) != Some("many2one") {
                continue;
            }
            let Some(id) = value.as_i64() else {
                continue;
            };
            let label = meta
                .get("relation")
                .and_then(Value::as_str)
                .and_then(|relation| self.models.get(relation))
                .and_then(|related| related.records.get(&id))
                .and_then(|record| record.get("name"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            *value = json!([id, label]);
        }

        values
    }

    fn authenticate(
        &self,
        database: &Value,
        uid: &Value,
        password: &Value,
    ) -> Result<(), TransportError> {
        let authenticated = self.has_database(database)
            && self.users.iter().any(|(u, _, p)| {
                Some(*u) == uid.as_i64() && Some(p.as_str()) == password.as_str()
            });
        if authenticated {
            Ok(())
        } else {
            Err(fault("AccessDenied"))
        }
    }

    fn wizard(&mut self, method: &str, args: Vec<Value>) -> Result<Value, TransportError> {
        let mut args = args.into_iter();
        let (Some(database), Some(uid), Some(password)) = (args.next(), args.next(), args.next())
        else {
            return Err(fault(format!("wizard.{method} expects at least 3 arguments")));
        };
        self.authenticate(&database, &uid, &password)?;

        let rest: Vec<Value> = args.collect();
        match method {
            "create" => {
                let name = arg_str(&rest, 0)?;
                if !self.wizards.contains_key(name) {
                    return Err(fault(format!("Wizard '{name}' doesn't exist")));
                }
                self.wizard_instances.push(name.to_string());
                Ok(json!(self.wizard_instances.len()))
            }
            "execute" => {
                let id = rest.first().and_then(Value::as_u64).unwrap_or_default();
                let name = usize::try_from(id)
                    .ok()
                    .and_then(|id| id.checked_sub(1))
                    .and_then(|index| self.wizard_instances.get(index))
                    .ok_or_else(|| fault(format!("Wizard instance {id} doesn't exist")))?;
                Ok(self.wizards[name].clone())
            }
            other => Err(fault(format!("wizard.{other} is not available"))),
        }
    }

    fn has_database(&self, database: &Value) -> bool {
        database
            .as_str()
            .is_some_and(|name| self.databases.iter().any(|db| db == name))
    }
}

fn leaf_matches(id: i64, record: &Map<String, Value>, leaf: &[Value]) -> bool {
    let [field, operator, expected] = leaf else {
        return true;
    };
    let Some(field) = field.as_str() else {
        return true;
    };

    let actual = if field == "id" {
        json!(id)
    } else {
        match record.get(field) {
            Some(Value::Array(pair)) if pair.len() == 2 => pair[0].clone(),
            Some(value) => value.clone(),
            None => Value::Bool(false),
        }
    };

    match operator.as_str().unwrap_or("=") {
        "=" | "==" => same_value(&actual, expected),
        "!=" | "<>" => !same_value(&actual, expected),
        "in" => expected
            .as_array()
            .is_some_and(|items| items.iter().any(|item| same_value(&actual, item))),
        "not in" => !expected
            .as_array()
            .is_some_and(|items| items.iter().any(|item| same_value(&actual, item))),
        "like" | "ilike" => match (actual.as_str(), expected.as_str()) {
            (Some(actual), Some(expected)) => actual
                .to_lowercase()
                .contains(&expected.to_lowercase()),
            _ => false,
        },
        _ => false,
    }
}

fn same_value(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => a == b,
    }
}

fn ids_arg(value: Option<&Value>) -> Vec<i64> {
    match value {
        Some(Value::Array(ids)) => ids.iter().filter_map(Value::as_i64).collect(),
        Some(Value::Number(id)) => id.as_i64().into_iter().collect(),
        _ => Vec::new(),
    }
}

fn arg_str(args: &[Value], index: usize) -> Result<&str, TransportError> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| fault(format!("argument {index} must be a string")))
}

fn as_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn fault(message: impl Into<String>) -> TransportError {
    TransportError::Fault {
        message: message.into(),
        traceback: None,
    }
}
