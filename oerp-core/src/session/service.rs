//! # Services
//!
//! Thin handles on the `common`, `db` and `wizard` services of the server. The first two
//! don't require a login, the `db` methods authenticate with the super administrator
//! password instead. The `wizard` service runs the old-style wizards as the logged in user.
use crate::{
    error::{Error, Result},
    rpc::Transport,
};
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Delay between two `get_progress` polls of [`DbService::create_and_wait`].
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Number of `get_progress` polls before [`DbService::create_and_wait`] gives up.
pub const MAX_POLLS: u32 = 300;

async fn call_service<T: Transport>(
    transport: &mut T,
    service: &str,
    method: &str,
    args: Vec<Value>,
) -> Result<Value> {
    debug!(service, method, "service call");
    transport
        .call(service, method, args)
        .await
        .map_err(|source| Error::Service {
            service: service.to_string(),
            method: method.to_string(),
            source,
        })
}

/// The `common` service.
pub struct CommonService<'s, T> {
    transport: &'s mut T,
}

impl<'s, T: Transport> CommonService<'s, T> {
    pub(crate) fn new(transport: &'s mut T) -> Self {
        Self { transport }
    }

    /// Calls any method of the service.
    pub async fn call(&mut self, method: &str, args: Vec<Value>) -> Result<Value> {
        call_service(self.transport, "common", method, args).await
    }

    /// Version information, e.g. `{"server_version": "7.0", "protocol_version": 1}`.
    pub async fn version(&mut self) -> Result<Value> {
        self.call("version", vec![]).await
    }
}

/// The `db` service.
pub struct DbService<'s, T> {
    transport: &'s mut T,
}

impl<'s, T: Transport> DbService<'s, T> {
    pub(crate) fn new(transport: &'s mut T) -> Self {
        Self { transport }
    }

    /// Calls any method of the service.
    pub async fn call(&mut self, method: &str, args: Vec<Value>) -> Result<Value> {
        call_service(self.transport, "db", method, args).await
    }

    /// Names of the databases hosted by the server.
    pub async fn list(&mut self) -> Result<Vec<String>> {
        let result = self.call("list", vec![]).await?;
        let names = result.as_array().and_then(|items| {
            items
                .iter()
                .map(|name| name.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
        });
        names.ok_or_else(|| Error::unexpected("list", result))
    }

    pub async fn server_version(&mut self) -> Result<String> {
        let result = self.call("server_version", vec![]).await?;
        match result {
            Value::String(version) => Ok(version),
            other => Err(Error::unexpected("server_version", other)),
        }
    }

    pub async fn drop(&mut self, super_admin_password: &str, database: &str) -> Result<bool> {
        let result = self
            .call("drop", vec![json!(super_admin_password), json!(database)])
            .await?;
        Ok(crate::osv::fields::is_truthy(&result))
    }

    /// Creates `database` and waits until the server is done with it.
    ///
    /// The progress of the creation is polled every [`POLL_INTERVAL`], at most [`MAX_POLLS`]
    /// times.
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<Value>)` - The user accounts created along the database.
    /// * `Err(Error::Service)` - If a call to the service failed.
    /// * `Err(Error::Timeout)` - If the creation didn't complete in time.
    pub async fn create_and_wait(
        &mut self,
        super_admin_password: &str,
        database: &str,
        demo_data: bool,
        lang: &str,
        admin_password: &str,
    ) -> Result<Vec<Value>> {
        let db_id = self
            .call(
                "create",
                vec![
                    json!(super_admin_password),
                    json!(database),
                    json!(demo_data),
                    json!(lang),
                    json!(admin_password),
                ],
            )
            .await?;

        for attempt in 1..=MAX_POLLS {
            let result = self
                .call("get_progress", vec![json!(super_admin_password), db_id.clone()])
                .await?;
            let (progress, users) = parse_progress(result)?;

            if progress >= 1.0 {
                info!(database, attempt, "database created");
                return Ok(users);
            }

            debug!(database, attempt, progress, "database creation in progress");
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        warn!(database, polls = MAX_POLLS, "database creation still not complete, giving up");
        Err(Error::Timeout(format!(
            "Too many attempts, the creation of the database '{database}' has been canceled"
        )))
    }
}

/// The `wizard` service. Every call is prefixed with the credentials of the session.
pub struct WizardService<'s, T> {
    transport: &'s mut T,
    credentials: Vec<Value>,
}

impl<'s, T: Transport> WizardService<'s, T> {
    pub(crate) fn new(transport: &'s mut T, credentials: Vec<Value>) -> Self {
        Self {
            transport,
            credentials,
        }
    }

    /// Calls any method of the service, `args` following the credentials.
    pub async fn call(&mut self, method: &str, args: Vec<Value>) -> Result<Value> {
        let mut params = self.credentials.clone();
        params.extend(args);
        call_service(self.transport, "wizard", method, params).await
    }

    /// Instantiates the wizard `name`, returns the ID of the instance.
    pub async fn create(&mut self, name: &str, datas: Map<String, Value>) -> Result<i64> {
        let result = self
            .call("create", vec![json!(name), Value::Object(datas)])
            .await?;
        result
            .as_i64()
            .ok_or_else(|| Error::unexpected("create", result))
    }

    /// Runs `action` (`init` for the first step) on the wizard instance `id`.
    pub async fn execute(
        &mut self,
        id: i64,
        datas: Map<String, Value>,
        action: &str,
        context: Option<Map<String, Value>>,
    ) -> Result<Value> {
        let mut args = vec![json!(id), Value::Object(datas), json!(action)];
        if let Some(context) = context {
            args.push(Value::Object(context));
        }
        self.call("execute", args).await
    }
}

/// Splits a `get_progress` result: `[progress, [user, ...]]`.
fn parse_progress(result: Value) -> Result<(f64, Vec<Value>)> {
    let progress = result.get(0).and_then(Value::as_f64);
    let users = match result.get(1) {
        Some(Value::Array(users)) => users.clone(),
        _ => Vec::new(),
    };

    match progress {
        Some(progress) => Ok((progress, users)),
        None => Err(Error::unexpected("get_progress", result)),
    }
}
