//! # JSON-RPC Transport
//!
//! Sends calls to the `/jsonrpc` endpoint of the server using JSON-RPC 2.0 envelopes:
//!
//! ```json
//! {"jsonrpc": "2.0", "method": "call", "id": 1,
//!  "params": {"service": "object", "method": "execute", "args": [...]}}
//! ```
//!
//! The endpoint is stateless: credentials travel in `args` exactly like with XML-RPC,
//! so no session cookie has to be kept between calls.
use super::{Transport, TransportError};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct JsonRpcTransport {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    next_id: u64,
}

impl JsonRpcTransport {
    pub fn new(client: reqwest::Client, root_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            url: format!("{root_url}/jsonrpc"),
            timeout,
            next_id: 1,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn build_envelope(id: u64, service: &str, method: &str, args: Vec<Value>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "call",
        "id": id,
        "params": {
            "service": service,
            "method": method,
            "args": args,
        },
    })
}

fn parse_envelope(mut envelope: Value) -> Result<Value, TransportError> {
    if let Some(error) = envelope.get("error").filter(|e| !e.is_null()) {
        // Server-side exceptions carry the readable message and the traceback in `data`.
        let data = error.get("data");
        let message = data
            .and_then(|d| d.get("message"))
            .and_then(Value::as_str)
            .or_else(|| error.get("message").and_then(Value::as_str))
            .unwrap_or("Unknown JSON-RPC error")
            .to_string();
        let traceback = data
            .and_then(|d| d.get("debug"))
            .and_then(Value::as_str)
            .map(str::to_string);

        return Err(TransportError::Fault { message, traceback });
    }

    if let Some(result) = envelope.get_mut("result") {
        return Ok(result.take());
    }

    Err(TransportError::Malformed(format!(
        "JSON-RPC response without 'result' nor 'error': {envelope}"
    )))
}

impl Transport for JsonRpcTransport {
    async fn call(
        &mut self,
        service: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, TransportError> {
        let id = self.next_id;
        self.next_id += 1;

        debug!(url = %self.url, service, method, id, "jsonrpc call");

        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&build_envelope(id, service, method, args))
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&self.url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        let envelope: Value = response.json().await.map_err(|e| {
            if e.is_decode() {
                TransportError::Malformed(format!("invalid JSON-RPC response: {e}"))
            } else {
                TransportError::from_reqwest(&self.url, e)
            }
        })?;

        parse_envelope(envelope)
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}
