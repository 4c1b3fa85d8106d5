//! # Remote Call Transport
//!
//! This module contains the low-level building blocks for performing one round trip
//! against an OpenERP server.
//!
//! Every wire protocol is exposed through the same contract, the [`Transport`] trait:
//! `call(service, method, args) -> value`. Arguments and results are generic
//! `serde_json::Value` structures, transcoded to the wire format on the fly.
//!
//! ## Protocols
//!
//! * [`xmlrpc::XmlRpcTransport`]: XML-RPC over HTTP(S), one URL per service.
//! * [`jsonrpc::JsonRpcTransport`]: JSON-RPC 2.0 over HTTP(S) on the `/jsonrpc` endpoint.
//!
//! The [`Connector`] enum picks one of them at construction time from a [`Protocol`].
//!
//! Transports never retry: a failed call is reported once, as a [`TransportError`].
pub mod codec;
pub mod jsonrpc;
pub mod xmlrpc;

use crate::{error::Error, session::Config};
use jsonrpc::JsonRpcTransport;
use serde_json::Value;
use std::{fmt, future::Future, str::FromStr, time::Duration};
use xmlrpc::XmlRpcTransport;

/// Errors reported by a single round trip, whatever the wire protocol.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Request to '{url}' timed out")]
    Timeout { url: String },
    #[error("HTTP request to '{url}' failed: '{source}'")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Server at '{url}' answered with HTTP status {status}")]
    Status { url: String, status: u16 },
    #[error("{message}")]
    Fault {
        message: String,
        traceback: Option<String>,
    },
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl TransportError {
    pub(crate) fn from_reqwest(url: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            TransportError::Timeout {
                url: url.to_string(),
            }
        } else {
            TransportError::Http {
                url: url.to_string(),
                source,
            }
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }

    /// The server-side traceback attached to a fault, if the server sent one.
    pub fn traceback(&self) -> Option<&str> {
        match self {
            TransportError::Fault { traceback, .. } => traceback.as_deref(),
            _ => None,
        }
    }
}

/// One round trip to the server.
///
/// Implementations must be interchangeable: the session only relies on this contract.
pub trait Transport {
    /// Calls `method` on the remote `service` (`common`, `object`, `db`, ...) with
    /// positional `args`.
    fn call(
        &mut self,
        service: &str,
        method: &str,
        args: Vec<Value>,
    ) -> impl Future<Output = Result<Value, TransportError>> + Send;

    /// Updates the timeout applied to every following call.
    fn set_timeout(&mut self, timeout: Duration);
}

/// The wire protocols a [`Connector`] can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    #[default]
    XmlRpc,
    XmlRpcSsl,
    JsonRpc,
    JsonRpcSsl,
}

impl Protocol {
    pub const SUPPORTED: [&'static str; 4] = ["xmlrpc", "xmlrpc+ssl", "jsonrpc", "jsonrpc+ssl"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::XmlRpc => "xmlrpc",
            Protocol::XmlRpcSsl => "xmlrpc+ssl",
            Protocol::JsonRpc => "jsonrpc",
            Protocol::JsonRpcSsl => "jsonrpc+ssl",
        }
    }

    fn scheme(&self) -> &'static str {
        match self {
            Protocol::XmlRpc | Protocol::JsonRpc => "http",
            Protocol::XmlRpcSsl | Protocol::JsonRpcSsl => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xmlrpc" => Ok(Protocol::XmlRpc),
            "xmlrpc+ssl" => Ok(Protocol::XmlRpcSsl),
            "jsonrpc" => Ok(Protocol::JsonRpc),
            "jsonrpc+ssl" => Ok(Protocol::JsonRpcSsl),
            "netrpc" => Err(Error::Configuration(
                "The 'netrpc' protocol is not supported by this client, use 'xmlrpc' or 'jsonrpc'"
                    .to_string(),
            )),
            other => Err(Error::Configuration(format!(
                "The protocol '{other}' is not supported. Please choose a protocol among these ones: {}",
                Protocol::SUPPORTED.join(", ")
            ))),
        }
    }
}

/// A [`Transport`] selected at runtime from a [`Protocol`].
#[derive(Debug, Clone)]
pub enum Connector {
    XmlRpc(XmlRpcTransport),
    JsonRpc(JsonRpcTransport),
}

impl Connector {
    /// Builds the transport for `protocol`, targeting `server:port`.
    ///
    /// # Returns
    ///
    /// * `Ok(Connector)` - The transport, no connection is opened yet.
    /// * `Err(Error::Configuration)` - If the port is invalid or the HTTP client can't be built.
    pub fn new(
        protocol: Protocol,
        server: &str,
        port: u16,
        config: &Config,
    ) -> Result<Self, Error> {
        if port == 0 {
            return Err(Error::Configuration(format!(
                "The port '{port}' is invalid"
            )));
        }

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build the HTTP client: {e}")))?;

        let root_url = format!("{}://{}:{}", protocol.scheme(), server, port);
        let timeout = config.timeout();

        Ok(match protocol {
            Protocol::XmlRpc | Protocol::XmlRpcSsl => Connector::XmlRpc(XmlRpcTransport::new(
                client,
                &root_url,
                config.version.as_deref(),
                timeout,
            )),
            Protocol::JsonRpc | Protocol::JsonRpcSsl => {
                Connector::JsonRpc(JsonRpcTransport::new(client, &root_url, timeout))
            }
        })
    }
}

impl Transport for Connector {
    async fn call(
        &mut self,
        service: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, TransportError> {
        match self {
            Connector::XmlRpc(transport) => transport.call(service, method, args).await,
            Connector::JsonRpc(transport) => transport.call(service, method, args).await,
        }
    }

    fn set_timeout(&mut self, timeout: Duration) {
        match self {
            Connector::XmlRpc(transport) => transport.set_timeout(timeout),
            Connector::JsonRpc(transport) => transport.set_timeout(timeout),
        }
    }
}
