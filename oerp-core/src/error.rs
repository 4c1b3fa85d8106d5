//! # Errors
//!
//! Every public operation of the crate either returns its documented value or one of the
//! [`Error`] variants below. Transport failures are never swallowed: they are re-wrapped with
//! the business context (model, method, service) and kept as the error `source`.
use crate::{osv::fields::FieldError, rpc::TransportError};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Login failed: {message}")]
    Authentication {
        message: String,
        #[source]
        source: Option<TransportError>,
    },

    #[error("Not logged in, a successful login is required to query the server")]
    NotAuthenticated,

    #[error("Call to '{model}.{method}' failed: '{source}'")]
    RemoteCall {
        model: String,
        method: String,
        #[source]
        source: TransportError,
    },

    #[error("Call to the '{service}' service method '{method}' failed: '{source}'")]
    Service {
        service: String,
        method: String,
        #[source]
        source: TransportError,
    },

    #[error("There is no model named '{model}': '{source}'")]
    UnknownModel {
        model: String,
        #[source]
        source: TransportError,
    },

    #[error("There is no '{model}' record with ID {id}")]
    UnknownRecord { model: String, id: i64 },

    #[error("Can't build the field '{field}' of '{model}', type '{kind}' unknown")]
    UnsupportedFieldKind {
        model: String,
        field: String,
        kind: String,
    },

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error("{0}")]
    Timeout(String),

    #[error("Unexpected response to '{method}': {value}")]
    UnexpectedResponse { method: String, value: Value },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether this error was caused by a transport timeout, or by a polling loop giving up.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout(_) => true,
            Error::Authentication {
                source: Some(source),
                ..
            } => source.is_timeout(),
            Error::RemoteCall { source, .. }
            | Error::Service { source, .. }
            | Error::UnknownModel { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// The server-side traceback carried by the underlying transport error, if any.
    pub fn traceback(&self) -> Option<&str> {
        match self {
            Error::Authentication {
                source: Some(source),
                ..
            } => source.traceback(),
            Error::RemoteCall { source, .. }
            | Error::Service { source, .. }
            | Error::UnknownModel { source, .. } => source.traceback(),
            _ => None,
        }
    }

    pub(crate) fn unexpected(method: &str, value: Value) -> Self {
        Error::UnexpectedResponse {
            method: method.to_string(),
            value,
        }
    }
}
