//! # OERP Core
//!
//! `oerp-core` is the foundational library powering the `oerp` CLI. It provides a dynamic
//! client capable of interacting with any OpenERP server without compile-time knowledge
//! of its data models.
//!
//! ## Key Components
//!
//! * **[`Session`]:** The main entry point. It holds the server connection, the authenticated
//!   user and the default context, and forwards business calls (`search`, `read`, `write`, ...)
//!   to the remote `object` service.
//! * **[`ModelProxy`]:** A handle on one remote model. The model schema is fetched once through
//!   `fields_get` and cached by the session; the proxy browses records and forwards any other
//!   method verbatim.
//! * **[`Record`]:** One browsed record. Field values are decoded and validated through the
//!   [`FieldDescriptor`]s of its model, and local edits are tracked until they are written back.
//!
//! ## Transports
//!
//! Every round trip goes through the [`rpc::Transport`] trait. Two wire protocols are bundled
//! behind the [`rpc::Connector`] enum:
//!
//! * **XML-RPC** (`xmlrpc`, `xmlrpc+ssl`): see [`rpc::xmlrpc`] and its [`rpc::codec`].
//! * **JSON-RPC** (`jsonrpc`, `jsonrpc+ssl`): see [`rpc::jsonrpc`].
//!
//! The [`testing::MockServer`] transport answers from memory and is what the test-suite runs on.
//!
//! ## Example
//!
//! ```rust,no_run
//! use oerp_core::{Protocol, SessionBuilder};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = SessionBuilder::new("localhost")
//!     .protocol(Protocol::JsonRpc)
//!     .database("demo")
//!     .build()?;
//!
//! session.login("admin", "admin", None).await?;
//!
//! let ids = session.search("res.partner", json!([["name", "=", "Acme"]])).await?;
//! let mut partner = session.browse("res.partner", ids[0]).await?;
//! partner.set("credit_limit", 250.0)?;
//! session.write_record(&mut partner).await?;
//! # Ok(())
//! # }
//! ```
pub mod error;
pub mod osv;
pub mod rpc;
pub mod session;
pub mod testing;
pub mod tools;

pub use error::{Error, Result};
pub use osv::{
    Model, ModelProxy,
    fields::{FieldDescriptor, FieldError, FieldKind, FieldValue},
    record::{Record, RecordRef},
};
pub use rpc::{Connector, Protocol, Transport, TransportError};
pub use session::{Config, Session, SessionBuilder};

// Re-exports
pub use chrono;
pub use serde_json;
