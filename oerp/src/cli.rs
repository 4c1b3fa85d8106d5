//! # CLI
//!
//! This module defines the command-line interface of `oerp` using `clap`.
//!
//! Connection settings are global arguments with environment fallbacks, so they can be
//! set once (`OERP_SERVER`, `OERP_DATABASE`, `OERP_USER`, `OERP_PASSWORD`) and omitted
//! from every command. JSON arguments (domains, positional args) are validated here.
use clap::{Parser, Subcommand};
use oerp_core::Protocol;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "oerp", version, about = "Command line client for OpenERP servers")]
pub struct Cli {
    /// Host name of the server
    #[arg(long, env = "OERP_SERVER", default_value = "localhost", global = true)]
    pub server: String,

    #[arg(long, default_value_t = oerp_core::session::DEFAULT_PORT, global = true)]
    pub port: u16,

    /// Wire protocol (xmlrpc, xmlrpc+ssl, jsonrpc, jsonrpc+ssl)
    #[arg(long, default_value = "xmlrpc", value_parser = parse_protocol, global = true)]
    pub protocol: Protocol,

    /// Timeout of a single call, in seconds
    #[arg(long, default_value_t = 120, global = true)]
    pub timeout: u64,

    #[arg(long, env = "OERP_DATABASE", global = true)]
    pub database: Option<String>,

    #[arg(long, env = "OERP_USER", default_value = "admin", global = true)]
    pub user: String,

    #[arg(long, env = "OERP_PASSWORD", hide_env_values = true, global = true)]
    pub password: Option<String>,

    /// Log every round trip (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Search the ids of the records matching a domain
    ///
    /// ## Examples:
    ///
    /// ```bash
    /// oerp search res.partner --domain '[["customer", "=", true]]' --limit 10
    /// ```
    Search {
        model: String,

        /// JSON domain (Array of leaves)
        #[arg(long, default_value = "[]", value_parser = parse_domain)]
        domain: Value,

        #[arg(long)]
        limit: Option<i64>,
    },

    /// Browse one record and print its decoded fields
    Read {
        model: String,

        id: i64,

        /// Only print these fields (repeatable)
        #[arg(short = 'f', long = "field")]
        fields: Vec<String>,
    },

    /// Print the fields of a model
    Fields { model: String },

    /// Call any method of a model
    ///
    /// The credentials are prepended by the client, `--args` only holds the method arguments.
    ///
    /// ## Examples:
    ///
    /// ```bash
    /// oerp call res.partner name_search --args '["Agro"]'
    /// ```
    Call {
        model: String,

        method: String,

        /// "JSON positional arguments (Array)"
        #[arg(long, default_value = "[]", value_parser = parse_args)]
        args: Vec<Value>,
    },

    /// Print the version information of the server (no login)
    Version,
}

fn parse_protocol(value: &str) -> Result<Protocol, String> {
    value.parse().map_err(|e: oerp_core::Error| e.to_string())
}

fn parse_json(value: &str) -> Result<Value, String> {
    serde_json::from_str(value).map_err(|e| format!("Invalid JSON: {e}"))
}

fn parse_domain(value: &str) -> Result<Value, String> {
    match parse_json(value)? {
        domain @ Value::Array(_) => Ok(domain),
        _ => Err("A domain must be a JSON array".to_string()),
    }
}

fn parse_args(value: &str) -> Result<Vec<Value>, String> {
    match parse_json(value)? {
        Value::Array(args) => Ok(args),
        _ => Err("Arguments must be a JSON array".to_string()),
    }
}
