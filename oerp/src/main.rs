//! # OERP CLI Entry Point
//!
//! The main executable for the `oerp` tool. This file drives the application lifecycle:
//!
//! 1. **Initialization**: Parses command-line arguments using [`cli::Cli`] and installs the log subscriber.
//! 2. **Connection**: Builds a [`Session`] for the target server via `oerp_core`.
//! 3. **Execution**: Logs in (except for `version`) and runs the command.
//! 4. **Presentation**: Formats and prints the resulting data or error to standard output/error.

mod cli;
mod formatter;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands};
use formatter::{FormattedString, GenericError, RecordView};
use oerp_core::{Config, Model, Session, SessionBuilder, session::SearchParams};
use serde_json::json;
use std::process;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    init_tracing(args.verbose);

    let mut session = connect_or_exit(&args);

    let result = match args.command {
        Commands::Version => version(&mut session).await,
        command => {
            login_or_exit(&mut session, &args.user, args.password.as_deref()).await;
            run(&mut session, command).await
        }
    };

    match result {
        Ok(output) => println!("{output}"),
        Err(err) => {
            eprintln!("{}", FormattedString::from(err));
            process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn connect_or_exit(args: &Cli) -> Session {
    let config = Config {
        timeout: args.timeout,
        ..Config::default()
    };

    let mut builder = SessionBuilder::new(&args.server)
        .port(args.port)
        .protocol(args.protocol)
        .config(config);

    if let Some(database) = &args.database {
        builder = builder.database(database);
    }

    debug!(
        server = %args.server,
        port = args.port,
        protocol = %args.protocol,
        timeout = args.timeout,
        "connecting"
    );

    match builder.build() {
        Ok(session) => session,
        Err(err) => {
            let err = GenericError("Invalid connection settings:", err);
            eprintln!("{}", FormattedString::from(err));
            process::exit(1);
        }
    }
}

async fn login_or_exit(session: &mut Session, user: &str, password: Option<&str>) {
    let Some(password) = password else {
        eprintln!(
            "{}",
            FormattedString::from(GenericError(
                "Missing password:",
                "use --password or set OERP_PASSWORD"
            ))
        );
        process::exit(1);
    };

    match session.login(user, password, None).await {
        Ok(record) => info!(user, uid = record.id(), "authenticated"),
        Err(err) => {
            eprintln!("{}", FormattedString::from(GenericError("Login Failed:", err)));
            process::exit(1);
        }
    }
}

async fn version(session: &mut Session) -> anyhow::Result<FormattedString> {
    let version = session
        .common()
        .version()
        .await
        .context("Failed to fetch the server version")?;

    Ok(FormattedString::from(version))
}

async fn run(session: &mut Session, command: Commands) -> anyhow::Result<FormattedString> {
    match command {
        Commands::Search {
            model,
            domain,
            limit,
        } => {
            debug!(%model, %domain, ?limit, "search");
            let params = SearchParams {
                limit,
                ..SearchParams::default()
            };
            let ids = session
                .search_with(&model, domain, params)
                .await
                .with_context(|| format!("Failed to search '{model}'"))?;

            Ok(FormattedString::from(json!(ids)))
        }
        Commands::Read { model, id, fields } => {
            debug!(%model, id, ?fields, "read");
            let record = session
                .browse(&model, id)
                .await
                .with_context(|| format!("Failed to read '{model},{id}'"))?;

            Ok(FormattedString::from(RecordView {
                record: &record,
                fields: &fields,
            }))
        }
        Commands::Fields { model } => {
            debug!(%model, "fields");
            let proxy = session
                .get(&model)
                .await
                .with_context(|| format!("Failed to fetch the fields of '{model}'"))?;

            let schema: &Model = proxy.schema();
            Ok(FormattedString::from(schema))
        }
        Commands::Call {
            model,
            method,
            args,
        } => {
            debug!(%model, %method, args = args.len(), "call");
            let result = session
                .execute(&model, &method, args)
                .await
                .with_context(|| format!("Call to '{model}.{method}' failed"))?;

            Ok(FormattedString::from(result))
        }
        Commands::Version => version(session).await,
    }
}
