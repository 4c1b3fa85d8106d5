use colored::*;
use oerp_core::{Error, Model, Record};
use std::fmt::Display;

/// A wrapper struct for a formatted, colored string.
///
/// Implements `Display` so it can be printed directly.
pub struct FormattedString(pub String);

/// A record, restricted to `fields` (all of the schema fields when empty).
pub struct RecordView<'a> {
    pub record: &'a Record,
    pub fields: &'a [String],
}

pub struct GenericError<T: Display>(pub &'static str, pub T);

impl std::fmt::Display for FormattedString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f)?;
        writeln!(f, "{}", self.0)?;
        Ok(())
    }
}

impl From<serde_json::Value> for FormattedString {
    fn from(value: serde_json::Value) -> Self {
        FormattedString(serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()))
    }
}

impl From<anyhow::Error> for FormattedString {
    fn from(err: anyhow::Error) -> Self {
        let mut out = format!("{}\n\n'{:#}'", "Call Failed:".red().bold(), err);

        if let Some(traceback) = err.downcast_ref::<Error>().and_then(Error::traceback) {
            out.push_str(&format!(
                "\n\n{}\n{}",
                "Server traceback:".yellow(),
                traceback.trim_end().dimmed()
            ));
        }

        FormattedString(out)
    }
}

impl<T: Display> From<GenericError<T>> for FormattedString {
    fn from(GenericError(msg, err): GenericError<T>) -> Self {
        FormattedString(format!("{}\n\n'{}'", msg.red().bold(), err))
    }
}

impl From<RecordView<'_>> for FormattedString {
    fn from(RecordView { record, fields }: RecordView<'_>) -> Self {
        let names: Vec<&str> = if fields.is_empty() {
            record.schema().fields().map(|f| f.name()).collect()
        } else {
            fields.iter().map(String::as_str).collect()
        };

        let width = names.iter().map(|n| n.len()).max().unwrap_or(0);

        let mut out = format!("{}", record.to_string().green().bold());
        for name in names {
            let value = match record.get(name) {
                Ok(value) => value.to_json().to_string(),
                Err(err) => err.to_string().red().to_string(),
            };
            out.push_str(&format!("\n  {}  {}", format!("{name:width$}").cyan(), value));
        }

        FormattedString(out)
    }
}

impl From<&Model> for FormattedString {
    fn from(model: &Model) -> Self {
        let width = model.fields().map(|f| f.name().len()).max().unwrap_or(0);

        let mut out = format!("{} {}", "Model:".green().bold(), model.name());
        for field in model.fields() {
            out.push_str(&format!(
                "\n  {}  {}",
                format!("{:width$}", field.name()).cyan(),
                field
            ));
            if let Some(help) = field.help() {
                out.push_str(&format!("\n  {:width$}  {}", "", help.dimmed()));
            }
        }

        FormattedString(out)
    }
}
