//! SQL identifier quoting and validation.

use std::sync::OnceLock;

use regex::Regex;

use crate::Result;
use crate::error::{ConfigErrorKind, Error};

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them (`"` → `""`).
///
/// ```
/// use rowbound_core::quote_ident;
///
/// assert_eq!(quote_ident("users"), "\"users\"");
/// assert_eq!(quote_ident("user\"name"), "\"user\"\"name\"");
/// ```
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

const IDENTIFIER_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_$]{0,127}$";

fn identifier_regex() -> Option<&'static Regex> {
    static REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    REGEX
        .get_or_init(|| match Regex::new(IDENTIFIER_PATTERN) {
            Ok(regex) => Some(regex),
            Err(e) => {
                tracing::warn!(error = %e, "identifier pattern failed to compile");
                None
            }
        })
        .as_ref()
}

/// Whether `name` is usable as a connection or table name without quoting.
///
/// Shard targets are validated with this before they become ambient.
pub fn is_valid_identifier(name: &str) -> bool {
    identifier_regex().is_some_and(|regex| regex.is_match(name))
}

/// Validate a connection or table name, naming `what` in the error.
pub fn validate_identifier(what: &str, name: &str) -> Result<()> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(Error::config(
            ConfigErrorKind::InvalidName,
            format!("invalid {what} name {name:?}"),
        ))
    }
}
