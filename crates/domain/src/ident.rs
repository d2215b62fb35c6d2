//! Identifier validation for boundary inputs.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result};

/// Mission and tool-call ids are opaque, URL-safe tokens.
fn id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap())
}

/// Validate an inbound id. Malformed ids are a `Protocol` error and must
/// not reach storage lookups.
pub fn validate_id(kind: &str, id: &str) -> Result<()> {
    if id_pattern().is_match(id) {
        Ok(())
    } else {
        Err(Error::Protocol(format!("malformed {kind} id: {id:?}")))
    }
}
