// Key sanitization and id generation

use crate::error::{HashDocError, Result};
use crate::schema::AutoIdStrategy;
use crate::store::KeyStore;

/// Width of counter-generated ids, left padded with zeros.
pub const COUNTER_ID_WIDTH: usize = 8;

/// Default separator between the type prefix and the local id.
pub const DEFAULT_DELIMITER: char = '/';

const RESERVED_DELIMITERS: &[char] = &['\\', '_', ':', '*', '?', '%', '#', '"', '\''];

/// Keep only ASCII letters and digits, uppercased.
pub fn sanitize_segment(s: &str) -> String {
    s.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Turn a bare local id or an already prefixed key into the full key
/// `TYPE{delimiter}LOCALID` for `type_name`.
///
/// Every delimiter separated segment is sanitized and empty segments are
/// dropped. A leading segment equal to the type name is treated as the
/// prefix when more segments follow it, which makes the function
/// idempotent on its own output.
pub fn sanitize_id(type_name: &str, raw_id: &str, delimiter: char) -> Result<String> {
    let type_name = sanitize_segment(type_name);
    let mut segments = raw_id.split(delimiter).map(sanitize_segment);

    let first = segments.next().unwrap_or_default();
    let rest: Vec<String> = segments.collect();

    let local_id = if first == type_name && !rest.is_empty() {
        rest.concat()
    } else {
        let mut local = first;
        local.extend(rest);
        local
    };

    if local_id.is_empty() {
        return Err(HashDocError::InvalidKey {
            key: raw_id.to_string(),
            reason: "no letters or digits left after sanitizing".into(),
        });
    }

    Ok(format!("{type_name}{delimiter}{local_id}"))
}

/// Join sanitized parts with the delimiter, e.g. `("COUNTRY", "es")` into
/// `COUNTRY/ES`.
pub fn join_key(parts: &[&str], delimiter: char) -> String {
    parts
        .iter()
        .map(|p| sanitize_segment(p))
        .collect::<Vec<_>>()
        .join(&delimiter.to_string())
}

/// Split a full key into its type prefix and local id.
pub fn split_key(key: &str, delimiter: char) -> Option<(&str, &str)> {
    key.split_once(delimiter)
}

/// Store key of the per-type id counter.
pub fn counter_key(type_name: &str) -> String {
    format!("{type_name}_KEY")
}

pub fn format_counter_id(n: i64) -> String {
    format!("{n:0>width$}", width = COUNTER_ID_WIDTH)
}

/// Generate the next automatic local id for `type_name`.
///
/// Counter ids come from an atomic increment, so they are unique and
/// strictly increasing per type; they are never reused.
pub fn next_auto_id(
    store: &dyn KeyStore,
    type_name: &str,
    strategy: AutoIdStrategy,
) -> Result<String> {
    Ok(match strategy {
        AutoIdStrategy::Counter => format_counter_id(store.incr(&counter_key(type_name))?),
        AutoIdStrategy::Ulid => ulid::Ulid::new().to_string(),
        AutoIdStrategy::Uuid => uuid::Uuid::new_v4().simple().to_string().to_uppercase(),
    })
}

/// Check that `delimiter` can separate key segments safely.
pub fn validate_delimiter(delimiter: char) -> Result<()> {
    if delimiter.is_ascii_alphanumeric()
        || delimiter.is_whitespace()
        || delimiter.is_control()
        || !delimiter.is_ascii()
        || RESERVED_DELIMITERS.contains(&delimiter)
    {
        return Err(HashDocError::Schema(format!(
            "'{delimiter}' cannot be used as key delimiter"
        )));
    }
    Ok(())
}
