//! Structural checks for config layers: known keys and value kinds.
//!
//! Runs before serde so unknown keys and bad values are reported with the
//! layer and dotted path they came from.

use crate::ConfigError;
use serde_json::Value;

/// Expected shape of one config value.
enum Kind {
    Section(&'static [(&'static str, Kind)]),
    /// Non-negative integer.
    Count,
    /// Non-negative integer or `null`.
    OptionalCount,
    Flag,
    Text,
    OneOf(&'static [&'static str]),
}

const LAYER_TTLS: &[(&str, Kind)] = &[
    ("ephemeral_secs", Kind::Count),
    ("session_secs", Kind::Count),
    ("short_term_secs", Kind::Count),
    ("long_term_secs", Kind::Count),
];

const STORE: &[(&str, Kind)] = &[
    ("layers", Kind::Section(LAYER_TTLS)),
    ("sweep_interval_secs", Kind::Count),
    ("max_entries", Kind::OptionalCount),
    ("default_search_limit", Kind::Count),
];

const COORDINATOR: &[(&str, Kind)] = &[("init_timeout_ms", Kind::Count)];

const PERSISTENCE: &[(&str, Kind)] = &[
    ("enabled", Kind::Flag),
    ("path", Kind::Text),
    ("queue_capacity", Kind::Count),
];

const SESSIONS: &[(&str, Kind)] = &[
    (
        "archive_policy",
        Kind::OneOf(&["promote_marked", "promote_all", "drop_all"]),
    ),
    ("handoff_layer", Kind::OneOf(&["long_term", "permanent"])),
    ("handoff_history_tail", Kind::Count),
    ("idle_timeout_secs", Kind::Count),
];

const ROOT: &[(&str, Kind)] = &[
    ("$schema", Kind::Text),
    ("store", Kind::Section(STORE)),
    ("coordinator", Kind::Section(COORDINATOR)),
    ("persistence", Kind::Section(PERSISTENCE)),
    ("sessions", Kind::Section(SESSIONS)),
];

/// Check `value` against the config schema. Every key is optional.
pub(super) fn validate_layer_schema(value: &Value, layer: &str) -> Result<(), ConfigError> {
    check(value, &Kind::Section(ROOT), layer, "")
}

fn check(value: &Value, kind: &Kind, layer: &str, path: &str) -> Result<(), ConfigError> {
    let expected = match kind {
        Kind::Section(fields) => {
            let Value::Object(map) = value else {
                return Err(schema_error(layer, path, "expected object"));
            };
            for (key, child) in map {
                let child_path = join_path(path, key);
                let Some((_, child_kind)) = fields.iter().find(|(name, _)| name == key) else {
                    return Err(schema_error(layer, &child_path, "unknown key"));
                };
                check(child, child_kind, layer, &child_path)?;
            }
            return Ok(());
        }
        Kind::OneOf(variants) => {
            return match value.as_str() {
                Some(raw) if variants.contains(&raw) => Ok(()),
                Some(raw) => Err(schema_error(
                    layer,
                    path,
                    &format!(
                        "unknown value `{raw}` (expected one of {})",
                        variants.join(", ")
                    ),
                )),
                None => Err(schema_error(layer, path, "expected string")),
            };
        }
        Kind::Count if value.is_u64() => return Ok(()),
        Kind::OptionalCount if value.is_u64() || value.is_null() => return Ok(()),
        Kind::Flag if value.is_boolean() => return Ok(()),
        Kind::Text if value.is_string() => return Ok(()),
        Kind::Count | Kind::OptionalCount => "expected non-negative integer",
        Kind::Flag => "expected bool",
        Kind::Text => "expected string",
    };
    Err(schema_error(layer, path, expected))
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn schema_error(layer: &str, path: &str, message: &str) -> ConfigError {
    ConfigError::Schema {
        path: format!("{layer}:{}", if path.is_empty() { "root" } else { path }),
        message: message.to_string(),
    }
}
