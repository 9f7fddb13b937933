/// Top-level keys of `TaskPickerConfig`.
pub(crate) const KNOWN_KEYS: &[&str] = &[
    "workspace",
    "output",
    "sessions_dir",
    "inbox_section",
    "archive_section",
    "exclude",
    "feedback_dir",
    "dedup",
    "store",
    "implicit",
    "logging",
];

/// Top-level keys serde would silently ignore (typos, misplaced sections).
pub(crate) fn unknown_keys(raw: &toml::Value) -> Vec<&str> {
    raw.as_table()
        .map(|table| {
            table
                .keys()
                .map(String::as_str)
                .filter(|key| !KNOWN_KEYS.contains(key))
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn warn_unknown_keys(raw: &toml::Value, source: &str) {
    for key in unknown_keys(raw) {
        tracing::warn!(config = source, key, "unknown config key is ignored");
    }
}

/// Deep merge two TOML values. Overlay wins for non-table values.
/// Tables are merged recursively (later layers override earlier ones).
pub(crate) fn merge_toml_values(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_map), toml::Value::Table(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                let merged_val = match base_map.remove(&key) {
                    Some(base_val) => merge_toml_values(base_val, overlay_val),
                    None => overlay_val,
                };
                base_map.insert(key, merged_val);
            }
            toml::Value::Table(base_map)
        }
        (_, overlay) => overlay,
    }
}
