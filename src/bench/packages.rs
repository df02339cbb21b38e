//! Merging app `package.json` manifests into the bench-level one used by npm.
//!
//! Conflict policy, applied per key in app enumeration order:
//! - object + object: merged key by key, recursively
//! - array + array: concatenated, earlier apps first
//! - anything else: the later app wins

use serde_json::{Map, Value};

use super::BenchPaths;
use crate::types::AppName;

/// Merge `incoming` into `base`.
pub fn merge_value(base: &mut Value, incoming: Value) {
    match (base, incoming) {
        (Value::Object(base), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match base.get_mut(&key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(base), Value::Array(incoming)) => base.extend(incoming),
        (base, incoming) => *base = incoming,
    }
}

/// Fold manifests in order.
pub fn merge_manifests(manifests: impl IntoIterator<Item = Value>) -> Value {
    let mut merged = Value::Object(Map::new());
    for manifest in manifests {
        merge_value(&mut merged, manifest);
    }
    merged
}

/// Read every app's `package.json` (apps without one are skipped) and merge.
///
/// A manifest that is not valid JSON is logged and left out.
pub fn collect_app_manifests(paths: &BenchPaths, apps: &[AppName]) -> Value {
    let manifests = apps.iter().filter_map(|app| {
        let path = paths.app_dir(app).join("package.json");
        let contents = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<Value>(&contents) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Skipping {}: {}", path.display(), e);
                None
            }
        }
    });
    merge_manifests(manifests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn objects_merge_key_by_key() {
        let merged = merge_manifests([
            json!({"dependencies": {"vue": "2.6.0", "moment": "2.0.0"}}),
            json!({"dependencies": {"chart.js": "2.7.0"}}),
        ]);
        assert_eq!(
            merged,
            json!({"dependencies": {"vue": "2.6.0", "moment": "2.0.0", "chart.js": "2.7.0"}})
        );
    }

    #[test]
    fn later_app_wins_on_scalar_conflict() {
        let merged = merge_manifests([
            json!({"name": "frappe", "dependencies": {"vue": "2.6.0"}}),
            json!({"name": "erpnext", "dependencies": {"vue": "2.7.0"}}),
        ]);
        assert_eq!(merged["name"], "erpnext");
        assert_eq!(merged["dependencies"]["vue"], "2.7.0");
    }

    #[test]
    fn arrays_concatenate_in_order() {
        let merged = merge_manifests([
            json!({"files": ["a.js"]}),
            json!({"files": ["b.js", "c.js"]}),
        ]);
        assert_eq!(merged["files"], json!(["a.js", "b.js", "c.js"]));
    }

    #[test]
    fn mismatched_types_take_later_value() {
        let merged = merge_manifests([json!({"scripts": ["x"]}), json!({"scripts": {"build": "y"}})]);
        assert_eq!(merged["scripts"], json!({"build": "y"}));
    }

    #[test]
    fn order_decides_outcome() {
        let a = json!({"version": "1"});
        let b = json!({"version": "2"});
        assert_eq!(merge_manifests([a.clone(), b.clone()])["version"], "2");
        assert_eq!(merge_manifests([b, a])["version"], "1");
    }

    #[test]
    fn collect_skips_missing_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let paths = BenchPaths::new(dir.path());
        let apps: Vec<AppName> = ["frappe", "erpnext", "broken", "empty"]
            .iter()
            .map(|n| n.parse().unwrap())
            .collect();
        for app in &apps {
            std::fs::create_dir_all(paths.app_dir(app)).unwrap();
        }
        std::fs::write(
            paths.app_dir(&apps[0]).join("package.json"),
            r#"{"dependencies": {"vue": "2"}}"#,
        )
        .unwrap();
        std::fs::write(
            paths.app_dir(&apps[1]).join("package.json"),
            r#"{"dependencies": {"onscan.js": "1"}}"#,
        )
        .unwrap();
        std::fs::write(paths.app_dir(&apps[2]).join("package.json"), "{oops").unwrap();

        let merged = collect_app_manifests(&paths, &apps);
        assert_eq!(merged, json!({"dependencies": {"vue": "2", "onscan.js": "1"}}));
    }
}
