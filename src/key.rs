use serde_json::{Map, Value};

use crate::error::LocusError;

pub fn serialize(mapping: &Map<String, Value>) -> Result<String, LocusError> {
    let canonical = canonicalize_map(mapping);
    serde_json::to_string(&Value::Object(canonical))
        .map_err(|err| LocusError::KeyComputation(err.to_string()))
}

pub fn pick(mapping: &Map<String, Value>, allowed: &[&str]) -> Map<String, Value> {
    allowed
        .iter()
        .filter_map(|name| {
            mapping
                .get(*name)
                .map(|value| (name.to_string(), value.clone()))
        })
        .collect()
}

pub fn merge(base: &Map<String, Value>, overlay: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = base.clone();
    for (name, value) in overlay {
        merged.insert(name.clone(), value.clone());
    }
    merged
}

fn canonicalize_map(mapping: &Map<String, Value>) -> Map<String, Value> {
    let mut entries = mapping.iter().collect::<Vec<_>>();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
        .into_iter()
        .map(|(name, value)| (name.clone(), canonicalize(value)))
        .collect()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(inner) => Value::Object(canonicalize_map(inner)),
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn compact_and_sorted() {
        let map = object(json!({"start": 0, "chrom": "chr1", "end": 1000}));
        assert_eq!(
            serialize(&map).unwrap(),
            r#"{"chrom":"chr1","end":1000,"start":0}"#
        );
    }

    #[test]
    fn nested_mappings_are_sorted() {
        let map = object(json!({"b": {"z": 1, "a": [{"y": 2, "x": 1}]}, "a": null}));
        assert_eq!(
            serialize(&map).unwrap(),
            r#"{"a":null,"b":{"a":[{"x":1,"y":2}],"z":1}}"#
        );
    }

    #[test]
    fn pick_keeps_only_present_allowed_fields() {
        let map = object(json!({"path": "/a", "resolution": 1000, "balance": "KR"}));
        let picked = pick(&map, &["path", "resolution", "matrix_type"]);
        assert_eq!(Value::Object(picked), json!({"path": "/a", "resolution": 1000}));
    }

    #[test]
    fn merge_prefers_overlay() {
        let base = object(json!({"path": "/a", "chrom": "chr1"}));
        let overlay = object(json!({"chrom": "chr2"}));
        assert_eq!(
            Value::Object(merge(&base, &overlay)),
            json!({"path": "/a", "chrom": "chr2"})
        );
    }
}
