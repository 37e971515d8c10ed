use crate::core::{FieldMap, NestError, Result, Value};
use regex::Regex;
use std::collections::BTreeMap;

/// Decodes a JSON nested-attributes payload into raw field maps.
///
/// Accepted shapes:
/// - an array of objects, taken in array order;
/// - an object keyed by row indices (`{"0": {...}, "10": {...}}`), ordered
///   numerically by key;
/// - a single object, taken as one row.
pub fn decode_json(payload: &serde_json::Value) -> Result<Vec<FieldMap>> {
    match payload {
        serde_json::Value::Array(rows) => rows.iter().map(decode_row).collect(),
        serde_json::Value::Object(map) => {
            let indexed = !map.is_empty() && map.keys().all(|key| is_index(key));
            if !indexed {
                return Ok(vec![decode_row(payload)?]);
            }

            let mut rows: Vec<(u64, &serde_json::Value)> = Vec::with_capacity(map.len());
            for (key, row) in map {
                let index = key
                    .parse()
                    .map_err(|_| NestError::Decode(format!("row index '{}' is out of range", key)))?;
                rows.push((index, row));
            }
            rows.sort_by_key(|(index, _)| *index);
            rows.into_iter().map(|(_, row)| decode_row(row)).collect()
        }
        serde_json::Value::Null => Ok(Vec::new()),
        other => Err(NestError::Decode(format!(
            "nested attributes must be an array or an object, got {}",
            other
        ))),
    }
}

fn is_index(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit())
}

fn decode_row(row: &serde_json::Value) -> Result<FieldMap> {
    let serde_json::Value::Object(map) = row else {
        return Err(NestError::Decode(format!(
            "nested attribute row must be an object, got {}",
            row
        )));
    };

    let mut fields = FieldMap::new();
    for (name, value) in map {
        if value.is_array() || value.is_object() {
            return Err(NestError::Decode(format!(
                "field '{}' must be a scalar value",
                name
            )));
        }
        fields.insert(name.clone(), serde_json::from_value::<Value>(value.clone())?);
    }
    Ok(fields)
}

/// Decodes flat form pairs such as `tasks_attributes[0][name]=Write docs`.
///
/// Pairs that do not belong to `prefix` are ignored. When a key repeats (the
/// hidden-field-plus-checkbox idiom), the last value wins.
pub fn decode_form_pairs(prefix: &str, pairs: &[(String, String)]) -> Result<Vec<FieldMap>> {
    let pattern = format!(r"^{}\[(\d+)\]\[([A-Za-z_][A-Za-z0-9_]*)\]$", regex::escape(prefix));
    let key_pattern = Regex::new(&pattern)
        .map_err(|err| NestError::Decode(format!("invalid attribute prefix '{}': {}", prefix, err)))?;

    let mut rows: BTreeMap<u64, FieldMap> = BTreeMap::new();
    for (key, value) in pairs {
        let Some(captures) = key_pattern.captures(key) else {
            continue;
        };
        let index: u64 = captures[1]
            .parse()
            .map_err(|_| NestError::Decode(format!("row index in '{}' is out of range", key)))?;
        rows.entry(index)
            .or_default()
            .insert(captures[2].to_string(), Value::Text(value.clone()));
    }

    Ok(rows.into_values().collect())
}
