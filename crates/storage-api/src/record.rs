// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use xxhash_rust::xxh3::xxh3_128;

use shardsync_types::time::MicrosSinceEpoch;

/// A row fetched from the source. `timestamp` is the value of the table's timestamp column,
/// `fields` holds the selected columns.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Row {
    pub timestamp: MicrosSinceEpoch,
    pub fields: Map<String, Value>,
}

impl Row {
    pub fn new(timestamp: MicrosSinceEpoch, fields: Map<String, Value>) -> Self {
        Self { timestamp, fields }
    }

    /// Natural identifier of the row: the values of `id_columns` joined with `:`, or a hash of
    /// the row content if no id columns are configured. Each value escapes `\\` and `:` with a
    /// backslash, so distinct value tuples never share an id.
    ///
    /// The hash covers the canonical json rendering of the fields (keys sorted) plus the
    /// timestamp, so the same source row always maps to the same id.
    pub fn natural_id(&self, id_columns: &[String]) -> String {
        if id_columns.is_empty() {
            let sorted: BTreeMap<&String, &Value> = self.fields.iter().collect();
            let canonical = serde_json::to_string(&sorted).unwrap_or_default();
            let hash = xxh3_128(format!("{}|{canonical}", self.timestamp.as_i64()).as_bytes());
            return format!("{hash:032x}");
        }

        id_columns
            .iter()
            .map(|column| match self.fields.get(column) {
                Some(Value::String(s)) => escape_id_component(s),
                Some(Value::Null) | None => String::new(),
                Some(other) => escape_id_component(&other.to_string()),
            })
            .collect::<Vec<_>>()
            .join(":")
    }

    pub fn into_sink_record(self, id_columns: &[String]) -> SinkRecord {
        SinkRecord {
            id: self.natural_id(id_columns),
            timestamp: self.timestamp,
            fields: self.fields,
        }
    }
}

fn escape_id_component(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '\\' || c == ':' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// A record in a sink table, upserted by `id`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SinkRecord {
    pub id: String,
    pub timestamp: MicrosSinceEpoch,
    pub fields: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn row(ts: i64, fields: Value) -> Row {
        let Value::Object(fields) = fields else {
            panic!("fields must be an object");
        };
        Row::new(MicrosSinceEpoch::new(ts), fields)
    }

    #[test]
    fn id_columns_are_joined() {
        let row = row(5, json!({"mmsi": 244_000_111, "vessel": "Eendracht", "leg": null}));
        assert_eq!(
            row.natural_id(&["mmsi".to_owned(), "vessel".to_owned()]),
            "244000111:Eendracht"
        );
        assert_eq!(
            row.natural_id(&["mmsi".to_owned(), "leg".to_owned()]),
            "244000111:"
        );
    }

    #[test]
    fn separators_inside_values_do_not_collide() {
        let columns = ["a".to_owned(), "b".to_owned()];
        let left = row(5, json!({"a": "x:y", "b": "z"}));
        let right = row(5, json!({"a": "x", "b": "y:z"}));
        let slashed = row(5, json!({"a": "x\\", "b": ":z"}));

        assert_eq!(left.natural_id(&columns), r"x\:y:z");
        assert_eq!(right.natural_id(&columns), r"x:y\:z");
        assert_eq!(slashed.natural_id(&columns), r"x\\:\:z");
        assert_ne!(left.natural_id(&columns), right.natural_id(&columns));
        assert_ne!(left.natural_id(&columns), slashed.natural_id(&columns));
    }

    #[test]
    fn content_hash_is_stable_and_order_independent() {
        let a = row(5, json!({"a": 1, "b": "x"}));
        let b = row(5, json!({"b": "x", "a": 1}));
        let c = row(6, json!({"a": 1, "b": "x"}));

        assert_eq!(a.natural_id(&[]), b.natural_id(&[]));
        assert_ne!(a.natural_id(&[]), c.natural_id(&[]));
        assert_eq!(a.natural_id(&[]).len(), 32);
    }
}
