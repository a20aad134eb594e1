// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Wire types of the `jobs.query` and `jobs.getQueryResults` REST calls and their decoding
//! into [`Row`]s.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use shardsync_storage_api::Row;
use shardsync_types::time::MicrosSinceEpoch;

use crate::sql::CURSOR_ALIAS;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueryRequest<'a> {
    pub query: &'a str,
    pub use_legacy_sql: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<&'a str>,
    pub timeout_ms: u64,
    pub format_options: FormatOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FormatOptions {
    pub use_int64_timestamp: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueryResponse {
    #[serde(default)]
    pub job_complete: bool,
    pub job_reference: Option<JobReference>,
    pub schema: Option<TableSchema>,
    #[serde(default)]
    pub rows: Vec<TableRow>,
    pub page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobReference {
    pub job_id: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct TableSchema {
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub mode: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TableRow {
    #[serde(default)]
    pub f: Vec<Cell>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Cell {
    #[serde(default)]
    pub v: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("result has no schema")]
    MissingSchema,
    #[error("row has {actual} cells but the schema has {expected} fields")]
    CellCount { expected: usize, actual: usize },
    #[error("column '{0}' is missing or not an integer")]
    MissingCursor(&'static str),
    #[error("count result is missing")]
    MissingCount,
    #[error("cannot decode {field_type} value {value} of field '{field}'")]
    InvalidValue {
        field: String,
        field_type: String,
        value: Value,
    },
}

/// Decodes rows, moving the cursor column into [`Row::timestamp`].
pub(crate) fn decode_rows(
    schema: &TableSchema,
    rows: Vec<TableRow>,
) -> Result<Vec<Row>, DecodeError> {
    rows.into_iter()
        .map(|row| {
            let mut fields = decode_record(&schema.fields, row.f)?;
            let cursor = fields
                .remove(CURSOR_ALIAS)
                .and_then(|value| value.as_i64())
                .ok_or(DecodeError::MissingCursor(CURSOR_ALIAS))?;
            Ok(Row::new(MicrosSinceEpoch::new(cursor), fields))
        })
        .collect()
}

/// Decodes the single `row_count` cell of a count query.
pub(crate) fn decode_count(schema: &TableSchema, rows: Vec<TableRow>) -> Result<u64, DecodeError> {
    let row = rows.into_iter().next().ok_or(DecodeError::MissingCount)?;
    decode_record(&schema.fields, row.f)?
        .into_iter()
        .next()
        .and_then(|(_, value)| value.as_u64())
        .ok_or(DecodeError::MissingCount)
}

fn decode_record(
    fields: &[FieldSchema],
    cells: Vec<Cell>,
) -> Result<Map<String, Value>, DecodeError> {
    if fields.len() != cells.len() {
        return Err(DecodeError::CellCount {
            expected: fields.len(),
            actual: cells.len(),
        });
    }
    fields
        .iter()
        .zip(cells)
        .map(|(field, cell)| Ok((field.name.clone(), decode_field(field, cell.v)?)))
        .collect()
}

fn decode_field(field: &FieldSchema, value: Value) -> Result<Value, DecodeError> {
    if field.mode.as_deref() == Some("REPEATED") {
        let Value::Array(items) = value else {
            return Err(invalid(field, value));
        };
        return items
            .into_iter()
            .map(|item| match item {
                Value::Object(mut cell) => {
                    decode_scalar(field, cell.remove("v").unwrap_or(Value::Null))
                }
                other => Err(invalid(field, other)),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array);
    }
    decode_scalar(field, value)
}

fn decode_scalar(field: &FieldSchema, value: Value) -> Result<Value, DecodeError> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    match field.field_type.as_str() {
        "RECORD" | "STRUCT" => {
            let cells = match value {
                Value::Object(mut record) => match record.remove("f") {
                    Some(Value::Array(cells)) => cells,
                    _ => return Err(invalid(field, Value::Object(record))),
                },
                other => return Err(invalid(field, other)),
            };
            let cells = cells
                .into_iter()
                .map(|cell| match cell {
                    Value::Object(mut cell) => Cell {
                        v: cell.remove("v").unwrap_or(Value::Null),
                    },
                    other => Cell { v: other },
                })
                .collect();
            decode_record(&field.fields, cells).map(Value::Object)
        }
        // TIMESTAMP is requested as int64 microseconds
        "INTEGER" | "INT64" | "TIMESTAMP" => match &value {
            Value::String(s) => s
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| invalid(field, value.clone())),
            Value::Number(n) if n.is_i64() => Ok(value),
            _ => Err(invalid(field, value)),
        },
        "FLOAT" | "FLOAT64" => match &value {
            Value::String(s) => match s.parse::<f64>() {
                // NaN and infinities have no json representation and stay strings
                Ok(f) => Ok(Number::from_f64(f).map_or_else(|| value.clone(), Value::Number)),
                Err(_) => Err(invalid(field, value.clone())),
            },
            Value::Number(_) => Ok(value),
            _ => Err(invalid(field, value)),
        },
        "BOOLEAN" | "BOOL" => match &value {
            Value::String(s) if s == "true" => Ok(Value::Bool(true)),
            Value::String(s) if s == "false" => Ok(Value::Bool(false)),
            Value::Bool(_) => Ok(value),
            _ => Err(invalid(field, value)),
        },
        _ => Ok(value),
    }
}

fn invalid(field: &FieldSchema, value: Value) -> DecodeError {
    DecodeError::InvalidValue {
        field: field.name.clone(),
        field_type: field.field_type.clone(),
        value,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn response(value: Value) -> QueryResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn decodes_typed_rows() {
        let response = response(json!({
            "jobComplete": true,
            "schema": {"fields": [
                {"name": "mmsi", "type": "STRING", "mode": "NULLABLE"},
                {"name": "speed", "type": "FLOAT", "mode": "NULLABLE"},
                {"name": "moored", "type": "BOOLEAN", "mode": "NULLABLE"},
                {"name": "tags", "type": "STRING", "mode": "REPEATED"},
                {"name": "pos", "type": "RECORD", "mode": "NULLABLE", "fields": [
                    {"name": "lat", "type": "FLOAT"},
                    {"name": "lon", "type": "FLOAT"}
                ]},
                {"name": "__shardsync_cursor", "type": "INTEGER", "mode": "NULLABLE"}
            ]},
            "rows": [
                {"f": [
                    {"v": "211000001"},
                    {"v": "12.5"},
                    {"v": "false"},
                    {"v": [{"v": "a"}, {"v": "b"}]},
                    {"v": {"f": [{"v": "53.5"}, {"v": "9.9"}]}},
                    {"v": "1700000000000001"}
                ]},
                {"f": [
                    {"v": "211000002"},
                    {"v": null},
                    {"v": "true"},
                    {"v": []},
                    {"v": null},
                    {"v": "-5"}
                ]}
            ]
        }));

        let rows = decode_rows(&response.schema.unwrap(), response.rows).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp, MicrosSinceEpoch::new(1_700_000_000_000_001));
        assert_eq!(
            Value::Object(rows[0].fields.clone()),
            json!({
                "mmsi": "211000001",
                "speed": 12.5,
                "moored": false,
                "tags": ["a", "b"],
                "pos": {"lat": 53.5, "lon": 9.9}
            })
        );
        assert_eq!(rows[1].timestamp, MicrosSinceEpoch::new(-5));
        assert_eq!(rows[1].fields["speed"], Value::Null);
    }

    #[test]
    fn rows_without_cursor_are_rejected() {
        let response = response(json!({
            "schema": {"fields": [{"name": "mmsi", "type": "STRING"}]},
            "rows": [{"f": [{"v": "1"}]}]
        }));

        assert!(matches!(
            decode_rows(&response.schema.unwrap(), response.rows),
            Err(DecodeError::MissingCursor(_))
        ));
    }

    #[test]
    fn decodes_count() {
        let response = response(json!({
            "schema": {"fields": [{"name": "row_count", "type": "INTEGER"}]},
            "rows": [{"f": [{"v": "1234"}]}]
        }));

        assert_eq!(
            decode_count(&response.schema.unwrap(), response.rows).unwrap(),
            1234
        );
    }
}
