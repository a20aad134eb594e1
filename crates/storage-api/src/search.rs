// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Filter, order and limit of sink searches. Sink implementations may narrow the scanned
//! records with [`SearchQuery::timestamp_bounds`], but they answer through
//! [`SearchQuery::evaluate`] (or an equivalent ordered scan), so all of them answer a query
//! identically.
//!
//! Results are ordered by the `order_by` field, ties broken by timestamp and then id. Without
//! `order_by` records come in timestamp order. `Desc` reverses the complete order.

use std::cmp::Ordering;

use serde_json::Value;

use shardsync_types::time::MicrosSinceEpoch;

use crate::SinkRecord;

/// Name under which the record timestamp can be used in conditions and ordering.
pub const TIMESTAMP_FIELD: &str = "timestamp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: Operator,
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn matches(&self, record: &SinkRecord) -> bool {
        let Some(actual) = field_value(record, &self.field) else {
            return false;
        };
        let Some(ordering) = compare_values(&actual, &self.value) else {
            return false;
        };
        match self.op {
            Operator::Eq => ordering == Ordering::Equal,
            Operator::Gt => ordering == Ordering::Greater,
            Operator::Gte => ordering != Ordering::Less,
            Operator::Lt => ordering == Ordering::Less,
            Operator::Lte => ordering != Ordering::Greater,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub direction: Direction,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<OrderBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl SearchQuery {
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Records with a timestamp in `(after, up_to]`.
    pub fn time_range(after: MicrosSinceEpoch, up_to: MicrosSinceEpoch) -> Self {
        Self::default()
            .with_condition(Condition::new(TIMESTAMP_FIELD, Operator::Gt, after.as_i64()))
            .with_condition(Condition::new(TIMESTAMP_FIELD, Operator::Lte, up_to.as_i64()))
    }

    pub fn matches(&self, record: &SinkRecord) -> bool {
        self.conditions.iter().all(|c| c.matches(record))
    }

    /// Inclusive timestamp range every matching record lies in, derived from the integer
    /// conditions on [`TIMESTAMP_FIELD`]. Other conditions do not narrow it.
    pub fn timestamp_bounds(&self) -> (MicrosSinceEpoch, MicrosSinceEpoch) {
        let mut lower = MicrosSinceEpoch::MIN.as_i64();
        let mut upper = MicrosSinceEpoch::MAX.as_i64();
        for condition in &self.conditions {
            if condition.field != TIMESTAMP_FIELD {
                continue;
            }
            let Some(value) = condition.value.as_i64() else {
                continue;
            };
            match condition.op {
                Operator::Eq => {
                    lower = lower.max(value);
                    upper = upper.min(value);
                }
                Operator::Gt => lower = lower.max(value.saturating_add(1)),
                Operator::Gte => lower = lower.max(value),
                Operator::Lt => upper = upper.min(value.saturating_sub(1)),
                Operator::Lte => upper = upper.min(value),
            }
        }
        (MicrosSinceEpoch::new(lower), MicrosSinceEpoch::new(upper))
    }

    /// Filters, orders and limits the given records.
    pub fn evaluate(&self, records: impl IntoIterator<Item = SinkRecord>) -> Vec<SinkRecord> {
        let mut matching: Vec<_> = records.into_iter().filter(|r| self.matches(r)).collect();
        matching.sort_by(|a, b| self.compare(a, b));

        if let Some(limit) = self.limit {
            matching.truncate(limit);
        }
        matching
    }

    fn compare(&self, a: &SinkRecord, b: &SinkRecord) -> Ordering {
        let by_field = match &self.order_by {
            Some(order_by) => match (
                field_value(a, &order_by.field),
                field_value(b, &order_by.field),
            ) {
                (Some(a), Some(b)) => compare_values(&a, &b).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
            None => Ordering::Equal,
        };
        let ordering = by_field
            .then_with(|| a.timestamp.cmp(&b.timestamp))
            .then_with(|| a.id.cmp(&b.id));
        match self.order_by.as_ref().map(|order_by| order_by.direction) {
            Some(Direction::Desc) => ordering.reverse(),
            _ => ordering,
        }
    }
}

fn field_value(record: &SinkRecord, field: &str) -> Option<Value> {
    match field {
        TIMESTAMP_FIELD => Some(Value::from(record.timestamp.as_i64())),
        "id" => Some(Value::from(record.id.as_str())),
        other => record.fields.get(other).cloned(),
    }
}

// Numbers compare numerically, strings lexicographically. Mixed types are incomparable.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
                Some(a.cmp(&b))
            } else {
                a.as_f64()?.partial_cmp(&b.as_f64()?)
            }
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(id: &str, ts: i64, speed: f64, flag: &str) -> SinkRecord {
        let Value::Object(fields) = json!({"speed": speed, "flag": flag}) else {
            unreachable!()
        };
        SinkRecord {
            id: id.to_owned(),
            timestamp: MicrosSinceEpoch::new(ts),
            fields,
        }
    }

    fn records() -> Vec<SinkRecord> {
        vec![
            record("a", 10, 12.5, "NL"),
            record("b", 20, 3.0, "DE"),
            record("c", 30, 18.0, "NL"),
            record("d", 40, 7.5, "NL"),
        ]
    }

    fn ids(records: &[SinkRecord]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn filters_orders_and_limits() {
        let query = SearchQuery::default()
            .with_condition(Condition::new("flag", Operator::Eq, "NL"))
            .with_condition(Condition::new("speed", Operator::Gte, 7.5))
            .order_by("speed", Direction::Desc)
            .limit(2);

        assert_eq!(ids(&query.evaluate(records())), vec!["c", "a"]);
    }

    #[test]
    fn time_range_excludes_lower_bound() {
        let query = SearchQuery::time_range(MicrosSinceEpoch::new(10), MicrosSinceEpoch::new(30));
        assert_eq!(ids(&query.evaluate(records())), vec!["b", "c"]);
    }

    #[test]
    fn timestamp_bounds_intersect_timestamp_conditions() {
        let query = SearchQuery::time_range(MicrosSinceEpoch::new(10), MicrosSinceEpoch::new(30))
            .with_condition(Condition::new(TIMESTAMP_FIELD, Operator::Lt, 25))
            .with_condition(Condition::new("speed", Operator::Gt, 3));
        assert_eq!(
            query.timestamp_bounds(),
            (MicrosSinceEpoch::new(11), MicrosSinceEpoch::new(24))
        );

        assert_eq!(
            SearchQuery::default().timestamp_bounds(),
            (MicrosSinceEpoch::MIN, MicrosSinceEpoch::MAX)
        );
    }

    #[test]
    fn ties_are_ordered_by_timestamp_then_id() {
        let records = vec![
            record("b", 10, 5.0, "NL"),
            record("a", 10, 5.0, "NL"),
            record("c", 5, 5.0, "NL"),
        ];

        let query = SearchQuery::default().order_by("speed", Direction::Asc);
        assert_eq!(ids(&query.evaluate(records.clone())), vec!["c", "a", "b"]);

        let query = SearchQuery::default().order_by("speed", Direction::Desc);
        assert_eq!(ids(&query.evaluate(records.clone())), vec!["b", "a", "c"]);

        assert_eq!(ids(&SearchQuery::default().evaluate(records)), vec!["c", "a", "b"]);
    }

    #[test]
    fn missing_fields_and_mixed_types_never_match() {
        let query =
            SearchQuery::default().with_condition(Condition::new("course", Operator::Lt, 5));
        assert!(query.evaluate(records()).is_empty());

        let query = SearchQuery::default().with_condition(Condition::new("flag", Operator::Gt, 5));
        assert!(query.evaluate(records()).is_empty());
    }

    #[test]
    fn decodes_request_bodies() {
        let query: SearchQuery = serde_json::from_value(json!({
            "conditions": [{"field": "flag", "op": "eq", "value": "DE"}],
            "orderBy": {"field": "timestamp", "direction": "desc"},
            "limit": 10
        }))
        .unwrap();

        assert_eq!(ids(&query.evaluate(records())), vec!["b"]);
    }
}
