// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Rendering of [`SourceQuery`]s into GoogleSQL.

use std::fmt::Write;

use shardsync_storage_api::source::{Cursor, SourceQuery};
use shardsync_types::time::MicrosSinceEpoch;

/// Alias of the integer microsecond cursor added to every row query.
pub const CURSOR_ALIAS: &str = "__shardsync_cursor";
/// Alias of the result column of count queries.
pub const COUNT_ALIAS: &str = "row_count";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid identifier '{0}'")]
pub struct InvalidIdentifier(pub String);

/// Quotes a single identifier with backticks.
fn quote(identifier: &str) -> Result<String, InvalidIdentifier> {
    if identifier.is_empty() || identifier.contains(['`', '\\', '\n']) {
        return Err(InvalidIdentifier(identifier.to_owned()));
    }
    Ok(format!("`{identifier}`"))
}

fn micros(ts: MicrosSinceEpoch) -> String {
    format!("TIMESTAMP_MICROS({})", ts.as_i64())
}

fn where_clause(project_id: &str, query: &SourceQuery) -> Result<String, InvalidIdentifier> {
    let ts = quote(&query.timestamp_column)?;
    let cursor = match query.cursor {
        Cursor::After(after) => format!("{ts} > {}", micros(after)),
        Cursor::At(at) => format!("{ts} = {}", micros(at)),
        Cursor::Range { after, up_to } => {
            format!("{ts} > {} AND {ts} <= {}", micros(after), micros(up_to))
        }
    };
    Ok(format!(
        "FROM {} WHERE {} AND {cursor}",
        table_path(project_id, query)?,
        query.partition.sql_condition(&ts)
    ))
}

fn table_path(project_id: &str, query: &SourceQuery) -> Result<String, InvalidIdentifier> {
    for part in [project_id, &query.table.dataset, &query.table.table] {
        quote(part)?;
    }
    Ok(format!(
        "`{project_id}.{}.{}`",
        query.table.dataset, query.table.table
    ))
}

/// `SELECT <columns>, UNIX_MICROS(<ts>) AS __shardsync_cursor FROM ... ORDER BY <ts> ASC LIMIT n`
pub fn select(project_id: &str, query: &SourceQuery) -> Result<String, InvalidIdentifier> {
    let ts = quote(&query.timestamp_column)?;
    let columns = if query.columns.is_empty() {
        "*".to_owned()
    } else {
        query
            .columns
            .iter()
            .map(|column| quote(column))
            .collect::<Result<Vec<_>, _>>()?
            .join(", ")
    };

    let mut sql = format!(
        "SELECT {columns}, UNIX_MICROS({ts}) AS {CURSOR_ALIAS} {} ORDER BY {ts} ASC",
        where_clause(project_id, query)?
    );
    if let Some(limit) = query.limit {
        let _ = write!(sql, " LIMIT {limit}");
    }
    Ok(sql)
}

/// `SELECT COUNT(*) AS row_count FROM ... WHERE ...`, ignoring the limit of the query.
pub fn count(project_id: &str, query: &SourceQuery) -> Result<String, InvalidIdentifier> {
    Ok(format!(
        "SELECT COUNT(*) AS {COUNT_ALIAS} {}",
        where_clause(project_id, query)?
    ))
}

#[cfg(test)]
mod tests {
    use shardsync_storage_api::source::SourceTable;
    use shardsync_types::partitioning::PartitionPredicate;

    use super::*;

    fn query(cursor: Cursor, limit: Option<usize>) -> SourceQuery {
        SourceQuery {
            table: SourceTable::new("maritime", "positions"),
            columns: vec!["mmsi".to_owned(), "speed".to_owned()],
            timestamp_column: "timestamp".to_owned(),
            partition: PartitionPredicate::new(2, 6).expect("valid identity"),
            cursor,
            limit,
        }
    }

    #[test]
    fn renders_poll_query() {
        let sql = select(
            "acme",
            &query(Cursor::After(MicrosSinceEpoch::new(1_700_000_000_000_000)), Some(500)),
        )
        .unwrap();

        assert_eq!(
            sql,
            "SELECT `mmsi`, `speed`, UNIX_MICROS(`timestamp`) AS __shardsync_cursor \
             FROM `acme.maritime.positions` \
             WHERE 6 > 0 AND 2 BETWEEN 0 AND 5 \
             AND MOD(MOD(UNIX_MICROS(`timestamp`), 6) + 6, 6) = 2 \
             AND `timestamp` > TIMESTAMP_MICROS(1700000000000000) \
             ORDER BY `timestamp` ASC LIMIT 500"
        );
    }

    #[test]
    fn boundary_drain_has_no_limit() {
        let sql = select("acme", &query(Cursor::At(MicrosSinceEpoch::new(42)), None)).unwrap();

        assert!(sql.contains("AND `timestamp` = TIMESTAMP_MICROS(42) ORDER BY"));
        assert!(!sql.contains("LIMIT"));
    }

    #[test]
    fn renders_validation_count() {
        let sql = count(
            "acme",
            &query(
                Cursor::Range {
                    after: MicrosSinceEpoch::UNIX_EPOCH,
                    up_to: MicrosSinceEpoch::new(99),
                },
                Some(10),
            ),
        )
        .unwrap();

        assert!(sql.starts_with("SELECT COUNT(*) AS row_count FROM `acme.maritime.positions`"));
        assert!(sql.ends_with(
            "AND `timestamp` > TIMESTAMP_MICROS(0) AND `timestamp` <= TIMESTAMP_MICROS(99)"
        ));
        assert!(!sql.contains("LIMIT"));
    }

    #[test]
    fn rejects_unquotable_identifiers() {
        let mut query = query(Cursor::After(MicrosSinceEpoch::UNIX_EPOCH), None);
        query.columns = vec!["speed` FROM x --".to_owned()];

        assert_eq!(
            select("acme", &query),
            Err(InvalidIdentifier("speed` FROM x --".to_owned()))
        );
    }
}
