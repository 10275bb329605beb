// Stablescope — Warehouse Queries & Typed Rows
//
// A `Query` is SQL text plus named parameters (`@name`), bound by the backend
// and never interpolated. Rows come back as loosely typed `Cell`s; report code
// converts them into typed structs through the fail-fast accessors on `Row`.
//
// `Dialect` supplies the few SQL fragments that differ between BigQuery
// standard SQL and SQLite, so each query template is written once.

use crate::atoms::error::{EngineError, EngineResult};
use std::collections::HashMap;

// ── Dialect ────────────────────────────────────────────────────────────────

/// Timestamps are unix seconds in SQLite and TIMESTAMP in BigQuery; quantities
/// are decimal strings in both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dialect {
    BigQuery { table: String },
    Sqlite,
}

impl Dialect {
    /// Fully qualified transfers table.
    pub fn table(&self) -> String {
        match self {
            Dialect::BigQuery { table } => format!("`{}`", table),
            Dialect::Sqlite => "token_transfers".into(),
        }
    }

    /// Transfer amount in minor units as a summable number.
    pub fn amount(&self, alias: &str) -> String {
        match self {
            Dialect::BigQuery { .. } => format!("CAST({}.quantity AS BIGNUMERIC)", alias),
            Dialect::Sqlite => format!("CAST({}.quantity AS INTEGER)", alias),
        }
    }

    /// Block time as integer unix seconds.
    pub fn unix_seconds(&self, alias: &str) -> String {
        match self {
            Dialect::BigQuery { .. } => format!("UNIX_SECONDS({}.block_timestamp)", alias),
            Dialect::Sqlite => format!("{}.block_timestamp", alias),
        }
    }

    /// Bound unix-seconds parameter as a value comparable with `block_timestamp`.
    pub fn timestamp_param(&self, param: &str) -> String {
        match self {
            Dialect::BigQuery { .. } => format!("TIMESTAMP_SECONDS(@{})", param),
            Dialect::Sqlite => format!("@{}", param),
        }
    }

    /// Calendar day "YYYY-MM-DD" (UTC).
    pub fn day(&self, alias: &str) -> String {
        match self {
            Dialect::BigQuery { .. } => format!("FORMAT_TIMESTAMP('%Y-%m-%d', {}.block_timestamp)", alias),
            Dialect::Sqlite => format!("strftime('%Y-%m-%d', {}.block_timestamp, 'unixepoch')", alias),
        }
    }

    /// Hour bucket as unix seconds.
    pub fn hour(&self, alias: &str) -> String {
        match self {
            Dialect::BigQuery { .. } => format!("UNIX_SECONDS(TIMESTAMP_TRUNC({}.block_timestamp, HOUR))", alias),
            Dialect::Sqlite => format!("(({}.block_timestamp / 3600) * 3600)", alias),
        }
    }

    /// Numeric expression as a float, for ratio math.
    pub fn as_float(&self, expr: &str) -> String {
        match self {
            Dialect::BigQuery { .. } => format!("CAST({} AS FLOAT64)", expr),
            Dialect::Sqlite => format!("CAST({} AS REAL)", expr),
        }
    }
}

// ── Query ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Text(String),
    Int(i64),
    Float(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryParam {
    pub name: String,
    pub value: ParamValue,
}

/// SQL text plus named parameters. `name` identifies the query in logs and errors.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub name: &'static str,
    pub sql: String,
    pub params: Vec<QueryParam>,
}

impl Query {
    pub fn new(name: &'static str, sql: impl Into<String>) -> Self {
        Query { name, sql: sql.into(), params: Vec::new() }
    }

    pub fn text(mut self, name: &str, value: impl Into<String>) -> Self {
        self.params.push(QueryParam { name: name.into(), value: ParamValue::Text(value.into()) });
        self
    }

    pub fn int(mut self, name: &str, value: i64) -> Self {
        self.params.push(QueryParam { name: name.into(), value: ParamValue::Int(value) });
        self
    }

    pub fn float(mut self, name: &str, value: f64) -> Self {
        self.params.push(QueryParam { name: name.into(), value: ParamValue::Float(value) });
        self
    }
}

// ── Rows ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    cells: HashMap<String, Cell>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, cell: Cell) -> Self {
        self.insert(column, cell);
        self
    }

    pub fn insert(&mut self, column: &str, cell: Cell) {
        self.cells.insert(column.to_string(), cell);
    }

    fn cell(&self, column: &str) -> EngineResult<&Cell> {
        self.cells
            .get(column)
            .ok_or_else(|| EngineError::decode(column, "column missing from row"))
    }

    /// Numeric column. Warehouses return big numerics as strings, so numeric text parses too.
    pub fn f64(&self, column: &str) -> EngineResult<f64> {
        match self.cell(column)? {
            Cell::Int(i) => Ok(*i as f64),
            Cell::Float(f) => Ok(*f),
            Cell::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| EngineError::decode(column, format!("expected number, got '{}'", s))),
            Cell::Null => Err(EngineError::decode(column, "unexpected null")),
        }
    }

    /// Numeric column where null means zero (SUM over no rows).
    pub fn f64_or_zero(&self, column: &str) -> EngineResult<f64> {
        match self.cell(column)? {
            Cell::Null => Ok(0.0),
            _ => self.f64(column),
        }
    }

    pub fn i64(&self, column: &str) -> EngineResult<i64> {
        match self.cell(column)? {
            Cell::Int(i) => Ok(*i),
            Cell::Float(f) if f.fract() == 0.0 => Ok(*f as i64),
            Cell::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| EngineError::decode(column, format!("expected integer, got '{}'", s))),
            Cell::Null => Err(EngineError::decode(column, "unexpected null")),
            other => Err(EngineError::decode(column, format!("expected integer, got {:?}", other))),
        }
    }

    pub fn i64_or_zero(&self, column: &str) -> EngineResult<i64> {
        match self.cell(column)? {
            Cell::Null => Ok(0),
            _ => self.i64(column),
        }
    }

    pub fn opt_i64(&self, column: &str) -> EngineResult<Option<i64>> {
        match self.cell(column)? {
            Cell::Null => Ok(None),
            _ => self.i64(column).map(Some),
        }
    }

    pub fn text(&self, column: &str) -> EngineResult<String> {
        match self.cell(column)? {
            Cell::Text(s) => Ok(s.clone()),
            Cell::Int(i) => Ok(i.to_string()),
            Cell::Float(f) => Ok(f.to_string()),
            Cell::Null => Err(EngineError::decode(column, "unexpected null")),
        }
    }
}

/// Decode every row, failing on the first malformed one with the query name attached.
pub fn decode_rows<T>(query: &str, rows: &[Row], decode: impl Fn(&Row) -> EngineResult<T>) -> EngineResult<Vec<T>> {
    rows.iter()
        .map(|r| {
            decode(r).map_err(|e| match e {
                EngineError::Decode { context, message } => {
                    EngineError::decode(format!("{}.{}", query, context), message)
                }
                other => other,
            })
        })
        .collect()
}

/// Decode exactly one row (aggregate queries).
pub fn decode_single<T>(query: &str, rows: &[Row], decode: impl Fn(&Row) -> EngineResult<T>) -> EngineResult<T> {
    let first = rows
        .first()
        .ok_or_else(|| EngineError::decode(query, "expected one row, got none"))?;
    decode_rows(query, std::slice::from_ref(first), decode)?
        .pop()
        .ok_or_else(|| EngineError::decode(query, "expected one row, got none"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_text_parses() {
        let row = Row::new().with("balance", Cell::Text("12500000".into())).with("n", Cell::Int(3));
        assert_eq!(row.f64("balance").unwrap(), 12_500_000.0);
        assert_eq!(row.i64("n").unwrap(), 3);
        assert_eq!(row.f64("n").unwrap(), 3.0);
    }

    #[test]
    fn null_and_missing_fail_fast() {
        let row = Row::new().with("total", Cell::Null);
        assert!(row.f64("total").is_err());
        assert_eq!(row.f64_or_zero("total").unwrap(), 0.0);
        assert_eq!(row.opt_i64("total").unwrap(), None);
        assert!(matches!(row.f64("nope"), Err(EngineError::Decode { .. })));
    }

    #[test]
    fn decode_error_names_query() {
        let rows = vec![Row::new().with("x", Cell::Text("abc".into()))];
        let err = decode_rows("top_holders", &rows, |r| r.f64("x")).unwrap_err();
        assert!(err.to_string().contains("top_holders.x"));
        assert!(decode_single("empty", &[], |r| r.f64("x")).is_err());
    }

    #[test]
    fn dialect_fragments() {
        let bq = Dialect::BigQuery { table: "p.d.t".into() };
        assert_eq!(bq.table(), "`p.d.t`");
        assert_eq!(bq.timestamp_param("since"), "TIMESTAMP_SECONDS(@since)");
        assert_eq!(Dialect::Sqlite.timestamp_param("since"), "@since");
        assert_eq!(Dialect::Sqlite.amount("t"), "CAST(t.quantity AS INTEGER)");
    }

    #[test]
    fn query_builder_collects_params() {
        let q = Query::new("q", "SELECT 1").text("token", "0xabc").int("limit", 5);
        assert_eq!(q.params.len(), 2);
        assert_eq!(q.params[1].value, ParamValue::Int(5));
    }
}
