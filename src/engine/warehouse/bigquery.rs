// Stablescope — BigQuery Backend
//
// Runs queries synchronously through `jobs.query` with named parameters and
// follows `getQueryResults` page tokens until every row is in. Auth is a
// plain OAuth2 bearer token supplied by configuration.

use crate::config::WarehouseConfig;
use crate::engine::http::{send_with_retry, CircuitBreaker, RetryPolicy};
use async_trait::async_trait;
use log::{debug, info};
use reqwest::Client;
use serde_json::{json, Value};
use stablescope_core::atoms::traits::Warehouse;
use stablescope_core::rows::{Cell, Dialect, ParamValue, Query, Row};
use stablescope_core::{EngineError, EngineResult};
use std::time::{Duration, Instant};

const API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";
const LABEL: &str = "bigquery";
/// Safety stop for runaway pagination.
const MAX_PAGES: usize = 50;

pub struct BigQueryWarehouse {
    client: Client,
    project_id: String,
    table: String,
    access_token: String,
    location: Option<String>,
    timeout: Duration,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl BigQueryWarehouse {
    pub fn new(config: &WarehouseConfig) -> EngineResult<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            // Server-side timeoutMs bounds the job; this bounds the socket.
            .timeout(timeout + Duration::from_secs(10))
            .build()?;
        Ok(BigQueryWarehouse {
            client,
            project_id: config.project_id.clone(),
            table: config.table.clone(),
            access_token: config.access_token.clone(),
            location: config.location.clone(),
            timeout,
            retry: RetryPolicy::default(),
            breaker: CircuitBreaker::new(LABEL, 5, Duration::from_secs(60)),
        })
    }

    fn queries_url(&self) -> String {
        format!("{}/projects/{}/queries", API_BASE, self.project_id)
    }

    fn ensure_configured(&self, query: &Query) -> EngineResult<()> {
        if self.project_id.is_empty() {
            return Err(EngineError::warehouse(query.name, "warehouse.project_id is not set"));
        }
        if self.access_token.is_empty() {
            return Err(EngineError::warehouse(query.name, "no BigQuery access token configured"));
        }
        Ok(())
    }

    async fn fetch_page(&self, query: &Query, job_id: &str, page_token: &str) -> EngineResult<Value> {
        let url = format!("{}/{}", self.queries_url(), job_id);
        let mut params: Vec<(&str, String)> = vec![
            ("pageToken", page_token.to_string()),
            ("timeoutMs", self.timeout.as_millis().to_string()),
        ];
        if let Some(loc) = &self.location {
            params.push(("location", loc.clone()));
        }
        let resp = send_with_retry(LABEL, &self.retry, &self.breaker, || {
            self.client.get(&url).bearer_auth(&self.access_token).query(&params)
        })
        .await
        .map_err(|e| EngineError::warehouse(query.name, e.to_string()))?;
        resp.json()
            .await
            .map_err(|e| EngineError::warehouse(query.name, format!("invalid response: {}", e.without_url())))
    }
}

/// `jobs.query` request body with named parameters.
pub(crate) fn request_body(query: &Query, timeout: Duration, location: Option<&str>) -> Value {
    let params: Vec<Value> = query
        .params
        .iter()
        .map(|p| {
            let (kind, value) = match &p.value {
                ParamValue::Text(s) => ("STRING", s.clone()),
                ParamValue::Int(i) => ("INT64", i.to_string()),
                ParamValue::Float(f) => ("FLOAT64", f.to_string()),
            };
            json!({
                "name": p.name,
                "parameterType": { "type": kind },
                "parameterValue": { "value": value },
            })
        })
        .collect();

    let mut body = json!({
        "query": query.sql,
        "useLegacySql": false,
        "parameterMode": "NAMED",
        "queryParameters": params,
        "timeoutMs": timeout.as_millis() as u64,
    });
    if let Some(loc) = location {
        body["location"] = json!(loc);
    }
    body
}

fn to_cell(field_type: &str, value: &Value) -> Cell {
    let Some(text) = value.as_str() else {
        return Cell::Null;
    };
    match field_type {
        "INTEGER" | "INT64" => text.parse().map(Cell::Int).unwrap_or_else(|_| Cell::Text(text.into())),
        // TIMESTAMP arrives as fractional epoch seconds.
        "FLOAT" | "FLOAT64" | "TIMESTAMP" => {
            text.parse().map(Cell::Float).unwrap_or_else(|_| Cell::Text(text.into()))
        }
        "BOOLEAN" | "BOOL" => Cell::Int(i64::from(text == "true")),
        // NUMERIC/BIGNUMERIC stay textual to keep full precision until decode.
        _ => Cell::Text(text.into()),
    }
}

/// Column names and types from a response schema.
pub(crate) fn parse_schema(query: &str, response: &Value) -> EngineResult<Vec<(String, String)>> {
    let fields = response
        .pointer("/schema/fields")
        .and_then(|f| f.as_array())
        .ok_or_else(|| EngineError::warehouse(query, "response has no schema"))?;
    Ok(fields
        .iter()
        .map(|f| {
            (
                f.get("name").and_then(|n| n.as_str()).unwrap_or_default().to_string(),
                f.get("type").and_then(|t| t.as_str()).unwrap_or("STRING").to_string(),
            )
        })
        .collect())
}

/// Convert the `rows[].f[].v` layout into named rows.
pub(crate) fn parse_rows(query: &str, schema: &[(String, String)], response: &Value) -> EngineResult<Vec<Row>> {
    let Some(rows) = response.get("rows").and_then(|r| r.as_array()) else {
        return Ok(Vec::new());
    };
    rows.iter()
        .map(|raw| {
            let cells = raw
                .get("f")
                .and_then(|f| f.as_array())
                .ok_or_else(|| EngineError::warehouse(query, "row without cells"))?;
            if cells.len() != schema.len() {
                return Err(EngineError::warehouse(
                    query,
                    format!("row has {} cells, schema has {}", cells.len(), schema.len()),
                ));
            }
            let mut row = Row::new();
            for ((name, kind), cell) in schema.iter().zip(cells) {
                row.insert(name, to_cell(kind, cell.get("v").unwrap_or(&Value::Null)));
            }
            Ok(row)
        })
        .collect()
}

fn job_complete(query: &str, response: &Value) -> EngineResult<()> {
    if response.get("jobComplete").and_then(|c| c.as_bool()) == Some(false) {
        return Err(EngineError::Timeout(format!("{}: BigQuery job did not complete in time", query)));
    }
    Ok(())
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    fn dialect(&self) -> Dialect {
        Dialect::BigQuery { table: self.table.clone() }
    }

    async fn query(&self, query: &Query) -> EngineResult<Vec<Row>> {
        self.ensure_configured(query)?;
        let started = Instant::now();
        let body = request_body(query, self.timeout, self.location.as_deref());
        let url = self.queries_url();

        let resp = send_with_retry(LABEL, &self.retry, &self.breaker, || {
            self.client.post(&url).bearer_auth(&self.access_token).json(&body)
        })
        .await
        .map_err(|e| EngineError::warehouse(query.name, e.to_string()))?;
        let first: Value = resp
            .json()
            .await
            .map_err(|e| EngineError::warehouse(query.name, format!("invalid response: {}", e.without_url())))?;

        job_complete(query.name, &first)?;
        let schema = parse_schema(query.name, &first)?;
        let mut rows = parse_rows(query.name, &schema, &first)?;

        let job_id = first.pointer("/jobReference/jobId").and_then(|j| j.as_str()).map(String::from);
        let mut page_token = first.get("pageToken").and_then(|t| t.as_str()).map(String::from);
        let mut pages = 1;
        while let (Some(token), Some(job)) = (page_token.take(), job_id.as_deref()) {
            if pages >= MAX_PAGES {
                return Err(EngineError::warehouse(query.name, format!("result exceeds {} pages", MAX_PAGES)));
            }
            let page = self.fetch_page(query, job, &token).await?;
            job_complete(query.name, &page)?;
            rows.extend(parse_rows(query.name, &schema, &page)?);
            page_token = page.get("pageToken").and_then(|t| t.as_str()).map(String::from);
            pages += 1;
            debug!("[warehouse] {} fetched page {}", query.name, pages);
        }

        info!(
            "[warehouse] {} returned {} rows in {}ms",
            query.name,
            rows.len(),
            started.elapsed().as_millis()
        );
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_carries_named_params() {
        let q = Query::new("q", "SELECT 1 WHERE x = @token")
            .text("token", "0xabc")
            .int("limit", 10)
            .float("tolerance", 0.1);
        let body = request_body(&q, Duration::from_secs(30), Some("US"));
        assert_eq!(body["useLegacySql"], json!(false));
        assert_eq!(body["parameterMode"], "NAMED");
        assert_eq!(body["timeoutMs"], 30_000);
        assert_eq!(body["location"], "US");
        let params = body["queryParameters"].as_array().unwrap();
        assert_eq!(params[0]["parameterType"]["type"], "STRING");
        assert_eq!(params[1]["parameterType"]["type"], "INT64");
        assert_eq!(params[1]["parameterValue"]["value"], "10");
        assert_eq!(params[2]["parameterType"]["type"], "FLOAT64");
    }

    #[test]
    fn rows_follow_schema_types() {
        let response = json!({
            "jobComplete": true,
            "schema": { "fields": [
                { "name": "address", "type": "STRING" },
                { "name": "balance", "type": "BIGNUMERIC" },
                { "name": "txs", "type": "INTEGER" },
                { "name": "ratio", "type": "FLOAT" },
                { "name": "first_seen", "type": "INTEGER" }
            ]},
            "rows": [
                { "f": [ {"v": "0xabc"}, {"v": "123456789012345678901234"}, {"v": "7"}, {"v": "0.25"}, {"v": null} ] }
            ]
        });
        let schema = parse_schema("q", &response).unwrap();
        let rows = parse_rows("q", &schema, &response).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text("address").unwrap(), "0xabc");
        assert_eq!(rows[0].text("balance").unwrap(), "123456789012345678901234");
        assert_eq!(rows[0].i64("txs").unwrap(), 7);
        assert_eq!(rows[0].f64("ratio").unwrap(), 0.25);
        assert_eq!(rows[0].opt_i64("first_seen").unwrap(), None);
    }

    #[test]
    fn empty_result_has_no_rows_key() {
        let response = json!({ "jobComplete": true, "schema": { "fields": [ { "name": "x", "type": "STRING" } ] } });
        let schema = parse_schema("q", &response).unwrap();
        assert!(parse_rows("q", &schema, &response).unwrap().is_empty());
    }

    #[test]
    fn incomplete_job_is_timeout() {
        let err = job_complete("q", &json!({ "jobComplete": false })).unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_network() {
        let wh = BigQueryWarehouse::new(&WarehouseConfig::default()).unwrap();
        let err = wh.query(&Query::new("probe", "SELECT 1")).await.unwrap_err();
        assert!(err.to_string().contains("project_id"));
    }
}
