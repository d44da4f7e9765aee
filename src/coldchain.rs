// src/coldchain.rs

use crate::config::{ColdchainSection, ProvinceCode, QuerySpec};
use crate::error::{Error, Result};
use crate::frame::{Fields, Frame, Schema};
use crate::response_store::ResponseStore;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use time::{Date, Month};
use tracing::{debug, info, warn};

const PROVINCE_CODE_FIELD: &str = "_hospital_province_code_";
const FILTER_FIELD_POINTER: &str =
    "/filterDefinition/filterExpression/queryTimeTransformation/dataTransformation/sourceFieldName";

/// Sends one batched request and returns the raw response text.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    async fn post(&self, query: &str, body: &Value) -> Result<String>;
}

pub struct HttpBackend {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpBackend {
    pub fn new(url: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

#[async_trait]
impl QueryBackend for HttpBackend {
    async fn post(&self, query: &str, body: &Value) -> Result<String> {
        let to_error = |e: reqwest::Error| {
            if e.is_timeout() {
                Error::TransportTimeout {
                    query: query.to_string(),
                }
            } else {
                Error::Http(e)
            }
        };
        let resp = self
            .client
            .post(&self.url)
            .json(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(to_error)?;
        let resp = resp.error_for_status()?;
        resp.text().await.map_err(to_error)
    }
}

/// Coldchain rows are keyed by day, and by province and vaccine when the
/// query breaks them out.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ColdchainKey {
    pub date: Date,
    pub province: Option<String>,
    pub vaccine: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Date(Date),
    Number(f64),
    Text(String),
}

/// Put the nulls the backend left out back at their indices.
pub fn restore_nulls<T>(values: Vec<T>, null_index: &[usize]) -> Vec<Option<T>> {
    let mut out: Vec<Option<T>> = values.into_iter().map(Some).collect();
    for &i in null_index {
        out.insert(i.min(out.len()), None);
    }
    out
}

/// "20210601", "2021060112" or "2021-06-01".
fn parse_date(raw: &str) -> Option<Date> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).take(8).collect();
    if digits.len() < 8 {
        return None;
    }
    let year: i32 = digits[..4].parse().ok()?;
    let month: u8 = digits[4..6].parse().ok()?;
    let day: u8 = digits[6..8].parse().ok()?;
    Date::from_calendar_date(year, Month::try_from(month).ok()?, day).ok()
}

fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// One typed response column with its nulls restored.
fn parse_column(column: &Value) -> Result<Vec<Option<Cell>>> {
    let null_index: Vec<usize> = column
        .get("nullIndex")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_u64).map(|i| i as usize).collect())
        .unwrap_or_default();

    let typed = column
        .as_object()
        .and_then(|o| o.iter().find(|(k, _)| k.ends_with("Column")));
    let Some((kind, body)) = typed else {
        return Ok(restore_nulls(Vec::new(), &null_index));
    };
    let raw = body
        .get("values")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let cells = raw
        .iter()
        .map(|v| {
            let cell = match kind.as_str() {
                "dateColumn" | "datetimeColumn" => v.as_str().and_then(parse_date).map(Cell::Date),
                "longColumn" | "doubleColumn" => parse_number(v).map(Cell::Number),
                "stringColumn" => v.as_str().map(|s| Cell::Text(s.to_string())),
                _ => None,
            };
            cell.ok_or_else(|| Error::MalformedResponse(format!("{kind} value {v}")))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(restore_nulls(cells, &null_index))
}

/// Frame column for a source field.
fn field_name<'a>(source: &'a str, spec: &'a QuerySpec) -> &'a str {
    if let Some(q) = &spec.quantity_column {
        if q.source == source {
            return &q.target;
        }
    }
    match source {
        "_vaccinated_on_" => "Date",
        "_manuf_name_" | "_vaccine_name_" => "Vaccine",
        "datastudio_record_count_system_field_id_98323387" => "Vac Given",
        other => other,
    }
}

fn short_vaccine(name: &str) -> String {
    if name.contains("Sinovac") {
        "Sinovac".to_string()
    } else if name.to_lowercase().contains("astrazeneca") {
        "AstraZeneca".to_string()
    } else {
        name.to_string()
    }
}

/// Point every province-code filter of a request spec at `code`.
pub fn set_province_filter(spec: &mut Value, code: &str) {
    let Some(filters) = spec
        .pointer_mut("/datasetSpec/filters")
        .and_then(Value::as_array_mut)
    else {
        return;
    };
    for filter in filters {
        let matches = filter
            .pointer(FILTER_FIELD_POINTER)
            .and_then(Value::as_str)
            == Some(PROVINCE_CODE_FIELD);
        if !matches {
            continue;
        }
        if let Some(expr) = filter
            .pointer_mut("/filterDefinition/filterExpression")
            .and_then(Value::as_object_mut)
        {
            expr.insert("stringValues".into(), json!([code]));
        }
    }
}

/// The JSON payload is the third line of the response.
fn response_payload(raw: &str) -> Result<&str> {
    raw.lines()
        .nth(2)
        .ok_or_else(|| Error::MalformedResponse("fewer than three lines".into()))
}

/// A payload in which any part carries an `errorStatus` is unusable.
fn check_status(query: &str, payload: &Value) -> Result<()> {
    let status = payload
        .get("dataResponse")
        .and_then(Value::as_array)
        .and_then(|parts| parts.iter().find_map(|r| r.get("errorStatus")));
    match status {
        None => Ok(()),
        Some(s) => Err(Error::BackendStatus {
            query: query.to_string(),
            reason: s
                .get("reasonStr")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
        }),
    }
}

pub struct ColdchainAdapter<B: QueryBackend> {
    backend: B,
    store: ResponseStore,
    requests_dir: PathBuf,
    provinces: Vec<ProvinceCode>,
    schema: Schema,
}

impl ColdchainAdapter<HttpBackend> {
    pub fn from_config(section: &ColdchainSection, provinces: Vec<ProvinceCode>) -> Result<Self> {
        let backend = HttpBackend::new(&section.url, section.timeout_secs);
        let store = ResponseStore::new(&section.cache_path)?;
        Ok(Self::new(backend, store, section.requests_dir.clone(), provinces))
    }
}

impl<B: QueryBackend> ColdchainAdapter<B> {
    pub fn new(
        backend: B,
        store: ResponseStore,
        requests_dir: PathBuf,
        provinces: Vec<ProvinceCode>,
    ) -> Self {
        Self {
            backend,
            store,
            requests_dir,
            provinces,
            schema: Schema::coldchain(),
        }
    }

    fn cached(&self, query: &str) -> Result<String> {
        let cached = self
            .store
            .load(query)?
            .ok_or_else(|| Error::CacheMiss(query.to_string()))?;
        info!(query, fetched_at = %cached.fetched_at, "Using cached response");
        Ok(cached.body)
    }

    /// Fresh payload for a query, or the cached one when the backend fails.
    async fn payload(&self, query: &str, request: &Value) -> Result<Value> {
        let fresh = match self.backend.post(query, request).await {
            Ok(raw) => Some(response_payload(&raw)?.to_string()),
            Err(Error::TransportTimeout { .. }) => {
                info!(query, "Timeout, falling back to cached response");
                None
            }
            Err(e) => return Err(e),
        };

        if let Some(body) = fresh {
            let payload: Value = serde_json::from_str(&body)?;
            match check_status(query, &payload) {
                Err(e) => warn!(error = %e, "Falling back to cached response"),
                Ok(()) => {
                    self.store.store(query, &body)?;
                    return Ok(payload);
                }
            }
        }
        Ok(serde_json::from_str(&self.cached(query)?)?)
    }

    /// Run one stored query and return its rows, summed per key.
    pub async fn fetch(&self, spec: &QuerySpec, today: Date) -> Result<BTreeMap<ColdchainKey, Fields>> {
        let path = self.requests_dir.join(&spec.file);
        let template: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        let specs = template
            .get("dataRequest")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| Error::MalformedResponse(format!("{} has no dataRequest", spec.file)))?;

        let provinces: Vec<Option<&ProvinceCode>> = if spec.by_province {
            self.provinces.iter().map(Some).collect()
        } else {
            vec![None]
        };

        let mut request = template.clone();
        let mut batch = Vec::new();
        let mut order = Vec::new();
        for province in &provinces {
            for query_spec in &specs {
                let mut query_spec = query_spec.clone();
                if let Some(p) = province {
                    set_province_filter(&mut query_spec, &p.code);
                }
                order.push((*province, query_spec.clone()));
                batch.push(query_spec);
            }
        }
        request["dataRequest"] = Value::Array(batch);

        let payload = self.payload(&spec.file, &request).await?;
        let responses: Vec<&Value> = payload
            .get("dataResponse")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter(|r| r.get("errorStatus").is_none()).collect())
            .unwrap_or_default();

        let mut rows: BTreeMap<ColdchainKey, Fields> = BTreeMap::new();
        for ((province, query_spec), response) in order.iter().zip(responses) {
            let fields: Vec<&str> = query_spec
                .pointer("/datasetSpec/queryFields")
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(|f| f.pointer("/dataTransformation/sourceFieldName"))
                        .filter_map(Value::as_str)
                        .collect()
                })
                .unwrap_or_default();

            let subsets = response
                .get("dataSubset")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            for subset in subsets {
                let columns = subset
                    .pointer("/dataset/tableDataset/column")
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let parsed = fields
                    .iter()
                    .zip(columns)
                    .map(|(source, column)| Ok((field_name(source, spec), parse_column(column)?)))
                    .collect::<Result<Vec<_>>>()?;
                self.add_rows(&mut rows, &parsed, province.map(|p| p.name.clone()), today);
            }
        }
        info!(query = %spec.file, rows = rows.len(), "Coldchain query folded");
        Ok(rows)
    }

    fn add_rows(
        &self,
        rows: &mut BTreeMap<ColdchainKey, Fields>,
        columns: &[(&str, Vec<Option<Cell>>)],
        province: Option<String>,
        today: Date,
    ) {
        let len = columns.iter().map(|(_, v)| v.len()).max().unwrap_or(0);
        for i in 0..len {
            let mut date = None;
            let mut vaccine = None;
            let mut values = Vec::new();
            for (name, cells) in columns {
                match cells.get(i).cloned().flatten() {
                    Some(Cell::Date(d)) => date = date.or(Some(d)),
                    Some(Cell::Text(t)) if *name == "Vaccine" => vaccine = Some(short_vaccine(&t)),
                    Some(Cell::Number(n)) if self.schema.contains(name) => values.push((*name, Some(n))),
                    None if self.schema.contains(name) => values.push((*name, None)),
                    _ => {}
                }
            }
            let key = ColdchainKey {
                date: date.unwrap_or(today),
                province: province.clone(),
                vaccine,
            };
            let fields = rows.entry(key).or_default();
            for (name, value) in values {
                let slot = fields.entry(name.to_string()).or_insert(None);
                if let Some(v) = value {
                    *slot = Some(slot.unwrap_or(0.0) + v);
                }
            }
        }
    }

    /// Run every configured query and fold the rows into one frame. A query
    /// that fails is logged and left out.
    pub async fn run(&self, specs: &[QuerySpec], today: Date) -> Frame<ColdchainKey> {
        let mut frame = Frame::new(Schema::coldchain());
        for spec in specs {
            let rows = match self.fetch(spec, today).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(query = %spec.file, error = %e, "Coldchain query skipped");
                    continue;
                }
            };
            for (key, fields) in rows {
                if let Err(e) = frame.merge_row(key, &fields) {
                    warn!(query = %spec.file, error = %e, "Coldchain row rejected");
                }
            }
        }
        debug!(rows = frame.len(), "Coldchain frame");
        frame
    }
}
