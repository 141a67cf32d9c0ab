//! Canonical-source adapters and record cleaning.
//!
//! Sources hand back loosely-typed rows; `clean_record` turns one row into a
//! `SourceRecord` or skips it, and `dedupe_latest` collapses repeated
//! identifiers before the delta is computed.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use tracing::{info, warn};

use waitwatch_common::{AddressParts, CanonicalEntity};

/// One row as the registry published it: field name → raw text.
pub type RawRecord = BTreeMap<String, String>;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Failed to read source file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Source request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected source format: {0}")]
    Format(String),
}

/// External collaborator producing raw canonical records.
#[async_trait]
pub trait CanonicalSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<RawRecord>, SourceError>;
    fn describe(&self) -> String;
}

// ---------------------------------------------------------------------------
// CsvFileSource
// ---------------------------------------------------------------------------

/// Registry export on disk, one header row then one row per facility.
pub struct CsvFileSource {
    path: PathBuf,
}

impl CsvFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CanonicalSource for CsvFileSource {
    async fn fetch(&self) -> Result<Vec<RawRecord>, SourceError> {
        let bytes = tokio::fs::read(&self.path).await?;
        let records = parse_csv(&bytes)?;
        info!(path = %self.path.display(), rows = records.len(), "Read canonical CSV");
        Ok(records)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

fn parse_csv(bytes: &[u8]) -> Result<Vec<RawRecord>, SourceError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);
    reader.headers()?;

    let mut records = Vec::new();
    for (index, row) in reader.deserialize::<RawRecord>().enumerate() {
        match row {
            Ok(record) => records.push(record),
            Err(e) => warn!(row = index + 1, error = %e, "Skipping malformed CSV row"),
        }
    }
    Ok(records)
}

// ---------------------------------------------------------------------------
// HttpJsonSource
// ---------------------------------------------------------------------------

/// Registry API returning a JSON array of objects, either bare or under
/// `results` / `data`.
pub struct HttpJsonSource {
    client: reqwest::Client,
    url: String,
}

impl HttpJsonSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl CanonicalSource for HttpJsonSource {
    async fn fetch(&self) -> Result<Vec<RawRecord>, SourceError> {
        let body: Value = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let records = records_from_json(body)?;
        info!(url = self.url.as_str(), rows = records.len(), "Fetched canonical records");
        Ok(records)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

fn records_from_json(body: Value) -> Result<Vec<RawRecord>, SourceError> {
    let rows = match body {
        Value::Array(rows) => rows,
        Value::Object(mut obj) => match obj.remove("results").or_else(|| obj.remove("data")) {
            Some(Value::Array(rows)) => rows,
            _ => {
                return Err(SourceError::Format(
                    "expected an array or an object with a results array".into(),
                ))
            }
        },
        _ => return Err(SourceError::Format("expected a JSON array".into())),
    };

    Ok(rows
        .into_iter()
        .filter_map(|row| match row {
            Value::Object(fields) => Some(
                fields
                    .into_iter()
                    .filter_map(|(k, v)| scalar_text(v).map(|text| (k, text)))
                    .collect(),
            ),
            _ => None,
        })
        .collect())
}

/// Strings as-is, other scalars stringified, nulls and nested values dropped.
fn scalar_text(v: Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Pick the adapter for a configured location: http(s) URLs are fetched,
/// anything else is read as a CSV path.
pub fn source_for(location: &str, timeout: Duration) -> Result<Box<dyn CanonicalSource>, SourceError> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Ok(Box::new(HttpJsonSource::new(location, timeout)?))
    } else {
        Ok(Box::new(CsvFileSource::new(location)))
    }
}

// ---------------------------------------------------------------------------
// Cleaning
// ---------------------------------------------------------------------------

// Registry field names, CSV export spelling first, API spelling second.
const IDENTIFIER: &[&str] = &["Facility ID", "facility_id", "identifier"];
const NAME: &[&str] = &["Facility Name", "facility_name", "name"];
const STREET: &[&str] = &["Address", "address"];
const LOCALITY: &[&str] = &["City/Town", "City", "citytown", "city"];
const REGION: &[&str] = &["State", "state"];
const POSTAL: &[&str] = &["ZIP Code", "zip_code", "postal_code"];
const COUNTY: &[&str] = &["County Name", "County/Parish", "countyparish", "county"];
const PHONE: &[&str] = &["Phone Number", "Telephone Number", "telephone_number", "phone"];
const FACILITY_TYPE: &[&str] = &["Hospital Type", "hospital_type", "facility_type"];
const EMERGENCY: &[&str] = &["Emergency Services", "emergency_services"];
const LAST_MODIFIED: &[&str] = &["Last Updated Date", "last_updated", "last_modified"];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// A cleaned registry row.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    /// Coordinate is always `None` here; the resolver fills it in.
    pub entity: CanonicalEntity,
    /// `None` when the source date was missing or unparseable.
    pub modified: Option<NaiveDate>,
}

fn field<'a>(raw: &'a RawRecord, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| raw.get(*k))
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
}

fn text(raw: &RawRecord, keys: &[&str]) -> String {
    field(raw, keys).unwrap_or_default().to_string()
}

pub fn parse_source_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    // API timestamps carry a time part; only the date matters.
    let date_part = raw.split(['T', ' ']).next().unwrap_or(raw);
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(date_part, f).ok())
}

fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Turn one raw row into a `SourceRecord`. Rows without an identifier are
/// skipped with a warning; an unusable date is kept as `None`.
pub fn clean_record(raw: &RawRecord, index: usize) -> Option<SourceRecord> {
    let Some(identifier) = field(raw, IDENTIFIER) else {
        warn!(index, "Skipping canonical record without identifier");
        return None;
    };

    let modified = match field(raw, LAST_MODIFIED) {
        Some(d) => {
            let parsed = parse_source_date(d);
            if parsed.is_none() {
                warn!(identifier, value = d, "Unparseable last-modified date, forcing reprocessing");
            }
            parsed
        }
        None => None,
    };

    let entity = CanonicalEntity::builder()
        .identifier(identifier)
        .name(text(raw, NAME))
        .address(AddressParts::new(
            text(raw, STREET),
            text(raw, LOCALITY),
            text(raw, REGION),
            text(raw, POSTAL),
        ))
        .county(text(raw, COUNTY))
        .phone(text(raw, PHONE))
        .facility_type(text(raw, FACILITY_TYPE))
        .emergency_services(field(raw, EMERGENCY).is_some_and(|v| {
            matches!(v.to_ascii_lowercase().as_str(), "yes" | "y" | "true")
        }))
        .last_modified(modified.map_or(DateTime::<Utc>::UNIX_EPOCH, midnight_utc))
        .build();

    Some(SourceRecord { entity, modified })
}

/// Collapse repeated identifiers to the latest-dated record. Ties go to the
/// later row. Output keeps the position of each identifier's first row so
/// resume offsets stay stable across identical fetches.
pub fn dedupe_latest(records: Vec<SourceRecord>) -> Vec<SourceRecord> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<SourceRecord> = Vec::with_capacity(records.len());

    for record in records {
        match slots.get(&record.entity.identifier) {
            Some(&slot) => {
                if record.modified >= out[slot].modified {
                    out[slot] = record;
                }
            }
            None => {
                slots.insert(record.entity.identifier.clone(), out.len());
                out.push(record);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, &str)]) -> RawRecord {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn cleans_cms_export_row() {
        let r = raw(&[
            ("Facility ID", "290001"),
            ("Facility Name", "RENOWN REGIONAL MEDICAL CENTER"),
            ("Address", "1155 MILL STREET"),
            ("City/Town", "RENO"),
            ("State", "NV"),
            ("ZIP Code", "89502"),
            ("County/Parish", "WASHOE"),
            ("Telephone Number", "(775) 982-4100"),
            ("Hospital Type", "Acute Care Hospitals"),
            ("Emergency Services", "Yes"),
            ("Last Updated Date", "03/15/2024"),
        ]);
        let rec = clean_record(&r, 0).unwrap();
        assert_eq!(rec.entity.identifier, "290001");
        assert_eq!(rec.entity.address.locality, "RENO");
        assert_eq!(rec.entity.county, "WASHOE");
        assert!(rec.entity.emergency_services);
        assert_eq!(rec.modified, NaiveDate::from_ymd_opt(2024, 3, 15));
        assert!(rec.entity.coordinate.is_none());
    }

    #[test]
    fn missing_identifier_is_skipped() {
        assert!(clean_record(&raw(&[("Facility Name", "Orphan")]), 3).is_none());
        assert!(clean_record(&raw(&[("Facility ID", "  ")]), 3).is_none());
    }

    #[test]
    fn bad_date_defaults_to_epoch() {
        let rec = clean_record(
            &raw(&[("Facility ID", "1"), ("Last Updated Date", "last spring")]),
            0,
        )
        .unwrap();
        assert_eq!(rec.modified, None);
        assert_eq!(rec.entity.last_modified, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn date_formats() {
        let want = NaiveDate::from_ymd_opt(2024, 5, 1);
        assert_eq!(parse_source_date("2024-05-01"), want);
        assert_eq!(parse_source_date("05/01/2024"), want);
        assert_eq!(parse_source_date("2024-05-01T00:00:00Z"), want);
        assert_eq!(parse_source_date(""), None);
    }

    #[test]
    fn dedupe_keeps_latest_in_first_position() {
        let rows = vec![
            raw(&[("Facility ID", "A"), ("Facility Name", "Old"), ("Last Updated Date", "2024-01-01")]),
            raw(&[("Facility ID", "B"), ("Facility Name", "Bee"), ("Last Updated Date", "2024-01-01")]),
            raw(&[("Facility ID", "A"), ("Facility Name", "New"), ("Last Updated Date", "2024-03-01")]),
        ];
        let cleaned: Vec<_> = rows.iter().enumerate().filter_map(|(i, r)| clean_record(r, i)).collect();
        let deduped = dedupe_latest(cleaned);

        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].entity.name, "New");
        assert_eq!(deduped[1].entity.name, "Bee");
    }

    #[test]
    fn dedupe_tie_goes_to_later_row_and_dated_beats_undated() {
        let rows = vec![
            raw(&[("Facility ID", "A"), ("Facility Name", "First"), ("Last Updated Date", "2024-01-01")]),
            raw(&[("Facility ID", "A"), ("Facility Name", "Second"), ("Last Updated Date", "2024-01-01")]),
            raw(&[("Facility ID", "A"), ("Facility Name", "Undated")]),
        ];
        let cleaned: Vec<_> = rows.iter().enumerate().filter_map(|(i, r)| clean_record(r, i)).collect();
        let deduped = dedupe_latest(cleaned);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].entity.name, "Second");
    }

    #[test]
    fn csv_rows_become_records() {
        let data = "Facility ID,Facility Name,City/Town\n 1 ,Mercy , Reno\n2,Saint Mary,Reno\n";
        let rows = parse_csv(data.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("Facility ID").map(String::as_str), Some("1"));
        assert_eq!(rows[0].get("City/Town").map(String::as_str), Some("Reno"));
    }

    #[test]
    fn malformed_csv_row_is_skipped() {
        let mut data = b"Facility ID,Facility Name\n1,Mercy\n2,".to_vec();
        data.extend_from_slice(&[0xFF, 0xFE]);
        data.extend_from_slice(b"\n3,Saint Mary\n");

        let rows = parse_csv(&data).unwrap();

        let ids: Vec<&str> = rows.iter().map(|r| r["Facility ID"].as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[test]
    fn json_rows_stringify_scalars() {
        let body = serde_json::json!({
            "results": [
                {"facility_id": 290001, "facility_name": "Renown", "emergency_services": true, "extra": null},
                "not an object"
            ]
        });
        let rows = records_from_json(body).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["facility_id"], "290001");
        assert_eq!(rows[0]["emergency_services"], "true");
        assert!(!rows[0].contains_key("extra"));

        let rec = clean_record(&rows[0], 0).unwrap();
        assert_eq!(rec.entity.identifier, "290001");
        assert!(rec.entity.emergency_services);
    }

    #[test]
    fn json_scalar_body_is_rejected() {
        assert!(records_from_json(serde_json::json!(42)).is_err());
    }
}
