use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use waitwatch_common::Coordinate;

use crate::error::Result;

/// Last-resort lookup: the centroid of a postal code area.
pub trait PostalCentroids: Send + Sync {
    fn centroid(&self, postal_code: &str) -> Option<Coordinate>;
}

#[derive(Deserialize)]
struct CentroidRow {
    #[serde(alias = "zip_code", alias = "postal_code")]
    zip: String,
    #[serde(alias = "latitude")]
    lat: f64,
    #[serde(alias = "longitude", alias = "lon")]
    lng: f64,
}

/// In-memory centroid table loaded from a `zip,lat,lng` CSV.
#[derive(Debug, Default)]
pub struct CsvPostalCentroids {
    table: HashMap<String, Coordinate>,
}

impl CsvPostalCentroids {
    /// Table with no rows. Every lookup misses.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path)?;
        Self::from_reader(&mut reader).inspect(|t| {
            info!(path = %path.display(), rows = t.table.len(), "Postal centroids loaded");
        })
    }

    pub fn from_csv_str(data: &str) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(data.as_bytes());
        Self::from_reader(&mut reader)
    }

    fn from_reader<R: std::io::Read>(reader: &mut csv::Reader<R>) -> Result<Self> {
        let mut table = HashMap::new();
        for row in reader.deserialize::<CentroidRow>() {
            let row = row?;
            table.insert(normalize_postal(&row.zip), Coordinate::new(row.lat, row.lng));
        }
        Ok(Self { table })
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl PostalCentroids for CsvPostalCentroids {
    fn centroid(&self, postal_code: &str) -> Option<Coordinate> {
        let key = normalize_postal(postal_code);
        if key.is_empty() {
            return None;
        }
        self.table.get(&key).copied()
    }
}

/// Five-digit form: ZIP+4 suffixes dropped, short codes left-padded with
/// zeros (spreadsheets strip them).
fn normalize_postal(raw: &str) -> String {
    let digits: String = raw
        .trim()
        .split('-')
        .next()
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    if digits.is_empty() {
        return digits;
    }
    format!("{digits:0>5}")
}
