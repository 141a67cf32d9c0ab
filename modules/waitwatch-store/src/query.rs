use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use waitwatch_common::{AddressParts, CanonicalEntity, Coordinate, ObservedValueView, QueryConfig};

use crate::error::Result;
use crate::store::{FacilityFilter, FacilityStore, GeoFilter};

/// Client-facing validation failures. Rendered as HTTP 400.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    #[error("{param} must be a number, got {value:?}")]
    NotANumber { param: &'static str, value: String },

    #[error("{param} {reason}")]
    OutOfRange {
        param: &'static str,
        reason: String,
    },

    #[error("lat and lon must be given together")]
    IncompleteCenter,
}

/// Raw query-string parameters, unparsed so bad numbers can be reported as
/// client errors instead of deserializer rejections.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub page: Option<String>,
    pub page_size: Option<String>,
    pub search: Option<String>,
    pub lat: Option<String>,
    pub lon: Option<String>,
    pub radius: Option<String>,
}

/// Validated list request.
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub page: u32,
    pub page_size: u32,
    pub search: Option<String>,
    pub center: Option<Coordinate>,
    /// Miles.
    pub radius: Option<f64>,
}

impl ListQuery {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page,
            page_size,
            search: None,
            center: None,
            radius: None,
        }
    }

    pub fn with_search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    pub fn within(mut self, center: Coordinate, radius_miles: f64) -> Self {
        self.center = Some(center);
        self.radius = Some(radius_miles);
        self
    }

    pub fn parse(params: &ListParams, config: &QueryConfig) -> std::result::Result<Self, QueryError> {
        let page = match non_blank(&params.page) {
            Some(raw) => parse_num::<u32>("page", raw)?,
            None => 1,
        };
        if page < 1 {
            return Err(QueryError::OutOfRange {
                param: "page",
                reason: "must be at least 1".into(),
            });
        }

        let page_size = match non_blank(&params.page_size) {
            Some(raw) => parse_num::<u32>("pageSize", raw)?,
            None => config.default_page_size,
        };
        if page_size < 1 || page_size > config.max_page_size {
            return Err(QueryError::OutOfRange {
                param: "pageSize",
                reason: format!("must be between 1 and {}", config.max_page_size),
            });
        }

        let lat = non_blank(&params.lat)
            .map(|raw| parse_num::<f64>("lat", raw))
            .transpose()?;
        let lon = non_blank(&params.lon)
            .map(|raw| parse_num::<f64>("lon", raw))
            .transpose()?;
        let center = match (lat, lon) {
            (Some(lat), Some(lon)) => {
                if !(-90.0..=90.0).contains(&lat) {
                    return Err(QueryError::OutOfRange {
                        param: "lat",
                        reason: "must be between -90 and 90".into(),
                    });
                }
                if !(-180.0..=180.0).contains(&lon) {
                    return Err(QueryError::OutOfRange {
                        param: "lon",
                        reason: "must be between -180 and 180".into(),
                    });
                }
                Some(Coordinate::new(lat, lon))
            }
            (None, None) => None,
            _ => return Err(QueryError::IncompleteCenter),
        };

        let radius = non_blank(&params.radius)
            .map(|raw| parse_num::<f64>("radius", raw))
            .transpose()?;
        if radius.is_some_and(|r| !r.is_finite() || r < 0.0) {
            return Err(QueryError::OutOfRange {
                param: "radius",
                reason: "must be a finite, non-negative number".into(),
            });
        }

        Ok(Self {
            page,
            page_size,
            search: non_blank(&params.search).map(str::to_string),
            center,
            radius,
        })
    }

    /// Geo filtering needs both a center and a positive radius; anything
    /// less disables it rather than matching nothing.
    pub fn filter(&self) -> FacilityFilter {
        let geo = match (self.center, self.radius) {
            (Some(center), Some(radius_miles)) if radius_miles > 0.0 => Some(GeoFilter {
                center,
                radius_miles,
            }),
            _ => None,
        };
        FacilityFilter {
            search: self.search.clone(),
            geo,
        }
    }

    fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }
}

fn non_blank(raw: &Option<String>) -> Option<&str> {
    raw.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn parse_num<T: std::str::FromStr>(
    param: &'static str,
    raw: &str,
) -> std::result::Result<T, QueryError> {
    raw.parse::<T>().map_err(|_| QueryError::NotANumber {
        param,
        value: raw.to_string(),
    })
}

/// Read-side projection of a facility.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilityView {
    pub identifier: String,
    pub name: String,
    pub address: AddressParts,
    pub county: String,
    pub phone: String,
    pub facility_type: String,
    pub emergency_services: bool,
    pub coordinate: Option<Coordinate>,
    pub has_observed_value: bool,
    pub observed_value: ObservedValueView,
    pub is_live: bool,
    pub last_modified: DateTime<Utc>,
}

impl From<CanonicalEntity> for FacilityView {
    fn from(e: CanonicalEntity) -> Self {
        Self {
            observed_value: ObservedValueView::from_stored(e.observed_value.as_deref()),
            identifier: e.identifier,
            name: e.name,
            address: e.address,
            county: e.county,
            phone: e.phone,
            facility_type: e.facility_type,
            emergency_services: e.emergency_services,
            coordinate: e.coordinate,
            has_observed_value: e.has_observed_value,
            is_live: e.is_live,
            last_modified: e.last_modified,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub entities: Vec<FacilityView>,
    pub total_count: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
}

/// Paginated, optionally geo-filtered read path.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn FacilityStore>,
    config: QueryConfig,
}

impl QueryService {
    pub fn new(store: Arc<dyn FacilityStore>, config: QueryConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    pub async fn list(&self, query: &ListQuery) -> Result<Page> {
        let filter = query.filter();
        let total_count = self.store.count_matching(&filter).await?;
        let rows = self
            .store
            .fetch_page(&filter, query.offset(), u64::from(query.page_size))
            .await?;

        debug!(
            page = query.page,
            page_size = query.page_size,
            total_count,
            returned = rows.len(),
            "Listed facilities"
        );

        Ok(Page {
            entities: rows.into_iter().map(FacilityView::from).collect(),
            total_count,
            page: query.page,
            page_size: query.page_size,
            total_pages: total_count.div_ceil(u64::from(query.page_size.max(1))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> ListParams {
        let mut p = ListParams::default();
        for (k, v) in pairs {
            let v = Some(v.to_string());
            match *k {
                "page" => p.page = v,
                "pageSize" => p.page_size = v,
                "search" => p.search = v,
                "lat" => p.lat = v,
                "lon" => p.lon = v,
                "radius" => p.radius = v,
                _ => unreachable!(),
            }
        }
        p
    }

    fn parse(pairs: &[(&str, &str)]) -> std::result::Result<ListQuery, QueryError> {
        ListQuery::parse(&params(pairs), &QueryConfig::default())
    }

    #[test]
    fn defaults_apply_when_absent() {
        let q = parse(&[]).unwrap();
        assert_eq!(q.page, 1);
        assert_eq!(q.page_size, 50);
        assert!(q.filter().geo.is_none());
    }

    #[test]
    fn rejects_non_numeric_input() {
        assert!(matches!(
            parse(&[("page", "two")]),
            Err(QueryError::NotANumber { param: "page", .. })
        ));
        assert!(matches!(
            parse(&[("lat", "north"), ("lon", "1")]),
            Err(QueryError::NotANumber { param: "lat", .. })
        ));
    }

    #[test]
    fn rejects_out_of_range_input() {
        assert!(parse(&[("page", "0")]).is_err());
        assert!(parse(&[("pageSize", "0")]).is_err());
        assert!(parse(&[("pageSize", "501")]).is_err());
        assert!(parse(&[("lat", "91"), ("lon", "0")]).is_err());
        assert!(parse(&[("lat", "0"), ("lon", "-181")]).is_err());
        assert!(parse(&[("radius", "-1")]).is_err());
    }

    #[test]
    fn rejects_non_finite_input() {
        for bad in ["NaN", "inf", "-infinity"] {
            assert!(matches!(
                parse(&[("lat", "39.5"), ("lon", "-119.8"), ("radius", bad)]),
                Err(QueryError::OutOfRange { param: "radius", .. })
            ));
            assert!(matches!(
                parse(&[("lat", bad), ("lon", "-119.8")]),
                Err(QueryError::OutOfRange { param: "lat", .. })
            ));
            assert!(matches!(
                parse(&[("lat", "39.5"), ("lon", bad)]),
                Err(QueryError::OutOfRange { param: "lon", .. })
            ));
        }
    }

    #[test]
    fn half_a_center_is_rejected() {
        assert_eq!(parse(&[("lat", "39.5")]), Err(QueryError::IncompleteCenter));
    }

    #[test]
    fn zero_radius_disables_geo_filter() {
        let q = parse(&[("lat", "0"), ("lon", "0"), ("radius", "0")]).unwrap();
        assert!(q.filter().geo.is_none());
    }

    #[test]
    fn center_without_radius_disables_geo_filter() {
        let q = parse(&[("lat", "39.5"), ("lon", "-119.8")]).unwrap();
        assert!(q.filter().geo.is_none());
    }

    #[test]
    fn blank_search_is_ignored() {
        assert_eq!(parse(&[("search", "  ")]).unwrap().search, None);
    }

    #[test]
    fn offset_is_page_minus_one_times_size() {
        assert_eq!(ListQuery::new(3, 20).offset(), 40);
        assert_eq!(ListQuery::new(1, 20).offset(), 0);
    }
}
