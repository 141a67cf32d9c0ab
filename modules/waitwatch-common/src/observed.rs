use serde::{Serialize, Serializer};

/// Stored values the extraction step uses for "looked, found nothing".
/// Compared case-insensitively after trimming.
pub const NO_DATA_SENTINELS: &[&str] = &["unresolvable", "n/a", "not found", "none"];

/// Returns true when `raw` carries an actual observation rather than an empty
/// or sentinel marker.
pub fn is_meaningful_value(raw: &str) -> bool {
    let trimmed = raw.trim();
    !trimmed.is_empty()
        && !NO_DATA_SENTINELS
            .iter()
            .any(|s| trimmed.eq_ignore_ascii_case(s))
}

/// Observed value as surfaced to readers.
///
/// Serialized as an integer for `Value`, `"N/A"` for `NoData`, and `null`
/// for `NotYetObserved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservedValueView {
    Value(i64),
    NoData,
    NotYetObserved,
}

impl ObservedValueView {
    /// Normalize a stored value. Never fails: anything that is neither empty
    /// nor a clean integer becomes `NoData`.
    pub fn from_stored(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim) else {
            return Self::NotYetObserved;
        };
        if raw.is_empty() {
            return Self::NotYetObserved;
        }
        if !is_meaningful_value(raw) {
            return Self::NoData;
        }
        raw.parse::<i64>()
            .map(Self::Value)
            .unwrap_or(Self::NoData)
    }

    pub fn as_value(&self) -> Option<i64> {
        match self {
            Self::Value(v) => Some(*v),
            _ => None,
        }
    }
}

impl Serialize for ObservedValueView {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Value(v) => serializer.serialize_i64(*v),
            Self::NoData => serializer.serialize_str("N/A"),
            Self::NotYetObserved => serializer.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_surfaces_as_no_data() {
        assert_eq!(
            ObservedValueView::from_stored(Some("unresolvable")),
            ObservedValueView::NoData
        );
        assert_eq!(
            ObservedValueView::from_stored(Some("N/A")),
            ObservedValueView::NoData
        );
    }

    #[test]
    fn numeric_string_parses() {
        assert_eq!(
            ObservedValueView::from_stored(Some("45")),
            ObservedValueView::Value(45)
        );
        assert_eq!(
            ObservedValueView::from_stored(Some(" 120 ")),
            ObservedValueView::Value(120)
        );
    }

    #[test]
    fn empty_or_missing_is_not_yet_observed() {
        assert_eq!(
            ObservedValueView::from_stored(None),
            ObservedValueView::NotYetObserved
        );
        assert_eq!(
            ObservedValueView::from_stored(Some("  ")),
            ObservedValueView::NotYetObserved
        );
    }

    #[test]
    fn malformed_number_is_no_data() {
        assert_eq!(
            ObservedValueView::from_stored(Some("45 min")),
            ObservedValueView::NoData
        );
    }

    #[test]
    fn serializes_to_wire_shape() {
        let json = serde_json::to_string(&vec![
            ObservedValueView::Value(7),
            ObservedValueView::NoData,
            ObservedValueView::NotYetObserved,
        ])
        .unwrap();
        assert_eq!(json, r#"[7,"N/A",null]"#);
    }

    #[test]
    fn meaningful_rejects_sentinels() {
        assert!(is_meaningful_value("30"));
        assert!(!is_meaningful_value(""));
        assert!(!is_meaningful_value("Unresolvable"));
    }
}
