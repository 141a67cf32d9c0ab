use waitwatch_common::text::compact_key;
use waitwatch_common::{AddressParts, CanonicalEntity};

/// Everything the resolver may use to place a facility. The name is only
/// consulted by the fallback chain; it is not part of the cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressComponents {
    pub name: String,
    pub parts: AddressParts,
}

impl AddressComponents {
    pub fn new(name: impl Into<String>, parts: AddressParts) -> Self {
        Self {
            name: name.into(),
            parts,
        }
    }

    /// Normalized read-through key: the joined address, case-folded with all
    /// whitespace removed.
    pub fn cache_key(&self) -> String {
        compact_key(&self.parts.joined())
    }

    /// Free-text form sent as the primary query.
    pub fn primary_query(&self) -> String {
        self.parts.joined()
    }

    /// Progressively looser queries tried after the primary one fails.
    /// Entries whose inputs are blank are left out.
    pub fn fallback_queries(&self) -> Vec<String> {
        let name = self.name.trim();
        let locality = self.parts.locality.trim();
        let region = self.parts.region.trim();
        let postal = self.parts.postal_code.trim();

        let mut queries = Vec::with_capacity(3);
        if !name.is_empty() && !region.is_empty() {
            queries.push(format!("{name}, {region}"));
        }
        if !name.is_empty() && !locality.is_empty() && !locality.eq_ignore_ascii_case("none") {
            queries.push(format!("{name}, {locality}, {region}"));
        }
        if !postal.is_empty() {
            queries.push(postal.to_string());
        }
        queries
    }
}

impl From<&CanonicalEntity> for AddressComponents {
    fn from(entity: &CanonicalEntity) -> Self {
        Self::new(entity.name.clone(), entity.address.clone())
    }
}
