pub mod error;
pub mod gateway;
pub mod postgres;
pub mod query;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
#[cfg(feature = "test-utils")]
pub mod testutil;

pub use error::{Result, StoreError};
pub use gateway::{PersistenceGateway, RowFailure, UpsertReport};
pub use postgres::PgFacilityStore;
pub use query::{FacilityView, ListParams, ListQuery, Page, QueryError, QueryService};
pub use store::{FacilityFilter, FacilityStore, GeoFilter, ObservedValueUpdate};

#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryStore;
