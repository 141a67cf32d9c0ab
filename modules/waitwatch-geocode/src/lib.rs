pub mod address;
pub mod cache;
pub mod error;
pub mod geocoder;
pub mod postal;
pub mod resolver;

pub use address::AddressComponents;
pub use cache::{CachedResolution, GeocodeCache, JsonFileCache, MemoryCache, PgGeocodeCache};
pub use error::{GeocodeError, Result};
pub use geocoder::{Geocoder, NominatimGeocoder};
pub use postal::{CsvPostalCentroids, PostalCentroids};
pub use resolver::{GeocodeResolver, Resolution, ResolverStats, RetrySettings};
