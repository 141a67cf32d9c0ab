pub mod config;
pub mod file_config;
pub mod geo;
pub mod logging;
pub mod observed;
pub mod text;
pub mod types;

pub use config::AppConfig;
pub use file_config::{
    load_config, FileConfig, GeocodeConfig, MatchingConfig, QueryConfig, SyncConfig,
};
pub use geo::distance_miles;
pub use logging::init_tracing;
pub use observed::{is_meaningful_value, ObservedValueView};
pub use types::{
    AddressParts, CanonicalEntity, Coordinate, MatchResult, ObservationRecord,
    ObservedValueEvent, SyncCheckpoint,
};
