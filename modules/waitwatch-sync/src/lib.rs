pub mod broadcast;
pub mod fuzzy;
pub mod ingest;
pub mod jobs;
pub mod matcher;
pub mod services;
pub mod source;
pub mod sync;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use broadcast::{Broadcaster, ChannelBroadcaster};
pub use ingest::{parse_extraction_payload, IngestReport, ObservationIngestor};
pub use jobs::{JobRunner, SubmitOutcome};
pub use matcher::{EntityMatcher, MatchOutcome};
pub use services::Services;
pub use source::{
    CanonicalSource, CsvFileSource, HttpJsonSource, RawRecord, SourceError, SourceRecord,
};
pub use sync::{SyncController, SyncReport};
