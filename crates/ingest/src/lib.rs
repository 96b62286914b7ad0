//! Bus-to-store ingestion: topic routing, payload decoding and persistence.

pub mod consumer;
pub mod payload;
pub mod postgres;
pub mod router;
pub mod store;

pub use consumer::run_consumer;
pub use postgres::PgStore;
pub use router::{Discard, IngestRouter, Ingested};
pub use store::{EventStore, MemoryStore, StoreError};
