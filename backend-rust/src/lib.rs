//! Position resolution engine: turns gateway range batches into published
//! tag positions and serves current/historical queries.

pub mod anchors;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod grouper;
pub mod handlers;
pub mod ingest_hub;
pub mod publisher;
pub mod reader;
pub mod store;
pub mod trilateration;

pub use engine::{BatchReport, PositionEngine, TagOutcome, TagStatus};
pub use error::{EngineError, StoreError};
