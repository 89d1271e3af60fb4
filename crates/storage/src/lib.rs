//! Persistence for scheduled jobs, run history, dimension tables and fact tables.
//!
//! [`StatsStore`] is the seam the ingestion pipeline and read API program
//! against. [`PgStore`] is the production backend; [`MemoryStore`] keeps the
//! same contract in process memory.

pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod store;

pub use error::StoreError;
pub use memory::{MemoryStore, MemoryTables, StoredFact};
pub use model::*;
pub use postgres::PgStore;
pub use store::StatsStore;
