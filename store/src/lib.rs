//! fxrefresh record store
//!
//! Durable keyed storage for refresh records. Two backends share the
//! [`RecordStore`] trait: Postgres for deployments and an in-memory map for
//! tests and the simulator.

pub mod memory;
pub mod postgres;
pub mod store;

pub use memory::{InMemoryRecordStore, StatusCounts};
pub use postgres::PgRecordStore;
pub use store::RecordStore;
