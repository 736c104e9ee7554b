//! fxrefresh common types
//!
//! Shared types used across the refresh pipeline: record identifiers,
//! currencies and their allow-lists, the record status state machine and the
//! error taxonomy.

pub mod currency;
pub mod error;
pub mod identifiers;
pub mod record;
pub mod time;

pub use currency::*;
pub use error::*;
pub use identifiers::*;
pub use record::*;
pub use time::*;
