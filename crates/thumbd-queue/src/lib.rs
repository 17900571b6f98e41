//! Work queue and maintenance state for thumbd.
//!
//! - [`PgWorkStore`]: the shared Postgres work table
//! - [`SqliteMetaStore`]: local bookkeeping for periodic maintenance
//! - [`ClaimPolicy`]: which rows are eligible and in what order

pub mod error;
pub mod meta;
pub mod policy;
pub mod postgres;
pub mod store;

#[cfg(any(test, feature = "test-util"))]
pub mod memory;

pub use error::{QueueError, QueueResult};
pub use meta::SqliteMetaStore;
pub use policy::{ClaimPolicy, DEFAULT_MAX_RETRY, DEFAULT_RECENCY_DAYS};
pub use postgres::{DatabaseConfig, PgWorkStore};
pub use store::{MetaStore, WorkStore};

#[cfg(any(test, feature = "test-util"))]
pub use memory::{MemoryMetaStore, MemoryWorkStore};
