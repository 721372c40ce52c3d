//! Durable submission storage.
//!
//! The store owns the authoritative lifecycle of submission records. The
//! claim guard (Queued → Processing) and the terminal writes are
//! conditional updates checked by rows-affected, so racing workers and
//! duplicate deliveries cannot rewrite a record: the protocol-level state
//! machine in [`crate::submission`] is enforced at the storage level, not
//! just in memory.

pub mod database;
pub mod memory;
pub mod migrations;
pub mod schema;
mod store;

pub use database::PgStore;
pub use memory::MemoryStore;
pub use migrations::{MigrationError, MigrationRunner};
pub use store::{ClaimOutcome, StoreError, SubmissionStore};
