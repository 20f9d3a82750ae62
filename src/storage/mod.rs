//! Durable cycle storage.
//!
//! `CycleStore` is the seam between drivers and persistence. Two implementations:
//! - `SqliteCycleStore`: the real one, shared between processes through the database file
//! - `MemoryCycleStore`: same semantics, for tests and one-shot runs

mod memory;
mod sqlite;
mod traits;

pub use memory::MemoryCycleStore;
pub use sqlite::{SqliteCycleStore, compute_project_hash};
pub use traits::{CycleFilter, CycleStore, Lease};
