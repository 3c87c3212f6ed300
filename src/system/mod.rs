//! Capability implementations that ship with the engine
//!
//! - [`LocalSource`] / [`ConfigPersistence`]: filesystem-backed source and
//!   configuration-backed rule lookups for standalone runs
//! - [`mock`]: in-memory doubles shared by unit and integration tests

mod local;
pub mod mock;

pub use local::{ConfigPersistence, LocalSource};
