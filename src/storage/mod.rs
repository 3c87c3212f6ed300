//! Storage capabilities and the registry that resolves them
//!
//! Only the local filesystem backend ships with Courier. Other backend
//! families (WebDAV, remote file managers, object stores) are supplied by the
//! embedder through [`StorageRegistry::register_factory`].

mod local;
mod registry;

pub use local::LocalStorage;
pub use registry::{StorageFactory, StorageRegistry};
