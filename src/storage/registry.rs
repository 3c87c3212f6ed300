//! Storage registry
//!
//! Holds the configured storage instances by name, the factories that build
//! them from `[[storages]]` entries, and each user's allow/deny list.

use super::LocalStorage;
use crate::config::{CourierConfig, StorageConfig, UserConfig};
use crate::error::{CourierError, Result};
use courier_core_interface::{Storage, StorageType};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// Factory function type for building a storage from its configuration
pub type StorageFactory =
    Arc<dyn Fn(&StorageConfig) -> Result<Arc<dyn Storage>> + Send + Sync>;

/// Registry of named storages
///
/// # Example
///
/// ```no_run
/// use courier::config::CourierConfig;
/// use courier::storage::StorageRegistry;
///
/// # fn main() -> courier::Result<()> {
/// let config = CourierConfig::from_file("courier.toml".as_ref())?;
/// let registry = StorageRegistry::new();
/// registry.load(&config)?;
/// let disk = registry.get(1001, "disk")?;
/// # Ok(())
/// # }
/// ```
pub struct StorageRegistry {
    factories: RwLock<HashMap<StorageType, StorageFactory>>,
    storages: RwLock<HashMap<String, Arc<dyn Storage>>>,
    access: RwLock<HashMap<i64, UserConfig>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl StorageRegistry {
    /// Create a registry with the built-in `local` factory
    pub fn new() -> Self {
        let registry = Self {
            factories: RwLock::new(HashMap::new()),
            storages: RwLock::new(HashMap::new()),
            access: RwLock::new(HashMap::new()),
        };
        registry.register_builtin();
        registry
    }

    fn register_builtin(&self) {
        self.register_factory(
            StorageType::Local,
            Arc::new(|config: &StorageConfig| -> Result<Arc<dyn Storage>> {
                Ok(Arc::new(LocalStorage::from_config(config)?))
            }),
        );
    }

    /// Register (or replace) the factory for a backend family
    pub fn register_factory(&self, storage_type: StorageType, factory: StorageFactory) {
        write(&self.factories).insert(storage_type, factory);
    }

    pub fn has_factory(&self, storage_type: StorageType) -> bool {
        read(&self.factories).contains_key(&storage_type)
    }

    /// Add a ready-made storage instance under its own name
    pub fn register(&self, storage: Arc<dyn Storage>) {
        let name = storage.name().to_string();
        if write(&self.storages).insert(name.clone(), storage).is_some() {
            warn!(storage = %name, "replaced existing storage");
        }
    }

    /// Restrict `user.id` to the storages its list allows
    pub fn set_user_access(&self, user: UserConfig) {
        write(&self.access).insert(user.id, user);
    }

    /// Build every enabled storage and record user access lists
    ///
    /// Storages whose family has no registered factory are skipped with a
    /// warning. Returns the number of storages built.
    pub fn load(&self, config: &CourierConfig) -> Result<usize> {
        let mut built = 0;

        for storage_config in config.storages.iter().filter(|s| s.enable) {
            let factory = read(&self.factories)
                .get(&storage_config.storage_type)
                .cloned();
            let Some(factory) = factory else {
                let err = CourierError::StorageUnavailable {
                    name: storage_config.name.clone(),
                    storage_type: storage_config.storage_type.to_string(),
                };
                warn!(error = %err, "skipping storage");
                continue;
            };

            self.register((*factory)(storage_config)?);
            built += 1;
            debug!(
                storage = %storage_config.name,
                storage_type = %storage_config.storage_type,
                "storage loaded"
            );
        }

        for user in &config.users {
            self.set_user_access(user.clone());
        }

        Ok(built)
    }

    /// Resolve `name` for `user_id`, honouring the user's access list
    pub fn get(&self, user_id: i64, name: &str) -> Result<Arc<dyn Storage>> {
        let storage = read(&self.storages)
            .get(name)
            .cloned()
            .ok_or_else(|| CourierError::StorageNotFound {
                name: name.to_string(),
            })?;

        if let Some(user) = read(&self.access).get(&user_id) {
            if !user.may_use(name) {
                return Err(CourierError::StorageDenied {
                    user_id,
                    name: name.to_string(),
                });
            }
        }

        Ok(storage)
    }

    /// Storage names `user_id` may use, sorted
    pub fn names_for_user(&self, user_id: i64) -> Vec<String> {
        let access = read(&self.access);
        let mut names: Vec<String> = read(&self.storages)
            .keys()
            .filter(|name| access.get(&user_id).map_or(true, |user| user.may_use(name)))
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        read(&self.storages).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StorageRegistry {
    fn default() -> Self {
        Self::new()
    }
}
