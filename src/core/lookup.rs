//! Short-lived `hash -> RemoteFile` lookups
//!
//! Producers that must fit a file reference into a small callback payload
//! store the file under its [`RemoteFile::hash`] and carry only the hash.

use courier_core_interface::RemoteFile;
use courier_core_resilience::ExpiringCache;
use std::time::Duration;

pub struct FileLookup {
    cache: ExpiringCache<String, RemoteFile>,
}

impl FileLookup {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: ExpiringCache::new(ttl),
        }
    }

    /// Remember `file`, returning the key to look it up with
    pub fn remember(&self, file: &RemoteFile) -> String {
        let key = file.hash();
        self.cache.insert(key.clone(), file.clone());
        key
    }

    pub fn get(&self, hash: &str) -> Option<RemoteFile> {
        self.cache.get(hash)
    }

    /// Look up and forget `hash`
    pub fn take(&self, hash: &str) -> Option<RemoteFile> {
        self.cache.remove(hash)
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge(&self) -> usize {
        self.cache.purge_expired()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
