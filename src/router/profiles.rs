//! Profile lookups for change enrichment.

use crate::capabilities::DataAccess;
use crate::entities::Profile;
use crate::types::UserId;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use tracing::{debug, warn};

/// LRU cache in front of the backend's profile read.
pub struct ProfileCache {
    cache: Mutex<LruCache<UserId, Profile>>,
}

impl ProfileCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, user: &UserId) -> Option<Profile> {
        self.cache.lock().get(user).cloned()
    }

    pub fn insert(&self, profile: Profile) {
        self.cache.lock().put(profile.id.clone(), profile);
    }

    /// Cached profile, or a backend lookup. A failed lookup yields `None`
    /// so the change can still be applied without enrichment.
    pub async fn resolve(&self, user: &UserId, data: &dyn DataAccess) -> Option<Profile> {
        if let Some(profile) = self.get(user) {
            return Some(profile);
        }

        match data.fetch_profile(user).await {
            Ok(Some(profile)) => {
                self.insert(profile.clone());
                Some(profile)
            }
            Ok(None) => {
                debug!(user = %user, "no profile for user");
                None
            }
            Err(e) => {
                warn!(user = %user, error = %e, "profile lookup failed");
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: &str) -> Profile {
        Profile {
            id: UserId::from(id),
            display_name: id.to_uppercase(),
            avatar_url: None,
        }
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = ProfileCache::new(2);
        cache.insert(profile("a"));
        cache.insert(profile("b"));
        assert!(cache.get(&UserId::from("a")).is_some());

        cache.insert(profile("c"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&UserId::from("b")).is_none());
        assert!(cache.get(&UserId::from("a")).is_some());
    }

    #[test]
    fn test_zero_capacity_still_caches_one() {
        let cache = ProfileCache::new(0);
        cache.insert(profile("a"));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
