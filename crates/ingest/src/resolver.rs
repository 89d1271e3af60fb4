//! Natural key → surrogate id resolution for the dimension tables.

use std::collections::HashMap;

use epistat_core::AgeRange;
use epistat_storage::{StatsStore, StoreError};

/// Resolves city names and age buckets to dimension ids, inserting unseen keys.
///
/// Ids are memoised for the lifetime of the resolver (one run), so a name that
/// repeats within a snapshot costs one store round trip. Uniqueness itself is
/// the store's job; the cache only skips lookups.
pub struct ReferenceResolver<'a> {
    store: &'a dyn StatsStore,
    cities: HashMap<String, i64>,
    age_buckets: HashMap<AgeRange, i64>,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(store: &'a dyn StatsStore) -> Self {
        Self {
            store,
            cities: HashMap::new(),
            age_buckets: HashMap::new(),
        }
    }

    /// Exact-name match; no case folding or trimming.
    pub async fn city_id(&mut self, name: &str) -> Result<i64, StoreError> {
        if let Some(&id) = self.cities.get(name) {
            return Ok(id);
        }
        let id = self.store.resolve_city(name).await?;
        self.cities.insert(name.to_string(), id);
        Ok(id)
    }

    pub async fn age_bucket_id(&mut self, range: &AgeRange) -> Result<i64, StoreError> {
        if let Some(&id) = self.age_buckets.get(range) {
            return Ok(id);
        }
        let id = self.store.resolve_age_bucket(range).await?;
        self.age_buckets.insert(*range, id);
        Ok(id)
    }
}
