use std::sync::Arc;

use epistat_storage::StatsStore;

/// Shared handler state. The API is read-only, so the store is all it needs.
pub struct AppState {
    pub store: Arc<dyn StatsStore>,
}
