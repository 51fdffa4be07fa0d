//! Item store abstraction shared by lookup waiters and the fetch dispatcher.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::title_record::{TitleId, TitleRecord};

/// Setting key holding the viewer's country code.
pub const COUNTRY_SETTING_KEY: &str = "COUNTRY";
/// Country used when no country has been recorded.
pub const DEFAULT_COUNTRY: &str = "US";

/// Key-value storage for cached title records and small settings.
///
/// Each call is atomic per key; concurrent writes to one key are last-write-wins.
pub trait TitleStore: Send + Sync {
    fn get_title(&self, title_id: TitleId) -> StoreResult<Option<TitleRecord>>;
    fn put_titles(&self, entries: &[(TitleId, TitleRecord)]) -> StoreResult<()>;
    fn get_setting(&self, key: &str) -> StoreResult<Option<String>>;
    fn set_setting(&self, key: &str, value: &str) -> StoreResult<()>;
    fn title_count(&self) -> StoreResult<usize>;
}

/// Reads the country context, falling back to [`DEFAULT_COUNTRY`].
pub fn country_or_default(store: &dyn TitleStore) -> String {
    match store.get_setting(COUNTRY_SETTING_KEY) {
        Ok(Some(country)) if !country.trim().is_empty() => country,
        Ok(_) => DEFAULT_COUNTRY.to_string(),
        Err(error) => {
            log::warn!("Failed to read country setting, using {DEFAULT_COUNTRY}: {error}");
            DEFAULT_COUNTRY.to_string()
        }
    }
}

/// Process-local store used by tests and the `memory` backend.
#[derive(Default)]
pub struct MemoryTitleStore {
    titles: RwLock<HashMap<TitleId, TitleRecord>>,
    settings: RwLock<HashMap<String, String>>,
}

impl MemoryTitleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TitleStore for MemoryTitleStore {
    fn get_title(&self, title_id: TitleId) -> StoreResult<Option<TitleRecord>> {
        let titles = self.titles.read().map_err(|_| StoreError::Poisoned)?;
        Ok(titles.get(&title_id).cloned())
    }

    fn put_titles(&self, entries: &[(TitleId, TitleRecord)]) -> StoreResult<()> {
        let mut titles = self.titles.write().map_err(|_| StoreError::Poisoned)?;
        for (title_id, record) in entries {
            titles.insert(*title_id, record.clone());
        }
        Ok(())
    }

    fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        let settings = self.settings.read().map_err(|_| StoreError::Poisoned)?;
        Ok(settings.get(key).cloned())
    }

    fn set_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut settings = self.settings.write().map_err(|_| StoreError::Poisoned)?;
        settings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn title_count(&self) -> StoreResult<usize> {
        let titles = self.titles.read().map_err(|_| StoreError::Poisoned)?;
        Ok(titles.len())
    }
}
