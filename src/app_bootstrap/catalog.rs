//! Startup pre-seeding of the title store from the full catalog.

use log::{info, warn};

use crate::backends::MetadataSource;
use crate::title_store::TitleStore;

/// Fetches the known catalog and writes every entry into `store`.
///
/// Returns the number of records written. Failures are logged and leave the
/// store as it was; lookups then fall back to batched retrieval.
pub fn seed_store_from_catalog(
    source: &dyn MetadataSource,
    store: &dyn TitleStore,
    country: Option<&str>,
) -> usize {
    let catalog = match source.fetch_catalog(country) {
        Ok(catalog) => catalog,
        Err(error) => {
            warn!("Catalog bootstrap failed, continuing with an unseeded store: {}", error);
            return 0;
        }
    };
    if catalog.is_empty() {
        info!("Catalog bootstrap returned no titles");
        return 0;
    }
    match store.put_titles(&catalog.entries) {
        Ok(()) => {
            info!("Seeded {} title(s) from catalog", catalog.entries.len());
            catalog.entries.len()
        }
        Err(error) => {
            warn!("Failed to write catalog into the store: {}", error);
            0
        }
    }
}
