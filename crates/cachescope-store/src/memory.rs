//! In-memory implementation of [`PreferenceStore`].
//!
//! Same semantics as the SQLite store with no persistence.

use std::collections::BTreeMap;

use async_trait::async_trait;
use cachescope_core::{EnabledCategories, StorageCategory};
use parking_lot::RwLock;

use crate::error::Result;
use crate::traits::PreferenceStore;

/// In-memory preference store. Lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    saved: RwLock<BTreeMap<StorageCategory, bool>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds the given toggles.
    pub fn with_saved(saved: impl IntoIterator<Item = (StorageCategory, bool)>) -> Self {
        Self {
            saved: RwLock::new(saved.into_iter().collect()),
        }
    }

    /// The saved toggle for a category, if any.
    pub fn saved(&self, category: StorageCategory) -> Option<bool> {
        self.saved.read().get(&category).copied()
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferences {
    async fn load_categories(&self) -> Result<EnabledCategories> {
        let mut enabled = EnabledCategories::all();
        for (category, on) in self.saved.read().iter() {
            enabled.set(*category, *on);
        }
        Ok(enabled)
    }

    async fn save_category(&self, category: StorageCategory, enabled: bool) -> Result<()> {
        self.saved.write().insert(category, enabled);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_load() {
        let prefs = MemoryPreferences::new();
        assert_eq!(prefs.load_categories().await.unwrap(), EnabledCategories::all());

        prefs
            .save_category(StorageCategory::Secure, false)
            .await
            .unwrap();
        let loaded = prefs.load_categories().await.unwrap();
        assert!(!loaded.is_enabled(StorageCategory::Secure));
        assert!(loaded.is_enabled(StorageCategory::Mmkv));
        assert_eq!(prefs.saved(StorageCategory::Secure), Some(false));
    }

    #[tokio::test]
    async fn test_with_saved() {
        let prefs = MemoryPreferences::with_saved([(StorageCategory::Mmkv, false)]);
        let loaded = prefs.load_categories().await.unwrap();
        assert!(!loaded.is_enabled(StorageCategory::Mmkv));
    }
}
