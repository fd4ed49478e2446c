//! Storage categories.
//!
//! Storage hooks on the remote side publish their contents as queries keyed
//! `["#storage", <category>, ...]`. The inspector can hide a whole category
//! without touching the underlying cache. Keys without the `#storage` head,
//! or with an unrecognized category segment, belong to no category and are
//! always visible.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::key::QueryKey;
use crate::value::Value;

/// Reserved first segment of every storage query key.
pub const STORAGE_KEY_PREFIX: &str = "#storage";

/// Backing store a storage query mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageCategory {
    Mmkv,
    Async,
    Secure,
}

impl StorageCategory {
    pub const ALL: [StorageCategory; 3] = [
        StorageCategory::Mmkv,
        StorageCategory::Async,
        StorageCategory::Secure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageCategory::Mmkv => "mmkv",
            StorageCategory::Async => "async",
            StorageCategory::Secure => "secure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mmkv" => Some(StorageCategory::Mmkv),
            "async" => Some(StorageCategory::Async),
            "secure" => Some(StorageCategory::Secure),
            _ => None,
        }
    }

    /// `["#storage", category]`
    pub fn root_key(&self) -> QueryKey {
        QueryKey::from([STORAGE_KEY_PREFIX, self.as_str()])
    }

    /// `["#storage", category, name]`
    pub fn key(&self, name: &str) -> QueryKey {
        QueryKey::from([STORAGE_KEY_PREFIX, self.as_str(), name])
    }

    /// `["#storage", category, "all"]`
    pub fn all_key(&self) -> QueryKey {
        self.key("all")
    }
}

impl fmt::Display for StorageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a key by its reserved head segment.
pub fn classify(key: &QueryKey) -> Option<StorageCategory> {
    match key.segments() {
        [Value::String(head), Value::String(category), ..] if head == STORAGE_KEY_PREFIX => {
            StorageCategory::parse(category)
        }
        _ => None,
    }
}

/// True if `key` belongs to no category or to an enabled one.
pub fn is_visible(key: &QueryKey, enabled: &EnabledCategories) -> bool {
    classify(key).map_or(true, |category| enabled.is_enabled(category))
}

/// The set of categories currently shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnabledCategories(BTreeSet<StorageCategory>);

impl EnabledCategories {
    pub fn all() -> Self {
        Self(StorageCategory::ALL.into_iter().collect())
    }

    pub fn none() -> Self {
        Self(BTreeSet::new())
    }

    /// Returns true if the category was previously disabled.
    pub fn enable(&mut self, category: StorageCategory) -> bool {
        self.0.insert(category)
    }

    /// Returns true if the category was previously enabled.
    pub fn disable(&mut self, category: StorageCategory) -> bool {
        self.0.remove(&category)
    }

    pub fn set(&mut self, category: StorageCategory, enabled: bool) -> bool {
        if enabled {
            self.enable(category)
        } else {
            self.disable(category)
        }
    }

    pub fn is_enabled(&self, category: StorageCategory) -> bool {
        self.0.contains(&category)
    }

    pub fn iter(&self) -> impl Iterator<Item = StorageCategory> + '_ {
        self.0.iter().copied()
    }
}

impl Default for EnabledCategories {
    fn default() -> Self {
        Self::all()
    }
}

impl FromIterator<StorageCategory> for EnabledCategories {
    fn from_iter<I: IntoIterator<Item = StorageCategory>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(
            classify(&QueryKey::from(["#storage", "mmkv", "token"])),
            Some(StorageCategory::Mmkv)
        );
        assert_eq!(
            classify(&QueryKey::from(["#storage", "secure"])),
            Some(StorageCategory::Secure)
        );
        assert_eq!(classify(&QueryKey::from(["#storage"])), None);
        assert_eq!(classify(&QueryKey::from(["#storage", "sqlite", "x"])), None);
        assert_eq!(classify(&QueryKey::from(["todos", "mmkv"])), None);
        assert_eq!(classify(&QueryKey::default()), None);
        assert_eq!(
            classify(&QueryKey::new([Value::from("#storage"), Value::from(1)])),
            None
        );
    }

    #[test]
    fn test_key_builders_classify_back() {
        for category in StorageCategory::ALL {
            assert_eq!(classify(&category.root_key()), Some(category));
            assert_eq!(classify(&category.key("user")), Some(category));
            assert_eq!(classify(&category.all_key()), Some(category));
        }
        assert_eq!(
            StorageCategory::Async.all_key(),
            QueryKey::from(["#storage", "async", "all"])
        );
    }

    #[test]
    fn test_visibility() {
        let mut enabled = EnabledCategories::all();
        let mmkv = StorageCategory::Mmkv.key("x");
        let plain = QueryKey::from(["todos"]);

        assert!(is_visible(&mmkv, &enabled));
        assert!(enabled.disable(StorageCategory::Mmkv));
        assert!(!is_visible(&mmkv, &enabled));
        assert!(is_visible(&plain, &enabled));
        assert!(is_visible(&plain, &EnabledCategories::none()));

        assert!(!enabled.disable(StorageCategory::Mmkv));
        assert!(enabled.enable(StorageCategory::Mmkv));
        assert!(is_visible(&mmkv, &enabled));
    }

    #[test]
    fn test_default_is_all_enabled() {
        let enabled = EnabledCategories::default();
        assert!(StorageCategory::ALL.iter().all(|c| enabled.is_enabled(*c)));
    }
}
