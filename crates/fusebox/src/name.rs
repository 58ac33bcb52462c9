// Copyright (c) The Fusebox Project Authors.
// Licensed under the MIT License.

use std::borrow::Borrow;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Identifies a protected resource.
///
/// Names are the primary key of the [`Engine`][crate::Engine]'s registry: the same name
/// always resolves to the same [`ProtectedResource`][crate::ProtectedResource] instance
/// for as long as the entry lives. Names should be stable, short, and `snake_case`
/// (`"primary_db"`, `"payments_api"`); they appear verbatim in events and log lines.
///
/// `ResourceName` is a cheap-to-clone shared string.
///
/// # Examples
///
/// ```
/// use fusebox::ResourceName;
///
/// let name = ResourceName::from("primary_db");
/// assert_eq!(name.as_str(), "primary_db");
/// assert_eq!(name.clone(), name);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceName(Arc<str>);

impl ResourceName {
    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceName {
    fn from(name: &str) -> Self {
        Self(Arc::from(name))
    }
}

impl From<String> for ResourceName {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl Borrow<str> for ResourceName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ResourceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for ResourceName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for ResourceName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for ResourceName {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from(name))
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(ResourceName: Send, Sync, Clone, Eq, std::hash::Hash, Display);
    }

    #[test]
    fn conversions_preserve_content() {
        assert_eq!(ResourceName::from("cache").as_str(), "cache");
        assert_eq!(ResourceName::from(String::from("cache")).as_str(), "cache");
        assert_eq!(ResourceName::from("cache").to_string(), "cache");
    }

    #[test]
    fn usable_as_borrowed_map_key() {
        let mut map = HashMap::new();
        map.insert(ResourceName::from("db"), 1);

        assert_eq!(map.get("db"), Some(&1));
    }
}
