//! Map view over an attribute string.

use std::collections::BTreeMap;

use crate::attribs::decode_attribs;
use crate::attribute::Attribute;
use crate::error::Result;
use crate::pool::AttributePool;

/// `key → value` view of an attribute string. Keys are unique, and
/// serialization walks them in `(key, value)` order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeMap {
    entries: BTreeMap<String, String>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every `*n` token of `attribs`, in token order, through `pool`.
    pub fn from_attribs(attribs: &str, pool: &AttributePool) -> Result<Self> {
        let mut map = Self::new();
        map.update_from_attribs(attribs, pool, false)?;
        Ok(map)
    }

    /// Insert or override entries. Keys and values are trimmed. With
    /// `empty_value_is_delete`, an empty value removes its key.
    pub fn update<I>(&mut self, entries: I, empty_value_is_delete: bool) -> &mut Self
    where
        I: IntoIterator<Item = Attribute>,
    {
        for attr in entries {
            let key = attr.key.trim().to_string();
            let value = attr.value.trim().to_string();
            if value.is_empty() && empty_value_is_delete {
                self.entries.remove(&key);
            } else {
                self.entries.insert(key, value);
            }
        }
        self
    }

    pub fn update_from_attribs(
        &mut self,
        attribs: &str,
        pool: &AttributePool,
        empty_value_is_delete: bool,
    ) -> Result<&mut Self> {
        let mut decoded = Vec::new();
        for num in decode_attribs(attribs)? {
            decoded.push(pool.get_attrib(num)?.clone());
        }
        Ok(self.update(decoded, empty_value_is_delete))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Set without trimming or deletion semantics.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Serialize, interning each pair into `pool`.
    pub fn to_attribs(&self, pool: &mut AttributePool) -> String {
        let nums: Vec<usize> = self
            .entries
            .iter()
            .map(|(k, v)| pool.put_attrib(Attribute::new(k.clone(), v.clone())))
            .collect();
        crate::attribs::encode_attribs(&nums)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> AttributePool {
        let mut pool = AttributePool::new();
        pool.put_attrib(Attribute::new("bold", "true"));
        pool.put_attrib(Attribute::new("author", "a.x"));
        pool.put_attrib(Attribute::new("bold", ""));
        pool
    }

    #[test]
    fn test_from_attribs_and_sorted_output() {
        let mut pool = pool();
        let map = AttributeMap::from_attribs("*0*1", &pool).unwrap();
        assert_eq!(map.get("bold"), Some("true"));
        assert_eq!(map.len(), 2);
        // author sorts before bold
        assert_eq!(map.to_attribs(&mut pool), "*1*0");
    }

    #[test]
    fn test_update_with_delete() {
        let pool = pool();
        let mut map = AttributeMap::from_attribs("*0*1", &pool).unwrap();
        map.update_from_attribs("*2", &pool, true).unwrap();
        assert_eq!(map.get("bold"), None);
        let mut kept = AttributeMap::from_attribs("*0", &pool).unwrap();
        kept.update_from_attribs("*2", &pool, false).unwrap();
        assert_eq!(kept.get("bold"), Some(""));
    }

    #[test]
    fn test_update_trims() {
        let mut map = AttributeMap::new();
        map.update([Attribute::new(" bold ", " true ")], false);
        assert_eq!(map.get("bold"), Some("true"));
    }

    #[test]
    fn test_unknown_index_fails() {
        let pool = pool();
        assert!(AttributeMap::from_attribs("*9", &pool).is_err());
    }
}
