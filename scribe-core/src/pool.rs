//! Per-pad interning table for attributes.
//!
//! ```text
//!   numToAttrib            attribToNum
//!  ┌───┬──────────────┐   ┌──────────────┬───┐
//!  │ 0 │ bold=true    │◄─►│ bold=true    │ 0 │
//!  │ 1 │ author=a.xyz │◄─►│ author=a.xyz │ 1 │
//!  │ … │ …            │   │ …            │ … │
//!  └───┴──────────────┘   └──────────────┴───┘
//! ```
//!
//! Indices are dense in `[0, nextNum)`, allocated monotonically and never
//! reused. Changesets refer to attributes as `*<base36 index>`.

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::attribute::Attribute;
use crate::error::{ChangesetError, Result};

/// Bidirectional attribute ⇄ index table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PoolJson", into = "PoolJson")]
pub struct AttributePool {
    num_to_attrib: Vec<Attribute>,
    attrib_to_num: HashMap<Attribute, usize>,
}

/// JSON shape of a pool: `{"numToAttrib": {"0": [k, v], …}, "nextNum": n}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolJson {
    #[serde(rename = "numToAttrib", deserialize_with = "deserialize_num_keys")]
    pub num_to_attrib: BTreeMap<usize, Attribute>,
    #[serde(rename = "nextNum")]
    pub next_num: usize,
}

impl AttributePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `attr`, returning its index. Existing tuples keep their index.
    pub fn put_attrib(&mut self, attr: Attribute) -> usize {
        if let Some(&num) = self.attrib_to_num.get(&attr) {
            return num;
        }
        let num = self.num_to_attrib.len();
        self.attrib_to_num.insert(attr.clone(), num);
        self.num_to_attrib.push(attr);
        num
    }

    /// Index of `attr` without allocating one when absent.
    pub fn lookup(&self, attr: &Attribute) -> Option<usize> {
        self.attrib_to_num.get(attr).copied()
    }

    pub fn get_attrib(&self, num: usize) -> Result<&Attribute> {
        self.num_to_attrib
            .get(num)
            .ok_or(ChangesetError::MissingAttribute(num))
    }

    /// The next index that `put_attrib` would allocate.
    pub fn next_num(&self) -> usize {
        self.num_to_attrib.len()
    }

    pub fn len(&self) -> usize {
        self.num_to_attrib.len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_to_attrib.is_empty()
    }

    /// Iterate `(index, attribute)` in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Attribute)> {
        self.num_to_attrib.iter().enumerate()
    }

    /// Every value stored under `key`, in index order.
    pub fn values_for_key<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.num_to_attrib
            .iter()
            .filter(move |a| a.key == key)
            .map(|a| a.value.as_str())
    }

    pub fn to_jsonable(&self) -> PoolJson {
        PoolJson {
            num_to_attrib: self.num_to_attrib.iter().cloned().enumerate().collect(),
            next_num: self.num_to_attrib.len(),
        }
    }

    /// Rebuild a pool from its JSON form. The reverse map is derived by
    /// inversion; gaps or duplicate tuples are rejected.
    pub fn from_jsonable(json: PoolJson) -> Result<Self> {
        if json.num_to_attrib.len() != json.next_num {
            return Err(ChangesetError::InvalidPool(format!(
                "nextNum is {} but {} attributes are present",
                json.next_num,
                json.num_to_attrib.len()
            )));
        }
        let mut pool = Self::new();
        for (expected, (num, attr)) in json.num_to_attrib.into_iter().enumerate() {
            if num != expected {
                return Err(ChangesetError::InvalidPool(format!("missing index {expected}")));
            }
            if pool.attrib_to_num.contains_key(&attr) {
                return Err(ChangesetError::InvalidPool(format!("duplicate attribute {attr}")));
            }
            pool.put_attrib(attr);
        }
        Ok(pool)
    }

    /// Verify that both directions agree and cover `[0, nextNum)`.
    pub fn check(&self) -> Result<()> {
        if self.attrib_to_num.len() != self.num_to_attrib.len() {
            return Err(ChangesetError::InvalidPool(format!(
                "{} forward entries but {} reverse entries",
                self.num_to_attrib.len(),
                self.attrib_to_num.len()
            )));
        }
        for (num, attr) in self.num_to_attrib.iter().enumerate() {
            if self.attrib_to_num.get(attr) != Some(&num) {
                return Err(ChangesetError::InvalidPool(format!(
                    "attribute {attr} at index {num} is not mapped back"
                )));
            }
        }
        Ok(())
    }
}

/// Map keys arrive as JSON strings (`"0"`), or as integers from binary
/// formats and buffered content.
fn deserialize_num_keys<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<usize, Attribute>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(PartialEq, Eq, PartialOrd, Ord)]
    struct NumKey(usize);

    impl<'de> Deserialize<'de> for NumKey {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
            struct KeyVisitor;

            impl Visitor<'_> for KeyVisitor {
                type Value = NumKey;

                fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str("an attribute number")
                }

                fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<NumKey, E> {
                    usize::try_from(v).map(NumKey).map_err(E::custom)
                }

                fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<NumKey, E> {
                    v.parse().map(NumKey).map_err(E::custom)
                }
            }

            if deserializer.is_human_readable() {
                deserializer.deserialize_any(KeyVisitor)
            } else {
                deserializer.deserialize_u64(KeyVisitor)
            }
        }
    }

    let raw = BTreeMap::<NumKey, Attribute>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|(NumKey(n), attr)| (n, attr)).collect())
}

impl TryFrom<PoolJson> for AttributePool {
    type Error = ChangesetError;

    fn try_from(json: PoolJson) -> Result<Self> {
        Self::from_jsonable(json)
    }
}

impl From<AttributePool> for PoolJson {
    fn from(pool: AttributePool) -> Self {
        PoolJson {
            next_num: pool.num_to_attrib.len(),
            num_to_attrib: pool.num_to_attrib.into_iter().enumerate().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_attrib_is_idempotent() {
        let mut pool = AttributePool::new();
        let bold = pool.put_attrib(Attribute::new("bold", "true"));
        let author = pool.put_attrib(Attribute::author("a.1"));
        assert_eq!(bold, 0);
        assert_eq!(author, 1);
        assert_eq!(pool.put_attrib(Attribute::new("bold", "true")), 0);
        assert_eq!(pool.next_num(), 2);
        assert_eq!(pool.lookup(&Attribute::new("italic", "true")), None);
        assert_eq!(pool.next_num(), 2);
        pool.check().unwrap();
    }

    #[test]
    fn test_get_missing_attrib() {
        let pool = AttributePool::new();
        assert_eq!(pool.get_attrib(3), Err(ChangesetError::MissingAttribute(3)));
    }

    #[test]
    fn test_json_shape() {
        let mut pool = AttributePool::new();
        pool.put_attrib(Attribute::new("bold", ""));
        pool.put_attrib(Attribute::new("bold", "true"));
        let json = serde_json::to_value(&pool).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "numToAttrib": {"0": ["bold", ""], "1": ["bold", "true"]},
                "nextNum": 2
            })
        );
        let back: AttributePool = serde_json::from_value(json).unwrap();
        assert_eq!(back, pool);
        assert_eq!(back.lookup(&Attribute::new("bold", "true")), Some(1));
    }

    #[test]
    fn test_from_jsonable_rejects_gaps() {
        let json = serde_json::json!({"numToAttrib": {"1": ["bold", "true"]}, "nextNum": 1});
        assert!(serde_json::from_value::<AttributePool>(json).is_err());
    }

    #[test]
    fn test_values_for_key() {
        let mut pool = AttributePool::new();
        pool.put_attrib(Attribute::author("a.one"));
        pool.put_attrib(Attribute::new("bold", "true"));
        pool.put_attrib(Attribute::author("a.two"));
        let authors: Vec<&str> = pool.values_for_key("author").collect();
        assert_eq!(authors, vec!["a.one", "a.two"]);
    }
}
