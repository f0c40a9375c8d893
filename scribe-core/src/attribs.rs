//! Attribute strings: runs of `*<base36>` pool references.

use crate::attribute::Attribute;
use crate::attribute_map::AttributeMap;
use crate::base36::{is_base36_char, num_to_string, parse_num};
use crate::error::{ChangesetError, Result};
use crate::op::OpKind;
use crate::pool::AttributePool;

/// Decode `*0*1f` into `[0, 51]`.
pub fn decode_attribs(attribs: &str) -> Result<Vec<usize>> {
    let mut nums = Vec::new();
    let mut rest = attribs;
    while !rest.is_empty() {
        let body = rest
            .strip_prefix('*')
            .ok_or_else(|| ChangesetError::InvalidAttributeString(attribs.to_string()))?;
        let end = body.find(|c: char| !is_base36_char(c)).unwrap_or(body.len());
        if end == 0 {
            return Err(ChangesetError::InvalidAttributeString(attribs.to_string()));
        }
        nums.push(parse_num(&body[..end])?);
        rest = &body[end..];
    }
    Ok(nums)
}

/// Encode pool indices in the order given.
pub fn encode_attribs(nums: &[usize]) -> String {
    let mut out = String::with_capacity(nums.len() * 3);
    for &num in nums {
        out.push('*');
        out.push_str(&num_to_string(num));
    }
    out
}

/// Build the attribute string for an op of `kind` carrying `attribs`.
/// Inserts drop empty values, since there is nothing to remove yet.
pub fn attribs_for_op(kind: OpKind, attribs: &[Attribute], pool: &mut AttributePool) -> String {
    if attribs.is_empty() {
        return String::new();
    }
    let mut map = AttributeMap::new();
    map.update(attribs.iter().cloned(), kind == OpKind::Insert);
    map.to_attribs(pool)
}

/// Apply `att2` on top of `att1`.
///
/// `result_is_mutation` is true when the result describes a change
/// (keep over keep), so empty values must survive as removals; it is
/// false when the result describes actual document formatting.
pub fn compose_attributes(
    att1: &str,
    att2: &str,
    result_is_mutation: bool,
    pool: &mut AttributePool,
) -> Result<String> {
    if att1.is_empty() && result_is_mutation {
        return Ok(att2.to_string());
    }
    if att2.is_empty() {
        return Ok(att1.to_string());
    }
    let mut map = AttributeMap::from_attribs(att1, pool)?;
    map.update_from_attribs(att2, pool, !result_is_mutation)?;
    Ok(map.to_attribs(pool))
}

/// Rebase the attribute changes `att2` over concurrent changes `att1`.
/// For each key set by both sides the lexically smaller value wins, so
/// `att2` keeps the key only when its value sorts strictly before `att1`'s.
pub fn follow_attributes(att1: &str, att2: &str, pool: &mut AttributePool) -> Result<String> {
    if att2.is_empty() {
        return Ok(String::new());
    }
    if att1.is_empty() {
        return Ok(att2.to_string());
    }
    let mut atts: Vec<(String, String)> = Vec::new();
    for num in decode_attribs(att2)? {
        let attr = pool.get_attrib(num)?;
        match atts.iter_mut().find(|(k, _)| *k == attr.key) {
            Some(slot) => slot.1 = attr.value.clone(),
            None => atts.push((attr.key.clone(), attr.value.clone())),
        }
    }
    for num in decode_attribs(att1)? {
        let attr = pool.get_attrib(num)?;
        if let Some(pos) = atts.iter().position(|(k, _)| *k == attr.key) {
            if attr.value <= atts[pos].1 {
                atts.remove(pos);
            }
        }
    }
    let nums: Vec<usize> = atts
        .into_iter()
        .map(|(k, v)| pool.put_attrib(Attribute::new(k, v)))
        .collect();
    Ok(encode_attribs(&nums))
}

/// Tests whether an attribute string references one particular tuple.
/// Built once per pool so the hot path is a scan of indices.
#[derive(Debug, Clone, Copy)]
pub struct AttributeTester {
    num: Option<usize>,
}

impl AttributeTester {
    pub fn new(attr: &Attribute, pool: &AttributePool) -> Self {
        Self {
            num: pool.lookup(attr),
        }
    }

    pub fn matches(&self, attribs: &str) -> bool {
        match self.num {
            None => false,
            Some(num) => decode_attribs(attribs)
                .map(|nums| nums.contains(&num))
                .unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bold_pool() -> AttributePool {
        let mut pool = AttributePool::new();
        pool.put_attrib(Attribute::new("bold", ""));
        pool.put_attrib(Attribute::new("bold", "true"));
        pool
    }

    #[test]
    fn test_decode_encode() {
        assert_eq!(decode_attribs("").unwrap(), Vec::<usize>::new());
        assert_eq!(decode_attribs("*0*1z").unwrap(), vec![0, 71]);
        assert_eq!(encode_attribs(&[0, 71]), "*0*1z");
        assert!(decode_attribs("*").is_err());
        assert!(decode_attribs("0").is_err());
        assert!(decode_attribs("*0+").is_err());
    }

    #[test]
    fn test_compose_attributes_mutation() {
        let mut pool = bold_pool();
        // keep-over-keep keeps the removal marker
        assert_eq!(compose_attributes("*1", "*0", true, &mut pool).unwrap(), "*0");
        // formatting result drops it
        assert_eq!(compose_attributes("*1", "*0", false, &mut pool).unwrap(), "");
        assert_eq!(compose_attributes("", "*0", true, &mut pool).unwrap(), "*0");
        assert_eq!(compose_attributes("*1", "", false, &mut pool).unwrap(), "*1");
    }

    #[test]
    fn test_follow_attributes_lexical_winner() {
        let mut pool = bold_pool();
        // "" <= "true": att1 wins, att2's bold is dropped
        assert_eq!(follow_attributes("*0", "*1", &mut pool).unwrap(), "");
        // "true" > "": att2 keeps its removal
        assert_eq!(follow_attributes("*1", "*0", &mut pool).unwrap(), "*0");
        assert_eq!(follow_attributes("", "*1", &mut pool).unwrap(), "*1");
        assert_eq!(follow_attributes("*1", "", &mut pool).unwrap(), "");
    }

    #[test]
    fn test_attribute_tester() {
        let mut pool = bold_pool();
        let absent = AttributeTester::new(&Attribute::new("insertorder", "first"), &pool);
        assert!(!absent.matches("*0"));
        let n = pool.put_attrib(Attribute::new("insertorder", "first"));
        let tester = AttributeTester::new(&Attribute::new("insertorder", "first"), &pool);
        assert!(tester.matches(&encode_attribs(&[0, n])));
        assert!(!tester.matches("*1"));
    }

    #[test]
    fn test_attribs_for_insert_drops_empty_values() {
        let mut pool = AttributePool::new();
        let attribs = attribs_for_op(
            OpKind::Insert,
            &[Attribute::new("bold", ""), Attribute::author("a.x")],
            &mut pool,
        );
        assert_eq!(attribs, "*0");
        assert_eq!(pool.get_attrib(0).unwrap(), &Attribute::author("a.x"));
    }
}
