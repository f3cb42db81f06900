//! Key-value store abstraction: one table, composite (partition, sort) keys.
//!
//! `query` reads one partition in sort-key order. `scan` walks every
//! partition in storage order, counting evaluated rows against `limit`
//! before the sort-key filter is applied, so a scan page can come back
//! with fewer matches than `limit` while still reporting a continuation.

use eyre::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Composite key of a stored item.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key {
    pub pk: String,
    pub sk: String,
}

impl Key {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }
}

/// A stored item.
#[derive(Debug, Clone, PartialEq)]
pub struct KvItem {
    pub key: Key,
    pub attrs: serde_json::Value,
}

/// One page of a query or scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KvPage {
    pub items: Vec<KvItem>,
    /// Last evaluated key when more rows remain.
    pub continuation: Option<Key>,
}

/// Sort-key order for partition queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Operations the flow store needs from a backing key-value store.
pub trait KvStore {
    /// Insert or replace an item.
    fn put(&mut self, key: &Key, attrs: &serde_json::Value) -> Result<()>;

    /// Fetch one item.
    fn get(&self, key: &Key) -> Result<Option<serde_json::Value>>;

    /// Items of one partition whose sort key starts with `sk_prefix`,
    /// resuming strictly after `start`.
    fn query(&self, pk: &str, sk_prefix: &str, limit: usize, order: SortOrder, start: Option<&Key>)
    -> Result<KvPage>;

    /// Evaluate up to `limit` rows after `start` across all partitions and
    /// return those whose sort key starts with `sk_prefix`. No ordering
    /// guarantee beyond being resumable.
    fn scan(&self, sk_prefix: &str, limit: usize, start: Option<&Key>) -> Result<KvPage>;

    /// Remove an item. Returns whether it existed.
    fn delete(&mut self, key: &Key) -> Result<bool>;
}

/// In-process `KvStore` over a `BTreeMap`, with the same paging rules as
/// the SQLite store.
#[derive(Debug, Default, Clone)]
pub struct MemoryKv {
    items: BTreeMap<Key, serde_json::Value>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl KvStore for MemoryKv {
    fn put(&mut self, key: &Key, attrs: &serde_json::Value) -> Result<()> {
        self.items.insert(key.clone(), attrs.clone());
        Ok(())
    }

    fn get(&self, key: &Key) -> Result<Option<serde_json::Value>> {
        Ok(self.items.get(key).cloned())
    }

    fn query(
        &self,
        pk: &str,
        sk_prefix: &str,
        limit: usize,
        order: SortOrder,
        start: Option<&Key>,
    ) -> Result<KvPage> {
        let mut matching: Vec<(&Key, &serde_json::Value)> = self
            .items
            .range(Key::new(pk, sk_prefix)..)
            .take_while(|(k, _)| k.pk == pk && k.sk.starts_with(sk_prefix))
            .collect();

        if order == SortOrder::Descending {
            matching.reverse();
        }

        let remaining = matching.into_iter().filter(|(k, _)| match (start, order) {
            (None, _) => true,
            (Some(s), SortOrder::Ascending) => k.sk > s.sk,
            (Some(s), SortOrder::Descending) => k.sk < s.sk,
        });

        Ok(page_of(remaining, limit))
    }

    fn scan(&self, sk_prefix: &str, limit: usize, start: Option<&Key>) -> Result<KvPage> {
        let evaluated: Vec<(&Key, &serde_json::Value)> = match start {
            Some(s) => self
                .items
                .range((std::ops::Bound::Excluded(s.clone()), std::ops::Bound::Unbounded))
                .take(limit.saturating_add(1))
                .collect(),
            None => self.items.iter().take(limit.saturating_add(1)).collect(),
        };

        let continuation = if evaluated.len() > limit && limit > 0 {
            Some(evaluated[limit - 1].0.clone())
        } else {
            None
        };

        let items = evaluated
            .into_iter()
            .take(limit)
            .filter(|(k, _)| k.sk.starts_with(sk_prefix))
            .map(|(k, v)| KvItem {
                key: k.clone(),
                attrs: v.clone(),
            })
            .collect();

        Ok(KvPage { items, continuation })
    }

    fn delete(&mut self, key: &Key) -> Result<bool> {
        Ok(self.items.remove(key).is_some())
    }
}

/// Take `limit` items, setting the continuation when at least one more exists.
fn page_of<'a>(rows: impl Iterator<Item = (&'a Key, &'a serde_json::Value)>, limit: usize) -> KvPage {
    let mut rows: Vec<KvItem> = rows
        .take(limit.saturating_add(1))
        .map(|(k, v)| KvItem {
            key: k.clone(),
            attrs: v.clone(),
        })
        .collect();

    let continuation = if rows.len() > limit {
        rows.truncate(limit);
        rows.last().map(|item| item.key.clone())
    } else {
        None
    };

    KvPage { items: rows, continuation }
}
