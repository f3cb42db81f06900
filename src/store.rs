//! High-level flow store over a key-value backend.
//!
//! Key layout in the single table:
//!
//! | item         | pk            | sk          |
//! |--------------|---------------|-------------|
//! | flow         | `USER#<uid>`  | `FLOW#<id>` |
//! | flow index   | `FLOW#<id>`   | `OWNER`     |
//! | user profile | `USER#<uid>`  | `PROFILE`   |

use crate::cursor;
use crate::error::FlowError;
use crate::kv::{Key, KvItem, KvStore, SortOrder};
use crate::pagination::{Batch, MAX_PAGE_LIMIT, Page, PageRequest, WindowPosition, accumulate, slice_window};
use crate::storage::SqliteKv;
use crate::types::{Category, Flow, Graph, UserProfile, ValidationError, validate_id};
use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const USER_PREFIX: &str = "USER#";
const FLOW_PREFIX: &str = "FLOW#";
const OWNER_SK: &str = "OWNER";
const PROFILE_SK: &str = "PROFILE";

/// Scan batch sizes for the public listing, as multiples of the window.
const FIRST_BATCH_FACTOR: usize = 3;
const NEXT_BATCH_FACTOR: usize = 2;

fn flow_key(owner: &str, id: &str) -> Key {
    Key::new(format!("{}{}", USER_PREFIX, owner), format!("{}{}", FLOW_PREFIX, id))
}

fn index_key(id: &str) -> Key {
    Key::new(format!("{}{}", FLOW_PREFIX, id), OWNER_SK)
}

fn profile_key(owner: &str) -> Key {
    Key::new(format!("{}{}", USER_PREFIX, owner), PROFILE_SK)
}

/// Full contents of a flow as submitted by its owner. Saving replaces the
/// stored record wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaveFlow {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<Category>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub graph: Graph,
}

impl SaveFlow {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OwnerIndex {
    owner_id: String,
}

/// The flow store.
pub struct FlowStore<K: KvStore = SqliteKv> {
    kv: K,
}

impl FlowStore<SqliteKv> {
    /// Open the SQLite-backed store at `path`.
    pub fn open(path: &Path, timeout: Duration) -> Result<Self> {
        let kv = SqliteKv::open(path, timeout).context("Failed to open flow database")?;
        Ok(Self { kv })
    }
}

impl<K: KvStore> FlowStore<K> {
    /// Wrap an existing backend.
    pub fn new(kv: K) -> Self {
        Self { kv }
    }

    /// Direct access to the backend.
    pub fn kv(&self) -> &K {
        &self.kv
    }

    pub fn kv_mut(&mut self) -> &mut K {
        &mut self.kv
    }

    /// Create or overwrite a flow.
    ///
    /// With `expected_version`, the write only happens when the stored
    /// version matches (0 means "must not exist yet"). Without it the last
    /// writer wins.
    pub fn save(&mut self, owner: &str, draft: SaveFlow, expected_version: Option<u64>) -> Result<Flow> {
        self.save_at(owner, draft, expected_version, Utc::now())
    }

    /// `save` with an explicit clock reading.
    pub fn save_at(
        &mut self,
        owner: &str,
        draft: SaveFlow,
        expected_version: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<Flow> {
        validate_id(&draft.id).map_err(|e| eyre::eyre!(FlowError::Validation(e)))?;

        // The global index must not point at someone else
        if let Some(index_owner) = self.index_owner(&draft.id)?
            && index_owner != owner
        {
            return Err(eyre::eyre!(FlowError::Validation(ValidationError::IdInUse)));
        }

        let key = flow_key(owner, &draft.id);
        let existing = self.load(&key)?;

        if let Some(expected) = expected_version {
            let actual = existing.as_ref().map(|f| f.version).unwrap_or(0);
            if actual != expected {
                return Err(eyre::eyre!(FlowError::VersionConflict { expected, actual }));
            }
        }

        let (created_at, version) = match &existing {
            Some(prev) => (prev.created_at, prev.version + 1),
            None => (now, 1),
        };

        let flow = Flow {
            id: draft.id,
            owner_id: owner.to_string(),
            title: draft.title,
            description: draft.description,
            category: draft.category,
            start_time: draft.start_time,
            end_time: draft.end_time,
            graph: draft.graph,
            created_at,
            updated_at: now.max(created_at),
            version,
        };

        flow.validate().map_err(|e| eyre::eyre!(FlowError::Validation(e)))?;

        let attrs = serde_json::to_value(&flow).context("Failed to serialize flow")?;
        self.kv.put(&key, &attrs).context("Failed to persist flow")?;

        if existing.is_none() {
            let index = serde_json::to_value(OwnerIndex {
                owner_id: owner.to_string(),
            })?;
            self.kv
                .put(&index_key(&flow.id), &index)
                .context("Failed to persist flow index")?;
        }

        log::debug!("Saved flow {} for {} at version {}", flow.id, owner, flow.version);
        Ok(flow)
    }

    /// Get one of the owner's flows.
    pub fn get(&self, owner: &str, id: &str) -> Result<Option<Flow>> {
        if validate_id(id).is_err() {
            return Ok(None);
        }
        self.load(&flow_key(owner, id))
    }

    /// Get any flow by id, regardless of owner.
    pub fn get_public(&self, id: &str) -> Result<Option<Flow>> {
        if validate_id(id).is_err() {
            return Ok(None);
        }
        match self.index_owner(id)? {
            Some(owner) => self.load(&flow_key(&owner, id)),
            None => Ok(None),
        }
    }

    /// Delete one of the owner's flows. Returns whether it existed.
    pub fn delete(&mut self, owner: &str, id: &str) -> Result<bool> {
        if validate_id(id).is_err() {
            return Ok(false);
        }

        let removed = self
            .kv
            .delete(&flow_key(owner, id))
            .context("Failed to delete flow")?;

        if removed && self.index_owner(id)?.as_deref() == Some(owner) {
            self.kv.delete(&index_key(id)).context("Failed to delete flow index")?;
        }

        if removed {
            log::debug!("Deleted flow {} for {}", id, owner);
        }
        Ok(removed)
    }

    /// One page of the owner's flows, newest sort key first. The cursor is
    /// the store's own continuation key.
    pub fn list_owned(&self, owner: &str, request: &PageRequest) -> Result<Page<Flow>> {
        let pk = format!("{}{}", USER_PREFIX, owner);

        let start: Option<Key> = match &request.cursor {
            Some(c) => {
                let key: Key = cursor::decode(c).map_err(|e| eyre::eyre!(e))?;
                // A cursor is only valid inside the partition that issued it
                if key.pk != pk || !key.sk.starts_with(FLOW_PREFIX) {
                    return Err(eyre::eyre!(FlowError::InvalidCursor));
                }
                Some(key)
            }
            None => None,
        };

        let page = self
            .kv
            .query(&pk, FLOW_PREFIX, request.limit, SortOrder::Descending, start.as_ref())
            .context("Failed to query owner flows")?;

        let items = parse_flows(page.items);
        let next_cursor = match &page.continuation {
            Some(key) => Some(cursor::encode(key)?),
            None => None,
        };

        Ok(Page {
            items,
            has_more: next_cursor.is_some(),
            next_cursor,
        })
    }

    /// One page of everyone's flows, newest `created_at` first within each
    /// scan window.
    ///
    /// The backend cannot sort across partitions, so scan batches are
    /// gathered until a page's worth of candidates exists or the table is
    /// exhausted, then sorted. The cursor records where the window started
    /// and how much of it was already returned, so following cursors
    /// returns every flow exactly once.
    pub fn list_public(&self, request: &PageRequest) -> Result<Page<Flow>> {
        let position: WindowPosition<Key> = match &request.cursor {
            Some(c) => cursor::decode(c).map_err(|e| eyre::eyre!(e))?,
            None => WindowPosition::origin(request.limit),
        };
        // Every cursor this store issues has a window no larger than a page
        // and an offset inside the first batch
        let window = position.window;
        if !(1..=MAX_PAGE_LIMIT).contains(&window) || position.offset >= window.saturating_mul(FIRST_BATCH_FACTOR) {
            return Err(eyre::eyre!(FlowError::InvalidCursor));
        }

        let gathered = accumulate(
            position.start.as_ref(),
            window,
            window.saturating_mul(FIRST_BATCH_FACTOR),
            window.saturating_mul(NEXT_BATCH_FACTOR),
            |start, limit| {
                let page = self
                    .kv
                    .scan(FLOW_PREFIX, limit, start)
                    .context("Failed to scan flows")?;
                Ok(Batch {
                    items: parse_flows(page.items),
                    next: page.continuation,
                })
            },
            |a: &Flow, b: &Flow| b.created_at.cmp(&a.created_at),
        )?;

        log::debug!(
            "Public listing gathered {} candidates in {} scans",
            gathered.items.len(),
            gathered.fetches
        );

        let (items, next) = slice_window(gathered, position, request.limit);
        let next_cursor = match &next {
            Some(p) => Some(cursor::encode(p)?),
            None => None,
        };

        Ok(Page {
            items,
            has_more: next_cursor.is_some(),
            next_cursor,
        })
    }

    /// Every flow of an owner, following cursors to the end.
    pub fn collect_owned(&self, owner: &str, page_size: usize) -> Result<Vec<Flow>> {
        let mut all = Vec::new();
        let mut request = PageRequest::first(page_size);
        loop {
            let page = self.list_owned(owner, &request)?;
            all.extend(page.items);
            match page.next_cursor {
                Some(c) => request = PageRequest::after(page_size, c),
                None => break,
            }
        }
        Ok(all)
    }

    /// Every flow in the store, following cursors to the end.
    pub fn collect_public(&self, page_size: usize) -> Result<Vec<Flow>> {
        let mut all = Vec::new();
        let mut request = PageRequest::first(page_size);
        loop {
            let page = self.list_public(&request)?;
            all.extend(page.items);
            match page.next_cursor {
                Some(c) => request = PageRequest::after(page_size, c),
                None => break,
            }
        }
        Ok(all)
    }

    /// Create the user's profile if missing. Returns the profile and
    /// whether it already existed.
    pub fn sync_user(
        &mut self,
        user_id: &str,
        email: &str,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<(UserProfile, bool)> {
        if let Some(existing) = self.get_user(user_id)? {
            return Ok((existing, true));
        }

        let now = Utc::now();
        let profile = UserProfile {
            user_id: user_id.to_string(),
            email: email.to_string(),
            name: name.unwrap_or_default().to_string(),
            description: description.unwrap_or_default().to_string(),
            created_at: now,
            updated_at: now,
        };

        let attrs = serde_json::to_value(&profile).context("Failed to serialize profile")?;
        self.kv
            .put(&profile_key(user_id), &attrs)
            .context("Failed to persist profile")?;

        log::info!("Created profile for {}", user_id);
        Ok((profile, false))
    }

    /// Look up a user profile.
    pub fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>> {
        match self.kv.get(&profile_key(user_id))? {
            Some(attrs) => Ok(Some(serde_json::from_value(attrs).context("Corrupt user profile")?)),
            None => Ok(None),
        }
    }

    fn load(&self, key: &Key) -> Result<Option<Flow>> {
        match self.kv.get(key)? {
            Some(attrs) => {
                let flow = serde_json::from_value(attrs).with_context(|| format!("Corrupt flow at {}/{}", key.pk, key.sk))?;
                Ok(Some(flow))
            }
            None => Ok(None),
        }
    }

    fn index_owner(&self, id: &str) -> Result<Option<String>> {
        match self.kv.get(&index_key(id))? {
            Some(attrs) => {
                let index: OwnerIndex = serde_json::from_value(attrs).context("Corrupt flow index")?;
                Ok(Some(index.owner_id))
            }
            None => Ok(None),
        }
    }
}

/// Parse stored items, skipping (and logging) any that no longer decode.
fn parse_flows(items: Vec<KvItem>) -> Vec<Flow> {
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<Flow>(item.attrs) {
            Ok(flow) => Some(flow),
            Err(e) => {
                log::warn!("Skipping unreadable flow at {}/{}: {}", item.key.pk, item.key.sk, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::flow_error;
    use crate::kv::MemoryKv;
    use chrono::TimeZone;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn setup_test_store() -> FlowStore<MemoryKv> {
        FlowStore::new(MemoryKv::new())
    }

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_save_and_get() {
        let mut store = setup_test_store();

        let mut draft = SaveFlow::new("fl-1", "Opening night");
        draft.description = Some("Gallery A".to_string());
        draft.category = Some(Category::Exhibition);
        let flow = store.save("alice", draft, None).unwrap();

        assert_eq!(flow.version, 1);
        assert_eq!(flow.owner_id, "alice");
        assert_eq!(flow.created_at, flow.updated_at);

        let loaded = store.get("alice", "fl-1").unwrap().unwrap();
        assert_eq!(loaded, flow);
        assert!(store.get("bob", "fl-1").unwrap().is_none());
    }

    #[test]
    fn test_overwrite_bumps_version_and_keeps_created_at() {
        let mut store = setup_test_store();

        store.save_at("alice", SaveFlow::new("fl-1", "Draft"), None, t(1)).unwrap();
        let second = store.save_at("alice", SaveFlow::new("fl-1", "Final"), None, t(2)).unwrap();
        let third = store.save_at("alice", SaveFlow::new("fl-1", "Final 2"), None, t(3)).unwrap();

        assert_eq!(second.version, 2);
        assert_eq!(third.version, 3);
        assert_eq!(third.created_at, t(1));
        assert_eq!(third.updated_at, t(3));
        assert_eq!(third.title, "Final 2");
    }

    #[test]
    fn test_overwrite_is_full_replace() {
        let mut store = setup_test_store();

        let mut draft = SaveFlow::new("fl-1", "With description");
        draft.description = Some("will vanish".to_string());
        store.save("alice", draft, None).unwrap();

        let flow = store.save("alice", SaveFlow::new("fl-1", "Without"), None).unwrap();
        assert!(flow.description.is_none());
    }

    #[test]
    fn test_expected_version_guard() {
        let mut store = setup_test_store();

        store.save("alice", SaveFlow::new("fl-1", "v1"), Some(0)).unwrap();
        store.save("alice", SaveFlow::new("fl-1", "v2"), Some(1)).unwrap();

        let err = store.save("alice", SaveFlow::new("fl-1", "stale"), Some(1)).unwrap_err();
        match flow_error(&err) {
            Some(FlowError::VersionConflict { expected, actual }) => {
                assert_eq!((*expected, *actual), (1, 2));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        assert_eq!(store.get("alice", "fl-1").unwrap().unwrap().title, "v2");
    }

    #[test]
    fn test_invalid_drafts_are_rejected_without_writes() {
        let mut store = setup_test_store();

        assert!(store.save("alice", SaveFlow::new("fl-1", ""), None).is_err());
        assert!(store.save("alice", SaveFlow::new("bad id", "ok"), None).is_err());

        let mut inverted = SaveFlow::new("fl-2", "Inverted");
        inverted.start_time = Some(t(5));
        inverted.end_time = Some(t(4));
        let err = store.save("alice", inverted, None).unwrap_err();
        assert_eq!(flow_error(&err).map(FlowError::status), Some(400));

        assert!(store.kv().is_empty());
    }

    #[test]
    fn test_id_owned_by_someone_else_is_rejected() {
        let mut store = setup_test_store();
        store.save("alice", SaveFlow::new("fl-1", "Alice's"), None).unwrap();

        let err = store.save("bob", SaveFlow::new("fl-1", "Bob's"), None).unwrap_err();
        assert!(matches!(
            flow_error(&err),
            Some(FlowError::Validation(ValidationError::IdInUse))
        ));
    }

    #[test]
    fn test_get_public_and_delete() {
        let mut store = setup_test_store();
        store.save("alice", SaveFlow::new("fl-1", "Shared"), None).unwrap();

        assert_eq!(store.get_public("fl-1").unwrap().unwrap().owner_id, "alice");

        assert!(!store.delete("bob", "fl-1").unwrap());
        assert!(store.get_public("fl-1").unwrap().is_some());

        assert!(store.delete("alice", "fl-1").unwrap());
        assert!(store.get_public("fl-1").unwrap().is_none());
        assert!(store.get("alice", "fl-1").unwrap().is_none());

        // The id is free again
        store.save("bob", SaveFlow::new("fl-1", "Bob's now"), None).unwrap();
    }

    #[test]
    fn test_list_owned_pages() {
        let mut store = setup_test_store();
        for i in 0..7 {
            store
                .save("alice", SaveFlow::new(format!("fl-{:02}", i), format!("Flow {}", i)), None)
                .unwrap();
        }
        store.save("bob", SaveFlow::new("fl-bob", "Not Alice's"), None).unwrap();
        store.sync_user("alice", "alice@example.com", None, None).unwrap();

        let first = store.list_owned("alice", &PageRequest::first(3)).unwrap();
        let ids: Vec<_> = first.items.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["fl-06", "fl-05", "fl-04"]);
        assert!(first.has_more);

        let all = store.collect_owned("alice", 3).unwrap();
        let ids: Vec<_> = all.iter().map(|f| f.id.clone()).collect();
        assert_eq!(ids.len(), 7);
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 7);
        assert!(all.iter().all(|f| f.owner_id == "alice"));
    }

    #[test]
    fn test_list_owned_last_page_has_no_cursor() {
        let mut store = setup_test_store();
        for i in 0..4 {
            store.save("alice", SaveFlow::new(format!("fl-{}", i), "x"), None).unwrap();
        }

        let page = store.list_owned("alice", &PageRequest::first(4)).unwrap();
        assert_eq!(page.items.len(), 4);
        assert!(!page.has_more);
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn test_list_owned_rejects_foreign_cursor() {
        let mut store = setup_test_store();
        for i in 0..3 {
            store.save("bob", SaveFlow::new(format!("fl-{}", i), "x"), None).unwrap();
        }
        let bobs = store.list_owned("bob", &PageRequest::first(1)).unwrap();
        let cursor = bobs.next_cursor.unwrap();

        let err = store.list_owned("alice", &PageRequest::after(1, cursor)).unwrap_err();
        assert!(matches!(flow_error(&err), Some(FlowError::InvalidCursor)));

        let err = store.list_owned("bob", &PageRequest::after(1, "%%%")).unwrap_err();
        assert!(matches!(flow_error(&err), Some(FlowError::InvalidCursor)));
    }

    #[test]
    fn test_list_public_sorted_and_complete() {
        let mut store = setup_test_store();
        // Owners interleave so scan order differs from creation order
        for i in 0..12u32 {
            let owner = format!("user-{}", (i * 5) % 7);
            store
                .save_at(&owner, SaveFlow::new(format!("fl-{:02}", i), "x"), None, t(1 + i))
                .unwrap();
        }

        let first = store.list_public(&PageRequest::first(5)).unwrap();
        assert_eq!(first.items.len(), 5);
        assert!(first.items.windows(2).all(|w| w[0].created_at >= w[1].created_at));
        assert!(first.has_more);

        let all = store.collect_public(5).unwrap();
        let ids: HashSet<_> = all.iter().map(|f| f.id.clone()).collect();
        assert_eq!(all.len(), 12);
        assert_eq!(ids.len(), 12);
    }

    #[test]
    fn test_list_public_rejects_bad_cursor() {
        let store = setup_test_store();
        let err = store.list_public(&PageRequest::after(10, "bm90IGpzb24")).unwrap_err();
        assert_eq!(flow_error(&err).map(FlowError::status), Some(400));
    }

    #[test]
    fn test_list_skips_corrupt_records() {
        let mut store = setup_test_store();
        store.save("alice", SaveFlow::new("fl-1", "Good"), None).unwrap();
        store
            .kv_mut()
            .put(&flow_key("alice", "fl-2"), &serde_json::json!({ "garbage": true }))
            .unwrap();

        let page = store.list_owned("alice", &PageRequest::first(10)).unwrap();
        assert_eq!(page.items.len(), 1);
        let page = store.list_public(&PageRequest::first(10)).unwrap();
        assert_eq!(page.items.len(), 1);
    }

    #[test]
    fn test_sync_user() {
        let mut store = setup_test_store();

        let (profile, existed) = store
            .sync_user("alice", "alice@example.com", Some("Alice"), None)
            .unwrap();
        assert!(!existed);
        assert_eq!(profile.name, "Alice");

        let (again, existed) = store.sync_user("alice", "other@example.com", None, None).unwrap();
        assert!(existed);
        assert_eq!(again.email, "alice@example.com");
    }

    #[test]
    fn test_sqlite_backend_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("flows.db");

        {
            let mut store = FlowStore::open(&path, Duration::from_secs(1)).unwrap();
            store.save("alice", SaveFlow::new("fl-1", "Persisted"), None).unwrap();
        }

        let store = FlowStore::open(&path, Duration::from_secs(1)).unwrap();
        let flow = store.get_public("fl-1").unwrap().unwrap();
        assert_eq!(flow.title, "Persisted");
        assert_eq!(store.collect_public(10).unwrap().len(), 1);
    }
}
