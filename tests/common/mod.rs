//! Shared test infrastructure for flowline integration tests.
//!
//! Provides TestEnv helper for consistent test setup/teardown.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use flowline::{Flow, FlowStore, Page, PageRequest, SaveFlow, SqliteKv};
use std::collections::HashSet;
use std::time::Duration as StdDuration;
use tempfile::TempDir;

/// A fixed instant tests build their clocks from.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Test environment with automatic cleanup.
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub store: FlowStore<SqliteKv>,
}

impl TestEnv {
    /// Create a new test environment with an on-disk store.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = FlowStore::open(&temp_dir.path().join("flowline.db"), StdDuration::from_secs(5))
            .expect("Failed to open store");
        Self { temp_dir, store }
    }

    /// Save an undated flow created `minutes` after the epoch.
    pub fn save_flow(&mut self, owner: &str, id: &str, minutes: i64) -> Flow {
        self.store
            .save_at(owner, SaveFlow::new(id, format!("Flow {}", id)), None, epoch() + Duration::minutes(minutes))
            .expect("Failed to save flow")
    }

    /// Save a flow spanning `[start, end)` hours after the epoch.
    pub fn save_dated(&mut self, owner: &str, id: &str, start_h: i64, end_h: i64) -> Flow {
        let mut draft = SaveFlow::new(id, format!("Event {}", id));
        draft.start_time = Some(epoch() + Duration::hours(start_h));
        draft.end_time = Some(epoch() + Duration::hours(end_h));
        self.store.save(owner, draft, None).expect("Failed to save flow")
    }

    /// Follow public cursors to the end, returning every page.
    pub fn public_pages(&self, limit: usize) -> Vec<Page<Flow>> {
        let mut pages = Vec::new();
        let mut request = PageRequest::first(limit);
        loop {
            let page = self.store.list_public(&request).expect("Failed to list public flows");
            let next = page.next_cursor.clone();
            pages.push(page);
            match next {
                Some(cursor) => request = PageRequest::after(limit, cursor),
                None => break,
            }
            assert!(pages.len() < 1000, "public pagination did not terminate");
        }
        pages
    }

    /// Follow owner cursors to the end, returning every page.
    pub fn owned_pages(&self, owner: &str, limit: usize) -> Vec<Page<Flow>> {
        let mut pages = Vec::new();
        let mut request = PageRequest::first(limit);
        loop {
            let page = self.store.list_owned(owner, &request).expect("Failed to list flows");
            let next = page.next_cursor.clone();
            pages.push(page);
            match next {
                Some(cursor) => request = PageRequest::after(limit, cursor),
                None => break,
            }
            assert!(pages.len() < 1000, "owner pagination did not terminate");
        }
        pages
    }

    /// Assert that pages hold every id in `expected` exactly once.
    pub fn assert_exactly_once(pages: &[Page<Flow>], expected: &[String]) {
        let seen: Vec<&str> = pages.iter().flat_map(|p| p.items.iter().map(|f| f.id.as_str())).collect();
        let unique: HashSet<&str> = seen.iter().copied().collect();
        assert_eq!(unique.len(), seen.len(), "duplicate flows across pages: {:?}", seen);

        let expected: HashSet<&str> = expected.iter().map(String::as_str).collect();
        assert_eq!(unique, expected, "pages did not cover every flow");
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
