//! Flowline: exhibition flows with timeline lanes and cursor-paged listings.
//!
//! Flows are documented art events (exhibitions, research, curations) that
//! carry a node graph and optional dates. They live in a single-table
//! key-value store; dated flows can be laid out as non-overlapping
//! timeline lanes.
//!
//! # Example
//!
//! ```no_run
//! use flowline::{FlowStore, MemoryKv, PageRequest, SaveFlow, assign_lanes};
//!
//! let mut store = FlowStore::new(MemoryKv::new());
//!
//! store.save("alice", SaveFlow::new("fl-1", "Spring show"), None).unwrap();
//! store.save("alice", SaveFlow::new("fl-2", "Archive visit"), None).unwrap();
//!
//! // Page through the owner's flows
//! let page = store.list_owned("alice", &PageRequest::first(10)).unwrap();
//! assert_eq!(page.items.len(), 2);
//! assert!(!page.has_more);
//!
//! // Lay out whatever is dated
//! let flows = store.collect_public(10).unwrap();
//! let layout = assign_lanes(&flows);
//! assert_eq!(layout.undated.len(), 2);
//! ```

mod cursor;
mod id;
mod kv;
mod lanes;
mod pagination;
mod storage;
mod store;
mod types;

pub mod auth;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod service;

// Re-export public API
pub use auth::{Authenticator, Identity, TokenEntry, TokenTable, bearer_token};
pub use config::Config;
pub use cursor::{decode as decode_cursor, encode as encode_cursor};
pub use error::{FlowError, classify, flow_error};
pub use id::generate_flow_id;
pub use kv::{Key, KvItem, KvPage, KvStore, MemoryKv, SortOrder};
pub use lanes::{Interval, LaneLayout, Rejected, assign_lanes};
pub use pagination::{
    Accumulated, Batch, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT, Page, PageLimits, PageRequest, WindowPosition,
    accumulate, parse_limit, slice_window,
};
pub use protocol::{Request, Response};
pub use server::{Server, is_server_running, stop_server};
pub use service::Service;
pub use storage::{DEFAULT_STORE_TIMEOUT, SqliteKv};
pub use store::{FlowStore, SaveFlow};
pub use types::{Category, Flow, Graph, MAX_TITLE_LEN, UserProfile, ValidationError, validate_id};
