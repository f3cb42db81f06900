//! Page requests, pages, and the accumulate-then-sort helper used when a
//! source cannot return items in the order callers want.

use eyre::Result;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Default page size.
pub const DEFAULT_PAGE_LIMIT: usize = 10;

/// Largest page a caller can ask for.
pub const MAX_PAGE_LIMIT: usize = 100;

/// Page size bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub default: usize,
    pub max: usize,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default: DEFAULT_PAGE_LIMIT,
            max: MAX_PAGE_LIMIT,
        }
    }
}

/// A caller's request for one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: usize,
    pub cursor: Option<String>,
}

impl PageRequest {
    /// First page of the given size, clamped to `1..=MAX_PAGE_LIMIT`.
    pub fn first(limit: usize) -> Self {
        Self {
            limit: limit.clamp(1, MAX_PAGE_LIMIT),
            cursor: None,
        }
    }

    /// Continue from a cursor.
    pub fn after(limit: usize, cursor: impl Into<String>) -> Self {
        Self {
            limit: limit.clamp(1, MAX_PAGE_LIMIT),
            cursor: Some(cursor.into()),
        }
    }

    /// Build from raw query parameters. Absent, non-numeric and
    /// non-positive limits fall back to the default; large ones are clamped.
    /// An empty cursor means the first page.
    pub fn from_params(limit: Option<&str>, cursor: Option<&str>, limits: PageLimits) -> Self {
        Self {
            limit: parse_limit(limit, limits),
            cursor: cursor.map(str::trim).filter(|c| !c.is_empty()).map(String::from),
        }
    }
}

/// Parse a `limit` query parameter.
pub fn parse_limit(raw: Option<&str>, limits: PageLimits) -> usize {
    match raw.map(str::trim).and_then(|s| s.parse::<i64>().ok()) {
        Some(n) if n > 0 => usize::try_from(n)
            .unwrap_or(usize::MAX)
            .min(limits.max.clamp(1, MAX_PAGE_LIMIT)),
        _ => limits.default.clamp(1, MAX_PAGE_LIMIT),
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
    /// Present only when `has_more`.
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            has_more: false,
            next_cursor: None,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            has_more: self.has_more,
            next_cursor: self.next_cursor,
        }
    }
}

/// One fetch from a page source.
#[derive(Debug, Clone)]
pub struct Batch<T, P> {
    pub items: Vec<T>,
    /// Where the source would resume, if it has more.
    pub next: Option<P>,
}

/// Candidates gathered over one or more fetches, sorted.
#[derive(Debug, Clone)]
pub struct Accumulated<T, P> {
    pub items: Vec<T>,
    /// Source position after the last fetch.
    pub next: Option<P>,
    /// Number of fetches issued.
    pub fetches: usize,
}

/// Fetch from `start` until at least `target` candidates are held or the
/// source is exhausted, then sort them with `cmp` (stable).
///
/// The first fetch asks for `first_batch` items, later ones for
/// `next_batch`. Fetches are sequential: each resumes from the position the
/// previous one returned.
pub fn accumulate<T, P, F, C>(
    start: Option<&P>,
    target: usize,
    first_batch: usize,
    next_batch: usize,
    mut fetch: F,
    cmp: C,
) -> Result<Accumulated<T, P>>
where
    F: FnMut(Option<&P>, usize) -> Result<Batch<T, P>>,
    C: FnMut(&T, &T) -> Ordering,
{
    let first = fetch(start, first_batch)?;
    let mut items = first.items;
    let mut next = first.next;
    let mut fetches = 1;

    while items.len() < target {
        let Some(position) = next.take() else {
            break;
        };
        let batch = fetch(Some(&position), next_batch)?;
        items.extend(batch.items);
        next = batch.next;
        fetches += 1;
    }

    items.sort_by(cmp);

    Ok(Accumulated { items, next, fetches })
}

/// Position inside an accumulated window: the source position the window
/// was gathered from, how many sorted items were already handed out, and
/// the page size the window was gathered with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowPosition<P> {
    #[serde(rename = "s")]
    pub start: Option<P>,
    #[serde(rename = "o")]
    pub offset: usize,
    #[serde(rename = "w")]
    pub window: usize,
}

impl<P> WindowPosition<P> {
    pub fn origin(window: usize) -> Self {
        Self {
            start: None,
            offset: 0,
            window,
        }
    }
}

/// Cut one page out of a window gathered from `position.start`. The next
/// position stays in this window while it has items left, then moves to
/// the source continuation.
pub fn slice_window<T, P>(
    window: Accumulated<T, P>,
    position: WindowPosition<P>,
    limit: usize,
) -> (Vec<T>, Option<WindowPosition<P>>) {
    let total = window.items.len();
    let end = position.offset.saturating_add(limit);
    let items: Vec<T> = window.items.into_iter().skip(position.offset).take(limit).collect();

    let next = if end < total {
        Some(WindowPosition {
            start: position.start,
            offset: end,
            window: position.window,
        })
    } else {
        window.next.map(|source| WindowPosition {
            start: Some(source),
            offset: 0,
            window: limit,
        })
    };

    (items, next)
}
