//! Timeline lane layout.
//!
//! Greedy interval partitioning: events sorted by start (stable), each
//! placed in the first lane whose last event ended at or before it starts.
//! The lane count equals the largest number of events overlapping at one
//! instant.

use crate::types::{Flow, ValidationError};
use chrono::{DateTime, Utc};

/// Anything with an optional time span.
pub trait Interval {
    fn start(&self) -> Option<DateTime<Utc>>;
    fn end(&self) -> Option<DateTime<Utc>>;
}

impl Interval for Flow {
    fn start(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    fn end(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }
}

impl<T: Interval + ?Sized> Interval for &T {
    fn start(&self) -> Option<DateTime<Utc>> {
        (**self).start()
    }

    fn end(&self) -> Option<DateTime<Utc>> {
        (**self).end()
    }
}

/// An event left out of the layout because its span is inverted.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected<'a, T> {
    /// Position in the input.
    pub index: usize,
    pub event: &'a T,
    pub error: ValidationError,
}

/// Result of laying out a set of events.
#[derive(Debug, Clone, PartialEq)]
pub struct LaneLayout<'a, T> {
    /// Lanes in creation order, each sorted by start.
    pub lanes: Vec<Vec<&'a T>>,
    /// Events missing a start or an end, in input order.
    pub undated: Vec<&'a T>,
    /// Events whose start is after their end, in input order.
    pub rejected: Vec<Rejected<'a, T>>,
}

impl<'a, T: Interval> LaneLayout<'a, T> {
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Earliest start and latest end over the laid-out events.
    pub fn span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let placed = self.lanes.iter().flatten();
        let min = placed.clone().filter_map(|e| e.start()).min()?;
        let max = placed.filter_map(|e| e.end()).max()?;
        Some((min, max))
    }
}

/// Assign events to lanes.
///
/// Never fails as a whole: undated events and events with an inverted span
/// are reported next to the lanes, and everything else is placed.
pub fn assign_lanes<T: Interval>(events: &[T]) -> LaneLayout<'_, T> {
    let mut undated = Vec::new();
    let mut rejected = Vec::new();
    let mut dated: Vec<(DateTime<Utc>, DateTime<Utc>, &T)> = Vec::with_capacity(events.len());

    for (index, event) in events.iter().enumerate() {
        match (event.start(), event.end()) {
            (Some(start), Some(end)) if start > end => {
                log::warn!("Event at index {} has start {} after end {}", index, start, end);
                rejected.push(Rejected {
                    index,
                    event,
                    error: ValidationError::InvalidTimeRange { start, end },
                });
            }
            (Some(start), Some(end)) => dated.push((start, end, event)),
            _ => undated.push(event),
        }
    }

    // sort_by_key is stable: equal starts keep input order
    dated.sort_by_key(|(start, _, _)| *start);

    let mut lanes: Vec<Vec<&T>> = Vec::new();
    let mut lane_ends: Vec<DateTime<Utc>> = Vec::new();

    for (start, end, event) in dated {
        match lane_ends.iter().position(|lane_end| *lane_end <= start) {
            Some(i) => {
                lanes[i].push(event);
                lane_ends[i] = end;
            }
            None => {
                lanes.push(vec![event]);
                lane_ends.push(end);
            }
        }
    }

    LaneLayout {
        lanes,
        undated,
        rejected,
    }
}
