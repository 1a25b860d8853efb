//! Ordered list of (offset, length) extents a transfer still owes its peer,
//! plus the merged set of extents already completed (the source of restart
//! markers and range-complete messages).

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::msg::{CompIds, MsgBody, MsgBus};

/// Length value meaning "to end of file".
pub const LENGTH_TO_EOF: i64 = -1;

/// A pending extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    /// Absolute file offset.
    pub offset: u64,
    /// Extent length; [`LENGTH_TO_EOF`] means "to end of file".
    pub length: i64,
}

struct Inner {
    pending: VecDeque<Range>,
    completed: Vec<(u64, u64)>,
}

/// The range list. All operations are atomic with respect to each other.
pub struct RangeList {
    inner: Mutex<Inner>,
    bus: Option<MsgBus>,
}

impl std::fmt::Debug for RangeList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("RangeList")
            .field("pending", &inner.pending.len())
            .field("completed", &inner.completed.len())
            .finish()
    }
}

impl RangeList {
    /// An empty list that keeps completions to itself.
    pub fn new() -> RangeList {
        RangeList {
            inner: Mutex::new(Inner { pending: VecDeque::new(), completed: Vec::new() }),
            bus: None,
        }
    }

    /// An empty list that publishes a range-complete message for every
    /// recorded completion, as [`CompIds::DATA_RANGES`].
    pub fn with_bus(bus: MsgBus) -> RangeList {
        RangeList { bus: Some(bus), ..RangeList::new() }
    }

    /// Append an extent to the tail.
    pub fn push_tail(&self, offset: u64, length: i64) {
        self.inner.lock().pending.push_back(Range { offset, length });
    }

    /// Remove and return the head extent, if any.
    pub fn pop_head(&self) -> Option<Range> {
        self.inner.lock().pending.pop_front()
    }

    /// True when no extents remain.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().pending.is_empty()
    }

    /// Record `(offset, length)` as transferred.
    ///
    /// Merges into the completed set (adjacent and overlapping extents
    /// coalesce) and publishes a range-complete message when the list was
    /// built with a bus.
    pub fn record_completed(&self, offset: u64, length: u64) {
        if length == 0 {
            return;
        }
        {
            let mut inner = self.inner.lock();
            merge(&mut inner.completed, offset, length);
        }
        if let Some(bus) = &self.bus {
            bus.send(
                CompIds::ANY,
                CompIds::DATA_RANGES,
                MsgBody::RangeComplete { offset, length },
            );
        }
    }

    /// Snapshot of the merged completed extents, in offset order.
    pub fn completed(&self) -> Vec<(u64, u64)> {
        self.inner.lock().completed.clone()
    }

    /// Snapshot of the pending extents, head first.
    pub fn pending(&self) -> Vec<Range> {
        self.inner.lock().pending.iter().copied().collect()
    }
}

impl Default for RangeList {
    fn default() -> Self {
        RangeList::new()
    }
}

/// Insert `(offset, length)` into the sorted disjoint extent set,
/// coalescing with neighbors.
fn merge(set: &mut Vec<(u64, u64)>, offset: u64, length: u64) {
    let end = offset + length;
    let idx = set.partition_point(|&(o, _)| o < offset);

    let mut start = offset;
    let mut stop = end;
    let mut first = idx;
    let mut last = idx;

    // Swallow a predecessor that touches or overlaps us.
    if idx > 0 {
        let (po, pl) = set[idx - 1];
        if po + pl >= offset {
            start = po;
            stop = stop.max(po + pl);
            first = idx - 1;
        }
    }
    // Swallow successors up to the first one past our end.
    while last < set.len() {
        let (no, nl) = set[last];
        if no > stop {
            break;
        }
        stop = stop.max(no + nl);
        last += 1;
    }

    set.splice(first..last, [(start, stop - start)]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let list = RangeList::new();
        list.push_tail(0, 100);
        list.push_tail(200, LENGTH_TO_EOF);
        list.push_tail(100, 50);
        assert_eq!(list.pop_head(), Some(Range { offset: 0, length: 100 }));
        assert_eq!(list.pop_head(), Some(Range { offset: 200, length: LENGTH_TO_EOF }));
        assert_eq!(list.pop_head(), Some(Range { offset: 100, length: 50 }));
        assert_eq!(list.pop_head(), None);
        assert!(list.is_empty());
    }

    #[test]
    fn completed_merges_adjacent() {
        let list = RangeList::new();
        list.record_completed(0, 10);
        list.record_completed(10, 10);
        assert_eq!(list.completed(), vec![(0, 20)]);
    }

    #[test]
    fn completed_merge_is_order_independent() {
        // Non-overlapping intervals recorded in either order produce the
        // same set.
        let forward = RangeList::new();
        forward.record_completed(0, 5);
        forward.record_completed(20, 5);
        forward.record_completed(5, 15);

        let backward = RangeList::new();
        backward.record_completed(5, 15);
        backward.record_completed(20, 5);
        backward.record_completed(0, 5);

        assert_eq!(forward.completed(), vec![(0, 25)]);
        assert_eq!(forward.completed(), backward.completed());
    }

    #[test]
    fn completed_keeps_gaps_apart() {
        let list = RangeList::new();
        list.record_completed(0, 10);
        list.record_completed(30, 10);
        assert_eq!(list.completed(), vec![(0, 10), (30, 10)]);
        list.record_completed(10, 5);
        assert_eq!(list.completed(), vec![(0, 15), (30, 10)]);
    }

    #[test]
    fn overlap_coalesces() {
        let list = RangeList::new();
        list.record_completed(0, 10);
        list.record_completed(5, 20);
        assert_eq!(list.completed(), vec![(0, 25)]);
    }

    #[test]
    fn zero_length_completion_is_ignored() {
        let list = RangeList::new();
        list.record_completed(5, 0);
        assert!(list.completed().is_empty());
    }
}
