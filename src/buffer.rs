//! Ordered pool of fixed-size transfer buffers.
//!
//! The pool is shared between the PIO participant and the network side of a
//! transfer. Every buffer belongs to one *private list* (one per
//! thread/consumer), is either `Free` or `Ready(offset, length)`, and may be
//! checked out ("in use") by exactly one holder at a time. Entries are kept
//! sorted by (private id, state, offset) so "next ready buffer" lookups walk
//! the pool in delivery order.
//!
//! Checked-out buffers physically leave the pool: the holder owns the bytes
//! as a [`Buffer`] until it stores them back. The one exception is a
//! *flagged* buffer, which parks its bytes in the pool while remaining in
//! use, so the flagged search — and only the flagged search — can hand it to
//! another party.

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Identifies a private sub-list within a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PrivateId(u32);

/// Stable identity of a pool entry, assigned at allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(u64);

/// Offset value meaning "no offset"; free buffers carry it.
const NO_OFFSET: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum State {
    Free,
    Ready,
}

/// A buffer checked out of the pool.
///
/// Owns the allocation until it is stored back with one of the `store_*`
/// or `flag_buffer` calls.
#[derive(Debug)]
pub struct Buffer {
    id: BufferId,
    data: Box<[u8]>,
}

impl Buffer {
    /// The pool identity of this buffer.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// The full allocation.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// The full allocation, writable.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

struct Entry {
    id: BufferId,
    pid: PrivateId,
    state: State,
    offset: i64,
    length: i64,
    flagged: bool,
    in_use: bool,
    stored: Option<(u64, u64)>,
    /// `Some` while the bytes are parked here, `None` while checked out.
    data: Option<Box<[u8]>>,
}

impl Entry {
    fn sort_key(&self) -> (PrivateId, State, i64) {
        (self.pid, self.state, self.offset)
    }
}

struct Inner {
    alloc_size: usize,
    next_pid: u32,
    next_id: u64,
    entries: Vec<Entry>,
}

impl Inner {
    fn position(&self, id: BufferId) -> usize {
        self.entries
            .iter()
            .position(|e| e.id == id)
            .expect("buffer does not belong to this pool")
    }

    /// Re-insert `entries[idx]` at its ordered position after a key change.
    fn reposition(&mut self, idx: usize) {
        let entry = self.entries.remove(idx);
        let key = entry.sort_key();
        let at = self
            .entries
            .iter()
            .position(|e| e.sort_key() >= key)
            .unwrap_or(self.entries.len());
        self.entries.insert(at, entry);
    }

    fn check_out(&mut self, idx: usize) -> Buffer {
        let entry = &mut self.entries[idx];
        entry.in_use = true;
        let data = entry.data.take().expect("buffer bytes already checked out");
        Buffer { id: entry.id, data }
    }
}

/// The pool handle. Cheap to share behind an `Arc`; all operations lock a
/// single mutex for a short critical section.
pub struct BufferPool {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BufferPool")
            .field("alloc_size", &inner.alloc_size)
            .field("entries", &inner.entries.len())
            .finish()
    }
}

impl BufferPool {
    /// Create a pool whose buffers are `alloc_size` bytes each.
    pub fn new(alloc_size: usize) -> BufferPool {
        BufferPool {
            inner: Mutex::new(Inner {
                alloc_size,
                next_pid: 0,
                next_id: 0,
                entries: Vec::new(),
            }),
        }
    }

    /// The fixed allocation size of this pool.
    pub fn alloc_size(&self) -> usize {
        self.inner.lock().alloc_size
    }

    /// Reserve a fresh private-list id, unique within the pool.
    pub fn create_private_list(&self) -> PrivateId {
        let mut inner = self.inner.lock();
        let id = PrivateId(inner.next_pid);
        inner.next_pid += 1;
        id
    }

    /// Allocate a new buffer on `pid`'s list.
    ///
    /// The buffer starts `Free` and checked out to the caller.
    pub fn allocate_buffer(&self, pid: PrivateId) -> Result<Buffer> {
        let mut inner = self.inner.lock();
        let size = inner.alloc_size;
        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|_| Error::OutOfMemory("transfer buffer"))?;
        data.resize(size, 0);

        let id = BufferId(inner.next_id);
        inner.next_id += 1;
        let entry = Entry {
            id,
            pid,
            state: State::Free,
            offset: NO_OFFSET,
            length: size as i64,
            flagged: false,
            in_use: true,
            stored: None,
            data: None,
        };
        let key = entry.sort_key();
        let at = inner
            .entries
            .iter()
            .position(|e| e.sort_key() >= key)
            .unwrap_or(inner.entries.len());
        inner.entries.insert(at, entry);
        Ok(Buffer { id, data: data.into_boxed_slice() })
    }

    /// Check out a free buffer from `pid`'s list, if any.
    pub fn get_free_buffer(&self, pid: PrivateId) -> Option<Buffer> {
        let mut inner = self.inner.lock();
        let idx = inner
            .entries
            .iter()
            .position(|e| e.pid == pid && !e.in_use && e.state == State::Free)?;
        Some(inner.check_out(idx))
    }

    /// Check out the ready buffer at exactly `offset`, if present.
    ///
    /// Returns the buffer and its ready length.
    pub fn get_ready_buffer_at_offset(&self, pid: PrivateId, offset: u64) -> Option<(Buffer, u64)> {
        let mut inner = self.inner.lock();
        let idx = inner.entries.iter().position(|e| {
            e.pid == pid && !e.in_use && e.state == State::Ready && e.offset == offset as i64
        })?;
        let length = self.ready_length(&inner.entries[idx]);
        Some((inner.check_out(idx), length))
    }

    /// Check out a flagged buffer from `pid`'s list, if any.
    ///
    /// This is the only search that considers in-use buffers: a flagged
    /// buffer was parked by its holder for someone else to pick up. Returns
    /// the buffer with its offset and length.
    pub fn get_flagged_buffer(&self, pid: PrivateId) -> Option<(Buffer, i64, i64)> {
        let mut inner = self.inner.lock();
        let idx = inner
            .entries
            .iter()
            .position(|e| e.pid == pid && e.flagged && e.data.is_some())?;
        let (offset, length) = {
            let e = &inner.entries[idx];
            (e.offset, e.length)
        };
        Some((inner.check_out(idx), offset, length))
    }

    /// Return `buffer` to the pool as free and available.
    pub fn store_free_buffer(&self, pid: PrivateId, buffer: Buffer) {
        let mut inner = self.inner.lock();
        let idx = inner.position(buffer.id);
        let alloc = inner.alloc_size as i64;
        let entry = &mut inner.entries[idx];
        entry.pid = pid;
        entry.state = State::Free;
        entry.offset = NO_OFFSET;
        entry.length = alloc;
        entry.in_use = false;
        entry.data = Some(buffer.data);
        inner.reposition(idx);
    }

    /// Return `buffer` to the pool as ready at `(offset, length)`.
    pub fn store_ready_buffer(&self, pid: PrivateId, buffer: Buffer, offset: u64, length: u64) {
        let mut inner = self.inner.lock();
        let idx = inner.position(buffer.id);
        let entry = &mut inner.entries[idx];
        entry.pid = pid;
        entry.state = State::Ready;
        entry.offset = offset as i64;
        entry.length = length as i64;
        entry.in_use = false;
        entry.data = Some(buffer.data);
        inner.reposition(idx);
    }

    /// Reclassify a checked-out buffer as ready without releasing it.
    pub fn set_buffer_ready(&self, pid: PrivateId, buffer: &Buffer, offset: u64, length: u64) {
        let mut inner = self.inner.lock();
        let idx = inner.position(buffer.id);
        let entry = &mut inner.entries[idx];
        entry.pid = pid;
        entry.state = State::Ready;
        entry.offset = offset as i64;
        entry.length = length as i64;
        inner.reposition(idx);
    }

    /// Reclassify a checked-out buffer as free without releasing it.
    ///
    /// Returns the usable length (the pool allocation size).
    pub fn set_buffer_free(&self, pid: PrivateId, buffer: &Buffer) -> usize {
        let mut inner = self.inner.lock();
        let idx = inner.position(buffer.id);
        let alloc = inner.alloc_size;
        let entry = &mut inner.entries[idx];
        entry.pid = pid;
        entry.state = State::Free;
        entry.offset = NO_OFFSET;
        entry.length = alloc as i64;
        inner.reposition(idx);
        alloc
    }

    /// Park `buffer` in the pool flagged for out-of-band pickup.
    ///
    /// The buffer stays in use; only [`BufferPool::get_flagged_buffer`]
    /// will return it.
    pub fn flag_buffer(&self, pid: PrivateId, buffer: Buffer) {
        let mut inner = self.inner.lock();
        let idx = inner.position(buffer.id);
        let entry = &mut inner.entries[idx];
        entry.pid = pid;
        entry.flagged = true;
        entry.data = Some(buffer.data);
        inner.reposition(idx);
    }

    /// Drop the out-of-band flag from a checked-out buffer.
    pub fn clear_flag(&self, pid: PrivateId, buffer: &Buffer) {
        let mut inner = self.inner.lock();
        let idx = inner.position(buffer.id);
        let entry = &mut inner.entries[idx];
        entry.pid = pid;
        entry.flagged = false;
    }

    /// Remember an (offset, length) pair on the buffer's scratchpad.
    ///
    /// Used by the engines to pin a pending range to a buffer that is about
    /// to be handed away.
    pub fn store_offset_length(&self, buffer: &Buffer, offset: u64, length: u64) {
        let mut inner = self.inner.lock();
        let idx = inner.position(buffer.id);
        inner.entries[idx].stored = Some((offset, length));
    }

    /// Read back the scratchpad pair, if set.
    pub fn get_stored_offset_length(&self, buffer: &Buffer) -> Option<(u64, u64)> {
        let inner = self.inner.lock();
        let idx = inner.position(buffer.id);
        inner.entries[idx].stored
    }

    /// Clear the scratchpad pair.
    pub fn clear_stored_offset_length(&self, buffer: &Buffer) {
        let mut inner = self.inner.lock();
        let idx = inner.position(buffer.id);
        inner.entries[idx].stored = None;
    }

    /// Number of ready, available buffers on `pid`'s list.
    ///
    /// Inspection only; used by the engines for backpressure decisions.
    pub fn ready_buffer_count(&self, pid: PrivateId) -> usize {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .filter(|e| e.pid == pid && !e.in_use && e.state == State::Ready)
            .count()
    }

    fn ready_length(&self, entry: &Entry) -> u64 {
        debug_assert!(entry.length >= 0);
        entry.length as u64
    }

    #[cfg(test)]
    fn assert_sorted(&self) {
        let inner = self.inner.lock();
        for pair in inner.entries.windows(2) {
            assert!(pair[0].sort_key() <= pair[1].sort_key(), "pool order violated");
        }
    }
}
