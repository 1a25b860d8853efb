//! In-process publish/subscribe between transfer components.
//!
//! Components register interest by *source* ids (hear everything those
//! components broadcast) and/or *destination* ids (hear messages addressed
//! to those ids). Delivery is asynchronous on the [`Scheduler`] pool and
//! unordered across registrants; each `send` reaches a matching registrant
//! exactly once.
//!
//! `unregister` blocks until any in-flight delivery to that registrant has
//! returned, after which the registrant's callback is guaranteed never to
//! run again. Each slot carries a caller count and a condition variable to
//! provide that drain.

use std::sync::Arc;
use std::sync::mpsc::Sender;

use bitflags::bitflags;
use log::warn;
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::sched::Scheduler;

bitflags! {
    /// Component ids used to address bus messages.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CompIds: u32 {
        /// Transfer control side (engine supervisor).
        const TRANSFER_CONTROL = 1 << 0;
        /// Transfer data side (PIO-facing).
        const TRANSFER_DATA = 1 << 1;
        /// Range bookkeeping.
        const DATA_RANGES = 1 << 2;
        /// Command-layer marker emitters.
        const MARKERS = 1 << 3;
    }
}

impl CompIds {
    /// Broadcast destination: every registrant listening on the sender.
    pub const ANY: CompIds = CompIds::all();
}

/// Message payload. Copied (cloned) once per matching registrant.
#[derive(Debug, Clone)]
pub enum MsgBody {
    /// A transfer (or checksum pass) finished with the given result.
    TransferComplete(Result<()>),
    /// A contiguous extent of the transfer completed.
    RangeComplete {
        /// Absolute file offset of the completed extent.
        offset: u64,
        /// Length of the completed extent.
        length: u64,
    },
}

/// A delivered message.
#[derive(Debug)]
pub struct Msg {
    /// Destination mask the sender addressed.
    pub dst: CompIds,
    /// The (single) component id of the sender.
    pub src: CompIds,
    /// The payload.
    pub body: MsgBody,
    /// Where registrant failures are reported, when the sender cares.
    errors: Option<Sender<Error>>,
}

type RecvFn = dyn Fn(&Msg) -> Result<()> + Send + Sync + 'static;

struct Slot {
    id: u64,
    src_ids: CompIds,
    dst_ids: CompIds,
    recv: Arc<RecvFn>,
    state: Arc<SlotState>,
}

#[derive(Default)]
struct SlotState {
    callers: Mutex<CallerCount>,
    cond: Condvar,
}

#[derive(Default)]
struct CallerCount {
    active: usize,
    closed: bool,
}

/// Handle returned by [`MsgBus::register`]; pass to [`MsgBus::unregister`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationId(u64);

struct Shared {
    slots: Mutex<Vec<Slot>>,
    next_id: Mutex<u64>,
    sched: Arc<Scheduler>,
}

/// The bus handle. Clones share the same bus.
#[derive(Clone)]
pub struct MsgBus {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for MsgBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MsgBus")
            .field("registrants", &self.shared.slots.lock().len())
            .finish()
    }
}

impl MsgBus {
    /// Create a bus delivering on `sched`.
    pub fn new(sched: Arc<Scheduler>) -> MsgBus {
        MsgBus {
            shared: Arc::new(Shared {
                slots: Mutex::new(Vec::new()),
                next_id: Mutex::new(0),
                sched,
            }),
        }
    }

    /// Subscribe `recv`.
    ///
    /// The registrant hears messages whose sender is in `src_ids` and whose
    /// destination is [`CompIds::ANY`], plus messages whose destination mask
    /// intersects `dst_ids`. Either mask may be empty.
    pub fn register(
        &self,
        src_ids: CompIds,
        dst_ids: CompIds,
        recv: impl Fn(&Msg) -> Result<()> + Send + Sync + 'static,
    ) -> RegistrationId {
        let mut next = self.shared.next_id.lock();
        let id = *next;
        *next += 1;
        drop(next);

        self.shared.slots.lock().push(Slot {
            id,
            src_ids,
            dst_ids,
            recv: Arc::new(recv),
            state: Arc::new(SlotState::default()),
        });
        RegistrationId(id)
    }

    /// Remove a registrant, blocking until in-flight deliveries drain.
    ///
    /// After this returns the registrant's callback will not be invoked
    /// again and any captured state may be torn down.
    pub fn unregister(&self, id: RegistrationId) {
        let slot = {
            let mut slots = self.shared.slots.lock();
            match slots.iter().position(|s| s.id == id.0) {
                Some(idx) => slots.remove(idx),
                None => return,
            }
        };
        let mut callers = slot.state.callers.lock();
        callers.closed = true;
        while callers.active > 0 {
            slot.state.cond.wait(&mut callers);
        }
    }

    /// Publish a message. Returns once every matching delivery is queued.
    ///
    /// `src` must be a single component id; `dst` is a mask or
    /// [`CompIds::ANY`].
    pub fn send(&self, dst: CompIds, src: CompIds, body: MsgBody) {
        self.send_inner(dst, src, body, None);
    }

    /// As [`MsgBus::send`], but registrant failures are forwarded to
    /// `errors` instead of the log.
    pub fn send_with_errors(&self, dst: CompIds, src: CompIds, body: MsgBody, errors: Sender<Error>) {
        self.send_inner(dst, src, body, Some(errors));
    }

    fn send_inner(&self, dst: CompIds, src: CompIds, body: MsgBody, errors: Option<Sender<Error>>) {
        debug_assert_eq!(src.bits().count_ones(), 1, "sender must be one component");

        // Snapshot matching registrants under the lock, reserving a caller
        // slot on each; deliveries then run without the slots lock held.
        let targets: SmallVec<[(Arc<RecvFn>, Arc<SlotState>); 4]> = {
            let slots = self.shared.slots.lock();
            slots
                .iter()
                .filter(|slot| {
                    if dst == CompIds::ANY {
                        slot.src_ids.intersects(src)
                    } else {
                        slot.dst_ids.intersects(dst)
                    }
                })
                .filter(|slot| {
                    let mut callers = slot.state.callers.lock();
                    if callers.closed {
                        return false;
                    }
                    callers.active += 1;
                    true
                })
                .map(|slot| (Arc::clone(&slot.recv), Arc::clone(&slot.state)))
                .collect()
        };

        for (recv, state) in targets {
            let msg = Msg { dst, src, body: body.clone(), errors: errors.clone() };
            self.shared.sched.spawn_oneshot(move || {
                deliver(&*recv, &state, msg);
            });
        }
    }
}

fn deliver(recv: &RecvFn, state: &SlotState, msg: Msg) {
    if let Err(err) = recv(&msg) {
        match &msg.errors {
            Some(tx) => {
                let _ = tx.send(err);
            }
            None => warn!("bus registrant failed: {err}"),
        }
    }
    let mut callers = state.callers.lock();
    callers.active -= 1;
    if callers.active == 0 {
        state.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn wait_for(what: &str, cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn delivers_to_destination_mask() {
        let bus = MsgBus::new(Scheduler::new(2).unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        bus.register(CompIds::empty(), CompIds::MARKERS, move |_msg| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        bus.send(
            CompIds::MARKERS,
            CompIds::DATA_RANGES,
            MsgBody::RangeComplete { offset: 0, length: 10 },
        );
        wait_for("delivery", || hits.load(Ordering::SeqCst) == 1);

        // A disjoint destination must not reach the registrant.
        bus.send(
            CompIds::TRANSFER_CONTROL,
            CompIds::DATA_RANGES,
            MsgBody::RangeComplete { offset: 10, length: 10 },
        );
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn broadcast_matches_source_subscription() {
        let bus = MsgBus::new(Scheduler::new(2).unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        bus.register(CompIds::TRANSFER_CONTROL, CompIds::empty(), move |_msg| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        bus.send(CompIds::ANY, CompIds::TRANSFER_CONTROL, MsgBody::TransferComplete(Ok(())));
        wait_for("broadcast", || hits.load(Ordering::SeqCst) == 1);
    }

    #[test]
    fn unregister_drains_in_flight_delivery() {
        let bus = MsgBus::new(Scheduler::new(2).unwrap());
        let entered = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let (e, f) = (Arc::clone(&entered), Arc::clone(&finished));
        let id = bus.register(CompIds::empty(), CompIds::MARKERS, move |_msg| {
            e.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            f.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        bus.send(
            CompIds::MARKERS,
            CompIds::DATA_RANGES,
            MsgBody::RangeComplete { offset: 0, length: 1 },
        );
        wait_for("callback entry", || entered.load(Ordering::SeqCst) == 1);
        bus.unregister(id);
        // Drain semantics: once unregister returns, the slow callback has
        // finished.
        assert_eq!(finished.load(Ordering::SeqCst), 1);

        bus.send(
            CompIds::MARKERS,
            CompIds::DATA_RANGES,
            MsgBody::RangeComplete { offset: 1, length: 1 },
        );
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(entered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn registrant_failure_reaches_result_channel() {
        let bus = MsgBus::new(Scheduler::new(1).unwrap());
        bus.register(CompIds::empty(), CompIds::TRANSFER_CONTROL, |_msg| {
            Err(Error::Cancelled)
        });
        let (tx, rx) = std::sync::mpsc::channel();
        bus.send_with_errors(
            CompIds::TRANSFER_CONTROL,
            CompIds::TRANSFER_DATA,
            MsgBody::TransferComplete(Ok(())),
            tx,
        );
        let err = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(err, Error::Cancelled);
    }
}
