//! The write (STOR) engine: peer to storage.
//!
//! Opens the file create/truncate with allocation hints sized to the
//! announced transfer, drives a PIO WRITE session, and feeds the callout
//! from inbound network chunks. Chunks may arrive in any order; the pool
//! holds them ready at their offsets until the storage library asks for
//! those bytes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::buffer::{Buffer, BufferPool, PrivateId};
use crate::error::{Error, Result};
use crate::gridftp::{ServerOps, TransferInfo};
use crate::hss::{CosHints, CosPriorities, HintPriority, Hss, OpenFlags, PioFragment, PioOp};
use crate::msg::{CompIds, MsgBody, MsgBus};
use crate::pio::{Pio, PioConfig, ResultSlot};
use crate::range_list::RangeList;

/// Per-session allocation preferences consulted at open time.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocPrefs {
    /// Class-of-service id to create in.
    pub cos_id: Option<u32>,
    /// Tape family id to create in.
    pub family_id: Option<u32>,
}

struct EngineShared {
    pool: Arc<BufferPool>,
    pid: PrivateId,
    slot: Arc<ResultSlot>,
    ranges: Arc<RangeList>,
    outstanding: AtomicUsize,
    eof: AtomicBool,
    failing: AtomicBool,
    wake: Mutex<()>,
    cond: Condvar,
}

impl EngineShared {
    fn notify(&self) {
        let _guard = self.wake.lock();
        self.cond.notify_all();
    }
}

/// Run a recv operation to completion.
///
/// Blocks for the duration of the transfer and reports through
/// [`ServerOps::finished_transfer`] exactly once. Callers normally spawn
/// this on its own thread.
pub fn run(
    hss: Arc<dyn Hss>,
    server: Arc<dyn ServerOps>,
    bus: MsgBus,
    info: &TransferInfo,
    prefs: AllocPrefs,
) {
    let result = transfer(hss, Arc::clone(&server), bus.clone(), info, prefs);
    bus.send(
        CompIds::ANY,
        CompIds::TRANSFER_CONTROL,
        MsgBody::TransferComplete(result.clone()),
    );
    server.finished_transfer(result);
}

fn open_for_writing(
    hss: &dyn Hss,
    info: &TransferInfo,
    prefs: AllocPrefs,
) -> Result<(crate::hss::HssFd, CosHints)> {
    let hints = CosHints {
        min_file_size: info.alloc_size,
        max_file_size: info.alloc_size,
        cos_id: prefs.cos_id,
        family_id: prefs.family_id,
        stripe_width: 0,
    };
    let priorities = CosPriorities {
        min_file_size: HintPriority::Required,
        max_file_size: HintPriority::HighlyDesired,
        cos_id: if prefs.cos_id.is_some() { HintPriority::Required } else { HintPriority::Ignore },
        family_id: if prefs.family_id.is_some() {
            HintPriority::Required
        } else {
            HintPriority::Ignore
        },
    };
    let mut flags = OpenFlags::WRITE | OpenFlags::CREATE;
    if info.truncate {
        flags |= OpenFlags::TRUNCATE;
    }
    hss.open(&info.pathname, flags, &hints, &priorities)
}

fn transfer(
    hss: Arc<dyn Hss>,
    server: Arc<dyn ServerOps>,
    bus: MsgBus,
    info: &TransferInfo,
    prefs: AllocPrefs,
) -> Result<()> {
    if info.alloc_size == 0 {
        // Nothing will arrive; create the (empty) file and finish without
        // spawning a session.
        let (fd, _) = open_for_writing(&*hss, info, prefs)?;
        server.begin_transfer();
        return hss.close(fd);
    }

    let (fd, hints_out) = open_for_writing(&*hss, info, prefs)?;

    let outcome = (|| {
        let block_size = server.block_size();
        let concurrency = server.optimal_concurrency().max(1);

        let pool = Arc::new(BufferPool::new(block_size as usize));
        let pid = pool.create_private_list();
        for _ in 0..concurrency {
            let buf = pool.allocate_buffer(pid)?;
            pool.store_free_buffer(pid, buf);
        }

        let ranges = Arc::new(RangeList::with_bus(bus));
        ranges.push_tail(info.partial_offset, info.alloc_size as i64);

        let shared = Arc::new(EngineShared {
            pool: Arc::clone(&pool),
            pid,
            slot: Arc::new(ResultSlot::new()),
            ranges: Arc::clone(&ranges),
            outstanding: AtomicUsize::new(0),
            eof: AtomicBool::new(false),
            failing: AtomicBool::new(false),
            wake: Mutex::new(()),
            cond: Condvar::new(),
        });

        let pio = Pio::init(
            Arc::clone(&hss),
            PioConfig {
                op: PioOp::Write,
                fd,
                file_stripe_width: hints_out.stripe_width.max(1),
                block_size,
            },
        )?;

        server.begin_transfer();

        let callout_shared = Arc::clone(&shared);
        let callout_server = Arc::clone(&server);
        let running = pio.start(
            Arc::clone(&ranges),
            vec![0u8; block_size as usize],
            Box::new(move |frag| callout(&callout_shared, &callout_server, frag)),
        )?;

        let report = running.join();
        shared.failing.store(true, Ordering::SeqCst);

        // Wait for the reads still registered with the framework, then
        // reclaim anything parked flagged by the late callbacks.
        {
            let mut guard = shared.wake.lock();
            while shared.outstanding.load(Ordering::SeqCst) > 0 {
                shared.cond.wait(&mut guard);
            }
        }
        while let Some((buf, _, _)) = pool.get_flagged_buffer(pid) {
            pool.clear_flag(pid, &buf);
            pool.store_free_buffer(pid, buf);
        }

        debug!("stor drained: completed {:?}", ranges.completed());

        report.merged()?;
        shared.slot.to_result()
    })();

    let close_result = hss.close(fd);
    outcome.and(close_result)
}

fn callout(
    shared: &Arc<EngineShared>,
    server: &Arc<dyn ServerOps>,
    frag: PioFragment<'_>,
) -> Result<()> {
    let PioFragment::Write { offset, buf } = frag else {
        return Err(Error::InvalidArgument("read fragment on a write session".to_string()));
    };

    enum Next {
        Chunk(Buffer, usize),
        Failed(Error),
        Short,
    }

    let mut filled = 0usize;
    while filled < buf.len() {
        let want = offset + filled as u64;

        // Every state change (chunk landed, error recorded, stream ended)
        // notifies under the wake lock, so checking while holding it cannot
        // miss a wakeup.
        let next = {
            let mut guard = shared.wake.lock();
            loop {
                if let Some((b, len)) = shared.pool.get_ready_buffer_at_offset(shared.pid, want) {
                    break Next::Chunk(b, len as usize);
                }
                if let Some(err) = shared.slot.get() {
                    break Next::Failed(err);
                }
                if shared.eof.load(Ordering::SeqCst)
                    && shared.outstanding.load(Ordering::SeqCst) == 0
                {
                    // No chunk at this offset and none can still arrive.
                    break Next::Short;
                }
                if let Err(err) = post_reads(shared, server) {
                    break Next::Failed(err);
                }
                shared.cond.wait(&mut guard);
            }
        };

        match next {
            Next::Chunk(mut ready, len) => {
                let space = buf.len() - filled;
                let take = len.min(space);
                buf[filled..filled + take].copy_from_slice(&ready.bytes()[..take]);
                filled += take;
                if take < len {
                    // The chunk runs past what this callout can accept;
                    // slide the remainder to the front and put it back
                    // ready at its new offset.
                    ready.bytes_mut().copy_within(take..len, 0);
                    shared.pool.store_ready_buffer(
                        shared.pid,
                        ready,
                        want + take as u64,
                        (len - take) as u64,
                    );
                } else {
                    shared.pool.store_free_buffer(shared.pid, ready);
                }
            }
            Next::Failed(err) => return Err(err),
            Next::Short => {
                // The peer stopped short of the announced length.
                let err = Error::Peer(format!("inbound stream ended before offset {want}"));
                shared.slot.set(err.clone());
                return Err(err);
            }
        }
    }

    shared.ranges.record_completed(offset, buf.len() as u64);
    Ok(())
}

/// Saturate the framework with read registrations, one per free buffer.
fn post_reads(shared: &Arc<EngineShared>, server: &Arc<dyn ServerOps>) -> Result<()> {
    if shared.eof.load(Ordering::SeqCst) {
        return Ok(());
    }
    while let Some(buf) = shared.pool.get_free_buffer(shared.pid) {
        shared.outstanding.fetch_add(1, Ordering::SeqCst);
        let done_shared = Arc::clone(shared);
        let register = server.register_read(
            buf,
            Box::new(move |buf, result| {
                read_done(&done_shared, buf, result);
            }),
        );
        if let Err(err) = register {
            shared.outstanding.fetch_sub(1, Ordering::SeqCst);
            let peer = Error::Peer(err.to_string());
            shared.slot.set(peer.clone());
            return Err(peer);
        }
    }
    Ok(())
}

fn read_done(shared: &Arc<EngineShared>, buf: Buffer, result: Result<Option<(u64, usize)>>) {
    match result {
        Ok(Some((offset, length))) => {
            if shared.failing.load(Ordering::SeqCst) {
                // Transfer is tearing down; park the chunk out of band so
                // the drain loop reclaims it.
                shared.pool.flag_buffer(shared.pid, buf);
            } else {
                shared.pool.store_ready_buffer(shared.pid, buf, offset, length as u64);
            }
        }
        Ok(None) => {
            shared.eof.store(true, Ordering::SeqCst);
            shared.pool.store_free_buffer(shared.pid, buf);
        }
        Err(err) => {
            warn!("inbound read failed: {err}");
            shared.slot.set(Error::Peer(err.to_string()));
            shared.pool.store_free_buffer(shared.pid, buf);
        }
    }
    shared.outstanding.fetch_sub(1, Ordering::SeqCst);
    shared.notify();
}
