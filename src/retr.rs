//! The read (RETR) engine: storage to peer.
//!
//! Opens the file read-only, drives a PIO READ session, and turns every
//! participant callout into a registered network write. Backpressure falls
//! out of the buffer pool: the callout blocks on a free buffer, and buffers
//! only come back when the framework finishes a write.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::buffer::BufferPool;
use crate::error::{Error, Result};
use crate::gridftp::{ServerOps, TransferInfo};
use crate::hss::{CosHints, CosPriorities, Hss, OpenFlags, PioFragment, PioOp};
use crate::msg::{CompIds, MsgBody, MsgBus};
use crate::pio::{Pio, PioConfig, ResultSlot};
use crate::range_list::RangeList;

struct EngineShared {
    pool: Arc<BufferPool>,
    pid: crate::buffer::PrivateId,
    slot: Arc<ResultSlot>,
    ranges: Arc<RangeList>,
    outstanding: AtomicUsize,
    started: AtomicBool,
    wake: Mutex<()>,
    cond: Condvar,
}

impl EngineShared {
    fn notify(&self) {
        let _guard = self.wake.lock();
        self.cond.notify_all();
    }
}

/// Run a send operation to completion.
///
/// Blocks for the duration of the transfer and reports through
/// [`ServerOps::finished_transfer`] exactly once. Callers normally spawn
/// this on its own thread.
pub fn run(hss: Arc<dyn Hss>, server: Arc<dyn ServerOps>, bus: MsgBus, info: &TransferInfo) {
    let result = transfer(hss, Arc::clone(&server), bus.clone(), info);
    bus.send(
        CompIds::ANY,
        CompIds::TRANSFER_CONTROL,
        MsgBody::TransferComplete(result.clone()),
    );
    server.finished_transfer(result);
}

fn transfer(
    hss: Arc<dyn Hss>,
    server: Arc<dyn ServerOps>,
    bus: MsgBus,
    info: &TransferInfo,
) -> Result<()> {
    let (fd, hints_out) = hss.open(
        &info.pathname,
        OpenFlags::empty(),
        &CosHints::default(),
        &CosPriorities::default(),
    )?;

    let outcome = (|| {
        let stat = hss.stat(&info.pathname)?;

        let offset = info.partial_offset;
        let length = if info.partial_length < 0 {
            stat.size.saturating_sub(offset)
        } else {
            (info.partial_length as u64).min(stat.size.saturating_sub(offset))
        };

        if length == 0 {
            server.begin_transfer();
            return Ok(());
        }

        let block_size = server.block_size();
        let concurrency = server.optimal_concurrency().max(1);

        let pool = Arc::new(BufferPool::new(block_size as usize));
        let pid = pool.create_private_list();
        for _ in 0..concurrency {
            let buf = pool.allocate_buffer(pid)?;
            pool.store_free_buffer(pid, buf);
        }

        let ranges = Arc::new(RangeList::with_bus(bus));
        ranges.push_tail(offset, length as i64);

        let shared = Arc::new(EngineShared {
            pool: Arc::clone(&pool),
            pid,
            slot: Arc::new(ResultSlot::new()),
            ranges: Arc::clone(&ranges),
            outstanding: AtomicUsize::new(0),
            started: AtomicBool::new(false),
            wake: Mutex::new(()),
            cond: Condvar::new(),
        });

        let pio = Pio::init(
            Arc::clone(&hss),
            PioConfig {
                op: PioOp::Read,
                fd,
                file_stripe_width: hints_out.stripe_width.max(1),
                block_size,
            },
        )?;

        let callout_shared = Arc::clone(&shared);
        let callout_server = Arc::clone(&server);
        let running = pio.start(
            Arc::clone(&ranges),
            vec![0u8; block_size as usize],
            Box::new(move |frag| callout(&callout_shared, &callout_server, frag)),
        )?;

        let report = running.join();

        // Let every registered write come home before tearing down.
        {
            let mut guard = shared.wake.lock();
            while shared.outstanding.load(Ordering::SeqCst) > 0 {
                shared.cond.wait(&mut guard);
            }
        }

        debug!(
            "retr drained: {} gap(s), completed {:?}",
            report.gaps.len(),
            ranges.completed()
        );

        // Coordinator error beats participant error beats the engine's own
        // report of a failed network write.
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
    let PioFragment::Read { offset, data } = frag else {
        return Err(Error::InvalidArgument("write fragment on a read session".to_string()));
    };

    if !shared.started.swap(true, Ordering::SeqCst) {
        server.begin_transfer();
    }

    // Backpressure: block until a buffer frees up or the transfer fails.
    let mut buf = {
        let mut guard = shared.wake.lock();
        loop {
            if let Some(err) = shared.slot.get() {
                return Err(err);
            }
            if let Some(buf) = shared.pool.get_free_buffer(shared.pid) {
                break buf;
            }
            shared.cond.wait(&mut guard);
        }
    };

    buf.bytes_mut()[..data.len()].copy_from_slice(data);
    shared.pool.set_buffer_ready(shared.pid, &buf, offset, data.len() as u64);
    shared.pool.store_offset_length(&buf, offset, data.len() as u64);

    shared.outstanding.fetch_add(1, Ordering::SeqCst);
    let done_shared = Arc::clone(shared);
    let register = server.register_write(
        buf,
        offset,
        data.len(),
        Box::new(move |buf, result| {
            if let Some((off, len)) = done_shared.pool.get_stored_offset_length(&buf) {
                if result.is_ok() {
                    done_shared.ranges.record_completed(off, len);
                }
            }
            done_shared.pool.clear_stored_offset_length(&buf);
            if let Err(err) = result {
                done_shared.slot.set(Error::Peer(err.to_string()));
            }
            done_shared.pool.store_free_buffer(done_shared.pid, buf);
            done_shared.outstanding.fetch_sub(1, Ordering::SeqCst);
            done_shared.notify();
        }),
    );

    if let Err(err) = register {
        // The buffer traveled with the failed registration; the framework
        // does not call back on a failed register, so account for it here.
        shared.outstanding.fetch_sub(1, Ordering::SeqCst);
        shared.slot.set(Error::Peer(err.to_string()));
        return Err(err);
    }
    Ok(())
}
