//! The checksum engine.
//!
//! Reuses the read flow — open, PIO READ session, in-order callouts — but
//! feeds the bytes into a hash instead of the network. Completed extents
//! are published on the bus so the command-layer markers can report
//! cumulative progress, and the final digest is hex-encoded.
//!
//! Full-file checksums go through a user-attribute cache: a hit skips the
//! session entirely, and a computed digest is written back best-effort.

use std::fmt::Write as _;
use std::sync::Arc;

use log::{debug, warn};
use md5::{Digest, Md5};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::gridftp::ServerOps;
use crate::hss::{CosHints, CosPriorities, Hss, OpenFlags, PioFragment, PioOp};
use crate::msg::MsgBus;
use crate::pio::{Pio, PioConfig};
use crate::range_list::RangeList;

/// User-attribute key the full-file digest is cached under.
pub const CHECKSUM_ATTR: &str = "/checksum";

/// What to checksum.
#[derive(Debug, Clone)]
pub struct CksmArgs {
    /// Storage path.
    pub pathname: String,
    /// Starting offset.
    pub offset: u64,
    /// Length; -1 means the whole file.
    pub length: i64,
}

impl CksmArgs {
    /// True when the request covers the whole file from offset zero, which
    /// is the only shape the cache applies to.
    pub fn is_full_file(&self) -> bool {
        self.offset == 0 && self.length == -1
    }
}

/// Checksum with cache handling.
///
/// Partial requests always recompute. Full-file requests consult the
/// user-attribute cache first and write a computed digest back; a write
/// failure is logged and swallowed.
pub fn checksum(
    hss: Arc<dyn Hss>,
    server: Arc<dyn ServerOps>,
    bus: MsgBus,
    args: &CksmArgs,
) -> Result<String> {
    if !args.is_full_file() {
        return compute(hss, server, bus, args);
    }

    if let Some(cached) = hss.user_attr_get(&args.pathname, CHECKSUM_ATTR)? {
        debug!("checksum cache hit for {}", args.pathname);
        return Ok(cached);
    }

    let digest = compute(Arc::clone(&hss), server, bus, args)?;
    if let Err(err) = hss.user_attr_set(&args.pathname, CHECKSUM_ATTR, &digest) {
        warn!("failed to cache checksum for {}: {err}", args.pathname);
    }
    Ok(digest)
}

/// Stream the requested extent through the hash. Blocking.
pub fn compute(
    hss: Arc<dyn Hss>,
    server: Arc<dyn ServerOps>,
    bus: MsgBus,
    args: &CksmArgs,
) -> Result<String> {
    let (fd, hints_out) = hss.open(
        &args.pathname,
        OpenFlags::empty(),
        &CosHints::default(),
        &CosPriorities::default(),
    )?;

    let outcome = (|| {
        let stat = hss.stat(&args.pathname)?;
        let length = if args.length < 0 {
            stat.size.saturating_sub(args.offset)
        } else {
            (args.length as u64).min(stat.size.saturating_sub(args.offset))
        };

        let hasher = Arc::new(Mutex::new(HashState { md5: Md5::new(), next_offset: args.offset }));

        if length > 0 {
            let block_size = server.block_size();
            let ranges = Arc::new(RangeList::with_bus(bus.clone()));
            ranges.push_tail(args.offset, length as i64);

            let pio = Pio::init(
                Arc::clone(&hss),
                PioConfig {
                    op: PioOp::Read,
                    fd,
                    file_stripe_width: hints_out.stripe_width.max(1),
                    block_size,
                },
            )?;

            let cb_hasher = Arc::clone(&hasher);
            let cb_ranges = Arc::clone(&ranges);
            let running = pio.start(
                Arc::clone(&ranges),
                vec![0u8; block_size as usize],
                Box::new(move |frag| {
                    let PioFragment::Read { offset, data } = frag else {
                        return Err(Error::InvalidArgument(
                            "write fragment on a checksum session".to_string(),
                        ));
                    };
                    let mut state = cb_hasher.lock();
                    // Callouts arrive in offset order on a width-1 stripe;
                    // a forward jump means the session skipped a gap.
                    debug_assert!(offset >= state.next_offset, "callout out of order");
                    state.next_offset = offset + data.len() as u64;
                    state.md5.update(data);
                    drop(state);
                    cb_ranges.record_completed(offset, data.len() as u64);
                    Ok(())
                }),
            )?;

            let report = running.join();
            report.merged()?;
        }

        let state = Arc::into_inner(hasher)
            .ok_or(Error::InvalidArgument("hash still shared after drain".to_string()))?;
        let digest = state.into_inner().md5.finalize();
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(hex, "{byte:02x}");
        }
        Ok(hex)
    })();

    let close_result = hss.close(fd);
    match (outcome, close_result) {
        (Ok(digest), Ok(())) => Ok(digest),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), _) => Err(err),
    }
}

struct HashState {
    md5: Md5,
    next_offset: u64,
}
