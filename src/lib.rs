//! GridFTP data-storage-interface library for tape-backed hierarchical
//! storage.
//!
//! The crate bridges a GridFTP server's transfer framework to a storage
//! system exposing a parallel bulk-transfer (PIO) protocol. The storage
//! side is a trait ([`hss::Hss`]); the framework side is a pair of traits
//! ([`gridftp::ServerOps`] and the eight-slot [`gridftp::Dsi`] vtable).
//! Between them sit the transfer engines: a two-thread PIO driver, a shared
//! buffer pool, a range list, and an in-process message bus carrying
//! completion and progress events.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub use crate::buffer::{Buffer, BufferId, BufferPool, PrivateId};
pub use crate::cksm::{CHECKSUM_ATTR, CksmArgs};
pub use crate::config::{AclEntry, AclList, Config, DEFAULT_CONFIG_PATH, Translations};
pub use crate::dsi::HssDsi;
pub use crate::error::{Error, Result};
pub use crate::gridftp::{Command, CommandInfo, Dsi, ServerOps, SessionInfo, StatEntry,
    TransferEvent, TransferInfo};
pub use crate::marker::MarkerHandle;
pub use crate::msg::{CompIds, Msg, MsgBody, MsgBus, RegistrationId};
pub use crate::pio::{Pio, PioConfig, ResultSlot, RunningPio};
pub use crate::range_list::{LENGTH_TO_EOF, Range, RangeList};
pub use crate::sched::Scheduler;
pub use crate::session::Session;
pub use crate::stage::{Residency, StageTracker};
pub use crate::stor::AllocPrefs;

pub mod buffer;
pub mod cksm;
pub mod commands;
pub mod config;
pub mod dsi;
pub mod error;
pub mod gridftp;
pub mod hss;
pub mod marker;
pub mod msg;
pub mod pio;
pub mod range_list;
pub mod retr;
pub mod sched;
pub mod session;
pub mod sim;
pub mod stage;
pub mod stor;
