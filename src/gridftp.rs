//! The host-framework boundary.
//!
//! The GridFTP server frames every storage plugin as a small vtable plus a
//! handful of callbacks for moving buffers to and from the network. Both
//! sides are expressed as traits here: [`ServerOps`] is what the framework
//! provides to a running transfer, [`Dsi`] is the eight-slot descriptor the
//! plugin provides to the framework.

use std::sync::Arc;

use crate::buffer::Buffer;
use crate::error::Result;
use crate::hss::HssStat;

/// Completion callback for a registered outbound write.
///
/// Receives the buffer back together with the write result.
pub type WriteComplete = Box<dyn FnOnce(Buffer, Result<()>) + Send>;

/// Completion callback for a registered inbound read.
///
/// On success carries `Some((offset, length))` describing the chunk the
/// peer delivered into the buffer, or `None` when the inbound stream has
/// ended.
pub type ReadComplete = Box<dyn FnOnce(Buffer, Result<Option<(u64, usize)>>) + Send>;

/// Operations the server framework provides to a transfer or command.
pub trait ServerOps: Send + Sync {
    /// Negotiated block size for this operation.
    fn block_size(&self) -> u32;

    /// How many buffers the framework suggests keeping in flight.
    fn optimal_concurrency(&self) -> usize;

    /// Marker update interval in seconds; zero or negative disables
    /// markers.
    fn update_interval(&self) -> i32;

    /// Announce that data is about to flow.
    fn begin_transfer(&self);

    /// Report the final result of the transfer. Called exactly once.
    fn finished_transfer(&self, result: Result<()>);

    /// Queue `length` bytes of `buffer` for transmission at file offset
    /// `offset`. The buffer comes back through `done`; when registration
    /// itself fails, `done` is never invoked and the buffer is consumed.
    fn register_write(
        &self,
        buffer: Buffer,
        offset: u64,
        length: usize,
        done: WriteComplete,
    ) -> Result<()>;

    /// Ask for the next inbound chunk; the framework fills `buffer` and
    /// reports the chunk's offset and length through `done`.
    ///
    /// Every accepted registration is eventually completed, with `None`
    /// once the inbound stream ends. Completion callbacks are never invoked
    /// from inside `register_read`/`register_write` itself.
    fn register_read(&self, buffer: Buffer, done: ReadComplete) -> Result<()>;

    /// Emit an intermediate command response (performance marker).
    fn intermediate_command(&self, text: &str);

    /// Finish a command with `response` (a full FTP response line).
    fn finished_command(&self, result: Result<()>, response: &str);
}

/// What the framework tells us about the logged-in session at init.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Authenticated user name.
    pub username: String,
    /// The user's groups.
    pub groups: Vec<String>,
}

/// Parameters of a send (read-from-storage) or recv (write-to-storage)
/// operation.
#[derive(Debug, Clone)]
pub struct TransferInfo {
    /// Storage path.
    pub pathname: String,
    /// Starting offset of a partial transfer.
    pub partial_offset: u64,
    /// Length of a partial transfer; -1 means to end of file.
    pub partial_length: i64,
    /// Announced total transfer length (ALLO), 0 when unknown.
    pub alloc_size: u64,
    /// Whether an existing file is replaced.
    pub truncate: bool,
}

impl TransferInfo {
    /// A whole-file transfer of `pathname`.
    pub fn whole_file(pathname: impl Into<String>) -> TransferInfo {
        TransferInfo {
            pathname: pathname.into(),
            partial_offset: 0,
            partial_length: -1,
            alloc_size: 0,
            truncate: true,
        }
    }
}

/// The command verbs the plugin handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Remove a file.
    Dele,
    /// Create a directory.
    Mkd,
    /// Remove a directory.
    Rmd,
    /// Rename `from_pathname` to the command path.
    Rnto {
        /// Source path of the rename.
        from_pathname: String,
    },
    /// Change permission bits.
    Chmod {
        /// New mode.
        mode: u32,
    },
    /// Change group, by name or numeric gid.
    Chgrp {
        /// Group name or decimal gid.
        group: String,
    },
    /// Set access and modification time.
    Utime {
        /// New time, seconds since the epoch.
        mtime: i64,
    },
    /// Create a symlink at the command path.
    Symlink {
        /// Link target.
        target: String,
    },
    /// Checksum the command path.
    Cksm {
        /// Starting offset.
        offset: u64,
        /// Length, -1 for the whole file.
        length: i64,
    },
    /// `SITE SETCOS`: the command path carries the class name.
    SetCos,
    /// `SITE LSCOS`.
    LsCos,
    /// `SITE SETFAM`: the command path carries the family name.
    SetFam,
    /// `SITE LSFAM`.
    LsFam,
    /// `SITE HARDLINKFROM`: the command path is the link source.
    HardlinkFrom,
    /// `SITE HARDLINKTO`: the command path is the link destination.
    HardlinkTo,
    /// `SITE STAGE`.
    Stage {
        /// Seconds to wait for the stage.
        timeout_secs: u64,
    },
}

/// A command plus the path (or path-shaped argument) it applies to.
#[derive(Debug, Clone)]
pub struct CommandInfo {
    /// The verb.
    pub command: Command,
    /// The path argument. For `SETCOS`/`SETFAM` this carries the class or
    /// family name, matching the framework's calling convention.
    pub pathname: String,
}

/// Transfer events delivered through the `trev` vtable slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEvent {
    /// The framework retrieved the restart-marker ranges.
    RangesRetrieved,
    /// The framework retrieved the performance markers.
    PerfRetrieved,
    /// The transfer is complete and the framework is done with it.
    Complete,
}

/// One entry of a stat reply.
#[derive(Debug, Clone)]
pub struct StatEntry {
    /// Object name.
    pub name: String,
    /// Its attributes.
    pub stat: HssStat,
    /// Link target for symlinks.
    pub symlink_target: Option<String>,
}

/// The eight-slot descriptor the plugin hands the framework.
pub trait Dsi: Send + Sync {
    /// Session start: authenticate and load configuration.
    fn init(&self, info: &SessionInfo) -> Result<()>;

    /// Session end.
    fn destroy(&self);

    /// Stat one path.
    fn stat(&self, path: &str) -> Result<StatEntry>;

    /// Read from storage to the peer (RETR). Completion is reported through
    /// [`ServerOps::finished_transfer`].
    fn send(&self, server: Arc<dyn ServerOps>, info: TransferInfo);

    /// Write from the peer to storage (STOR). Completion is reported
    /// through [`ServerOps::finished_transfer`].
    fn recv(&self, server: Arc<dyn ServerOps>, info: TransferInfo);

    /// Transfer-event hook.
    fn trev(&self, event: TransferEvent);

    /// Execute a command. Completion is reported through
    /// [`ServerOps::finished_command`].
    fn command(&self, server: Arc<dyn ServerOps>, info: CommandInfo);

    /// Canonicalize a path.
    fn realpath(&self, path: &str) -> Result<String>;
}
