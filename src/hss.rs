//! The abstract storage surface.
//!
//! The transfer engines are written against this trait rather than a
//! concrete client library; any hierarchical storage system exposing an
//! equivalent primitive family (open-with-hints, non-blocking extended
//! attributes, the parallel-I/O session calls, asynchronous stage, user
//! attributes) can sit behind it. The crate ships one implementation,
//! [`crate::sim::SimHss`], which the test suite and the stage utility's
//! simulation mode use.

use bitflags::bitflags;

use crate::error::Result;

/// Descriptor for an open storage file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HssFd(i32);

impl HssFd {
    /// Wrap a raw descriptor value.
    pub fn from_raw(fd: i32) -> HssFd {
        HssFd(fd)
    }

    /// The raw descriptor value.
    pub fn raw(&self) -> i32 {
        self.0
    }
}

bitflags! {
    /// Open disposition flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        /// Open for writing.
        const WRITE = 1 << 0;
        /// Create the file if absent.
        const CREATE = 1 << 1;
        /// Truncate existing contents.
        const TRUNCATE = 1 << 2;
    }
}

/// Priority attached to each hint field at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HintPriority {
    /// The hint is not considered.
    #[default]
    Ignore,
    /// Honor the hint when convenient.
    Desired,
    /// Honor the hint unless impossible.
    HighlyDesired,
    /// Fail the open when the hint cannot be honored.
    Required,
}

/// Allocation hints passed to (and returned from) `open`.
///
/// On return, the storage system fills in the stripe width of the selected
/// class of service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CosHints {
    /// Smallest size the file will reach.
    pub min_file_size: u64,
    /// Largest size the file will reach.
    pub max_file_size: u64,
    /// Class-of-service id to allocate in.
    pub cos_id: Option<u32>,
    /// Tape family id to allocate in.
    pub family_id: Option<u32>,
    /// Stripe width of the selected class (output).
    pub stripe_width: u32,
}

/// Priorities paralleling [`CosHints`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CosPriorities {
    /// Priority of `min_file_size`.
    pub min_file_size: HintPriority,
    /// Priority of `max_file_size`.
    pub max_file_size: HintPriority,
    /// Priority of `cos_id`.
    pub cos_id: HintPriority,
    /// Priority of `family_id`.
    pub family_id: HintPriority,
}

/// What kind of namespace object a path names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Regular file.
    RegularFile,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
    /// Anything else.
    Other,
}

/// Result of a `stat` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HssStat {
    /// Object kind.
    pub kind: FileKind,
    /// Size in bytes.
    pub size: u64,
    /// Permission bits.
    pub mode: u32,
    /// Owning user.
    pub uid: u32,
    /// Owning group.
    pub gid: u32,
    /// Modification time, seconds since the epoch.
    pub mtime: i64,
}

bitflags! {
    /// Flags describing one storage level in the extended attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LevelFlags: u32 {
        /// The level is disk-backed.
        const DISK = 1 << 0;
        /// The level is tape-backed.
        const TAPE = 1 << 1;
    }
}

bitflags! {
    /// Options for the extended-attribute probe.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct XattrFlags: u32 {
        /// Report every level of the hierarchy, not just the top.
        const ALL_LEVELS = 1 << 0;
        /// Do not block on files that are moving between levels.
        const NO_BLOCK = 1 << 1;
    }
}

/// Per-level extended attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelAttrs {
    /// Level kind flags.
    pub flags: LevelFlags,
    /// Bytes of the file present at this level.
    pub bytes_at_level: u64,
}

/// Extended file attributes: the storage hierarchy's view of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XFileAttrs {
    /// Attributes per hierarchy level, top first.
    pub levels: Vec<LevelAttrs>,
    /// Total file length.
    pub data_length: u64,
    /// The file's bitfile id.
    pub bitfile_id: BitfileId,
}

/// The storage system's stable identifier for a file's bitfile object.
///
/// Survives renames; used to coalesce duplicate stage requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitfileId(pub [u8; 16]);

/// Identifier of an issued asynchronous stage request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u32);

/// Transfer direction of a PIO session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PioOp {
    /// Storage to caller.
    Read,
    /// Caller to storage.
    Write,
}

/// Parameters for starting a PIO session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PioParams {
    /// Transfer direction.
    pub op: PioOp,
    /// Stripe width on the client side; this crate always uses 1.
    pub client_stripe_width: u32,
    /// Block size every participant buffer must match.
    pub block_size: u32,
    /// Stripe width of the open file, from the open hints.
    pub file_stripe_width: u32,
    /// Per-I/O timeout in seconds; 0 disables.
    pub io_timeout_secs: u32,
}

/// Opaque stripe-group handle.
///
/// The coordinator holds the handle returned by `pio_start`; its
/// exported/imported twin is held by the participant. The token is only
/// meaningful to the implementation that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StripeGroup(pub u64);

/// A gap reported by the execute primitive.
///
/// The offset is relative to the start of the executed range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PioGap {
    /// Gap start, relative to the range offset passed to execute.
    pub offset: u64,
    /// Gap length.
    pub length: u64,
}

/// What one execute call accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PioOutcome {
    /// Bytes moved within the current range before returning.
    pub bytes_moved: u64,
    /// Empty extent discovered on the storage side, if any.
    pub gap: Option<PioGap>,
}

/// One block of data passing through the participant callout.
#[derive(Debug)]
pub enum PioFragment<'a> {
    /// READ: the library delivers `data` found at `offset`.
    Read {
        /// Absolute file offset of the block.
        offset: u64,
        /// The block contents.
        data: &'a [u8],
    },
    /// WRITE: the library wants `buf` filled with the bytes at `offset`.
    Write {
        /// Absolute file offset of the block.
        offset: u64,
        /// Destination to fill completely.
        buf: &'a mut [u8],
    },
}

impl PioFragment<'_> {
    /// The absolute file offset of this fragment.
    pub fn offset(&self) -> u64 {
        match self {
            PioFragment::Read { offset, .. } | PioFragment::Write { offset, .. } => *offset,
        }
    }
}

/// The participant callout. Runs on the storage library's thread; it must
/// not block longer than one pass through the engine's data path.
pub type PioCallout<'a> = dyn FnMut(PioFragment<'_>) -> Result<()> + Send + 'a;

/// The storage primitive surface.
pub trait Hss: Send + Sync {
    /// Open `path`, honoring `hints` at the given `priorities`.
    ///
    /// Returns the descriptor and the hints as granted (stripe width
    /// filled in).
    fn open(
        &self,
        path: &str,
        flags: OpenFlags,
        hints: &CosHints,
        priorities: &CosPriorities,
    ) -> Result<(HssFd, CosHints)>;

    /// Close a descriptor. Idempotent descriptors are not guaranteed;
    /// callers close exactly once.
    fn close(&self, fd: HssFd) -> Result<()>;

    /// Stat a path.
    fn stat(&self, path: &str) -> Result<HssStat>;

    /// Extended attributes of `path`.
    ///
    /// Callers staging files must pass [`XattrFlags::NO_BLOCK`]; without it
    /// the call hangs while the file is moving between levels.
    fn get_xattrs(&self, path: &str, flags: XattrFlags) -> Result<XFileAttrs>;

    /// Start a PIO session, returning the coordinator's stripe group.
    fn pio_start(&self, params: &PioParams) -> Result<StripeGroup>;

    /// Serialize a coordinator stripe group for the participant side.
    fn pio_export_grp(&self, group: &StripeGroup) -> Result<Vec<u8>>;

    /// Reconstruct the participant's stripe group from exported bytes.
    fn pio_import_grp(&self, bytes: &[u8]) -> Result<StripeGroup>;

    /// Move up to `length` bytes at `offset` through the session.
    ///
    /// Blocks until the range completes, a gap is found, or the session
    /// fails. Coordinator side only.
    fn pio_execute(
        &self,
        fd: HssFd,
        offset: u64,
        length: u64,
        group: &StripeGroup,
    ) -> Result<PioOutcome>;

    /// Enter the participant loop.
    ///
    /// Blocks for the lifetime of the session, invoking `callout` once per
    /// block. `buffer` must be exactly the session block size.
    fn pio_register(
        &self,
        stripe_element: u32,
        buffer: &mut [u8],
        group: &StripeGroup,
        callout: &mut PioCallout<'_>,
    ) -> Result<()>;

    /// Tear down one half of a session.
    fn pio_end(&self, group: StripeGroup) -> Result<()>;

    /// Ask the storage system to stage `length` bytes at `offset` of
    /// `path` to disk. Returns immediately with the request id and the
    /// file's bitfile id.
    fn stage_callback(&self, path: &str, offset: u64, length: u64)
    -> Result<(RequestId, BitfileId)>;

    /// Read a user attribute.
    fn user_attr_get(&self, path: &str, key: &str) -> Result<Option<String>>;

    /// Write a user attribute.
    fn user_attr_set(&self, path: &str, key: &str, value: &str) -> Result<()>;

    /// Establish the super-user credential from a keytab.
    fn set_login_cred(&self, login_name: &str, mechanism: &str, authenticator: &str) -> Result<()>;

    /// Switch the active credential to the logged-in end user.
    fn become_user(&self, username: &str) -> Result<()>;

    /// Remove a file.
    fn unlink(&self, path: &str) -> Result<()>;

    /// Create a directory.
    fn mkdir(&self, path: &str, mode: u32) -> Result<()>;

    /// Remove a directory.
    fn rmdir(&self, path: &str) -> Result<()>;

    /// Rename an object.
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Change permission bits.
    fn chmod(&self, path: &str, mode: u32) -> Result<()>;

    /// Change ownership.
    fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()>;

    /// Set access and modification times.
    fn utime(&self, path: &str, atime: i64, mtime: i64) -> Result<()>;

    /// Create a symbolic link at `link` pointing to `target`.
    fn symlink(&self, target: &str, link: &str) -> Result<()>;

    /// Create a hard link at `link` referencing `target`.
    fn link(&self, target: &str, link: &str) -> Result<()>;

    /// Resolve a path to its canonical form.
    fn realpath(&self, path: &str) -> Result<String>;
}
