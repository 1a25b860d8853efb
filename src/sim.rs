//! In-memory storage system.
//!
//! Implements the full [`Hss`] surface over an in-process namespace with
//! sparse extent files, hierarchy levels, asynchronous stage, and a working
//! PIO session engine (execute on one side, register plus callout on the
//! other, connected by channels). The test suite runs every transfer
//! scenario against it; `stage-cli --sim` uses it as a stand-in backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread;
use std::time::Duration;

use log::debug;
use parking_lot::Mutex;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{Error, Result};
use crate::hss::{
    BitfileId, CosHints, CosPriorities, FileKind, Hss, HssFd, HssStat, LevelAttrs, LevelFlags,
    OpenFlags, PioCallout, PioFragment, PioOp, PioOutcome, PioParams, RequestId, StripeGroup,
    XFileAttrs, XattrFlags,
};

/// Hierarchy placement of a simulated file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Fully on disk.
    Disk,
    /// In a tape-only class; never stageable to disk.
    TapeOnly,
    /// On tape with an empty disk level above it.
    Archived,
}

struct SimFile {
    extents: Vec<(u64, Vec<u8>)>,
    length: u64,
    placement: Placement,
    bitfile_id: BitfileId,
    attrs: HashMap<String, String>,
    mode: u32,
    uid: u32,
    gid: u32,
    mtime: i64,
    /// How long a stage request takes to land the file on disk.
    stage_latency: Duration,
}

enum Node {
    File(SimFile),
    Dir { mode: u32 },
    Symlink(String),
}

struct OpenFile {
    path: String,
}

/// Exported stripe-group descriptor.
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout)]
#[repr(C)]
struct ExportedGroup {
    session: u64,
    block_size: u32,
    stripe_width: u32,
}

enum Work {
    /// READ: a block of file data for the participant.
    Deliver { offset: u64, data: Vec<u8> },
    /// WRITE: the participant must produce `length` bytes at `offset`.
    Collect { offset: u64, length: usize },
    End,
}

enum Reply {
    Ok,
    Data(Vec<u8>),
    Failed(Error),
}

struct PioSession {
    params: PioParams,
    work_tx: Mutex<Option<Sender<Work>>>,
    work_rx: Mutex<Option<Receiver<Work>>>,
    reply_tx: Mutex<Option<Sender<Reply>>>,
    reply_rx: Mutex<Option<Receiver<Reply>>>,
}

struct State {
    nodes: HashMap<String, Node>,
    fds: HashMap<i32, OpenFile>,
    next_fd: i32,
    sessions: HashMap<u64, Arc<PioSession>>,
    next_session: u64,
    next_request: u32,
    stage_calls: Vec<(String, RequestId)>,
    open_calls: usize,
    login: Option<String>,
    active_user: Option<String>,
}

/// The simulated storage system.
pub struct SimHss {
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for SimHss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimHss")
            .field("nodes", &self.state.lock().nodes.len())
            .finish()
    }
}

impl SimHss {
    /// An empty namespace containing only the root directory.
    pub fn new() -> SimHss {
        let mut nodes = HashMap::new();
        nodes.insert("/".to_string(), Node::Dir { mode: 0o755 });
        SimHss {
            state: Arc::new(Mutex::new(State {
                nodes,
                fds: HashMap::new(),
                next_fd: 3,
                sessions: HashMap::new(),
                next_session: 1,
                next_request: 1,
                stage_calls: Vec::new(),
                open_calls: 0,
                login: None,
                active_user: None,
            })),
        }
    }

    /// Create a resident disk file holding `data`.
    pub fn add_file(&self, path: &str, data: &[u8]) {
        self.add_sparse_file(path, data.len() as u64, &[(0, data)]);
    }

    /// Create a file of `length` bytes with data only at the given extents.
    pub fn add_sparse_file(&self, path: &str, length: u64, extents: &[(u64, &[u8])]) {
        let mut state = self.state.lock();
        let bitfile_id = state.fresh_bitfile();
        let mut file = SimFile {
            extents: extents.iter().map(|(o, d)| (*o, d.to_vec())).collect(),
            length,
            placement: Placement::Disk,
            bitfile_id,
            attrs: HashMap::new(),
            mode: 0o644,
            uid: 0,
            gid: 0,
            mtime: 0,
            stage_latency: Duration::from_millis(0),
        };
        file.extents.sort_by_key(|(o, _)| *o);
        state.nodes.insert(path.to_string(), Node::File(file));
    }

    /// Move a file to the given hierarchy placement.
    pub fn set_placement(&self, path: &str, placement: Placement) {
        let mut state = self.state.lock();
        if let Some(Node::File(f)) = state.nodes.get_mut(path) {
            f.placement = placement;
        }
    }

    /// Configure how long a stage of `path` takes to complete.
    pub fn set_stage_latency(&self, path: &str, latency: Duration) {
        let mut state = self.state.lock();
        if let Some(Node::File(f)) = state.nodes.get_mut(path) {
            f.stage_latency = latency;
        }
    }

    /// Number of asynchronous stage requests issued so far.
    pub fn stage_call_count(&self) -> usize {
        self.state.lock().stage_calls.len()
    }

    /// Number of open calls made so far.
    pub fn open_call_count(&self) -> usize {
        self.state.lock().open_calls
    }

    /// The file's contents with holes zero-filled, for assertions.
    pub fn read_back(&self, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock();
        match state.nodes.get(path) {
            Some(Node::File(f)) => {
                let mut out = vec![0u8; f.length as usize];
                for (off, data) in &f.extents {
                    out[*off as usize..*off as usize + data.len()].copy_from_slice(data);
                }
                Some(out)
            }
            _ => None,
        }
    }

    /// The file's data extents (offset, length), holes excluded.
    pub fn data_extents(&self, path: &str) -> Option<Vec<(u64, u64)>> {
        let state = self.state.lock();
        match state.nodes.get(path) {
            Some(Node::File(f)) => {
                Some(f.extents.iter().map(|(o, d)| (*o, d.len() as u64)).collect())
            }
            _ => None,
        }
    }

    fn with_file<T>(&self, path: &str, f: impl FnOnce(&mut SimFile) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock();
        match state.nodes.get_mut(path) {
            Some(Node::File(file)) => f(file),
            Some(_) => Err(Error::IsADirectory),
            None => Err(Error::NotFound(path.to_string())),
        }
    }

    fn session(&self, group: &StripeGroup) -> Result<Arc<PioSession>> {
        let state = self.state.lock();
        state
            .sessions
            .get(&(group.0 >> 1))
            .cloned()
            .ok_or(Error::InvalidArgument("unknown stripe group".to_string()))
    }
}

impl Default for SimHss {
    fn default() -> Self {
        SimHss::new()
    }
}

impl State {
    /// Bitfile ids are unique across instances; the stage tracker is
    /// process-wide and must never see two files share one.
    fn fresh_bitfile(&mut self) -> BitfileId {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        let serial = NEXT.fetch_add(1, Ordering::Relaxed);
        let mut id = [0u8; 16];
        id[..8].copy_from_slice(&serial.to_be_bytes());
        BitfileId(id)
    }

    fn fd_path(&self, fd: HssFd) -> Result<String> {
        self.fds
            .get(&fd.raw())
            .map(|o| o.path.clone())
            .ok_or(Error::InvalidArgument("bad descriptor".to_string()))
    }
}

fn levels_for(file: &SimFile) -> Vec<LevelAttrs> {
    match file.placement {
        Placement::Disk => vec![LevelAttrs { flags: LevelFlags::DISK, bytes_at_level: file.length }],
        Placement::TapeOnly => {
            vec![LevelAttrs { flags: LevelFlags::TAPE, bytes_at_level: file.length }]
        }
        Placement::Archived => vec![
            LevelAttrs { flags: LevelFlags::DISK, bytes_at_level: 0 },
            LevelAttrs { flags: LevelFlags::TAPE, bytes_at_level: file.length },
        ],
    }
}

/// Write `data` at `offset` into the extent list, replacing any overlap.
fn write_extent(extents: &mut Vec<(u64, Vec<u8>)>, offset: u64, data: &[u8]) {
    let end = offset + data.len() as u64;
    // The engines write disjoint block-aligned extents; anything overlapping
    // is replaced wholesale.
    extents.retain(|(o, d)| *o + d.len() as u64 <= offset || *o >= end);
    extents.push((offset, data.to_vec()));
    extents.sort_by_key(|(o, _)| *o);
}

impl Hss for SimHss {
    fn open(
        &self,
        path: &str,
        flags: OpenFlags,
        hints: &CosHints,
        _priorities: &CosPriorities,
    ) -> Result<(HssFd, CosHints)> {
        let mut state = self.state.lock();
        state.open_calls += 1;
        if flags.contains(OpenFlags::CREATE) {
            let occupied_by_other =
                matches!(state.nodes.get(path), Some(Node::Dir { .. }) | Some(Node::Symlink(_)));
            if occupied_by_other {
                return Err(Error::IsADirectory);
            }
            let bitfile_id = state.fresh_bitfile();
            let file = SimFile {
                extents: Vec::new(),
                length: 0,
                placement: Placement::Disk,
                bitfile_id,
                attrs: HashMap::new(),
                mode: 0o644,
                uid: 0,
                gid: 0,
                mtime: 0,
                stage_latency: Duration::from_millis(0),
            };
            state.nodes.insert(path.to_string(), Node::File(file));
        }
        match state.nodes.get_mut(path) {
            Some(Node::File(f)) => {
                if flags.contains(OpenFlags::TRUNCATE) {
                    f.extents.clear();
                    f.length = 0;
                }
            }
            Some(_) => return Err(Error::IsADirectory),
            None => return Err(Error::NotFound(path.to_string())),
        }
        let fd = state.next_fd;
        state.next_fd += 1;
        state.fds.insert(fd, OpenFile { path: path.to_string() });
        let mut granted = hints.clone();
        granted.stripe_width = 1;
        Ok((HssFd::from_raw(fd), granted))
    }

    fn close(&self, fd: HssFd) -> Result<()> {
        let mut state = self.state.lock();
        state
            .fds
            .remove(&fd.raw())
            .map(|_| ())
            .ok_or(Error::InvalidArgument("close of unknown descriptor".to_string()))
    }

    fn stat(&self, path: &str) -> Result<HssStat> {
        let state = self.state.lock();
        match state.nodes.get(path) {
            Some(Node::File(f)) => Ok(HssStat {
                kind: FileKind::RegularFile,
                size: f.length,
                mode: f.mode,
                uid: f.uid,
                gid: f.gid,
                mtime: f.mtime,
            }),
            Some(Node::Dir { mode }) => Ok(HssStat {
                kind: FileKind::Directory,
                size: 0,
                mode: *mode,
                uid: 0,
                gid: 0,
                mtime: 0,
            }),
            Some(Node::Symlink(_)) => Ok(HssStat {
                kind: FileKind::Symlink,
                size: 0,
                mode: 0o777,
                uid: 0,
                gid: 0,
                mtime: 0,
            }),
            None => Err(Error::NotFound(path.to_string())),
        }
    }

    fn get_xattrs(&self, path: &str, flags: XattrFlags) -> Result<XFileAttrs> {
        if !flags.contains(XattrFlags::NO_BLOCK) {
            // A blocking probe of a migrating file would hang the caller;
            // the crate never does it, and the simulator refuses to.
            return Err(Error::InvalidArgument("blocking xattr probe".to_string()));
        }
        self.with_file(path, |f| {
            Ok(XFileAttrs {
                levels: levels_for(f),
                data_length: f.length,
                bitfile_id: f.bitfile_id,
            })
        })
    }

    fn pio_start(&self, params: &PioParams) -> Result<StripeGroup> {
        if params.block_size == 0 {
            return Err(Error::InvalidArgument("zero PIO block size".to_string()));
        }
        let (work_tx, work_rx) = channel();
        let (reply_tx, reply_rx) = channel();
        let session = Arc::new(PioSession {
            params: *params,
            work_tx: Mutex::new(Some(work_tx)),
            work_rx: Mutex::new(Some(work_rx)),
            reply_tx: Mutex::new(Some(reply_tx)),
            reply_rx: Mutex::new(Some(reply_rx)),
        });
        let mut state = self.state.lock();
        let id = state.next_session;
        state.next_session += 1;
        state.sessions.insert(id, session);
        // Even token: coordinator half. Odd: participant half.
        Ok(StripeGroup(id << 1))
    }

    fn pio_export_grp(&self, group: &StripeGroup) -> Result<Vec<u8>> {
        let session = self.session(group)?;
        let exported = ExportedGroup {
            session: group.0 >> 1,
            block_size: session.params.block_size,
            stripe_width: session.params.file_stripe_width,
        };
        Ok(exported.as_bytes().to_vec())
    }

    fn pio_import_grp(&self, bytes: &[u8]) -> Result<StripeGroup> {
        let exported = ExportedGroup::read_from_bytes(bytes)
            .map_err(|_| Error::InvalidArgument("malformed stripe group".to_string()))?;
        let state = self.state.lock();
        if !state.sessions.contains_key(&exported.session) {
            return Err(Error::InvalidArgument("unknown stripe group".to_string()));
        }
        Ok(StripeGroup(exported.session << 1 | 1))
    }

    fn pio_execute(
        &self,
        fd: HssFd,
        offset: u64,
        length: u64,
        group: &StripeGroup,
    ) -> Result<PioOutcome> {
        let session = self.session(group)?;
        let path = self.state.lock().fd_path(fd)?;
        let block = session.params.block_size as u64;
        let end = offset + length;

        match session.params.op {
            PioOp::Read => {
                // Snapshot the extent map; delivery happens without the
                // namespace lock held.
                let extents = self.with_file(&path, |f| Ok(f.extents.clone()))?;
                let mut pos = offset;
                while pos < end {
                    let covering = extents
                        .iter()
                        .find(|(o, d)| *o <= pos && pos < *o + d.len() as u64);
                    match covering {
                        Some((o, d)) => {
                            let extent_end = *o + d.len() as u64;
                            let n = block.min(extent_end - pos).min(end - pos);
                            let start = (pos - *o) as usize;
                            let data = d[start..start + n as usize].to_vec();
                            send_work(&session, Work::Deliver { offset: pos, data })?;
                            match recv_reply(&session)? {
                                Reply::Ok => {}
                                Reply::Failed(e) => return Err(e),
                                Reply::Data(_) => {
                                    return Err(Error::InvalidArgument(
                                        "unexpected data reply".to_string(),
                                    ));
                                }
                            }
                            pos += n;
                        }
                        None => {
                            // Gap: everything up to the next extent (or the
                            // end of the range) is missing at this level.
                            let next = extents
                                .iter()
                                .map(|(o, _)| *o)
                                .filter(|o| *o > pos)
                                .min()
                                .unwrap_or(end)
                                .min(end);
                            return Ok(PioOutcome {
                                bytes_moved: pos - offset,
                                gap: Some(crate::hss::PioGap {
                                    offset: pos - offset,
                                    length: next - pos,
                                }),
                            });
                        }
                    }
                }
                Ok(PioOutcome { bytes_moved: length, gap: None })
            }
            PioOp::Write => {
                let mut pos = offset;
                while pos < end {
                    let n = block.min(end - pos) as usize;
                    send_work(&session, Work::Collect { offset: pos, length: n })?;
                    match recv_reply(&session)? {
                        Reply::Data(data) => {
                            debug_assert_eq!(data.len(), n);
                            self.with_file(&path, |f| {
                                write_extent(&mut f.extents, pos, &data);
                                f.length = f.length.max(pos + data.len() as u64);
                                Ok(())
                            })?;
                            pos += n as u64;
                        }
                        Reply::Failed(e) => return Err(e),
                        Reply::Ok => {
                            return Err(Error::InvalidArgument("missing data reply".to_string()));
                        }
                    }
                }
                Ok(PioOutcome { bytes_moved: length, gap: None })
            }
        }
    }

    fn pio_register(
        &self,
        _stripe_element: u32,
        buffer: &mut [u8],
        group: &StripeGroup,
        callout: &mut PioCallout<'_>,
    ) -> Result<()> {
        let session = self.session(group)?;
        if buffer.len() != session.params.block_size as usize {
            return Err(Error::InvalidArgument(
                "participant buffer does not match session block size".to_string(),
            ));
        }
        let work_rx = session
            .work_rx
            .lock()
            .take()
            .ok_or(Error::InvalidArgument("session already registered".to_string()))?;
        let reply_tx = session
            .reply_tx
            .lock()
            .take()
            .ok_or(Error::InvalidArgument("session already registered".to_string()))?;

        let mut failed = None;
        while let Ok(work) = work_rx.recv() {
            match work {
                Work::Deliver { offset, data } => {
                    buffer[..data.len()].copy_from_slice(&data);
                    let reply = match callout(PioFragment::Read {
                        offset,
                        data: &buffer[..data.len()],
                    }) {
                        Ok(()) => Reply::Ok,
                        Err(e) => {
                            failed.get_or_insert_with(|| e.clone());
                            Reply::Failed(e)
                        }
                    };
                    if reply_tx.send(reply).is_err() {
                        break;
                    }
                }
                Work::Collect { offset, length } => {
                    let reply =
                        match callout(PioFragment::Write { offset, buf: &mut buffer[..length] }) {
                            Ok(()) => Reply::Data(buffer[..length].to_vec()),
                            Err(e) => {
                                failed.get_or_insert_with(|| e.clone());
                                Reply::Failed(e)
                            }
                        };
                    if reply_tx.send(reply).is_err() {
                        break;
                    }
                }
                Work::End => break,
            }
        }
        debug!("sim participant loop finished");
        match failed {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn pio_end(&self, group: StripeGroup) -> Result<()> {
        let session = self.session(&group)?;
        if group.0 & 1 == 0 {
            // Coordinator half: signal end-of-transfer to the participant.
            let tx = session.work_tx.lock().take();
            if let Some(tx) = tx {
                let _ = tx.send(Work::End);
            }
        } else {
            // Participant half: drop the session once both ends are done.
            let mut state = self.state.lock();
            state.sessions.remove(&(group.0 >> 1));
        }
        Ok(())
    }

    fn stage_callback(
        &self,
        path: &str,
        _offset: u64,
        _length: u64,
    ) -> Result<(RequestId, BitfileId)> {
        let mut state = self.state.lock();
        let request = RequestId(state.next_request);
        state.next_request += 1;
        let (bitfile_id, latency) = match state.nodes.get(path) {
            Some(Node::File(f)) => (f.bitfile_id, f.stage_latency),
            Some(_) => return Err(Error::IsADirectory),
            None => return Err(Error::NotFound(path.to_string())),
        };
        state.stage_calls.push((path.to_string(), request));

        let shared = Arc::clone(&self.state);
        let path = path.to_string();
        thread::Builder::new()
            .name("sim-stage".to_string())
            .spawn(move || {
                thread::sleep(latency);
                let mut state = shared.lock();
                if let Some(Node::File(f)) = state.nodes.get_mut(&path) {
                    f.placement = Placement::Disk;
                }
            })
            .map_err(|_| Error::OutOfMemory("stage worker"))?;
        Ok((request, bitfile_id))
    }

    fn user_attr_get(&self, path: &str, key: &str) -> Result<Option<String>> {
        self.with_file(path, |f| Ok(f.attrs.get(key).cloned()))
    }

    fn user_attr_set(&self, path: &str, key: &str, value: &str) -> Result<()> {
        self.with_file(path, |f| {
            f.attrs.insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    fn set_login_cred(&self, login_name: &str, _mechanism: &str, _authenticator: &str) -> Result<()> {
        self.state.lock().login = Some(login_name.to_string());
        Ok(())
    }

    fn become_user(&self, username: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.login.is_none() {
            return Err(Error::PermissionDenied);
        }
        state.active_user = Some(username.to_string());
        Ok(())
    }

    fn unlink(&self, path: &str) -> Result<()> {
        let mut state = self.state.lock();
        if matches!(state.nodes.get(path), Some(Node::Dir { .. })) {
            return Err(Error::IsADirectory);
        }
        state
            .nodes
            .remove(path)
            .map(|_| ())
            .ok_or(Error::NotFound(path.to_string()))
    }

    fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        let mut state = self.state.lock();
        if state.nodes.contains_key(path) {
            return Err(Error::InvalidArgument(format!("{path}: exists")));
        }
        state.nodes.insert(path.to_string(), Node::Dir { mode });
        Ok(())
    }

    fn rmdir(&self, path: &str) -> Result<()> {
        let mut state = self.state.lock();
        match state.nodes.get(path) {
            Some(Node::Dir { .. }) => {}
            Some(_) => return Err(Error::NotADirectory),
            None => return Err(Error::NotFound(path.to_string())),
        }
        state.nodes.remove(path);
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut state = self.state.lock();
        match state.nodes.remove(from) {
            Some(node) => {
                state.nodes.insert(to.to_string(), node);
                Ok(())
            }
            None => Err(Error::NotFound(from.to_string())),
        }
    }

    fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        self.with_file(path, |f| {
            f.mode = mode;
            Ok(())
        })
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()> {
        self.with_file(path, |f| {
            f.uid = uid;
            f.gid = gid;
            Ok(())
        })
    }

    fn utime(&self, path: &str, _atime: i64, mtime: i64) -> Result<()> {
        self.with_file(path, |f| {
            f.mtime = mtime;
            Ok(())
        })
    }

    fn symlink(&self, target: &str, link: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.nodes.contains_key(link) {
            return Err(Error::InvalidArgument(format!("{link}: exists")));
        }
        state.nodes.insert(link.to_string(), Node::Symlink(target.to_string()));
        Ok(())
    }

    fn link(&self, target: &str, link: &str) -> Result<()> {
        let mut state = self.state.lock();
        let copy = match state.nodes.get(target) {
            Some(Node::File(f)) => SimFile {
                extents: f.extents.clone(),
                length: f.length,
                placement: f.placement,
                bitfile_id: f.bitfile_id,
                attrs: f.attrs.clone(),
                mode: f.mode,
                uid: f.uid,
                gid: f.gid,
                mtime: f.mtime,
                stage_latency: f.stage_latency,
            },
            Some(_) => return Err(Error::IsADirectory),
            None => return Err(Error::NotFound(target.to_string())),
        };
        state.nodes.insert(link.to_string(), Node::File(copy));
        Ok(())
    }

    fn realpath(&self, path: &str) -> Result<String> {
        let state = self.state.lock();
        let mut current = path.to_string();
        let mut hops = 0;
        while let Some(Node::Symlink(target)) = state.nodes.get(&current) {
            current = target.clone();
            hops += 1;
            if hops > 16 {
                return Err(Error::InvalidArgument("symlink loop".to_string()));
            }
        }
        if state.nodes.contains_key(&current) {
            Ok(current)
        } else {
            Err(Error::NotFound(path.to_string()))
        }
    }
}

fn send_work(session: &PioSession, work: Work) -> Result<()> {
    let guard = session.work_tx.lock();
    match guard.as_ref() {
        Some(tx) => tx
            .send(work)
            .map_err(|_| Error::Transport { function: "sim_pio_send", errno: libc::EPIPE }),
        None => Err(Error::Transport { function: "sim_pio_send", errno: libc::EPIPE }),
    }
}

fn recv_reply(session: &PioSession) -> Result<Reply> {
    // The receiver stays parked in the session; one coordinator at a time.
    let guard = session.reply_rx.lock();
    match guard.as_ref() {
        Some(rx) => rx
            .recv()
            .map_err(|_| Error::Transport { function: "sim_pio_recv", errno: libc::EPIPE }),
        None => Err(Error::Transport { function: "sim_pio_recv", errno: libc::EPIPE }),
    }
}
