//! Command dispatch.
//!
//! Implements the command slot of the DSI vtable: the filesystem verbs, the
//! `SITE` class-of-service / family / hardlink surface, `SITE STAGE`, and
//! `CKSM`. Every path funnels into one response through
//! [`ServerOps::finished_command`]; errors map onto the FTP code set
//! (553 wrong-object-kind, 451 space/quota, 550 permission, 500 the rest).

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};

use crate::cksm::{self, CksmArgs};
use crate::error::{Error, Result};
use crate::gridftp::{Command, CommandInfo, ServerOps};
use crate::hss::Hss;
use crate::marker::MarkerHandle;
use crate::msg::MsgBus;
use crate::session::Session;
use crate::stage::{Residency, StageTracker};

/// Execute one command and report through `finished_command`.
pub fn handle(
    session: &Session,
    hss: Arc<dyn Hss>,
    server: Arc<dyn ServerOps>,
    bus: MsgBus,
    tracker: &StageTracker,
    info: &CommandInfo,
) {
    debug!("command {:?} on {}", info.command, info.pathname);
    let (result, response) = dispatch(session, hss, Arc::clone(&server), bus, tracker, info);

    let response = match response {
        Some(text) => text,
        None => match &result {
            Ok(()) => "250 Ok\r\n".to_string(),
            Err(err) => err.ftp_response(),
        },
    };
    server.finished_command(result, &response);
}

fn dispatch(
    session: &Session,
    hss: Arc<dyn Hss>,
    server: Arc<dyn ServerOps>,
    bus: MsgBus,
    tracker: &StageTracker,
    info: &CommandInfo,
) -> (Result<()>, Option<String>) {
    let path = info.pathname.as_str();
    match &info.command {
        Command::Dele => (hss.unlink(path), None),
        Command::Mkd => (hss.mkdir(path, 0o700), None),
        Command::Rmd => (hss.rmdir(path), None),
        Command::Rnto { from_pathname } => (hss.rename(from_pathname, path), None),
        Command::Chmod { mode } => (hss.chmod(path, *mode), None),
        Command::Chgrp { group } => (chgrp(&*hss, path, group), None),
        Command::Utime { mtime } => (hss.utime(path, *mtime, *mtime), None),
        Command::Symlink { target } => (hss.symlink(target, path), None),

        Command::SetCos => set_cos(session, path),
        Command::LsCos => {
            let list = session.cos().names_for(&session.username, &session.groups);
            (Ok(()), Some(format!("250 Allowed COS: {list}\r\n")))
        }
        Command::SetFam => set_family(session, path),
        Command::LsFam => {
            let list = session.family().names_for(&session.username, &session.groups);
            (Ok(()), Some(format!("250 Allowed Families: {list}\r\n")))
        }

        Command::HardlinkFrom => {
            session.set_hardlink_from(path);
            (Ok(()), None)
        }
        Command::HardlinkTo => match session.take_hardlink_from() {
            None => (Ok(()), Some("501 Must specify HARDLINKFROM first\r\n".to_string())),
            Some(from) => (hss.link(&from, path), None),
        },

        Command::Stage { timeout_secs } => {
            stage(&*hss, tracker, path, Duration::from_secs(*timeout_secs))
        }

        Command::Cksm { offset, length } => {
            let args =
                CksmArgs { pathname: path.to_string(), offset: *offset, length: *length };
            let markers = MarkerHandle::start(bus.clone(), Arc::clone(&server));
            let result = cksm::checksum(hss, server, bus, &args);
            if let Some(markers) = markers {
                markers.stop();
            }
            match result {
                Ok(digest) => (Ok(()), Some(digest)),
                Err(err) => (Err(err), None),
            }
        }
    }
}

fn chgrp(hss: &dyn Hss, path: &str, group: &str) -> Result<()> {
    let stat = hss.stat(path)?;
    // Name-to-gid translation belongs to the host's account database;
    // only numeric gids are resolvable here.
    let gid: u32 = group
        .parse()
        .map_err(|_| Error::Unsupported("group names; use a numeric gid"))?;
    hss.chown(path, stat.uid, gid)
}

fn set_cos(session: &Session, name: &str) -> (Result<()>, Option<String>) {
    if name.eq_ignore_ascii_case("default") {
        session.set_cos_pref(None);
        return (Ok(()), None);
    }
    let Some(id) = session.cos().id_of(name) else {
        return (Ok(()), Some("550 That class of service does not exist\r\n".to_string()));
    };
    if !session.cos().allowed(id, &session.username, &session.groups) {
        return (Ok(()), Some("550 Not permitted to use this class of service\r\n".to_string()));
    }
    session.set_cos_pref(Some(id));
    (Ok(()), None)
}

fn set_family(session: &Session, name: &str) -> (Result<()>, Option<String>) {
    if name.eq_ignore_ascii_case("default") {
        session.set_family_pref(None);
        return (Ok(()), None);
    }
    let Some(id) = session.family().id_of(name) else {
        return (Ok(()), Some("550 That family does not exist\r\n".to_string()));
    };
    if !session.family().allowed(id, &session.username, &session.groups) {
        return (Ok(()), Some("550 Not permitted to use this family\r\n".to_string()));
    }
    session.set_family_pref(Some(id));
    (Ok(()), None)
}

fn stage(
    hss: &dyn Hss,
    tracker: &StageTracker,
    path: &str,
    timeout: Duration,
) -> (Result<()>, Option<String>) {
    match tracker.stage(hss, path, timeout) {
        Ok(Residency::Resident) => {
            info!("stage: {path} is resident");
            (Ok(()), Some(format!("250 Stage of file {path} succeeded.\r\n")))
        }
        Ok(Residency::TapeOnly) => {
            (Ok(()), Some(format!("250 {path} is on a tape only class of service.\r\n")))
        }
        Ok(Residency::Archived) => {
            (Ok(()), Some(format!("450 {path}: is being retrieved from the archive...\r\n")))
        }
        Err(err) => (Err(err), None),
    }
}
