//! The plugin descriptor.
//!
//! [`HssDsi`] wires the engines, command surface, and session state into
//! the eight-slot [`Dsi`] vtable the host framework drives. One instance
//! exists per control connection.

use std::path::Path;
use std::sync::Arc;
use std::thread;

use log::{debug, info};

use crate::commands;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::gridftp::{CommandInfo, Dsi, ServerOps, SessionInfo, StatEntry, TransferEvent,
    TransferInfo};
use crate::hss::{FileKind, Hss};
use crate::msg::MsgBus;
use crate::retr;
use crate::sched::Scheduler;
use crate::session::Session;
use crate::stage::StageTracker;
use crate::stor;

/// How many dispatch workers back each session's bus.
const DISPATCH_WORKERS: usize = 2;

/// The descriptor: one per logged-in session.
pub struct HssDsi {
    hss: Arc<dyn Hss>,
    config: Arc<Config>,
    session: Session,
    bus: MsgBus,
    // Owns the dispatch workers for the bus.
    _sched: Arc<Scheduler>,
    tracker: &'static StageTracker,
}

impl std::fmt::Debug for HssDsi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HssDsi").field("session", &self.session).finish()
    }
}

impl HssDsi {
    /// Build a descriptor for one session against `hss`, loading the
    /// config from `config_path`.
    pub fn new(hss: Arc<dyn Hss>, config_path: &Path, info: &SessionInfo) -> Result<HssDsi> {
        let config = Arc::new(Config::load(config_path)?);
        Self::with_config(hss, config, info)
    }

    /// As [`HssDsi::new`] with an already-loaded config.
    pub fn with_config(
        hss: Arc<dyn Hss>,
        config: Arc<Config>,
        info: &SessionInfo,
    ) -> Result<HssDsi> {
        let cos = config.cos_translations()?;
        let family = config.family_translations()?;
        let session = Session::new(
            info.username.clone(),
            info.groups.clone(),
            Arc::clone(&config),
            cos,
            family,
        );
        let sched = Scheduler::new(DISPATCH_WORKERS)?;
        let bus = MsgBus::new(Arc::clone(&sched));
        Ok(HssDsi {
            hss,
            config,
            session,
            bus,
            _sched: sched,
            tracker: StageTracker::global(),
        })
    }

    /// The session's message bus.
    pub fn bus(&self) -> &MsgBus {
        &self.bus
    }

    /// The session state.
    pub fn session(&self) -> &Session {
        &self.session
    }
}

impl Dsi for HssDsi {
    fn init(&self, info: &SessionInfo) -> Result<()> {
        let login = self
            .config
            .login_name
            .as_deref()
            .ok_or(Error::InvalidArgument("config is missing LoginName".to_string()))?;
        let keytab = self
            .config
            .keytab_file
            .as_deref()
            .ok_or(Error::InvalidArgument("config is missing KeytabFile".to_string()))?;
        self.hss
            .set_login_cred(login, "unix", &format!("auth_keytab:{}", keytab.display()))?;
        self.hss.become_user(&info.username)?;
        info!("session open for {}", info.username);
        Ok(())
    }

    fn destroy(&self) {
        debug!("session closed for {}", self.session.username);
    }

    fn stat(&self, path: &str) -> Result<StatEntry> {
        let stat = self.hss.stat(path)?;
        let symlink_target = match stat.kind {
            FileKind::Symlink => Some(self.hss.realpath(path)?),
            _ => None,
        };
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        Ok(StatEntry { name, stat, symlink_target })
    }

    fn send(&self, server: Arc<dyn ServerOps>, info: TransferInfo) {
        let hss = Arc::clone(&self.hss);
        let bus = self.bus.clone();
        let engine_server = Arc::clone(&server);
        spawn_engine("retr-engine", server, move || retr::run(hss, engine_server, bus, &info));
    }

    fn recv(&self, server: Arc<dyn ServerOps>, info: TransferInfo) {
        let hss = Arc::clone(&self.hss);
        let bus = self.bus.clone();
        let prefs = self.session.alloc_prefs();
        let engine_server = Arc::clone(&server);
        spawn_engine("stor-engine", server, move || {
            stor::run(hss, engine_server, bus, &info, prefs)
        });
    }

    fn trev(&self, event: TransferEvent) {
        debug!("transfer event: {event:?}");
    }

    fn command(&self, server: Arc<dyn ServerOps>, info: CommandInfo) {
        commands::handle(
            &self.session,
            Arc::clone(&self.hss),
            server,
            self.bus.clone(),
            self.tracker,
            &info,
        );
    }

    fn realpath(&self, path: &str) -> Result<String> {
        self.hss.realpath(path)
    }
}

fn spawn_engine(name: &str, server: Arc<dyn ServerOps>, body: impl FnOnce() + Send + 'static) {
    // The engine reports through finished_transfer; nothing to join.
    if thread::Builder::new().name(name.to_string()).spawn(body).is_err() {
        server.finished_transfer(Err(Error::OutOfMemory("transfer engine thread")));
    }
}
