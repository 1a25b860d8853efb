//! Per-login session state.
//!
//! One [`Session`] exists per control connection. It carries the user's
//! identity, the loaded configuration and translation tables, the
//! allocation preferences set through the `SITE` surface, and the pending
//! hardlink source.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{Config, Translations};
use crate::stor::AllocPrefs;

#[derive(Debug, Default)]
struct Prefs {
    cos_id: Option<u32>,
    family_id: Option<u32>,
}

/// Session state shared by the command surface and the engines.
pub struct Session {
    /// Authenticated user.
    pub username: String,
    /// The user's groups.
    pub groups: Vec<String>,
    config: Arc<Config>,
    cos: Translations,
    family: Translations,
    prefs: Mutex<Prefs>,
    hardlink_from: Mutex<Option<String>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("username", &self.username).finish()
    }
}

impl Session {
    /// Build a session for `username` from the loaded config.
    pub fn new(
        username: impl Into<String>,
        groups: Vec<String>,
        config: Arc<Config>,
        cos: Translations,
        family: Translations,
    ) -> Session {
        Session {
            username: username.into(),
            groups,
            config,
            cos,
            family,
            prefs: Mutex::new(Prefs::default()),
            hardlink_from: Mutex::new(None),
        }
    }

    /// Whether this user is on the admin list.
    pub fn is_admin(&self) -> bool {
        self.config.admins.allows(&self.username, &self.groups)
    }

    /// The class-of-service translations.
    pub fn cos(&self) -> &Translations {
        &self.cos
    }

    /// The family translations.
    pub fn family(&self) -> &Translations {
        &self.family
    }

    /// Set (or with `None` reset) the preferred class of service.
    pub fn set_cos_pref(&self, cos_id: Option<u32>) {
        self.prefs.lock().cos_id = cos_id;
    }

    /// Set (or with `None` reset) the preferred family.
    pub fn set_family_pref(&self, family_id: Option<u32>) {
        self.prefs.lock().family_id = family_id;
    }

    /// The allocation preferences the write engine passes to open.
    pub fn alloc_prefs(&self) -> AllocPrefs {
        let prefs = self.prefs.lock();
        AllocPrefs { cos_id: prefs.cos_id, family_id: prefs.family_id }
    }

    /// Remember the source path of a pending hardlink pair.
    pub fn set_hardlink_from(&self, path: impl Into<String>) {
        *self.hardlink_from.lock() = Some(path.into());
    }

    /// Consume the pending hardlink source, if one was set.
    pub fn take_hardlink_from(&self) -> Option<String> {
        self.hardlink_from.lock().take()
    }
}
