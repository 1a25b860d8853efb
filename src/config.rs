//! Configuration parsing.
//!
//! Two file shapes: the main config (`KEY VALUE` lines, `#` comments) and
//! the class-of-service / family translation files (`id:name:acl_list`
//! lines, same comment rule). ACL entries are `user`, `u:user`, or
//! `g:group`; the literal keyword `all` grants access to every user.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Default location of the main config file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/gridftp_hss.conf";

/// One access-control entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AclEntry {
    /// A user name.
    User(String),
    /// A group name.
    Group(String),
    /// Everyone.
    All,
}

/// An ordered list of ACL entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AclList(Vec<AclEntry>);

impl AclList {
    /// Parse a comma-separated ACL list.
    pub fn parse(text: &str) -> AclList {
        let mut entries = Vec::new();
        for item in text.split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            if item.eq_ignore_ascii_case("all") {
                entries.push(AclEntry::All);
            } else if let Some(group) = item.strip_prefix("g:") {
                entries.push(AclEntry::Group(group.to_string()));
            } else if let Some(user) = item.strip_prefix("u:") {
                entries.push(AclEntry::User(user.to_string()));
            } else {
                entries.push(AclEntry::User(item.to_string()));
            }
        }
        AclList(entries)
    }

    /// Whether `user` (member of `groups`) passes this list.
    pub fn allows(&self, user: &str, groups: &[String]) -> bool {
        self.0.iter().any(|entry| match entry {
            AclEntry::All => true,
            AclEntry::User(u) => u == user,
            AclEntry::Group(g) => groups.iter().any(|have| have == g),
        })
    }

    /// True when the list has no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One translation-file entry: a numeric id, its name, and who may use it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    /// Storage-side numeric id.
    pub id: u32,
    /// Human name used on the command surface.
    pub name: String,
    /// Who may select it.
    pub acl: AclList,
}

/// A loaded translation file (classes of service or families).
#[derive(Debug, Clone, Default)]
pub struct Translations {
    entries: Vec<Translation>,
}

impl Translations {
    /// Parse a translation file.
    ///
    /// Lines are `id:name:acl_list`; `#` starts a comment.
    pub fn load(path: &Path) -> Result<Translations> {
        let text = fs::read_to_string(path)
            .map_err(|_| Error::NotFound(path.display().to_string()))?;
        Self::parse(&text, &path.display().to_string())
    }

    fn parse(text: &str, origin: &str) -> Result<Translations> {
        let mut entries = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.splitn(3, ':');
            let id = fields
                .next()
                .and_then(|f| f.trim().parse::<u32>().ok())
                .ok_or_else(|| bad_line(origin, lineno, "bad id field"))?;
            let name = fields
                .next()
                .map(|f| f.trim())
                .filter(|f| !f.is_empty())
                .ok_or_else(|| bad_line(origin, lineno, "missing name field"))?;
            let acl = AclList::parse(fields.next().unwrap_or(""));
            entries.push(Translation { id, name: name.to_string(), acl });
        }
        Ok(Translations { entries })
    }

    /// Numeric id for `name`, case-insensitive.
    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .map(|t| t.id)
    }

    /// Name of `id`.
    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.entries.iter().find(|t| t.id == id).map(|t| t.name.as_str())
    }

    /// Whether `user` may select `id`.
    pub fn allowed(&self, id: u32, user: &str, groups: &[String]) -> bool {
        self.entries
            .iter()
            .find(|t| t.id == id)
            .is_some_and(|t| t.acl.allows(user, groups))
    }

    /// Comma-separated names `user` may select.
    pub fn names_for(&self, user: &str, groups: &[String]) -> String {
        let names: Vec<&str> = self
            .entries
            .iter()
            .filter(|t| t.acl.allows(user, groups))
            .map(|t| t.name.as_str())
            .collect();
        names.join(", ")
    }
}

/// The main configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Super-user principal used to establish the keytab credential.
    pub login_name: Option<String>,
    /// Path of the keytab file.
    pub keytab_file: Option<PathBuf>,
    /// Path of the family translation file.
    pub family_file: Option<PathBuf>,
    /// Path of the class-of-service translation file.
    pub cos_file: Option<PathBuf>,
    /// Who may use the administrative surface.
    pub admins: AclList,
}

impl Config {
    /// Load the config from `path`.
    pub fn load(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path)
            .map_err(|_| Error::NotFound(path.display().to_string()))?;
        Self::parse(&text, &path.display().to_string())
    }

    fn parse(text: &str, origin: &str) -> Result<Config> {
        let mut config = Config::default();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = match line.split_once(char::is_whitespace) {
                Some((k, v)) => (k.trim(), v.trim()),
                None => return Err(bad_line(origin, lineno, "missing value")),
            };
            if key.eq_ignore_ascii_case("LoginName") {
                config.login_name = Some(value.to_string());
            } else if key.eq_ignore_ascii_case("KeytabFile") {
                config.keytab_file = Some(PathBuf::from(value));
            } else if key.eq_ignore_ascii_case("FamilyFile") {
                config.family_file = Some(PathBuf::from(value));
            } else if key.eq_ignore_ascii_case("CosFile") {
                config.cos_file = Some(PathBuf::from(value));
            } else if key.eq_ignore_ascii_case("Admin") {
                config.admins = AclList::parse(value);
            } else {
                return Err(bad_line(origin, lineno, "unknown key"));
            }
        }
        Ok(config)
    }

    /// Load the class-of-service translations, empty when unconfigured.
    pub fn cos_translations(&self) -> Result<Translations> {
        match &self.cos_file {
            Some(path) => Translations::load(path),
            None => Ok(Translations::default()),
        }
    }

    /// Load the family translations, empty when unconfigured.
    pub fn family_translations(&self) -> Result<Translations> {
        match &self.family_file {
            Some(path) => Translations::load(path),
            None => Ok(Translations::default()),
        }
    }
}

fn bad_line(origin: &str, lineno: usize, what: &str) -> Error {
    Error::InvalidArgument(format!("{origin}:{}: {what}", lineno + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_main_config() {
        let text = "\
# gridftp storage bridge
LoginName hssftp
KeytabFile /etc/keytab
FamilyFile /etc/fam.conf
CosFile /etc/cos.conf
Admin root,g:staff
";
        let config = Config::parse(text, "test").unwrap();
        assert_eq!(config.login_name.as_deref(), Some("hssftp"));
        assert_eq!(config.keytab_file.as_deref(), Some(Path::new("/etc/keytab")));
        assert!(config.admins.allows("root", &[]));
        assert!(config.admins.allows("alice", &["staff".to_string()]));
        assert!(!config.admins.allows("alice", &["users".to_string()]));
    }

    #[test]
    fn unknown_key_is_an_error() {
        assert!(Config::parse("Bogus value\n", "test").is_err());
    }

    #[test]
    fn missing_value_is_an_error() {
        assert!(Config::parse("LoginName\n", "test").is_err());
    }

    #[test]
    fn parses_translation_file() {
        let text = "\
# cos table
1:small:all
22:archive:u:alice,g:tape
40:scratch:
";
        let table = Translations::parse(text, "test").unwrap();
        assert_eq!(table.id_of("small"), Some(1));
        assert_eq!(table.id_of("ARCHIVE"), Some(22));
        assert_eq!(table.name_of(22), Some("archive"));
        assert!(table.allowed(1, "bob", &[]));
        assert!(table.allowed(22, "alice", &[]));
        assert!(table.allowed(22, "carol", &["tape".to_string()]));
        assert!(!table.allowed(22, "carol", &[]));
        assert!(!table.allowed(40, "bob", &[]));
        assert_eq!(table.names_for("alice", &[]), "small, archive");
    }

    #[test]
    fn bad_translation_line_is_an_error() {
        assert!(Translations::parse("x:name:all\n", "test").is_err());
        assert!(Translations::parse("7\n", "test").is_err());
    }

    #[test]
    fn load_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "LoginName ftpadm").unwrap();
        writeln!(file, "Admin all").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.login_name.as_deref(), Some("ftpadm"));
        assert!(config.admins.allows("anyone", &[]));
    }
}
