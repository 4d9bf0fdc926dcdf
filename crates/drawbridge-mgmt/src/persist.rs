//! Table persistence
//!
//! Flat files in one data directory:
//!
//! | file          | contents                                   |
//! |---------------|--------------------------------------------|
//! | `reject.tbl`  | reject table image                         |
//! | `allow.tbl`   | allow table image                          |
//! | `class.tbl`   | every class image, concatenated            |
//! | `<hex>.net`   | 4-byte network address, then host table    |
//!
//! Missing or unreadable files at boot leave the compiled-in defaults in
//! place.

use crate::wire::ErrorCode;
use drawbridge_common::dotted;
use drawbridge_policy::{AclTable, FirewallState};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Reject table file name
pub const REJECT_FILE: &str = "reject.tbl";

/// Allow table file name
pub const ALLOW_FILE: &str = "allow.tbl";

/// Class table file name
pub const CLASS_FILE: &str = "class.tbl";

/// Extension of per-network files
pub const NETWORK_EXT: &str = "net";

/// Persistence errors
#[derive(Debug, Error)]
pub enum PersistError {
    /// File could not be opened or created
    #[error("cannot open {}: {source}", .path.display())]
    Open {
        /// File path
        path: PathBuf,
        /// Cause
        source: io::Error,
    },
    /// File could not be written or read
    #[error("cannot write {}: {source}", .path.display())]
    Write {
        /// File path
        path: PathBuf,
        /// Cause
        source: io::Error,
    },
    /// File could not be removed
    #[error("cannot remove {}: {source}", .path.display())]
    Remove {
        /// File path
        path: PathBuf,
        /// Cause
        source: io::Error,
    },
}

impl PersistError {
    /// Wire code for a table operation
    pub fn data_code(&self) -> ErrorCode {
        match self {
            Self::Open { .. } | Self::Remove { .. } => ErrorCode::DataFile,
            Self::Write { .. } => ErrorCode::DataWrite,
        }
    }

    /// Wire code for a password operation
    pub fn password_code(&self) -> ErrorCode {
        match self {
            Self::Open { .. } | Self::Remove { .. } => ErrorCode::PassFile,
            Self::Write { .. } => ErrorCode::PassWrite,
        }
    }
}

/// What the boot loader found
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BootReport {
    /// ACL tables read from disk
    pub tables: usize,
    /// Networks read from disk
    pub networks: usize,
}

/// Backing store for tables and the password
pub trait TableStore {
    /// Persist a whole ACL table image
    fn write_table(&mut self, table: AclTable, image: &[u8]) -> Result<(), PersistError>;

    /// Forget a persisted ACL table
    fn remove_table(&mut self, table: AclTable) -> Result<(), PersistError>;

    /// Persist a network's host table
    fn write_network(&mut self, network: u32, host_table: &[u8]) -> Result<(), PersistError>;

    /// Forget a persisted network
    fn remove_network(&mut self, network: u32) -> Result<(), PersistError>;

    /// Persist a new password
    fn write_password(&mut self, password: &[u8]) -> Result<(), PersistError>;

    /// Persisted ACL table image, if any
    fn read_table(&self, table: AclTable) -> Result<Option<Vec<u8>>, PersistError>;

    /// Every persisted network and its host table
    fn read_networks(&self) -> Result<Vec<(u32, Vec<u8>)>, PersistError>;

    /// Persisted password, if any
    fn read_password(&self) -> Result<Option<Vec<u8>>, PersistError>;

    /// Install everything persisted into fresh state.
    ///
    /// Never fails: whatever cannot be read keeps its default.
    fn load_all(&self, state: &mut FirewallState) -> BootReport {
        let mut report = BootReport::default();

        for table in [AclTable::Reject, AclTable::Allow, AclTable::Classes] {
            match self.read_table(table) {
                Ok(Some(image)) => match state.acl.install_image(table, &image) {
                    Ok(()) => report.tables += 1,
                    Err(e) => tracing::warn!(?table, error = %e, "ignoring persisted table"),
                },
                Ok(None) => tracing::info!(?table, "no persisted table, using defaults"),
                Err(e) => tracing::warn!(?table, error = %e, "cannot read table, using defaults"),
            }
        }

        match self.read_networks() {
            Ok(networks) => {
                for (network, host_table) in networks {
                    match state.classifier.load_network(network, &host_table) {
                        Ok(()) => report.networks += 1,
                        Err(e) => {
                            tracing::warn!(network = %dotted(network), error = %e, "ignoring persisted network")
                        }
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "cannot list networks"),
        }

        report
    }
}

/// Flat-file store
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    password_file: PathBuf,
}

impl FileStore {
    /// Create store over a data directory and password file
    pub fn new(dir: impl Into<PathBuf>, password_file: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            password_file: password_file.into(),
        }
    }

    /// Data directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn table_path(&self, table: AclTable) -> PathBuf {
        let name = match table {
            AclTable::Reject => REJECT_FILE,
            AclTable::Allow => ALLOW_FILE,
            AclTable::Classes => CLASS_FILE,
        };
        self.dir.join(name)
    }

    fn network_path(&self, network: u32) -> PathBuf {
        self.dir
            .join(format!("{}.{}", hex::encode(network.to_be_bytes()), NETWORK_EXT))
    }

    fn write_file(path: &Path, parts: &[&[u8]]) -> Result<(), PersistError> {
        let open = |source| PersistError::Open {
            path: path.to_path_buf(),
            source,
        };
        let write = |source| PersistError::Write {
            path: path.to_path_buf(),
            source,
        };

        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(open)?;

        // The live file is only replaced once the new copy is complete
        let mut file = NamedTempFile::new_in(parent).map_err(open)?;
        for part in parts {
            file.write_all(part).map_err(write)?;
        }
        file.as_file().sync_all().map_err(write)?;
        file.persist(path).map_err(|e| open(e.error))?;
        Ok(())
    }

    fn read_file(path: &Path) -> Result<Option<Vec<u8>>, PersistError> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PersistError::Open {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn remove_file(path: &Path) -> Result<(), PersistError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PersistError::Remove {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

impl TableStore for FileStore {
    fn write_table(&mut self, table: AclTable, image: &[u8]) -> Result<(), PersistError> {
        Self::write_file(&self.table_path(table), &[image])
    }

    fn remove_table(&mut self, table: AclTable) -> Result<(), PersistError> {
        Self::remove_file(&self.table_path(table))
    }

    fn write_network(&mut self, network: u32, host_table: &[u8]) -> Result<(), PersistError> {
        Self::write_file(&self.network_path(network), &[&network.to_be_bytes(), host_table])
    }

    fn remove_network(&mut self, network: u32) -> Result<(), PersistError> {
        Self::remove_file(&self.network_path(network))
    }

    fn write_password(&mut self, password: &[u8]) -> Result<(), PersistError> {
        Self::write_file(&self.password_file, &[password])
    }

    fn read_table(&self, table: AclTable) -> Result<Option<Vec<u8>>, PersistError> {
        Self::read_file(&self.table_path(table))
    }

    fn read_networks(&self) -> Result<Vec<(u32, Vec<u8>)>, PersistError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(PersistError::Open {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut networks = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(NETWORK_EXT) {
                continue;
            }
            let Some(bytes) = Self::read_file(&path)? else {
                continue;
            };
            if bytes.len() < 4 {
                tracing::warn!(path = %path.display(), "network file too short");
                continue;
            }
            let network = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            networks.push((network, bytes[4..].to_vec()));
        }
        networks.sort_by_key(|(network, _)| *network);
        Ok(networks)
    }

    fn read_password(&self) -> Result<Option<Vec<u8>>, PersistError> {
        Ok(Self::read_file(&self.password_file)?.map(|mut password| {
            while matches!(password.last(), Some(b'\n' | b'\r')) {
                password.pop();
            }
            password
        }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use drawbridge_policy::{HeapArena, RejectEntry};
    use std::collections::{BTreeMap, HashMap};

    /// In-memory store that can be told to fail
    #[derive(Default)]
    pub(crate) struct MemoryStore {
        pub tables: HashMap<AclTable, Vec<u8>>,
        pub networks: BTreeMap<u32, Vec<u8>>,
        pub password: Option<Vec<u8>>,
        pub fail_table: Option<AclTable>,
        pub fail_password: bool,
    }

    fn failure() -> PersistError {
        PersistError::Write {
            path: PathBuf::from("mem"),
            source: io::Error::new(io::ErrorKind::Other, "disk full"),
        }
    }

    impl TableStore for MemoryStore {
        fn write_table(&mut self, table: AclTable, image: &[u8]) -> Result<(), PersistError> {
            if self.fail_table == Some(table) {
                return Err(failure());
            }
            self.tables.insert(table, image.to_vec());
            Ok(())
        }

        fn remove_table(&mut self, table: AclTable) -> Result<(), PersistError> {
            self.tables.remove(&table);
            Ok(())
        }

        fn write_network(&mut self, network: u32, host_table: &[u8]) -> Result<(), PersistError> {
            self.networks.insert(network, host_table.to_vec());
            Ok(())
        }

        fn remove_network(&mut self, network: u32) -> Result<(), PersistError> {
            self.networks.remove(&network);
            Ok(())
        }

        fn write_password(&mut self, password: &[u8]) -> Result<(), PersistError> {
            if self.fail_password {
                return Err(failure());
            }
            self.password = Some(password.to_vec());
            Ok(())
        }

        fn read_table(&self, table: AclTable) -> Result<Option<Vec<u8>>, PersistError> {
            Ok(self.tables.get(&table).cloned())
        }

        fn read_networks(&self) -> Result<Vec<(u32, Vec<u8>)>, PersistError> {
            Ok(self.networks.iter().map(|(n, t)| (*n, t.clone())).collect())
        }

        fn read_password(&self) -> Result<Option<Vec<u8>>, PersistError> {
            Ok(self.password.clone())
        }
    }

    fn state() -> FirewallState {
        FirewallState::new(Box::new(HeapArena::default()))
    }

    #[test]
    fn test_missing_files_keep_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("absent"), dir.path().join("pw"));
        let mut st = state();

        assert_eq!(store.load_all(&mut st), BootReport::default());
        assert!(st.acl.reject().is_empty());
        assert_eq!(store.read_password().unwrap(), None);
    }

    #[test]
    fn test_tables_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path(), dir.path().join("pw"));

        let mut st = state();
        st.acl.replace_reject(vec![RejectEntry { network: 0x8C00_0000, mask: 0xFF00_0000 }]);
        store.write_table(AclTable::Reject, &st.acl.encode(AclTable::Reject)).unwrap();
        let mut host_table = vec![0u8; 256];
        host_table[7] = 3;
        store.write_network(0xC0A8_0100, &host_table).unwrap();

        assert!(dir.path().join("c0a80100.net").exists());
        let raw = fs::read(dir.path().join("c0a80100.net")).unwrap();
        assert_eq!(&raw[..4], &[0xC0, 0xA8, 0x01, 0x00]);
        assert_eq!(raw.len(), 260);

        let mut fresh = state();
        let report = store.load_all(&mut fresh);
        assert_eq!(report, BootReport { tables: 1, networks: 1 });
        assert_eq!(fresh.acl.reject(), st.acl.reject());
        assert!(!fresh.acl.is_dirty(AclTable::Reject));
        assert_eq!(fresh.classifier.lookup(0xC0A8_0107), 3);
        assert!(fresh.classifier.dirty_networks().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_rewrite_replaces_file_whole() {
        use std::io::Read;

        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path(), dir.path().join("pw"));
        let path = dir.path().join(REJECT_FILE);

        store.write_table(AclTable::Reject, &[1u8; 16]).unwrap();
        let mut previous = fs::File::open(&path).unwrap();
        store.write_table(AclTable::Reject, &[2u8; 8]).unwrap();

        // The old copy was never truncated in place
        let mut old = Vec::new();
        previous.read_to_end(&mut old).unwrap();
        assert_eq!(old, vec![1u8; 16]);
        assert_eq!(fs::read(&path).unwrap(), vec![2u8; 8]);

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from(REJECT_FILE)]);
    }

    #[test]
    fn test_malformed_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path(), dir.path().join("pw"));
        fs::write(dir.path().join(ALLOW_FILE), [1, 2, 3]).unwrap();
        fs::write(dir.path().join("c0a80200.net"), [0xC0, 0xA8, 0x02, 0x00, 1, 2]).unwrap();
        fs::write(dir.path().join("junk.net"), [1]).unwrap();

        let mut st = state();
        assert_eq!(store.load_all(&mut st), BootReport::default());
        assert!(st.acl.allow().is_empty());
        assert!(!st.classifier.contains(0xC0A8_0200));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path(), dir.path().join("pw"));
        store.write_table(AclTable::Classes, &[0u8; 4]).unwrap();
        store.remove_table(AclTable::Classes).unwrap();
        store.remove_table(AclTable::Classes).unwrap();
        store.remove_network(0xC0A8_0100).unwrap();
        assert!(store.read_table(AclTable::Classes).unwrap().is_none());
    }

    #[test]
    fn test_password_file() {
        let dir = tempfile::tempdir().unwrap();
        let pw = dir.path().join("password");
        fs::write(&pw, b"hunter2\n").unwrap();
        let mut store = FileStore::new(dir.path(), &pw);
        assert_eq!(store.read_password().unwrap(), Some(b"hunter2".to_vec()));

        store.write_password(b"correct horse").unwrap();
        assert_eq!(store.read_password().unwrap(), Some(b"correct horse".to_vec()));
    }

    #[test]
    fn test_open_failure_maps_to_file_codes() {
        let dir = tempfile::tempdir().unwrap();
        // Password path is a directory
        let mut store = FileStore::new(dir.path(), dir.path());
        let err = store.write_password(b"x").unwrap_err();
        assert_eq!(err.password_code(), ErrorCode::PassFile);
        assert_eq!(err.data_code(), ErrorCode::DataFile);
        assert_eq!(failure().password_code(), ErrorCode::PassWrite);
    }
}
