//! Transactional table loader
//!
//! A LOAD transaction is BEGIN, any number of fragments, END. Fragments
//! are copied into a staging buffer and nothing live changes until END,
//! when the whole table is installed at once.
//!
//! # Rules
//!
//! - One staging buffer per table kind
//! - BEGIN discards whatever the kind had staged
//! - Any error aborts the kind's transaction and frees its buffer
//!
//! Network host tables are staged directly in the classifier's arena, so
//! memory exhaustion shows up at BEGIN and END installs without a copy.

use crate::wire::{ErrorCode, LoadFragment, TableKind, MAX_FRAGMENT};
use drawbridge_common::{dotted, AddressClass, DrawbridgeError, MAX_CLASSES};
use drawbridge_policy::acl::CLASS_IMAGE_LEN;
use drawbridge_policy::store::{decode_allow, decode_class, decode_reject, ALLOW_IMAGE_LEN, REJECT_IMAGE_LEN};
use drawbridge_policy::{ArenaHandle, FirewallState};
use thiserror::Error;

/// LOAD failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoadError {
    /// Not a class B or C network address
    #[error("not a loadable network: {0:#010x}")]
    NoNetwork(u32),
    /// Table memory exhausted
    #[error("out of table memory")]
    NoMemory,
    /// Fragment for a transaction that was never begun
    #[error("no {0:?} transaction in progress")]
    NoTransaction(TableKind),
    /// Unknown table kind
    #[error("unknown table kind {0}")]
    UnknownKind(u8),
    /// Fragment or assembled table is invalid
    #[error("bad load: {0}")]
    Malformed(String),
}

impl LoadError {
    /// Wire error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NoNetwork(_) | Self::NoTransaction(TableKind::Network) => ErrorCode::NoNetwork,
            Self::NoMemory => ErrorCode::NoMemory,
            Self::NoTransaction(_) | Self::UnknownKind(_) | Self::Malformed(_) => ErrorCode::Command,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageTable {
    Class,
    Reject,
    Allow,
}

impl ImageTable {
    fn from_kind(kind: TableKind) -> Option<Self> {
        match kind {
            TableKind::Network => None,
            TableKind::Class => Some(Self::Class),
            TableKind::Reject => Some(Self::Reject),
            TableKind::Allow => Some(Self::Allow),
        }
    }

    fn slot(self) -> usize {
        self as usize
    }

    fn image_len(self) -> usize {
        match self {
            Self::Class => CLASS_IMAGE_LEN,
            Self::Reject => REJECT_IMAGE_LEN,
            Self::Allow => ALLOW_IMAGE_LEN,
        }
    }

    fn kind(self) -> TableKind {
        match self {
            Self::Class => TableKind::Class,
            Self::Reject => TableKind::Reject,
            Self::Allow => TableKind::Allow,
        }
    }
}

struct NetworkStaging {
    network: u32,
    handle: ArenaHandle,
}

struct ImageStaging {
    index: u32,
    image: Vec<u8>,
}

/// Staging buffers for in-flight LOAD transactions
#[derive(Default)]
pub struct Loader {
    network: Option<NetworkStaging>,
    images: [Option<ImageStaging>; 3],
}

impl Loader {
    /// Create loader with nothing staged
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one fragment
    pub fn apply(&mut self, state: &mut FirewallState, frag: &LoadFragment<'_>) -> Result<(), LoadError> {
        let kind = TableKind::from_u8(frag.kind).ok_or(LoadError::UnknownKind(frag.kind))?;
        if frag.data.len() > MAX_FRAGMENT {
            self.abort(state, kind);
            return Err(LoadError::Malformed(format!(
                "fragment of {} bytes exceeds {}",
                frag.data.len(),
                MAX_FRAGMENT
            )));
        }

        let result = match ImageTable::from_kind(kind) {
            None => self.load_network(state, frag),
            Some(table) => self.load_image(state, table, frag),
        };
        if let Err(e) = &result {
            tracing::debug!(?kind, error = %e, "load aborted");
            self.abort(state, kind);
        }
        result
    }

    /// Whether a transaction of `kind` is open
    pub fn in_progress(&self, kind: TableKind) -> bool {
        match ImageTable::from_kind(kind) {
            None => self.network.is_some(),
            Some(table) => self.images[table.slot()].is_some(),
        }
    }

    /// Drop a kind's staging buffer
    pub fn abort(&mut self, state: &mut FirewallState, kind: TableKind) {
        match ImageTable::from_kind(kind) {
            None => {
                if let Some(staging) = self.network.take() {
                    state.classifier.free_host_table(staging.handle);
                }
            }
            Some(table) => self.images[table.slot()] = None,
        }
    }

    fn load_network(&mut self, state: &mut FirewallState, frag: &LoadFragment<'_>) -> Result<(), LoadError> {
        let network = frag.index;
        let valid = AddressClass::split(network).is_some_and(|split| split.network == network);
        if !valid {
            return Err(LoadError::NoNetwork(network));
        }

        if frag.is_begin() {
            if let Some(old) = self.network.take() {
                tracing::debug!(network = %dotted(old.network), "discarding unfinished network load");
                state.classifier.free_host_table(old.handle);
            }
            let handle = state.classifier.alloc_host_table(network).map_err(|e| match e {
                DrawbridgeError::OutOfMemory => LoadError::NoMemory,
                _ => LoadError::NoNetwork(network),
            })?;
            self.network = Some(NetworkStaging { network, handle });
        }

        let staging = self
            .network
            .as_ref()
            .filter(|s| s.network == network)
            .ok_or(LoadError::NoTransaction(TableKind::Network))?;
        state
            .classifier
            .write_host_table(&staging.handle, frag.offset as usize, frag.data)
            .map_err(|e| LoadError::Malformed(e.to_string()))?;

        if frag.is_end() {
            if let Some(staging) = self.network.take() {
                state
                    .classifier
                    .install_network(staging.network, staging.handle)
                    .map_err(|_| LoadError::NoMemory)?;
                tracing::info!(network = %dotted(network), "network loaded");
            }
        }
        Ok(())
    }

    fn load_image(
        &mut self,
        state: &mut FirewallState,
        table: ImageTable,
        frag: &LoadFragment<'_>,
    ) -> Result<(), LoadError> {
        // Only class loads are indexed
        let index = match table {
            ImageTable::Class if frag.index as usize >= MAX_CLASSES => {
                return Err(LoadError::Malformed(format!("class {} out of range", frag.index)));
            }
            ImageTable::Class => frag.index,
            ImageTable::Reject | ImageTable::Allow => 0,
        };

        let slot = &mut self.images[table.slot()];
        if frag.is_begin() {
            if slot.is_some() {
                tracing::debug!(kind = ?table.kind(), "discarding unfinished load");
            }
            *slot = Some(ImageStaging {
                index,
                image: vec![0u8; table.image_len()],
            });
        }

        let staging = slot
            .as_mut()
            .filter(|s| s.index == index)
            .ok_or(LoadError::NoTransaction(table.kind()))?;
        let offset = frag.offset as usize;
        let end = offset + frag.data.len();
        if end > staging.image.len() {
            return Err(LoadError::Malformed(format!(
                "fragment {}..{} past table end {}",
                offset,
                end,
                staging.image.len()
            )));
        }
        staging.image[offset..end].copy_from_slice(frag.data);

        if !frag.is_end() {
            return Ok(());
        }
        let Some(staging) = slot.take() else {
            return Ok(());
        };
        let malformed = |e: DrawbridgeError| LoadError::Malformed(e.to_string());
        match table {
            ImageTable::Class => {
                let acl = decode_class(&staging.image).map_err(malformed)?;
                state.acl.replace_class(index as u8, acl);
            }
            ImageTable::Reject => state.acl.replace_reject(decode_reject(&staging.image).map_err(malformed)?),
            ImageTable::Allow => state.acl.replace_allow(decode_allow(&staging.image).map_err(malformed)?),
        }
        tracing::info!(kind = ?table.kind(), index, "table loaded");
        Ok(())
    }
}
