//! Management Channel
//!
//! Request/response handler for operator datagrams.
//!
//! # Receive path
//!
//! ```text
//!   datagram
//!      │
//!      ├─ reboot pending ──────────────────────────► ignore
//!      ├─ mode flag ≠ local mode ──────────────────► ERROR SECURE / INSECURE
//!      ├─ password loaded, not SYNC:
//!      │     no session ───────────────────────────► ERROR LOSTSYNC
//!      │     decrypt, checksum ≠ 0 ── invalidate ──► ERROR LOSTSYNC
//!      └─ dispatch by type (unknown types ignored)
//! ```
//!
//! ERROR replies always travel in the clear; everything else is sealed
//! with the session key once one exists.

use crate::checksum::checksum;
use crate::crypto::{build_new_session_key, client_init, server_init, ChaChaCipher, Challenge, FrameCipher};
use crate::framing::{self, seal};
use crate::persist::TableStore;
use crate::session::Session;
use crate::staging::Loader;
use crate::wire::{
    ErrorCode, FilterHeader, LoadFragment, MessageType, Query, QueryKind, Release, TableKind, CHALLENGE_LEN,
    CIPHER_OFFSET, HEADER_LEN, MAX_PASSWORD_LEN,
};
use bytes::BufMut;
use drawbridge_common::{dotted, FilterStatsSnapshot, MAX_CLASSES};
use drawbridge_policy::{AclTable, FirewallState};
use rand::rngs::OsRng;
use std::time::{Duration, Instant};

/// Default delay between REBOOTACK and the restart
pub const DEFAULT_REBOOT_DELAY: Duration = Duration::from_secs(2);

/// Management protocol endpoint
pub struct ManagementChannel<S: TableStore, C: FrameCipher = ChaChaCipher> {
    store: S,
    cipher: C,
    session: Session,
    loader: Loader,
    reboot_delay: Duration,
    reboot_at: Option<Instant>,
}

impl<S: TableStore> ManagementChannel<S, ChaChaCipher> {
    /// Create channel with the ChaCha20 framing cipher
    pub fn new(store: S, password: Option<Vec<u8>>) -> Self {
        Self::with_cipher(store, ChaChaCipher, password)
    }
}

impl<S: TableStore, C: FrameCipher> ManagementChannel<S, C> {
    /// Create channel with a custom cipher
    pub fn with_cipher(store: S, cipher: C, password: Option<Vec<u8>>) -> Self {
        Self {
            store,
            cipher,
            session: Session::new(password),
            loader: Loader::new(),
            reboot_delay: DEFAULT_REBOOT_DELAY,
            reboot_at: None,
        }
    }

    /// Set the REBOOT grace period
    pub fn with_reboot_delay(mut self, delay: Duration) -> Self {
        self.reboot_delay = delay;
        self
    }

    /// Session state
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Backing store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// When the requested restart is due
    pub fn reboot_deadline(&self) -> Option<Instant> {
        self.reboot_at
    }

    /// Whether REBOOT has been accepted
    pub fn reboot_requested(&self) -> bool {
        self.reboot_at.is_some()
    }

    /// Handle one datagram, returning the reply to send, if any
    pub fn handle_message(&mut self, state: &mut FirewallState, datagram: &[u8]) -> Option<Vec<u8>> {
        if self.reboot_requested() {
            return None;
        }

        let header = match FilterHeader::parse(datagram) {
            Ok(header) => header,
            Err(e) => {
                tracing::debug!(error = %e, "short management datagram");
                return None;
            }
        };

        let local_secure = self.session.password_loaded();
        if header.password_loaded() != local_secure {
            let code = if local_secure { ErrorCode::Secure } else { ErrorCode::Insecure };
            tracing::warn!(?code, "peer security mode mismatch");
            return Some(self.error(code));
        }

        let is_sync = header.msg_type == MessageType::Sync as u8;
        let (header, payload) = if local_secure && !is_sync {
            if !self.session.is_valid() {
                return Some(self.error(ErrorCode::LostSync));
            }
            match framing::open(&self.cipher, self.session.key(), datagram) {
                Ok(opened) => opened,
                Err(e) => {
                    tracing::warn!(error = %e, "integrity check failed, session dropped");
                    self.session.invalidate();
                    return Some(self.error(ErrorCode::LostSync));
                }
            }
        } else {
            (header, datagram[HEADER_LEN..].to_vec())
        };

        let Some(msg_type) = MessageType::from_u8(header.msg_type) else {
            tracing::debug!(msg_type = header.msg_type, "ignoring unknown message type");
            return None;
        };
        tracing::debug!(?msg_type, len = payload.len(), "management request");

        match msg_type {
            MessageType::Sync => self.handle_sync(datagram, &payload),
            MessageType::Reboot => Some(self.handle_reboot()),
            MessageType::NewKey => Some(self.handle_new_key(&payload)),
            MessageType::Query => Some(self.handle_query(state, &payload)),
            MessageType::Load => Some(self.handle_load(state, &payload)),
            MessageType::Write => Some(self.handle_write(state)),
            MessageType::Release => Some(self.handle_release(state, &payload)),
            MessageType::Statistics => Some(self.handle_statistics(state, &payload)),
            _ => {
                tracing::debug!(?msg_type, "ignoring reply-type message");
                None
            }
        }
    }

    // ========================================================================
    // Replies
    // ========================================================================

    fn reply(&self, msg_type: MessageType, payload: &[u8]) -> Vec<u8> {
        seal(
            &self.cipher,
            self.session.key(),
            msg_type,
            self.session.flags(),
            rand::random(),
            payload,
        )
    }

    fn error(&self, code: ErrorCode) -> Vec<u8> {
        seal(
            &self.cipher,
            None,
            MessageType::Error,
            self.session.flags(),
            rand::random(),
            &[code as u8],
        )
    }

    // ========================================================================
    // Commands
    // ========================================================================

    fn handle_sync(&mut self, datagram: &[u8], payload: &[u8]) -> Option<Vec<u8>> {
        let Some(password) = self.session.password().map(<[u8]>::to_vec) else {
            return Some(self.error(ErrorCode::Insecure));
        };
        if checksum(&datagram[CIPHER_OFFSET..], None) != 0 {
            tracing::warn!("SYNC failed checksum, session dropped");
            self.session.invalidate();
            return Some(self.error(ErrorCode::LostSync));
        }
        let Some(peer_challenge) = payload
            .get(..CHALLENGE_LEN)
            .and_then(|c| Challenge::try_from(c).ok())
        else {
            return Some(self.error(ErrorCode::Command));
        };

        self.session.invalidate();
        let (local, challenge) = match client_init(&password, &mut OsRng) {
            Ok(init) => init,
            Err(e) => {
                tracing::warn!(error = %e, "key derivation failed");
                return Some(self.error(ErrorCode::LostSync));
            }
        };
        // SYNCACK goes out before the new key exists, so it is plaintext
        let ack = self.reply(MessageType::SyncAck, &challenge);

        match server_init(&password, &peer_challenge) {
            Ok(peer) => {
                self.session.establish(build_new_session_key(&local, &peer));
                tracing::info!("management session established");
                Some(ack)
            }
            Err(e) => {
                tracing::warn!(error = %e, "key derivation failed");
                Some(self.error(ErrorCode::LostSync))
            }
        }
    }

    fn handle_reboot(&mut self) -> Vec<u8> {
        let ack = self.reply(MessageType::RebootAck, &[]);
        self.reboot_at = Some(Instant::now() + self.reboot_delay);
        tracing::info!(delay_ms = self.reboot_delay.as_millis() as u64, "reboot requested");
        ack
    }

    fn handle_new_key(&mut self, payload: &[u8]) -> Vec<u8> {
        if payload.is_empty() || payload.len() > MAX_PASSWORD_LEN {
            return self.error(ErrorCode::Command);
        }
        match self.store.write_password(payload) {
            Ok(()) => {
                self.session.set_password(payload.to_vec());
                tracing::info!("password replaced");
                self.reply(MessageType::NewKeyAck, &[])
            }
            Err(e) => {
                tracing::warn!(error = %e, "password not saved");
                self.error(e.password_code())
            }
        }
    }

    fn handle_query(&mut self, state: &mut FirewallState, payload: &[u8]) -> Vec<u8> {
        let Ok(query) = Query::parse(payload) else {
            return self.error(ErrorCode::Command);
        };

        let body = match QueryKind::from_u8(query.kind) {
            Some(QueryKind::Networks) => {
                let networks: Vec<u32> = state.classifier.networks().map(|e| e.network).collect();
                let mut body = Vec::with_capacity(2 + networks.len() * 4);
                body.put_u16(networks.len() as u16);
                for network in networks {
                    body.put_u32(network);
                }
                body
            }
            Some(QueryKind::Host) => vec![state.classifier.lookup(query.arg)],
            Some(QueryKind::Reject) => state.acl.encode(AclTable::Reject),
            Some(QueryKind::Allow) => state.acl.encode(AclTable::Allow),
            Some(QueryKind::Class) if (query.arg as usize) < MAX_CLASSES => state.acl.encode_class(query.arg as u8),
            Some(QueryKind::Class) | None => return self.error(ErrorCode::Command),
        };
        self.reply(MessageType::QueryAck, &body)
    }

    fn handle_load(&mut self, state: &mut FirewallState, payload: &[u8]) -> Vec<u8> {
        let frag = match LoadFragment::parse(payload) {
            Ok(frag) => frag,
            Err(e) => {
                tracing::debug!(error = %e, "bad LOAD");
                return self.error(ErrorCode::Command);
            }
        };
        match self.loader.apply(state, &frag) {
            Ok(()) => self.reply(MessageType::LoadAck, &frag.ack()),
            Err(e) => {
                tracing::warn!(error = %e, "LOAD failed");
                self.error(e.code())
            }
        }
    }

    /// Persist dirty tables in order; the first failure stops the rest.
    fn handle_write(&mut self, state: &mut FirewallState) -> Vec<u8> {
        for table in [AclTable::Reject, AclTable::Allow, AclTable::Classes] {
            if !state.acl.is_dirty(table) {
                continue;
            }
            if let Err(e) = self.store.write_table(table, &state.acl.encode(table)) {
                tracing::warn!(?table, error = %e, "WRITE stopped");
                return self.error(e.data_code());
            }
            state.acl.set_dirty(table, false);
        }

        for network in state.classifier.dirty_networks() {
            let result = state
                .classifier
                .host_table(network)
                .map_err(|e| {
                    tracing::warn!(network = %dotted(network), error = %e, "host table unreadable");
                    ErrorCode::DataWrite
                })
                .and_then(|image| {
                    self.store.write_network(network, &image).map_err(|e| {
                        tracing::warn!(network = %dotted(network), error = %e, "WRITE stopped");
                        e.data_code()
                    })
                });
            if let Err(code) = result {
                return self.error(code);
            }
            state.classifier.mark_clean(network);
        }

        tracing::info!("tables written");
        self.reply(MessageType::WriteAck, &[])
    }

    fn handle_release(&mut self, state: &mut FirewallState, payload: &[u8]) -> Vec<u8> {
        let Ok(release) = Release::parse(payload) else {
            return self.error(ErrorCode::Command);
        };
        let Some(kind) = TableKind::from_u8(release.kind) else {
            return self.error(ErrorCode::Command);
        };

        let removed = match kind {
            TableKind::Network => {
                if !state.classifier.release_network(release.index) {
                    return self.error(ErrorCode::NoNetwork);
                }
                tracing::info!(network = %dotted(release.index), "network released");
                self.store.remove_network(release.index)
            }
            TableKind::Class | TableKind::Reject | TableKind::Allow => {
                let table = match kind {
                    TableKind::Reject => AclTable::Reject,
                    TableKind::Allow => AclTable::Allow,
                    _ => AclTable::Classes,
                };
                state.acl.reset(table);
                tracing::info!(?table, "table reset to defaults");
                self.store.remove_table(table)
            }
        };

        match removed {
            Ok(()) => self.reply(MessageType::ReleaseAck, &[]),
            Err(e) => {
                tracing::warn!(error = %e, "persisted copy not removed");
                self.error(e.data_code())
            }
        }
    }

    fn handle_statistics(&mut self, state: &mut FirewallState, payload: &[u8]) -> Vec<u8> {
        let snapshot = state.statistics();
        if payload.first().is_some_and(|&clear| clear != 0) {
            state.clear_statistics();
        }

        let mut body = Vec::with_capacity(8 * FilterStatsSnapshot::FIELDS);
        for counter in snapshot.to_array() {
            body.put_u64(counter);
        }
        self.reply(MessageType::StatisticsAck, &body)
    }
}
