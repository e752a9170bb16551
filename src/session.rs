//! # Sessions and the Migration Buffer
//!
//! One [`Session`] exists per logical player connection. When the client is
//! redirected from the login listener to the game listener, the login-side
//! session is snapshotted into the pending-migration buffer keyed by its
//! session key; the game-side connection claims it with an atomic
//! find-and-remove. Claiming atomically is the point: two connections
//! presenting the same key must never both win.
//!
//! ## Invariants
//! - At most one pending migration per session key at any instant.
//! - `auth_id == 0` means unauthenticated; such sessions are discarded on
//!   disconnect instead of stashed.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::protocol::ClientVersion;

/// Where a connection sits in the login → game handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStage {
    /// Accepted, nothing validated yet.
    #[default]
    Connected,
    /// Credentials accepted and a game server picked; session key issued.
    ServerSelected,
    /// Claimed on the game listener; compressed from here on.
    Migrated,
    /// The embedding application has put a character in the world.
    Playing,
}

/// Per-connection protocol state.
#[derive(Debug, Clone)]
pub struct Session {
    /// Connection-scoped id, unique per accepted socket.
    pub id: String,
    /// Handshake seed stripped from the first inbound buffer.
    pub seed: i32,
    /// Session key binding login and game listeners; 0 = unauthenticated.
    pub auth_id: u32,
    pub account_id: String,
    pub client_version: ClientVersion,
    /// Set at migration; every later outbound payload is compressed.
    pub use_compression: bool,
    pub first_packet_received: bool,
    /// Whether a handshake seed was seen for this connection.
    pub is_seed: bool,
    pub stage: SessionStage,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            seed: 0,
            auth_id: 0,
            account_id: String::new(),
            client_version: ClientVersion::default(),
            use_compression: false,
            first_packet_received: false,
            is_seed: false,
            stage: SessionStage::Connected,
        }
    }

    /// Fields that survive the hop between listeners.
    pub fn snapshot(&self) -> PendingMigration {
        PendingMigration {
            auth_id: self.auth_id,
            account_id: self.account_id.clone(),
            client_version: self.client_version,
            seed: self.seed,
            first_packet_received: self.first_packet_received,
            is_seed: self.is_seed,
            stashed_at: Instant::now(),
        }
    }

    /// Apply a claimed snapshot to this (game-listener) session.
    pub fn adopt(&mut self, pending: &PendingMigration) {
        self.auth_id = pending.auth_id;
        self.account_id = pending.account_id.clone();
        self.client_version = pending.client_version;
        self.seed = pending.seed;
        self.first_packet_received = pending.first_packet_received;
        self.is_seed = pending.is_seed;
        self.use_compression = true;
        self.stage = SessionStage::Migrated;
    }
}

/// A session snapshot stashed between login disconnect and game claim.
#[derive(Debug, Clone)]
pub struct PendingMigration {
    pub auth_id: u32,
    pub account_id: String,
    pub client_version: ClientVersion,
    pub seed: i32,
    pub first_packet_received: bool,
    pub is_seed: bool,
    stashed_at: Instant,
}

impl PendingMigration {
    pub fn age(&self) -> Duration {
        self.stashed_at.elapsed()
    }
}

/// Concurrent map of live sessions plus the keyed migration buffer.
///
/// Both maps are sharded [`DashMap`]s; migration claim is a single
/// `remove`, so lookup and removal cannot interleave with a racing claim
/// for the same key.
pub struct SessionStore {
    sessions: DashMap<String, Session>,
    pending: DashMap<u32, PendingMigration>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            pending: DashMap::new(),
        }
    }

    /// Create the session record for a freshly accepted connection.
    pub fn create(&self, connection_id: &str) {
        self.sessions
            .insert(connection_id.to_string(), Session::new(connection_id));
    }

    /// Clone out a session by connection id.
    pub fn get(&self, connection_id: &str) -> Option<Session> {
        self.sessions.get(connection_id).map(|s| s.clone())
    }

    /// Run a closure against the live session record.
    pub fn with_session<R>(
        &self,
        connection_id: &str,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Option<R> {
        self.sessions.get_mut(connection_id).map(|mut s| f(&mut s))
    }

    /// Drop the session for a closed connection.
    pub fn remove(&self, connection_id: &str) -> Option<Session> {
        self.sessions.remove(connection_id).map(|(_, s)| s)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Stash a snapshot for the game listener to claim.
    ///
    /// Keys are full-range random u32s, so a collision means a stale entry
    /// from an abandoned handoff; the newer session wins and the event is
    /// logged.
    pub fn stash_pending(&self, pending: PendingMigration) {
        let key = pending.auth_id;
        if self.pending.insert(key, pending).is_some() {
            warn!(session_key = key, "Replaced stale pending migration");
        } else {
            debug!(session_key = key, "Session stashed for migration");
        }
    }

    /// Atomically claim the pending migration for a session key.
    ///
    /// Exactly one caller can win for a given key; every other concurrent
    /// claim sees `None`.
    pub fn claim_pending(&self, session_key: u32) -> Option<PendingMigration> {
        self.pending.remove(&session_key).map(|(_, p)| p)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop pending migrations older than `max_age`; returns how many went.
    pub fn purge_stale_pending(&self, max_age: Duration) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, p| p.age() < max_age);
        let purged = before - self.pending.len();
        if purged > 0 {
            debug!(purged, "Purged stale pending migrations");
        }
        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn selected_session(id: &str, key: u32) -> Session {
        let mut session = Session::new(id);
        session.auth_id = key;
        session.account_id = "guest".into();
        session.seed = 77;
        session.first_packet_received = true;
        session.is_seed = true;
        session.stage = SessionStage::ServerSelected;
        session
    }

    #[test]
    fn snapshot_then_adopt_copies_identity() {
        let login = selected_session("login-1", 9001);
        let pending = login.snapshot();

        let mut game = Session::new("game-1");
        game.adopt(&pending);

        assert_eq!(game.auth_id, 9001);
        assert_eq!(game.account_id, "guest");
        assert_eq!(game.seed, 77);
        assert!(game.use_compression);
        assert!(game.first_packet_received);
        assert!(game.is_seed);
        assert_eq!(game.stage, SessionStage::Migrated);
        // The game connection keeps its own id.
        assert_eq!(game.id, "game-1");
    }

    #[test]
    fn claim_is_single_winner() {
        let store = Arc::new(SessionStore::new());
        store.stash_pending(selected_session("login-1", 5).snapshot());

        let mut winners = 0;
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || store.claim_pending(5).is_some()));
        }
        for handle in handles {
            if handle.join().expect("claim thread") {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(store.pending_len(), 0);
    }

    #[test]
    fn one_pending_entry_per_key() {
        let store = SessionStore::new();
        store.stash_pending(selected_session("a", 42).snapshot());
        store.stash_pending(selected_session("b", 42).snapshot());
        assert_eq!(store.pending_len(), 1);
    }

    #[test]
    fn purge_only_removes_old_entries() {
        let store = SessionStore::new();
        store.stash_pending(selected_session("a", 1).snapshot());
        assert_eq!(store.purge_stale_pending(Duration::from_secs(60)), 0);
        assert_eq!(store.purge_stale_pending(Duration::ZERO), 1);
        assert_eq!(store.pending_len(), 0);
    }
}
