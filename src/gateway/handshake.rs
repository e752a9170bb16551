//! The login → game handoff state machine.
//!
//! Per physical connection the stages run:
//!
//! ```text
//! Connected(login) ── 0x80 ok ──► server list ── 0xA0 ──► ServerSelected
//!        │                                                      │
//!        │                                        0x8C redirect + key
//!        ▼                                                      ▼
//!   disconnect, auth_id == 0: discard          disconnect: stash pending
//!                                                               │
//! Connected(game) ── 0x91 key ── claim ──► Migrated (compressed) │
//!                        │                                       │
//!                        └── no pending entry: 0x82, close ◄─────┘
//! ```
//!
//! The claim is a single atomic find-and-remove on the pending map, so two
//! connections racing with the same key produce exactly one migrated
//! session and one denial.

use std::sync::{Arc, Weak};

use rand::Rng;
use tracing::{debug, info, warn};

use crate::gateway::{NetworkGateway, PacketEvent};
use crate::protocol::game::{GameServerLogin, Ping};
use crate::protocol::login::{
    AccountLoginRequest, DenialReason, LoginSeed, ServerListEntry, ServerListPacket, ServerRedirect,
    ServerSelect,
};
use crate::scheduler::ActionPriority;
use crate::session::SessionStage;
use crate::transport::ListenerRole;

/// Draw a session key: a 31-bit non-negative value, then an independent
/// coin flip for the top bit, giving the full u32 range.
///
/// A draw of zero is possible and means the session reads as
/// unauthenticated; the deployed client re-logs on the resulting denial,
/// so the draw is kept bit-compatible instead of being re-rolled.
fn generate_session_key() -> u32 {
    let mut rng = rand::rng();
    let mut key = rng.random_range(0..=i32::MAX as u32);
    if rng.random_bool(0.5) {
        key |= 0x8000_0000;
    }
    key
}

/// Low-priority self-rescheduling sweep of unclaimed migrations.
pub(crate) fn schedule_migration_purge(gateway: &Arc<NetworkGateway>) {
    let weak = Arc::downgrade(gateway);
    let ttl = gateway.config().shard.migration_ttl;
    gateway.scheduler().enqueue_delayed_action(
        "purge stale migrations",
        move || {
            if let Some(gateway) = weak.upgrade() {
                gateway.sessions().purge_stale_pending(ttl);
                schedule_migration_purge(&gateway);
            }
        },
        ttl,
        ActionPriority::Low,
    );
}

fn with_gateway(
    weak: &Weak<NetworkGateway>,
    f: impl FnOnce(Arc<NetworkGateway>),
) {
    if let Some(gateway) = weak.upgrade() {
        f(gateway);
    }
}

impl NetworkGateway {
    /// Wire up the built-in opcode listeners for the handshake machine and
    /// the keepalive echo. Called once from the builder.
    pub(crate) fn install_protocol_handlers(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.register_listener(0xEF, move |event| {
            let weak = weak.clone();
            async move { with_gateway(&weak, |gw| gw.on_login_seed(&event)) }
        });

        let weak = Arc::downgrade(self);
        self.register_listener(0x80, move |event| {
            let weak = weak.clone();
            async move { with_gateway(&weak, |gw| gw.on_account_login(&event)) }
        });

        let weak = Arc::downgrade(self);
        self.register_listener(0xA0, move |event| {
            let weak = weak.clone();
            async move { with_gateway(&weak, |gw| gw.on_server_select(&event)) }
        });

        let weak = Arc::downgrade(self);
        self.register_listener(0x91, move |event| {
            let weak = weak.clone();
            async move { with_gateway(&weak, |gw| gw.on_game_login(&event)) }
        });

        let weak = Arc::downgrade(self);
        self.register_listener(0x73, move |event| {
            let weak = weak.clone();
            async move { with_gateway(&weak, |gw| gw.on_ping(&event)) }
        });
    }

    fn on_login_seed(self: &Arc<Self>, event: &PacketEvent) {
        let Some(seed) = event.packet.as_any().downcast_ref::<LoginSeed>() else {
            return;
        };
        let (seed_value, version) = (seed.seed, seed.version);
        self.sessions().with_session(&event.connection_id, |s| {
            s.seed = seed_value;
            s.is_seed = true;
            s.client_version = version;
        });
        debug!(
            connection = %event.connection_id,
            version = %version,
            "Login seed received"
        );
    }

    fn on_account_login(self: &Arc<Self>, event: &PacketEvent) {
        if event.role != ListenerRole::Login {
            warn!(connection = %event.connection_id, "0x80 on game listener ignored");
            return;
        }
        let Some(request) = event.packet.as_any().downcast_ref::<AccountLoginRequest>() else {
            return;
        };

        if !self
            .validator()
            .validate(&request.username, &request.password)
        {
            info!(
                connection = %event.connection_id,
                account = %request.username,
                "Credentials rejected"
            );
            self.deny_and_close(&event.connection_id, DenialReason::InvalidCredentials);
            return;
        }

        let username = request.username.clone();
        self.sessions().with_session(&event.connection_id, |s| {
            s.account_id = username.clone();
        });

        let shard = &self.config().shard;
        let address = match self.config().game.public_ipv4() {
            Ok(address) => address,
            Err(e) => {
                warn!(error = %e, "Bad game listener address; denying login");
                self.deny_and_close(&event.connection_id, DenialReason::CommunicationProblem);
                return;
            }
        };

        let list = ServerListPacket {
            flags: shard.list_flags,
            entries: vec![ServerListEntry {
                index: 1,
                name: shard.name.clone(),
                percent_full: 0,
                timezone: shard.timezone,
                address,
            }],
        };
        info!(
            connection = %event.connection_id,
            account = %request.username,
            "Credentials accepted; server list sent"
        );
        self.send_packet(&event.connection_id, list);
    }

    fn on_server_select(self: &Arc<Self>, event: &PacketEvent) {
        if event.role != ListenerRole::Login {
            warn!(connection = %event.connection_id, "0xA0 on game listener ignored");
            return;
        }
        let Some(select) = event.packet.as_any().downcast_ref::<ServerSelect>() else {
            return;
        };

        let session_key = generate_session_key();
        self.sessions().with_session(&event.connection_id, |s| {
            s.auth_id = session_key;
            s.stage = SessionStage::ServerSelected;
        });

        let game = &self.config().game;
        let address = match game.public_ipv4() {
            Ok(address) => address,
            Err(e) => {
                warn!(error = %e, "Bad game listener address; dropping redirect");
                return;
            }
        };

        info!(
            connection = %event.connection_id,
            server_index = select.index,
            session_key,
            "Server selected; redirecting to game listener"
        );
        self.send_packet(
            &event.connection_id,
            ServerRedirect {
                address,
                port: game.port,
                session_key,
            },
        );
    }

    fn on_game_login(self: &Arc<Self>, event: &PacketEvent) {
        if event.role != ListenerRole::Game {
            warn!(connection = %event.connection_id, "0x91 on login listener ignored");
            return;
        }
        let Some(login) = event.packet.as_any().downcast_ref::<GameServerLogin>() else {
            return;
        };

        match self.sessions().claim_pending(login.session_key) {
            Some(pending) => {
                self.sessions()
                    .with_session(&event.connection_id, |s| s.adopt(&pending));
                info!(
                    connection = %event.connection_id,
                    session_key = login.session_key,
                    account = %pending.account_id,
                    "Session migrated to game listener"
                );
            }
            None => {
                warn!(
                    connection = %event.connection_id,
                    session_key = login.session_key,
                    "Unknown session key; rejecting"
                );
                self.deny_and_close(&event.connection_id, DenialReason::CommunicationProblem);
            }
        }
    }

    fn on_ping(self: &Arc<Self>, event: &PacketEvent) {
        if let Some(ping) = event.packet.as_any().downcast_ref::<Ping>() {
            self.send_packet(
                &event.connection_id,
                Ping {
                    sequence: ping.sequence,
                },
            );
        }
    }
}
