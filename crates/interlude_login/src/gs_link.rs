//! The listener side of the login↔game-server channel.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, ensure};
use interlude_crypt::{RsaKeyPair, INTER_BOOTSTRAP_KEY};
use interlude_net::{Outbox, PacketDecoder, PacketEncoder, PacketIo, SessionCipher, SplitConfig, WireCipher};
use interlude_protocol::packets::inter_gs::{server_status, GameServerAuth, GsFrame};
use interlude_protocol::packets::inter_ls::{
    AuthResponse, InitLs, KickPlayer, LoginServerFail, LoginServerFailReason, PlayerAuthResponse,
};
use interlude_protocol::INTER_PROTOCOL_REVISION;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::registry::GameServerInfo;
use crate::LoginContext;

/// Live channels to authenticated game servers, for login-server-initiated
/// traffic (kick orders, character requests).
#[derive(Default)]
pub struct GsLinks {
    channels: RwLock<FxHashMap<u8, Outbox>>,
}

impl GsLinks {
    pub(crate) fn attach(&self, server_id: u8, outbox: Outbox) {
        self.channels.write().insert(server_id, outbox);
    }

    pub(crate) fn detach(&self, server_id: u8) {
        self.channels.write().remove(&server_id);
    }

    /// Orders `server_id` to drop `account`. False if the channel is gone.
    pub fn kick(&self, server_id: u8, account: &str) -> bool {
        let channels = self.channels.read();
        channels.get(&server_id).is_some_and(|outbox| {
            outbox.send_packet(&KickPlayer {
                account: account.to_owned(),
            })
        })
    }

    pub fn connected(&self) -> usize {
        self.channels.read().len()
    }
}

pub(crate) async fn handle_gameserver(ctx: Arc<LoginContext>, stream: TcpStream, addr: SocketAddr) {
    if let Err(e) = run_gameserver(ctx, stream, addr).await {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::UnexpectedEof {
                return;
            }
        }
        debug!(%addr, "game server link ended: {e:#}");
    }
}

async fn run_gameserver(
    ctx: Arc<LoginContext>,
    stream: TcpStream,
    addr: SocketAddr,
) -> anyhow::Result<()> {
    // A fresh 512-bit key per connecting game server; only the Blowfish
    // key exchange rides on it. Keygen is CPU-bound, so off the worker.
    let rsa = tokio::task::spawn_blocking(|| RsaKeyPair::generate(512)).await??;

    let enc = PacketEncoder::new(WireCipher::Session(SessionCipher::new(INTER_BOOTSTRAP_KEY)?));
    let dec = PacketDecoder::new(WireCipher::Session(SessionCipher::new(INTER_BOOTSTRAP_KEY)?));
    let mut io = PacketIo::new(
        stream,
        enc,
        dec,
        ctx.config.read_timeout(),
        ctx.buffers.clone(),
    );

    io.send_packet(&InitLs {
        revision: INTER_PROTOCOL_REVISION,
        modulus: rsa.modulus_bytes(),
    })
    .await?;

    // CONNECTED → BF_CONNECTED: the only packet that moves us forward is
    // BlowFishKey; anything else in this state is ignored with a warning.
    loop {
        let frame = io.recv_frame().await?;
        match decode_or_fail(&mut io, &frame, addr).await? {
            GsFrame::BlowFishKey(pkt) => {
                let plain = rsa.decrypt_raw(&pkt.encrypted)?;
                ensure!(plain.len() == 64, "key exchange block must be 64 bytes");
                let new_key = &plain[plain.len() - 40..];

                io.encoder_mut()
                    .set_cipher(WireCipher::Session(SessionCipher::new(new_key)?));
                io.decoder_mut()
                    .set_cipher(WireCipher::Session(SessionCipher::new(new_key)?));
                break;
            }
            other => warn!(%addr, packet = other.name(), "ignoring packet before key exchange"),
        }
    }

    // BF_CONNECTED → AUTHED.
    let server_id = loop {
        let frame = io.recv_frame().await?;
        match decode_or_fail(&mut io, &frame, addr).await? {
            GsFrame::GameServerAuth(pkt) => match register_gameserver(&ctx, &pkt) {
                Ok(id) => {
                    io.send_packet(&AuthResponse {
                        server_id: id,
                        server_name: format!("GS-{id}"),
                    })
                    .await?;
                    break id;
                }
                Err(reason) => {
                    io.send_packet(&LoginServerFail { reason }).await?;
                    bail!("registration refused: {reason:?}");
                }
            },
            other => warn!(%addr, packet = other.name(), "ignoring packet before registration"),
        }
    };

    info!(%addr, server_id, "game server authenticated");

    // Steady state: split so kicks can flow out while requests flow in.
    let split = io.split(SplitConfig {
        queue_size: ctx.config.send_queue_size,
        read_timeout: ctx.config.read_timeout(),
        write_timeout: ctx.config.write_timeout(),
    });
    ctx.links.attach(server_id, split.outbox.clone());

    while let Ok(frame) = split.inbound.recv_async().await {
        let pkt = match GsFrame::decode_frame(&frame) {
            Ok(pkt) => pkt,
            Err(e) => {
                warn!(server_id, "malformed game server packet: {e:#}");
                split.outbox.send_packet(&LoginServerFail {
                    reason: LoginServerFailReason::WrongHexId,
                });
                break;
            }
        };
        handle_authed_frame(&ctx, server_id, &split.outbox, pkt);
    }

    // Keep the slot (the installation may reconnect) but free the account
    // attachments and the live channel.
    ctx.links.detach(server_id);
    if let Some(info) = ctx.gameservers.get(server_id) {
        info.write().authed = false;
    }
    ctx.in_game.write().retain(|_, &mut sid| sid != server_id);
    info!(server_id, "game server detached");

    Ok(())
}

fn handle_authed_frame(ctx: &LoginContext, server_id: u8, outbox: &Outbox, pkt: GsFrame) {
    match pkt {
        GsFrame::PlayerInGame(p) => {
            let mut in_game = ctx.in_game.write();
            for account in p.accounts {
                in_game.insert(account, server_id);
            }
        }

        GsFrame::PlayerLogout(p) => {
            let mut in_game = ctx.in_game.write();
            if in_game.get(&p.account) == Some(&server_id) {
                in_game.remove(&p.account);
            }
        }

        GsFrame::PlayerAuthRequest(p) => {
            let strict = ctx.config.show_licence;
            let authorized = ctx.sessions.take_if_matches(&p.account, &p.key, strict);

            if authorized {
                // A stale attachment elsewhere means the player double
                // logged in; the old server gets a kick order.
                let stale = ctx.in_game.read().get(&p.account).copied();
                if let Some(old_server) = stale {
                    if old_server != server_id {
                        debug!(account = %p.account, old_server, "kicking stale attachment");
                        ctx.links.kick(old_server, &p.account);
                    }
                }
            }

            outbox.send_packet(&PlayerAuthResponse {
                account: p.account,
                authorized,
            });
        }

        GsFrame::ServerStatus(p) => {
            if let Some(info) = ctx.gameservers.get(server_id) {
                let mut info = info.write();
                for (id, value) in p.attributes {
                    match id {
                        server_status::STATUS => info.status = value,
                        server_status::MAX_PLAYERS => info.max_players = value,
                        server_status::SERVER_AGE => info.age_limit = value as u8,
                        server_status::BRACKETS => info.show_brackets = value != 0,
                        server_status::TEST_SERVER => info.server_type = value,
                        server_status::CLOCK => {}
                        other => debug!(server_id, attribute = other, "ignoring unknown status attribute"),
                    }
                }
            }
        }

        other @ (GsFrame::BlowFishKey(_) | GsFrame::GameServerAuth(_)) => {
            warn!(server_id, packet = other.name(), "ignoring packet after registration");
        }
    }
}

/// Decodes a handshake-phase frame, answering garbage with the channel's
/// minimal failure before giving up on the connection.
async fn decode_or_fail(
    io: &mut PacketIo,
    frame: &[u8],
    addr: SocketAddr,
) -> anyhow::Result<GsFrame> {
    match GsFrame::decode_frame(frame) {
        Ok(pkt) => Ok(pkt),
        Err(e) => {
            warn!(%addr, "malformed game server packet: {e:#}");
            io.send_packet(&LoginServerFail {
                reason: LoginServerFailReason::WrongHexId,
            })
            .await?;
            bail!("malformed packet during registration")
        }
    }
}

/// The five registration rules, in order.
fn register_gameserver(
    ctx: &LoginContext,
    auth: &GameServerAuth,
) -> Result<u8, LoginServerFailReason> {
    match ctx.gameservers.get(auth.desired_id) {
        Some(slot) => {
            let hex_matches = slot.read().hex_id == auth.hex_id;
            if hex_matches {
                let mut info = slot.write();
                if info.authed {
                    return Err(LoginServerFailReason::AlreadyLoggedIn);
                }
                apply_auth(&mut info, auth);
                Ok(info.id)
            } else if auth.accept_alternate {
                let mut info = GameServerInfo::new(0, auth.hex_id.clone());
                apply_auth(&mut info, auth);
                ctx.gameservers
                    .register_first_available(info)
                    .ok_or(LoginServerFailReason::NoFreeId)
            } else {
                Err(LoginServerFailReason::WrongHexId)
            }
        }
        None => {
            let mut info = GameServerInfo::new(auth.desired_id, auth.hex_id.clone());
            apply_auth(&mut info, auth);
            if ctx.gameservers.register(auth.desired_id, info.clone()) {
                Ok(auth.desired_id)
            } else if auth.accept_alternate {
                // Lost the claim race after our existence check; fall back
                // the same way a hex-id mismatch would.
                ctx.gameservers
                    .register_first_available(info)
                    .ok_or(LoginServerFailReason::NoFreeId)
            } else {
                Err(LoginServerFailReason::IdReserved)
            }
        }
    }
}

fn apply_auth(info: &mut GameServerInfo, auth: &GameServerAuth) {
    info.port = auth.port;
    info.max_players = auth.max_players;
    info.hosts = auth.hosts.clone();
    info.authed = true;
}
