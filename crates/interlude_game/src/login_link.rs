//! The game server's client leg of the login↔game-server channel.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use interlude_crypt::{RsaRawPublicKey, INTER_BOOTSTRAP_KEY};
use interlude_net::{
    BufferPool, Outbox, PacketDecoder, PacketEncoder, PacketIo, SessionCipher, ShutdownRx,
    SplitConfig, WireCipher,
};
use interlude_protocol::packets::inter_gs::{
    server_status, BlowFishKey, GameServerAuth, PlayerAuthRequest, PlayerInGame, PlayerLogout,
    ServerStatus,
};
use interlude_protocol::packets::inter_ls::LsFrame;
use interlude_protocol::SessionKey;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::GameConfig;
use crate::store::CharacterStore;

/// How long a PlayerAuthRequest may wait for the login server's verdict.
const AUTH_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Invoked when the login server orders an account off this server.
pub type KickFn = Box<dyn Fn(&str) + Send + Sync>;

/// The persistent link to the login server. Reconnects with backoff,
/// performs the key exchange and registration on every (re)connect, and
/// relays session validation for connecting players.
pub struct LoginLink {
    config: GameConfig,
    characters: Arc<dyn CharacterStore>,
    buffers: Arc<BufferPool>,
    outbox: RwLock<Option<Outbox>>,
    server_id: RwLock<Option<u8>>,
    pending_auth: Mutex<FxHashMap<String, oneshot::Sender<bool>>>,
    on_kick: RwLock<Option<KickFn>>,
}

impl LoginLink {
    pub fn new(
        config: GameConfig,
        characters: Arc<dyn CharacterStore>,
        buffers: Arc<BufferPool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            characters,
            buffers,
            outbox: RwLock::new(None),
            server_id: RwLock::new(None),
            pending_auth: Mutex::new(FxHashMap::default()),
            on_kick: RwLock::new(None),
        })
    }

    pub fn set_kick_handler(&self, f: KickFn) {
        *self.on_kick.write() = Some(f);
    }

    /// The id the login server assigned, once registered.
    pub fn server_id(&self) -> Option<u8> {
        *self.server_id.read()
    }

    pub fn is_connected(&self) -> bool {
        self.outbox.read().as_ref().is_some_and(|o| !o.is_closed())
    }

    /// Asks the login server whether `key` is the session it issued for
    /// `account`. Consumes the session on the login side when it matches.
    pub async fn request_player_auth(
        &self,
        account: &str,
        key: SessionKey,
    ) -> anyhow::Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.pending_auth.lock().insert(account.to_owned(), tx);

        let sent = {
            let outbox = self.outbox.read();
            outbox.as_ref().is_some_and(|o| {
                o.send_packet(&PlayerAuthRequest {
                    account: account.to_owned(),
                    key,
                })
            })
        };
        if !sent {
            self.pending_auth.lock().remove(account);
            bail!("login server link is down");
        }

        match tokio::time::timeout(AUTH_REPLY_TIMEOUT, rx).await {
            Ok(Ok(authorized)) => Ok(authorized),
            Ok(Err(_)) => {
                bail!("login server link dropped while validating {account}")
            }
            Err(_) => {
                self.pending_auth.lock().remove(account);
                bail!("login server did not answer for {account}")
            }
        }
    }

    /// Tells the login server an account entered the world here.
    pub fn notify_in_game(&self, account: &str) {
        if let Some(outbox) = self.outbox.read().as_ref() {
            outbox.send_packet(&PlayerInGame {
                accounts: vec![account.to_owned()],
            });
        }
    }

    /// Tells the login server an account left this server.
    pub fn notify_logout(&self, account: &str) {
        if let Some(outbox) = self.outbox.read().as_ref() {
            outbox.send_packet(&PlayerLogout {
                account: account.to_owned(),
            });
        }
    }

    /// Pushes the current realm-list attributes.
    pub fn send_status(&self, status: i32, current_max: i32) {
        if let Some(outbox) = self.outbox.read().as_ref() {
            outbox.send_packet(&ServerStatus {
                attributes: vec![
                    (server_status::STATUS, status),
                    (server_status::MAX_PLAYERS, current_max),
                ],
            });
        }
    }

    /// Runs the link until shutdown: connect, register, serve, repeat.
    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownRx) {
        loop {
            let attempt = tokio::select! {
                attempt = self.clone().connect_once() => attempt,
                _ = shutdown.changed() => return,
            };

            *self.outbox.write() = None;
            self.fail_pending();

            match attempt {
                Ok(()) => info!("login server link closed; reconnecting"),
                Err(e) => warn!("login server link failed: {e:#}"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.login_reconnect_interval()) => {}
                _ = shutdown.changed() => return,
            }
        }
    }

    async fn connect_once(self: Arc<Self>) -> anyhow::Result<()> {
        let addr = (
            self.config.login_server_host.as_str(),
            self.config.login_server_port,
        );
        let stream = TcpStream::connect(addr)
            .await
            .context("connecting to login server")?;
        stream.set_nodelay(true).ok();

        let enc = PacketEncoder::new(WireCipher::Session(SessionCipher::new(INTER_BOOTSTRAP_KEY)?));
        let dec = PacketDecoder::new(WireCipher::Session(SessionCipher::new(INTER_BOOTSTRAP_KEY)?));
        let mut io = PacketIo::new(
            stream,
            enc,
            dec,
            self.config.read_timeout(),
            self.buffers.clone(),
        );

        // InitLs carries the RSA-512 modulus to wrap the replacement key.
        let frame = io.recv_frame().await?;
        let LsFrame::InitLs(init) = LsFrame::decode_frame(&frame)? else {
            bail!("expected InitLs first");
        };
        debug!(revision = init.revision, "login server hello");

        let public_key = RsaRawPublicKey::from_modulus(&init.modulus);
        let mut new_key = [0u8; 40];
        rand::Rng::fill(&mut rand::thread_rng(), &mut new_key[..]);
        let mut block = vec![0u8; public_key.block_len()];
        let key_at = block.len() - new_key.len();
        block[key_at..].copy_from_slice(&new_key);

        io.send_packet(&BlowFishKey {
            encrypted: public_key.encrypt_raw(&block)?,
        })
        .await?;

        io.encoder_mut()
            .set_cipher(WireCipher::Session(SessionCipher::new(&new_key)?));
        io.decoder_mut()
            .set_cipher(WireCipher::Session(SessionCipher::new(&new_key)?));

        io.send_packet(&GameServerAuth {
            desired_id: self.config.server_id,
            accept_alternate: self.config.accept_alternate_id,
            reserve_host: false,
            port: self.config.port,
            max_players: self.config.max_players,
            hex_id: self.config.hex_id_bytes(),
            hosts: self.config.external_hosts.clone(),
        })
        .await?;

        let frame = io.recv_frame().await?;
        let id = match LsFrame::decode_frame(&frame)? {
            LsFrame::AuthResponse(resp) => {
                info!(server_id = resp.server_id, name = %resp.server_name, "registered with login server");
                resp.server_id
            }
            LsFrame::LoginServerFail(fail) => {
                bail!("login server refused registration: {:?}", fail.reason)
            }
            other => bail!("unexpected packet during registration: {}", other.name()),
        };
        *self.server_id.write() = Some(id);

        let split = io.split(SplitConfig {
            queue_size: self.config.send_queue_size,
            read_timeout: self.config.read_timeout(),
            write_timeout: self.config.write_timeout(),
        });
        *self.outbox.write() = Some(split.outbox.clone());

        self.send_status(server_status::STATUS_GOOD, self.config.max_players);

        while let Ok(frame) = split.inbound.recv_async().await {
            let pkt = LsFrame::decode_frame(&frame)?;
            self.handle_frame(pkt).await;
        }
        Ok(())
    }

    async fn handle_frame(&self, pkt: LsFrame) {
        match pkt {
            LsFrame::PlayerAuthResponse(resp) => {
                if let Some(tx) = self.pending_auth.lock().remove(&resp.account) {
                    let _ = tx.send(resp.authorized);
                } else {
                    debug!(account = %resp.account, "auth response with no waiter");
                }
            }

            LsFrame::KickPlayer(kick) => {
                warn!(account = %kick.account, "kick ordered by login server");
                if let Some(f) = self.on_kick.read().as_ref() {
                    f(&kick.account);
                }
            }

            LsFrame::RequestCharacters(req) => {
                // The character-roster reply belongs to the character
                // surface; the core answers the lookup and records it.
                match self.characters.character_count(&req.account).await {
                    Ok(count) => debug!(account = %req.account, count, "character count requested"),
                    Err(e) => warn!(account = %req.account, "character store failure: {e:#}"),
                }
            }

            other => {
                debug!(packet = other.name(), "ignoring packet on established link");
            }
        }
    }

    fn fail_pending(&self) {
        let mut pending = self.pending_auth.lock();
        for (_, tx) in pending.drain() {
            let _ = tx.send(false);
        }
    }
}
