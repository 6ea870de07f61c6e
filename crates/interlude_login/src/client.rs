//! Per-connection state machine for login clients.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use interlude_crypt::{new_dynamic_blowfish_key, ScrambledKeyPair};
use interlude_net::{
    LoginServerCipher, PacketDecoder, PacketEncoder, PacketIo, SessionCipher, WireCipher,
};
use interlude_protocol::packets::inter_gs::server_status;
use interlude_protocol::packets::login_c2s::{ClientFrame, RequestAuthLogin};
use interlude_protocol::packets::login_s2c::{
    AccountKicked, AccountKickedReason, GgAuth, Init, LoginFail, LoginFailReason, LoginOk,
    PlayFail, PlayFailReason, PlayOk, ServerList, ServerListEntry,
};
use interlude_protocol::SessionKey;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::account::{constant_time_eq, hash_password};
use crate::LoginContext;

/// Offsets of the credentials inside the decrypted RSA block.
const USER_OFFSET: usize = 0x5e;
const USER_LEN: usize = 14;
const PASS_OFFSET: usize = 0x6c;
const PASS_LEN: usize = 16;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ClientState {
    Connected,
    AuthedGg,
    AuthedLogin,
}

pub(crate) async fn handle_client(ctx: Arc<LoginContext>, stream: TcpStream, addr: SocketAddr) {
    if let Err(e) = run_client(ctx, stream, addr).await {
        // EOF mid-handshake is a client giving up, not an incident.
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::UnexpectedEof {
                return;
            }
        }
        debug!(%addr, "login connection ended: {e:#}");
    }
}

async fn run_client(
    ctx: Arc<LoginContext>,
    stream: TcpStream,
    addr: SocketAddr,
) -> anyhow::Result<()> {
    let session_id = ctx.next_session_id();
    let key_pair = ctx.rsa_keys().next_key();
    let blowfish_key = new_dynamic_blowfish_key();

    let enc = PacketEncoder::new(WireCipher::LoginServer(LoginServerCipher::new(
        &blowfish_key,
    )?));
    let dec = PacketDecoder::new(WireCipher::Session(SessionCipher::new(&blowfish_key)?));
    let mut io = PacketIo::new(
        stream,
        enc,
        dec,
        ctx.config.read_timeout(),
        ctx.buffers.clone(),
    );

    io.send_packet(&Init {
        session_id,
        scrambled_modulus: *key_pair.scrambled_modulus(),
        blowfish_key,
    })
    .await?;

    let mut state = ClientState::Connected;
    let mut issued: Option<(String, SessionKey)> = None;

    loop {
        let frame = io.recv_frame().await?;
        let pkt = match ClientFrame::decode_frame(&frame) {
            Ok(pkt) => pkt,
            Err(e) => {
                warn!(%addr, "malformed login packet: {e:#}");
                io.send_packet(&LoginFail {
                    reason: LoginFailReason::AccessFailed,
                })
                .await?;
                return Ok(());
            }
        };

        match (state, pkt) {
            (ClientState::Connected, ClientFrame::AuthGameGuard(gg)) => {
                if gg.session_id != session_id {
                    warn!(%addr, "GameGuard echoed a foreign session id");
                    io.send_packet(&LoginFail {
                        reason: LoginFailReason::AccessFailed,
                    })
                    .await?;
                    return Ok(());
                }
                io.send_packet(&GgAuth { session_id }).await?;
                state = ClientState::AuthedGg;
            }

            (ClientState::AuthedGg, ClientFrame::RequestAuthLogin(req)) => {
                match authenticate(&ctx, key_pair, &req, addr.ip()).await {
                    AuthOutcome::Success { account, key } => {
                        info!(%account, %addr, "login succeeded");
                        issued = Some((account, key));
                        state = ClientState::AuthedLogin;
                        if ctx.config.show_licence {
                            io.send_packet(&LoginOk {
                                login_ok1: key.login_ok1,
                                login_ok2: key.login_ok2,
                            })
                            .await?;
                        } else {
                            io.send_packet(&build_server_list(&ctx)).await?;
                        }
                    }
                    AuthOutcome::BadCredentials => {
                        io.send_packet(&LoginFail {
                            reason: LoginFailReason::UserOrPassWrong,
                        })
                        .await?;
                        return Ok(());
                    }
                    AuthOutcome::Banned => {
                        io.send_packet(&AccountKicked {
                            reason: AccountKickedReason::PermanentlyBanned,
                        })
                        .await?;
                        return Ok(());
                    }
                    AuthOutcome::AlreadyOnline => {
                        io.send_packet(&LoginFail {
                            reason: LoginFailReason::AccountInUse,
                        })
                        .await?;
                        return Ok(());
                    }
                    AuthOutcome::Malformed => {
                        io.send_packet(&LoginFail {
                            reason: LoginFailReason::AccessFailed,
                        })
                        .await?;
                        return Ok(());
                    }
                    AuthOutcome::StoreFailure => {
                        // The database hiccuped; this connection is lost
                        // but the process carries on.
                        io.send_packet(&LoginFail {
                            reason: LoginFailReason::SystemError,
                        })
                        .await?;
                        return Ok(());
                    }
                }
            }

            (ClientState::AuthedLogin, ClientFrame::RequestServerList(req)) => {
                let Some((_, key)) = &issued else {
                    continue;
                };
                // Without the license screen the client never saw the
                // login pair, so there is nothing for it to echo.
                if ctx.config.show_licence
                    && (key.login_ok1 != req.login_ok1 || key.login_ok2 != req.login_ok2)
                {
                    io.send_packet(&LoginFail {
                        reason: LoginFailReason::AccessFailed,
                    })
                    .await?;
                    return Ok(());
                }
                io.send_packet(&build_server_list(&ctx)).await?;
            }

            (ClientState::AuthedLogin, ClientFrame::RequestServerLogin(req)) => {
                let Some((account, key)) = &issued else {
                    continue;
                };
                if ctx.config.show_licence
                    && (key.login_ok1 != req.login_ok1 || key.login_ok2 != req.login_ok2)
                {
                    io.send_packet(&LoginFail {
                        reason: LoginFailReason::AccessFailed,
                    })
                    .await?;
                    return Ok(());
                }

                let joinable = ctx
                    .gameservers
                    .get(req.server_id)
                    .is_some_and(|s| s.read().authed);
                if joinable {
                    debug!(%account, server = req.server_id, "play authorized");
                    io.send_packet(&PlayOk {
                        play_ok1: key.play_ok1,
                        play_ok2: key.play_ok2,
                    })
                    .await?;
                } else {
                    io.send_packet(&PlayFail {
                        reason: PlayFailReason::ServerOverloaded,
                    })
                    .await?;
                }
            }

            (state, other) => {
                // Wrong-state opcodes are ignored; the connection lives on.
                warn!(
                    %addr,
                    ?state,
                    packet = other.name(),
                    "ignoring packet outside its state"
                );
            }
        }
    }
}

enum AuthOutcome {
    Success { account: String, key: SessionKey },
    BadCredentials,
    Banned,
    AlreadyOnline,
    Malformed,
    StoreFailure,
}

async fn authenticate(
    ctx: &LoginContext,
    key_pair: &ScrambledKeyPair,
    req: &RequestAuthLogin,
    ip: IpAddr,
) -> AuthOutcome {
    let plain = match key_pair.key().decrypt_raw(&req.block) {
        Ok(plain) => plain,
        Err(e) => {
            warn!("credential block failed RSA: {e}");
            return AuthOutcome::Malformed;
        }
    };

    let Some((login, password)) = extract_credentials(&plain) else {
        return AuthOutcome::Malformed;
    };
    if login.is_empty() {
        return AuthOutcome::Malformed;
    }

    let password_hash = hash_password(&password);

    let lookup = if ctx.config.auto_create_accounts {
        ctx.accounts
            .get_or_create(&login, &password_hash, ip)
            .await
            .map(Some)
    } else {
        ctx.accounts.get_account(&login).await
    };

    let account = match lookup {
        Ok(Some(account)) => account,
        Ok(None) => return AuthOutcome::BadCredentials,
        Err(e) => {
            tracing::error!(%login, "account store failure: {e:#}");
            return AuthOutcome::StoreFailure;
        }
    };

    if account.access_level < 0 {
        return AuthOutcome::Banned;
    }
    if !constant_time_eq(&account.password_hash, &password_hash) {
        return AuthOutcome::BadCredentials;
    }
    if ctx.sessions.contains(&login) || ctx.in_game.read().contains_key(&login) {
        return AuthOutcome::AlreadyOnline;
    }

    let key = SessionKey::generate();
    ctx.sessions.store(&login, key);
    if let Err(e) = ctx.accounts.update_last_login(&login, ip).await {
        tracing::error!(%login, "failed to record last login: {e:#}");
    }

    AuthOutcome::Success {
        account: login,
        key,
    }
}

/// Pulls login and password out of the decrypted block. The login is
/// trimmed of trailing nul/space and lowercased; the password only
/// trimmed.
fn extract_credentials(plain: &[u8]) -> Option<(String, String)> {
    if plain.len() < PASS_OFFSET + PASS_LEN {
        return None;
    }

    let login = trim_field(&plain[USER_OFFSET..USER_OFFSET + USER_LEN])?.to_lowercase();
    let password = trim_field(&plain[PASS_OFFSET..PASS_OFFSET + PASS_LEN])?;
    Some((login, password))
}

fn trim_field(raw: &[u8]) -> Option<String> {
    let end = raw
        .iter()
        .rposition(|&b| b != 0 && b != b' ')
        .map_or(0, |i| i + 1);
    std::str::from_utf8(&raw[..end]).ok().map(str::to_owned)
}

fn build_server_list(ctx: &LoginContext) -> ServerList {
    let servers = ctx
        .gameservers
        .list()
        .into_iter()
        .map(|info| ServerListEntry {
            id: info.id,
            ip: server_ip(&info.hosts),
            port: i32::from(info.port),
            age_limit: info.age_limit,
            pvp: true,
            current_players: ctx.players_on(info.id),
            max_players: info.max_players as u16,
            online: info.authed && info.status != server_status::STATUS_DOWN,
            server_type: info.server_type,
            brackets: info.show_brackets,
        })
        .collect();

    ServerList {
        last_server: 1,
        servers,
    }
}

fn server_ip(hosts: &[String]) -> Ipv4Addr {
    hosts
        .iter()
        .find_map(|h| h.parse().ok())
        .unwrap_or(Ipv4Addr::LOCALHOST)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_are_trimmed_and_lowercased() {
        let mut block = vec![0u8; 128];
        block[USER_OFFSET..USER_OFFSET + 5].copy_from_slice(b"Alice");
        block[PASS_OFFSET..PASS_OFFSET + 6].copy_from_slice(b"secret");

        let (login, password) = extract_credentials(&block).unwrap();
        assert_eq!(login, "alice");
        assert_eq!(password, "secret");
    }

    #[test]
    fn trailing_spaces_and_nuls_are_stripped() {
        let mut block = vec![0u8; 128];
        block[USER_OFFSET..USER_OFFSET + 7].copy_from_slice(b"bob  \0\0");
        block[PASS_OFFSET..PASS_OFFSET + 4].copy_from_slice(b"pw \0");

        let (login, password) = extract_credentials(&block).unwrap();
        assert_eq!(login, "bob");
        assert_eq!(password, "pw");
    }

    #[test]
    fn short_blocks_are_malformed() {
        assert!(extract_credentials(&[0u8; 64]).is_none());
    }
}
