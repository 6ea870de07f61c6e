//! End-to-end login scenarios over real sockets, with a test client that
//! speaks the wire protocol exactly as the retail client does.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::BytesMut;
use crate::crypt::{unscramble_modulus, RsaRawPublicKey};
use crate::login::{LoginConfig, LoginServer, MemoryAccountStore};
use crate::net::{
    decrypt_login_init, BufferPool, PacketDecoder, PacketEncoder, PacketIo, SessionCipher,
    WireCipher,
};
use crate::protocol::packets::inter_gs::{BlowFishKey, GameServerAuth, PlayerAuthRequest};
use crate::protocol::packets::inter_ls::{LoginServerFailReason, LsFrame};
use crate::protocol::packets::login_c2s::{
    AuthGameGuard, RequestAuthLogin, RequestServerLogin,
};
use crate::protocol::packets::login_s2c::{GgAuth, Init, PlayOk, ServerList};
use crate::protocol::{Decode, Encode, Packet, SessionKey};
use tokio::net::TcpStream;

const USER_OFFSET: usize = 0x5e;
const PASS_OFFSET: usize = 0x6c;

async fn spawn_login_server() -> LoginServer {
    let config = LoginConfig {
        bind_address: "127.0.0.1".to_owned(),
        port: 0,
        gs_listen_host: "127.0.0.1".to_owned(),
        gs_listen_port: 0,
        auto_create_accounts: true,
        show_licence: false,
        rsa_pool_size: 1,
        ..LoginConfig::default()
    };
    LoginServer::spawn(config, Arc::new(MemoryAccountStore::new()))
        .await
        .expect("login server failed to start")
}

fn decode_s2c<'a, P>(body: &'a [u8]) -> P
where
    P: Packet + Decode<'a>,
{
    assert_eq!(
        body[0],
        P::OPCODE,
        "expected {} (opcode 0x{:02x}), got opcode 0x{:02x}",
        P::NAME,
        P::OPCODE,
        body[0],
    );
    let mut r = &body[1..];
    P::decode(&mut r).expect(P::NAME)
}

/// A login client faithful to the retail handshake: reads Init through
/// the static Blowfish + XOR pad, then swaps to the session key it was
/// handed.
struct TestClient {
    io: PacketIo,
    session_id: i32,
    rsa: RsaRawPublicKey,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let mut io = PacketIo::new(
            stream,
            PacketEncoder::new(WireCipher::Clear),
            PacketDecoder::new(WireCipher::Clear),
            Duration::from_secs(10),
            Arc::new(BufferPool::for_packets()),
        );

        let mut frame: BytesMut = io.recv_frame().await?;
        decrypt_login_init(&mut frame)?;
        let init: Init = decode_s2c(&frame);

        let mut modulus = init.scrambled_modulus;
        unscramble_modulus(&mut modulus);

        io.encoder_mut().set_cipher(WireCipher::Session(SessionCipher::new(
            &init.blowfish_key,
        )?));
        io.decoder_mut().set_cipher(WireCipher::Session(SessionCipher::new(
            &init.blowfish_key,
        )?));

        Ok(Self {
            io,
            session_id: init.session_id,
            rsa: RsaRawPublicKey::from_modulus(&modulus),
        })
    }

    async fn send<P: Packet + Encode>(&mut self, pkt: &P) -> anyhow::Result<()> {
        self.io.send_packet(pkt).await
    }

    async fn recv(&mut self) -> anyhow::Result<BytesMut> {
        self.io.recv_frame().await
    }

    fn credential_block(&self, login: &str, password: &str) -> RequestAuthLogin {
        let mut plain = vec![0u8; 128];
        plain[USER_OFFSET..USER_OFFSET + login.len()].copy_from_slice(login.as_bytes());
        plain[PASS_OFFSET..PASS_OFFSET + password.len()].copy_from_slice(password.as_bytes());

        let block = self.rsa.encrypt_raw(&plain).expect("RSA encrypt");
        RequestAuthLogin {
            block: block.try_into().expect("128-byte block"),
        }
    }
}

/// A game server installation talking to the inter-server listener.
struct TestGameServer {
    io: PacketIo,
    id: u8,
}

impl TestGameServer {
    async fn connect(
        addr: SocketAddr,
        desired_id: u8,
        hex_id: &[u8],
        accept_alternate: bool,
    ) -> anyhow::Result<Result<Self, LoginServerFailReason>> {
        let stream = TcpStream::connect(addr).await?;
        let bootstrap = crate::crypt::INTER_BOOTSTRAP_KEY;
        let mut io = PacketIo::new(
            stream,
            PacketEncoder::new(WireCipher::Session(SessionCipher::new(bootstrap)?)),
            PacketDecoder::new(WireCipher::Session(SessionCipher::new(bootstrap)?)),
            Duration::from_secs(10),
            Arc::new(BufferPool::for_packets()),
        );

        let frame = io.recv_frame().await?;
        let LsFrame::InitLs(init) = LsFrame::decode_frame(&frame)? else {
            anyhow::bail!("expected InitLs");
        };

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
            desired_id,
            accept_alternate,
            reserve_host: false,
            port: 7777,
            max_players: 5000,
            hex_id: hex_id.to_vec(),
            hosts: vec!["127.0.0.1".to_owned()],
        })
        .await?;

        let frame = io.recv_frame().await?;
        match LsFrame::decode_frame(&frame)? {
            LsFrame::AuthResponse(resp) => Ok(Ok(Self {
                io,
                id: resp.server_id,
            })),
            LsFrame::LoginServerFail(fail) => Ok(Err(fail.reason)),
            other => anyhow::bail!("unexpected registration reply: {}", other.name()),
        }
    }

    async fn player_auth(&mut self, account: &str, key: SessionKey) -> anyhow::Result<bool> {
        self.io
            .send_packet(&PlayerAuthRequest {
                account: account.to_owned(),
                key,
            })
            .await?;

        let frame = self.io.recv_frame().await?;
        let LsFrame::PlayerAuthResponse(resp) = LsFrame::decode_frame(&frame)? else {
            anyhow::bail!("expected PlayerAuthResponse");
        };
        assert_eq!(resp.account, account);
        Ok(resp.authorized)
    }
}

#[tokio::test]
async fn login_happy_path_and_session_relay() -> anyhow::Result<()> {
    let server = spawn_login_server().await;

    // A game server must be up for the realm list to offer anything.
    let mut gs = TestGameServer::connect(server.gs_addr, 1, b"\xde\xad\xbe\xef", true)
        .await?
        .expect("registration refused");
    assert_eq!(gs.id, 1);

    let mut client = TestClient::connect(server.client_addr).await?;

    // GameGuard echo.
    client
        .send(&AuthGameGuard {
            session_id: client.session_id,
        })
        .await?;
    let frame = client.recv().await?;
    let gg: GgAuth = decode_s2c(&frame);
    assert_eq!(gg.session_id, client.session_id);

    // Credentials; with the license screen off the server list comes
    // straight back.
    let block = client.credential_block("alice", "secret");
    client.send(&block).await?;
    let frame = client.recv().await?;
    let list: ServerList = decode_s2c(&frame);
    assert_eq!(list.servers.len(), 1);
    let entry = &list.servers[0];
    assert_eq!(entry.id, 1);
    assert_eq!(entry.ip.octets(), [127, 0, 0, 1]);
    assert_eq!(entry.port, 7777);
    assert!(entry.online);

    // Pick the server; the play pair comes back.
    client
        .send(&RequestServerLogin {
            login_ok1: 0,
            login_ok2: 0,
            server_id: 1,
        })
        .await?;
    let frame = client.recv().await?;
    let play: PlayOk = decode_s2c(&frame);

    assert_eq!(server.context().sessions.count(), 1);

    // The relay consumes the session exactly once. With the license
    // screen off only the play pair is matched.
    let presented = SessionKey {
        login_ok1: 0,
        login_ok2: 0,
        play_ok1: play.play_ok1,
        play_ok2: play.play_ok2,
    };
    assert!(gs.player_auth("alice", presented).await?);
    assert!(!gs.player_auth("alice", presented).await?);
    assert_eq!(server.context().sessions.count(), 0);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn wrong_password_is_rejected() -> anyhow::Result<()> {
    let server = spawn_login_server().await;

    // First login creates the account.
    let mut client = TestClient::connect(server.client_addr).await?;
    client
        .send(&AuthGameGuard {
            session_id: client.session_id,
        })
        .await?;
    client.recv().await?;
    let block = client.credential_block("bob", "right");
    client.send(&block).await?;
    let frame = client.recv().await?;
    assert_eq!(frame[0], ServerList::OPCODE);
    drop(client);
    server.context().sessions.remove("bob");

    // Second login with the wrong password fails with 0x01 LoginFail,
    // reason UserOrPassWrong.
    let mut client = TestClient::connect(server.client_addr).await?;
    client
        .send(&AuthGameGuard {
            session_id: client.session_id,
        })
        .await?;
    client.recv().await?;
    let block = client.credential_block("bob", "wrong");
    client.send(&block).await?;
    let frame = client.recv().await?;
    assert_eq!(frame[0], 0x01);
    assert_eq!(frame[1], 0x03);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn out_of_state_packets_are_ignored() -> anyhow::Result<()> {
    let server = spawn_login_server().await;

    let mut client = TestClient::connect(server.client_addr).await?;

    // A server-list request before GameGuard is silently dropped; the
    // connection stays usable and the state machine has not moved.
    client
        .send(&crate::protocol::packets::login_c2s::RequestServerList {
            login_ok1: 1,
            login_ok2: 2,
        })
        .await?;

    client
        .send(&AuthGameGuard {
            session_id: client.session_id,
        })
        .await?;
    let frame = client.recv().await?;
    let gg: GgAuth = decode_s2c(&frame);
    assert_eq!(gg.session_id, client.session_id);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn two_game_servers_race_for_one_id() -> anyhow::Result<()> {
    let server = spawn_login_server().await;
    let gs_addr = server.gs_addr;

    let a = tokio::spawn(async move {
        TestGameServer::connect(gs_addr, 1, b"hex-id-aaaa", true).await
    });
    let b = tokio::spawn(async move {
        TestGameServer::connect(gs_addr, 1, b"hex-id-bbbb", true).await
    });

    let a = a.await?.context("link a")?.expect("a refused");
    let b = b.await?.context("link b")?.expect("b refused");

    // Exactly one holds 1; the other got an alternate in range.
    assert_ne!(a.id, b.id);
    assert!(a.id == 1 || b.id == 1);
    assert!((1..=127).contains(&a.id) && (1..=127).contains(&b.id));

    // Reclaiming a slot whose holder is still connected is refused.
    let (held_id, held_hex): (u8, &[u8]) = if a.id == 1 {
        (1, b"hex-id-aaaa")
    } else {
        (1, b"hex-id-bbbb")
    };
    match TestGameServer::connect(gs_addr, held_id, held_hex, true).await? {
        Err(reason) => assert_eq!(reason, LoginServerFailReason::AlreadyLoggedIn),
        Ok(_) => panic!("reclaiming a held slot was accepted"),
    }

    server.shutdown().await;
    Ok(())
}
