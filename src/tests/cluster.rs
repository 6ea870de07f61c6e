//! Full-cluster scenario: a login server and a game server running side
//! by side, with a game client handshaking over the rolling cipher and
//! its session relayed between the processes.

use std::sync::Arc;
use std::time::Duration;

use crate::game::{GameConfig, GameServer, GameStores};
use crate::login::{LoginConfig, LoginServer, MemoryAccountStore};
use crate::net::{BufferPool, GameWireCipher, PacketDecoder, PacketEncoder, PacketIo, WireCipher};
use crate::protocol::packets::game::{
    full_game_key, AuthLogin, CharSelectInfo, KeyInit, ProtocolVersion,
};
use crate::protocol::{Decode, Packet, SessionKey, GAME_PROTOCOL_VERSION};
use tokio::net::TcpStream;

async fn wait_until(mut probe: impl FnMut() -> bool, what: &str) {
    for _ in 0..200 {
        if probe() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn game_client_session_relay_across_the_cluster() -> anyhow::Result<()> {
    let login = LoginServer::spawn(
        LoginConfig {
            bind_address: "127.0.0.1".to_owned(),
            port: 0,
            gs_listen_host: "127.0.0.1".to_owned(),
            gs_listen_port: 0,
            auto_create_accounts: true,
            show_licence: false,
            rsa_pool_size: 1,
            ..LoginConfig::default()
        },
        Arc::new(MemoryAccountStore::new()),
    )
    .await?;

    let game = GameServer::spawn(
        GameConfig {
            bind_address: "127.0.0.1".to_owned(),
            port: 0,
            login_server_host: "127.0.0.1".to_owned(),
            login_server_port: login.gs_addr.port(),
            login_reconnect_interval: 1,
            ..GameConfig::default()
        },
        GameStores::default(),
    )
    .await?;

    // The game server registers itself over the inter-server channel.
    let game_ctx = game.context().clone();
    wait_until(
        || game_ctx.login_link.is_connected() && game_ctx.login_link.server_id().is_some(),
        "game server registration",
    )
    .await;

    // A session the login flow would have issued.
    let key = SessionKey::generate();
    login.context().sessions.store("carol", key);

    // The retail handshake: ProtocolVersion in the clear, KeyInit back in
    // the clear, everything after under the rolling cipher.
    let stream = TcpStream::connect(game.client_addr).await?;
    let mut io = PacketIo::new(
        stream,
        PacketEncoder::new(WireCipher::Clear),
        PacketDecoder::new(WireCipher::Clear),
        Duration::from_secs(10),
        Arc::new(BufferPool::for_packets()),
    );

    io.send_packet(&ProtocolVersion {
        revision: GAME_PROTOCOL_VERSION,
    })
    .await?;

    let frame = io.recv_frame().await?;
    assert_eq!(frame[0], KeyInit::OPCODE);
    let mut r = &frame[1..];
    let key_init = KeyInit::decode(&mut r)?;
    assert!(key_init.accepted);

    let full_key = full_game_key(&key_init.key_half);
    let mut out = GameWireCipher::new(&full_key);
    out.arm();
    io.encoder_mut().set_cipher(WireCipher::Game(out));
    let mut inc = GameWireCipher::new(&full_key);
    inc.arm();
    io.decoder_mut().set_cipher(WireCipher::Game(inc));

    io.send_packet(&AuthLogin {
        account: "carol".to_owned(),
        key,
    })
    .await?;

    let frame = io.recv_frame().await?;
    assert_eq!(frame[0], CharSelectInfo::OPCODE);
    let mut r = &frame[1..];
    let info = CharSelectInfo::decode(&mut r)?;
    assert_eq!(info.character_count, 0);

    // The relay consumed the session and the account is now attached.
    assert_eq!(login.context().sessions.count(), 0);
    let login_ctx = login.context().clone();
    wait_until(
        || login_ctx.in_game.read().contains_key("carol"),
        "in-game attachment",
    )
    .await;
    assert_eq!(game.context().clients.count(), 1);

    drop(io);
    game.shutdown().await;
    login.shutdown().await;
    Ok(())
}
