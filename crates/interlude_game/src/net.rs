//! Game client connections: handshake, session relay, steady state.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context};
use interlude_net::{
    GameWireCipher, PacketDecoder, PacketEncoder, PacketIo, SplitConfig, WireCipher,
};
use interlude_protocol::packets::game::{full_game_key, CharSelectInfo, GameClientFrame, KeyInit};
use interlude_protocol::GAME_PROTOCOL_VERSION;
use interlude_world::{Location, ObjectKind, WorldObject};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

use crate::GameContext;

pub(crate) async fn handle_game_client(ctx: Arc<GameContext>, stream: TcpStream, addr: SocketAddr) {
    if let Err(e) = run_game_client(ctx, stream, addr).await {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::UnexpectedEof {
                return;
            }
        }
        debug!(%addr, "game connection ended: {e:#}");
    }
}

async fn run_game_client(
    ctx: Arc<GameContext>,
    stream: TcpStream,
    addr: SocketAddr,
) -> anyhow::Result<()> {
    // The full rolling-cipher key exists before the connection does; the
    // client reconstructs it from the dynamic half in the key packet.
    let key_half: [u8; 8] = rand::random();
    let full_key = full_game_key(&key_half);

    let enc = PacketEncoder::new(WireCipher::Game(GameWireCipher::new(&full_key)));
    let dec = PacketDecoder::new(WireCipher::Game(GameWireCipher::new(&full_key)));
    let mut io = PacketIo::new(
        stream,
        enc,
        dec,
        ctx.config.read_timeout(),
        ctx.buffers.clone(),
    );

    // Arrives in cleartext: the inbound cipher is not armed yet.
    let frame = io.recv_frame().await?;
    let GameClientFrame::ProtocolVersion(version) = GameClientFrame::decode_frame(&frame)? else {
        bail!("expected ProtocolVersion first");
    };
    if version.revision != GAME_PROTOCOL_VERSION {
        debug!(%addr, revision = version.revision, "unsupported client revision");
        return Ok(());
    }

    // Goes out in cleartext and arms the outbound cipher; the inbound
    // side arms here too, since everything after this frame is encrypted.
    io.send_packet(&KeyInit {
        accepted: true,
        key_half,
    })
    .await?;
    io.decoder_mut().arm_game_cipher();

    let frame = io.recv_frame().await?;
    let GameClientFrame::AuthLogin(auth) = GameClientFrame::decode_frame(&frame)? else {
        bail!("expected AuthLogin after the key exchange");
    };

    let authorized = ctx
        .login_link
        .request_player_auth(&auth.account, auth.key)
        .await
        .context("session relay")?;
    if !authorized {
        warn!(%addr, account = %auth.account, "session key rejected by login server");
        return Ok(());
    }

    info!(%addr, account = %auth.account, "game session authorized");

    let character_count = ctx
        .characters
        .character_count(&auth.account)
        .await
        .unwrap_or(0);
    io.send_packet(&CharSelectInfo { character_count }).await?;

    // Steady state: place the player and hand the socket to its tasks.
    let player_id = ctx.allocator.allocate();
    let spawn_loc = Location::new(ctx.config.spawn_x, ctx.config.spawn_y, ctx.config.spawn_z);
    ctx.grid
        .add_object(
            WorldObject::new(player_id, auth.account.clone(), ObjectKind::Player),
            spawn_loc,
        )
        .context("placing player")?;

    let split = io.split(SplitConfig {
        queue_size: ctx.config.send_queue_size,
        read_timeout: ctx.config.read_timeout(),
        write_timeout: ctx.config.write_timeout(),
    });
    ctx.clients.register(player_id, &auth.account, split.outbox.clone());
    ctx.login_link.notify_in_game(&auth.account);

    // Gameplay packets belong to the gameplay systems; the core keeps the
    // connection alive and ordered until the peer goes away.
    while let Ok(frame) = split.inbound.recv_async().await {
        trace!(
            account = %auth.account,
            opcode = frame.first().copied().unwrap_or_default(),
            "gameplay packet"
        );
    }

    ctx.clients.unregister(player_id);
    ctx.login_link.notify_logout(&auth.account);
    info!(account = %auth.account, "game session closed");
    Ok(())
}
