//! Framed, encrypted duplex channels for the Interlude protocol.
//!
//! All three wire legs share one framing rule — a 2-byte little-endian
//! length that counts itself — and differ only in the cipher applied to the
//! frame body. [`PacketEncoder`] and [`PacketDecoder`] own that cipher
//! state; [`PacketIo`] drives them over a socket for the strictly
//! alternating handshake phases, then splits into a read task and a write
//! task bridged by bounded channels for steady-state traffic.

mod accept;
mod buffer_pool;
mod codec;
mod packet_io;

pub use accept::{accept_loop, AcceptConfig};
pub use buffer_pool::BufferPool;
pub use codec::{
    decrypt_login_init, GameWireCipher, LoginServerCipher, PacketDecoder, PacketEncoder,
    SessionCipher, WireCipher, WireError,
};
pub use packet_io::{encode_packet_body, Outbox, PacketIo, SplitConfig, SplitConnection};

/// Shutdown broadcast every long-running task watches. The value flips to
/// `true` exactly once.
pub type ShutdownRx = tokio::sync::watch::Receiver<bool>;

/// Creates the shutdown pair for an orchestrator.
pub fn shutdown_channel() -> (tokio::sync::watch::Sender<bool>, ShutdownRx) {
    tokio::sync::watch::channel(false)
}
