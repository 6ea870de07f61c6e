//! An Interlude-compatible server cluster.
//!
//! The workspace splits along the process and dependency boundaries of
//! the cluster:
//!
//! - [`crypt`] — the wire ciphers: little-endian Blowfish, the Init XOR
//!   pad, the XOR word checksum, the game channel's rolling cipher and
//!   raw RSA with the scrambled-modulus permutation.
//! - [`protocol`] — packet shapes and the little-endian/UTF-16LE wire
//!   primitives, per channel and direction.
//! - [`net`] — framing, per-direction cipher state, the split into read
//!   and write tasks, accept loops and the buffer pool.
//! - [`world`] — the region grid and the visibility pipeline with its
//!   reverse-observer index.
//! - [`login`] — the login server: auth state machine, session registry,
//!   game server registry and the inter-server listener.
//! - [`game`] — the game server: client fan-out, tick loops, NPC and boss
//!   lifecycles, and the client leg of the inter-server link.
//!
//! The scenario tests in `src/tests/` drive both servers over real
//! sockets with a protocol-faithful test client.

#[cfg(test)]
mod tests;

pub use interlude_crypt as crypt;
pub use interlude_game as game;
pub use interlude_login as login;
pub use interlude_net as net;
pub use interlude_protocol as protocol;
pub use interlude_world as world;
