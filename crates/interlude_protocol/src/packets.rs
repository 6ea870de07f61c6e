//! Packet definitions, grouped by channel and direction.
//!
//! The login↔game-server channel reuses opcode values across its two
//! directions, so each direction gets its own module and its own frame
//! enum; dispatch is always on (direction, state, opcode).

pub mod game;
pub mod inter_gs;
pub mod inter_ls;
pub mod login_c2s;
pub mod login_s2c;
