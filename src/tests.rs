//! Cross-process scenarios driven over real sockets: the login handshake
//! with a protocol-faithful test client, game server registration races,
//! the full cluster relay, and the world-side pipelines.

mod cluster;
mod login_flow;
