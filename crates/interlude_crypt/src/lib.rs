//! Ciphers and key handling for the Interlude wire protocol.
//!
//! Everything in this crate is bit-exact with the closed-source Interlude
//! client: the little-endian Blowfish used on the login and inter-server
//! channels, the XOR pad applied to the very first login packet, the XOR
//! word checksum, the rolling XOR cipher of the game channel, and the raw
//! (no padding) RSA used for the credential block and the inter-server key
//! exchange.

mod blowfish;
mod checksum;
mod game_crypt;
mod rsa_raw;
mod scramble;
mod xor_pass;

pub use blowfish::BlowfishCipher;
pub use checksum::{append_checksum, verify_checksum};
pub use game_crypt::GameCipher;
pub use rsa_raw::{RsaKeyPair, RsaKeyPool, RsaRawPublicKey, ScrambledKeyPair};
pub use scramble::{scramble_modulus, unscramble_modulus};
pub use xor_pass::{dec_xor_pass, enc_xor_pass};

use thiserror::Error;

/// The static Blowfish key every Interlude client uses to decrypt the
/// login server's Init packet.
pub const STATIC_BLOWFISH_KEY: [u8; 16] = [
    0x6b, 0x60, 0xcb, 0x5b, 0x82, 0xce, 0x90, 0xb1, 0xcc, 0x2b, 0x6c, 0x55, 0x6c, 0x6c, 0x6c, 0x6c,
];

/// The well-known bootstrap Blowfish key of the login↔game-server channel,
/// replaced by a random key during the BlowFishKey exchange.
pub const INTER_BOOTSTRAP_KEY: &[u8; 22] = b"_;v.]05-31!|+-%xT!^[$\x00";

#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
pub enum CryptError {
    /// A data range was not a whole number of cipher blocks, or extended
    /// past the end of the buffer.
    #[error("invalid length for cipher operation")]
    InvalidLength,
    /// An RSA ciphertext did not match the key's modulus size.
    #[error("RSA block size mismatch: expected {expected} bytes, got {actual}")]
    BlockSizeMismatch { expected: usize, actual: usize },
    /// RSA key generation failed.
    #[error("RSA key generation failed")]
    KeyGeneration,
}

/// Generates the per-connection dynamic Blowfish key for a login client.
///
/// The client treats a zero byte as a terminator when it copies the key out
/// of the Init packet, so zeroes are rewritten to 1.
pub fn new_dynamic_blowfish_key() -> [u8; 16] {
    let mut key: [u8; 16] = rand::random();
    for b in &mut key {
        if *b == 0 {
            *b = 1;
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_key_has_no_zero_bytes() {
        for _ in 0..64 {
            let key = new_dynamic_blowfish_key();
            assert!(key.iter().all(|&b| b != 0));
        }
    }

    #[test]
    fn inter_bootstrap_key_is_nul_terminated() {
        assert_eq!(INTER_BOOTSTRAP_KEY.len(), 22);
        assert_eq!(INTER_BOOTSTRAP_KEY[21], 0);
    }
}
