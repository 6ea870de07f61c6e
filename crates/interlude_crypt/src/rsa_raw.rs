use std::sync::atomic::{AtomicUsize, Ordering};

use num_bigint::{BigInt, BigUint};
use num_integer::Integer;
use rand::rngs::OsRng;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::RsaPrivateKey;

use crate::scramble::scramble_modulus;
use crate::CryptError;

/// A raw-RSA private key: `m = c^d mod n` over whole blocks, no padding
/// scheme. Used for the 1024-bit credential block on the login channel and
/// the 512-bit Blowfish key exchange on the inter-server channel.
///
/// # Timing
///
/// Decryption takes the CRT path when the precomputed `dp`/`dq`/`q_inv`
/// values are present and a plain `modpow` otherwise; the two paths differ
/// observably in wall-clock time (roughly 2.6×). The legacy protocol does
/// not treat this as a secret-dependent branch — which path runs is fixed
/// per key — so it is documented rather than remediated. Do not reuse this
/// primitive for anything new.
pub struct RsaKeyPair {
    bits: usize,
    n: BigUint,
    d: BigUint,
    crt: Option<CrtParams>,
}

struct CrtParams {
    p: BigUint,
    q: BigUint,
    dp: BigUint,
    dq: BigUint,
    q_inv: BigUint,
}

impl RsaKeyPair {
    /// Generates a fresh keypair. `bits` is 512 or 1024.
    pub fn generate(bits: usize) -> Result<Self, CryptError> {
        let key = RsaPrivateKey::new(&mut OsRng, bits).map_err(|_| CryptError::KeyGeneration)?;

        let n = BigUint::from_bytes_be(&key.n().to_bytes_be());
        let d = BigUint::from_bytes_be(&key.d().to_bytes_be());

        let crt = match key.primes() {
            [p, q] => {
                let p = BigUint::from_bytes_be(&p.to_bytes_be());
                let q = BigUint::from_bytes_be(&q.to_bytes_be());
                let one = BigUint::from(1u8);
                let dp = &d % (&p - &one);
                let dq = &d % (&q - &one);
                mod_inverse(&q, &p).map(|q_inv| CrtParams { p, q, dp, dq, q_inv })
            }
            _ => None,
        };

        Ok(Self { bits, n, d, crt })
    }

    /// The modulus size in bytes; raw ciphertexts must be exactly this long.
    pub fn block_len(&self) -> usize {
        self.bits / 8
    }

    /// The public modulus, big-endian, left-padded to the block length.
    pub fn modulus_bytes(&self) -> Vec<u8> {
        left_pad(&self.n.to_bytes_be(), self.block_len())
    }

    /// Decrypts one raw block. Output is left-padded with zeroes to the
    /// block length, exactly as the client produces its input blocks.
    pub fn decrypt_raw(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptError> {
        if ciphertext.len() != self.block_len() {
            return Err(CryptError::BlockSizeMismatch {
                expected: self.block_len(),
                actual: ciphertext.len(),
            });
        }

        let c = BigUint::from_bytes_be(ciphertext);
        let m = match &self.crt {
            Some(crt) => decrypt_crt(&c, crt),
            None => c.modpow(&self.d, &self.n),
        };

        Ok(left_pad(&m.to_bytes_be(), self.block_len()))
    }

    /// The plain `c^d mod n` path, bypassing the CRT parameters. Exposed so
    /// tests can pin the two paths to each other.
    pub fn decrypt_raw_fallback(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptError> {
        if ciphertext.len() != self.block_len() {
            return Err(CryptError::BlockSizeMismatch {
                expected: self.block_len(),
                actual: ciphertext.len(),
            });
        }

        let c = BigUint::from_bytes_be(ciphertext);
        let m = c.modpow(&self.d, &self.n);
        Ok(left_pad(&m.to_bytes_be(), self.block_len()))
    }
}

/// Garner's recombination: `m1 = c^dp mod p`, `m2 = c^dq mod q`,
/// `h = (m1 - m2) * q_inv mod p`, `m = m2 + h * q`. The subtraction runs
/// in `BigInt` because `m1 - m2` may be negative.
fn decrypt_crt(c: &BigUint, crt: &CrtParams) -> BigUint {
    let m1 = c.modpow(&crt.dp, &crt.p);
    let m2 = c.modpow(&crt.dq, &crt.q);

    let diff = BigInt::from(m1) - BigInt::from(m2.clone());
    let p = BigInt::from(crt.p.clone());
    let h = (diff * BigInt::from(crt.q_inv.clone())).mod_floor(&p);
    let h = h.to_biguint().expect("mod_floor result is non-negative");

    m2 + h * &crt.q
}

fn mod_inverse(a: &BigUint, modulus: &BigUint) -> Option<BigUint> {
    let a = BigInt::from(a.clone());
    let m = BigInt::from(modulus.clone());

    let ext = a.extended_gcd(&m);
    if ext.gcd != BigInt::from(1u8) {
        return None;
    }
    ext.x.mod_floor(&m).to_biguint()
}

fn left_pad(bytes: &[u8], len: usize) -> Vec<u8> {
    debug_assert!(bytes.len() <= len);
    let mut out = vec![0u8; len];
    out[len - bytes.len()..].copy_from_slice(bytes);
    out
}

/// The encrypt-only half of a raw-RSA exchange: what a game server holds
/// after receiving the login server's modulus, and what the Interlude
/// client implements against the unscrambled Init modulus.
pub struct RsaRawPublicKey {
    n: BigUint,
    e: BigUint,
    block_len: usize,
}

impl RsaRawPublicKey {
    /// Builds a key from a raw big-endian modulus with the fixed public
    /// exponent 65537.
    pub fn from_modulus(modulus: &[u8]) -> Self {
        Self {
            n: BigUint::from_bytes_be(modulus),
            e: BigUint::from(65_537u32),
            block_len: modulus.len(),
        }
    }

    pub fn block_len(&self) -> usize {
        self.block_len
    }

    /// Encrypts one raw block: `c = m^e mod n`, left-padded to the block
    /// length. The plaintext must not exceed the block length.
    pub fn encrypt_raw(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptError> {
        if plaintext.len() > self.block_len {
            return Err(CryptError::BlockSizeMismatch {
                expected: self.block_len,
                actual: plaintext.len(),
            });
        }

        let m = BigUint::from_bytes_be(plaintext);
        let c = m.modpow(&self.e, &self.n);
        Ok(left_pad(&c.to_bytes_be(), self.block_len))
    }
}

/// A 1024-bit keypair together with the scrambled form of its modulus that
/// goes out in the Init packet.
pub struct ScrambledKeyPair {
    pair: RsaKeyPair,
    scrambled: [u8; 128],
}

impl ScrambledKeyPair {
    pub fn generate() -> Result<Self, CryptError> {
        let pair = RsaKeyPair::generate(1024)?;

        let mut scrambled = [0u8; 128];
        scrambled.copy_from_slice(&pair.modulus_bytes());
        scramble_modulus(&mut scrambled);

        Ok(Self { pair, scrambled })
    }

    pub fn scrambled_modulus(&self) -> &[u8; 128] {
        &self.scrambled
    }

    pub fn key(&self) -> &RsaKeyPair {
        &self.pair
    }
}

/// Round-robin pool of pre-generated login keypairs.
///
/// Generating a 1024-bit key costs a few milliseconds; doing it per
/// connection would serialize the accept loop behind keygen, so a fixed set
/// is produced at startup and handed out in rotation.
pub struct RsaKeyPool {
    keys: Vec<ScrambledKeyPair>,
    next: AtomicUsize,
}

impl RsaKeyPool {
    pub const DEFAULT_SIZE: usize = 10;

    pub fn generate(count: usize) -> Result<Self, CryptError> {
        let keys = (0..count.max(1))
            .map(|_| ScrambledKeyPair::generate())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            keys,
            next: AtomicUsize::new(0),
        })
    }

    pub fn next_key(&self) -> &ScrambledKeyPair {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.keys.len();
        &self.keys[idx]
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use num_bigint::RandBigInt;
    use rand::thread_rng;

    use super::*;
    use crate::unscramble_modulus;

    fn encrypt_raw(key: &RsaKeyPair, plain: &[u8]) -> Vec<u8> {
        // The test plays the client: m^e mod n with the fixed public
        // exponent 65537.
        let m = BigUint::from_bytes_be(plain);
        let c = m.modpow(&BigUint::from(65537u32), &key.n);
        left_pad(&c.to_bytes_be(), key.block_len())
    }

    #[test]
    fn crt_and_fallback_agree() {
        for bits in [512usize, 1024] {
            let key = RsaKeyPair::generate(bits).unwrap();
            assert!(key.crt.is_some());

            let mut rng = thread_rng();
            for _ in 0..8 {
                let c = rng.gen_biguint_below(&key.n);
                let block = left_pad(&c.to_bytes_be(), key.block_len());

                let via_crt = key.decrypt_raw(&block).unwrap();
                let via_fallback = key.decrypt_raw_fallback(&block).unwrap();
                assert_eq!(via_crt, via_fallback);
            }
        }
    }

    #[test]
    fn crt_handles_degenerate_ciphertexts() {
        let key = RsaKeyPair::generate(512).unwrap();
        let crt = key.crt.as_ref().unwrap();

        // c = 0 and small c < q exercise the negative m1 - m2 branch.
        let zero = vec![0u8; key.block_len()];
        assert_eq!(
            key.decrypt_raw(&zero).unwrap(),
            key.decrypt_raw_fallback(&zero).unwrap()
        );

        let small = left_pad(&BigUint::from(2u8).to_bytes_be(), key.block_len());
        assert_eq!(
            key.decrypt_raw(&small).unwrap(),
            key.decrypt_raw_fallback(&small).unwrap()
        );

        // A ciphertext just below q stays on the small side of the split.
        let below_q = left_pad(&(&crt.q - 1u8).to_bytes_be(), key.block_len());
        assert_eq!(
            key.decrypt_raw(&below_q).unwrap(),
            key.decrypt_raw_fallback(&below_q).unwrap()
        );
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = RsaKeyPair::generate(1024).unwrap();

        let mut plain = vec![0u8; 128];
        plain[30..60].copy_from_slice(&[0x11; 30]);
        plain[0] = 0; // keep m < n

        let block = encrypt_raw(&key, &plain);
        assert_eq!(key.decrypt_raw(&block).unwrap(), plain);
    }

    #[test]
    fn wrong_block_size_is_rejected() {
        let key = RsaKeyPair::generate(512).unwrap();
        assert!(matches!(
            key.decrypt_raw(&[0u8; 63]),
            Err(CryptError::BlockSizeMismatch { expected: 64, actual: 63 })
        ));
    }

    #[test]
    fn scrambled_modulus_unscrambles_to_real_modulus() {
        let pair = ScrambledKeyPair::generate().unwrap();

        let mut modulus = *pair.scrambled_modulus();
        unscramble_modulus(&mut modulus);
        assert_eq!(modulus.to_vec(), pair.key().modulus_bytes());
    }

    #[test]
    fn public_key_round_trips_against_private() {
        let key = RsaKeyPair::generate(512).unwrap();
        let public = RsaRawPublicKey::from_modulus(&key.modulus_bytes());

        let mut plain = vec![0u8; 64];
        plain[24..].fill(0x42); // a 40-byte session key with zero padding
        let block = public.encrypt_raw(&plain).unwrap();
        assert_eq!(key.decrypt_raw(&block).unwrap(), plain);
    }

    #[test]
    fn pool_rotates_through_keys() {
        let pool = RsaKeyPool::generate(3).unwrap();

        let first = pool.next_key().scrambled_modulus().to_vec();
        let second = pool.next_key().scrambled_modulus().to_vec();
        let third = pool.next_key().scrambled_modulus().to_vec();
        let wrapped = pool.next_key().scrambled_modulus().to_vec();

        assert_ne!(first, second);
        assert_ne!(second, third);
        assert_eq!(first, wrapped);
    }
}
