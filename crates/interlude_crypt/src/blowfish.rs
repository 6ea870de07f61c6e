use blowfish::cipher::generic_array::GenericArray;
use blowfish::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use blowfish::BlowfishLE;

use crate::CryptError;

/// Blowfish in ECB mode over little-endian words, as the Interlude client
/// implements it.
///
/// The standard algorithm treats each 8-byte block as two big-endian u32
/// halves; the client reads them little-endian instead, which is exactly
/// the `BlowfishLE` variant.
pub struct BlowfishCipher {
    inner: BlowfishLE,
}

impl BlowfishCipher {
    /// Creates a cipher from a key of 4 to 56 bytes.
    pub fn new(key: &[u8]) -> Result<Self, CryptError> {
        let inner = BlowfishLE::new_from_slice(key).map_err(|_| CryptError::InvalidLength)?;
        Ok(Self { inner })
    }

    /// Encrypts `data[off..off + size]` in place. `size` must be a multiple
    /// of 8 and the range must lie within the buffer.
    pub fn encrypt(&self, data: &mut [u8], off: usize, size: usize) -> Result<(), CryptError> {
        let range = Self::check_range(data, off, size)?;
        for block in range.chunks_exact_mut(8) {
            self.inner.encrypt_block(GenericArray::from_mut_slice(block));
        }
        Ok(())
    }

    /// Decrypts `data[off..off + size]` in place, with the same length rules
    /// as [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, data: &mut [u8], off: usize, size: usize) -> Result<(), CryptError> {
        let range = Self::check_range(data, off, size)?;
        for block in range.chunks_exact_mut(8) {
            self.inner.decrypt_block(GenericArray::from_mut_slice(block));
        }
        Ok(())
    }

    fn check_range(data: &mut [u8], off: usize, size: usize) -> Result<&mut [u8], CryptError> {
        let end = off.checked_add(size).ok_or(CryptError::InvalidLength)?;
        if size % 8 != 0 || end > data.len() {
            return Err(CryptError::InvalidLength);
        }
        Ok(&mut data[off..end])
    }
}
