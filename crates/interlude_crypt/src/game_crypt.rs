/// One direction of the game channel's rolling XOR cipher.
///
/// A connection owns two instances built from the same 16-byte key, one per
/// direction, so the read and write tasks never share cipher state. Each
/// processed packet advances the key: bytes `[8..12)`, read little-endian,
/// are incremented by the packet size.
///
/// The cipher starts disarmed. The first call to [`encrypt`](Self::encrypt)
/// only arms it, leaving the packet in cleartext — that is how the key
/// packet itself reaches the client. The inbound side stays a no-op until
/// [`arm`](Self::arm) is called.
#[derive(Clone)]
pub struct GameCipher {
    key: [u8; 16],
    armed: bool,
}

impl GameCipher {
    pub fn new(key: &[u8; 16]) -> Self {
        Self {
            key: *key,
            armed: false,
        }
    }

    /// Arms the cipher so the next packet is processed. Used on the inbound
    /// side once the key packet has been sent.
    pub fn arm(&mut self) {
        self.armed = true;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Encrypts a whole outbound packet body in place. The first call is a
    /// no-op that arms the cipher.
    pub fn encrypt(&mut self, data: &mut [u8]) {
        if !self.armed {
            self.armed = true;
            return;
        }

        let mut prev = 0u8;
        for (i, b) in data.iter_mut().enumerate() {
            let c = *b ^ self.key[i & 0x0f] ^ prev;
            *b = c;
            prev = c;
        }

        self.advance(data.len());
    }

    /// Decrypts a whole inbound packet body in place. A no-op until armed.
    pub fn decrypt(&mut self, data: &mut [u8]) {
        if !self.armed {
            return;
        }

        let mut prev = 0u8;
        for (i, b) in data.iter_mut().enumerate() {
            let c = *b;
            *b = c ^ self.key[i & 0x0f] ^ prev;
            prev = c;
        }

        self.advance(data.len());
    }

    fn advance(&mut self, size: usize) {
        let mut word = u32::from_le_bytes([self.key[8], self.key[9], self.key[10], self.key[11]]);
        word = word.wrapping_add(size as u32);
        self.key[8..12].copy_from_slice(&word.to_le_bytes());
    }
}
