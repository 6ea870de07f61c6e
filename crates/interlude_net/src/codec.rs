use anyhow::{bail, ensure};
use byteorder::{ByteOrder, LittleEndian};
use bytes::{Buf, BufMut, BytesMut};
use interlude_crypt::{
    append_checksum, dec_xor_pass, enc_xor_pass, verify_checksum, BlowfishCipher, GameCipher,
    STATIC_BLOWFISH_KEY,
};
use interlude_protocol::{Encode, Packet, HEADER_SIZE, MAX_PACKET_SIZE};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame length {0} is outside the protocol bounds")]
    BadLength(usize),
    #[error("frame body of {0} bytes is not decryptable")]
    BadBodySize(usize),
    #[error("frame checksum verification failed")]
    Checksum,
}

/// Checksum-then-Blowfish, the steady-state transform of the login channel
/// and both directions of the inter-server channel.
pub struct SessionCipher {
    bf: BlowfishCipher,
}

impl SessionCipher {
    pub fn new(key: &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            bf: BlowfishCipher::new(key)?,
        })
    }
}

/// The login server's outbound transform: the first frame is the Init
/// packet, XOR-padded and encrypted with the static key; everything after
/// uses the per-connection session key.
pub struct LoginServerCipher {
    statik: BlowfishCipher,
    session: SessionCipher,
    init_sent: bool,
}

impl LoginServerCipher {
    pub fn new(session_key: &[u8; 16]) -> anyhow::Result<Self> {
        Ok(Self {
            statik: BlowfishCipher::new(&STATIC_BLOWFISH_KEY)?,
            session: SessionCipher::new(session_key)?,
            init_sent: false,
        })
    }
}

/// One direction of the game channel's rolling cipher.
pub struct GameWireCipher {
    cipher: GameCipher,
}

impl GameWireCipher {
    pub fn new(key: &[u8; 16]) -> Self {
        Self {
            cipher: GameCipher::new(key),
        }
    }

    /// Arms an inbound-direction cipher once the key packet went out.
    pub fn arm(&mut self) {
        self.cipher.arm();
    }
}

/// The transform a codec applies to frame bodies. Chosen per channel and
/// per direction; the encoder and decoder of one connection each own their
/// own instance, so the two directions never share cipher state.
pub enum WireCipher {
    /// Frames pass through untouched.
    Clear,
    /// Login server → client.
    LoginServer(LoginServerCipher),
    /// Checksum + Blowfish with a single key for the life of the cipher
    /// (until swapped via [`PacketDecoder::set_cipher`] /
    /// [`PacketEncoder::set_cipher`] on the inter-server channel).
    Session(SessionCipher),
    /// Game channel rolling XOR.
    Game(GameWireCipher),
}

fn pad8(n: usize) -> usize {
    (n + 7) & !7
}

/// Encodes packets into framed, encrypted wire bytes.
///
/// Grows an internal buffer; [`take`](Self::take) hands the accumulated
/// frames off for writing. Encryption happens at frame-seal time, so the
/// buffer never holds a mix of sealed and unsealed data.
pub struct PacketEncoder {
    buf: BytesMut,
    cipher: WireCipher,
}

impl PacketEncoder {
    pub fn new(cipher: WireCipher) -> Self {
        Self {
            buf: BytesMut::new(),
            cipher,
        }
    }

    /// Replaces the cipher. Only meaningful between frames.
    pub fn set_cipher(&mut self, cipher: WireCipher) {
        self.cipher = cipher;
    }

    /// Appends one packet as a sealed frame.
    pub fn append_packet<P>(&mut self, pkt: &P) -> anyhow::Result<()>
    where
        P: Packet + Encode,
    {
        let start = self.buf.len();
        self.buf.put_bytes(0, HEADER_SIZE);
        let mut writer = (&mut self.buf).writer();
        pkt.encode_with_opcode(&mut writer)?;
        self.seal_frame(start)
    }

    /// Appends a pre-encoded packet body (opcode included) as a sealed
    /// frame. Broadcast fan-out uses this: the body is encoded once, then
    /// sealed per connection because every connection's cipher state
    /// differs.
    pub fn append_body(&mut self, body: &[u8]) -> anyhow::Result<()> {
        let start = self.buf.len();
        self.buf.put_bytes(0, HEADER_SIZE);
        self.buf.extend_from_slice(body);
        self.seal_frame(start)
    }

    /// Takes all sealed frames written so far.
    pub fn take(&mut self) -> BytesMut {
        self.buf.split()
    }

    fn seal_frame(&mut self, start: usize) -> anyhow::Result<()> {
        let body_len = self.buf.len() - start - HEADER_SIZE;

        let sealed_len = match &mut self.cipher {
            WireCipher::Clear => body_len,
            WireCipher::LoginServer(login) => {
                if login.init_sent {
                    let padded = pad8(body_len + 4);
                    self.buf.put_bytes(0, padded - body_len);
                    let body = &mut self.buf[start + HEADER_SIZE..];
                    append_checksum(body, 0, padded);
                    login.session.bf.encrypt(body, 0, padded)?;
                    padded
                } else {
                    login.init_sent = true;
                    let padded = pad8(body_len + 8);
                    self.buf.put_bytes(0, padded - body_len);
                    let body = &mut self.buf[start + HEADER_SIZE..];
                    enc_xor_pass(body, 0, padded, rand::random());
                    login.statik.encrypt(body, 0, padded)?;
                    padded
                }
            }
            WireCipher::Session(session) => {
                let padded = pad8(body_len + 4);
                self.buf.put_bytes(0, padded - body_len);
                let body = &mut self.buf[start + HEADER_SIZE..];
                append_checksum(body, 0, padded);
                session.bf.encrypt(body, 0, padded)?;
                padded
            }
            WireCipher::Game(game) => {
                game.cipher.encrypt(&mut self.buf[start + HEADER_SIZE..]);
                body_len
            }
        };

        let total = sealed_len + HEADER_SIZE;
        ensure!(total < MAX_PACKET_SIZE, WireError::BadLength(total));
        LittleEndian::write_u16(&mut self.buf[start..start + HEADER_SIZE], total as u16);
        Ok(())
    }
}

/// Splits a byte stream back into decrypted frame bodies.
pub struct PacketDecoder {
    buf: BytesMut,
    cipher: WireCipher,
}

impl PacketDecoder {
    pub fn new(cipher: WireCipher) -> Self {
        Self {
            buf: BytesMut::new(),
            cipher,
        }
    }

    /// Replaces the cipher. Must only happen on a frame boundary, which the
    /// strictly serial inbound handling guarantees.
    pub fn set_cipher(&mut self, cipher: WireCipher) {
        self.cipher = cipher;
    }

    /// Arms a game-channel cipher once the key packet has gone out. A
    /// no-op for the other channel kinds.
    pub fn arm_game_cipher(&mut self) {
        if let WireCipher::Game(game) = &mut self.cipher {
            game.arm();
        }
    }

    /// Returns the next decrypted frame body (opcode included), or `None`
    /// when more bytes are needed.
    pub fn try_next_packet(&mut self) -> anyhow::Result<Option<BytesMut>> {
        if self.buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let total = LittleEndian::read_u16(&self.buf[..HEADER_SIZE]) as usize;
        if total <= HEADER_SIZE || total >= MAX_PACKET_SIZE {
            bail!(WireError::BadLength(total));
        }
        if self.buf.len() < total {
            return Ok(None);
        }

        self.buf.advance(HEADER_SIZE);
        let mut body = self.buf.split_to(total - HEADER_SIZE);
        self.decrypt_body(&mut body)?;
        Ok(Some(body))
    }

    fn decrypt_body(&mut self, body: &mut BytesMut) -> anyhow::Result<()> {
        match &mut self.cipher {
            WireCipher::Clear => {}
            WireCipher::LoginServer(login) => {
                // Inbound on the login channel is always session-keyed.
                decrypt_session_body(&login.session, body)?;
            }
            WireCipher::Session(session) => decrypt_session_body(session, body)?,
            WireCipher::Game(game) => game.cipher.decrypt(body),
        }
        Ok(())
    }

    /// Queues raw socket bytes for framing.
    pub fn queue_bytes(&mut self, bytes: BytesMut) {
        self.buf.unsplit(bytes);
    }

    /// Copies raw socket bytes in, leaving the caller's buffer free to go
    /// back to its pool.
    pub fn queue_slice(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
}

fn decrypt_session_body(session: &SessionCipher, body: &mut BytesMut) -> anyhow::Result<()> {
    let len = body.len();
    if len % 8 != 0 || len < 8 {
        bail!(WireError::BadBodySize(len));
    }
    session.bf.decrypt(body, 0, len)?;
    if !verify_checksum(body, 0, len) {
        bail!(WireError::Checksum);
    }
    Ok(())
}

/// Client-side decryption of the login Init frame: static Blowfish, then
/// the XOR-pad unwind. Exposed for the test client; real clients do the
/// same thing on the other side of the wire.
pub fn decrypt_login_init(body: &mut [u8]) -> anyhow::Result<()> {
    let len = body.len();
    if len % 8 != 0 || len < 16 {
        bail!(WireError::BadBodySize(len));
    }
    let bf = BlowfishCipher::new(&STATIC_BLOWFISH_KEY)?;
    bf.decrypt(body, 0, len)?;
    dec_xor_pass(body, 0, len);
    Ok(())
}
