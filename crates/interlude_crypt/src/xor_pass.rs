use byteorder::{ByteOrder, LittleEndian};

/// The XOR pad applied to the login server's Init packet before the static
/// Blowfish pass.
///
/// Words are processed little-endian from `off + 4` up to `off + size - 8`,
/// folding each into a rolling accumulator seeded with `key`; the final
/// accumulator is written into the 4 bytes at `off + size - 8`. The first 4
/// bytes of the range hold the session id and are never touched.
pub fn enc_xor_pass(data: &mut [u8], off: usize, size: usize, key: i32) {
    debug_assert!(size % 4 == 0 && size >= 16);
    debug_assert!(off + size <= data.len());

    let stop = off + size - 8;
    let mut ecx = key as u32;

    let mut pos = off + 4;
    while pos < stop {
        let edx = LittleEndian::read_u32(&data[pos..pos + 4]);
        ecx = ecx.wrapping_add(edx);
        LittleEndian::write_u32(&mut data[pos..pos + 4], edx ^ ecx);
        pos += 4;
    }

    LittleEndian::write_u32(&mut data[stop..stop + 4], ecx);
}

/// Reverses [`enc_xor_pass`]: reads the rolling key from the trailing word
/// and walks the region backwards, unwinding the accumulator.
pub fn dec_xor_pass(data: &mut [u8], off: usize, size: usize) {
    debug_assert!(size % 4 == 0 && size >= 16);
    debug_assert!(off + size <= data.len());

    let stop = off + size - 8;
    let mut ecx = LittleEndian::read_u32(&data[stop..stop + 4]);

    let mut pos = stop;
    while pos > off + 4 {
        pos -= 4;
        let edx = LittleEndian::read_u32(&data[pos..pos + 4]) ^ ecx;
        LittleEndian::write_u32(&mut data[pos..pos + 4], edx);
        ecx = ecx.wrapping_sub(edx);
    }
}

#[cfg(test)]
mod tests {
    use rand::{thread_rng, Rng};

    use super::*;

    #[test]
    fn round_trip_many_keys_and_sizes() {
        let mut rng = thread_rng();

        for size in (16..=184).step_by(4) {
            let mut buf = vec![0u8; size];
            rng.fill(&mut buf[..]);
            let original = buf.clone();

            let key: i32 = rng.gen();
            enc_xor_pass(&mut buf, 0, size, key);
            dec_xor_pass(&mut buf, 0, size);
            assert_eq!(buf, original, "size {size} key {key}");
        }
    }

    #[test]
    fn session_id_word_is_untouched() {
        let mut buf = vec![0u8; 64];
        buf[..4].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);

        enc_xor_pass(&mut buf, 0, 64, 0x1234_5678);
        assert_eq!(&buf[..4], &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn rolling_key_lands_in_trailing_word() {
        let mut buf = vec![0u8; 32];
        let mut rng = thread_rng();
        rng.fill(&mut buf[..24]);
        buf[24..].fill(0);

        enc_xor_pass(&mut buf, 0, 32, 7);
        // The last 4 bytes are padding and stay zero; the rolling key sits
        // just before them.
        assert_eq!(&buf[28..], &[0, 0, 0, 0]);
        assert_ne!(&buf[24..28], &[0, 0, 0, 0]);
    }

    #[test]
    fn round_trip_at_offset() {
        let mut buf = vec![0x77u8; 48];
        let original = buf.clone();

        enc_xor_pass(&mut buf, 8, 40, -1);
        assert_eq!(&buf[..8], &original[..8]);
        dec_xor_pass(&mut buf, 8, 40);
        assert_eq!(buf, original);
    }
}
