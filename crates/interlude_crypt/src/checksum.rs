use byteorder::{ByteOrder, LittleEndian};

/// Computes the XOR word checksum over `data[off..off + size - 4]` and
/// stores it in the last 4 bytes of the range.
///
/// `size` must be a multiple of 4 and greater than 4; the caller guarantees
/// this because the packet padding rules already force it.
pub fn append_checksum(data: &mut [u8], off: usize, size: usize) {
    debug_assert!(size % 4 == 0 && size > 4);
    debug_assert!(off + size <= data.len());

    let mut chksum = 0u32;
    for pos in (off..off + size - 4).step_by(4) {
        chksum ^= LittleEndian::read_u32(&data[pos..pos + 4]);
    }
    LittleEndian::write_u32(&mut data[off + size - 4..off + size], chksum);
}

/// Verifies the checksum written by [`append_checksum`]: XOR-ing every word
/// of the full range, checksum word included, must yield zero.
pub fn verify_checksum(data: &[u8], off: usize, size: usize) -> bool {
    if size % 4 != 0 || size <= 4 || off + size > data.len() {
        return false;
    }

    let mut chksum = 0u32;
    for pos in (off..off + size).step_by(4) {
        chksum ^= LittleEndian::read_u32(&data[pos..pos + 4]);
    }
    chksum == 0
}
