/// Applies the client's fixed permutation to a 1024-bit RSA modulus before
/// it is shipped in the Init packet.
///
/// Four steps: swap the first dword with the one at 0x4d, fold the upper
/// half into the lower, fold 0x34 into 0x0d, then fold the lower half back
/// into the upper. The client runs [`unscramble_modulus`] to recover the
/// real modulus.
pub fn scramble_modulus(modulus: &mut [u8; 128]) {
    for i in 0..4 {
        modulus.swap(i, 0x4d + i);
    }
    for i in 0..0x40 {
        modulus[i] ^= modulus[0x40 + i];
    }
    for i in 0..4 {
        modulus[0x0d + i] ^= modulus[0x34 + i];
    }
    for i in 0..0x40 {
        modulus[0x40 + i] ^= modulus[i];
    }
}

/// Exact inverse of [`scramble_modulus`].
pub fn unscramble_modulus(modulus: &mut [u8; 128]) {
    for i in 0..0x40 {
        modulus[0x40 + i] ^= modulus[i];
    }
    for i in 0..4 {
        modulus[0x0d + i] ^= modulus[0x34 + i];
    }
    for i in 0..0x40 {
        modulus[i] ^= modulus[0x40 + i];
    }
    for i in 0..4 {
        modulus.swap(i, 0x4d + i);
    }
}
