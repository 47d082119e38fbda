//! CMAC and AES-CTR helpers shared by the parser and the creators.

use crate::keys::{Encrypter, Mac, Mic};

/// Frame direction bit as used in the B0/A_i crypto blocks: 0 for uplink,
/// 1 for downlink, derived from the MType in the first payload byte.
fn direction_bit(mhdr: u8) -> u8 {
    (mhdr >> 5) & 0x01
}

/// Plain CMAC over `data`, truncated to four bytes. Used for join-request
/// and join-accept MICs.
pub(crate) fn calculate_mic<M: Mac>(data: &[u8], mut mac: M) -> Mic {
    mac.input(data);
    let cmac = mac.result();
    let mut mic = [0u8; 4];
    mic.copy_from_slice(&cmac[..4]);
    Mic(mic)
}

/// Data frame MIC: CMAC(B0 | payload) truncated to four bytes, where B0
/// carries the direction, device address and 32-bit extended frame counter.
pub(crate) fn calculate_data_mic<M: Mac>(data: &[u8], mut mac: M, fcnt: u32) -> Mic {
    let mut b0 = [0u8; 16];
    b0[0] = 0x49;
    b0[5] = direction_bit(data[0]);
    b0[6..10].copy_from_slice(&data[1..5]);
    b0[10..14].copy_from_slice(&fcnt.to_le_bytes());
    b0[15] = data.len() as u8;

    mac.input(&b0);
    mac.input(data);
    let cmac = mac.result();
    let mut mic = [0u8; 4];
    mic.copy_from_slice(&cmac[..4]);
    Mic(mic)
}

/// XORs `data[start..end]` with the AES-CTR keystream built from the A_i
/// blocks of the frame the slice belongs to. Encryption and decryption are
/// the same operation.
pub(crate) fn encrypt_frm_payload<E: Encrypter>(
    data: &mut [u8],
    start: usize,
    end: usize,
    fcnt: u32,
    enc: &E,
) {
    let mut a = [0u8; 16];
    a[0] = 0x01;
    a[5] = direction_bit(data[0]);
    a[6..10].copy_from_slice(&data[1..5]);
    a[10..14].copy_from_slice(&fcnt.to_le_bytes());

    let len = end - start;
    let mut s = [0u8; 16];
    for block in 0..len.div_ceil(16) {
        a[15] = (block + 1) as u8;
        s.copy_from_slice(&a);
        enc.encrypt_block(&mut s);

        let offset = start + (block << 4);
        let in_block = core::cmp::min(16, end - offset);
        for (byte, key) in data[offset..offset + in_block].iter_mut().zip(s.iter()) {
            *byte ^= key;
        }
    }
}
