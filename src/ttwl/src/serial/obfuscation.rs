//! Seed-driven serial obfuscation and checksum verification.
//!
//! A binary serial is `[format_version][seed: i32 BE][ciphertext]`. The
//! ciphertext is the plaintext `[checksum: u16 BE][payload]` rotated by
//! `(seed & 0x1F) % len` bytes and XORed with a multiplicative-congruential
//! key stream seeded from `seed >> 5`. A seed of `0` disables both steps.

use super::SerialError;

/// Length of the unencrypted `format_version + seed` header
pub const HEADER_LEN: usize = 5;

/// Length of the checksum at the start of the decrypted plaintext
pub const CHECKSUM_LEN: usize = 2;

const KEY_MULTIPLIER: u64 = 0x10A8_60C1;
const KEY_MODULUS: u64 = 0xFFFF_FFFB;

/// Bytes inserted between header and payload when computing the checksum
const CHECKSUM_SENTINEL: [u8; 2] = [0xFF, 0xFF];

/// A token split into its header fields and verified payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsealed {
    pub format_version: u8,
    pub seed: i32,
    pub payload: Vec<u8>,
}

/// XOR `data` in place with the key stream for `seed`
fn xor_key_stream(data: &mut [u8], seed: i32) {
    if seed == 0 {
        return;
    }

    // Negative seeds shift arithmetically, then get reinterpreted as unsigned
    let mut key = u64::from((seed >> 5) as u32);
    for byte in data.iter_mut() {
        key = (key * KEY_MULTIPLIER) % KEY_MODULUS;
        *byte ^= (key & 0xFF) as u8;
    }
}

fn rotation_steps(seed: i32, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    ((seed & 0x1F) as usize) % len
}

/// Undo the obfuscation: XOR first, then move the last `steps` bytes to the front
pub fn decrypt(data: &[u8], seed: i32) -> Vec<u8> {
    let mut out = data.to_vec();
    xor_key_stream(&mut out, seed);
    out.rotate_right(rotation_steps(seed, data.len()));
    out
}

/// Apply the obfuscation: move the first `steps` bytes to the back, then XOR
pub fn encrypt(data: &[u8], seed: i32) -> Vec<u8> {
    let mut out = data.to_vec();
    out.rotate_left(rotation_steps(seed, data.len()));
    xor_key_stream(&mut out, seed);
    out
}

/// Build the 5-byte unencrypted header
pub fn header_bytes(format_version: u8, seed: i32) -> [u8; HEADER_LEN] {
    let seed = seed.to_be_bytes();
    [format_version, seed[0], seed[1], seed[2], seed[3]]
}

/// CRC32 over `header ++ FF FF ++ payload`, folded to 16 bits
pub fn checksum(header: &[u8], payload: &[u8]) -> u16 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(header);
    hasher.update(&CHECKSUM_SENTINEL);
    hasher.update(payload);
    let crc = hasher.finalize();
    ((crc >> 16) ^ crc) as u16
}

/// Check the stored checksum of a decrypted plaintext and return the payload
pub fn verify_and_strip_checksum(header: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, SerialError> {
    if plaintext.len() < CHECKSUM_LEN {
        return Err(SerialError::TooShort {
            expected: HEADER_LEN + CHECKSUM_LEN,
            actual: header.len() + plaintext.len(),
        });
    }

    let (stored, payload) = plaintext.split_at(CHECKSUM_LEN);
    let stored = u16::from_be_bytes([stored[0], stored[1]]);
    let computed = checksum(header, payload);
    if stored != computed {
        return Err(SerialError::ChecksumMismatch { stored, computed });
    }
    Ok(payload.to_vec())
}

/// Prefix `payload` with its checksum, ready for `encrypt`
pub fn compute_and_prepend_checksum(header: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut plaintext = Vec::with_capacity(CHECKSUM_LEN + payload.len());
    plaintext.extend_from_slice(&checksum(header, payload).to_be_bytes());
    plaintext.extend_from_slice(payload);
    plaintext
}

/// Split, decrypt and verify a binary serial
pub fn unseal(token: &[u8]) -> Result<Unsealed, SerialError> {
    if token.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(SerialError::TooShort {
            expected: HEADER_LEN + CHECKSUM_LEN,
            actual: token.len(),
        });
    }

    let (header, ciphertext) = token.split_at(HEADER_LEN);
    let seed = i32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    let plaintext = decrypt(ciphertext, seed);
    let payload = verify_and_strip_checksum(header, &plaintext)?;

    Ok(Unsealed {
        format_version: header[0],
        seed,
        payload,
    })
}

/// Checksum, encrypt and frame a payload into a binary serial
pub fn seal(format_version: u8, seed: i32, payload: &[u8]) -> Vec<u8> {
    let header = header_bytes(format_version, seed);
    let plaintext = compute_and_prepend_checksum(&header, payload);

    let mut token = Vec::with_capacity(HEADER_LEN + plaintext.len());
    token.extend_from_slice(&header);
    token.extend(encrypt(&plaintext, seed));
    token
}
