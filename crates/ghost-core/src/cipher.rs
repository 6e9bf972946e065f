//! Payload encryption: ChaCha20 with a Poly1305 tag (RFC 8439)
//!
//! Block 0 of the keystream for a nonce becomes the one-time Poly1305 key;
//! plaintext is XORed with blocks 1, 2, ... The tag authenticates
//! `aad ‖ pad ‖ ciphertext ‖ pad ‖ len(aad) ‖ len(ciphertext)`, which makes
//! the output byte-compatible with standard ChaCha20-Poly1305.
//!
//! Stored payload format: `nonce (12) ‖ tag (16) ‖ ciphertext`.

use poly1305::{
    universal_hash::{KeyInit, UniversalHash},
    Poly1305,
};
use rand::{rngs::OsRng, RngCore};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

use crate::error::{Error, Result};
use crate::types::sha256_hex;
use crate::KEY_SIZE;

/// Nonce size in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

/// ChaCha20 block size in bytes
pub const BLOCK_SIZE: usize = 64;

/// Bytes preceding the ciphertext in the stored format
pub const HEADER_SIZE: usize = NONCE_SIZE + TAG_SIZE;

/// "expand 32-byte k"
const SIGMA: [u32; 4] = [0x6170_7865, 0x3320_646e, 0x7962_2d32, 0x6b20_6574];

/// Largest plaintext one nonce can cover (counter 1 through u32::MAX)
const MAX_PLAINTEXT_LEN: u64 = (u32::MAX as u64) * BLOCK_SIZE as u64;

#[inline(always)]
fn quarter_round(state: &mut [u32; 16], a: usize, b: usize, c: usize, d: usize) {
    state[a] = state[a].wrapping_add(state[b]);
    state[d] = (state[d] ^ state[a]).rotate_left(16);
    state[c] = state[c].wrapping_add(state[d]);
    state[b] = (state[b] ^ state[c]).rotate_left(12);
    state[a] = state[a].wrapping_add(state[b]);
    state[d] = (state[d] ^ state[a]).rotate_left(8);
    state[c] = state[c].wrapping_add(state[d]);
    state[b] = (state[b] ^ state[c]).rotate_left(7);
}

#[inline(always)]
fn le_word(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// The ChaCha20 block function
///
/// State layout: 4 constant words, 8 key words, the block counter, and 3
/// nonce words. Ten double rounds (column then diagonal), then the input state
/// is added back and the result serialized little-endian.
pub fn chacha_block(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    counter: u32,
) -> [u8; BLOCK_SIZE] {
    let mut initial = [0u32; 16];
    initial[..4].copy_from_slice(&SIGMA);
    for (word, chunk) in initial[4..12].iter_mut().zip(key.chunks_exact(4)) {
        *word = le_word(chunk);
    }
    initial[12] = counter;
    for (word, chunk) in initial[13..].iter_mut().zip(nonce.chunks_exact(4)) {
        *word = le_word(chunk);
    }

    let mut working = initial;
    for _ in 0..10 {
        quarter_round(&mut working, 0, 4, 8, 12);
        quarter_round(&mut working, 1, 5, 9, 13);
        quarter_round(&mut working, 2, 6, 10, 14);
        quarter_round(&mut working, 3, 7, 11, 15);

        quarter_round(&mut working, 0, 5, 10, 15);
        quarter_round(&mut working, 1, 6, 11, 12);
        quarter_round(&mut working, 2, 7, 8, 13);
        quarter_round(&mut working, 3, 4, 9, 14);
    }

    let mut output = [0u8; BLOCK_SIZE];
    for (i, (w, s)) in working.iter().zip(initial.iter()).enumerate() {
        output[i * 4..i * 4 + 4].copy_from_slice(&w.wrapping_add(*s).to_le_bytes());
    }

    initial.zeroize();
    working.zeroize();
    output
}

/// An encrypted payload as stored on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    pub nonce: [u8; NONCE_SIZE],
    pub tag: [u8; TAG_SIZE],
    pub ciphertext: Vec<u8>,
}

impl EncryptedPayload {
    /// Serialize as `nonce ‖ tag ‖ ciphertext`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + self.ciphertext.len());
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&self.tag);
        bytes.extend_from_slice(&self.ciphertext);
        bytes
    }

    /// Parse the flat stored format
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::MalformedPayload(format!(
                "{} bytes is shorter than the {}-byte header",
                bytes.len(),
                HEADER_SIZE
            )));
        }

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&bytes[..NONCE_SIZE]);
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&bytes[NONCE_SIZE..HEADER_SIZE]);

        Ok(Self {
            nonce,
            tag,
            ciphertext: bytes[HEADER_SIZE..].to_vec(),
        })
    }

    /// SHA-256 of the stored representation, as recorded in device manifests
    pub fn digest(&self) -> String {
        sha256_hex(&self.to_bytes())
    }
}

/// ChaCha20-Poly1305 keyed with the vault payload key
pub struct PayloadCipher {
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl PayloadCipher {
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            key: Zeroizing::new(*key),
        }
    }

    /// Build from a byte slice, typically a reconstructed secret
    pub fn from_slice(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_SIZE {
            return Err(Error::InvalidKeyLength {
                expected: KEY_SIZE,
                found: key.len(),
            });
        }
        let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
        bytes.copy_from_slice(key);
        Ok(Self { key: bytes })
    }

    /// Encrypt and authenticate, returning the ciphertext and its tag
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
    ) -> Result<(Vec<u8>, [u8; TAG_SIZE])> {
        if plaintext.len() as u64 > MAX_PLAINTEXT_LEN {
            return Err(Error::PayloadTooLarge(plaintext.len()));
        }

        let mut ciphertext = plaintext.to_vec();
        self.apply_keystream(nonce, &mut ciphertext);
        let tag = self.compute_tag(nonce, aad, &ciphertext);
        Ok((ciphertext, tag))
    }

    /// Verify the tag in constant time, then decrypt
    ///
    /// The keystream is never applied unless the tag matches.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        nonce: &[u8; NONCE_SIZE],
        tag: &[u8; TAG_SIZE],
        aad: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>> {
        if ciphertext.len() as u64 > MAX_PLAINTEXT_LEN {
            return Err(Error::PayloadTooLarge(ciphertext.len()));
        }

        let expected = self.compute_tag(nonce, aad, ciphertext);
        if !bool::from(expected.ct_eq(tag)) {
            return Err(Error::AuthenticationTagMismatch);
        }

        let mut plaintext = Zeroizing::new(ciphertext.to_vec());
        self.apply_keystream(nonce, &mut plaintext);
        Ok(plaintext)
    }

    /// Encrypt under a fresh random nonce
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<EncryptedPayload> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        let (ciphertext, tag) = self.encrypt(plaintext, &nonce, aad)?;
        Ok(EncryptedPayload {
            nonce,
            tag,
            ciphertext,
        })
    }

    /// Authenticate and decrypt a stored payload
    pub fn open(&self, payload: &EncryptedPayload, aad: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        self.decrypt(&payload.ciphertext, &payload.nonce, &payload.tag, aad)
    }

    fn apply_keystream(&self, nonce: &[u8; NONCE_SIZE], data: &mut [u8]) {
        for (counter, chunk) in (1u32..).zip(data.chunks_mut(BLOCK_SIZE)) {
            let mut block = chacha_block(&self.key, nonce, counter);
            for (byte, k) in chunk.iter_mut().zip(block.iter()) {
                *byte ^= k;
            }
            block.zeroize();
        }
    }

    fn compute_tag(&self, nonce: &[u8; NONCE_SIZE], aad: &[u8], ciphertext: &[u8]) -> [u8; TAG_SIZE] {
        let mut block = chacha_block(&self.key, nonce, 0);
        let mut mac = Poly1305::new(poly1305::Key::from_slice(&block[..32]));
        block.zeroize();

        mac.update_padded(aad);
        mac.update_padded(ciphertext);

        let mut lengths = [0u8; 16];
        lengths[..8].copy_from_slice(&(aad.len() as u64).to_le_bytes());
        lengths[8..].copy_from_slice(&(ciphertext.len() as u64).to_le_bytes());
        mac.update_padded(&lengths);

        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(mac.finalize().as_slice());
        tag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chacha20poly1305::{
        aead::{AeadInPlace, KeyInit as _},
        ChaCha20Poly1305, Nonce,
    };

    fn sequential_key() -> [u8; KEY_SIZE] {
        let mut key = [0u8; KEY_SIZE];
        for (i, b) in key.iter_mut().enumerate() {
            *b = i as u8;
        }
        key
    }

    #[test]
    fn test_chacha_block_rfc8439_vector() {
        // RFC 8439 section 2.3.2
        let key = sequential_key();
        let nonce = [0, 0, 0, 0x09, 0, 0, 0, 0x4a, 0, 0, 0, 0];
        let block = chacha_block(&key, &nonce, 1);

        let expected = hex::decode(concat!(
            "10f1e7e4d13b5915500fdd1fa32071c4",
            "c7d1f4c733c068030422aa9ac3d46c4e",
            "d2826446079faa0914c2d705d98b02a2",
            "b5129cd1de164eb9cbd083e8a2503c4e"
        ))
        .unwrap();
        assert_eq!(block.as_slice(), expected.as_slice());
    }

    #[test]
    fn test_matches_reference_aead() {
        let key = [0x5Au8; KEY_SIZE];
        let nonce = [0x07u8; NONCE_SIZE];
        let aad = b"ghost-shell";
        let plaintext: Vec<u8> = (0..300u32).map(|i| (i * 7) as u8).collect();

        let cipher = PayloadCipher::new(&key);
        let (ciphertext, tag) = cipher.encrypt(&plaintext, &nonce, aad).unwrap();

        let reference = ChaCha20Poly1305::new_from_slice(&key).unwrap();
        let mut buffer = plaintext.clone();
        let reference_tag = reference
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), aad, &mut buffer)
            .unwrap();

        assert_eq!(ciphertext, buffer);
        assert_eq!(tag.as_slice(), reference_tag.as_slice());
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = PayloadCipher::new(&[1u8; KEY_SIZE]);
        let nonce = [2u8; NONCE_SIZE];
        let plaintext = b"model weights live here";

        let (ciphertext, tag) = cipher.encrypt(plaintext, &nonce, b"aad").unwrap();
        assert_ne!(ciphertext.as_slice(), plaintext);

        let decrypted = cipher.decrypt(&ciphertext, &nonce, &tag, b"aad").unwrap();
        assert_eq!(decrypted.as_slice(), plaintext);
    }

    #[test]
    fn test_tampered_ciphertext_is_rejected() {
        let cipher = PayloadCipher::new(&[3u8; KEY_SIZE]);
        let nonce = [4u8; NONCE_SIZE];
        let (mut ciphertext, tag) = cipher.encrypt(b"do not touch", &nonce, b"").unwrap();

        ciphertext[0] ^= 0x01;
        assert_eq!(
            cipher.decrypt(&ciphertext, &nonce, &tag, b""),
            Err(Error::AuthenticationTagMismatch)
        );
    }

    #[test]
    fn test_wrong_aad_or_key_is_rejected() {
        let cipher = PayloadCipher::new(&[5u8; KEY_SIZE]);
        let nonce = [6u8; NONCE_SIZE];
        let (ciphertext, tag) = cipher.encrypt(b"bound to aad", &nonce, b"one").unwrap();

        assert!(cipher.decrypt(&ciphertext, &nonce, &tag, b"two").is_err());

        let other = PayloadCipher::new(&[9u8; KEY_SIZE]);
        assert!(other.decrypt(&ciphertext, &nonce, &tag, b"one").is_err());
    }

    #[test]
    fn test_payload_format_roundtrip() {
        let cipher = PayloadCipher::new(&[7u8; KEY_SIZE]);
        let payload = cipher.seal(b"stored payload", b"").unwrap();

        let bytes = payload.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE + 14);
        assert_eq!(&bytes[..NONCE_SIZE], &payload.nonce);
        assert_eq!(&bytes[NONCE_SIZE..HEADER_SIZE], &payload.tag);

        let parsed = EncryptedPayload::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, payload);
        assert_eq!(cipher.open(&parsed, b"").unwrap().as_slice(), b"stored payload");
    }

    #[test]
    fn test_short_payload_is_malformed() {
        let result = EncryptedPayload::from_bytes(&[0u8; HEADER_SIZE - 1]);
        assert!(matches!(result, Err(Error::MalformedPayload(_))));

        // Header alone is a valid empty payload
        assert!(EncryptedPayload::from_bytes(&[0u8; HEADER_SIZE]).is_ok());
    }

    #[test]
    fn test_key_length_is_checked() {
        assert!(PayloadCipher::from_slice(&[0u8; 16]).is_err());
        assert!(PayloadCipher::from_slice(&[0u8; KEY_SIZE]).is_ok());
    }

    #[test]
    fn test_seal_uses_fresh_nonces() {
        let cipher = PayloadCipher::new(&[8u8; KEY_SIZE]);
        let a = cipher.seal(b"same", b"").unwrap();
        let b = cipher.seal(b"same", b"").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }
}
