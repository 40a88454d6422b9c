//! AES in ECB mode with PKCS#7-style byte padding, plus the fixed-size secret
//! type that keys it.
//!
//! ECB leaks equality of 16-byte plaintext blocks to anyone holding the
//! ciphertext. The envelope keeps it because existing peers speak exactly this
//! composition; integrity comes from the RSA signature inside the payload.

use std::fmt;

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use super::asymmetric::decode_base64;
use super::CryptoError;

pub const BLOCK_SIZE: usize = 16;

/// Length of an AES-256 key and therefore of every [`SymmetricSecret`].
pub const SECRET_LEN: usize = 32;

enum BlockCipher {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl BlockCipher {
    fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let invalid = |_| CryptoError::InvalidKeyLength(key.len());
        match key.len() {
            16 => Aes128::new_from_slice(key).map(Self::Aes128).map_err(invalid),
            24 => Aes192::new_from_slice(key).map(Self::Aes192).map_err(invalid),
            32 => Aes256::new_from_slice(key).map(Self::Aes256).map_err(invalid),
            other => Err(CryptoError::InvalidKeyLength(other)),
        }
    }

    fn encrypt_blocks(&self, buf: &mut [u8]) {
        for chunk in buf.chunks_exact_mut(BLOCK_SIZE) {
            let block = GenericArray::from_mut_slice(chunk);
            match self {
                Self::Aes128(c) => c.encrypt_block(block),
                Self::Aes192(c) => c.encrypt_block(block),
                Self::Aes256(c) => c.encrypt_block(block),
            }
        }
    }

    fn decrypt_blocks(&self, buf: &mut [u8]) {
        for chunk in buf.chunks_exact_mut(BLOCK_SIZE) {
            let block = GenericArray::from_mut_slice(chunk);
            match self {
                Self::Aes128(c) => c.decrypt_block(block),
                Self::Aes192(c) => c.decrypt_block(block),
                Self::Aes256(c) => c.decrypt_block(block),
            }
        }
    }
}

/// AES-ECB cipher over base64 text. The key is used as given; normalizing it
/// is the caller's job (see [`SymmetricSecret`]).
pub struct AesCipher {
    cipher: BlockCipher,
}

impl AesCipher {
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self {
            cipher: BlockCipher::new(key)?,
        })
    }

    /// Appends `n` bytes of value `n`, where `n` is in `1..=BLOCK_SIZE`.
    /// Block-aligned input gets a whole extra block.
    pub fn pad(data: &[u8]) -> Vec<u8> {
        let n = BLOCK_SIZE - data.len() % BLOCK_SIZE;
        let mut padded = Vec::with_capacity(data.len() + n);
        padded.extend_from_slice(data);
        padded.resize(data.len() + n, n as u8);
        padded
    }

    /// Strips as many trailing bytes as the last byte says. The pad bytes
    /// themselves are not inspected.
    pub fn unpad(data: &[u8]) -> Result<&[u8], CryptoError> {
        let n = *data.last().ok_or(CryptoError::MalformedPadding)? as usize;
        if n == 0 || n > data.len() {
            return Err(CryptoError::MalformedPadding);
        }
        Ok(&data[..data.len() - n])
    }

    /// `base64(AES-ECB(pad(raw)))`
    pub fn encrypt(&self, raw: &[u8]) -> String {
        let mut buf = Self::pad(raw);
        self.cipher.encrypt_blocks(&mut buf);
        STANDARD.encode(buf)
    }

    /// `unpad(AES-ECB⁻¹(base64decode(enc)))`
    pub fn decrypt(&self, enc: &str) -> Result<Vec<u8>, CryptoError> {
        let mut buf = decode_base64(enc)?;
        if buf.is_empty() || buf.len() % BLOCK_SIZE != 0 {
            return Err(CryptoError::InvalidCiphertextLength(buf.len()));
        }
        self.cipher.decrypt_blocks(&mut buf);
        let plaintext = Self::unpad(&buf).map(<[u8]>::to_vec);
        buf.zeroize();
        plaintext
    }
}

/// Exactly 32 bytes of AES-256 key material, wiped on drop. Equality runs in
/// constant time.
#[derive(Clone)]
pub struct SymmetricSecret {
    bytes: [u8; SECRET_LEN],
}

impl SymmetricSecret {
    /// Right-pads `source` with ASCII spaces or truncates it to 32 bytes.
    pub fn from_source(source: &str) -> Self {
        let mut bytes = [b' '; SECRET_LEN];
        let raw = source.as_bytes();
        let take = raw.len().min(SECRET_LEN);
        bytes[..take].copy_from_slice(&raw[..take]);
        Self { bytes }
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; SECRET_LEN] = raw
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength(raw.len()))?;
        Ok(Self { bytes })
    }

    /// Fresh per-message secret of random ASCII alphanumerics, so peers that
    /// decode the secret as text always get valid UTF-8.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SECRET_LEN];
        for (slot, byte) in bytes.iter_mut().zip(OsRng.sample_iter(&Alphanumeric)) {
            *slot = byte;
        }
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn cipher(&self) -> Result<AesCipher, CryptoError> {
        AesCipher::new(&self.bytes)
    }
}

impl ConstantTimeEq for SymmetricSecret {
    fn ct_eq(&self, other: &Self) -> subtle::Choice {
        self.bytes[..].ct_eq(&other.bytes[..])
    }
}

impl PartialEq for SymmetricSecret {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other).into()
    }
}

impl Eq for SymmetricSecret {}

impl fmt::Debug for SymmetricSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricSecret(<redacted>)")
    }
}

impl Drop for SymmetricSecret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::{AesCipher, SymmetricSecret, BLOCK_SIZE, SECRET_LEN};
    use crate::crypto::CryptoError;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use hex::ToHex;
    use rand::RngCore;
    use subtle::ConstantTimeEq;

    fn ping_cipher() -> AesCipher {
        SymmetricSecret::from_source(&"S".repeat(32)).cipher().expect("valid key")
    }

    #[test]
    fn matches_fips_197_vector() {
        let key: Vec<u8> = (0u8..32).collect();
        let cipher = AesCipher::new(&key).expect("valid key");
        let plaintext = hex::decode("00112233445566778899aabbccddeeff").unwrap();
        let encrypted = STANDARD.decode(cipher.encrypt(&plaintext)).unwrap();
        assert_eq!(encrypted.len(), 2 * BLOCK_SIZE);
        assert_eq!((&encrypted[..BLOCK_SIZE]).encode_hex::<String>(), "8ea2b7ca516745bfeafc49904b496089");
    }

    #[test]
    fn matches_openssl_ecb_output() {
        // printf '...' | openssl enc -aes-256-ecb -nosalt -K 5353...53 | base64
        let cipher = ping_cipher();
        assert_eq!(
            cipher.encrypt(br#"{"action": "ping", "ts": 1700000000}"#),
            "z16P3dSCOJeo6esOy3V4nGUfKNNukxyPrHYO62D3OrOVDhGc2oTutvZ1FqipyCcO"
        );
        assert_eq!(cipher.encrypt(b""), "Og4U2WCQrwSwYh7t7shKtw==");
    }

    #[test]
    fn encrypts_and_decrypts_round_trip() {
        let mut key = [0u8; SECRET_LEN];
        rand::thread_rng().fill_bytes(&mut key);
        let cipher = AesCipher::new(&key).expect("valid key");
        for len in 0..=1000 {
            let mut raw = vec![0u8; len];
            rand::thread_rng().fill_bytes(&mut raw);
            let decrypted = cipher.decrypt(&cipher.encrypt(&raw)).expect("decryption should succeed");
            assert_eq!(decrypted, raw, "length {len}");
        }
    }

    #[test]
    fn aligned_input_gets_a_full_pad_block() {
        for blocks in 0..4 {
            let data = vec![0xAB; blocks * BLOCK_SIZE];
            let padded = AesCipher::pad(&data);
            assert_eq!(padded.len(), data.len() + BLOCK_SIZE);
            assert!(padded[data.len()..].iter().all(|&b| b as usize == BLOCK_SIZE));
        }
        assert_eq!(AesCipher::pad(b"abc")[3..], [13u8; 13]);
    }

    #[test]
    fn unpad_rejects_impossible_lengths() {
        assert!(matches!(AesCipher::unpad(b""), Err(CryptoError::MalformedPadding)));
        assert!(matches!(AesCipher::unpad(b"abc\0"), Err(CryptoError::MalformedPadding)));
        assert!(matches!(AesCipher::unpad(b"ab\x09"), Err(CryptoError::MalformedPadding)));
        assert_eq!(AesCipher::unpad(b"abc\x02\x02").unwrap(), b"abc");
    }

    #[test]
    fn identical_blocks_encrypt_identically() {
        let cipher = ping_cipher();
        let encrypted = STANDARD.decode(cipher.encrypt(&[b'A'; 2 * BLOCK_SIZE])).unwrap();
        assert_eq!(encrypted[..BLOCK_SIZE], encrypted[BLOCK_SIZE..2 * BLOCK_SIZE]);
    }

    #[test]
    fn rejects_bad_keys_and_ciphertexts() {
        assert!(matches!(AesCipher::new(&[1u8; 20]), Err(CryptoError::InvalidKeyLength(20))));
        assert!(AesCipher::new(&[1u8; 16]).is_ok());
        assert!(AesCipher::new(&[1u8; 24]).is_ok());
        let cipher = ping_cipher();
        assert!(matches!(cipher.decrypt(&STANDARD.encode([0u8; 15])), Err(CryptoError::InvalidCiphertextLength(15))));
        assert!(matches!(cipher.decrypt("not base64!"), Err(CryptoError::Base64DecodeFailed(_))));
    }

    #[test]
    fn secrets_pad_or_truncate_to_32_bytes() {
        assert_eq!(SymmetricSecret::from_source("abc").as_bytes(), format!("abc{}", " ".repeat(29)).as_bytes());
        let long = "x".repeat(50);
        assert_eq!(SymmetricSecret::from_source(&long).as_bytes(), "x".repeat(32).as_bytes());
        assert_eq!(SymmetricSecret::from_source("").as_bytes(), [b' '; 32]);
        assert!(SymmetricSecret::from_bytes(&[0u8; 31]).is_err());
    }

    #[test]
    fn generated_secrets_are_alphanumeric_and_distinct() {
        let a = SymmetricSecret::generate();
        let b = SymmetricSecret::generate();
        assert!(a.as_bytes().iter().all(u8::is_ascii_alphanumeric));
        assert_ne!(a, b);
        assert_eq!(format!("{a:?}"), "SymmetricSecret(<redacted>)");
    }

    #[test]
    fn secrets_compare_in_constant_time() {
        let a = SymmetricSecret::from_source("master");
        let mut raw = a.as_bytes().to_vec();
        raw[31] ^= 1;
        let b = SymmetricSecret::from_bytes(&raw).unwrap();

        assert!(bool::from(a.ct_eq(&a.clone())));
        assert!(!bool::from(a.ct_eq(&b)));
        assert_eq!(a, SymmetricSecret::from_source("master"));
        assert_ne!(a, b);
    }
}
