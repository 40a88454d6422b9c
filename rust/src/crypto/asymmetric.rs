//! RSA wrapper for the envelope protocol: PKCS#1 v1.5 encryption for session
//! secrets and PKCS#1 v1.5 signatures over SHA-1 digests. Ciphertexts and
//! signatures cross the API as standard base64 so they embed directly in JSON.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};

use super::integrity::sha256_hex;
use super::CryptoError;

/// Bytes of PKCS#1 v1.5 encryption padding overhead.
const PKCS1_OVERHEAD: usize = 11;

/// Length of the random sentinel returned when decryption fails to unpad.
/// Matches the session-secret length so a forged envelope proceeds to the
/// symmetric layer and dies there like any other garbage.
pub const SENTINEL_LEN: usize = 32;

enum KeyMaterial {
    Private(RsaPrivateKey),
    Public(RsaPublicKey),
}

/// An RSA key plus the operations the envelope protocol needs from it.
///
/// Public-key operations (encrypt, verify) work with either half; private-key
/// operations (decrypt, sign) fail with [`CryptoError::WrongKeyType`] when the
/// cipher only holds a public key.
pub struct RsaCipher {
    key: KeyMaterial,
}

impl RsaCipher {
    /// Parses a PEM key. Accepts PKCS#8 and PKCS#1 private keys as well as
    /// SubjectPublicKeyInfo and PKCS#1 public keys.
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let pem = pem.trim();
        if let Ok(key) = RsaPrivateKey::from_pkcs8_pem(pem) {
            return Ok(Self::from_private(key));
        }
        if let Ok(key) = RsaPrivateKey::from_pkcs1_pem(pem) {
            return Ok(Self::from_private(key));
        }
        if let Ok(key) = RsaPublicKey::from_public_key_pem(pem) {
            return Ok(Self::from_public(key));
        }
        RsaPublicKey::from_pkcs1_pem(pem)
            .map(Self::from_public)
            .map_err(|e| CryptoError::InvalidKey(format!("{e}")))
    }

    pub fn from_private(key: RsaPrivateKey) -> Self {
        Self {
            key: KeyMaterial::Private(key),
        }
    }

    pub fn from_public(key: RsaPublicKey) -> Self {
        Self {
            key: KeyMaterial::Public(key),
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(self.key, KeyMaterial::Private(_))
    }

    /// Modulus size in bits.
    pub fn bits(&self) -> usize {
        self.public_key().size() * 8
    }

    /// Largest plaintext [`RsaCipher::encrypt`] accepts: modulus bytes minus 11.
    pub fn max_plaintext_len(&self) -> usize {
        self.public_key().size().saturating_sub(PKCS1_OVERHEAD)
    }

    /// SHA-256 hex of the DER-encoded SubjectPublicKeyInfo. Identical for a
    /// private key and the public key derived from it.
    pub fn fingerprint(&self) -> Result<String, CryptoError> {
        let der = self
            .public_key()
            .to_public_key_der()
            .map_err(|e| CryptoError::InvalidKey(format!("{e}")))?;
        Ok(sha256_hex(der.as_bytes()))
    }

    /// Encrypts with PKCS#1 v1.5 padding and returns base64 ciphertext.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let limit = self.max_plaintext_len();
        if plaintext.len() > limit {
            return Err(CryptoError::PlaintextTooLong {
                len: plaintext.len(),
                limit,
            });
        }
        let ciphertext = self
            .public_key()
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(format!("{e}")))?;
        Ok(STANDARD.encode(ciphertext))
    }

    /// Decrypts base64 PKCS#1 v1.5 ciphertext.
    ///
    /// A padding failure does not surface as an error: a random
    /// [`SENTINEL_LEN`]-byte sentinel comes back instead, so callers cannot be
    /// turned into a padding oracle. Malformed base64 and a missing private key
    /// still fail.
    pub fn decrypt(&self, ciphertext: &str) -> Result<Vec<u8>, CryptoError> {
        let raw = decode_base64(ciphertext)?;
        let key = self.private_key()?;
        match key.decrypt(Pkcs1v15Encrypt, &raw) {
            Ok(plaintext) => Ok(plaintext),
            Err(_) => {
                let mut sentinel = vec![0u8; SENTINEL_LEN];
                OsRng.fill_bytes(&mut sentinel);
                Ok(sentinel)
            }
        }
    }

    /// Signs the SHA-1 digest of `message` and returns the base64 signature.
    pub fn sign(&self, message: &[u8]) -> Result<String, CryptoError> {
        let digest = Sha1::digest(message);
        let signature = self
            .private_key()?
            .sign(Pkcs1v15Sign::new::<Sha1>(), &digest)
            .map_err(|e| CryptoError::SigningFailed(format!("{e}")))?;
        Ok(STANDARD.encode(signature))
    }

    /// Checks a base64 signature over `message`. Mismatches and undecodable
    /// signatures both yield `false`.
    pub fn verify(&self, message: &[u8], signature: &str) -> bool {
        let Ok(raw) = decode_base64(signature) else {
            return false;
        };
        let digest = Sha1::digest(message);
        self.public_key()
            .verify(Pkcs1v15Sign::new::<Sha1>(), &digest, &raw)
            .is_ok()
    }

    fn public_key(&self) -> &RsaPublicKey {
        match &self.key {
            KeyMaterial::Private(key) => key.as_ref(),
            KeyMaterial::Public(key) => key,
        }
    }

    fn private_key(&self) -> Result<&RsaPrivateKey, CryptoError> {
        match &self.key {
            KeyMaterial::Private(key) => Ok(key),
            KeyMaterial::Public(_) => Err(CryptoError::WrongKeyType),
        }
    }
}

impl fmt::Debug for RsaCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_private() { "private" } else { "public" };
        f.debug_struct("RsaCipher")
            .field("kind", &kind)
            .field("bits", &self.bits())
            .finish()
    }
}

pub(crate) fn decode_base64(text: &str) -> Result<Vec<u8>, CryptoError> {
    STANDARD
        .decode(text.trim().as_bytes())
        .map_err(|e| CryptoError::Base64DecodeFailed(format!("{e}")))
}
