//! Cryptographic building blocks for Hunter's envelope protocol. The RSA and
//! AES wrappers are the primitive layer and always raise typed errors; the
//! envelope module composes them and turns untrusted-input failures into
//! explicit rejections instead.

use thiserror::Error;

pub mod asymmetric;
pub mod envelope;
pub mod integrity;
pub mod symmetric;
pub mod wire;

pub use asymmetric::RsaCipher;
pub use envelope::{open, open_and_verify, seal, verify_payload, Envelope, Payload, Rejection};
pub use symmetric::{AesCipher, SymmetricSecret};

/// Errors raised by the primitive cipher layer. Misuse of a primitive should
/// fail loudly, so callers propagate these with `?`.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("operation requires a private key")]
    WrongKeyType,
    #[error("plaintext is {len} bytes; this key accepts at most {limit}")]
    PlaintextTooLong { len: usize, limit: usize },
    #[error("base64 decoding failed: {0}")]
    Base64DecodeFailed(String),
    #[error("invalid symmetric key length {0}; expected 16, 24 or 32 bytes")]
    InvalidKeyLength(usize),
    #[error("ciphertext length {0} is not a multiple of the block size")]
    InvalidCiphertextLength(usize),
    #[error("malformed padding")]
    MalformedPadding,
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("signing failed: {0}")]
    SigningFailed(String),
}
