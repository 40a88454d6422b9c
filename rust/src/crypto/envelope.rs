//! Hybrid signed envelopes.
//!
//! A sender signs the payload with its own RSA key, embeds the signature under
//! the reserved `sign` field, encrypts the result with a per-message AES
//! secret and wraps that secret with the recipient's RSA public key. The wire
//! object has exactly two string fields, `crypto_data` and `cipher_secret`.
//!
//! Sealing runs on trusted input and propagates errors. Everything on the
//! receiving side handles untrusted input and reports failure as a
//! [`Rejection`] value, or an empty payload from [`open_and_verify`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use super::asymmetric::RsaCipher;
use super::symmetric::{AesCipher, SymmetricSecret};
use super::wire::to_wire_bytes;
use super::CryptoError;

/// Ordered JSON mapping carried inside an envelope.
pub type Payload = Map<String, Value>;

pub const SIGN_FIELD: &str = "sign";
pub const CRYPTO_DATA_FIELD: &str = "crypto_data";
pub const CIPHER_SECRET_FIELD: &str = "cipher_secret";

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("payload already carries the reserved `sign` field")]
    ReservedField,
    #[error("payload serialization failed: {0}")]
    Serialize(String),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Why a received envelope was refused.
#[derive(Debug, Error)]
pub enum Rejection {
    #[error("envelope is not a JSON object")]
    NotAnObject,
    #[error("envelope fields {0:?} are not exactly crypto_data and cipher_secret")]
    FieldSet(Vec<String>),
    #[error("envelope field `{0}` is not a string")]
    FieldType(&'static str),
    #[error("cipher layer refused the envelope: {0}")]
    Crypto(#[from] CryptoError),
    #[error("decrypted payload is not valid JSON: {0}")]
    Malformed(String),
    #[error("decrypted payload is not a JSON object")]
    PayloadNotObject,
    #[error("payload has no string `sign` field")]
    MissingSignature,
    #[error("signature does not match payload")]
    SignatureMismatch,
}

/// The two-field object that travels between principals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    pub crypto_data: String,
    pub cipher_secret: String,
}

impl Envelope {
    /// Shape check for untrusted JSON: an object with exactly the two string
    /// fields and nothing else.
    pub fn from_value(value: &Value) -> Result<Self, Rejection> {
        let fields = value.as_object().ok_or(Rejection::NotAnObject)?;
        if fields.len() != 2 || !fields.contains_key(CRYPTO_DATA_FIELD) || !fields.contains_key(CIPHER_SECRET_FIELD) {
            return Err(Rejection::FieldSet(fields.keys().cloned().collect()));
        }
        let text = |name: &'static str| {
            fields
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or(Rejection::FieldType(name))
        };
        Ok(Self {
            crypto_data: text(CRYPTO_DATA_FIELD)?,
            cipher_secret: text(CIPHER_SECRET_FIELD)?,
        })
    }

    pub fn to_value(&self) -> Value {
        let mut fields = Map::new();
        fields.insert(CRYPTO_DATA_FIELD.to_owned(), Value::String(self.crypto_data.clone()));
        fields.insert(CIPHER_SECRET_FIELD.to_owned(), Value::String(self.cipher_secret.clone()));
        Value::Object(fields)
    }

    /// Unwraps the session secret and decrypts the signed payload. The
    /// signature is left in place and unchecked.
    pub fn open(&self, receiver_private: &RsaCipher) -> Result<Payload, Rejection> {
        let session_secret = receiver_private.decrypt(&self.cipher_secret)?;
        let plaintext = AesCipher::new(&session_secret)?.decrypt(&self.crypto_data)?;
        match serde_json::from_slice(&plaintext) {
            Ok(Value::Object(payload)) => Ok(payload),
            Ok(_) => Err(Rejection::PayloadNotObject),
            Err(e) => Err(Rejection::Malformed(format!("{e}"))),
        }
    }
}

/// Signs `payload` with the sender's private key and encrypts it for the
/// recipient under `session_secret`.
pub fn seal(
    payload: &Payload,
    session_secret: &SymmetricSecret,
    sender_private: &RsaCipher,
    recipient_public: &RsaCipher,
) -> Result<Envelope, EnvelopeError> {
    if payload.contains_key(SIGN_FIELD) {
        return Err(EnvelopeError::ReservedField);
    }
    let signature = sender_private.sign(&serialize(payload)?)?;

    let mut signed = payload.clone();
    signed.insert(SIGN_FIELD.to_owned(), Value::String(signature));

    let crypto_data = session_secret.cipher()?.encrypt(&serialize(&signed)?);
    let cipher_secret = recipient_public.encrypt(session_secret.as_bytes())?;
    debug!(fields = payload.len(), "sealed envelope");
    Ok(Envelope {
        crypto_data,
        cipher_secret,
    })
}

/// Checks the envelope shape, then decrypts it with the receiver's private
/// key. The returned payload still carries its `sign` field.
pub fn open(envelope: &Value, receiver_private: &RsaCipher) -> Result<Payload, Rejection> {
    Envelope::from_value(envelope)?.open(receiver_private)
}

/// Removes the `sign` field from `signed` and checks it against the
/// re-serialized remainder. The field is consumed either way; copy it first
/// if it is needed afterwards.
pub fn verify_payload(signed: &mut Payload, sender_public: &RsaCipher) -> bool {
    check_signature(signed, sender_public).is_ok()
}

/// [`open`] followed by [`verify_payload`], reporting the first failure.
pub fn try_open_and_verify(
    envelope: &Value,
    receiver_private: &RsaCipher,
    sender_public: &RsaCipher,
) -> Result<Payload, Rejection> {
    let mut payload = open(envelope, receiver_private)?;
    check_signature(&mut payload, sender_public)?;
    Ok(payload)
}

/// Opens and verifies an envelope, returning the payload without its `sign`
/// field. Any failure yields an empty mapping.
pub fn open_and_verify(envelope: &Value, receiver_private: &RsaCipher, sender_public: &RsaCipher) -> Payload {
    match try_open_and_verify(envelope, receiver_private, sender_public) {
        Ok(payload) => payload,
        Err(reason) => {
            warn!(%reason, "rejected envelope");
            Payload::new()
        }
    }
}

fn check_signature(signed: &mut Payload, sender_public: &RsaCipher) -> Result<(), Rejection> {
    let signature = match signed.shift_remove(SIGN_FIELD) {
        Some(Value::String(signature)) => signature,
        _ => return Err(Rejection::MissingSignature),
    };
    let body = to_wire_bytes(signed).map_err(|e| Rejection::Malformed(format!("{e}")))?;
    if sender_public.verify(&body, &signature) {
        Ok(())
    } else {
        Err(Rejection::SignatureMismatch)
    }
}

fn serialize(payload: &Payload) -> Result<Vec<u8>, EnvelopeError> {
    to_wire_bytes(payload).map_err(|e| EnvelopeError::Serialize(format!("{e}")))
}
