//! Hunter's message-security core: signed hybrid RSA+AES envelopes exchanged
//! between an internal principal and external ones, plus the once-per-process
//! bootstrap that provisions the keys and secrets those envelopes need.

pub mod bootstrap;
pub mod config;
pub mod crypto;
