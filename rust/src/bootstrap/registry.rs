//! Idempotent resolution of bootstrap secrets backed by an env file.
//!
//! A key is looked at once per process. The first `resolve` reloads the env
//! file, generates and persists a value when none exists, and caches the
//! outcome; later calls return the cache until `force_update` is passed.
//! Idempotence keys on "has this key been looked at", so a cached empty
//! string sticks as well.
//!
//! The registry never mutates the process environment. It keeps its own view
//! instead: real process variables win, then env-file entries in the order
//! they were first loaded, and an entry already in the view is never
//! replaced by a later reload.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::rngs::OsRng;
use rand::Rng;
use serde::Deserialize;
use tracing::{debug, error, warn};

use super::env_file::{DotenvFile, EnvStore};
use super::redact::Redacted;
use super::singleton::HealthCheck;

const SECRET_KEY_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*(-_=+)";
const SECRET_KEY_LEN: usize = 50;

/// Random 50-character master secret in the format peers already store.
pub fn generate_secret_key() -> String {
    let mut rng = OsRng;
    (0..SECRET_KEY_LEN)
        .map(|_| SECRET_KEY_ALPHABET[rng.gen_range(0..SECRET_KEY_ALPHABET.len())] as char)
        .collect()
}

/// What `resolve` caches after it had to generate a value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicy {
    /// Cache the environment lookup made before generation, which is empty
    /// the first time a key is generated. Matches what deployed peers do.
    #[default]
    Environment,
    /// Cache the freshly generated value.
    Generated,
}

/// Something that creates files on disk at most once per process.
pub trait FileGenerator {
    /// Stable name used to recognise a generator that already ran.
    fn identity(&self) -> String;
    /// Does the work; returns whether anything was generated.
    fn generate(&self) -> bool;
}

#[derive(Default)]
struct RegistryState {
    resolved: HashMap<String, String>,
    environment: HashMap<String, String>,
    ensured: HashSet<String>,
}

pub struct SecretRegistry<S = DotenvFile> {
    store: S,
    policy: CachePolicy,
    owner_pid: u32,
    state: Mutex<RegistryState>,
}

impl SecretRegistry<DotenvFile> {
    pub fn new(env_file: impl Into<PathBuf>) -> Self {
        Self::with_store(DotenvFile::new(env_file))
    }
}

impl<S: EnvStore> SecretRegistry<S> {
    pub fn with_store(store: S) -> Self {
        Self {
            store,
            policy: CachePolicy::default(),
            owner_pid: std::process::id(),
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Process id the registry was built in.
    pub fn owner_pid(&self) -> u32 {
        self.owner_pid
    }

    /// Cached value for `key`, if it was resolved in this process.
    pub fn cached(&self, key: &str) -> Option<String> {
        self.lock().resolved.get(key).cloned()
    }

    /// Resolves `key`, calling `generator` only when nothing usable exists or
    /// `force_update` is set. `hidden` redacts the value in logs.
    pub fn resolve<G>(&self, key: &str, generator: G, hidden: bool, force_update: bool) -> String
    where
        G: FnOnce() -> String,
    {
        let mut state = self.lock();
        if !force_update {
            if let Some(value) = state.resolved.get(key) {
                return value.clone();
            }
        }

        debug!(key, "resolving bootstrap secret");
        self.reload(&mut state);
        let existing = lookup(&state, key);

        let value = if force_update || existing.is_empty() {
            let generated = generator();
            match self.store.set_key(key, &generated) {
                Ok(()) => debug!(key, store = %self.store.describe(), "generated secret and wrote it to the env file"),
                Err(e) => error!(key, error = %e, "generated secret could not be persisted"),
            }
            match self.policy {
                CachePolicy::Environment => {
                    if existing.is_empty() {
                        warn!(key, "secret was generated but the environment view is still empty; caching the empty value");
                    }
                    existing
                }
                CachePolicy::Generated => {
                    state.environment.insert(key.to_owned(), generated.clone());
                    generated
                }
            }
        } else {
            if hidden {
                debug!(key, value = %Redacted::new(&existing), "secret already present, skipping");
            } else {
                debug!(key, value = %existing, "secret already present, skipping");
            }
            existing
        };

        state.resolved.insert(key.to_owned(), value.clone());
        value
    }

    /// Runs `generator` unless a generator with the same identity already ran
    /// in this process. Returns whether generation happened on this call.
    pub fn ensure_file(&self, generator: &dyn FileGenerator) -> bool {
        let identity = generator.identity();
        let mut state = self.lock();
        if !state.ensured.insert(identity.clone()) {
            debug!(generator = %identity, "file generator already ran, skipping");
            return false;
        }
        let generated = generator.generate();
        if generated {
            debug!(generator = %identity, "file generator produced new files");
        }
        generated
    }

    fn reload(&self, state: &mut RegistryState) {
        match self.store.load() {
            Ok(entries) => {
                for (key, value) in entries {
                    state.environment.entry(key).or_insert(value);
                }
            }
            Err(e) => warn!(store = %self.store.describe(), error = %e, "env file reload failed"),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lookup(state: &RegistryState, key: &str) -> String {
    std::env::var(key)
        .ok()
        .or_else(|| state.environment.get(key).cloned())
        .unwrap_or_default()
        .trim()
        .to_owned()
}

/// Stale once the process has forked: a child must rebuild the registry
/// rather than share cached state with its parent.
impl<S> HealthCheck for SecretRegistry<S> {
    fn is_healthy(&self) -> bool {
        self.owner_pid == std::process::id()
    }
}
