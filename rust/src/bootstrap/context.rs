//! Everything a principal needs to take part in the envelope protocol, built
//! once at process start and passed by reference afterwards.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use zeroize::Zeroize;

use super::keys::{KeyError, KeyPair, KeyPairProvisioner};
use super::process::{CommandRunner, SystemCommandRunner};
use super::redact::Redacted;
use super::registry::{generate_secret_key, CachePolicy, SecretRegistry};
use super::singleton::SingletonRegistry;
use crate::config::{Config, ConfigError};
use crate::crypto::envelope::{self, EnvelopeError};
use crate::crypto::{CryptoError, Envelope, Payload, RsaCipher, SymmetricSecret};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Keys(#[from] KeyError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("secret registry in this process is bound to {active} ({active_policy:?}), not {requested} ({requested_policy:?})")]
    RegistryConflict {
        active: PathBuf,
        active_policy: CachePolicy,
        requested: PathBuf,
        requested_policy: CachePolicy,
    },
}

pub struct BootstrapContext {
    registry: Arc<SecretRegistry>,
    secret_key: String,
    aes_secret: SymmetricSecret,
    keys: KeyPair,
    provisioned: bool,
}

impl BootstrapContext {
    /// Bootstraps with the real openssl runner and the process-wide singleton
    /// registry.
    pub fn from_config(config: &Config) -> Result<Self, BootstrapError> {
        Self::initialize(
            config,
            SystemCommandRunner::new(config.command_timeout),
            SingletonRegistry::global(),
        )
    }

    /// Resolves the master secret and makes sure the key pair exists, then
    /// loads it. The secret registry is shared through `singletons`, so a
    /// second context in the same process reuses the first registry's cache;
    /// a config naming another env file or cache policy is refused before
    /// anything is read or written.
    pub fn initialize<R: CommandRunner>(
        config: &Config,
        runner: R,
        singletons: &SingletonRegistry,
    ) -> Result<Self, BootstrapError> {
        config.prepare_dirs()?;
        let registry = singletons
            .get_or_create_checked(|| SecretRegistry::new(&config.env_file).with_policy(config.cache_policy));
        if registry.store().path() != config.env_file.as_path() || registry.policy() != config.cache_policy {
            return Err(BootstrapError::RegistryConflict {
                active: registry.store().path().to_path_buf(),
                active_policy: registry.policy(),
                requested: config.env_file.clone(),
                requested_policy: config.cache_policy,
            });
        }

        let secret_key = registry.resolve(&config.secret_key_name, generate_secret_key, true, false);
        if secret_key.is_empty() {
            warn!(key = %config.secret_key_name, "master secret resolved empty; AES key falls back to padding only");
        }
        let aes_secret = SymmetricSecret::from_source(&secret_key);

        let provisioner = KeyPairProvisioner::from_config(config, runner);
        let provisioned = registry.ensure_file(&provisioner);
        let keys = KeyPair::load(&config.private_key_file, &config.public_key_file)?;
        info!(
            fingerprint = %keys.fingerprint()?,
            bits = keys.private_cipher().bits(),
            secret = %Redacted::new(&secret_key),
            provisioned,
            "bootstrap complete"
        );

        Ok(Self {
            registry,
            secret_key,
            aes_secret,
            keys,
            provisioned,
        })
    }

    pub fn registry(&self) -> &SecretRegistry {
        &self.registry
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    /// AES key derived from the master secret.
    pub fn aes_secret(&self) -> &SymmetricSecret {
        &self.aes_secret
    }

    pub fn keys(&self) -> &KeyPair {
        &self.keys
    }

    /// Whether this context's initialization ran the key provisioner.
    pub fn provisioned(&self) -> bool {
        self.provisioned
    }

    /// Seals `payload` for `recipient_public` under a fresh session secret.
    pub fn seal(&self, payload: &Payload, recipient_public: &RsaCipher) -> Result<Envelope, EnvelopeError> {
        let session_secret = SymmetricSecret::generate();
        envelope::seal(payload, &session_secret, self.keys.private_cipher(), recipient_public)
    }

    /// Opens an envelope addressed to this principal. Anything that fails to
    /// open or verify comes back empty.
    pub fn open(&self, envelope: &Value, sender_public: &RsaCipher) -> Payload {
        envelope::open_and_verify(envelope, self.keys.private_cipher(), sender_public)
    }
}

impl Drop for BootstrapContext {
    fn drop(&mut self) {
        self.secret_key.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::BootstrapContext;
    use crate::bootstrap::process::{CommandOutput, CommandRunner, ProcessError};
    use crate::bootstrap::registry::CachePolicy;
    use crate::bootstrap::singleton::SingletonRegistry;
    use crate::config::Config;
    use crate::crypto::RsaCipher;
    use serde_json::json;
    use std::ffi::OsString;
    use std::fs;
    use tempfile::tempdir;

    const PRIVATE_PEM: &str = include_str!("../../tests/fixtures/sender_private.pem");
    const PUBLIC_PEM: &str = include_str!("../../tests/fixtures/sender_public.pem");

    struct NoTool;

    impl CommandRunner for NoTool {
        fn run(&self, program: &str, _args: &[OsString]) -> Result<CommandOutput, ProcessError> {
            panic!("{program} must not run when both key files exist");
        }
    }

    fn config_with_keys(secret_name: &str) -> (tempfile::TempDir, Config) {
        let dir = tempdir().unwrap();
        let mut config = Config::rooted_at(dir.path());
        config.secret_key_name = secret_name.to_owned();
        config.prepare_dirs().unwrap();
        fs::write(&config.private_key_file, PRIVATE_PEM).unwrap();
        fs::write(&config.public_key_file, PUBLIC_PEM).unwrap();
        (dir, config)
    }

    #[test]
    fn uses_existing_keys_and_secret() {
        let (_dir, config) = config_with_keys("HUNTER_TEST_CTX_EXISTING");
        fs::write(&config.env_file, "HUNTER_TEST_CTX_EXISTING='master-secret'\n").unwrap();

        let context = BootstrapContext::initialize(&config, NoTool, &SingletonRegistry::new()).unwrap();
        assert_eq!(context.secret_key(), "master-secret");
        assert_eq!(context.aes_secret().as_bytes(), format!("{:<32}", "master-secret").as_bytes());
        assert!(!context.provisioned());
        assert_eq!(context.keys().public_pem(), PUBLIC_PEM);
    }

    #[test]
    fn seals_for_itself_and_opens() {
        let (_dir, config) = config_with_keys("HUNTER_TEST_CTX_SEAL");
        let context = BootstrapContext::initialize(&config, NoTool, &SingletonRegistry::new()).unwrap();
        let own_public = RsaCipher::from_pem(PUBLIC_PEM).unwrap();

        let payload = json!({"action": "ping", "ts": 1700000000});
        let payload = payload.as_object().unwrap();
        let sealed = context.seal(payload, &own_public).unwrap();
        assert_eq!(&context.open(&sealed.to_value(), &own_public), payload);
        assert!(context.open(&json!({"crypto_data": "x"}), &own_public).is_empty());
    }

    #[test]
    fn refuses_a_second_env_file_in_one_process() {
        let (_first_dir, first) = config_with_keys("HUNTER_TEST_CTX_FIRST");
        let (_second_dir, second) = config_with_keys("HUNTER_TEST_CTX_SECOND");
        fs::write(&second.env_file, "HUNTER_TEST_CTX_SECOND='secret-b'\n").unwrap();
        let singletons = SingletonRegistry::new();

        BootstrapContext::initialize(&first, NoTool, &singletons).unwrap();
        let first_env = fs::read_to_string(&first.env_file).unwrap();
        let result = BootstrapContext::initialize(&second, NoTool, &singletons);
        assert!(matches!(
            result,
            Err(super::BootstrapError::RegistryConflict { ref active, ref requested, .. })
                if *active == first.env_file && *requested == second.env_file
        ));
        assert_eq!(fs::read_to_string(&first.env_file).unwrap(), first_env);
        assert!(!first_env.contains("HUNTER_TEST_CTX_SECOND"));

        let again = BootstrapContext::initialize(&first, NoTool, &singletons).unwrap();
        assert_eq!(again.secret_key(), "");
    }

    #[test]
    fn refuses_a_different_cache_policy_in_one_process() {
        let (_dir, config) = config_with_keys("HUNTER_TEST_CTX_POLICY");
        let singletons = SingletonRegistry::new();
        BootstrapContext::initialize(&config, NoTool, &singletons).unwrap();

        let mut generated = config.clone();
        generated.cache_policy = CachePolicy::Generated;
        let result = BootstrapContext::initialize(&generated, NoTool, &singletons);
        assert!(matches!(result, Err(super::BootstrapError::RegistryConflict { .. })));
    }

    #[test]
    fn missing_keys_surface_as_errors() {
        let dir = tempdir().unwrap();
        let mut config = Config::rooted_at(dir.path());
        config.secret_key_name = "HUNTER_TEST_CTX_MISSING".to_owned();
        config.openssl_bin = "definitely-not-openssl-hunter".to_owned();
        let result = BootstrapContext::from_config(&config);
        assert!(matches!(result, Err(super::BootstrapError::Keys(_))));
    }
}
