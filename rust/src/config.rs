//! Configuration loader. Every field is optional; file locations default to a
//! layout rooted at a base directory so a bare deployment needs no config.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::bootstrap::CachePolicy;

pub const CONFIG_ENV_VAR: &str = "HUNTER_CONFIG";
pub const DEFAULT_SECRET_KEY_NAME: &str = "HUNTER_SECRET_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file unreadable: {0}")]
    Io(String),
    #[error("config parse failed: {0}")]
    Parse(String),
    #[error("cannot create directory {path}: {message}")]
    Prepare { path: PathBuf, message: String },
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    base_dir: Option<PathBuf>,
    env_file: Option<PathBuf>,
    private_key_file: Option<PathBuf>,
    public_key_file: Option<PathBuf>,
    secret_key_name: Option<String>,
    openssl_bin: Option<String>,
    rsa_bits: Option<u32>,
    command_timeout_secs: Option<u64>,
    cache_policy: Option<CachePolicy>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub base_dir: PathBuf,
    pub env_file: PathBuf,
    pub private_key_file: PathBuf,
    pub public_key_file: PathBuf,
    pub secret_key_name: String,
    pub openssl_bin: String,
    pub rsa_bits: u32,
    pub command_timeout: Duration,
    pub cache_policy: CachePolicy,
}

impl Config {
    /// Defaults rooted at `base_dir`.
    pub fn rooted_at(base_dir: impl Into<PathBuf>) -> Self {
        Self::resolve(RawConfig::default(), base_dir.into())
    }

    /// Reads a JSON config file. A relative or missing `base_dir` is taken
    /// relative to the directory holding the file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw_json = fs::read_to_string(path).map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        let raw: RawConfig = serde_json::from_str(&raw_json).map_err(|e| ConfigError::Parse(format!("{e}")))?;
        let anchor = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(Self::resolve(raw, anchor))
    }

    /// Uses the file named by `HUNTER_CONFIG`, or defaults rooted at the
    /// current directory.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) if !path.is_empty() => Self::load(PathBuf::from(path)),
            _ => {
                let cwd = std::env::current_dir().map_err(|e| ConfigError::Io(format!("current dir: {e}")))?;
                Ok(Self::rooted_at(cwd))
            }
        }
    }

    /// Creates the directories the key files and env file live in.
    pub fn prepare_dirs(&self) -> Result<(), ConfigError> {
        for file in [&self.private_key_file, &self.public_key_file, &self.env_file] {
            let Some(dir) = file.parent().filter(|p| !p.as_os_str().is_empty()) else {
                continue;
            };
            fs::create_dir_all(dir).map_err(|e| ConfigError::Prepare {
                path: dir.to_path_buf(),
                message: format!("{e}"),
            })?;
        }
        Ok(())
    }

    fn resolve(raw: RawConfig, anchor: PathBuf) -> Self {
        let base_dir = match raw.base_dir {
            Some(dir) => anchor.join(dir),
            None => anchor,
        };
        let under_base = |value: Option<PathBuf>, default: &str| base_dir.join(value.unwrap_or_else(|| PathBuf::from(default)));
        Self {
            env_file: under_base(raw.env_file, ".env"),
            private_key_file: under_base(raw.private_key_file, "vol/ssl/private.key"),
            public_key_file: under_base(raw.public_key_file, "vol/ssl/public.key"),
            secret_key_name: raw.secret_key_name.unwrap_or_else(|| DEFAULT_SECRET_KEY_NAME.to_owned()),
            openssl_bin: raw.openssl_bin.unwrap_or_else(|| "openssl".to_owned()),
            rsa_bits: raw.rsa_bits.unwrap_or(crate::bootstrap::DEFAULT_RSA_BITS),
            command_timeout: Duration::from_secs(raw.command_timeout_secs.unwrap_or(60)),
            cache_policy: raw.cache_policy.unwrap_or_default(),
            base_dir,
        }
    }
}
