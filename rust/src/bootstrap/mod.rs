//! One-time provisioning of the keys and secrets the envelope protocol needs.
//! Everything here runs at process start; nothing in this module sits on the
//! per-message path.

pub mod context;
pub mod env_file;
pub mod keys;
pub mod process;
pub mod redact;
pub mod registry;
pub mod singleton;

pub use context::{BootstrapContext, BootstrapError};
pub use keys::{KeyError, KeyImporter, KeyPair, KeyPairProvisioner, ProvisionReport, DEFAULT_RSA_BITS};
pub use process::{CommandOutput, CommandRunner, ProcessError, SystemCommandRunner};
pub use redact::Redacted;
pub use registry::{generate_secret_key, CachePolicy, FileGenerator, SecretRegistry};
pub use singleton::{HealthCheck, SingletonRegistry};
