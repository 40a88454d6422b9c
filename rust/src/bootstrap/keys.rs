//! RSA key files: provisioning the internal pair through openssl, importing
//! an external principal's public key, and loading a pair for use.
//!
//! Generation is delegated entirely to the external tool. This module only
//! decides what is missing, runs the steps in order (private key first, then
//! the derived public key) and never repeats work that is already on disk.
//! Tool failures are logged, not raised; they surface when the pair is loaded.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error, info};

use super::process::{CommandRunner, SystemCommandRunner};
use super::registry::FileGenerator;
use crate::config::Config;
use crate::crypto::{CryptoError, RsaCipher};

pub const DEFAULT_RSA_BITS: u32 = 2048;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("key file {0} does not exist")]
    Missing(PathBuf),
    #[error("key file {path} unreadable: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("key file {path} unwritable: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("expected a public key, got private key material")]
    NotPublic,
    #[error("expected a private key in {0}")]
    NotPrivate(PathBuf),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Which steps a call to [`KeyPairProvisioner::ensure_key_pair`] attempted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    pub generated_private: bool,
    pub derived_public: bool,
}

impl ProvisionReport {
    pub fn touched(&self) -> bool {
        self.generated_private || self.derived_public
    }
}

/// Makes sure the internal key pair exists on disk.
pub struct KeyPairProvisioner<R = SystemCommandRunner> {
    private_key: PathBuf,
    public_key: PathBuf,
    bits: u32,
    openssl: String,
    runner: R,
}

impl<R: CommandRunner> KeyPairProvisioner<R> {
    pub fn new(private_key: impl Into<PathBuf>, public_key: impl Into<PathBuf>, runner: R) -> Self {
        Self {
            private_key: private_key.into(),
            public_key: public_key.into(),
            bits: DEFAULT_RSA_BITS,
            openssl: "openssl".to_owned(),
            runner,
        }
    }

    pub fn from_config(config: &Config, runner: R) -> Self {
        Self::new(&config.private_key_file, &config.public_key_file, runner)
            .with_bits(config.rsa_bits)
            .with_openssl(&config.openssl_bin)
    }

    pub fn with_bits(mut self, bits: u32) -> Self {
        self.bits = bits;
        self
    }

    pub fn with_openssl(mut self, program: impl Into<String>) -> Self {
        self.openssl = program.into();
        self
    }

    pub fn private_key_path(&self) -> &Path {
        &self.private_key
    }

    pub fn public_key_path(&self) -> &Path {
        &self.public_key
    }

    /// No-op when both files exist. A missing private key is generated and
    /// its public half derived; a missing public key alone is derived from
    /// the existing private key.
    pub fn ensure_key_pair(&self) -> ProvisionReport {
        let mut report = ProvisionReport::default();
        if !self.private_key.exists() {
            debug!(path = %self.private_key.display(), "private key missing, generating");
            self.generate_private();
            self.derive_public();
            report.generated_private = true;
            report.derived_public = true;
        } else if !self.public_key.exists() {
            debug!(path = %self.public_key.display(), "public key missing, deriving from private key");
            self.derive_public();
            report.derived_public = true;
        } else {
            debug!(private = %self.private_key.display(), public = %self.public_key.display(), "key pair already present");
        }
        if report.touched() {
            info!(
                private = %self.private_key.display(),
                public = %self.public_key.display(),
                generated_private = report.generated_private,
                "key pair provisioning finished"
            );
        }
        report
    }

    fn generate_private(&self) {
        self.invoke(vec![
            "genrsa".into(),
            "-out".into(),
            self.private_key.clone().into_os_string(),
            self.bits.to_string().into(),
        ]);
    }

    fn derive_public(&self) {
        self.invoke(vec![
            "rsa".into(),
            "-in".into(),
            self.private_key.clone().into_os_string(),
            "-pubout".into(),
            "-out".into(),
            self.public_key.clone().into_os_string(),
        ]);
    }

    fn invoke(&self, args: Vec<OsString>) {
        match self.runner.run(&self.openssl, &args) {
            Ok(output) if !output.success() => {
                error!(program = %self.openssl, status = ?output.status, "key tool exited unsuccessfully")
            }
            Ok(_) => {}
            Err(e) => error!(program = %self.openssl, error = %e, "key tool could not run"),
        }
    }
}

impl<R: CommandRunner> FileGenerator for KeyPairProvisioner<R> {
    fn identity(&self) -> String {
        format!("key-pair:{}:{}", self.private_key.display(), self.public_key.display())
    }

    fn generate(&self) -> bool {
        self.ensure_key_pair().touched()
    }
}

/// Stores the public key an external principal hands over.
#[derive(Debug, Clone)]
pub struct KeyImporter {
    public_key: PathBuf,
}

impl KeyImporter {
    pub fn new(public_key: impl Into<PathBuf>) -> Self {
        Self {
            public_key: public_key.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.public_key
    }

    /// Validates `content` as an RSA public key and writes it out verbatim.
    /// Private key material is refused so it never lands in a public path.
    pub fn import_public_key(&self, content: &str) -> Result<RsaCipher, KeyError> {
        let cipher = RsaCipher::from_pem(content)?;
        if cipher.is_private() {
            return Err(KeyError::NotPublic);
        }
        let write_error = |source| KeyError::Write {
            path: self.public_key.clone(),
            source,
        };
        if let Some(parent) = self.public_key.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
        fs::write(&self.public_key, content).map_err(write_error)?;
        debug!(path = %self.public_key.display(), "external public key saved");
        Ok(cipher)
    }
}

/// A loaded internal key pair.
pub struct KeyPair {
    private: RsaCipher,
    public: RsaCipher,
    public_pem: String,
}

impl KeyPair {
    pub fn load(private_key: &Path, public_key: &Path) -> Result<Self, KeyError> {
        let private_pem = read_key(private_key)?;
        let public_pem = read_key(public_key)?;
        let private = RsaCipher::from_pem(&private_pem)?;
        if !private.is_private() {
            return Err(KeyError::NotPrivate(private_key.to_path_buf()));
        }
        let public = RsaCipher::from_pem(&public_pem)?;
        Ok(Self {
            private,
            public,
            public_pem,
        })
    }

    pub fn private_cipher(&self) -> &RsaCipher {
        &self.private
    }

    pub fn public_cipher(&self) -> &RsaCipher {
        &self.public
    }

    /// PEM text to hand to external principals.
    pub fn public_pem(&self) -> &str {
        &self.public_pem
    }

    pub fn fingerprint(&self) -> Result<String, CryptoError> {
        self.public.fingerprint()
    }
}

/// Reads a PEM file, reporting a missing file distinctly.
pub fn read_key(path: &Path) -> Result<String, KeyError> {
    fs::read_to_string(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            KeyError::Missing(path.to_path_buf())
        } else {
            KeyError::Read {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::{KeyError, KeyImporter, KeyPair, KeyPairProvisioner};
    use crate::bootstrap::process::{CommandOutput, CommandRunner, ProcessError, SystemCommandRunner};
    use crate::bootstrap::registry::FileGenerator;
    use std::ffi::OsString;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::tempdir;

    const PRIVATE_PEM: &str = include_str!("../../tests/fixtures/sender_private.pem");
    const PUBLIC_PEM: &str = include_str!("../../tests/fixtures/sender_public.pem");

    /// Stands in for openssl: `genrsa -out P` writes the fixture private key,
    /// `rsa -in P -pubout -out Q` writes the fixture public key.
    #[derive(Default)]
    struct FakeOpenssl {
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl FakeOpenssl {
        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandRunner for FakeOpenssl {
        fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ProcessError> {
            let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
            let out = args.iter().position(|a| a == "-out").map(|i| PathBuf::from(&args[i + 1]));
            match (args[0].as_str(), out) {
                ("genrsa", Some(path)) => fs::write(path, PRIVATE_PEM).unwrap(),
                ("rsa", Some(path)) => fs::write(path, PUBLIC_PEM).unwrap(),
                _ => {}
            }
            let mut call = vec![program.to_owned()];
            call.extend(args);
            self.calls.lock().unwrap().push(call);
            Ok(CommandOutput {
                status: Some(0),
                ..CommandOutput::default()
            })
        }
    }

    #[test]
    fn generates_private_then_public() {
        let dir = tempdir().unwrap();
        let (private, public) = (dir.path().join("private.key"), dir.path().join("public.key"));
        let runner = FakeOpenssl::default();
        let provisioner = KeyPairProvisioner::new(&private, &public, &runner);

        let report = provisioner.ensure_key_pair();
        assert!(report.generated_private && report.derived_public);
        let calls = runner.calls();
        let private_arg = private.display().to_string();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], ["openssl", "genrsa", "-out", private_arg.as_str(), "2048"]);
        assert_eq!(calls[1][..4], ["openssl", "rsa", "-in", private_arg.as_str()]);
        assert!(KeyPair::load(&private, &public).is_ok());
    }

    #[test]
    fn existing_pair_needs_no_tool() {
        let dir = tempdir().unwrap();
        let (private, public) = (dir.path().join("private.key"), dir.path().join("public.key"));
        fs::write(&private, PRIVATE_PEM).unwrap();
        fs::write(&public, PUBLIC_PEM).unwrap();
        let runner = FakeOpenssl::default();

        let report = KeyPairProvisioner::new(&private, &public, &runner).ensure_key_pair();
        assert!(!report.touched());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn missing_public_key_is_derived_only() {
        let dir = tempdir().unwrap();
        let (private, public) = (dir.path().join("private.key"), dir.path().join("public.key"));
        fs::write(&private, PRIVATE_PEM).unwrap();
        let runner = FakeOpenssl::default();

        let provisioner = KeyPairProvisioner::new(&private, &public, &runner)
            .with_openssl("/usr/bin/openssl")
            .with_bits(4096);
        let report = provisioner.ensure_key_pair();
        assert!(!report.generated_private);
        assert!(report.derived_public);
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0][0], "/usr/bin/openssl");
        assert_eq!(calls[0][1], "rsa");
        assert!(public.exists());
    }

    #[test]
    fn generator_identity_names_both_paths() {
        let runner = FakeOpenssl::default();
        let provisioner = KeyPairProvisioner::new("/a/private.key", "/a/public.key", &runner);
        assert_eq!(provisioner.identity(), "key-pair:/a/private.key:/a/public.key");
    }

    #[test]
    fn failed_generation_surfaces_on_load() {
        let dir = tempdir().unwrap();
        let (private, public) = (dir.path().join("private.key"), dir.path().join("public.key"));
        let provisioner = KeyPairProvisioner::new(&private, &public, SystemCommandRunner::default())
            .with_openssl("definitely-not-openssl-hunter");
        assert!(provisioner.ensure_key_pair().touched());
        assert!(matches!(KeyPair::load(&private, &public), Err(KeyError::Missing(path)) if path == private));
    }

    #[test]
    fn imports_public_keys_only() {
        let dir = tempdir().unwrap();
        let importer = KeyImporter::new(dir.path().join("external").join("agent.pub"));
        importer.import_public_key(PUBLIC_PEM).expect("public key should import");
        assert_eq!(fs::read_to_string(importer.path()).unwrap(), PUBLIC_PEM);

        let refused = KeyImporter::new(dir.path().join("leak.pub"));
        assert!(matches!(refused.import_public_key(PRIVATE_PEM), Err(KeyError::NotPublic)));
        assert!(!dir.path().join("leak.pub").exists());
        assert!(matches!(refused.import_public_key("not a key"), Err(KeyError::Crypto(_))));
    }

    #[test]
    fn load_rejects_public_key_in_private_slot() {
        let dir = tempdir().unwrap();
        let (private, public) = (dir.path().join("private.key"), dir.path().join("public.key"));
        fs::write(&private, PUBLIC_PEM).unwrap();
        fs::write(&public, PUBLIC_PEM).unwrap();
        assert!(matches!(KeyPair::load(&private, &public), Err(KeyError::NotPrivate(_))));
    }
}
