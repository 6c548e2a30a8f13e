//! Machine Key Manager
//!
//! Every machine participating in the license protocol holds an RSA key pair.
//! The public half identifies the machine to upstream issuers, who encrypt
//! license payloads against it; the private half decrypts received licenses
//! and signs any sub-licenses the machine is authorized to mint.
//!
//! The pair is materialized lazily on first access and persisted under the
//! machine directory:
//!
//! - `machine`: the PKCS#1 private key inside an encrypted
//!   `LITHIUM PRIVATE KEY` armored block, protected by the caller-supplied
//!   machine code
//! - `machine.pub`: the SPKI public key inside a cleartext
//!   `LITHIUM PUBLIC KEY` armored block
//!
//! A single manager serializes its own operations; pointing two concurrent
//! processes at the same directory is a user error and leaves the on-disk
//! state undefined.

use std::fs;
use std::path::{Path, PathBuf};

use openssl::pkey::{PKey, Private, Public};
use openssl::rsa::Rsa;
use tracing::debug;

use crate::armor;
use crate::errors::{LicenseError, Result};

/// Label armouring the machine's private key.
pub const PRIVATE_KEY_LABEL: &str = "LITHIUM PRIVATE KEY";

/// Label armouring the machine's public key.
pub const PUBLIC_KEY_LABEL: &str = "LITHIUM PUBLIC KEY";

/// Default size of the RSA key used for license encryption and decryption.
/// 2048 is secure enough for general use; reduce to 1024 or raise to 4096 to
/// trade generation speed against security margin.
pub const DEFAULT_KEY_SIZE: u32 = 2048;

const DEFAULT_PRIVATE_KEY_NAME: &str = "machine";
const DEFAULT_PUBLIC_KEY_NAME: &str = "machine.pub";

/// Access to the local machine's key pair.
///
/// The machine code provided at construction encrypts the private key at
/// rest; losing it invalidates every license issued to this machine.
pub struct KeyManager {
    machine_code: Vec<u8>,
    path: PathBuf,
    key_size: u32,
    private_key_name: String,
    public_key_name: String,
}

impl KeyManager {
    /// Create a manager for the default machine directory (`$HOME/.lithium`).
    pub fn new(machine_code: impl Into<Vec<u8>>) -> Self {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        KeyManager {
            machine_code: machine_code.into(),
            path: home.join(".lithium"),
            key_size: DEFAULT_KEY_SIZE,
            private_key_name: DEFAULT_PRIVATE_KEY_NAME.to_string(),
            public_key_name: DEFAULT_PUBLIC_KEY_NAME.to_string(),
        }
    }

    /// Override the directory the key pair is stored in.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Override the RSA modulus size used when generating a new pair.
    pub fn with_key_size(mut self, key_size: u32) -> Self {
        self.key_size = key_size;
        self
    }

    /// Override the key file names, enabling side-by-side installations with
    /// different keys. This is usually not necessary.
    pub fn with_key_names(
        mut self,
        private_key_name: impl Into<String>,
        public_key_name: impl Into<String>,
    ) -> Self {
        self.private_key_name = private_key_name.into();
        self.public_key_name = public_key_name.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Retrieve the public key for the local machine, generating the key pair
    /// first if none exists. Upstream servers use this key to identify the
    /// machine and encrypt license keys for it.
    pub fn public_key(&self) -> Result<PKey<Public>> {
        self.ensure_keypair()?;

        let data = fs::read(self.key_file_path(&self.public_key_name))?;
        let (block, _) = armor::decode(&data)?.ok_or(LicenseError::KeyFileCorrupt)?;

        if block.label != PUBLIC_KEY_LABEL {
            return Err(LicenseError::KeyFileWrongLabel);
        }

        let key =
            PKey::public_key_from_der(&block.bytes).map_err(|_| LicenseError::KeyFileCorrupt)?;
        if key.rsa().is_err() {
            return Err(LicenseError::KeyTypeUnsupported);
        }

        Ok(key)
    }

    /// Retrieve the private key for the local machine, generating the key
    /// pair first if none exists. This key decrypts license packs and signs
    /// child license files for later verification.
    pub fn private_key(&self) -> Result<PKey<Private>> {
        self.ensure_keypair()?;

        let data = fs::read(self.key_file_path(&self.private_key_name))?;
        let (block, _) = armor::decode(&data)?.ok_or(LicenseError::KeyFileCorrupt)?;

        if block.label != PRIVATE_KEY_LABEL {
            return Err(LicenseError::KeyFileWrongLabel);
        }

        if !armor::is_encrypted(&block) {
            return Err(LicenseError::KeyFileNotEncrypted);
        }

        let der = armor::decrypt_block(&block, &self.machine_code)?;

        // Padding can (rarely) verify under the wrong machine code, in which
        // case the recovered bytes are not a parsable key.
        let rsa = Rsa::private_key_from_der(&der).map_err(|_| LicenseError::PassphraseMismatch)?;
        Ok(PKey::from_rsa(rsa)?)
    }

    /// Generate a new key pair for this machine, replacing the existing pair
    /// and invalidating any licenses which were created for it.
    pub fn reset(&self) -> Result<()> {
        self.create_keypair()
    }

    fn ensure_keypair(&self) -> Result<()> {
        if !self.key_file_path(&self.private_key_name).exists()
            || !self.key_file_path(&self.public_key_name).exists()
        {
            return self.create_keypair();
        }

        Ok(())
    }

    fn create_keypair(&self) -> Result<()> {
        debug!(bits = self.key_size, "generating machine key pair");

        let rsa = Rsa::generate(self.key_size)?;
        let private_der = rsa.private_key_to_der()?;
        let key = PKey::from_rsa(rsa)?;
        let public_der = key.public_key_to_der()?;

        fs::create_dir_all(&self.path)?;

        let private_block =
            armor::encrypt_block(PRIVATE_KEY_LABEL, &private_der, &self.machine_code)?;
        fs::write(
            self.key_file_path(&self.private_key_name),
            armor::encode(&private_block),
        )?;

        let public_block = armor::Block::new(PUBLIC_KEY_LABEL, public_der);
        fs::write(
            self.key_file_path(&self.public_key_name),
            armor::encode(&public_block),
        )?;

        Ok(())
    }

    fn key_file_path(&self, file: &str) -> PathBuf {
        self.path.join(file)
    }
}
