//! Lithium: a hierarchical, offline-verifiable license protocol.
//!
//! Lithium issues and verifies software licenses without any online
//! activation step. A product vendor operates a self-signed root authority
//! which mints license containers binding product entitlements to a target
//! machine's public key; licenses may themselves authorize the holder to
//! mint sub-licenses, producing a delegation chain anchored at the root.
//!
//! ```text
//! Product root (self-signed, pinned by the consumer)
//!   └── Distributor license (carries a pack, certificate is a CA)
//!       └── Machine license (leaf, bound to one machine's key)
//! ```
//!
//! # Issuing
//!
//! The issuing side prepares a constrained certificate from the downstream
//! machine's CSR, signs it with the locally held certificate, encrypts the
//! license data against the machine's public key and serializes everything
//! into an armored container:
//!
//! ```rust,no_run
//! use lithium::{CertManager, Data, KeyManager, Product};
//!
//! # fn example(csr: &openssl::x509::X509ReqRef, license: &Data) -> lithium::Result<()> {
//! let keys = KeyManager::new(b"machine code".to_vec());
//! let certs = CertManager::new(Product::new("app", "My App", "Example Corp"));
//!
//! let root_key = keys.private_key()?;
//! let root = certs.create_root(&root_key)?;
//! certs.store_local(&root)?;
//!
//! let template = certs.prepare(csr, license)?;
//! let certificate = certs.sign(Some(&template), &root_key)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Consuming
//!
//! The consumer parses the container, verifies the certificate chain against
//! its pinned root and the signature over the payload ciphertext, then
//! decrypts the license with its machine-bound private key:
//!
//! ```rust,no_run
//! use lithium::{Container, KeyManager};
//!
//! # fn example(raw: &[u8], root: &openssl::x509::X509) -> lithium::Result<()> {
//! let keys = KeyManager::new(b"machine code".to_vec());
//!
//! let container = Container::parse(raw)?;
//! let private_key = keys.private_key()?;
//! let license = container.license(&private_key, root)?;
//! license.validate()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Security model
//!
//! - The root certificate is identified by **pinning**: consumers compare it
//!   byte-for-byte against a shipped copy, never by inspecting its names.
//! - The container signature covers the payload **ciphertext**, so any party
//!   can verify a bundle without being able to decrypt it.
//! - The machine's private key is encrypted at rest under a caller-supplied
//!   machine code; resetting the pair invalidates previously issued licenses.

pub mod armor;
pub mod cert_manager;
pub mod container;
pub mod data;
pub mod errors;
pub mod hashes;
pub mod key_manager;
pub mod payload;
pub mod product;
pub mod validator;

pub use cert_manager::{build_csr, CertManager, CertificateTemplate};
pub use container::{Container, Signature};
pub use data::{Data, Metadata, Pack, Template};
pub use errors::{LicenseError, Result};
pub use key_manager::KeyManager;
pub use payload::EncryptedPayload;
pub use product::Product;
