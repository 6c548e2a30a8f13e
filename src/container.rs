//! License Container Codec & Verifier
//!
//! A container is the portable form of an issued license: the encrypted
//! payload, the signature over its ciphertext and the certificate chain that
//! anchors the signer at the product root. On the wire it is a fixed-order
//! stream of armored blocks:
//!
//! 1. `LITHIUM LICENSE KEY` holds the wrapped symmetric key
//! 2. `LITHIUM LICENSE` holds the payload ciphertext, with `algorithm` and
//!    `iv` headers
//! 3. `LITHIUM SIGNATURE` holds the bundle signature, with an `algorithm`
//!    header
//! 4. one `LITHIUM CERTIFICATE` block per chain entry, root first
//!
//! The signature covers the ciphertext rather than the cleartext license:
//! any party can verify a bundle without the ability to decrypt it, and the
//! wrapped key is bound indirectly. Mutating the payload after signing
//! invalidates the container.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use openssl::error::ErrorStack;
use openssl::pkey::{Id, PKeyRef, Private, Public};
use openssl::rsa::Padding;
use openssl::sign::{RsaPssSaltlen, Signer, Verifier};
use openssl::x509::{X509Ref, X509};
use serde::Serialize;

use crate::armor::{self, Block};
use crate::data::Data;
use crate::errors::{LicenseError, Result};
use crate::hashes::hash_by_name;
use crate::payload::EncryptedPayload;

/// Label armouring the license encryption key.
pub const LICENSE_KEY_LABEL: &str = "LITHIUM LICENSE KEY";

/// Label armouring the encrypted license data.
pub const LICENSE_LABEL: &str = "LITHIUM LICENSE";

/// Label armouring the license data's signature.
pub const SIGNATURE_LABEL: &str = "LITHIUM SIGNATURE";

/// Label armouring the public certificates of the issuing chain.
pub const CERTIFICATE_LABEL: &str = "LITHIUM CERTIFICATE";

const ALGORITHM_HEADER: &str = "algorithm";
const IV_HEADER: &str = "iv";
const DEFAULT_SIGNATURE_ALGORITHM: &str = "sha256";

/// The signature of a bundle of data.
#[derive(Debug, Clone)]
pub struct Signature {
    pub data: Vec<u8>,
    pub algorithm: String,
}

/// A license container: encrypted payload, signature and the certificate
/// chain which issued it, ordered root first.
#[derive(Debug, Default)]
pub struct Container {
    pub payload: EncryptedPayload,
    pub signature: Option<Signature>,
    pub certificates: Vec<X509>,
}

impl Container {
    /// Encode this container into its wire format.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = String::new();

        out.push_str(&armor::encode(&Block::new(
            LICENSE_KEY_LABEL,
            self.payload.key.clone(),
        )));

        out.push_str(&armor::encode(
            &Block::new(LICENSE_LABEL, self.payload.data.clone())
                .with_header(ALGORITHM_HEADER, self.payload.algorithm.clone())
                .with_header(IV_HEADER, BASE64.encode(&self.payload.iv)),
        ));

        let signature = self.signature.as_ref().ok_or(LicenseError::MissingSignature)?;
        if signature.algorithm.is_empty() {
            return Err(LicenseError::MissingSignatureAlgorithm);
        }

        out.push_str(&armor::encode(
            &Block::new(SIGNATURE_LABEL, signature.data.clone())
                .with_header(ALGORITHM_HEADER, signature.algorithm.clone()),
        ));

        for certificate in &self.certificates {
            out.push_str(&armor::encode(&Block::new(
                CERTIFICATE_LABEL,
                certificate.to_der()?,
            )));
        }

        Ok(out.into_bytes())
    }

    /// Parse a license file into its structured representation.
    ///
    /// Blocks with unknown labels are skipped; repeated single-instance
    /// blocks overwrite earlier occurrences; certificates accumulate in
    /// encounter order.
    pub fn parse(data: &[u8]) -> Result<Container> {
        let mut container = Container::default();
        let mut rest = data;

        while let Some((block, remaining)) = armor::decode(rest)? {
            rest = remaining;

            match block.label.as_str() {
                LICENSE_KEY_LABEL => container.payload.key = block.bytes,

                LICENSE_LABEL => {
                    container.payload.algorithm = block
                        .headers
                        .get(ALGORITHM_HEADER)
                        .cloned()
                        .unwrap_or_default();

                    let iv = block.headers.get(IV_HEADER).map(String::as_str).unwrap_or("");
                    container.payload.iv = BASE64.decode(iv).map_err(|_| {
                        LicenseError::MalformedContainer(
                            "license block carried an invalid iv header".to_string(),
                        )
                    })?;

                    container.payload.data = block.bytes;
                }

                SIGNATURE_LABEL => {
                    let algorithm = block
                        .headers
                        .get(ALGORITHM_HEADER)
                        .cloned()
                        .unwrap_or_else(|| DEFAULT_SIGNATURE_ALGORITHM.to_string());

                    container.signature = Some(Signature {
                        data: block.bytes,
                        algorithm,
                    });
                }

                CERTIFICATE_LABEL => {
                    let certificate = X509::from_der(&block.bytes).map_err(|err| {
                        LicenseError::MalformedContainer(format!(
                            "certificate block could not be parsed: {}",
                            err
                        ))
                    })?;
                    container.certificates.push(certificate);
                }

                _ => {}
            }
        }

        if container.signature.is_none() {
            return Err(LicenseError::MissingSignature);
        }

        Ok(container)
    }

    /// Set the license data for this container, encrypting it against the
    /// intended recipient's public key. The container must still be signed
    /// before it can be encoded.
    pub fn set_license<T: Serialize>(
        &mut self,
        data: &T,
        public_key: &PKeyRef<Public>,
    ) -> Result<()> {
        self.payload.encrypt(data, public_key)
    }

    /// Extract and decode the license data from this container, verifying
    /// the certificate chain and signature against the pinned root first.
    pub fn license(
        &self,
        private_key: &PKeyRef<Private>,
        root_certificate: &X509Ref,
    ) -> Result<Data> {
        self.verify(root_certificate)?;
        self.payload.decrypt(private_key)
    }

    /// Populate the signature for the license data currently held by this
    /// container.
    ///
    /// The signature is an RSASSA-PSS signature over the payload ciphertext;
    /// the algorithm name selects the digest and is stored lower-cased.
    pub fn sign(&mut self, private_key: &PKeyRef<Private>, algorithm: &str) -> Result<()> {
        let digest = hash_by_name(algorithm)?;

        let signature = (|| -> Result<Vec<u8>, ErrorStack> {
            let mut signer = Signer::new(digest, private_key)?;
            signer.set_rsa_padding(Padding::PKCS1_PSS)?;
            signer.set_rsa_pss_saltlen(RsaPssSaltlen::MAXIMUM_LENGTH)?;
            signer.update(&self.payload.data)?;
            signer.sign_to_vec()
        })()?;

        self.signature = Some(Signature {
            data: signature,
            algorithm: algorithm.to_lowercase(),
        });

        Ok(())
    }

    /// Determine whether this container is valid by checking its certificate
    /// chain against the pinned root and verifying the signature of its
    /// payload under the leaf certificate.
    ///
    /// Certificate validity windows are not enforced here; the license's
    /// own activation window is checked by [`Data::validate`] after
    /// decryption.
    pub fn verify(&self, root_certificate: &X509Ref) -> Result<()> {
        let root = self.certificates.first().ok_or(LicenseError::EmptyChain)?;
        if root.to_der()? != root_certificate.to_der()? {
            return Err(LicenseError::RootMismatch);
        }

        for pair in self.certificates.windows(2) {
            let issuer_key = pair[0]
                .public_key()
                .map_err(|err| LicenseError::ChainBroken(err.to_string()))?;
            match pair[1].verify(&issuer_key) {
                Ok(true) => {}
                Ok(false) => {
                    return Err(LicenseError::ChainBroken(
                        "certificate was not signed by its predecessor".to_string(),
                    ))
                }
                Err(err) => return Err(LicenseError::ChainBroken(err.to_string())),
            }
        }

        let signature = self.signature.as_ref().ok_or(LicenseError::MissingSignature)?;
        let digest = hash_by_name(&signature.algorithm)?;

        let leaf = self.certificates.last().ok_or(LicenseError::EmptyChain)?;
        let leaf_key = leaf.public_key()?;
        if leaf_key.id() != Id::RSA {
            return Err(LicenseError::UnsupportedLeafKey);
        }

        let valid = (|| -> Result<bool, ErrorStack> {
            let mut verifier = Verifier::new(digest, &leaf_key)?;
            verifier.set_rsa_padding(Padding::PKCS1_PSS)?;
            verifier.set_rsa_pss_saltlen(RsaPssSaltlen::MAXIMUM_LENGTH)?;
            verifier.update(&self.payload.data)?;
            verifier.verify(&signature.data)
        })()
        .unwrap_or(false);

        if !valid {
            return Err(LicenseError::SignatureMismatch);
        }

        Ok(())
    }

    /// Convenience wrapper around [`Container::verify`].
    pub fn is_valid(&self, root_certificate: &X509Ref) -> bool {
        self.verify(root_certificate).is_ok()
    }
}
