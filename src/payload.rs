//! Hybrid Payload Codec
//!
//! License data is too large for direct RSA encryption, so payloads use a
//! hybrid construction: the JSON-encoded license is encrypted under a fresh
//! AES-256 key, and that key is wrapped with RSA-OAEP against the recipient
//! machine's public key. Only the holder of the matching private key can
//! unwrap the symmetric key and recover the license, and each container gets
//! a short-lived symmetric key of its own.

use openssl::encrypt::{Decrypter, Encrypter};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKeyRef, Private, Public};
use openssl::rand::rand_bytes;
use openssl::rsa::Padding;
use openssl::symm::{self, Cipher};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::{LicenseError, Result};

/// OAEP label binding wrapped keys to this protocol.
pub const ENCRYPTED_PAYLOAD_KEY_LABEL: &[u8] = b"Lithium Encrypted Payload Key";

/// Name of the only symmetric scheme this version of the protocol emits.
pub const SYMMETRIC_ALGORITHM: &str = "aes256";

const SYMMETRIC_KEY_SIZE: usize = 32;
const AES_BLOCK_SIZE: usize = 16;

/// An encrypted license definition.
///
/// `data` holds the AES-256-CFB ciphertext of the JSON-encoded license,
/// `key` the RSA-OAEP wrapped symmetric key and `iv` the cipher
/// initialization vector.
#[derive(Debug, Clone, Default)]
pub struct EncryptedPayload {
    pub data: Vec<u8>,
    pub key: Vec<u8>,
    pub iv: Vec<u8>,
    pub algorithm: String,
}

impl EncryptedPayload {
    /// Encrypt the provided data in a reversible manner.
    ///
    /// The data is serialized as JSON, encrypted with a cryptographically
    /// random key and initialization vector, and the key is wrapped using
    /// the recipient's public key. Only someone in possession of the
    /// corresponding private key can recover the contents.
    pub fn encrypt<T: Serialize>(
        &mut self,
        data: &T,
        public_key: &PKeyRef<Public>,
    ) -> Result<()> {
        let raw = serde_json::to_vec(data)?;

        let mut symmetric_key = [0u8; SYMMETRIC_KEY_SIZE];
        rand_bytes(&mut symmetric_key)?;

        let mut iv = [0u8; AES_BLOCK_SIZE];
        rand_bytes(&mut iv)?;

        let encrypted = symm::encrypt(Cipher::aes_256_cfb128(), &symmetric_key, Some(&iv), &raw)
            .map_err(|err| LicenseError::EncryptionFailure(err.to_string()))?;

        let wrapped_key = wrap_key(&symmetric_key, public_key)?;

        self.algorithm = SYMMETRIC_ALGORITHM.to_string();
        self.data = encrypted;
        self.iv = iv.to_vec();
        self.key = wrapped_key;
        Ok(())
    }

    /// Transform an encrypted payload back into structured data.
    ///
    /// The provided private key must match the public key the symmetric key
    /// was wrapped against.
    pub fn decrypt<T: DeserializeOwned>(&self, private_key: &PKeyRef<Private>) -> Result<T> {
        if self.algorithm != SYMMETRIC_ALGORITHM {
            return Err(LicenseError::UnsupportedAlgorithm(
                "unsupported encryption algorithm type, expected aes256".to_string(),
            ));
        }

        let symmetric_key = unwrap_key(&self.key, private_key)?;

        let raw = symm::decrypt(Cipher::aes_256_cfb128(), &symmetric_key, Some(&self.iv), &self.data)
            .map_err(|err| LicenseError::DecryptionFailure(err.to_string()))?;

        Ok(serde_json::from_slice(&raw)?)
    }
}

fn wrap_key(symmetric_key: &[u8], public_key: &PKeyRef<Public>) -> Result<Vec<u8>> {
    (|| -> Result<Vec<u8>, ErrorStack> {
        let mut encrypter = Encrypter::new(public_key)?;
        encrypter.set_rsa_padding(Padding::PKCS1_OAEP)?;
        encrypter.set_rsa_oaep_md(MessageDigest::sha256())?;
        encrypter.set_rsa_mgf1_md(MessageDigest::sha256())?;
        encrypter.set_rsa_oaep_label(ENCRYPTED_PAYLOAD_KEY_LABEL)?;

        let mut wrapped = vec![0; encrypter.encrypt_len(symmetric_key)?];
        let written = encrypter.encrypt(symmetric_key, &mut wrapped)?;
        wrapped.truncate(written);
        Ok(wrapped)
    })()
    .map_err(|err| LicenseError::EncryptionFailure(err.to_string()))
}

fn unwrap_key(wrapped_key: &[u8], private_key: &PKeyRef<Private>) -> Result<Vec<u8>> {
    (|| -> Result<Vec<u8>, ErrorStack> {
        let mut decrypter = Decrypter::new(private_key)?;
        decrypter.set_rsa_padding(Padding::PKCS1_OAEP)?;
        decrypter.set_rsa_oaep_md(MessageDigest::sha256())?;
        decrypter.set_rsa_mgf1_md(MessageDigest::sha256())?;
        decrypter.set_rsa_oaep_label(ENCRYPTED_PAYLOAD_KEY_LABEL)?;

        let mut unwrapped = vec![0; decrypter.decrypt_len(wrapped_key)?];
        let written = decrypter.decrypt(wrapped_key, &mut unwrapped)?;
        unwrapped.truncate(written);
        Ok(unwrapped)
    })()
    .map_err(|err| LicenseError::DecryptionFailure(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Data, Metadata};
    use chrono::Utc;
    use openssl::pkey::PKey;
    use openssl::rsa::Rsa;
    use serde_json::{json, Map};

    fn test_keypair() -> (PKey<Private>, PKey<Public>) {
        let private = PKey::from_rsa(Rsa::generate(1024).unwrap()).unwrap();
        let public = PKey::public_key_from_der(&private.public_key_to_der().unwrap()).unwrap();
        (private, public)
    }

    fn test_license() -> Data {
        let mut payload = Map::new();
        payload.insert("x".to_string(), json!(1));

        Data {
            meta: Some(Metadata {
                id: "0".to_string(),
                activates: Utc::now(),
                expires: Utc::now(),
                pack: None,
            }),
            payload: Some(payload),
        }
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let (private, public) = test_keypair();
        let license = test_license();

        let mut payload = EncryptedPayload::default();
        payload.encrypt(&license, &public).unwrap();

        assert_eq!(payload.algorithm, "aes256");
        assert_eq!(payload.iv.len(), AES_BLOCK_SIZE);
        assert!(!payload.key.is_empty());

        // CFB is a stream mode, so ciphertext length matches cleartext length
        let cleartext = serde_json::to_vec(&license).unwrap();
        assert_eq!(payload.data.len(), cleartext.len());
        assert_ne!(payload.data, cleartext);

        let recovered: Data = payload.decrypt(&private).unwrap();
        assert_eq!(recovered, license);
    }

    #[test]
    fn test_decrypt_rejects_unknown_algorithm() {
        let (private, public) = test_keypair();

        let mut payload = EncryptedPayload::default();
        payload.encrypt(&test_license(), &public).unwrap();
        payload.algorithm = "des".to_string();

        let err = payload.decrypt::<Data>(&private).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unsupported encryption algorithm type, expected aes256"
        );
    }

    #[test]
    fn test_decrypt_with_wrong_key() {
        let (_, public) = test_keypair();
        let (other_private, _) = test_keypair();

        let mut payload = EncryptedPayload::default();
        payload.encrypt(&test_license(), &public).unwrap();

        assert!(matches!(
            payload.decrypt::<Data>(&other_private),
            Err(LicenseError::DecryptionFailure(_))
        ));
    }

    #[test]
    fn test_fresh_key_per_encryption() {
        let (_, public) = test_keypair();
        let license = test_license();

        let mut first = EncryptedPayload::default();
        first.encrypt(&license, &public).unwrap();

        let mut second = EncryptedPayload::default();
        second.encrypt(&license, &public).unwrap();

        assert_ne!(first.key, second.key);
        assert_ne!(first.iv, second.iv);
    }
}
