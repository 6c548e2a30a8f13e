//! Certificate Authority
//!
//! Tracks the local node's signing certificate and derives constrained child
//! certificates from certificate signing requests.
//!
//! ```text
//! Product root (self-signed, pinned by consumers)
//!   └── Distributor certificate (pack holder, CA=true)
//!       └── Machine certificate (leaf, CA=false)
//! ```
//!
//! A child certificate's constraints are not chosen by the requester: the
//! authority rewrites the subject to the product identity, pins the validity
//! window to the license's activation window, and only marks the certificate
//! as a CA when the license actually delegates issuance rights through a
//! non-empty pack.

use std::fs;
use std::io;
use std::path::PathBuf;

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, PKeyRef, Private, Public};
use openssl::stack::Stack;
use openssl::x509::extension::{
    BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
};
use openssl::x509::{X509Extension, X509Name, X509NameRef, X509Req, X509ReqRef, X509};
use tracing::debug;

use crate::data::Data;
use crate::errors::{LicenseError, Result};
use crate::product::Product;

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2

/// Path length limit attached to every certificate in the hierarchy.
const MAX_PATH_LENGTH: u32 = 128;

/// Subject serial number carried by every product root certificate.
const ROOT_SUBJECT_SERIAL: &str = "Root Certificate";

/// Validity of a freshly minted root, in days. A sentinel rather than a
/// policy; consumers identify the root by pinning, not by its window.
const DEFAULT_ROOT_VALIDITY_DAYS: u32 = 100 * 365;

const AUTHORITY_COMMON_NAME: &str = "Sierra Softworks Lithium License Protocol";
const AUTHORITY_ORGANIZATION: &str = "Sierra Softworks";
const AUTHORITY_PROVINCE: &str = "Western Cape";
const AUTHORITY_COUNTRY: &str = "ZA";
const LICENSING_UNIT: &str = "Lithium Licensing";

/// An unsigned certificate prepared from a CSR and a license.
///
/// Produced by [`CertManager::prepare`] and consumed by [`CertManager::sign`];
/// templates are stateless and never persisted by the authority.
pub struct CertificateTemplate {
    subject: X509Name,
    requested_extensions: Stack<X509Extension>,
    public_key: PKey<Public>,
    not_before: Asn1Time,
    not_after: Asn1Time,
    is_ca: bool,
    can_sign_certificates: bool,
}

impl CertificateTemplate {
    /// The fully constrained subject this certificate will be issued with.
    pub fn subject(&self) -> &X509NameRef {
        &self.subject
    }

    /// Whether the issued certificate will be a certificate authority.
    pub fn is_ca(&self) -> bool {
        self.is_ca
    }

    /// Whether the issued certificate may sign further certificates.
    pub fn can_sign_certificates(&self) -> bool {
        self.can_sign_certificates
    }
}

/// Creates, signs and persists product certificates.
pub struct CertManager {
    path: PathBuf,
    product: Product,
    root_validity_days: u32,
}

impl CertManager {
    /// Create a certificate manager for a product, storing its local
    /// certificate under the default directory (`$HOME/.lithium`).
    pub fn new(product: Product) -> Self {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        CertManager {
            path: home.join(".lithium"),
            product,
            root_validity_days: DEFAULT_ROOT_VALIDITY_DAYS,
        }
    }

    /// Override the directory the local certificate is stored in.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Override the validity window of freshly minted root certificates.
    pub fn with_root_validity_days(mut self, days: u32) -> Self {
        self.root_validity_days = days;
        self
    }

    pub fn product(&self) -> &Product {
        &self.product
    }

    /// Create a new, self-signed, root certificate for this product.
    ///
    /// The subject names the product; the issuer is the fixed protocol
    /// authority identity, so the self-signed root's issuer is not equal to
    /// its subject. Consumers identify the root by byte equality against a
    /// pinned copy, never by inspecting its names.
    pub fn create_root(&self, private_key: &PKeyRef<Private>) -> Result<X509> {
        let rsa = private_key.rsa().map_err(|_| LicenseError::KeyInvalid)?;
        if !rsa.check_key()? {
            return Err(LicenseError::KeyInvalid);
        }

        debug!(product = %self.product.id, "creating self-signed root certificate");

        let mut subject = X509Name::builder()?;
        subject.append_entry_by_nid(
            Nid::COMMONNAME,
            &format!("{} ({})", self.product.name, self.product.id),
        )?;
        subject.append_entry_by_nid(Nid::SERIALNUMBER, ROOT_SUBJECT_SERIAL)?;
        subject.append_entry_by_nid(Nid::ORGANIZATIONNAME, &self.product.organization)?;
        subject.append_entry_by_nid(Nid::ORGANIZATIONALUNITNAME, LICENSING_UNIT)?;
        let subject = subject.build();

        let issuer = self.issuer()?;

        let mut builder = X509::builder()?;
        builder.set_version(X509_VERSION_3)?;

        let serial = BigNum::from_u32(1)?.to_asn1_integer()?;
        builder.set_serial_number(&serial)?;

        builder.set_subject_name(&subject)?;
        builder.set_issuer_name(&issuer)?;

        let not_before = Asn1Time::days_from_now(0)?;
        builder.set_not_before(&not_before)?;
        let not_after = Asn1Time::days_from_now(self.root_validity_days)?;
        builder.set_not_after(&not_after)?;

        builder.set_pubkey(private_key)?;

        let mut basic_constraints = BasicConstraints::new();
        basic_constraints.critical();
        basic_constraints.ca();
        basic_constraints.pathlen(MAX_PATH_LENGTH);
        builder.append_extension(basic_constraints.build()?)?;

        let mut key_usage = KeyUsage::new();
        key_usage.critical();
        key_usage.key_cert_sign();
        key_usage.crl_sign();
        key_usage.digital_signature();
        key_usage.data_encipherment();
        key_usage.key_encipherment();
        key_usage.non_repudiation();
        builder.append_extension(key_usage.build()?)?;

        let subject_alt_name = SubjectAlternativeName::new()
            .dns("localhost")
            .build(&builder.x509v3_context(None, None))?;
        builder.append_extension(subject_alt_name)?;

        let mut extended_key_usage = ExtendedKeyUsage::new();
        extended_key_usage.other("anyExtendedKeyUsage");
        builder.append_extension(extended_key_usage.build()?)?;

        builder.sign(private_key, MessageDigest::sha256())?;

        // Parse the built certificate back so callers receive exactly what a
        // consumer decoding the DER form will see
        X509::from_der(&builder.build().to_der()?)
            .map_err(|err| LicenseError::CertParseFailure(err.to_string()))
    }

    /// Update the stored local certificate to match the one provided.
    ///
    /// The certificate is written as raw DER, the historical on-disk form
    /// for product roots; it is not armored.
    pub fn store_local(&self, certificate: &X509) -> Result<()> {
        fs::create_dir_all(&self.path)?;
        fs::write(self.certificate_path(), certificate.to_der()?)?;
        Ok(())
    }

    /// Retrieve the certificate used to sign derivative licenses for this
    /// product. Absence of the stored certificate is not an error.
    pub fn load_local(&self) -> Result<Option<X509>> {
        let der = match fs::read(self.certificate_path()) {
            Ok(der) => der,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let certificate = X509::from_der(&der)
            .map_err(|err| LicenseError::CertParseFailure(err.to_string()))?;
        Ok(Some(certificate))
    }

    /// Prepare an unsigned certificate matching a specific license's
    /// constraints.
    ///
    /// Subject, requested extensions and public key come from the CSR; the
    /// validity window comes from the license metadata. The subject's common
    /// name, serial number, organization and organizational unit are
    /// overwritten with the authority's values, and the certificate is only
    /// marked as a CA when the license delegates issuance through a
    /// non-empty pack.
    pub fn prepare(&self, csr: &X509ReqRef, license: &Data) -> Result<CertificateTemplate> {
        let meta = license.meta.as_ref().ok_or(LicenseError::MetadataMissing)?;

        let subject = self.constrained_subject(csr.subject_name(), &meta.id)?;
        let requested_extensions = csr.extensions().or_else(|_| Stack::new())?;
        let public_key = csr.public_key()?;

        let not_before = Asn1Time::from_unix(meta.activates.timestamp())?;
        let not_after = Asn1Time::from_unix(meta.expires.timestamp())?;

        let delegates_issuance = meta.pack.as_ref().map_or(false, |pack| !pack.is_empty());

        Ok(CertificateTemplate {
            subject,
            requested_extensions,
            public_key,
            not_before,
            not_after,
            is_ca: delegates_issuance,
            can_sign_certificates: delegates_issuance,
        })
    }

    /// Sign a prepared certificate using this product's stored certificate
    /// and the corresponding private key. Consumers of the result can trace
    /// its authenticity back to the product's root certificate.
    pub fn sign(
        &self,
        template: Option<&CertificateTemplate>,
        private_key: &PKeyRef<Private>,
    ) -> Result<X509> {
        let parent = self.load_local()?.ok_or(LicenseError::NoParentCertificate)?;
        let template = template.ok_or(LicenseError::NullTemplate)?;

        // Uniformly random 32-bit serial
        let mut serial = BigNum::new().map_err(|_| LicenseError::SerialGenerationFailure)?;
        serial
            .rand(32, MsbOption::MAYBE_ZERO, false)
            .map_err(|_| LicenseError::SerialGenerationFailure)?;
        let serial = serial
            .to_asn1_integer()
            .map_err(|_| LicenseError::SerialGenerationFailure)?;

        debug!(product = %self.product.id, ca = template.is_ca, "signing child certificate");

        let mut builder = X509::builder()?;
        builder.set_version(X509_VERSION_3)?;
        builder.set_serial_number(&serial)?;

        builder.set_subject_name(&template.subject)?;
        builder.set_issuer_name(parent.subject_name())?;

        builder.set_not_before(&template.not_before)?;
        builder.set_not_after(&template.not_after)?;

        builder.set_pubkey(&template.public_key)?;

        let mut basic_constraints = BasicConstraints::new();
        basic_constraints.critical();
        if template.is_ca {
            basic_constraints.ca();
            basic_constraints.pathlen(MAX_PATH_LENGTH);
        }
        builder.append_extension(basic_constraints.build()?)?;

        let mut key_usage = KeyUsage::new();
        key_usage.critical();
        key_usage.digital_signature();
        key_usage.data_encipherment();
        if template.can_sign_certificates {
            key_usage.key_cert_sign();
        }
        builder.append_extension(key_usage.build()?)?;

        for extension in &template.requested_extensions {
            builder.append_extension2(extension)?;
        }

        builder.sign(private_key, MessageDigest::sha256())?;

        X509::from_der(&builder.build().to_der()?)
            .map_err(|err| LicenseError::CertParseFailure(err.to_string()))
    }

    /// The fixed identity under which every Lithium authority issues.
    fn issuer(&self) -> Result<X509Name> {
        let mut name = X509Name::builder()?;
        name.append_entry_by_nid(Nid::COMMONNAME, AUTHORITY_COMMON_NAME)?;
        name.append_entry_by_nid(Nid::ORGANIZATIONNAME, AUTHORITY_ORGANIZATION)?;
        name.append_entry_by_nid(Nid::ORGANIZATIONALUNITNAME, LICENSING_UNIT)?;
        name.append_entry_by_nid(Nid::STATEORPROVINCENAME, AUTHORITY_PROVINCE)?;
        name.append_entry_by_nid(Nid::COUNTRYNAME, AUTHORITY_COUNTRY)?;
        Ok(name.build())
    }

    /// Copy a CSR subject, replacing the entries the authority controls.
    fn constrained_subject(&self, requested: &X509NameRef, license_id: &str) -> Result<X509Name> {
        const OVERRIDDEN: [Nid; 4] = [
            Nid::COMMONNAME,
            Nid::SERIALNUMBER,
            Nid::ORGANIZATIONNAME,
            Nid::ORGANIZATIONALUNITNAME,
        ];

        let mut name = X509Name::builder()?;
        for entry in requested.entries() {
            let nid = entry.object().nid();
            if OVERRIDDEN.contains(&nid) {
                continue;
            }

            let value = entry.data().as_utf8()?;
            name.append_entry_by_nid(nid, &value)?;
        }

        name.append_entry_by_nid(
            Nid::COMMONNAME,
            &format!("{} ({})", self.product.name, self.product.id),
        )?;
        name.append_entry_by_nid(Nid::SERIALNUMBER, license_id)?;
        name.append_entry_by_nid(Nid::ORGANIZATIONNAME, &self.product.organization)?;
        name.append_entry_by_nid(Nid::ORGANIZATIONALUNITNAME, LICENSING_UNIT)?;

        Ok(name.build())
    }

    fn certificate_path(&self) -> PathBuf {
        self.path.join(format!("{}.crt", self.product.id))
    }
}

/// Build a certificate signing request for the machine identified by the
/// given key, requesting the provided DNS names.
pub fn build_csr(private_key: &PKeyRef<Private>, dns_names: &[&str]) -> Result<X509Req> {
    let mut builder = X509Req::builder()?;
    builder.set_pubkey(private_key)?;

    if !dns_names.is_empty() {
        let mut extensions = Stack::new()?;
        let value = dns_names
            .iter()
            .map(|name| format!("DNS:{}", name))
            .collect::<Vec<_>>()
            .join(",");
        #[allow(deprecated)]
        let subject_alt_name =
            X509Extension::new_nid(None, None, Nid::SUBJECT_ALT_NAME, &value)?;
        extensions.push(subject_alt_name)?;
        builder.add_extensions(&extensions)?;
    }

    builder.sign(private_key, MessageDigest::sha256())?;
    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Metadata;
    use chrono::{DateTime, Utc};
    use openssl::rsa::Rsa;
    use std::collections::BTreeMap;

    fn test_product() -> Product {
        Product::new("testing", "Lithium Testing", "Sierra Softworks")
    }

    fn test_key() -> PKey<Private> {
        PKey::from_rsa(Rsa::generate(1024).unwrap()).unwrap()
    }

    fn epoch() -> DateTime<Utc> {
        "1970-01-01T00:00:00Z".parse().unwrap()
    }

    fn test_license(pack: Option<crate::data::Pack>) -> Data {
        Data {
            meta: Some(Metadata {
                id: "test".to_string(),
                activates: epoch(),
                expires: epoch(),
                pack,
            }),
            payload: None,
        }
    }

    fn subject_entry(name: &X509NameRef, nid: Nid) -> String {
        name.entries_by_nid(nid)
            .next()
            .expect("expected subject entry")
            .data()
            .as_utf8()
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_create_root() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CertManager::new(test_product()).with_path(dir.path());

        let certificate = manager.create_root(&test_key()).unwrap();

        assert_eq!(
            subject_entry(certificate.subject_name(), Nid::COMMONNAME),
            "Lithium Testing (testing)"
        );
        assert_eq!(
            subject_entry(certificate.subject_name(), Nid::SERIALNUMBER),
            "Root Certificate"
        );

        // The root is issued by the fixed authority identity, not by itself
        assert_eq!(
            subject_entry(certificate.issuer_name(), Nid::COMMONNAME),
            "Sierra Softworks Lithium License Protocol"
        );
    }

    #[test]
    fn test_store_and_load_local() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CertManager::new(test_product()).with_path(dir.path());

        assert!(manager.load_local().unwrap().is_none());

        let certificate = manager.create_root(&test_key()).unwrap();
        manager.store_local(&certificate).unwrap();

        // Stored as raw DER, not armored
        let raw = std::fs::read(dir.path().join("testing.crt")).unwrap();
        assert_eq!(raw, certificate.to_der().unwrap());

        let loaded = manager.load_local().unwrap().unwrap();
        assert_eq!(loaded.to_der().unwrap(), certificate.to_der().unwrap());
    }

    #[test]
    fn test_prepare() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CertManager::new(test_product()).with_path(dir.path());

        let key = test_key();
        let csr = build_csr(&key, &["localhost"]).unwrap();

        let template = manager.prepare(&csr, &test_license(None)).unwrap();

        assert_eq!(subject_entry(template.subject(), Nid::SERIALNUMBER), "test");
        assert_eq!(
            subject_entry(template.subject(), Nid::COMMONNAME),
            "Lithium Testing (testing)"
        );
        assert!(!template.is_ca());
        assert!(!template.can_sign_certificates());
    }

    #[test]
    fn test_prepare_with_pack_creates_authority() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CertManager::new(test_product()).with_path(dir.path());

        let key = test_key();
        let csr = build_csr(&key, &["localhost"]).unwrap();

        let mut pack = BTreeMap::new();
        pack.insert(
            "test".to_string(),
            crate::data::Template {
                count: 5,
                payload: serde_json::Map::new(),
                pack: None,
            },
        );

        let template = manager.prepare(&csr, &test_license(Some(pack))).unwrap();
        assert!(template.is_ca());
        assert!(template.can_sign_certificates());

        // An empty pack must not grant issuance rights
        let template = manager
            .prepare(&csr, &test_license(Some(BTreeMap::new())))
            .unwrap();
        assert!(!template.is_ca());
    }

    #[test]
    fn test_prepare_requires_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CertManager::new(test_product()).with_path(dir.path());

        let key = test_key();
        let csr = build_csr(&key, &["localhost"]).unwrap();

        assert!(matches!(
            manager.prepare(&csr, &Data::default()),
            Err(LicenseError::MetadataMissing)
        ));
    }

    #[test]
    fn test_sign() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CertManager::new(test_product()).with_path(dir.path());

        let root_key = test_key();
        let root = manager.create_root(&root_key).unwrap();
        manager.store_local(&root).unwrap();

        let machine_key = test_key();
        let csr = build_csr(&machine_key, &["localhost"]).unwrap();
        let template = manager.prepare(&csr, &test_license(None)).unwrap();

        let signed = manager.sign(Some(&template), &root_key).unwrap();

        assert_eq!(subject_entry(signed.subject_name(), Nid::SERIALNUMBER), "test");
        assert!(signed.verify(&root.public_key().unwrap()).unwrap());

        // Serial numbers are sampled per signature
        let other = manager.sign(Some(&template), &root_key).unwrap();
        assert_ne!(
            signed.serial_number().to_bn().unwrap(),
            other.serial_number().to_bn().unwrap()
        );
    }

    #[test]
    fn test_sign_without_parent_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CertManager::new(test_product()).with_path(dir.path());

        let key = test_key();
        let csr = build_csr(&key, &["localhost"]).unwrap();
        let template = manager.prepare(&csr, &test_license(None)).unwrap();

        assert!(matches!(
            manager.sign(Some(&template), &key),
            Err(LicenseError::NoParentCertificate)
        ));
    }

    #[test]
    fn test_sign_without_template() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CertManager::new(test_product()).with_path(dir.path());

        let key = test_key();
        let root = manager.create_root(&key).unwrap();
        manager.store_local(&root).unwrap();

        assert!(matches!(
            manager.sign(None, &key),
            Err(LicenseError::NullTemplate)
        ));
    }
}
