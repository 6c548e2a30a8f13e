use thiserror::Error;

/// Result type for license operations.
pub type Result<T, E = LicenseError> = std::result::Result<T, E>;

/// Errors surfaced by the licensing engine.
///
/// Nothing is retried internally; every failure is propagated to the caller
/// with enough context to print a useful diagnostic. The validation variants
/// carry the exact message a consumer-facing product is expected to show.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// A hash or cipher name was requested which this protocol does not support.
    #[error("{0}")]
    UnsupportedAlgorithm(String),

    /// An armored block could not be decoded.
    #[error("malformed armored block: {0}")]
    MalformedArmor(String),

    /// A machine key file existed but did not contain a valid armored block.
    #[error("machine key was not a valid armored block")]
    KeyFileCorrupt,

    /// A machine key file carried an armored block with an unexpected label.
    #[error("machine key was not of the correct type")]
    KeyFileWrongLabel,

    /// The private machine key file was stored without encryption.
    #[error("expected machine key to be encrypted")]
    KeyFileNotEncrypted,

    /// The machine code does not match the one the private key was encrypted with.
    #[error("machine code does not match the one used to encrypt the private key")]
    PassphraseMismatch,

    /// The key material parsed correctly but is not an RSA key.
    #[error("only RSA keys are supported")]
    KeyTypeUnsupported,

    /// A private key failed its consistency checks.
    #[error("the provided private key failed validation")]
    KeyInvalid,

    /// Signing was requested before a local certificate was stored.
    #[error("no certificate available to sign request")]
    NoParentCertificate,

    /// Signing was requested without a certificate template.
    #[error("expected target certificate to exist")]
    NullTemplate,

    /// The random serial number for a child certificate could not be produced.
    #[error("could not generate a certificate serial number")]
    SerialGenerationFailure,

    /// A certificate could not be re-parsed after creation, or loaded from disk.
    #[error("could not parse certificate: {0}")]
    CertParseFailure(String),

    #[error("payload encryption failed: {0}")]
    EncryptionFailure(String),

    #[error("payload decryption failed: {0}")]
    DecryptionFailure(String),

    #[error("license serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// A container was encoded or parsed without a signature block.
    #[error("no signature has been provided for the license data")]
    MissingSignature,

    #[error("no signature algorithm has been specified")]
    MissingSignatureAlgorithm,

    #[error("malformed license container: {0}")]
    MalformedContainer(String),

    #[error("expected at least one certificate to be present")]
    EmptyChain,

    #[error("expected first certificate in list to match known root")]
    RootMismatch,

    #[error("certificate chain is broken: {0}")]
    ChainBroken(String),

    #[error("signature did not match the expected signed value")]
    SignatureMismatch,

    #[error("unsupported public key algorithm for certificate, required RSA")]
    UnsupportedLeafKey,

    #[error("license metadata not defined")]
    MetadataMissing,

    #[error("license has not yet activated due to time constraint")]
    NotYetActive,

    #[error("license has expired due to time constraint")]
    Expired,

    #[error("license payload was not defined")]
    PayloadMissing,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Crypto(#[from] openssl::error::ErrorStack),
}
