//! Armored Block Codec
//!
//! License material travels as a stream of labeled, textually-framed blocks:
//!
//! ```text
//! -----BEGIN LITHIUM LICENSE-----
//! algorithm: aes256
//! iv: L9dU4Ctp1yL+Y68301+9hw==
//!
//! <base64 payload, wrapped at 64 columns>
//! -----END LITHIUM LICENSE-----
//! ```
//!
//! Each block carries a label, an optional set of string headers and a binary
//! body. The encoder is deterministic: decoding a block and re-encoding it
//! yields byte-identical output, which the container signature relies on.
//!
//! This module also implements the legacy encrypted-block convention used for
//! the machine's private key at rest: the body is AES-256-CBC encrypted with a
//! key derived from a passphrase, and the parameters are advertised through
//! `Proc-Type` and `DEK-Info` headers.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use openssl::hash::{hash, DigestBytes, MessageDigest};
use openssl::rand::rand_bytes;
use openssl::symm::{self, Cipher};

use crate::errors::{LicenseError, Result};

const BEGIN_MARKER: &str = "-----BEGIN ";
const LABEL_TERMINATOR: &str = "-----";
const LINE_WIDTH: usize = 64;

/// Header advertising that a block body is encrypted.
const PROC_TYPE_HEADER: &str = "Proc-Type";
/// Header carrying the encryption cipher name and initialization vector.
const DEK_INFO_HEADER: &str = "DEK-Info";

const ENCRYPTED_PROC_TYPE: &str = "4,ENCRYPTED";
const ENCRYPTION_CIPHER: &str = "AES-256-CBC";
const ENCRYPTION_IV_SIZE: usize = 16;
const ENCRYPTION_SALT_SIZE: usize = 8;
const ENCRYPTION_KEY_SIZE: usize = 32;

/// A single armored block: a label, optional headers and a binary body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub label: String,
    pub headers: BTreeMap<String, String>,
    pub bytes: Vec<u8>,
}

impl Block {
    /// Create a block with no headers.
    pub fn new(label: impl Into<String>, bytes: Vec<u8>) -> Self {
        Block {
            label: label.into(),
            headers: BTreeMap::new(),
            bytes,
        }
    }

    /// Attach a header to this block.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Encode a block into its textual form.
///
/// Headers are written `Proc-Type` first (when present), then alphabetically,
/// followed by a blank separator line and the base64 body wrapped at 64
/// columns. The output is 7-bit-safe ASCII.
pub fn encode(block: &Block) -> String {
    let mut out = String::new();
    out.push_str(BEGIN_MARKER);
    out.push_str(&block.label);
    out.push_str(LABEL_TERMINATOR);
    out.push('\n');

    if !block.headers.is_empty() {
        if let Some(value) = block.headers.get(PROC_TYPE_HEADER) {
            out.push_str(PROC_TYPE_HEADER);
            out.push_str(": ");
            out.push_str(value);
            out.push('\n');
        }

        for (key, value) in &block.headers {
            if key == PROC_TYPE_HEADER {
                continue;
            }

            out.push_str(key);
            out.push_str(": ");
            out.push_str(value);
            out.push('\n');
        }

        out.push('\n');
    }

    let body = BASE64.encode(&block.bytes);
    let mut start = 0;
    while start < body.len() {
        let end = usize::min(start + LINE_WIDTH, body.len());
        out.push_str(&body[start..end]);
        out.push('\n');
        start = end;
    }

    out.push_str("-----END ");
    out.push_str(&block.label);
    out.push_str(LABEL_TERMINATOR);
    out.push('\n');
    out
}

/// Decode the next armored block from the input.
///
/// Anything before the first `-----BEGIN` marker is skipped, mirroring the
/// behaviour expected of the wire format (unknown surrounding content is
/// ignored). Returns the block together with the unconsumed remainder of the
/// input, or `None` when no further block is present.
pub fn decode(input: &[u8]) -> Result<Option<(Block, &[u8])>> {
    let text = match std::str::from_utf8(input) {
        Ok(text) => text,
        Err(_) => return Ok(None),
    };

    let start = match text.find(BEGIN_MARKER) {
        Some(start) => start,
        None => return Ok(None),
    };

    let mut rest = &text[start + BEGIN_MARKER.len()..];
    let begin_line = next_line(&mut rest)
        .ok_or_else(|| malformed("unterminated block preamble"))?;
    let label = begin_line
        .strip_suffix(LABEL_TERMINATOR)
        .ok_or_else(|| malformed("invalid block preamble"))?
        .to_string();

    let end_marker = format!("-----END {}-----", label);
    let mut headers = BTreeMap::new();
    let mut body = String::new();
    let mut in_headers = true;

    loop {
        let line = next_line(&mut rest)
            .ok_or_else(|| malformed(format!("missing end marker for '{}'", label)))?;

        if line == end_marker {
            break;
        }

        if in_headers {
            if line.is_empty() {
                in_headers = false;
                continue;
            }

            if let Some((key, value)) = line.split_once(':') {
                headers.insert(key.trim().to_string(), value.trim().to_string());
                continue;
            }

            in_headers = false;
        }

        if !line.is_empty() {
            body.push_str(line);
        }
    }

    let bytes = BASE64
        .decode(body.as_bytes())
        .map_err(|err| malformed(format!("invalid base64 body: {}", err)))?;

    Ok(Some((
        Block {
            label,
            headers,
            bytes,
        },
        rest.as_bytes(),
    )))
}

/// Encrypt a block body under a passphrase using the legacy encrypted-armor
/// convention: AES-256-CBC keyed by a single-round MD5 key derivation whose
/// salt is the leading bytes of the initialization vector.
pub fn encrypt_block(label: &str, data: &[u8], passphrase: &[u8]) -> Result<Block> {
    let mut iv = [0u8; ENCRYPTION_IV_SIZE];
    rand_bytes(&mut iv)?;

    let key = derive_key(passphrase, &iv[..ENCRYPTION_SALT_SIZE])?;
    let encrypted = symm::encrypt(Cipher::aes_256_cbc(), &key, Some(&iv), data)?;

    Ok(Block::new(label, encrypted)
        .with_header(PROC_TYPE_HEADER, ENCRYPTED_PROC_TYPE)
        .with_header(
            DEK_INFO_HEADER,
            format!("{},{}", ENCRYPTION_CIPHER, hex::encode_upper(iv)),
        ))
}

/// Whether a block was written using the encrypted-armor convention.
pub fn is_encrypted(block: &Block) -> bool {
    block.headers.contains_key(DEK_INFO_HEADER)
}

/// Recover the cleartext body of an encrypted block.
pub fn decrypt_block(block: &Block, passphrase: &[u8]) -> Result<Vec<u8>> {
    let dek_info = block
        .headers
        .get(DEK_INFO_HEADER)
        .ok_or_else(|| malformed("missing DEK-Info header"))?;

    let (cipher, iv_hex) = dek_info
        .split_once(',')
        .ok_or_else(|| malformed("invalid DEK-Info header"))?;

    if cipher != ENCRYPTION_CIPHER {
        return Err(LicenseError::UnsupportedAlgorithm(format!(
            "unsupported key encryption cipher '{}'",
            cipher
        )));
    }

    let iv = hex::decode(iv_hex)
        .map_err(|_| malformed("invalid DEK-Info initialization vector"))?;
    if iv.len() != ENCRYPTION_IV_SIZE {
        return Err(malformed("invalid DEK-Info initialization vector"));
    }

    let key = derive_key(passphrase, &iv[..ENCRYPTION_SALT_SIZE])?;

    // A padding failure here almost always means the wrong passphrase.
    symm::decrypt(Cipher::aes_256_cbc(), &key, Some(&iv), &block.bytes)
        .map_err(|_| LicenseError::PassphraseMismatch)
}

/// Single-round MD5 key derivation matching the legacy encrypted-armor
/// key schedule.
fn derive_key(passphrase: &[u8], salt: &[u8]) -> Result<[u8; ENCRYPTION_KEY_SIZE]> {
    let mut key = [0u8; ENCRYPTION_KEY_SIZE];
    let mut previous: Option<DigestBytes> = None;
    let mut filled = 0;

    while filled < key.len() {
        let mut material = Vec::new();
        if let Some(previous) = &previous {
            material.extend_from_slice(previous);
        }
        material.extend_from_slice(passphrase);
        material.extend_from_slice(salt);

        let digest = hash(MessageDigest::md5(), &material)?;
        let take = usize::min(digest.len(), key.len() - filled);
        key[filled..filled + take].copy_from_slice(&digest[..take]);
        filled += take;
        previous = Some(digest);
    }

    Ok(key)
}

fn next_line<'a>(rest: &mut &'a str) -> Option<&'a str> {
    if rest.is_empty() {
        return None;
    }

    let (line, remainder) = match rest.find('\n') {
        Some(index) => (&rest[..index], &rest[index + 1..]),
        None => (*rest, ""),
    };

    *rest = remainder;
    Some(line.trim_end_matches('\r'))
}

fn malformed(message: impl Into<String>) -> LicenseError {
    LicenseError::MalformedArmor(message.into())
}
