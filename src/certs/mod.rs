//! Certificate and key loading.
//!
//! # Responsibilities
//! - Parse the PEM certificate chain (leaf first) and the P-256 private key
//! - Check the key belongs to the leaf certificate
//! - Derive the certificate's public name, shared by the cert URL minted
//!   when signing and the responder that serves the chain
//! - Encode the chain as a TLS 1.3 Certificate message

pub mod responder;

pub use responder::CertResponder;

use std::fs;
use std::path::Path;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use p256::ecdsa::SigningKey;
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey};
use p256::PublicKey;
use rustls_pemfile::Item;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Path prefix, relative to the packager base, of certificate URLs.
pub const CERT_URL_PREFIX: &str = "amppkg/cert/";

/// Content type of the served chain.
pub const CHAIN_CONTENT_TYPE: &str = "application/tls-certificate-chain";

#[derive(Debug, Error)]
pub enum CertError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(String),

    #[error("no private key found in {0}")]
    NoKey(String),

    #[error("unsupported private key format in {0}; expected PKCS#8 or SEC1 P-256")]
    UnsupportedKey(String),

    #[error("invalid P-256 private key: {0}")]
    InvalidKey(String),

    #[error("private key does not match the leaf certificate")]
    KeyMismatch,

    #[error("leaf certificate has no P-256 public key: {0}")]
    LeafKey(String),

    #[error("certificate is too large to encode ({0} bytes)")]
    TooLarge(usize),
}

/// The loaded certificate chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificates {
    chain: Vec<Vec<u8>>,
    name: String,
}

impl Certificates {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CertError> {
        let path = path.as_ref();
        let pem = read(path)?;
        Self::from_pem(&pem, &path.display().to_string())
    }

    /// Parse every `CERTIFICATE` block; other blocks are ignored.
    pub fn from_pem(pem: &[u8], source: &str) -> Result<Self, CertError> {
        let mut chain = Vec::new();
        for item in rustls_pemfile::read_all(&mut &pem[..]) {
            let item = item.map_err(|e| CertError::Io {
                path: source.to_string(),
                source: e,
            })?;
            if let Item::X509Certificate(der) = item {
                chain.push(der.to_vec());
            }
        }
        Self::from_der(chain).ok_or_else(|| CertError::NoCertificates(source.to_string()))
    }

    /// Returns `None` for an empty chain.
    pub fn from_der(chain: Vec<Vec<u8>>) -> Option<Self> {
        let name = cert_name(chain.first()?);
        Some(Self { chain, name })
    }

    pub fn leaf(&self) -> &[u8] {
        &self.chain[0]
    }

    pub fn chain(&self) -> &[Vec<u8>] {
        &self.chain
    }

    /// URL-safe base64 of the SHA-256 of the leaf DER.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// TLS 1.3 `Certificate` message: empty request context, then each
    /// certificate with empty extensions.
    pub fn chain_message(&self) -> Result<Vec<u8>, CertError> {
        let mut list = Vec::new();
        for der in &self.chain {
            put_u24(&mut list, der.len())?;
            list.extend_from_slice(der);
            list.extend_from_slice(&[0, 0]);
        }

        let mut message = Vec::with_capacity(4 + list.len());
        message.push(0);
        put_u24(&mut message, list.len())?;
        message.extend_from_slice(&list);
        Ok(message)
    }

    /// Fail unless `key` is the private half of the leaf's public key.
    pub fn check_key(&self, key: &SigningKey) -> Result<(), CertError> {
        let spki = leaf_spki(self.leaf())
            .ok_or_else(|| CertError::LeafKey("malformed tbsCertificate".to_string()))?;
        let public =
            PublicKey::from_public_key_der(spki).map_err(|e| CertError::LeafKey(e.to_string()))?;
        if public.as_affine() == key.verifying_key().as_affine() {
            Ok(())
        } else {
            Err(CertError::KeyMismatch)
        }
    }
}

const DER_SEQUENCE: u8 = 0x30;
const DER_INTEGER: u8 = 0x02;
const DER_EXPLICIT_VERSION: u8 = 0xa0;

/// The encoded SubjectPublicKeyInfo of an X.509 certificate.
///
/// Walks `Certificate.tbsCertificate` past the optional version, serial
/// number, signature algorithm, issuer, validity and subject.
fn leaf_spki(cert: &[u8]) -> Option<&[u8]> {
    let (tag, cert, _) = read_tlv(cert)?;
    if tag != DER_SEQUENCE {
        return None;
    }
    let (tag, mut tbs, _) = read_tlv(cert)?;
    if tag != DER_SEQUENCE {
        return None;
    }

    if tbs.first() == Some(&DER_EXPLICIT_VERSION) {
        tbs = read_tlv(tbs)?.2;
    }
    for expected in [DER_INTEGER, DER_SEQUENCE, DER_SEQUENCE, DER_SEQUENCE, DER_SEQUENCE] {
        let (tag, _, rest) = read_tlv(tbs)?;
        if tag != expected {
            return None;
        }
        tbs = rest;
    }

    let (tag, _, rest) = read_tlv(tbs)?;
    if tag != DER_SEQUENCE {
        return None;
    }
    Some(&tbs[..tbs.len() - rest.len()])
}

/// Split one DER element into (tag, contents, remaining input). Only
/// single-byte tags occur in the fields walked above.
fn read_tlv(input: &[u8]) -> Option<(u8, &[u8], &[u8])> {
    let (&tag, input) = input.split_first()?;
    let (&first, input) = input.split_first()?;
    let (len, input) = if first < 0x80 {
        (first as usize, input)
    } else {
        let n = (first & 0x7f) as usize;
        if n == 0 || n > 4 || input.len() < n {
            return None;
        }
        let (digits, input) = input.split_at(n);
        let len = digits.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize);
        (len, input)
    };
    if input.len() < len {
        return None;
    }
    let (contents, rest) = input.split_at(len);
    Some((tag, contents, rest))
}

/// The public name of a certificate.
pub fn cert_name(der: &[u8]) -> String {
    URL_SAFE.encode(Sha256::digest(der))
}

pub fn load_signing_key(path: impl AsRef<Path>) -> Result<SigningKey, CertError> {
    let path = path.as_ref();
    let pem = read(path)?;
    signing_key_from_pem(&pem, &path.display().to_string())
}

/// Parse the first private key block, PKCS#8 or SEC1.
pub fn signing_key_from_pem(pem: &[u8], source: &str) -> Result<SigningKey, CertError> {
    for item in rustls_pemfile::read_all(&mut &pem[..]) {
        let item = item.map_err(|e| CertError::Io {
            path: source.to_string(),
            source: e,
        })?;
        match item {
            Item::Pkcs8Key(key) => {
                return SigningKey::from_pkcs8_der(key.secret_pkcs8_der())
                    .map_err(|e| CertError::InvalidKey(e.to_string()));
            }
            Item::Sec1Key(key) => {
                return p256::SecretKey::from_sec1_der(key.secret_sec1_der())
                    .map(SigningKey::from)
                    .map_err(|e| CertError::InvalidKey(e.to_string()));
            }
            Item::Pkcs1Key(_) => return Err(CertError::UnsupportedKey(source.to_string())),
            _ => {}
        }
    }
    Err(CertError::NoKey(source.to_string()))
}

fn read(path: &Path) -> Result<Vec<u8>, CertError> {
    fs::read(path).map_err(|source| CertError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn put_u24(out: &mut Vec<u8>, n: usize) -> Result<(), CertError> {
    if n >= 1 << 24 {
        return Err(CertError::TooLarge(n));
    }
    out.extend_from_slice(&(n as u32).to_be_bytes()[1..]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generated() -> rcgen::CertifiedKey {
        rcgen::generate_simple_self_signed(vec!["example.test".to_string()]).unwrap()
    }

    #[test]
    fn test_load_matching_pair() {
        let ck = generated();
        let certs = Certificates::from_pem(ck.cert.pem().as_bytes(), "cert.pem").unwrap();
        let key = signing_key_from_pem(ck.key_pair.serialize_pem().as_bytes(), "key.pem").unwrap();

        assert_eq!(certs.chain().len(), 1);
        assert_eq!(certs.leaf(), &ck.cert.der()[..]);
        certs.check_key(&key).unwrap();
    }

    #[test]
    fn test_mismatched_key() {
        let certs = Certificates::from_pem(generated().cert.pem().as_bytes(), "cert.pem").unwrap();
        let other = generated();
        let key = signing_key_from_pem(other.key_pair.serialize_pem().as_bytes(), "key.pem").unwrap();
        assert!(matches!(certs.check_key(&key), Err(CertError::KeyMismatch)));
    }

    fn der(tag: u8, contents: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        match contents.len() {
            n if n < 0x80 => out.push(n as u8),
            n if n <= 0xff => out.extend([0x81, n as u8]),
            n => out.extend([0x82, (n >> 8) as u8, n as u8]),
        }
        out.extend_from_slice(contents);
        out
    }

    /// SubjectPublicKeyInfo for a P-256 key with the given SEC1 point.
    fn spki(point: &[u8]) -> Vec<u8> {
        let algorithm = [
            0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, // id-ecPublicKey
            0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, // prime256v1
        ];
        let mut bits = vec![0];
        bits.extend_from_slice(point);
        [der(0x30, &algorithm), der(0x03, &bits)].concat()
    }

    /// A structurally valid certificate whose subject carries `subject` and
    /// whose key is `point`. The signature is not meaningful.
    fn certificate(subject: &[u8], point: &[u8]) -> Vec<u8> {
        let tbs = [
            der(0xa0, &der(0x02, &[2])),
            der(0x02, &[1]),
            der(0x30, &[]),
            der(0x30, &[]),
            der(0x30, &[]),
            der(0x30, &der(0x04, subject)),
            der(0x30, &spki(point)),
        ]
        .concat();
        der(0x30, &[der(0x30, &tbs), der(0x30, &[]), der(0x03, &[0])].concat())
    }

    fn signing_key(byte: u8) -> SigningKey {
        SigningKey::from_slice(&[byte; 32]).unwrap()
    }

    #[test]
    fn test_compressed_point_matches() {
        let key = signing_key(1);
        let compressed = key.verifying_key().to_encoded_point(true);
        let certs = Certificates::from_der(vec![certificate(b"", compressed.as_bytes())]).unwrap();
        certs.check_key(&key).unwrap();
    }

    #[test]
    fn test_key_outside_spki_is_ignored() {
        let key = signing_key(1);
        let other = signing_key(2);
        let ours = key.verifying_key().to_encoded_point(false);
        let theirs = other.verifying_key().to_encoded_point(false);

        let certs =
            Certificates::from_der(vec![certificate(ours.as_bytes(), theirs.as_bytes())]).unwrap();
        assert!(matches!(certs.check_key(&key), Err(CertError::KeyMismatch)));
        certs.check_key(&other).unwrap();
    }

    #[test]
    fn test_unparseable_leaf() {
        let key = signing_key(1);
        let certs = Certificates::from_der(vec![vec![0x30, 0x03, 0x02, 0x01, 0x01]]).unwrap();
        assert!(matches!(certs.check_key(&key), Err(CertError::LeafKey(_))));
    }

    #[test]
    fn test_missing_blocks() {
        let key_pem = generated().key_pair.serialize_pem();
        assert!(matches!(
            Certificates::from_pem(key_pem.as_bytes(), "key.pem"),
            Err(CertError::NoCertificates(_))
        ));

        let cert_pem = generated().cert.pem();
        assert!(matches!(
            signing_key_from_pem(cert_pem.as_bytes(), "cert.pem"),
            Err(CertError::NoKey(_))
        ));
    }

    #[test]
    fn test_cert_name_is_padded_url_safe_sha256() {
        let name = cert_name(b"abc");
        // SHA-256("abc") = ba7816bf...; 32 bytes encode to 44 chars with one pad.
        assert_eq!(name, "ungWv48Bz-pBQUDeXa4iI7ADYaOWF3qctBD_YfIAFa0=");
    }

    #[test]
    fn test_chain_message_layout() {
        let certs = Certificates::from_der(vec![vec![0xaa; 3], vec![0xbb; 2]]).unwrap();
        assert_eq!(
            certs.chain_message().unwrap(),
            vec![
                0, // request context
                0, 0, 12, // list length
                0, 0, 3, 0xaa, 0xaa, 0xaa, 0, 0, // leaf + extensions
                0, 0, 2, 0xbb, 0xbb, 0, 0, // intermediate + extensions
            ]
        );
    }

    #[test]
    fn test_empty_chain() {
        assert!(Certificates::from_der(Vec::new()).is_none());
    }
}
