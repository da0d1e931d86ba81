//! Signed exchange construction, signing and `b0` serialization.
//!
//! # Data Flow
//! ```text
//! Exchange::new(sign URL, status, headers, payload)
//!     → mice.rs (MI-encode payload, add Content-Encoding + MI headers)
//!     → add_signature(Signer)
//!         → cbor.rs (canonical signed message)
//!         → ECDSA P-256 / SHA-256 over the message
//!         → Signature header
//!     → to_b0() (3-byte length + CBOR header array + MI payload)
//! ```
//!
//! # Design Decisions
//! - Header names are lowercased; repeated headers are joined with `,`
//! - Headers are kept sorted so output is deterministic

pub mod cbor;
pub mod mice;

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use p256::ecdsa::signature::Signer as _;
use p256::ecdsa::{DerSignature, SigningKey};
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

use self::cbor::Value;

/// Content type of a `b0` signed exchange.
pub const CONTENT_TYPE: &str = "application/signed-exchange;v=b0";

/// Signed-message context string.
const CONTEXT: &[u8] = b"HTTP Exchange 1 b0";

/// CBOR header sections must fit the 3-byte length prefix, with headroom.
const MAX_HEADER_LEN: usize = 524_288;

/// Header name → values, lowercased.
pub type Headers = BTreeMap<String, Vec<String>>;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("MI encoding failed: {0}")]
    Mice(#[from] mice::MiceError),

    #[error("CBOR decoding failed: {0}")]
    Cbor(#[from] cbor::CborError),

    #[error("exchange headers too big: {0} bytes")]
    HeadersTooBig(usize),

    #[error("signer has no certificate")]
    NoCertificate,

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("malformed exchange: {0}")]
    Malformed(&'static str),
}

/// Everything needed to sign an exchange.
pub struct Signer<'a> {
    /// Start of the signature validity window, seconds since the epoch.
    pub date: u64,
    /// End of the signature validity window, seconds since the epoch.
    pub expires: u64,
    /// Certificate chain DER, leaf first.
    pub certs: &'a [Vec<u8>],
    pub cert_url: &'a Url,
    pub validity_url: &'a Url,
    pub key: &'a SigningKey,
}

impl Signer<'_> {
    fn leaf_sha256(&self) -> Result<Vec<u8>, ExchangeError> {
        let leaf = self.certs.first().ok_or(ExchangeError::NoCertificate)?;
        Ok(Sha256::digest(leaf).to_vec())
    }
}

/// An exchange with an empty-bodied GET request and an MI-encoded response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    request_url: String,
    status: u16,
    response_headers: Headers,
    payload: Vec<u8>,
}

impl Exchange {
    /// Build an exchange, MI-encoding `body` in records of `record_size`.
    pub fn new<I, K, V>(
        request_url: &Url,
        status: u16,
        response_headers: I,
        body: &[u8],
        record_size: usize,
    ) -> Result<Self, ExchangeError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut headers = Headers::new();
        for (name, value) in response_headers {
            add_header(&mut headers, name.as_ref(), value);
        }

        let (payload, mi) = mice::encode(body, record_size)?;
        add_header(&mut headers, "content-encoding", "mi-sha256");
        add_header(&mut headers, "mi", mi);

        Ok(Self {
            request_url: request_url.to_string(),
            status,
            response_headers: headers,
            payload,
        })
    }

    pub fn request_url(&self) -> &str {
        &self.request_url
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn response_headers(&self) -> &Headers {
        &self.response_headers
    }

    /// First value of a response header, by lowercase name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.response_headers
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// The MI-encoded payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Verify the payload's integrity proofs and return the decoded body.
    pub fn decoded_body(&self) -> Result<Vec<u8>, ExchangeError> {
        let mi = self.header("mi").ok_or(ExchangeError::Malformed("missing MI header"))?;
        Ok(mice::decode(&self.payload, mi)?)
    }

    /// Compute and attach the `Signature` header.
    pub fn add_signature(&mut self, signer: &Signer<'_>) -> Result<(), ExchangeError> {
        let cert_sha256 = signer.leaf_sha256()?;
        let message = self.signed_message(signer, &cert_sha256);
        let signature: DerSignature = signer
            .key
            .try_sign(&message)
            .map_err(|e| ExchangeError::Signing(e.to_string()))?;

        let value = format!(
            "label; sig=*{}*; integrity=\"mi\"; validity-url=\"{}\"; \
             cert-url=\"{}\"; cert-sha256=*{}*; date={}; expires={}",
            STANDARD.encode(signature.as_bytes()),
            signer.validity_url,
            signer.cert_url,
            STANDARD.encode(&cert_sha256),
            signer.date,
            signer.expires,
        );
        add_header(&mut self.response_headers, "signature", value);
        Ok(())
    }

    /// The bytes covered by the signature.
    fn signed_message(&self, signer: &Signer<'_>, cert_sha256: &[u8]) -> Vec<u8> {
        let fields = Value::Map(vec![
            (Value::text("cert-sha256"), Value::bytes(cert_sha256)),
            (Value::text("date"), Value::Uint(signer.date)),
            (Value::text("expires"), Value::Uint(signer.expires)),
            (
                Value::text("headers"),
                Value::Array(vec![self.request_map(), self.response_map()]),
            ),
            (Value::text("url"), Value::bytes(self.request_url.as_bytes())),
            (
                Value::text("validity-url"),
                Value::bytes(signer.validity_url.as_str().as_bytes()),
            ),
        ]);

        let mut message = vec![b' '; 64];
        message.extend_from_slice(CONTEXT);
        message.push(0);
        message.extend_from_slice(&fields.encode());
        message
    }

    fn request_map(&self) -> Value {
        Value::Map(vec![
            (Value::bytes(&b":method"[..]), Value::bytes(&b"GET"[..])),
            (Value::bytes(&b":url"[..]), Value::bytes(self.request_url.as_bytes())),
        ])
    }

    fn response_map(&self) -> Value {
        let mut entries = vec![(
            Value::bytes(&b":status"[..]),
            Value::bytes(self.status.to_string()),
        )];
        for (name, values) in &self.response_headers {
            entries.push((Value::bytes(name.as_bytes()), Value::bytes(values.join(","))));
        }
        Value::Map(entries)
    }

    /// Serialize in the `application/signed-exchange;v=b0` layout.
    pub fn to_b0(&self) -> Result<Vec<u8>, ExchangeError> {
        let header = Value::Array(vec![self.request_map(), self.response_map()]).encode();
        if header.len() >= MAX_HEADER_LEN {
            return Err(ExchangeError::HeadersTooBig(header.len()));
        }

        let len = header.len() as u32;
        let mut out = Vec::with_capacity(3 + header.len() + self.payload.len());
        out.extend_from_slice(&len.to_be_bytes()[1..]);
        out.extend_from_slice(&header);
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Parse a `b0` serialization. The payload is kept MI-encoded.
    pub fn from_b0(bytes: &[u8]) -> Result<Self, ExchangeError> {
        if bytes.len() < 3 {
            return Err(ExchangeError::Malformed("missing length prefix"));
        }
        let len = u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]) as usize;
        let header = bytes
            .get(3..3 + len)
            .ok_or(ExchangeError::Malformed("truncated header section"))?;
        let payload = bytes[3 + len..].to_vec();

        let root = cbor::decode(header)?;
        let sections = root
            .as_array()
            .filter(|items| items.len() == 2)
            .ok_or(ExchangeError::Malformed("expected a two-element array"))?;

        let mut request_url = None;
        for (key, value) in byte_entries(&sections[0])? {
            if key == b":url" {
                request_url = Some(String::from_utf8_lossy(value).into_owned());
            }
        }
        let request_url = request_url.ok_or(ExchangeError::Malformed("missing :url"))?;

        let mut status = None;
        let mut response_headers = Headers::new();
        for (key, value) in byte_entries(&sections[1])? {
            let value = String::from_utf8_lossy(value).into_owned();
            if key == b":status" {
                status = value.parse::<u16>().ok();
            } else {
                add_header(&mut response_headers, &String::from_utf8_lossy(key), value);
            }
        }
        let status = status.ok_or(ExchangeError::Malformed("missing or invalid :status"))?;

        Ok(Self {
            request_url,
            status,
            response_headers,
            payload,
        })
    }
}

fn add_header(headers: &mut Headers, name: &str, value: impl Into<String>) {
    headers
        .entry(name.to_ascii_lowercase())
        .or_default()
        .push(value.into());
}

fn byte_entries(map: &Value) -> Result<Vec<(&[u8], &[u8])>, ExchangeError> {
    map.as_map()
        .ok_or(ExchangeError::Malformed("expected a header map"))?
        .iter()
        .map(|(k, v)| match (k.as_bytes(), v.as_bytes()) {
            (Some(k), Some(v)) => Ok((k, v)),
            _ => Err(ExchangeError::Malformed("header entries must be byte strings")),
        })
        .collect()
}
