//! Merkle Integrity content encoding (`mi-sha256`).
//!
//! The payload is split into fixed-size records. Each record except the last
//! is followed by the proof of the record after it, so a client can verify
//! the body incrementally against the single top-level proof carried in the
//! `MI` header.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use thiserror::Error;

const PROOF_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MiceError {
    #[error("record size must be greater than zero")]
    ZeroRecordSize,

    #[error("encoded payload is shorter than its record size header")]
    Truncated,

    #[error("MI header is missing or malformed")]
    BadHeader,

    #[error("integrity proof mismatch in record {0}")]
    ProofMismatch(usize),
}

/// Encode `payload`, returning the encoded body and the `MI` header value.
pub fn encode(payload: &[u8], record_size: usize) -> Result<(Vec<u8>, String), MiceError> {
    if record_size == 0 {
        return Err(MiceError::ZeroRecordSize);
    }

    let records: Vec<&[u8]> = if payload.is_empty() {
        vec![payload]
    } else {
        payload.chunks(record_size).collect()
    };

    // proofs[i] covers records[i..]; built back to front.
    let mut proofs = vec![[0u8; PROOF_LEN]; records.len()];
    let last = records.len() - 1;
    proofs[last] = proof(records[last], None);
    for i in (0..last).rev() {
        proofs[i] = proof(records[i], Some(&proofs[i + 1]));
    }

    let mut body = Vec::with_capacity(8 + payload.len() + last * PROOF_LEN);
    body.extend_from_slice(&(record_size as u64).to_be_bytes());
    for (i, record) in records.iter().enumerate() {
        body.extend_from_slice(record);
        if i < last {
            body.extend_from_slice(&proofs[i + 1]);
        }
    }

    let header = format!("mi-sha256={}", URL_SAFE_NO_PAD.encode(proofs[0]));
    Ok((body, header))
}

/// Verify an encoded body against its `MI` header value and return the
/// original payload.
pub fn decode(body: &[u8], mi_header: &str) -> Result<Vec<u8>, MiceError> {
    let expected = mi_header
        .strip_prefix("mi-sha256=")
        .and_then(|b64| URL_SAFE_NO_PAD.decode(b64).ok())
        .filter(|p| p.len() == PROOF_LEN)
        .ok_or(MiceError::BadHeader)?;

    if body.len() < 8 {
        return Err(MiceError::Truncated);
    }
    let (size_bytes, mut rest) = body.split_at(8);
    let mut size = [0u8; 8];
    size.copy_from_slice(size_bytes);
    let record_size = usize::try_from(u64::from_be_bytes(size)).map_err(|_| MiceError::Truncated)?;
    if record_size == 0 {
        return Err(MiceError::ZeroRecordSize);
    }

    let mut expected: [u8; PROOF_LEN] = expected.try_into().map_err(|_| MiceError::BadHeader)?;
    let mut payload = Vec::with_capacity(rest.len());
    let mut index = 0;
    while rest.len() > record_size {
        if rest.len() < record_size + PROOF_LEN {
            return Err(MiceError::Truncated);
        }
        let (record, tail) = rest.split_at(record_size);
        let (next, tail) = tail.split_at(PROOF_LEN);
        let mut next_proof = [0u8; PROOF_LEN];
        next_proof.copy_from_slice(next);
        if proof(record, Some(&next_proof)) != expected {
            return Err(MiceError::ProofMismatch(index));
        }
        payload.extend_from_slice(record);
        expected = next_proof;
        rest = tail;
        index += 1;
    }
    if proof(rest, None) != expected {
        return Err(MiceError::ProofMismatch(index));
    }
    payload.extend_from_slice(rest);
    Ok(payload)
}

fn proof(record: &[u8], next: Option<&[u8; PROOF_LEN]>) -> [u8; PROOF_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(record);
    match next {
        Some(next) => {
            hasher.update(next);
            hasher.update([1u8]);
        }
        None => hasher.update([0u8]),
    }
    let mut out = [0u8; PROOF_LEN];
    out.copy_from_slice(&hasher.finalize());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_payload() {
        let (body, header) = encode(b"", 16).unwrap();
        assert_eq!(body, 16u64.to_be_bytes());
        let top = Sha256::digest([0u8]);
        assert_eq!(header, format!("mi-sha256={}", URL_SAFE_NO_PAD.encode(top)));
        assert_eq!(decode(&body, &header).unwrap(), b"");
    }

    #[test]
    fn test_single_record() {
        let (body, header) = encode(b"hello", 4096).unwrap();
        assert_eq!(body.len(), 8 + 5);
        assert_eq!(&body[8..], b"hello");
        assert_eq!(decode(&body, &header).unwrap(), b"hello");
    }

    #[test]
    fn test_proofs_interleaved() {
        // Three records: "abcd", "efgh", "ij".
        let (body, header) = encode(b"abcdefghij", 4).unwrap();
        assert_eq!(body.len(), 8 + 10 + 2 * PROOF_LEN);

        let p2 = proof(b"ij", None);
        let p1 = proof(b"efgh", Some(&p2));
        let p0 = proof(b"abcd", Some(&p1));
        assert_eq!(&body[8..12], b"abcd");
        assert_eq!(&body[12..44], &p1);
        assert_eq!(&body[44..48], b"efgh");
        assert_eq!(&body[48..80], &p2);
        assert_eq!(&body[80..], b"ij");
        assert_eq!(header, format!("mi-sha256={}", URL_SAFE_NO_PAD.encode(p0)));

        assert_eq!(decode(&body, &header).unwrap(), b"abcdefghij");
    }

    #[test]
    fn test_exact_multiple_of_record_size() {
        let (body, header) = encode(b"abcdefgh", 4).unwrap();
        assert_eq!(body.len(), 8 + 8 + PROOF_LEN);
        assert_eq!(decode(&body, &header).unwrap(), b"abcdefgh");
    }

    #[test]
    fn test_tampering_detected() {
        let (mut body, header) = encode(b"abcdefghij", 4).unwrap();
        body[45] ^= 0xff;
        assert_eq!(decode(&body, &header), Err(MiceError::ProofMismatch(1)));
    }

    #[test]
    fn test_zero_record_size() {
        assert_eq!(encode(b"x", 0), Err(MiceError::ZeroRecordSize));
    }
}
