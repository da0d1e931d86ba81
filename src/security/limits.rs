//! Request and response size limits.
//!
//! # Responsibilities
//! - Bound the fetched body that gets signed
//! - Bound the inbound form body of a signing request
//!
//! # Design Decisions
//! - A fetched body over the limit is rejected, never truncated; a
//!   truncated body would be signed as if it were complete

/// Largest fetched body that will be signed.
pub const MAX_BODY_LENGTH: usize = 4 << 20;

/// Largest inbound request body (form-encoded `fetch` and `sign`).
pub const MAX_REQUEST_BODY: usize = 64 * 1024;

/// Append `chunk` to `body` unless that would exceed `limit`.
pub fn append_bounded(body: &mut Vec<u8>, chunk: &[u8], limit: usize) -> Result<(), usize> {
    let total = body.len().saturating_add(chunk.len());
    if total > limit {
        return Err(total);
    }
    body.extend_from_slice(chunk);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_bounded() {
        let mut body = Vec::new();
        append_bounded(&mut body, b"abcd", 6).unwrap();
        append_bounded(&mut body, b"ef", 6).unwrap();
        assert_eq!(append_bounded(&mut body, b"g", 6), Err(7));
        assert_eq!(body, b"abcdef");
    }
}
