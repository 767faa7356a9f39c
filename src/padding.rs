//! Randomized padding for encrypted payloads.
//!
//! Layout: `[prefix_len][prefix...][data][postfix...][postfix_len]` with
//! single-byte length markers, so both sides can carry up to 255 random
//! bytes. Padding hides plaintext length from ciphertext length; the
//! random filler never needs to be reproduced, only skipped.

use rand::Rng;

use crate::encoding::random_bytes;
use crate::error::{Error, Result};

/// Wraps `data` with exactly `prefix_size` and `postfix_size` random bytes.
pub fn bytes_add_padding(data: &[u8], prefix_size: usize, postfix_size: usize) -> Vec<u8> {
    assert!(prefix_size < 256 && postfix_size < 256, "padding sizes are single-byte");
    let mut out = Vec::with_capacity(data.len() + prefix_size + postfix_size + 2);
    out.push(prefix_size as u8);
    out.extend_from_slice(&random_bytes(prefix_size));
    out.extend_from_slice(data);
    out.extend_from_slice(&random_bytes(postfix_size));
    out.push(postfix_size as u8);
    out
}

/// Strips padding added by [`bytes_add_padding`].
pub fn bytes_del_padding(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < 2 {
        return Err(Error::storage("padded payload too short"));
    }
    let prefix_size = data[0] as usize;
    let postfix_size = data[data.len() - 1] as usize;
    if prefix_size + postfix_size + 2 > data.len() {
        return Err(Error::storage("malformed padding lengths"));
    }
    Ok(data[prefix_size + 1..data.len() - postfix_size - 1].to_vec())
}

/// Pads `data` up to at least `min_output_size` payload bytes, splitting the
/// deficit randomly between prefix and postfix, then adds an independent
/// uniform `[0, max_rnd_size]` amount to each side.
pub fn encode_add_padding(data: &[u8], min_output_size: usize, max_rnd_size: usize) -> Vec<u8> {
    let mut prefix_size = 0;
    let mut postfix_size = 0;
    if data.len() < min_output_size {
        let missing = min_output_size - data.len();
        prefix_size += rand::rng().random_range(0..=missing);
        postfix_size += missing - prefix_size;
    }
    prefix_size += rand::rng().random_range(0..=max_rnd_size);
    postfix_size += rand::rng().random_range(0..=max_rnd_size);
    bytes_add_padding(data, prefix_size, postfix_size)
}

pub fn decode_add_padding(data: &[u8]) -> Result<Vec<u8>> {
    bytes_del_padding(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_no_padding() {
        let padded = bytes_add_padding(b"", 0, 0);
        assert_eq!(bytes_del_padding(&padded).unwrap(), b"");
    }

    #[test]
    fn test_single_byte() {
        let data = random_bytes(1);
        let padded = bytes_add_padding(&data, 0, 0);
        assert_eq!(bytes_del_padding(&padded).unwrap(), data);
    }

    #[test]
    fn test_empty_with_padding() {
        let padded = bytes_add_padding(b"", 1, 1);
        assert_eq!(bytes_del_padding(&padded).unwrap(), b"");
    }

    #[test]
    fn test_max_padding() {
        let data = random_bytes(100);
        let padded = bytes_add_padding(&data, 255, 255);
        assert_eq!(padded.len(), 100 + 255 + 255 + 2);
        assert_eq!(bytes_del_padding(&padded).unwrap(), data);
    }

    #[test]
    #[should_panic(expected = "single-byte")]
    fn test_oversized_padding_panics() {
        bytes_add_padding(b"", 256, 0);
    }

    #[test]
    fn test_encode_min_output_size() {
        for _ in 0..32 {
            let data = random_bytes(3);
            let padded = encode_add_padding(&data, 12, 0);
            assert!(padded.len() >= 12 + 2);
            assert_eq!(decode_add_padding(&padded).unwrap(), data);
        }
    }

    #[test]
    fn test_encode_random_sizes() {
        for size in [0usize, 1, 13, 255] {
            let data = random_bytes(size);
            let padded = encode_add_padding(&data, 0, 6);
            assert_eq!(decode_add_padding(&padded).unwrap(), data);
        }
    }

    #[test]
    fn test_malformed_lengths_rejected() {
        // prefix + postfix exceed the payload
        assert!(bytes_del_padding(&[200u8, 1, 2, 3, 200]).is_err());
        assert!(bytes_del_padding(&[5u8]).is_err());
    }
}
