//! This module contains the pure, stateless kernels that turn one serialized block
//! record into a self-contained frame and back.
//!
//! Every frame starts with the uncompressed length, which the decoder checks against
//! the warehouse index to detect truncation and tampering. This module is a safe, panic-free wrapper around the
//! `zstd` crate.

use std::io::{self, Read, Write};

use crate::config::WarehouseCompression;

/// Size of the little-endian uncompressed-length prefix.
const LEN_PREFIX: usize = 8;

//==================================================================================
// 1. Public API
//==================================================================================

/// Encodes a record into a frame according to the warehouse compression setting.
pub fn encode(
    input_bytes: &[u8],
    compression: WarehouseCompression,
    level: i32,
) -> io::Result<Vec<u8>> {
    let mut output_buf = Vec::with_capacity(LEN_PREFIX + input_bytes.len() / 2);
    output_buf.extend_from_slice(&(input_bytes.len() as u64).to_le_bytes());

    match compression {
        WarehouseCompression::None => output_buf.extend_from_slice(input_bytes),
        WarehouseCompression::Zstd => {
            // `finish` is essential to finalize the Zstd frame.
            let mut encoder = zstd::stream::Encoder::new(&mut output_buf, level)?;
            encoder.write_all(input_bytes)?;
            encoder.finish()?;
        }
    }
    Ok(output_buf)
}

/// Decodes a frame produced by [`encode`].
///
/// `expected_len` comes from the warehouse index. The in-frame length prefix must
/// agree with it before anything is allocated, and the decoder never produces more
/// than `expected_len` bytes, so a damaged frame cannot trigger a huge allocation.
pub fn decode(
    input_bytes: &[u8],
    compression: WarehouseCompression,
    expected_len: u64,
) -> io::Result<Vec<u8>> {
    if input_bytes.len() < LEN_PREFIX {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "frame too short to contain size header",
        ));
    }
    let mut len_bytes = [0u8; LEN_PREFIX];
    len_bytes.copy_from_slice(&input_bytes[..LEN_PREFIX]);
    let uncompressed_len = u64::from_le_bytes(len_bytes);
    if uncompressed_len != expected_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "frame declares {} bytes but the index records {}",
                uncompressed_len, expected_len
            ),
        ));
    }
    let payload = &input_bytes[LEN_PREFIX..];

    let decoded = match compression {
        WarehouseCompression::None => payload.to_vec(),
        WarehouseCompression::Zstd => {
            // The buffer grows as needed; `take` caps it one byte past the expected size
            // so an oversized stream is still detected below.
            let mut out = Vec::new();
            zstd::stream::Decoder::new(payload)?
                .take(expected_len.saturating_add(1))
                .read_to_end(&mut out)?;
            out
        }
    };

    if decoded.len() as u64 != uncompressed_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "decoded size does not match header. Expected {}, got {}",
                uncompressed_len,
                decoded.len()
            ),
        ));
    }
    Ok(decoded)
}

//==================================================================================
// 2. Unit Tests
//==================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zstd_frame_roundtrip_simple_text() {
        let original =
            b"hello world, this is a test of zstd compression. hello world, this is a test."
                .to_vec();
        let frame = encode(&original, WarehouseCompression::Zstd, 3).unwrap();
        let decoded = decode(&frame, WarehouseCompression::Zstd, original.len() as u64).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_zstd_frame_shrinks_repetitive_records() {
        let original = vec![42u8; 10_000];
        let frame = encode(&original, WarehouseCompression::Zstd, 5).unwrap();
        assert!(frame.len() < 60);
        let decoded = decode(&frame, WarehouseCompression::Zstd, original.len() as u64).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_uncompressed_frame_is_prefix_plus_payload() {
        let frame = encode(b"abc", WarehouseCompression::None, 0).unwrap();
        assert_eq!(frame.len(), LEN_PREFIX + 3);
        assert_eq!(decode(&frame, WarehouseCompression::None, 3).unwrap(), b"abc");
    }

    #[test]
    fn test_truncated_frames_are_rejected() {
        assert!(decode(&[1, 2, 3], WarehouseCompression::Zstd, 3).is_err());

        let frame = encode(&vec![7u8; 4096], WarehouseCompression::Zstd, 3).unwrap();
        let cut = &frame[..frame.len() - 4];
        assert!(decode(cut, WarehouseCompression::Zstd, 4096).is_err());

        let mut lying = encode(b"abcd", WarehouseCompression::None, 0).unwrap();
        lying[0] = 9;
        assert!(decode(&lying, WarehouseCompression::None, 4).is_err());
    }

    #[test]
    fn test_length_prefix_must_match_index_before_decoding() {
        let mut frame = encode(b"small record", WarehouseCompression::Zstd, 3).unwrap();
        frame[..LEN_PREFIX].copy_from_slice(&(1u64 << 40).to_le_bytes());
        let err = decode(&frame, WarehouseCompression::Zstd, 12).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        // A prefix that agrees with a wrong index entry still cannot over-read.
        let frame = encode(&vec![1u8; 1000], WarehouseCompression::Zstd, 3).unwrap();
        let mut lying = frame.clone();
        lying[..LEN_PREFIX].copy_from_slice(&10u64.to_le_bytes());
        assert!(decode(&lying, WarehouseCompression::Zstd, 10).is_err());
    }
}
