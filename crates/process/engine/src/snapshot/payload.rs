//! Definition payload encoding inside snapshots
//!
//! Version 1 stores the raw definition text. Version 2 stores base64 of
//! the deflate-compressed raw bytes.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

/// Encode raw definition bytes in the current (version 2) form
pub(crate) fn pack(raw: &[u8]) -> std::io::Result<String> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(raw)?;
    let compressed = encoder.finish()?;
    Ok(STANDARD.encode(compressed))
}

/// Decode a payload written by the given snapshot version
pub(crate) fn unpack(data: &str, version: u32) -> Result<Vec<u8>, String> {
    match version {
        1 => Ok(data.as_bytes().to_vec()),
        _ => {
            let compressed = STANDARD.decode(data).map_err(|e| e.to_string())?;
            let mut raw = Vec::new();
            DeflateDecoder::new(compressed.as_slice())
                .read_to_end(&mut raw)
                .map_err(|e| e.to_string())?;
            Ok(raw)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack() {
        let raw = br#"{"process_id": "order"}"#;
        let packed = pack(raw).unwrap();
        assert_ne!(packed.as_bytes(), raw);
        assert_eq!(unpack(&packed, 2).unwrap(), raw.to_vec());
    }

    #[test]
    fn test_version_one_is_plain_text() {
        assert_eq!(unpack("abc", 1).unwrap(), b"abc".to_vec());
    }

    #[test]
    fn test_unpack_rejects_bad_base64() {
        assert!(unpack("not base64 !!", 2).is_err());
    }
}
