use bytes::{Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::manifest::Manifest;

/// Encode frames into a length manifest and one contiguous buffer.
///
/// The buffer is the raw concatenation of the frames with no delimiters;
/// frame boundaries exist only in the manifest. Always succeeds, including
/// for zero frames and for empty frames.
pub fn encode<I, B>(frames: I) -> (Manifest, Bytes)
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut manifest = Manifest::default();
    let mut buffer = BytesMut::new();
    for frame in frames {
        let frame = frame.as_ref();
        manifest.push(frame.len());
        buffer.extend_from_slice(frame);
    }
    (manifest, buffer.freeze())
}

/// Recover frames from a manifest and the buffer it describes.
///
/// Fails with [`FrameError::ManifestMismatch`] unless the manifest total is
/// exactly the buffer length. Returned frames are zero-copy slices of
/// `buffer`.
pub fn decode(manifest: &Manifest, buffer: &Bytes) -> Result<Vec<Bytes>> {
    let declared = manifest
        .total()
        .ok_or_else(|| FrameError::MalformedManifest {
            input: manifest.to_string(),
            reason: "total length overflows".to_string(),
        })?;

    if declared != buffer.len() {
        return Err(FrameError::ManifestMismatch {
            frames: manifest.frame_count(),
            declared,
            actual: buffer.len(),
        });
    }

    let mut cursor = 0usize;
    let mut frames = Vec::with_capacity(manifest.frame_count());
    for &len in manifest.lengths() {
        frames.push(buffer.slice(cursor..cursor + len));
        cursor += len;
    }
    debug_assert_eq!(cursor, buffer.len());

    Ok(frames)
}

/// Parse manifest text (the `FRAME_LENGTH` form) and decode `buffer` with it.
pub fn decode_str(manifest: &str, buffer: &Bytes) -> Result<Vec<Bytes>> {
    let manifest: Manifest = manifest.parse()?;
    decode(&manifest, buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(parts: &[&[u8]]) -> Vec<Bytes> {
        parts.iter().map(|p| Bytes::copy_from_slice(p)).collect()
    }

    #[test]
    fn hello_world_roundtrip() {
        let input = frames(&[b"hello", b"world"]);
        let (manifest, buffer) = encode(&input);

        assert_eq!(manifest.to_string(), "5:5");
        assert_eq!(buffer.as_ref(), b"helloworld");
        assert_eq!(buffer.len(), 10);
        assert_eq!(decode(&manifest, &buffer).unwrap(), input);
    }

    #[test]
    fn empty_middle_frame_roundtrip() {
        let input = frames(&[b"a", b"", b"bcd"]);
        let (manifest, buffer) = encode(&input);

        assert_eq!(manifest.to_string(), "1:0:3");
        assert_eq!(buffer.as_ref(), b"abcd");
        assert_eq!(decode_str("1:0:3", &buffer).unwrap(), input);
    }

    #[test]
    fn leading_empty_frame_preserved() {
        let input = frames(&[b"", b"x"]);
        let (manifest, buffer) = encode(&input);

        assert_eq!(manifest.to_string(), "0:1");
        let decoded = decode(&manifest, &buffer).unwrap();
        assert_eq!(decoded.len(), 2);
        assert!(decoded[0].is_empty());
        assert_eq!(decoded[1].as_ref(), b"x");
    }

    #[test]
    fn single_empty_frame() {
        let (manifest, buffer) = encode([b""]);
        assert_eq!(manifest.to_string(), "0");
        assert!(buffer.is_empty());
        assert_eq!(decode(&manifest, &buffer).unwrap(), vec![Bytes::new()]);
    }

    #[test]
    fn zero_frames_only_with_empty_buffer() {
        let (manifest, buffer) = encode(Vec::<Bytes>::new());
        assert!(manifest.is_empty());
        assert!(buffer.is_empty());
        assert!(decode_str("", &Bytes::new()).unwrap().is_empty());

        let err = decode_str("", &Bytes::from_static(b"x")).unwrap_err();
        assert!(matches!(
            err,
            FrameError::ManifestMismatch {
                frames: 0,
                declared: 0,
                actual: 1
            }
        ));
    }

    #[test]
    fn mismatch_in_either_direction() {
        let buffer = Bytes::from_static(b"abcd");
        for text in ["1:2", "1:0:4", "5", "0"] {
            let err = decode_str(text, &buffer).unwrap_err();
            assert!(
                matches!(err, FrameError::ManifestMismatch { actual: 4, .. }),
                "manifest {text:?}"
            );
        }

        let err = decode_str("3:1", &Bytes::new()).unwrap_err();
        assert!(matches!(
            err,
            FrameError::ManifestMismatch {
                frames: 2,
                declared: 4,
                actual: 0
            }
        ));
    }

    #[test]
    fn malformed_text_is_rejected_before_slicing() {
        let buffer = Bytes::from_static(b"abcd");
        let err = decode_str("2:-2:4", &buffer).unwrap_err();
        assert!(matches!(err, FrameError::MalformedManifest { .. }));
    }

    #[test]
    fn overflowing_constructed_manifest_is_malformed() {
        let manifest = Manifest::from_lengths(vec![usize::MAX, 2]);
        let err = decode(&manifest, &Bytes::from_static(b"a")).unwrap_err();
        assert!(matches!(err, FrameError::MalformedManifest { .. }));
    }

    #[test]
    fn manifest_total_matches_buffer_for_varied_inputs() {
        let inputs: Vec<Vec<Vec<u8>>> = vec![
            vec![vec![]],
            vec![vec![0u8; 1], vec![1u8; 255], vec![]],
            vec![vec![7u8; 70_000]],
            (0..64).map(|i| vec![i as u8; i]).collect(),
        ];

        for input in inputs {
            let (manifest, buffer) = encode(&input);
            assert_eq!(manifest.total(), Some(buffer.len()));
            assert_eq!(manifest.frame_count(), input.len());

            let decoded = decode(&manifest, &buffer).unwrap();
            let decoded: Vec<Vec<u8>> = decoded.iter().map(|b| b.to_vec()).collect();
            assert_eq!(decoded, input);
        }
    }

    #[test]
    fn binary_frames_survive_text_manifest() {
        let input = frames(&[&[0x00, 0x3a, 0xff], b":", &[0x0a]]);
        let (manifest, buffer) = encode(&input);
        let reparsed: Manifest = manifest.to_string().parse().unwrap();
        assert_eq!(decode(&reparsed, &buffer).unwrap(), input);
    }
}
