//! ROM bootloader frame encoding and streaming decoding.
//!
//! ## Frame Format
//!
//! ```text
//! +------+-----+--------+----------+-----------+------+
//! | 0xC0 | CMD | LENGTH | CHECKSUM |  PAYLOAD  | 0xC0 |
//! +------+-----+--------+----------+-----------+------+
//! |  1   |  1  | 2 (LE) |  4 (LE)  |  LENGTH   |  1   |
//! +------+-----+--------+----------+-----------+------+
//! ```
//!
//! Payload bytes are not escaped. A `0xC0` inside the payload is passed through
//! as-is, so the decoder locates the closing delimiter from the declared length
//! instead of scanning for it.

use {
    crate::{
        error::{Error, Result},
        protocol::checksum::frame_checksum,
    },
    byteorder::{ByteOrder, LittleEndian, WriteBytesExt},
};

/// Frame delimiter byte.
pub const DELIMITER: u8 = 0xC0;

/// Header length: command (1) + length (2) + checksum (4).
pub const HEADER_LEN: usize = 7;

/// Largest payload the 16-bit length field can describe.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// One framed bootloader message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    command: u8,
    payload: Vec<u8>,
    checksum: u32,
}

impl Frame {
    /// Build a frame, computing the payload checksum.
    pub fn new(command: u8, payload: Vec<u8>) -> Self {
        let checksum = frame_checksum(&payload);
        Self {
            command,
            payload,
            checksum,
        }
    }

    /// Command identifier.
    pub fn command(&self) -> u8 {
        self.command
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Checksum field.
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Consume the frame and return its payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Encode the frame into wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let len = u16::try_from(self.payload.len())
            .map_err(|_| Error::PayloadTooLarge(self.payload.len()))?;

        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len() + 2);
        buf.push(DELIMITER);
        buf.push(self.command);
        buf.write_u16::<LittleEndian>(len)?;
        buf.write_u32::<LittleEndian>(self.checksum)?;
        buf.extend_from_slice(&self.payload);
        buf.push(DELIMITER);
        Ok(buf)
    }
}

/// Encode a command id and payload into wire bytes.
pub fn encode(command: u8, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(Error::PayloadTooLarge(payload.len()));
    }
    Frame::new(command, payload.to_vec()).encode()
}

/// Why a delimited frame was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The byte at the declared end of the frame is not a delimiter.
    LengthMismatch {
        /// Declared payload length.
        declared: usize,
    },
    /// The checksum field does not match the payload.
    ChecksumMismatch {
        /// Checksum carried in the header.
        expected: u32,
        /// Checksum computed over the payload.
        actual: u32,
    },
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LengthMismatch { declared } => {
                write!(f, "declared length {declared} does not end on a delimiter")
            },
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected:#010x}, got {actual:#010x}")
            },
        }
    }
}

impl From<FrameError> for Error {
    fn from(err: FrameError) -> Self {
        Self::Frame(err.to_string())
    }
}

/// Outcome of one decode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete, valid frame. `consumed` counts every byte up to and
    /// including its closing delimiter, noise before it included.
    Frame {
        /// Decoded frame.
        frame: Frame,
        /// Bytes to drain from the input.
        consumed: usize,
    },
    /// No complete frame yet; read more and retry.
    Incomplete,
    /// A delimited frame was found but is invalid. Draining `consumed` bytes
    /// skips its opening delimiter so scanning can resynchronize.
    Malformed {
        /// Why the frame was rejected.
        error: FrameError,
        /// Bytes to drain from the input.
        consumed: usize,
    },
}

/// Offset of the delimiter that opens the next frame, or `buf.len()` if there
/// is none.
///
/// Bytes before this offset can never start a frame. A run of delimiters
/// collapses to its last byte: no command id is `0xC0`, so `C0 C0` is always a
/// closing delimiter followed by an opening one.
pub fn noise_len(buf: &[u8]) -> usize {
    let Some(mut start) = buf.iter().position(|&b| b == DELIMITER) else {
        return buf.len();
    };
    while buf.get(start + 1) == Some(&DELIMITER) {
        start += 1;
    }
    start
}

/// Try to decode one frame from the start of `buf`.
pub fn decode(buf: &[u8]) -> Decoded {
    let start = noise_len(buf);
    let frame = &buf[start..];

    if frame.len() < 1 + HEADER_LEN {
        return Decoded::Incomplete;
    }

    let command = frame[1];
    let len = usize::from(LittleEndian::read_u16(&frame[2..4]));
    let expected = LittleEndian::read_u32(&frame[4..8]);

    let end = 1 + HEADER_LEN + len;
    if frame.len() <= end {
        return Decoded::Incomplete;
    }

    if frame[end] != DELIMITER {
        return Decoded::Malformed {
            error: FrameError::LengthMismatch { declared: len },
            consumed: start + 1,
        };
    }

    let payload = &frame[1 + HEADER_LEN..end];
    let actual = frame_checksum(payload);
    if actual != expected {
        return Decoded::Malformed {
            error: FrameError::ChecksumMismatch { expected, actual },
            consumed: start + 1,
        };
    }

    Decoded::Frame {
        frame: Frame {
            command,
            payload: payload.to_vec(),
            checksum: expected,
        },
        consumed: start + end + 1,
    }
}

/// Offset of a later delimiter that opens a complete, valid frame while the
/// frame at the start of `buf` is still incomplete.
///
/// A stray delimiter followed by a large bogus length would otherwise hold
/// back every frame queued behind it. Prefixes of a single frame yield `None`.
pub fn resync_offset(buf: &[u8]) -> Option<usize> {
    let start = noise_len(buf);
    (start + 1..buf.len())
        .filter(|&offset| buf[offset] == DELIMITER)
        .find(|&offset| matches!(decode(&buf[offset..]), Decoded::Frame { .. }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decoded_frame(buf: &[u8]) -> (Frame, usize) {
        match decode(buf) {
            Decoded::Frame { frame, consumed } => (frame, consumed),
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn test_encode_layout() {
        let data = encode(0x08, &[0x01, 0x02]).unwrap();
        assert_eq!(
            data,
            vec![0xC0, 0x08, 0x02, 0x00, 0xEC, 0x00, 0x00, 0x00, 0x01, 0x02, 0xC0]
        );
    }

    #[test]
    fn test_encode_empty_payload() {
        let data = encode(0x0A, &[]).unwrap();
        assert_eq!(data, vec![0xC0, 0x0A, 0x00, 0x00, 0xEF, 0x00, 0x00, 0x00, 0xC0]);
    }

    #[test]
    fn test_payload_too_large() {
        let payload = vec![0u8; MAX_PAYLOAD_LEN + 1];
        assert!(matches!(
            encode(0x03, &payload),
            Err(Error::PayloadTooLarge(65536))
        ));
        assert!(encode(0x03, &payload[..MAX_PAYLOAD_LEN]).is_ok());
    }

    #[test]
    fn test_checksum_is_deterministic() {
        let a = encode(0x03, b"firmware").unwrap();
        let b = encode(0x03, b"firmware").unwrap();
        assert_eq!(a[4..8], b[4..8]);

        let c = encode(0x03, b"firmwarf").unwrap();
        assert_ne!(a[4..8], c[4..8]);
    }

    #[test]
    fn test_delimiter_in_payload_is_not_escaped() {
        let wire = encode(0x03, &[0xC0, 0x11]).unwrap();
        assert_eq!(wire.len(), 1 + HEADER_LEN + 2 + 1);
        assert_eq!(&wire[8..10], &[0xC0, 0x11]);
    }

    fn command_id() -> impl Strategy<Value = u8> {
        any::<u8>().prop_filter("0xC0 is the delimiter", |&cmd| cmd != DELIMITER)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_round_trip_any_payload(
            cmd in command_id(),
            payload in prop::collection::vec(any::<u8>(), 0..=MAX_PAYLOAD_LEN),
        ) {
            let wire = encode(cmd, &payload).unwrap();
            prop_assert_eq!(wire.len(), 1 + HEADER_LEN + payload.len() + 1);
            let (frame, consumed) = decoded_frame(&wire);
            prop_assert_eq!(consumed, wire.len());
            prop_assert_eq!(frame, Frame::new(cmd, payload));
        }
    }

    proptest! {
        // Delimiters inside the payload must not end the frame early.
        #[test]
        fn prop_streaming_decode_prefixes_are_incomplete(
            cmd in command_id(),
            payload in prop::collection::vec(
                prop_oneof![Just(DELIMITER), any::<u8>()],
                0..=300,
            ),
        ) {
            let wire = encode(cmd, &payload).unwrap();
            for end in 0..wire.len() {
                prop_assert_eq!(decode(&wire[..end]), Decoded::Incomplete, "prefix {}", end);
            }
            let (frame, consumed) = decoded_frame(&wire);
            prop_assert_eq!(frame.payload(), payload.as_slice());
            prop_assert_eq!(consumed, wire.len());
        }
    }

    #[test]
    fn test_delimiters_in_payload_round_trip() {
        let wire = encode(0x03, &[0xC0, 0xC0, 0xDB]).unwrap();
        let (frame, consumed) = decoded_frame(&wire);
        assert_eq!(frame, Frame::new(0x03, vec![0xC0, 0xC0, 0xDB]));
        assert_eq!(consumed, wire.len());
    }

    #[test]
    fn test_resync_past_truncated_header() {
        let mut buf = vec![0xC0, 0x0A, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00];
        let reply = encode(0x0A, &[0x01, 0xC1, 0xF0, 0xFF, 0, 0]).unwrap();
        buf.extend_from_slice(&reply);

        assert_eq!(decode(&buf), Decoded::Incomplete);
        assert_eq!(resync_offset(&buf), Some(8));
        let (frame, _) = decoded_frame(&buf[8..]);
        assert_eq!(frame.command(), 0x0A);

        // Half of the real reply is not enough to give up on the first frame
        assert_eq!(resync_offset(&buf[..8 + reply.len() - 1]), None);
    }

    #[test]
    fn test_resync_leaves_single_frame_alone() {
        let wire = encode(0x03, &[0x01, 0xC0, 0x0A, 0x00, 0x00, 0xEF, 0xC0]).unwrap();
        for end in 0..wire.len() {
            assert_eq!(resync_offset(&wire[..end]), None, "prefix {end}");
        }
    }

    #[test]
    fn test_leading_noise_is_skipped() {
        let mut buf = vec![0x00, 0x55, 0xFF];
        buf.extend_from_slice(&encode(0x08, &[0x07]).unwrap());
        let (frame, consumed) = decoded_frame(&buf);
        assert_eq!(frame.command(), 0x08);
        assert_eq!(consumed, buf.len());
        assert_eq!(noise_len(&buf), 3);
    }

    #[test]
    fn test_noise_only_is_incomplete() {
        assert_eq!(decode(&[0x00, 0x01, 0x02]), Decoded::Incomplete);
        assert_eq!(noise_len(&[0x00, 0x01, 0x02]), 3);
    }

    #[test]
    fn test_checksum_mismatch_is_malformed() {
        let mut wire = encode(0x04, &[0x00, 0x00, 0x00, 0x00]).unwrap();
        wire[8] = 0x01;
        match decode(&wire) {
            Decoded::Malformed {
                error: FrameError::ChecksumMismatch { expected, actual },
                consumed,
            } => {
                assert_eq!(expected, 0xEF);
                assert_eq!(actual, 0xEE);
                assert_eq!(consumed, 1);
            },
            other => panic!("expected checksum mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_length_mismatch_is_malformed() {
        let mut wire = encode(0x04, &[0x10, 0x20]).unwrap();
        // Declare one byte, so the byte after it (0x20) is not a delimiter.
        wire[2] = 0x01;
        assert!(matches!(
            decode(&wire),
            Decoded::Malformed {
                error: FrameError::LengthMismatch { declared: 1 },
                ..
            }
        ));
    }

    #[test]
    fn test_resync_after_malformed_frame() {
        let mut bad = encode(0x0A, &[1, 2, 3, 4, 0, 0]).unwrap();
        bad[4] ^= 0x01;
        let good = encode(0x02, &[0, 0, 0, 0, 0, 0]).unwrap();
        let mut buf = bad.clone();
        buf.extend_from_slice(&good);

        let Decoded::Malformed { consumed, .. } = decode(&buf) else {
            panic!("expected malformed frame");
        };
        // The stale closing delimiter must not be taken for an opening one.
        let rest = &buf[consumed..];
        let (frame, _) = decoded_frame(rest);
        assert_eq!(frame.command(), 0x02);
        assert_eq!(noise_len(rest), bad.len() - 1);
    }

    #[test]
    fn test_two_frames_back_to_back() {
        let mut buf = encode(0x02, &[0xAA]).unwrap();
        let first_len = buf.len();
        buf.extend_from_slice(&encode(0x03, &[0xBB]).unwrap());

        let (first, consumed) = decoded_frame(&buf);
        assert_eq!(first.command(), 0x02);
        assert_eq!(consumed, first_len);

        let (second, _) = decoded_frame(&buf[consumed..]);
        assert_eq!(second.command(), 0x03);
    }
}
