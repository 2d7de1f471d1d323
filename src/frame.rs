//! Fixed-layout message framing: header + variable payload.
//!
//! A frame is the unit of enqueue and dequeue for the ring buffer. The header
//! is a fixed 40-byte, host-endian layout (frames never leave the host, so
//! there is no wire endianness to negotiate); the payload follows
//! immediately and is never copied out of place except by the producer's
//! initial write and the worker's read.

use crate::constants::{ FRAME_MAGIC, HEADER_SIZE, MAX_PAYLOAD_LEN };
use crate::error::{ BusError, Result };

/// Bit 0 of [`MessageHeader::flags`]: a checksum was computed and stored.
pub const FLAG_CHECKSUM_PRESENT: u32 = 0b0000_0001;

/// Fixed-layout frame header. Field order here is the field order on the
/// wire; `encode`/`decode_header` must not reorder them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Constant magic value used to resynchronize on corruption.
    pub magic: u32,
    /// Opaque routing tag, meaningful only to the host's dispatcher.
    pub msg_type: u32,
    /// Payload length in bytes, valid range `[0, MAX_PAYLOAD_LEN]`.
    pub length: u32,
    /// Monotonic nanoseconds at enqueue time.
    pub timestamp: u64,
    /// Producer identifier.
    pub source: u32,
    /// Consumer identifier (0 if unrouted/any).
    pub target: u32,
    /// Bit 0: checksum present. Remaining bits reserved.
    pub flags: u32,
    /// CRC32C of header (with this field zeroed) + payload; valid iff
    /// `flags & FLAG_CHECKSUM_PRESENT` is set.
    pub checksum: u32,
    /// Priority class, `0..5`. Recorded but not used to gate claim order —
    /// see DESIGN.md open-question resolution.
    pub priority: u32,
}

impl MessageHeader {
    /// Total size of this frame (header + payload) once encoded.
    pub fn frame_size(&self) -> usize {
        HEADER_SIZE + (self.length as usize)
    }

    fn checksum_present(&self) -> bool {
        self.flags & FLAG_CHECKSUM_PRESENT != 0
    }
}

/// A pluggable checksum algorithm for frame integrity.
///
/// The framing core treats checksumming as an external collaborator rather
/// than a hardwired algorithm; [`Crc32Checksum`] is the default
/// implementation, backed by the `crc32fast` crate.
pub trait Checksum: Send + Sync {
    /// Compute the checksum over a header (with its `checksum` field
    /// zeroed) followed by the payload.
    fn compute(&self, header_bytes: &[u8], payload: &[u8]) -> u32;
}

/// Default checksum implementation, backed by `crc32fast`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Crc32Checksum;

impl Checksum for Crc32Checksum {
    fn compute(&self, header_bytes: &[u8], payload: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(header_bytes);
        hasher.update(payload);
        hasher.finalize()
    }
}

/// Encode `header` and `payload` into a freshly allocated byte buffer,
/// computing and storing the checksum if `flags & FLAG_CHECKSUM_PRESENT`.
pub fn encode(header: &MessageHeader, payload: &[u8], checksum: &dyn Checksum) -> Result<Vec<u8>> {
    if payload.len() != header.length as usize {
        return Err(
            BusError::invalid_message(
                format!("payload length {} does not match header.length {}", payload.len(), header.length)
            )
        );
    }
    if header.length > MAX_PAYLOAD_LEN {
        return Err(
            BusError::invalid_message(
                format!("payload length {} exceeds MAX_PAYLOAD_LEN {}", header.length, MAX_PAYLOAD_LEN)
            )
        );
    }

    let mut header = *header;
    let mut buf = Vec::with_capacity(header.frame_size());
    header.checksum = 0;
    write_header(&mut buf, &header);

    if header.checksum_present() {
        let computed = checksum.compute(&buf[..HEADER_SIZE], payload);
        header.checksum = computed;
        buf[..HEADER_SIZE].copy_from_slice(&header_bytes(&header));
    }

    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Decode and validate a header from the front of `bytes`.
///
/// Returns `Err` (a corrupt-frame condition) if `magic` doesn't match or
/// `length` is out of range. Callers are expected to recover locally by
/// advancing past the corrupt header, not to propagate the error upward.
pub fn decode_header(bytes: &[u8]) -> Result<MessageHeader> {
    if bytes.len() < HEADER_SIZE {
        return Err(BusError::invalid_message("buffer shorter than header size"));
    }

    let header = read_header(bytes);

    if header.magic != FRAME_MAGIC {
        return Err(BusError::invalid_message("bad magic"));
    }
    if header.length > MAX_PAYLOAD_LEN {
        return Err(BusError::invalid_message("length out of range"));
    }

    Ok(header)
}

/// Recompute and compare the checksum of `header`/`payload`. A no-op
/// (always `Ok`) if bit 0 of `flags` is clear.
pub fn verify(header: &MessageHeader, payload: &[u8], checksum: &dyn Checksum) -> Result<()> {
    if !header.checksum_present() {
        return Ok(());
    }

    let mut zeroed = *header;
    zeroed.checksum = 0;
    let expected = checksum.compute(&header_bytes(&zeroed), payload);

    if expected == header.checksum {
        Ok(())
    } else {
        Err(BusError::invalid_message("checksum mismatch"))
    }
}

fn write_header(buf: &mut Vec<u8>, header: &MessageHeader) {
    buf.extend_from_slice(&header_bytes(header));
}

fn header_bytes(header: &MessageHeader) -> [u8; HEADER_SIZE] {
    let mut out = [0u8; HEADER_SIZE];
    let mut off = 0;
    macro_rules! put {
        ($val:expr, $ty:ty) => {{
            let bytes = <$ty>::to_ne_bytes($val);
            out[off..off + bytes.len()].copy_from_slice(&bytes);
            off += bytes.len();
        }};
    }
    put!(header.magic, u32);
    put!(header.msg_type, u32);
    put!(header.length, u32);
    put!(header.timestamp, u64);
    put!(header.source, u32);
    put!(header.target, u32);
    put!(header.flags, u32);
    put!(header.checksum, u32);
    put!(header.priority, u32);
    debug_assert_eq!(off, HEADER_SIZE);
    out
}

fn read_header(bytes: &[u8]) -> MessageHeader {
    let mut off = 0;
    macro_rules! take {
        ($ty:ty) => {{
            let size = std::mem::size_of::<$ty>();
            let val = <$ty>::from_ne_bytes(bytes[off..off + size].try_into().unwrap());
            off += size;
            val
        }};
    }
    MessageHeader {
        magic: take!(u32),
        msg_type: take!(u32),
        length: take!(u32),
        timestamp: take!(u64),
        source: take!(u32),
        target: take!(u32),
        flags: take!(u32),
        checksum: take!(u32),
        priority: take!(u32),
    }
}

static_assertions::const_assert_eq!(HEADER_SIZE, 40);

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header(length: u32) -> MessageHeader {
        MessageHeader {
            magic: FRAME_MAGIC,
            msg_type: 7,
            length,
            timestamp: 123_456,
            source: 1,
            target: 2,
            flags: FLAG_CHECKSUM_PRESENT,
            checksum: 0,
            priority: 3,
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let payload = b"hello agent fleet";
        let header = sample_header(payload.len() as u32);
        let encoded = encode(&header, payload, &Crc32Checksum).unwrap();

        let decoded = decode_header(&encoded).unwrap();
        assert_eq!(decoded.magic, FRAME_MAGIC);
        assert_eq!(decoded.length, payload.len() as u32);
        assert_eq!(&encoded[HEADER_SIZE..], payload);

        verify(&decoded, &encoded[HEADER_SIZE..], &Crc32Checksum).unwrap();
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let payload = b"x";
        let mut header = sample_header(1);
        header.magic ^= 0xffff_ffff;
        let encoded = encode(&MessageHeader { magic: FRAME_MAGIC, ..header }, payload, &Crc32Checksum).unwrap();
        let mut corrupted = encoded;
        corrupted[0] ^= 0x01;
        assert!(decode_header(&corrupted).is_err());
    }

    #[test]
    fn test_decode_rejects_oversized_length() {
        let mut header = sample_header(0);
        header.length = MAX_PAYLOAD_LEN + 1;
        let bytes = header_bytes(&header);
        assert!(decode_header(&bytes).is_err());
    }

    #[test]
    fn test_verify_detects_tamper() {
        let payload = b"important agent message";
        let header = sample_header(payload.len() as u32);
        let encoded = encode(&header, payload, &Crc32Checksum).unwrap();
        let decoded = decode_header(&encoded).unwrap();

        let mut tampered_payload = encoded[HEADER_SIZE..].to_vec();
        tampered_payload[0] ^= 0xff;
        assert!(verify(&decoded, &tampered_payload, &Crc32Checksum).is_err());
    }

    #[test]
    fn test_no_checksum_flag_skips_verification() {
        let payload = b"unchecked";
        let mut header = sample_header(payload.len() as u32);
        header.flags = 0;
        let encoded = encode(&header, payload, &Crc32Checksum).unwrap();
        let decoded = decode_header(&encoded).unwrap();
        let mut tampered = encoded[HEADER_SIZE..].to_vec();
        tampered[0] ^= 0xff;
        assert!(verify(&decoded, &tampered, &Crc32Checksum).is_ok());
    }
}
