//! Checksummed block compression frames.
//!
//! When compression is negotiated, data blocks travel as a sequence of frames:
//!
//! ```text
//! | checksum (16) | method (1) | compressed size (4) | uncompressed size (4) | payload ... |
//!                 '------------------- checksummed, counted by compressed size ---------'
//! ```
//!
//! - The checksum is CityHash128 (v1.0.2) of everything from the method byte to the end of the
//!   payload, with its two 64-bit halves swapped and written little-endian.
//! - The compressed size includes the 9-byte sub-header.
//! - A frame never carries more than [`BLOCK_SIZE`] uncompressed bytes.
//!
//! [`Writer`] buffers writes and only emits a frame when the buffer is full or on
//! [`flush`](Write::flush). [`Reader`] pulls frames on demand and verifies every checksum.
use std::io::{self, Read, Write};

use cityhash_rs::cityhash_102_128;
use log::trace;
use thiserror::Error;

use crate::binary::Decoder;

/// Maximum number of uncompressed bytes in one frame.
pub const BLOCK_SIZE: usize = 1 << 20;

pub const CHECKSUM_SIZE: usize = 16;

/// method + compressed size + uncompressed size
pub const HEADER_SIZE: usize = 9;

/// Refuse frames claiming more than this; a corrupted size must not drive allocation.
const MAX_FRAME_SIZE: usize = 256 << 20;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("unknown compression method 0x{0:02x}")]
    UnknownMethod(u8),

    #[error("checksum mismatch: expected {expected:032x}, computed {actual:032x}")]
    Checksum { expected: u128, actual: u128 },

    #[error("invalid frame size: compressed {compressed}, uncompressed {uncompressed}")]
    Size { compressed: usize, uncompressed: usize },

    #[error("lz4: {0}")]
    Lz4(#[from] lz4_flex::block::DecompressError),

    #[error("decompressed {actual} bytes, frame header announced {expected}")]
    Length { expected: usize, actual: usize },

    #[error("{0} bytes of compressed data left unread")]
    Trailing(usize),
}

impl From<FrameError> for io::Error {
    fn from(e: FrameError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Method {
    None = 0x02,
    Lz4 = 0x82,
}

impl TryFrom<u8> for Method {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x02 => Ok(Method::None),
            0x82 => Ok(Method::Lz4),
            other => Err(FrameError::UnknownMethod(other)),
        }
    }
}

fn checksum(data: &[u8]) -> u128 {
    cityhash_102_128(data).rotate_right(64)
}

/// Appends one complete frame holding `data` to `out`.
pub fn encode_frame(method: Method, data: &[u8], out: &mut Vec<u8>) {
    let start = out.len();
    out.resize(start + CHECKSUM_SIZE + HEADER_SIZE, 0);
    match method {
        Method::None => out.extend_from_slice(data),
        Method::Lz4 => out.extend_from_slice(&lz4_flex::block::compress(data)),
    }

    let compressed = out.len() - start - CHECKSUM_SIZE;
    let header = start + CHECKSUM_SIZE;
    out[header] = method as u8;
    out[header + 1..header + 5].copy_from_slice(&(compressed as u32).to_le_bytes());
    out[header + 5..header + 9].copy_from_slice(&(data.len() as u32).to_le_bytes());

    let sum = checksum(&out[header..]);
    out[start..header].copy_from_slice(&sum.to_le_bytes());
    trace!(
        "frame out: method={method:?} compressed={compressed} uncompressed={}",
        data.len()
    );
}

/// Reads and decodes a single frame.
pub fn decode_frame<R: Read + ?Sized>(input: &mut R) -> io::Result<Vec<u8>> {
    let mut sum = [0_u8; CHECKSUM_SIZE];
    let mut header = [0_u8; HEADER_SIZE];
    input.read_exact(&mut sum)?;
    input.read_exact(&mut header)?;

    let expected = u128::from_le_bytes(sum);
    let method = Method::try_from(header[0])?;
    let compressed = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
    let uncompressed = u32::from_le_bytes([header[5], header[6], header[7], header[8]]) as usize;
    if compressed < HEADER_SIZE || compressed > MAX_FRAME_SIZE || uncompressed > MAX_FRAME_SIZE {
        return Err(FrameError::Size {
            compressed,
            uncompressed,
        }
        .into());
    }

    let mut checked = Vec::with_capacity(compressed);
    checked.extend_from_slice(&header);
    checked.extend_from_slice(&input.read_fixed_bytes(compressed - HEADER_SIZE)?);

    let actual = checksum(&checked);
    if actual != expected {
        return Err(FrameError::Checksum { expected, actual }.into());
    }

    let payload = &checked[HEADER_SIZE..];
    let data = match method {
        Method::None => payload.to_vec(),
        Method::Lz4 => {
            lz4_flex::block::decompress(payload, uncompressed).map_err(FrameError::from)?
        }
    };
    if data.len() != uncompressed {
        return Err(FrameError::Length {
            expected: uncompressed,
            actual: data.len(),
        }
        .into());
    }
    trace!("frame in: method={method:?} compressed={compressed} uncompressed={uncompressed}");
    Ok(data)
}

/// Compressing writer. Bytes are held back until a full frame is buffered or `flush` is called.
pub struct Writer<W: Write> {
    inner: W,
    method: Method,
    buf: Vec<u8>,
    frame: Vec<u8>,
}

impl<W: Write> Writer<W> {
    pub fn new(inner: W, method: Method) -> Self {
        Self {
            inner,
            method,
            buf: Vec::new(),
            frame: Vec::new(),
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Number of bytes waiting for the next frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Emits the buffered bytes as a frame without flushing the inner writer.
    pub fn finish_frame(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        self.frame.clear();
        encode_frame(self.method, &self.buf, &mut self.frame);
        self.buf.clear();
        self.inner.write_all(&self.frame)
    }
}

impl<W: Write> Write for Writer<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let room = BLOCK_SIZE - self.buf.len();
        let n = data.len().min(room);
        self.buf.extend_from_slice(&data[..n]);
        if self.buf.len() == BLOCK_SIZE {
            self.finish_frame()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.finish_frame()?;
        self.inner.flush()
    }
}

/// Decompressing reader. Frames are pulled from the inner reader only once the previous frame
/// has been consumed.
pub struct Reader<R: Read> {
    inner: R,
    data: Vec<u8>,
    pos: usize,
}

impl<R: Read> Reader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            data: Vec::new(),
            pos: 0,
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Decompressed bytes not yet handed out.
    pub fn buffered(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Drops decompressed bytes that were never read, returning an error if any were left.
    pub fn reset(&mut self) -> Result<(), FrameError> {
        let left = self.buffered();
        self.data.clear();
        self.pos = 0;
        if left > 0 {
            return Err(FrameError::Trailing(left));
        }
        Ok(())
    }
}

impl<R: Read> Read for Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos == self.data.len() {
            // clean end of input is only allowed on a frame boundary
            let mut first = [0_u8; 1];
            if self.inner.read(&mut first)? == 0 {
                return Ok(0);
            }
            self.data = decode_frame(&mut (&first[..]).chain(&mut self.inner))?;
            self.pos = 0;
        }
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::binary::Encoder;

    fn payload(len: usize) -> Vec<u8> {
        // compressible, but not trivially so
        (0..len).map(|i| ((i * 31) % 251) as u8 ^ (i / 4096) as u8).collect()
    }

    fn compress_all(data: &[u8]) -> Vec<u8> {
        let mut writer = Writer::new(Vec::new(), Method::Lz4);
        writer.write_all(data).unwrap();
        writer.flush().unwrap();
        writer.into_inner()
    }

    fn decompress_all(data: Vec<u8>) -> Vec<u8> {
        let mut out = Vec::new();
        Reader::new(Cursor::new(data)).read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn frame_header_layout() {
        let data = b"hello hello hello hello";
        let mut out = Vec::new();
        encode_frame(Method::Lz4, data, &mut out);

        assert_eq!(out[16], 0x82);
        let compressed = u32::from_le_bytes(out[17..21].try_into().unwrap()) as usize;
        let uncompressed = u32::from_le_bytes(out[21..25].try_into().unwrap()) as usize;
        assert_eq!(compressed, out.len() - CHECKSUM_SIZE);
        assert_eq!(uncompressed, data.len());
    }

    // CityHash128 v1.0.2, low word first
    const RAW_FRAME: [u8; 31] = [
        0x77, 0x16, 0x3d, 0x02, 0x9d, 0xc4, 0x4b, 0x54, 0x7c, 0x8d, 0x50, 0xd7, 0xba, 0xcd, 0xf0,
        0xfb, 0x02, 0x0f, 0x00, 0x00, 0x00, 0x06, 0x00, 0x00, 0x00, b't', b'u', b'n', b'd', b'r',
        b'a',
    ];

    const LZ4_FRAME: [u8; 31] = [
        0xaf, 0x27, 0x50, 0x49, 0xb2, 0x07, 0xbe, 0x89, 0xc3, 0x41, 0xc7, 0x64, 0x1d, 0xe5, 0x54,
        0x41, 0x82, 0x0f, 0x00, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00, 0x50, b'h', b'e', b'l', b'l',
        b'o',
    ];

    #[test]
    fn frames_match_known_bytes() {
        let mut out = Vec::new();
        encode_frame(Method::None, b"tundra", &mut out);
        assert_eq!(out, RAW_FRAME);

        assert_eq!(decode_frame(&mut Cursor::new(RAW_FRAME)).unwrap(), b"tundra");
        assert_eq!(decode_frame(&mut Cursor::new(LZ4_FRAME)).unwrap(), b"hello");
    }

    #[test]
    fn checksum_halves_are_not_interchangeable() {
        let mut frame = LZ4_FRAME;
        frame[..CHECKSUM_SIZE].rotate_left(8);

        let err = decode_frame(&mut Cursor::new(frame)).unwrap_err();
        let inner = err.into_inner().unwrap().downcast::<FrameError>().unwrap();
        assert!(matches!(*inner, FrameError::Checksum { .. }));
    }

    #[test]
    fn round_trip_around_the_frame_boundary() {
        let lens = [0, 1, 4096, BLOCK_SIZE - 1, BLOCK_SIZE, BLOCK_SIZE + 1, 3 * BLOCK_SIZE + 17];
        for len in lens {
            let data = payload(len);
            let compressed = compress_all(&data);
            assert_eq!(decompress_all(compressed), data, "payload of {len} bytes");
        }
    }

    #[test]
    fn large_payload_spans_multiple_frames() {
        let data = payload(2 * BLOCK_SIZE + 10);
        let compressed = compress_all(&data);

        let mut input = Cursor::new(compressed);
        let mut frames = 0;
        while (input.position() as usize) < input.get_ref().len() {
            let frame = decode_frame(&mut input).unwrap();
            assert!(frame.len() <= BLOCK_SIZE);
            frames += 1;
        }
        assert_eq!(frames, 3);
    }

    #[test]
    fn writes_are_held_until_flush() {
        let mut writer = Writer::new(Vec::new(), Method::Lz4);
        writer.write_all(b"not yet").unwrap();
        assert!(writer.get_ref().is_empty());
        assert_eq!(writer.pending(), 7);

        writer.flush().unwrap();
        assert!(!writer.get_ref().is_empty());
        assert_eq!(writer.pending(), 0);
    }

    #[test]
    fn uncompressed_method_is_accepted() {
        let mut out = Vec::new();
        encode_frame(Method::None, b"raw bytes", &mut out);
        assert_eq!(out[16], 0x02);
        assert_eq!(decode_frame(&mut Cursor::new(out)).unwrap(), b"raw bytes");
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let mut out = Vec::new();
        encode_frame(Method::Lz4, &payload(1000), &mut out);
        let last = out.len() - 1;
        out[last] ^= 0xff;

        let err = decode_frame(&mut Cursor::new(out)).unwrap_err();
        let inner = err.into_inner().unwrap().downcast::<FrameError>().unwrap();
        assert!(matches!(*inner, FrameError::Checksum { .. }));
    }

    #[test]
    fn unknown_method_is_rejected() {
        let mut out = Vec::new();
        encode_frame(Method::Lz4, b"abc", &mut out);
        out[16] = 0x90;

        let err = decode_frame(&mut Cursor::new(out)).unwrap_err();
        let inner = err.into_inner().unwrap().downcast::<FrameError>().unwrap();
        assert!(matches!(*inner, FrameError::UnknownMethod(0x90)));
    }

    #[test]
    fn short_header_is_eof() {
        let mut out = Vec::new();
        out.write_u64(0).unwrap();
        out.write_u8(0x82).unwrap();

        let err = decode_frame(&mut Cursor::new(out)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
