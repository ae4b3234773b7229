//! Primitive value codec.
//!
//! The wire format is little-endian for every fixed-width value. Lengths and small control
//! values use an unsigned LEB128 "varint" (7 data bits per byte, high bit set on every byte but
//! the last). Strings are a varint byte length followed by the raw UTF-8 bytes.
//!
//! [`Encoder`] and [`Decoder`] are blanket-implemented for every [`Write`] and [`Read`], so the
//! same calls work on a socket stream, a compressed frame stream or a plain `Vec<u8>`/`Cursor`
//! in tests. The codec knows nothing about blocks or packets.
use std::io::{self, Read, Write};

/// A varint never needs more than 10 bytes for a `u64`.
const MAX_VARINT_LEN: usize = 10;

macro_rules! put_fixed {
    ($($name:ident: $t:ty),* $(,)?) => {
        $(
            fn $name(&mut self, v: $t) -> io::Result<()> {
                self.write_all(&v.to_le_bytes())
            }
        )*
    };
}

macro_rules! read_fixed {
    ($($name:ident: $t:ty),* $(,)?) => {
        $(
            fn $name(&mut self) -> io::Result<$t> {
                let mut buf = [0_u8; size_of::<$t>()];
                self.read_exact(&mut buf)?;
                Ok(<$t>::from_le_bytes(buf))
            }
        )*
    };
}

pub trait Encoder: Write {
    put_fixed! {
        write_u8: u8,
        write_u16: u16,
        write_u32: u32,
        write_u64: u64,
        write_i8: i8,
        write_i16: i16,
        write_i32: i32,
        write_i64: i64,
        write_f32: f32,
        write_f64: f64,
    }

    fn write_bool(&mut self, v: bool) -> io::Result<()> {
        self.write_u8(v as u8)
    }

    fn write_uvarint(&mut self, mut v: u64) -> io::Result<()> {
        let mut buf = [0_u8; MAX_VARINT_LEN];
        let mut i = 0;
        while v >= 0x80 {
            buf[i] = (v as u8) | 0x80;
            v >>= 7;
            i += 1;
        }
        buf[i] = v as u8;
        self.write_all(&buf[..=i])
    }

    fn write_bytes(&mut self, v: &[u8]) -> io::Result<()> {
        self.write_uvarint(v.len() as u64)?;
        self.write_all(v)
    }

    fn write_string(&mut self, v: &str) -> io::Result<()> {
        self.write_bytes(v.as_bytes())
    }
}

impl<W: Write + ?Sized> Encoder for W {}

pub trait Decoder: Read {
    read_fixed! {
        read_u8: u8,
        read_u16: u16,
        read_u32: u32,
        read_u64: u64,
        read_i8: i8,
        read_i16: i16,
        read_i32: i32,
        read_i64: i64,
        read_f32: f32,
        read_f64: f64,
    }

    fn read_bool(&mut self) -> io::Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    fn read_uvarint(&mut self) -> io::Result<u64> {
        let mut v = 0_u64;
        for i in 0..MAX_VARINT_LEN {
            let b = self.read_u8()?;
            if i == MAX_VARINT_LEN - 1 && b > 1 {
                break;
            }
            v |= ((b & 0x7f) as u64) << (7 * i);
            if b < 0x80 {
                return Ok(v);
            }
        }
        Err(io::Error::new(io::ErrorKind::InvalidData, "varint overflows u64"))
    }

    /// Reads exactly `len` bytes. The buffer grows with the data actually received, so a corrupt
    /// length cannot force a huge allocation up front.
    fn read_fixed_bytes(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(len.min(64 * 1024));
        let read = self.take(len as u64).read_to_end(&mut buf)?;
        if read != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("short read: wanted {len} bytes, got {read}"),
            ));
        }
        Ok(buf)
    }

    fn read_bytes(&mut self) -> io::Result<Vec<u8>> {
        let len = self.read_uvarint()?;
        let len = usize::try_from(len).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidData, "string length overflows usize")
        })?;
        self.read_fixed_bytes(len)
    }

    fn read_string(&mut self) -> io::Result<String> {
        String::from_utf8(self.read_bytes()?)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl<R: Read + ?Sized> Decoder for R {}
