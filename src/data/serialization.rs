use byteorder::{BigEndian as BE, ByteOrder as BO, LittleEndian as LE};
use serde::{Deserialize, Serialize};

use crate::error::{QcError, Result};

// ---------------------------------------------------------------------------
// Byte order
// ---------------------------------------------------------------------------

/// Byte order requested by the caller.
///
/// `Network` is always big-endian. `Native` is resolved to the host order
/// once, when a [`Deserializer`] or [`Serializer`] is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    BigEndian,
    LittleEndian,
    Native,
    Network,
}

/// Concrete byte order after `Native` / `Network` have been resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

impl ByteOrder {
    pub fn resolve(self) -> Endian {
        match self {
            ByteOrder::BigEndian | ByteOrder::Network => Endian::Big,
            ByteOrder::LittleEndian => Endian::Little,
            ByteOrder::Native => {
                if cfg!(target_endian = "big") {
                    Endian::Big
                } else {
                    Endian::Little
                }
            }
        }
    }
}

/// Width of the length field in front of a length-prefixed string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthPrefix {
    U16,
    U32,
}

impl LengthPrefix {
    fn width(self) -> usize {
        match self {
            LengthPrefix::U16 => 2,
            LengthPrefix::U32 => 4,
        }
    }
}

// ---------------------------------------------------------------------------
// Deserializer – cursor over a borrowed byte buffer
// ---------------------------------------------------------------------------

macro_rules! unpack_primitive {
    ($(#[$doc:meta])* $name:ident, $ty:ty, $width:expr, $read:ident) => {
        $(#[$doc])*
        pub fn $name(&mut self) -> Result<$ty> {
            let bytes = self.take($width)?;
            Ok(match self.endian {
                Endian::Big => BE::$read(bytes),
                Endian::Little => LE::$read(bytes),
            })
        }
    };
}

/// Sequential decoder for primitive values.
///
/// The cursor only moves on success: a failed unpack leaves it where it was.
/// Not meant to be shared between threads; give each decode its own instance.
#[derive(Debug, Clone)]
pub struct Deserializer<'a> {
    buf: &'a [u8],
    offset: usize,
    endian: Endian,
}

impl<'a> Deserializer<'a> {
    pub fn new(buf: &'a [u8], order: ByteOrder) -> Self {
        Self {
            buf,
            offset: 0,
            endian: order.resolve(),
        }
    }

    /// Rewind the cursor to the start of the buffer.
    pub fn reset(&mut self) {
        self.offset = 0;
    }

    pub fn position(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    fn peek(&self, needed: usize) -> Result<&'a [u8]> {
        if needed > self.remaining() {
            return Err(QcError::OutOfBounds {
                offset: self.offset,
                needed,
                remaining: self.remaining(),
            });
        }
        Ok(&self.buf[self.offset..self.offset + needed])
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8]> {
        let bytes = self.peek(needed)?;
        self.offset += needed;
        Ok(bytes)
    }

    pub fn unpack_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn unpack_i8(&mut self) -> Result<i8> {
        Ok(self.take(1)?[0] as i8)
    }

    /// One byte; any nonzero value is `true`.
    pub fn unpack_bool(&mut self) -> Result<bool> {
        Ok(self.take(1)?[0] != 0)
    }

    /// One byte interpreted as a Latin-1 character.
    pub fn unpack_char(&mut self) -> Result<char> {
        Ok(self.take(1)?[0] as char)
    }

    unpack_primitive!(unpack_u16, u16, 2, read_u16);
    unpack_primitive!(unpack_i16, i16, 2, read_i16);
    unpack_primitive!(unpack_u32, u32, 4, read_u32);
    unpack_primitive!(unpack_i32, i32, 4, read_i32);
    unpack_primitive!(unpack_u64, u64, 8, read_u64);
    unpack_primitive!(unpack_i64, i64, 8, read_i64);
    unpack_primitive!(
        /// IEEE-754 single precision.
        unpack_f32, f32, 4, read_f32
    );
    unpack_primitive!(
        /// IEEE-754 double precision.
        unpack_f64, f64, 8, read_f64
    );

    /// Raw block of `n` bytes.
    pub fn unpack_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    /// `n` consecutive `f32` values.
    pub fn unpack_f32_array(&mut self, n: usize) -> Result<Vec<f32>> {
        let needed = n.checked_mul(4).ok_or_else(|| {
            QcError::Format(format!("f32 array of {n} elements overflows usize"))
        })?;
        let bytes = self.peek(needed)?;
        let mut out = vec![0.0f32; n];
        match self.endian {
            Endian::Big => BE::read_f32_into(bytes, &mut out),
            Endian::Little => LE::read_f32_into(bytes, &mut out),
        }
        self.offset += needed;
        Ok(out)
    }

    /// Fixed-width text field of `n` bytes (e.g. a four character site code).
    pub fn unpack_fixed_string(&mut self, n: usize) -> Result<String> {
        let bytes = self.peek(n)?;
        let text = decode_text(bytes)?;
        self.offset += n;
        Ok(text)
    }

    /// Length field in the configured byte order, followed by that many bytes of text.
    pub fn unpack_string(&mut self, prefix: LengthPrefix) -> Result<String> {
        let head = self.peek(prefix.width())?;
        let len = match (prefix, self.endian) {
            (LengthPrefix::U16, Endian::Big) => BE::read_u16(head) as usize,
            (LengthPrefix::U16, Endian::Little) => LE::read_u16(head) as usize,
            (LengthPrefix::U32, Endian::Big) => BE::read_u32(head) as usize,
            (LengthPrefix::U32, Endian::Little) => LE::read_u32(head) as usize,
        };
        let total = prefix.width() + len;
        let bytes = self.peek(total)?;
        let text = decode_text(&bytes[prefix.width()..])?;
        self.offset += total;
        Ok(text)
    }
}

fn decode_text(bytes: &[u8]) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|e| QcError::Format(format!("invalid text field: {e}")))
}

// ---------------------------------------------------------------------------
// Serializer – the write-side mirror of `Deserializer`
// ---------------------------------------------------------------------------

macro_rules! pack_primitive {
    ($name:ident, $ty:ty, $width:expr, $write:ident) => {
        pub fn $name(&mut self, value: $ty) {
            let mut tmp = [0u8; $width];
            match self.endian {
                Endian::Big => BE::$write(&mut tmp, value),
                Endian::Little => LE::$write(&mut tmp, value),
            }
            self.buf.extend_from_slice(&tmp);
        }
    };
}

/// Growable encoder producing bytes in a fixed byte order.
#[derive(Debug, Clone)]
pub struct Serializer {
    buf: Vec<u8>,
    endian: Endian,
}

impl Serializer {
    pub fn new(order: ByteOrder) -> Self {
        Self {
            buf: Vec::new(),
            endian: order.resolve(),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn pack_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn pack_i8(&mut self, value: i8) {
        self.buf.push(value as u8);
    }

    pub fn pack_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    pub fn pack_char(&mut self, value: char) -> Result<()> {
        let byte = u8::try_from(u32::from(value))
            .map_err(|_| QcError::Format(format!("character {value:?} does not fit in one byte")))?;
        self.buf.push(byte);
        Ok(())
    }

    pack_primitive!(pack_u16, u16, 2, write_u16);
    pack_primitive!(pack_i16, i16, 2, write_i16);
    pack_primitive!(pack_u32, u32, 4, write_u32);
    pack_primitive!(pack_i32, i32, 4, write_i32);
    pack_primitive!(pack_u64, u64, 8, write_u64);
    pack_primitive!(pack_i64, i64, 8, write_i64);
    pack_primitive!(pack_f32, f32, 4, write_f32);
    pack_primitive!(pack_f64, f64, 8, write_f64);

    pub fn pack_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn pack_f32_array(&mut self, values: &[f32]) {
        for &v in values {
            self.pack_f32(v);
        }
    }

    /// Text that must occupy exactly `n` bytes.
    pub fn pack_fixed_string(&mut self, text: &str, n: usize) -> Result<()> {
        if text.len() != n {
            return Err(QcError::Format(format!(
                "field {text:?} is {} bytes, expected {n}",
                text.len()
            )));
        }
        self.buf.extend_from_slice(text.as_bytes());
        Ok(())
    }

    pub fn pack_string(&mut self, prefix: LengthPrefix, text: &str) -> Result<()> {
        let len = text.len();
        match prefix {
            LengthPrefix::U16 => {
                let len = u16::try_from(len)
                    .map_err(|_| QcError::Format(format!("string of {len} bytes exceeds u16 prefix")))?;
                self.pack_u16(len);
            }
            LengthPrefix::U32 => {
                let len = u32::try_from(len)
                    .map_err(|_| QcError::Format(format!("string of {len} bytes exceeds u32 prefix")))?;
                self.pack_u32(len);
            }
        }
        self.buf.extend_from_slice(text.as_bytes());
        Ok(())
    }
}
