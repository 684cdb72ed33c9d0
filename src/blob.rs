//! Fixed-width binary encoder and cursor decoder for schedule blobs.
//!
//! Everything the tool persists (pieces blocks, delta lists, the snapshot
//! file) goes through [`BlobWriter`] and comes back through [`BlobReader`].
//! All integers are big-endian and unpadded; strings are length-prefixed with
//! a single byte.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// A value does not fit the width it was asked to encode into. Checked
    /// before any byte is written, so a failed append leaves the buffer
    /// untouched.
    #[error("value {value} out of range for {width}")]
    Range { width: &'static str, value: i64 },

    /// A read would run past the end of the buffer.
    #[error("truncated blob: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
}

/// Append-only byte buffer with fixed-width primitives.
#[derive(Debug, Default, Clone)]
pub struct BlobWriter {
    buf: Vec<u8>,
}

impl BlobWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a big-endian 4-byte two's-complement integer.
    pub fn append_int32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Appends a big-endian 2-byte unsigned integer.
    ///
    /// # Errors
    ///
    /// [`CodecError::Range`] if `v` exceeds 65535; nothing is written.
    pub fn append_uint16(&mut self, v: u32) -> Result<(), CodecError> {
        let v = u16::try_from(v).map_err(|_| CodecError::Range {
            width: "uint16",
            value: i64::from(v),
        })?;
        self.buf.extend_from_slice(&v.to_be_bytes());
        Ok(())
    }

    /// Appends a single unsigned byte.
    ///
    /// # Errors
    ///
    /// [`CodecError::Range`] if `v` exceeds 255; nothing is written.
    pub fn append_byte(&mut self, v: u32) -> Result<(), CodecError> {
        let v = u8::try_from(v).map_err(|_| CodecError::Range {
            width: "byte",
            value: i64::from(v),
        })?;
        self.buf.push(v);
        Ok(())
    }

    /// Appends a 1-byte length prefix followed by the raw bytes.
    ///
    /// # Errors
    ///
    /// [`CodecError::Range`] if `bytes` is longer than 255; nothing is
    /// written.
    pub fn append_length_prefixed_bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        let len = u8::try_from(bytes.len()).map_err(|_| CodecError::Range {
            width: "length prefix",
            value: bytes.len() as i64,
        })?;
        self.buf.push(len);
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Appends `values.len()` as an int32 followed by each element as int32.
    /// Used to store numeric diff lists.
    pub fn append_int32_array(&mut self, values: &[i32]) {
        self.append_int32(values.len() as i32);
        for v in values {
            self.append_int32(*v);
        }
    }

    /// Renders the buffer as a hex string wrapped `X'...'` for embedding in
    /// generated SQL statements.
    pub fn to_blob_literal(&self) -> String {
        format!("X'{}'", hex::encode(&self.buf))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Cursor over an existing byte buffer; reads advance by the fixed width of
/// each primitive.
#[derive(Debug)]
pub struct BlobReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BlobReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let remaining = self.buf.len() - self.pos;
        if n > remaining {
            return Err(CodecError::Truncated {
                needed: n,
                remaining,
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_int32(&mut self) -> Result<i32, CodecError> {
        let bytes = self.take(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_uint16(&mut self) -> Result<u16, CodecError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_byte(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    /// Reads a 1-byte length prefix then that many bytes.
    pub fn read_length_prefixed_bytes(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.read_byte()? as usize;
        self.take(len)
    }

    /// Reads an int32 element count followed by that many int32 values.
    ///
    /// # Errors
    ///
    /// [`CodecError::Range`] on a negative count, [`CodecError::Truncated`]
    /// if the buffer ends before the last element.
    pub fn read_int32_array(&mut self) -> Result<Vec<i32>, CodecError> {
        let len = self.read_int32()?;
        let len = usize::try_from(len).map_err(|_| CodecError::Range {
            width: "array length",
            value: i64::from(len),
        })?;
        let mut values = Vec::with_capacity(len.min(self.remaining() / 4));
        for _ in 0..len {
            values.push(self.read_int32()?);
        }
        Ok(values)
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn at_end(&self) -> bool {
        self.pos == self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int32_round_trip() {
        let mut w = BlobWriter::new();
        w.append_int32(3);
        w.append_int32(-4);
        w.append_int32(i32::MAX);
        w.append_int32(i32::MIN);

        let mut r = BlobReader::new(w.as_bytes());
        assert_eq!(r.read_int32().unwrap(), 3);
        assert_eq!(r.read_int32().unwrap(), -4);
        assert_eq!(r.read_int32().unwrap(), i32::MAX);
        assert_eq!(r.read_int32().unwrap(), i32::MIN);
        assert!(r.at_end());
    }

    #[test]
    fn test_int32_is_big_endian() {
        let mut w = BlobWriter::new();
        w.append_int32(1);
        assert_eq!(w.as_bytes(), &[0, 0, 0, 1]);
    }

    #[test]
    fn test_uint16_round_trip_and_range() {
        let mut w = BlobWriter::new();
        w.append_uint16(0).unwrap();
        w.append_uint16(65535).unwrap();

        // Out-of-range value must leave the buffer untouched
        let before = w.len();
        assert!(matches!(
            w.append_uint16(65536),
            Err(CodecError::Range { .. })
        ));
        assert_eq!(w.len(), before);

        let mut r = BlobReader::new(w.as_bytes());
        assert_eq!(r.read_uint16().unwrap(), 0);
        assert_eq!(r.read_uint16().unwrap(), 65535);
    }

    #[test]
    fn test_byte_round_trip_and_range() {
        let mut w = BlobWriter::new();
        w.append_byte(0).unwrap();
        w.append_byte(255).unwrap();

        let before = w.len();
        assert!(matches!(w.append_byte(256), Err(CodecError::Range { .. })));
        assert_eq!(w.len(), before);

        let mut r = BlobReader::new(w.as_bytes());
        assert_eq!(r.read_byte().unwrap(), 0);
        assert_eq!(r.read_byte().unwrap(), 255);
    }

    #[test]
    fn test_length_prefixed_bytes_round_trip() {
        let mut w = BlobWriter::new();
        w.append_length_prefixed_bytes(b"place-sstat").unwrap();
        w.append_length_prefixed_bytes(b"").unwrap();

        let mut r = BlobReader::new(w.as_bytes());
        assert_eq!(r.read_length_prefixed_bytes().unwrap(), b"place-sstat");
        assert_eq!(r.read_length_prefixed_bytes().unwrap(), b"");
        assert!(r.at_end());
    }

    #[test]
    fn test_length_prefixed_bytes_rejects_long_input() {
        let mut w = BlobWriter::new();
        let long = vec![0u8; 256];
        assert!(matches!(
            w.append_length_prefixed_bytes(&long),
            Err(CodecError::Range { .. })
        ));
        assert!(w.is_empty());

        // 255 bytes is the maximum and must succeed
        w.append_length_prefixed_bytes(&long[..255]).unwrap();
        assert_eq!(w.len(), 256);
    }

    #[test]
    fn test_int32_array_round_trip() {
        let mut w = BlobWriter::new();
        w.append_int32_array(&[60, -120, 0]);
        w.append_int32_array(&[]);

        let mut r = BlobReader::new(w.as_bytes());
        assert_eq!(r.read_int32_array().unwrap(), vec![60, -120, 0]);
        assert_eq!(r.read_int32_array().unwrap(), Vec::<i32>::new());
    }

    #[test]
    fn test_reads_past_end_are_truncated_errors() {
        let mut r = BlobReader::new(&[0, 1]);
        assert!(matches!(
            r.read_int32(),
            Err(CodecError::Truncated {
                needed: 4,
                remaining: 2
            })
        ));

        // The failed read must not advance the cursor
        assert_eq!(r.read_uint16().unwrap(), 1);
        assert!(matches!(r.read_byte(), Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn test_truncated_length_prefixed_bytes() {
        // Prefix claims 5 bytes, only 2 present
        let mut r = BlobReader::new(&[5, b'a', b'b']);
        assert!(matches!(
            r.read_length_prefixed_bytes(),
            Err(CodecError::Truncated {
                needed: 5,
                remaining: 2
            })
        ));
    }

    #[test]
    fn test_negative_array_length_is_rejected() {
        let mut w = BlobWriter::new();
        w.append_int32(-1);
        let mut r = BlobReader::new(w.as_bytes());
        assert!(matches!(
            r.read_int32_array(),
            Err(CodecError::Range { .. })
        ));
    }

    #[test]
    fn test_blob_literal_format() {
        let mut w = BlobWriter::new();
        w.append_int32(3);
        assert_eq!(w.to_blob_literal(), "X'00000003'");
        assert_eq!(BlobWriter::new().to_blob_literal(), "X''");
    }
}
