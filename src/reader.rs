//! Little-endian binary stream primitives for the model file formats.
//!
//! All three model formats (cascade, landmark, identification graph) are
//! self-delimited streams of 32-bit integers and floats with no magic
//! number. Short reads surface as [`Error::Io`]; implausible sentinel
//! counts surface as [`Error::InvalidModel`].

use std::io::{Read, Write};

use crate::error::{Error, Result};

/// Upper bound applied to every count read from a model stream. A count
/// beyond this is treated as a corrupt file rather than an allocation size.
const MAX_SANE_COUNT: i32 = 1 << 28;

/// Reader wrapper decoding little-endian primitives.
pub struct BinReader<R: Read> {
    inner: R,
}

impl<R: Read> BinReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.inner.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        let mut buf = [0u8; 4];
        self.inner.read_exact(&mut buf)?;
        Ok(f32::from_le_bytes(buf))
    }

    /// Read a count that must be strictly positive and plausibly sized.
    pub fn read_count(&mut self, what: &str) -> Result<usize> {
        let value = self.read_i32()?;
        if value <= 0 || value > MAX_SANE_COUNT {
            return Err(Error::InvalidModel(format!(
                "implausible {}: {}",
                what, value
            )));
        }
        Ok(value as usize)
    }

    pub fn read_i32_vec(&mut self, len: usize) -> Result<Vec<i32>> {
        let mut v = Vec::with_capacity(len);
        for _ in 0..len {
            v.push(self.read_i32()?);
        }
        Ok(v)
    }

    pub fn read_f32_vec(&mut self, len: usize) -> Result<Vec<f32>> {
        let mut v = Vec::with_capacity(len);
        for _ in 0..len {
            v.push(self.read_f32()?);
        }
        Ok(v)
    }

    /// Read a length-prefixed byte string (i32 length, then bytes).
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_i32()?;
        if len < 0 || len > 256 {
            return Err(Error::InvalidModel(format!(
                "implausible string length: {}",
                len
            )));
        }
        let mut buf = vec![0u8; len as usize];
        self.inner.read_exact(&mut buf)?;
        String::from_utf8(buf).map_err(|e| Error::InvalidModel(format!("invalid string: {}", e)))
    }
}

/// Writer wrapper encoding little-endian primitives; the mirror image of
/// [`BinReader`], used by the graph serializer and by tests to synthesize
/// model streams.
pub struct BinWriter<W: Write> {
    inner: W,
}

impl<W: Write> BinWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.inner.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.inner.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    pub fn write_f32_slice(&mut self, values: &[f32]) -> Result<()> {
        for v in values {
            self.write_f32(*v)?;
        }
        Ok(())
    }

    pub fn write_string(&mut self, s: &str) -> Result<()> {
        self.write_i32(s.len() as i32)?;
        self.inner.write_all(s.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_round_trip() {
        let mut buf = Vec::new();
        {
            let mut w = BinWriter::new(&mut buf);
            w.write_i32(-7).unwrap();
            w.write_f32(1.5).unwrap();
            w.write_string("Conv").unwrap();
        }
        let mut r = BinReader::new(buf.as_slice());
        assert_eq!(r.read_i32().unwrap(), -7);
        assert_eq!(r.read_f32().unwrap(), 1.5);
        assert_eq!(r.read_string().unwrap(), "Conv");
    }

    #[test]
    fn short_read_is_io_error() {
        let mut r = BinReader::new(&[1u8, 2][..]);
        match r.read_i32() {
            Err(Error::Io(_)) => {}
            other => panic!("expected Io error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn non_positive_count_is_invalid_model() {
        let mut buf = Vec::new();
        BinWriter::new(&mut buf).write_i32(0).unwrap();
        let mut r = BinReader::new(buf.as_slice());
        assert!(matches!(
            r.read_count("stages"),
            Err(Error::InvalidModel(_))
        ));
    }
}
