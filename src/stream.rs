//! Little-endian read/write primitives for persisted simulation streams.
//!
//! Every array is stored as a `u32` element count followed by its elements. The
//! reading side always knows how many elements to expect, so a declared count that
//! disagrees with the caller's expectation is reported as corrupt state before
//! anything is allocated.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::error::{SimError, SimResult};

const MAX_BLOB_LEN: u64 = 1 << 30;

pub trait Element: Sized + Copy + Default {
    fn write_to<W: Write>(self, w: &mut W) -> io::Result<()>;
    fn read_into<R: Read>(r: &mut R, buf: &mut [Self]) -> io::Result<()>;
}

impl Element for u8 {
    fn write_to<W: Write>(self, w: &mut W) -> io::Result<()> {
        w.write_u8(self)
    }

    fn read_into<R: Read>(r: &mut R, buf: &mut [Self]) -> io::Result<()> {
        r.read_exact(buf)
    }
}

impl Element for u32 {
    fn write_to<W: Write>(self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self)
    }

    fn read_into<R: Read>(r: &mut R, buf: &mut [Self]) -> io::Result<()> {
        r.read_u32_into::<LittleEndian>(buf)
    }
}

impl Element for f32 {
    fn write_to<W: Write>(self, w: &mut W) -> io::Result<()> {
        w.write_f32::<LittleEndian>(self)
    }

    fn read_into<R: Read>(r: &mut R, buf: &mut [Self]) -> io::Result<()> {
        r.read_f32_into::<LittleEndian>(buf)
    }
}

fn map_read_err(err: io::Error, what: &str) -> SimError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        SimError::corrupt(format!("stream ended while reading {}", what))
    } else {
        SimError::corrupt(format!("failed to read {}: {}", what, err))
    }
}

pub fn write_u8<W: Write>(w: &mut W, value: u8) -> io::Result<()> {
    w.write_u8(value)
}

pub fn read_u8<R: Read>(r: &mut R, what: &str) -> SimResult<u8> {
    r.read_u8().map_err(|err| map_read_err(err, what))
}

pub fn write_u32<W: Write>(w: &mut W, value: u32) -> io::Result<()> {
    w.write_u32::<LittleEndian>(value)
}

pub fn read_u32<R: Read>(r: &mut R, what: &str) -> SimResult<u32> {
    r.read_u32::<LittleEndian>()
        .map_err(|err| map_read_err(err, what))
}

pub fn write_f32<W: Write>(w: &mut W, value: f32) -> io::Result<()> {
    w.write_f32::<LittleEndian>(value)
}

pub fn read_f32<R: Read>(r: &mut R, what: &str) -> SimResult<f32> {
    r.read_f32::<LittleEndian>()
        .map_err(|err| map_read_err(err, what))
}

pub fn write_vec<W: Write, T: Element>(w: &mut W, values: &[T]) -> io::Result<()> {
    let len = u32::try_from(values.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "array too long to persist"))?;
    write_u32(w, len)?;
    for value in values {
        value.write_to(w)?;
    }
    Ok(())
}

pub fn read_vec<R: Read, T: Element>(
    r: &mut R,
    expected_len: usize,
    what: &str,
) -> SimResult<Vec<T>> {
    let declared_len = read_u32(r, what)? as usize;
    if declared_len != expected_len {
        return Err(SimError::corrupt(format!(
            "{} declares {} elements, expected {}",
            what, declared_len, expected_len
        )));
    }

    let mut values = vec![T::default(); declared_len];
    T::read_into(r, &mut values).map_err(|err| map_read_err(err, what))?;
    Ok(values)
}

pub fn read_vec_into<R: Read, T: Element>(
    r: &mut R,
    values: &mut Vec<T>,
    what: &str,
) -> SimResult<()> {
    *values = read_vec(r, values.len(), what)?;
    Ok(())
}

pub fn write_blob<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    w.write_u64::<LittleEndian>(bytes.len() as u64)?;
    w.write_all(bytes)
}

pub fn read_blob<R: Read>(r: &mut R, what: &str) -> SimResult<Vec<u8>> {
    let len = r
        .read_u64::<LittleEndian>()
        .map_err(|err| map_read_err(err, what))?;

    if len > MAX_BLOB_LEN {
        return Err(SimError::corrupt(format!(
            "{} declares an implausible length of {} bytes",
            what, len
        )));
    }

    let mut bytes = vec![0u8; len as usize];
    r.read_exact(&mut bytes)
        .map_err(|err| map_read_err(err, what))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::assert_approx_eq_slice;
    use std::io::Cursor;

    #[test]
    fn counted_arrays() {
        let mut buf = Vec::new();
        write_vec(&mut buf, &[1u32, 2, 3]).unwrap();
        write_vec(&mut buf, &[0.5f32, -1.25]).unwrap();
        write_vec(&mut buf, &[7u8]).unwrap();

        assert_eq!(buf.len(), 4 + 12 + 4 + 8 + 4 + 1);

        let mut cursor = Cursor::new(buf);
        let ints: Vec<u32> = read_vec(&mut cursor, 3, "ints").unwrap();
        let floats: Vec<f32> = read_vec(&mut cursor, 2, "floats").unwrap();
        let bytes: Vec<u8> = read_vec(&mut cursor, 1, "bytes").unwrap();

        assert_eq!(ints, [1, 2, 3]);
        assert_approx_eq_slice(&floats, &[0.5, -1.25]);
        assert_eq!(bytes, [7]);
    }

    #[test]
    fn length_mismatch_is_corrupt() {
        let mut buf = Vec::new();
        write_vec(&mut buf, &[1u32, 2, 3]).unwrap();

        let result: SimResult<Vec<u32>> = read_vec(&mut Cursor::new(buf), 4, "weights");

        match result {
            Err(SimError::CorruptState(msg)) => {
                assert_eq!(msg, "weights declares 3 elements, expected 4")
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn truncation_is_corrupt() {
        let mut buf = Vec::new();
        write_vec(&mut buf, &[1.0f32, 2.0, 3.0]).unwrap();
        buf.truncate(buf.len() - 2);

        let result: SimResult<Vec<f32>> = read_vec(&mut Cursor::new(buf), 3, "voltages");

        match result {
            Err(SimError::CorruptState(msg)) => {
                assert_eq!(msg, "stream ended while reading voltages")
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn blob() {
        let mut buf = Vec::new();
        write_blob(&mut buf, b"{\"a\":1}").unwrap();
        let bytes = read_blob(&mut Cursor::new(buf), "params").unwrap();
        assert_eq!(bytes, b"{\"a\":1}");
    }
}
