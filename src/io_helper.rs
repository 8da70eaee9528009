//! Zero-copy byte-stream helpers shared by the posting codec and term table:
//! an `mmap`-backed reader (`ArcInputStream`), a borrowed-slice reader
//! (`SliceInputStream`), and the Galago/Indri-style vbyte convention (highest
//! bit set means stop).

use crate::Error;
use memmap::{Mmap, MmapOptions};
use std::convert::TryInto;
use std::path::Path;
use std::sync::Arc;
use std::{cmp::Ordering, str};
use std::{fmt, fs, io};

pub fn open_mmap_file(path: &Path) -> Result<Arc<Mmap>, Error> {
    let file = fs::File::open(path)?;
    let opts = MmapOptions::new();
    let mmap: Mmap = unsafe { opts.map(&file)? };
    Ok(Arc::new(mmap))
}

#[derive(Hash, Eq, PartialEq, Clone)]
pub struct Bytes {
    pub data: Box<[u8]>,
}
impl Bytes {
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
    pub fn from_slice(input: &[u8]) -> Self {
        Self {
            data: input.to_vec().into_boxed_slice(),
        }
    }
    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_ref()
    }
    pub fn cmp(&self, rhs: &[u8]) -> Ordering {
        self.data.as_ref().cmp(rhs)
    }
    pub fn stream(&self) -> SliceInputStream {
        SliceInputStream::new(self.as_bytes())
    }
}
impl fmt::Debug for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Ok(readable) = str::from_utf8(&self.data) {
            write!(f, "{:?}", readable)
        } else {
            write!(f, "{:?}", &self.data)
        }
    }
}

pub trait InputStream {
    fn tell(&self) -> usize;
    fn eof(&self) -> bool;
    fn advance(&mut self, n: usize) -> Result<&[u8], Error>;
    fn get(&mut self) -> Result<u8, Error>;
}

pub trait DataInputStream {
    fn read_vbyte(&mut self) -> Result<u64, Error>;
    fn read_u64(&mut self) -> Result<u64, Error>;
    fn read_u32(&mut self) -> Result<u32, Error>;
    fn read_u16(&mut self) -> Result<u16, Error>;
    fn read_u8(&mut self) -> Result<u8, Error>;
    fn read_f32(&mut self) -> Result<f32, Error>;
    fn read_i32(&mut self) -> Result<i32, Error>;
}

impl<I> DataInputStream for I
where
    I: InputStream,
{
    /// Galago/Indri's vbyte: highest-bit set means stop.
    fn read_vbyte(&mut self) -> Result<u64, Error> {
        let mut result: u64 = 0;
        let mut bit_p: u8 = 0;
        while !self.eof() {
            let byte = self.get()? as u64;
            if byte & 0x80 > 0 {
                result |= (byte & 0x7f) << bit_p;
                return Ok(result);
            }
            result |= byte << bit_p;
            bit_p += 7;
        }
        Err(Error::Truncated)
    }
    fn read_u64(&mut self) -> Result<u64, Error> {
        let exact = self.advance(8)?;
        Ok(u64::from_be_bytes(exact.try_into().unwrap()))
    }
    fn read_u32(&mut self) -> Result<u32, Error> {
        let exact = self.advance(4)?;
        Ok(u32::from_be_bytes(exact.try_into().unwrap()))
    }
    fn read_u16(&mut self) -> Result<u16, Error> {
        let exact = self.advance(2)?;
        Ok(u16::from_be_bytes(exact.try_into().unwrap()))
    }
    fn read_u8(&mut self) -> Result<u8, Error> {
        self.get()
    }
    fn read_f32(&mut self) -> Result<f32, Error> {
        let exact = self.advance(4)?;
        Ok(f32::from_be_bytes(exact.try_into().unwrap()))
    }
    fn read_i32(&mut self) -> Result<i32, Error> {
        let exact = self.advance(4)?;
        Ok(i32::from_be_bytes(exact.try_into().unwrap()))
    }
}

/// Zero-Copy InputStream over a borrowed slice.
#[derive(Clone)]
pub struct SliceInputStream<'src> {
    data: &'src [u8],
    position: usize,
}

impl fmt::Debug for SliceInputStream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SliceInputStream[@{}..{}]", self.position, self.data.len())
    }
}

impl<'src> InputStream for SliceInputStream<'src> {
    fn tell(&self) -> usize {
        self.position
    }
    fn eof(&self) -> bool {
        self.position >= self.data.len()
    }
    fn advance(&mut self, n: usize) -> Result<&[u8], Error> {
        self.consume(n)
    }
    fn get(&mut self) -> Result<u8, Error> {
        if self.position >= self.data.len() {
            Err(Error::Truncated)
        } else {
            let result = Ok(self.data[self.position]);
            self.position += 1;
            result
        }
    }
}

impl<'src> SliceInputStream<'src> {
    pub fn new(data: &'src [u8]) -> Self {
        Self { data, position: 0 }
    }
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
    pub fn peek(&self) -> Option<u8> {
        if self.position < self.data.len() {
            Some(self.data[self.position])
        } else {
            None
        }
    }
    pub fn seek(&mut self, position: usize) -> Result<(), Error> {
        self.position = position;
        if self.position <= self.data.len() {
            Ok(())
        } else {
            Err(Error::Truncated)
        }
    }
    #[inline]
    pub fn consume(&mut self, n: usize) -> Result<&'src [u8], Error> {
        let end = self.position + n;
        if end > self.data.len() {
            return Err(Error::Truncated);
        }
        let found = &self.data[self.position..end];
        self.position = end;
        Ok(found)
    }
}

/// Either backing a segment file can have: a live `mmap`, or an owned byte
/// buffer (for `RamStorage`, where there's no file to map).
#[derive(Debug, Clone)]
enum ByteSource {
    Mmap(Arc<Mmap>),
    Owned(Arc<Vec<u8>>),
}

impl std::ops::Deref for ByteSource {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        match self {
            ByteSource::Mmap(m) => m,
            ByteSource::Owned(v) => v,
        }
    }
}

/// Owning, cheaply-cloneable reader over an `mmap`ed file or an in-memory
/// byte buffer (or a slice of either).
#[derive(Debug, Clone)]
pub struct ArcInputStream {
    source: ByteSource,
    start: usize,
    end: usize,
    offset: usize,
}

impl ArcInputStream {
    pub fn from_mmap(source: Arc<Mmap>) -> Self {
        let end = source.len();
        Self { source: ByteSource::Mmap(source), start: 0, end, offset: 0 }
    }
    pub fn from_bytes(source: Arc<Vec<u8>>) -> Self {
        let end = source.len();
        Self { source: ByteSource::Owned(source), start: 0, end, offset: 0 }
    }
    pub fn new(source: Arc<Mmap>, start: usize, end: usize) -> Self {
        Self { source: ByteSource::Mmap(source), start, end, offset: 0 }
    }
    pub fn slice(&self, start: usize, end: usize) -> Self {
        Self {
            source: self.source.clone(),
            start: self.start + start,
            end: self.start + end,
            offset: 0,
        }
    }
    pub fn as_bytes(&self) -> &[u8] {
        &self.source[self.start..self.end]
    }
}

impl InputStream for ArcInputStream {
    fn tell(&self) -> usize {
        self.offset
    }
    fn eof(&self) -> bool {
        self.offset + self.start >= self.end
    }
    fn advance(&mut self, n: usize) -> Result<&[u8], Error> {
        let lhs = self.start + self.offset;
        let rhs = lhs + n;
        self.offset += n;
        if rhs > self.end {
            return Err(Error::Truncated);
        }
        Ok(&self.source[lhs..rhs])
    }
    fn get(&mut self) -> Result<u8, Error> {
        if self.eof() {
            Err(Error::Truncated)
        } else {
            let b = self.source[self.start + self.offset];
            self.offset += 1;
            Ok(b)
        }
    }
}

pub(crate) fn write_vbyte<W: io::Write>(i: u64, out: &mut W) -> io::Result<usize> {
    let mut buf = Vec::with_capacity(10);
    let mut v = i;
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            buf.push(byte | 0x80);
            break;
        } else {
            buf.push(byte);
        }
    }
    out.write_all(&buf)?;
    Ok(buf.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vbyte_round_trip() {
        let values: Vec<u64> = vec![0, 1, 127, 128, 16384, std::u32::MAX as u64, std::u64::MAX >> 1];
        let mut buf = Vec::new();
        for v in &values {
            write_vbyte(*v, &mut buf).unwrap();
        }
        let mut rdr = SliceInputStream::new(&buf);
        for v in &values {
            assert_eq!(*v, rdr.read_vbyte().unwrap());
        }
        assert!(rdr.eof());
    }

    #[test]
    fn fixed_width_round_trip() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&42u32.to_be_bytes());
        buf.extend_from_slice(&7u16.to_be_bytes());
        let mut rdr = SliceInputStream::new(&buf);
        assert_eq!(42, rdr.read_u32().unwrap());
        assert_eq!(7, rdr.read_u16().unwrap());
        assert!(rdr.eof());
    }
}
