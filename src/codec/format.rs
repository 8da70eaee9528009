//! Typecode-tagged fixed-width arrays: the packing primitive the block
//! header and chunk-list encodings build on.

use crate::io_helper::SliceInputStream;
use crate::Error;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io;

/// One byte naming the element width of a packed array, chosen as the
/// smallest that fits the array's maximum value.
pub const TC_U8: u8 = b'B';
pub const TC_U16: u8 = b'H';
pub const TC_U32: u8 = b'I';
pub const TC_U64: u8 = b'Q';
pub const TC_F32: u8 = b'f';
/// Weights-only: every posting has weight 1.0, no bytes follow.
pub const TC_ALL_ONES: u8 = b'1';
/// Weights-only: no weights at all (field doesn't track them).
pub const TC_ABSENT: u8 = b'0';

pub fn smallest_typecode(max_value: u64) -> u8 {
    if max_value <= std::u8::MAX as u64 {
        TC_U8
    } else if max_value <= std::u16::MAX as u64 {
        TC_U16
    } else if max_value <= std::u32::MAX as u64 {
        TC_U32
    } else {
        TC_U64
    }
}

pub fn typecode_width(tc: u8) -> Result<usize, Error> {
    match tc {
        TC_U8 => Ok(1),
        TC_U16 => Ok(2),
        TC_U32 => Ok(4),
        TC_U64 => Ok(8),
        TC_F32 => Ok(4),
        _ => Err(Error::BadTypecode),
    }
}

pub fn write_typed_array<W: io::Write>(values: &[u64], tc: u8, out: &mut W) -> io::Result<()> {
    for &v in values {
        match tc {
            TC_U8 => out.write_u8(v as u8)?,
            TC_U16 => out.write_u16::<LittleEndian>(v as u16)?,
            TC_U32 => out.write_u32::<LittleEndian>(v as u32)?,
            TC_U64 => out.write_u64::<LittleEndian>(v)?,
            _ => unreachable!("bad typecode reached write_typed_array"),
        }
    }
    Ok(())
}

pub fn read_typed_array(
    input: &mut SliceInputStream,
    tc: u8,
    count: usize,
) -> Result<Vec<u64>, Error> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let v = match tc {
            TC_U8 => input.consume(1)?[0] as u64,
            TC_U16 => u64::from(input.consume(2).map(|b| LittleEndian::read_u16(b))?),
            TC_U32 => u64::from(input.consume(4).map(|b| LittleEndian::read_u32(b))?),
            TC_U64 => input.consume(8).map(|b| LittleEndian::read_u64(b))?,
            _ => return Err(Error::BadTypecode),
        };
        out.push(v);
    }
    Ok(out)
}

pub fn write_f32_array<W: io::Write>(values: &[f32], out: &mut W) -> io::Result<()> {
    for &v in values {
        out.write_f32::<LittleEndian>(v)?;
    }
    Ok(())
}

pub fn read_f32_array(input: &mut SliceInputStream, count: usize) -> Result<Vec<f32>, Error> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let bytes = input.consume(4)?;
        out.push(LittleEndian::read_f32(bytes));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chooses_smallest_fit() {
        assert_eq!(TC_U8, smallest_typecode(255));
        assert_eq!(TC_U16, smallest_typecode(256));
        assert_eq!(TC_U32, smallest_typecode(70_000));
        assert_eq!(TC_U64, smallest_typecode(1u64 << 40));
    }

    #[test]
    fn typed_array_round_trip() {
        let values: Vec<u64> = vec![1, 2, 3, 70_000, 5];
        let tc = smallest_typecode(*values.iter().max().unwrap());
        let mut buf = Vec::new();
        write_typed_array(&values, tc, &mut buf).unwrap();
        let mut stream = SliceInputStream::new(&buf);
        let back = read_typed_array(&mut stream, tc, values.len()).unwrap();
        assert_eq!(values, back);
    }
}
