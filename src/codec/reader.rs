//! Decode the byte format written by `writer.rs`.

use super::format::*;
use super::ptuple::{Features, Range};
use crate::io_helper::SliceInputStream;
use crate::Error;

enum Shape {
    FastPath { ids_tc: u8, count: usize },
    Full {
        features: Features,
        count: usize,
        ids_tc: u8,
        weights_tc: u8,
        min_len: i32,
        max_len: i32,
        poses_len: i32,
        ranges_len: i32,
        payloads_len: i32,
        header_end: usize,
    },
}

/// A parsed, lazily-decoded posting block. Holds a reference to the raw
/// bytes; per-posting access is computed on demand.
pub struct BlockReader<'a> {
    data: &'a [u8],
    shape: Shape,
}

impl<'a> BlockReader<'a> {
    pub fn parse(data: &'a [u8]) -> Result<BlockReader<'a>, Error> {
        if data.is_empty() {
            return Err(Error::Truncated);
        }
        let flags = data[0];
        if flags & Features::FAST_PATH.bits() != 0 {
            let idx = (flags >> 5) & 0b11;
            let count = ((flags & 0b0001_1111) as usize) + 1;
            let ids_tc = match idx {
                0 => TC_U8,
                1 => TC_U16,
                2 => TC_U32,
                _ => TC_U64,
            };
            return Ok(BlockReader {
                data,
                shape: Shape::FastPath { ids_tc, count },
            });
        }

        let mut s = SliceInputStream::new(data);
        let flags = s.consume(1)?[0];
        let features = Features::from_bits(flags);
        let count = u16::from_le_bytes(s.consume(2)?.try_into().unwrap()) as usize;
        let ids_tc = s.consume(1)?[0];
        let weights_tc = s.consume(1)?[0];
        let min_len = i32::from_le_bytes(s.consume(4)?.try_into().unwrap());
        let max_len = i32::from_le_bytes(s.consume(4)?.try_into().unwrap());
        let poses_len = i32::from_le_bytes(s.consume(4)?.try_into().unwrap());
        let ranges_len = i32::from_le_bytes(s.consume(4)?.try_into().unwrap());
        let payloads_len = i32::from_le_bytes(s.consume(4)?.try_into().unwrap());
        let header_end = s.tell();

        Ok(BlockReader {
            data,
            shape: Shape::Full {
                features,
                count,
                ids_tc,
                weights_tc,
                min_len,
                max_len,
                poses_len,
                ranges_len,
                payloads_len,
                header_end,
            },
        })
    }

    pub fn len(&self) -> usize {
        match &self.shape {
            Shape::FastPath { count, .. } => *count,
            Shape::Full { count, .. } => *count,
        }
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ids_section(&self) -> Result<(&'a [u8], u8), Error> {
        match &self.shape {
            Shape::FastPath { ids_tc, count } => {
                let width = typecode_width(*ids_tc)?;
                Ok((&self.data[1..1 + width * count], *ids_tc))
            }
            Shape::Full { ids_tc, count, header_end, .. } => {
                let width = typecode_width(*ids_tc)?;
                Ok((&self.data[*header_end..*header_end + width * count], *ids_tc))
            }
        }
    }

    pub fn all_ids(&self) -> Result<Vec<u32>, Error> {
        let (bytes, tc) = self.ids_section()?;
        let mut stream = SliceInputStream::new(bytes);
        let raw = read_typed_array(&mut stream, tc, self.len())?;
        match &self.shape {
            Shape::FastPath { .. } => Ok(raw.into_iter().map(|v| v as u32).collect()),
            Shape::Full { .. } => {
                let mut out = Vec::with_capacity(raw.len());
                let mut prev = 0u64;
                for d in raw {
                    prev += d;
                    out.push(prev as u32);
                }
                Ok(out)
            }
        }
    }

    pub fn id(&self, n: usize) -> Result<u32, Error> {
        self.all_ids()?.get(n).copied().ok_or(Error::Truncated)
    }

    fn after_ids_offset(&self) -> Result<usize, Error> {
        match &self.shape {
            Shape::FastPath { ids_tc, count } => {
                Ok(1 + typecode_width(*ids_tc)? * count)
            }
            Shape::Full { ids_tc, count, header_end, .. } => {
                Ok(header_end + typecode_width(*ids_tc)? * count)
            }
        }
    }

    pub fn min_length(&self) -> Option<i32> {
        match &self.shape {
            Shape::FastPath { .. } => None,
            Shape::Full { min_len, .. } if *min_len >= 0 => Some(*min_len),
            _ => None,
        }
    }
    pub fn max_length(&self) -> Option<i32> {
        match &self.shape {
            Shape::FastPath { .. } => None,
            Shape::Full { max_len, .. } if *max_len >= 0 => Some(*max_len),
            _ => None,
        }
    }

    fn lengths_offset(&self) -> Result<usize, Error> {
        self.after_ids_offset()
    }

    pub fn length(&self, n: usize) -> Result<Option<u8>, Error> {
        let features = match &self.shape {
            Shape::FastPath { .. } => return Ok(None),
            Shape::Full { features, .. } => *features,
        };
        if !features.contains(Features::LENGTHS) {
            return Ok(None);
        }
        let off = self.lengths_offset()?;
        Ok(Some(self.data[off + n]))
    }

    fn after_lengths_offset(&self) -> Result<usize, Error> {
        let off = self.lengths_offset()?;
        match &self.shape {
            Shape::FastPath { .. } => Ok(off),
            Shape::Full { features, count, .. } => {
                if features.contains(Features::LENGTHS) {
                    Ok(off + count)
                } else {
                    Ok(off)
                }
            }
        }
    }

    fn weights_span(&self) -> Result<(usize, u8), Error> {
        let off = self.after_lengths_offset()?;
        match &self.shape {
            Shape::FastPath { .. } => Ok((off, TC_ABSENT)),
            Shape::Full { weights_tc, .. } => Ok((off, *weights_tc)),
        }
    }

    pub fn weight(&self, n: usize) -> Result<Option<f32>, Error> {
        let (off, tc) = self.weights_span()?;
        let count = self.len();
        match tc {
            TC_ABSENT => Ok(None),
            TC_ALL_ONES => Ok(Some(1.0)),
            TC_F32 => {
                let bytes = &self.data[off..off + count * 4];
                let mut s = SliceInputStream::new(bytes);
                let vals = read_f32_array(&mut s, count)?;
                Ok(Some(vals[n]))
            }
            other => {
                let width = typecode_width(other)?;
                let bytes = &self.data[off..off + count * width];
                let mut s = SliceInputStream::new(bytes);
                let vals = read_typed_array(&mut s, other, count)?;
                Ok(Some(vals[n] as f32))
            }
        }
    }

    fn after_weights_offset(&self) -> Result<usize, Error> {
        let (off, tc) = self.weights_span()?;
        let count = self.len();
        let bytes = match tc {
            TC_ABSENT | TC_ALL_ONES => 0,
            TC_F32 => 4 * count,
            other => typecode_width(other)? * count,
        };
        Ok(off + bytes)
    }

    fn chunk_list_span(&self, feature: Features, declared_len: i32) -> Result<Option<(usize, usize)>, Error> {
        let features = match &self.shape {
            Shape::FastPath { .. } => return Ok(None),
            Shape::Full { features, .. } => *features,
        };
        if !features.contains(feature) {
            return Ok(None);
        }
        let start = self.after_weights_offset()?;
        // positions/ranges/payloads sections are laid out back to back in
        // that order; only the sections before the one we want need sizing.
        let mut cursor = start;
        if feature != Features::POSITIONS {
            if let Shape::Full { poses_len, .. } = &self.shape {
                if *poses_len >= 0 {
                    cursor += *poses_len as usize;
                }
            }
        }
        if feature == Features::PAYLOADS {
            if let Shape::Full { ranges_len, .. } = &self.shape {
                if *ranges_len >= 0 {
                    cursor += *ranges_len as usize;
                }
            }
        }
        Ok(Some((cursor, declared_len as usize)))
    }

    fn read_chunk_list(&self, start: usize, len: usize, n: usize) -> Result<Option<&'a [u8]>, Error> {
        let section = &self.data[start..start + len];
        let mut s = SliceInputStream::new(section);
        let offsets_tc = s.consume(1)?[0];
        let lengths_tc = s.consume(1)?[0];
        let count = u32::from_le_bytes(s.consume(4)?.try_into().unwrap()) as usize;
        let offsets = read_typed_array(&mut s, offsets_tc, count)?;
        let lengths = read_typed_array(&mut s, lengths_tc, count)?;
        let blob_start = s.tell();
        if n >= count {
            return Ok(None);
        }
        let chunk_start = blob_start + offsets[n] as usize;
        let chunk_end = chunk_start + lengths[n] as usize;
        Ok(Some(&section[chunk_start..chunk_end]))
    }

    pub fn positions(&self, n: usize) -> Result<Option<Vec<u32>>, Error> {
        let poses_len = match &self.shape {
            Shape::FastPath { .. } => return Ok(None),
            Shape::Full { poses_len, .. } => *poses_len,
        };
        let span = match self.chunk_list_span(Features::POSITIONS, poses_len)? {
            Some(s) => s,
            None => return Ok(None),
        };
        let chunk = match self.read_chunk_list(span.0, span.1, n)? {
            Some(c) => c,
            None => return Ok(None),
        };
        if chunk.is_empty() {
            return Ok(Some(vec![]));
        }
        let tc = chunk[0];
        let width = typecode_width(tc)?;
        let count = (chunk.len() - 1) / width;
        let mut s = SliceInputStream::new(&chunk[1..]);
        let deltas = read_typed_array(&mut s, tc, count)?;
        let mut out = Vec::with_capacity(count);
        let mut prev = 0u64;
        for d in deltas {
            prev += d;
            out.push(prev as u32);
        }
        Ok(Some(out))
    }

    pub fn ranges(&self, n: usize) -> Result<Option<Vec<Range>>, Error> {
        let ranges_len = match &self.shape {
            Shape::FastPath { .. } => return Ok(None),
            Shape::Full { ranges_len, .. } => *ranges_len,
        };
        let span = match self.chunk_list_span(Features::RANGES, ranges_len)? {
            Some(s) => s,
            None => return Ok(None),
        };
        let chunk = match self.read_chunk_list(span.0, span.1, n)? {
            Some(c) => c,
            None => return Ok(None),
        };
        if chunk.is_empty() {
            return Ok(Some(vec![]));
        }
        let tc = chunk[0];
        let width = typecode_width(tc)?;
        let count = (chunk.len() - 1) / width / 2;
        let mut s = SliceInputStream::new(&chunk[1..]);
        let flat = read_typed_array(&mut s, tc, count * 2)?;
        let mut out = Vec::with_capacity(count);
        let mut prev_end = 0u64;
        for pair in flat.chunks(2) {
            let start = prev_end + pair[0];
            let span = pair[1];
            prev_end = start + span;
            out.push(Range { start: start as u32, span: span as u32 });
        }
        Ok(Some(out))
    }

    pub fn payloads(&self, n: usize) -> Result<Option<Vec<u8>>, Error> {
        let payloads_len = match &self.shape {
            Shape::FastPath { .. } => return Ok(None),
            Shape::Full { payloads_len, .. } => *payloads_len,
        };
        let span = match self.chunk_list_span(Features::PAYLOADS, payloads_len)? {
            Some(s) => s,
            None => return Ok(None),
        };
        Ok(self.read_chunk_list(span.0, span.1, n)?.map(|c| c.to_vec()))
    }

    pub fn raw_bytes(&self) -> &'a [u8] {
        self.data
    }

    /// The byte offset one past the end of the ordinary posting section —
    /// where a vector block's terms section, if any, begins.
    fn postings_section_len(&self) -> Result<usize, Error> {
        match &self.shape {
            Shape::FastPath { ids_tc, count } => Ok(1 + typecode_width(*ids_tc)? * count),
            Shape::Full { poses_len, ranges_len, payloads_len, .. } => {
                let mut total = self.after_weights_offset()?;
                if *poses_len >= 0 {
                    total += *poses_len as usize;
                }
                if *ranges_len >= 0 {
                    total += *ranges_len as usize;
                }
                if *payloads_len >= 0 {
                    total += *payloads_len as usize;
                }
                Ok(total)
            }
        }
    }

    /// The `n`th term of a vector block, in ordinal order (`encode_vector_block`
    /// writes them sorted). `Err(Error::UnsupportedFeature)` if this block
    /// carries no terms section at all (it's a plain doc-list block).
    pub fn termbytes(&self, n: usize) -> Result<&'a [u8], Error> {
        let base = self.postings_section_len()?;
        if base >= self.data.len() {
            return Err(Error::UnsupportedFeature("block carries no term-vector section"));
        }
        let count = self.len();
        if n >= count {
            return Err(Error::Truncated);
        }
        let tc = self.data[base];
        let mut s = SliceInputStream::new(&self.data[base + 1..]);
        let lengths = read_typed_array(&mut s, tc, count)?;
        let mut offset = base + 1 + s.tell();
        for &len in &lengths[..n] {
            offset += len as usize;
        }
        let len = lengths[n] as usize;
        Ok(&self.data[offset..offset + len])
    }

    /// Binary search the sorted terms section for `term`, returning its
    /// ordinal (the same index `weight`/`positions` use).
    pub fn seek(&self, term: &[u8]) -> Result<Option<usize>, Error> {
        let mut lo = 0usize;
        let mut hi = self.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.termbytes(mid)?.cmp(term) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(Some(mid)),
            }
        }
        Ok(None)
    }

    /// Like [`seek`](Self::seek), but fails with `Error::NotFound` rather
    /// than returning `None`.
    pub fn term_index(&self, term: &[u8]) -> Result<usize, Error> {
        self.seek(term)?.ok_or(Error::NotFound)
    }

    /// Rewrite the (absolute) doc-ids in place per `remap`, preserving the
    /// ids typecode. Fails if remapping would overflow the existing typecode.
    pub fn rewrite_raw_bytes(&self, remap: impl Fn(u32) -> u32) -> Result<Vec<u8>, Error> {
        let ids = self.all_ids()?;
        let new_ids: Vec<u32> = ids.iter().map(|&id| remap(id)).collect();
        let (_, tc) = self.ids_section()?;
        let max_new = *new_ids.iter().max().unwrap_or(&0) as u64;
        let needed_tc = smallest_typecode(max_new);
        if typecode_width(needed_tc)? > typecode_width(tc)? {
            return Err(Error::FormatMismatch(
                "remap would widen the doc-id typecode".into(),
            ));
        }
        let mut out = self.data.to_vec();
        let ids_start = match &self.shape {
            Shape::FastPath { .. } => 1,
            Shape::Full { header_end, .. } => *header_end,
        };
        let deltas: Vec<u64> = match &self.shape {
            Shape::FastPath { .. } => new_ids.iter().map(|&id| id as u64).collect(),
            Shape::Full { .. } => {
                let mut prev = 0u64;
                new_ids
                    .iter()
                    .map(|&id| {
                        let d = id as u64 - prev;
                        prev = id as u64;
                        d
                    })
                    .collect()
            }
        };
        let width = typecode_width(tc)?;
        let mut buf = Vec::new();
        write_typed_array(&deltas, tc, &mut buf)?;
        out[ids_start..ids_start + width * new_ids.len()].copy_from_slice(&buf);
        Ok(out)
    }
}
