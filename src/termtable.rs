//! The persistent sorted term table: `(field_id, term bytes) -> TermEntry`.
//!
//! Laid out the way the teacher's `mem::key_val_files::KeyValueWriter` lays
//! out its numeric key/value files — entries written once in ascending key
//! order, front-coded against the previous key, with a sparse index of
//! restart points for seeking — generalised from `u32` keys to
//! `(field_id, term)` byte-string keys, since a term dictionary keys on
//! strings rather than sequential document ids.

use crate::io_helper::{write_vbyte, ArcInputStream, DataInputStream, InputStream, SliceInputStream};
use crate::Error;
use std::io::{self, Write};

/// How far a posting block for one term lives in the postings file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TermEntry {
    pub doc_freq: u32,
    pub postings_offset: u64,
    pub postings_len: u32,
}

/// Every `RESTART_INTERVAL`-th entry is written with its full key (no prefix
/// compression) and recorded in the sparse index, bounding how far a lookup
/// has to scan linearly once it lands in the right neighbourhood.
const RESTART_INTERVAL: usize = 128;

const MAGIC: &[u8] = b"crat.tt1";

/// Builds a term table file. Callers must insert in ascending
/// `(field_id, term)` order; this mirrors how a merge or a single sorted
/// run naturally produces entries; an out-of-order insert is a bug.
pub struct TermTableWriter<W: Write> {
    out: W,
    bytes_written: u64,
    count: u32,
    since_restart: usize,
    last_key: Option<(u16, Vec<u8>)>,
    restarts: Vec<(u16, Vec<u8>, u64)>,
}

impl<W: Write> TermTableWriter<W> {
    pub fn new(mut out: W) -> Result<Self, Error> {
        out.write_all(MAGIC)?;
        Ok(Self {
            out,
            bytes_written: MAGIC.len() as u64,
            count: 0,
            since_restart: RESTART_INTERVAL,
            last_key: None,
            restarts: Vec::new(),
        })
    }

    pub fn insert(&mut self, field_id: u16, term: &[u8], entry: TermEntry) -> Result<(), Error> {
        if let Some((last_field, last_term)) = &self.last_key {
            let in_order = (field_id, term) > (*last_field, last_term.as_slice());
            if !in_order {
                return Err(Error::OutOfOrder);
            }
        }

        let restart = self.since_restart >= RESTART_INTERVAL;
        if restart {
            self.restarts.push((field_id, term.to_vec(), self.bytes_written));
            self.since_restart = 0;
        }
        self.since_restart += 1;

        let shared_prefix = if restart {
            0
        } else {
            let last = self.last_key.as_ref().map(|(f, t)| (*f, t.as_slice())).unwrap_or((0, &[]));
            if last.0 == field_id {
                common_prefix_len(last.1, term)
            } else {
                0
            }
        };
        let suffix = &term[shared_prefix..];

        let mut n = write_vbyte(field_id as u64, &mut self.out)?;
        n += write_vbyte(shared_prefix as u64, &mut self.out)?;
        n += write_vbyte(suffix.len() as u64, &mut self.out)?;
        self.out.write_all(suffix)?;
        n += suffix.len();
        n += write_vbyte(entry.doc_freq as u64, &mut self.out)?;
        n += write_vbyte(entry.postings_offset, &mut self.out)?;
        n += write_vbyte(entry.postings_len as u64, &mut self.out)?;
        self.bytes_written += n as u64;

        self.last_key = Some((field_id, term.to_vec()));
        self.count += 1;
        Ok(())
    }

    /// Writes the sparse index and footer, returning the total byte count.
    pub fn finish(mut self) -> Result<u64, Error> {
        let index_offset = self.bytes_written;
        for (field_id, term, offset) in &self.restarts {
            let mut n = write_vbyte(*field_id as u64, &mut self.out)?;
            n += write_vbyte(term.len() as u64, &mut self.out)?;
            self.out.write_all(term)?;
            n += term.len();
            n += write_vbyte(*offset, &mut self.out)?;
            self.bytes_written += n as u64;
        }
        self.out.write_all(&index_offset.to_be_bytes())?;
        self.out.write_all(&(self.restarts.len() as u32).to_be_bytes())?;
        self.out.write_all(&self.count.to_be_bytes())?;
        self.bytes_written += 16;
        self.out.flush()?;
        Ok(self.bytes_written)
    }
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// A decoded restart-point: the first full key at or after a given byte
/// offset into the entries region.
struct Restart {
    field_id: u16,
    term: Vec<u8>,
    offset: u64,
}

/// Read-only view over a finished term table, backed by `ArcInputStream` so
/// repeated lookups never copy the whole file.
pub struct TermTableReader {
    data: ArcInputStream,
    entries_end: usize,
    restarts: Vec<Restart>,
}

impl TermTableReader {
    pub fn parse(data: ArcInputStream) -> Result<Self, Error> {
        let bytes = data.as_bytes();
        if bytes.len() < MAGIC.len() + 16 || &bytes[..MAGIC.len()] != MAGIC {
            return Err(Error::FormatMismatch("term table magic mismatch".into()));
        }
        let footer_start = bytes.len() - 16;
        let mut footer = SliceInputStream::new(&bytes[footer_start..]);
        let index_offset = footer.read_u64()?;
        let restart_count = footer.read_u32()?;

        let mut rdr = SliceInputStream::new(&bytes[index_offset as usize..footer_start]);
        let mut restarts = Vec::with_capacity(restart_count as usize);
        for _ in 0..restart_count {
            let field_id = rdr.read_vbyte()? as u16;
            let term_len = rdr.read_vbyte()? as usize;
            let term = rdr.consume(term_len)?.to_vec();
            let offset = rdr.read_vbyte()?;
            restarts.push(Restart { field_id, term, offset });
        }

        Ok(Self { data, entries_end: index_offset as usize, restarts })
    }

    pub fn len(&self) -> usize {
        self.restarts.len()
    }

    /// Looks up the exact `(field_id, term)` key.
    pub fn get(&self, field_id: u16, term: &[u8]) -> Result<Option<TermEntry>, Error> {
        let key = (field_id, term);
        let start = match self.restarts.partition_point(|r| (r.field_id, r.term.as_slice()) <= key) {
            0 => return Ok(None),
            i => self.restarts[i - 1].offset,
        };

        let bytes = &self.data.as_bytes()[..self.entries_end];
        let mut rdr = SliceInputStream::new(bytes);
        rdr.seek(start as usize)?;
        let mut current_field: u16 = 0;
        let mut current_term: Vec<u8> = Vec::new();
        loop {
            if rdr.tell() >= rdr.len() {
                return Ok(None);
            }
            let field = rdr.read_vbyte()? as u16;
            let shared = rdr.read_vbyte()? as usize;
            let suffix_len = rdr.read_vbyte()? as usize;
            let suffix = rdr.consume(suffix_len)?;
            current_term.truncate(shared);
            current_term.extend_from_slice(suffix);
            current_field = field;

            let doc_freq = rdr.read_vbyte()? as u32;
            let postings_offset = rdr.read_vbyte()?;
            let postings_len = rdr.read_vbyte()? as u32;

            match (current_field, current_term.as_slice()).cmp(&key) {
                std::cmp::Ordering::Equal => {
                    return Ok(Some(TermEntry { doc_freq, postings_offset, postings_len }))
                }
                std::cmp::Ordering::Greater => return Ok(None),
                std::cmp::Ordering::Less => continue,
            }
        }
    }

    /// Walks every entry in `(field_id, term)` order, for lexicon iteration
    /// and range-bounded term scans (e.g. a `TermRange` query).
    pub fn iter(&self) -> TermTableIter<'_> {
        TermTableIter {
            rdr: SliceInputStream::new(&self.data.as_bytes()[..self.entries_end]),
            field: 0,
            term: Vec::new(),
        }
    }
}

/// One decoded entry from a full lexicon walk.
#[derive(Debug, Clone)]
pub struct TermTableEntryRef {
    pub field_id: u16,
    pub term: Vec<u8>,
    pub entry: TermEntry,
}

pub struct TermTableIter<'a> {
    rdr: SliceInputStream<'a>,
    field: u16,
    term: Vec<u8>,
}

impl<'a> Iterator for TermTableIter<'a> {
    type Item = Result<TermTableEntryRef, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rdr.tell() >= self.rdr.len() {
            return None;
        }
        let result = (|| -> Result<TermTableEntryRef, Error> {
            let field = self.rdr.read_vbyte()? as u16;
            let shared = self.rdr.read_vbyte()? as usize;
            let suffix_len = self.rdr.read_vbyte()? as usize;
            let suffix = self.rdr.consume(suffix_len)?;
            self.term.truncate(shared);
            self.term.extend_from_slice(suffix);
            self.field = field;

            let doc_freq = self.rdr.read_vbyte()? as u32;
            let postings_offset = self.rdr.read_vbyte()?;
            let postings_len = self.rdr.read_vbyte()? as u32;
            Ok(TermTableEntryRef {
                field_id: self.field,
                term: self.term.clone(),
                entry: TermEntry { doc_freq, postings_offset, postings_len },
            })
        })();
        Some(result)
    }
}
