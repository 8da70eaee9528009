//! The indexing pool: accumulate postings for added documents in memory,
//! spill sorted runs to disk once a byte budget is exceeded, and merge the
//! runs (plus whatever's still resident) into the final posting file and
//! term table.
//!
//! Shaped after the teacher's `mem::flush::flush_postings` (group postings
//! by field, walk them in term order, hand each term's accumulated docs to
//! a block writer) combined with `mem::key_val_files::KeyValueWriter`'s
//! append-only on-disk layout, generalised from a single in-memory indexer
//! to a spill-and-merge pool that bounds memory use.

use crate::codec::{encode_doc_block, PostTuple};
use crate::config::PoolConfig;
use crate::io_helper::{write_vbyte, DataInputStream, InputStream, SliceInputStream};
use crate::schema::{FieldValue, Schema};
use crate::scoring::FieldStats;
use crate::termtable::{TermEntry, TermTableWriter};
use crate::Error;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

type RunKey = (u16, Vec<u8>);

/// A worker accumulating one shard of the document stream. Kept as a trait
/// so a multi-process pool can run many of these independently and later
/// merge their finished runs with [`merge_runs`]; this crate only drives a
/// single in-process `Pool`, leaving OS-process fan-out to the caller.
pub trait PoolWorker {
    fn add_document(
        &mut self,
        doc_id: u32,
        schema: &Schema,
        fields: &[(String, FieldValue)],
    ) -> Result<(), Error>;

    fn finish(
        self: Box<Self>,
        postings_out: &mut dyn Write,
        term_table_out: &mut dyn Write,
    ) -> Result<PoolStats, Error>;
}

#[derive(Debug, Default, Clone)]
pub struct PoolStats {
    pub document_count: u32,
    pub field_stats: BTreeMap<u16, FieldStats>,
}

/// In-memory accumulation, spilling sorted runs to `config.run_dir` once
/// `config.limit_bytes` of estimated posting data has built up.
pub struct Pool {
    config: PoolConfig,
    field_ids: BTreeMap<String, u16>,
    resident: BTreeMap<RunKey, Vec<PostTuple>>,
    resident_bytes: usize,
    runs: Vec<PathBuf>,
    run_seq: u32,
    stats: PoolStats,
}

impl Pool {
    pub fn new(config: PoolConfig, field_ids: BTreeMap<String, u16>) -> Self {
        Self {
            config,
            field_ids,
            resident: BTreeMap::new(),
            resident_bytes: 0,
            runs: Vec::new(),
            run_seq: 0,
            stats: PoolStats::default(),
        }
    }

    /// Direct lookup only; a document field that only matches a dynamic
    /// pattern needs [`field_id_for`](Self::field_id_for) instead.
    fn field_id(&self, name: &str) -> Option<u16> {
        self.field_ids.get(name).copied()
    }

    /// Resolves a document's field name to its id, falling back to the id
    /// assigned to the dynamic pattern that matches it (mirroring
    /// `Schema::get`'s own static-then-dynamic precedence).
    fn field_id_for(&self, schema: &Schema, name: &str) -> Option<u16> {
        self.field_id(name).or_else(|| schema.dynamic_pattern_for(name).and_then(|p| self.field_id(p)))
    }

    pub fn spill(&mut self) -> Result<(), Error> {
        if self.resident.is_empty() {
            return Ok(());
        }
        let path = self.config.run_dir.join(format!("run-{:06}.tmp", self.run_seq));
        self.run_seq += 1;
        let file = File::create(&path)?;
        let mut out = BufWriter::new(file);
        for ((field_id, term), postings) in &mut self.resident {
            postings.sort_by_key(|p| p.doc_id);
            write_run_entry(&mut out, *field_id, term, postings)?;
        }
        out.flush()?;
        self.runs.push(path);
        self.resident.clear();
        self.resident_bytes = 0;
        Ok(())
    }

    fn maybe_spill(&mut self) -> Result<(), Error> {
        if self.resident_bytes >= self.config.limit_bytes {
            self.spill()?;
        }
        Ok(())
    }
}

impl PoolWorker for Pool {
    fn add_document(
        &mut self,
        doc_id: u32,
        schema: &Schema,
        fields: &[(String, FieldValue)],
    ) -> Result<(), Error> {
        self.stats.document_count = self.stats.document_count.max(doc_id + 1);

        for (name, value) in fields {
            let field = schema
                .get(name)
                .ok_or_else(|| Error::FieldConfiguration(format!("unknown field {:?}", name)))?;
            let field_id = self
                .field_id_for(schema, name)
                .ok_or_else(|| Error::FieldConfiguration(format!("field {:?} has no id assigned", name)))?;

            let (length, postings) = field.index(doc_id, value)?;
            let entry = self.stats.field_stats.entry(field_id).or_default();
            entry.document_count += 1;
            entry.total_length += length as u64;

            for tp in postings {
                let key = (field_id, tp.term);
                let bucket = self.resident.entry(key).or_default();
                self.resident_bytes += tp.posting.approx_size();
                bucket.push(tp.posting);
            }
        }
        self.maybe_spill()
    }

    fn finish(
        mut self: Box<Self>,
        postings_out: &mut dyn Write,
        term_table_out: &mut dyn Write,
    ) -> Result<PoolStats, Error> {
        if self.runs.is_empty() {
            write_merged(self.resident.into_iter().map(Ok), postings_out, term_table_out)?;
        } else {
            self.spill()?;
            let readers: Result<Vec<_>, Error> = self.runs.iter().map(|p| RunReader::open(p)).collect();
            let merged = merge_runs(readers?);
            write_merged(merged, postings_out, term_table_out)?;
            for path in &self.runs {
                let _ = std::fs::remove_file(path);
            }
        }
        Ok(self.stats)
    }
}

fn write_merged(
    entries: impl Iterator<Item = Result<(RunKey, Vec<PostTuple>), Error>>,
    postings_out: &mut dyn Write,
    term_table_out: &mut dyn Write,
) -> Result<(), Error> {
    let mut term_table = TermTableWriter::new(term_table_out)?;
    let mut offset: u64 = 0;
    for entry in entries {
        let ((field_id, term), mut postings) = entry?;
        postings.sort_by_key(|p| p.doc_id);
        let doc_freq = postings.len() as u32;
        let block = encode_doc_block(&postings)?;
        postings_out.write_all(&block)?;
        term_table.insert(field_id, &term, TermEntry {
            doc_freq,
            postings_offset: offset,
            postings_len: block.len() as u32,
        })?;
        offset += block.len() as u64;
    }
    term_table.finish()?;
    Ok(())
}

/// Merge multiple sorted runs by key, concatenating their posting lists for
/// matching keys. A simple k-way scan: at each step every reader sitting on
/// the current minimum key contributes its postings and advances.
pub fn merge_runs(mut readers: Vec<RunReader>) -> impl Iterator<Item = Result<(RunKey, Vec<PostTuple>), Error>> {
    std::iter::from_fn(move || {
        let min_key = readers
            .iter()
            .filter_map(|r| r.peek_key())
            .min()
            .cloned();
        let min_key = min_key?;

        let mut merged: Vec<PostTuple> = Vec::new();
        for r in readers.iter_mut() {
            while r.peek_key() == Some(&min_key) {
                match r.next() {
                    Some(Ok((_, postings))) => merged.extend(postings),
                    Some(Err(e)) => return Some(Err(e)),
                    None => break,
                }
            }
        }
        Some(Ok((min_key, merged)))
    })
}

/// Streaming reader over one spilled run, advancing entry-by-entry so a
/// merge never has to hold more than one run's current entry in memory.
pub struct RunReader {
    data: Vec<u8>,
    pos: usize,
    peeked: Option<RunKey>,
}

impl RunReader {
    fn open(path: &Path) -> Result<Self, Error> {
        let mut data = Vec::new();
        BufReader::new(File::open(path)?).read_to_end(&mut data)?;
        let mut r = Self { data, pos: 0, peeked: None };
        r.refill_peek()?;
        Ok(r)
    }

    fn peek_key(&self) -> Option<&RunKey> {
        self.peeked.as_ref()
    }

    fn refill_peek(&mut self) -> Result<(), Error> {
        if self.pos >= self.data.len() {
            self.peeked = None;
            return Ok(());
        }
        let mut rdr = SliceInputStream::new(&self.data[self.pos..]);
        let field_id = rdr.read_vbyte()? as u16;
        let term_len = rdr.read_vbyte()? as usize;
        let term = rdr.consume(term_len)?.to_vec();
        // rewind: peeking must not consume; remember where the entry body starts.
        self.peeked = Some((field_id, term));
        Ok(())
    }
}

impl Iterator for RunReader {
    type Item = Result<(RunKey, Vec<PostTuple>), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.peeked.is_none() {
            return None;
        }
        let result = (|| -> Result<(RunKey, Vec<PostTuple>), Error> {
            let mut rdr = SliceInputStream::new(&self.data[self.pos..]);
            let field_id = rdr.read_vbyte()? as u16;
            let term_len = rdr.read_vbyte()? as usize;
            let term = rdr.consume(term_len)?.to_vec();
            let count = rdr.read_vbyte()? as usize;
            let mut postings = Vec::with_capacity(count);
            let mut last_doc = 0u32;
            for _ in 0..count {
                postings.push(read_posting(&mut rdr, &mut last_doc)?);
            }
            let consumed = rdr.tell();
            self.pos += consumed;
            Ok(((field_id, term), postings))
        })();
        if result.is_ok() {
            if let Err(e) = self.refill_peek() {
                return Some(Err(e));
            }
        }
        Some(result)
    }
}

fn write_run_entry(out: &mut impl Write, field_id: u16, term: &[u8], postings: &[PostTuple]) -> Result<(), Error> {
    write_vbyte(field_id as u64, out)?;
    write_vbyte(term.len() as u64, out)?;
    out.write_all(term)?;
    write_vbyte(postings.len() as u64, out)?;
    let mut last_doc = 0u32;
    for p in postings {
        write_posting(out, p, last_doc)?;
        last_doc = p.doc_id;
    }
    Ok(())
}

fn write_posting(out: &mut impl Write, p: &PostTuple, last_doc: u32) -> Result<(), Error> {
    write_vbyte((p.doc_id - last_doc) as u64, out)?;
    match p.length {
        Some(l) => {
            write_vbyte(1, out)?;
            write_vbyte(l as u64, out)?;
        }
        None => {
            write_vbyte(0, out)?;
        }
    }
    match p.weight {
        Some(w) => {
            write_vbyte(1, out)?;
            out.write_all(&w.to_be_bytes())?;
        }
        None => {
            write_vbyte(0, out)?;
        }
    }
    write_vbyte(p.positions.as_ref().map(|v| v.len()).unwrap_or(0) as u64, out)?;
    if let Some(positions) = &p.positions {
        let mut last = 0u32;
        for &pos in positions {
            write_vbyte((pos - last) as u64, out)?;
            last = pos;
        }
    }
    write_vbyte(p.ranges.as_ref().map(|v| v.len()).unwrap_or(0) as u64, out)?;
    if let Some(ranges) = &p.ranges {
        let mut last = 0u32;
        for r in ranges {
            write_vbyte((r.start - last) as u64, out)?;
            write_vbyte(r.span as u64, out)?;
            last = r.start;
        }
    }
    write_vbyte(p.payloads.as_ref().map(|v| v.len()).unwrap_or(0) as u64, out)?;
    if let Some(payloads) = &p.payloads {
        for payload in payloads {
            write_vbyte(payload.len() as u64, out)?;
            out.write_all(payload)?;
        }
    }
    Ok(())
}

fn read_posting(rdr: &mut SliceInputStream<'_>, last_doc: &mut u32) -> Result<PostTuple, Error> {
    let delta = rdr.read_vbyte()? as u32;
    let doc_id = *last_doc + delta;
    *last_doc = doc_id;
    let mut p = PostTuple::new(doc_id);
    if rdr.read_vbyte()? == 1 {
        p = p.with_length(rdr.read_vbyte()? as u8);
    }
    if rdr.read_vbyte()? == 1 {
        let bytes = rdr.consume(4)?;
        p = p.with_weight(f32::from_be_bytes(bytes.try_into().unwrap()));
    }
    let pos_count = rdr.read_vbyte()? as usize;
    if pos_count > 0 {
        let mut positions = Vec::with_capacity(pos_count);
        let mut last = 0u32;
        for _ in 0..pos_count {
            last += rdr.read_vbyte()? as u32;
            positions.push(last);
        }
        p = p.with_positions(positions);
    }
    let range_count = rdr.read_vbyte()? as usize;
    if range_count > 0 {
        let mut ranges = Vec::with_capacity(range_count);
        let mut last = 0u32;
        for _ in 0..range_count {
            last += rdr.read_vbyte()? as u32;
            let span = rdr.read_vbyte()? as u32;
            ranges.push(crate::codec::Range { start: last, span });
        }
        p = p.with_ranges(ranges);
    }
    let payload_count = rdr.read_vbyte()? as usize;
    if payload_count > 0 {
        let mut payloads = Vec::with_capacity(payload_count);
        for _ in 0..payload_count {
            let len = rdr.read_vbyte()? as usize;
            payloads.push(rdr.consume(len)?.to_vec());
        }
        p = p.with_payloads(payloads);
    }
    Ok(p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;

    fn schema_with_fields() -> (Schema, BTreeMap<String, u16>) {
        let mut schema = Schema::new();
        schema.add("title", Field::text(false)).unwrap();
        schema.add("tag", Field::keyword()).unwrap();
        let mut ids = BTreeMap::new();
        ids.insert("title".to_string(), 0);
        ids.insert("tag".to_string(), 1);
        (schema, ids)
    }

    fn pool_config(dir: &Path) -> PoolConfig {
        PoolConfig::new(dir.to_path_buf())
    }

    #[test]
    fn single_run_finish_produces_sorted_postings() {
        let dir = tempfile::tempdir().unwrap();
        let (schema, ids) = schema_with_fields();
        let mut pool = Pool::new(pool_config(dir.path()), ids);

        pool.add_document(2, &schema, &[("title".into(), FieldValue::Text("quick fox".into()))]).unwrap();
        pool.add_document(0, &schema, &[("title".into(), FieldValue::Text("quick dog".into()))]).unwrap();
        pool.add_document(1, &schema, &[("title".into(), FieldValue::Text("lazy fox".into()))]).unwrap();

        let mut postings_buf = Vec::new();
        let mut term_table_buf = Vec::new();
        let stats = Box::new(pool).finish(&mut postings_buf, &mut term_table_buf).unwrap();
        assert_eq!(stats.document_count, 3);
        assert!(!postings_buf.is_empty());
        assert!(!term_table_buf.is_empty());
    }

    #[test]
    fn document_field_matching_a_dynamic_pattern_gets_indexed() {
        let dir = tempfile::tempdir().unwrap();
        let mut schema = Schema::new();
        schema.add("title", Field::text(false)).unwrap();
        schema.add("attr_*", Field::keyword()).unwrap();
        let mut ids = BTreeMap::new();
        for (i, name) in schema.field_names().enumerate() {
            ids.insert(name.clone(), i as u16);
        }
        let mut pool = Pool::new(pool_config(dir.path()), ids);

        pool.add_document(0, &schema, &[("attr_color".into(), FieldValue::Text("red".into()))]).unwrap();

        let mut postings_buf = Vec::new();
        let mut term_table_buf = Vec::new();
        let stats = Box::new(pool).finish(&mut postings_buf, &mut term_table_buf).unwrap();
        assert_eq!(stats.document_count, 1);
        assert!(!postings_buf.is_empty());
    }

    #[test]
    fn forced_spill_merges_runs_in_key_order() {
        let dir = tempfile::tempdir().unwrap();
        let (schema, ids) = schema_with_fields();
        let mut config = pool_config(dir.path());
        config.limit_bytes = 1; // force a spill after every add.
        let mut pool = Pool::new(config, ids);

        for i in 0..20u32 {
            let text = if i % 2 == 0 { "alpha shared" } else { "beta shared" };
            pool.add_document(i, &schema, &[("title".into(), FieldValue::Text(text.into()))]).unwrap();
        }

        let mut postings_buf = Vec::new();
        let mut term_table_buf = Vec::new();
        let stats = Box::new(pool).finish(&mut postings_buf, &mut term_table_buf).unwrap();
        assert_eq!(stats.document_count, 20);

        let dir_entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(dir_entries.is_empty(), "run files should be cleaned up after merge");
    }

    #[test]
    fn merging_many_spilled_runs_keeps_every_term_doc_sorted() {
        use crate::codec::BlockReader;
        use crate::io_helper::ArcInputStream;
        use crate::termtable::TermTableReader;
        use rand::Rng;
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let (schema, ids) = schema_with_fields();
        let mut config = pool_config(dir.path());
        config.limit_bytes = 512; // force many spilled runs across 1000 docs.
        let mut pool = Pool::new(config, ids);

        let vocab: Vec<String> = (0..20).map(|i| format!("tok{}", i)).collect();
        let mut rng = rand::thread_rng();
        let mut expected: BTreeMap<String, Vec<u32>> = BTreeMap::new();
        for doc_id in 0..1000u32 {
            let term = vocab[rng.gen_range(0usize, vocab.len())].clone();
            expected.entry(term.clone()).or_default().push(doc_id);
            pool.add_document(doc_id, &schema, &[("title".into(), FieldValue::Text(term))]).unwrap();
        }

        let mut postings_buf = Vec::new();
        let mut term_table_buf = Vec::new();
        let stats = Box::new(pool).finish(&mut postings_buf, &mut term_table_buf).unwrap();
        assert_eq!(stats.document_count, 1000);

        let term_table = TermTableReader::parse(ArcInputStream::from_bytes(Arc::new(term_table_buf))).unwrap();
        let postings = ArcInputStream::from_bytes(Arc::new(postings_buf));

        let mut checked = 0;
        for decoded in term_table.iter() {
            let decoded = decoded.unwrap();
            let start = decoded.entry.postings_offset as usize;
            let end = start + decoded.entry.postings_len as usize;
            let bytes = postings.slice(start, end).as_bytes().to_vec();
            let block = BlockReader::parse(&bytes).unwrap();
            let got_ids = block.all_ids().unwrap();

            let term_str = String::from_utf8(decoded.term.clone()).unwrap();
            let expected_ids = expected.get(&term_str).cloned().unwrap_or_default();
            assert_eq!(got_ids, expected_ids, "doc ids for term {:?} are not the merged sorted set", term_str);
            for w in got_ids.windows(2) {
                assert!(w[0] < w[1], "doc ids for term {:?} are not strictly increasing", term_str);
            }
            checked += 1;
        }
        assert_eq!(checked, expected.len());
    }
}
