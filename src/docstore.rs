//! Per-segment stored-field value store: an append-only blob of individually
//! LZ4-compressed per-document field maps, plus a tiny offset index so
//! `stored_fields(doc_id)` resolves in one seek and one decompress.
//!
//! Grounded in the teacher's own `mem/encoders.rs` `LZ4StringEncoder`
//! (vbyte-length-prefixed `lz4_flex::compress_into` blobs) for the
//! compression scheme; values are tagged per Rust type rather than carrying
//! the declaring field's kind, so a store can be read without the schema.

use crate::io_helper::{write_vbyte, ArcInputStream, DataInputStream, InputStream, SliceInputStream};
use crate::schema::FieldValue;
use crate::Error;
use std::collections::BTreeMap;
use std::io::Write;

fn encode_value(value: &FieldValue, out: &mut Vec<u8>) {
    match value {
        FieldValue::Text(s) => {
            out.push(0);
            let _ = write_vbyte(s.len() as u64, out);
            out.extend_from_slice(s.as_bytes());
        }
        FieldValue::Numeric(n) => {
            out.push(1);
            out.extend_from_slice(&n.to_be_bytes());
        }
        FieldValue::Bool(b) => {
            out.push(2);
            out.push(*b as u8);
        }
        FieldValue::Bytes(b) => {
            out.push(3);
            let _ = write_vbyte(b.len() as u64, out);
            out.extend_from_slice(b);
        }
    }
}

fn decode_value(rdr: &mut SliceInputStream<'_>) -> Result<FieldValue, Error> {
    match rdr.read_u8()? {
        0 => {
            let len = rdr.read_vbyte()? as usize;
            Ok(FieldValue::Text(String::from_utf8_lossy(rdr.consume(len)?).into_owned()))
        }
        1 => Ok(FieldValue::Numeric(f64::from_be_bytes(rdr.consume(8)?.try_into().unwrap()))),
        2 => Ok(FieldValue::Bool(rdr.read_u8()? != 0)),
        3 => {
            let len = rdr.read_vbyte()? as usize;
            Ok(FieldValue::Bytes(rdr.consume(len)?.to_vec()))
        }
        _ => Err(Error::BadTypecode),
    }
}

fn encode_document(fields: &BTreeMap<u16, FieldValue>) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = write_vbyte(fields.len() as u64, &mut buf);
    for (field_id, value) in fields {
        let _ = write_vbyte(*field_id as u64, &mut buf);
        encode_value(value, &mut buf);
    }
    buf
}

fn decode_document(bytes: &[u8]) -> Result<BTreeMap<u16, FieldValue>, Error> {
    let mut rdr = SliceInputStream::new(bytes);
    let n = rdr.read_vbyte()? as usize;
    let mut out = BTreeMap::new();
    for _ in 0..n {
        let field_id = rdr.read_vbyte()? as u16;
        out.insert(field_id, decode_value(&mut rdr)?);
    }
    Ok(out)
}

/// Accumulates one segment's store as documents are added, in doc-id order
/// starting at 0 (the same order the pool sees them in). `add` streams each
/// document's compressed chunk straight to the blob writer; `finish` hands
/// back the small offset index for a second output file.
#[derive(Default)]
pub struct DocStoreWriter {
    offsets: Vec<(u64, u32)>,
    cursor: u64,
}

impl DocStoreWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, blob_out: &mut dyn Write, fields: &BTreeMap<u16, FieldValue>) -> Result<(), Error> {
        let raw = encode_document(fields);
        let mut compressed = Vec::new();
        lz4_flex::compress_into(&raw, &mut compressed);

        let mut chunk = Vec::new();
        write_vbyte(raw.len() as u64, &mut chunk)?;
        write_vbyte(compressed.len() as u64, &mut chunk)?;
        chunk.extend_from_slice(&compressed);

        blob_out.write_all(&chunk)?;
        self.offsets.push((self.cursor, chunk.len() as u32));
        self.cursor += chunk.len() as u64;
        Ok(())
    }

    pub fn finish(self) -> Vec<u8> {
        let mut buf = Vec::new();
        let _ = write_vbyte(self.offsets.len() as u64, &mut buf);
        for (offset, len) in &self.offsets {
            let _ = write_vbyte(*offset, &mut buf);
            let _ = write_vbyte(*len as u64, &mut buf);
        }
        buf
    }
}

/// Reads one segment's store back: an offset index plus the compressed blob
/// stream it indexes into.
pub struct DocStoreReader {
    offsets: Vec<(u64, u32)>,
    blob: ArcInputStream,
}

impl DocStoreReader {
    pub fn parse(index_bytes: ArcInputStream, blob: ArcInputStream) -> Result<Self, Error> {
        let mut rdr = SliceInputStream::new(index_bytes.as_bytes());
        let n = rdr.read_vbyte()? as usize;
        let mut offsets = Vec::with_capacity(n);
        for _ in 0..n {
            let offset = rdr.read_vbyte()?;
            let len = rdr.read_vbyte()? as u32;
            offsets.push((offset, len));
        }
        Ok(Self { offsets, blob })
    }

    pub fn doc_count(&self) -> usize {
        self.offsets.len()
    }

    /// Decompresses and decodes one document's stored field values, keyed by
    /// the same field ids the postings/term table use.
    pub fn stored_fields(&self, doc_id: u32) -> Result<BTreeMap<u16, FieldValue>, Error> {
        let (offset, len) = *self.offsets.get(doc_id as usize).ok_or(Error::OutOfRange)?;
        if len == 0 {
            return Ok(BTreeMap::new());
        }
        let chunk = self.blob.slice(offset as usize, offset as usize + len as usize);
        let bytes = chunk.as_bytes();
        let mut rdr = SliceInputStream::new(bytes);
        let raw_len = rdr.read_vbyte()? as usize;
        let comp_len = rdr.read_vbyte()? as usize;
        let compressed = rdr.consume(comp_len)?;
        let raw = lz4_flex::decompress(compressed, raw_len).map_err(|e| Error::FormatMismatch(e.to_string()))?;
        decode_document(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_mixed_value_types() {
        let mut writer = DocStoreWriter::new();
        let mut blob = Vec::new();

        let mut doc0 = BTreeMap::new();
        doc0.insert(0u16, FieldValue::Text("Miss Mary".to_string()));
        doc0.insert(1u16, FieldValue::Numeric(42.0));
        writer.add(&mut blob, &doc0).unwrap();

        let doc1 = BTreeMap::new();
        writer.add(&mut blob, &doc1).unwrap();

        let mut doc2 = BTreeMap::new();
        doc2.insert(2u16, FieldValue::Bool(true));
        doc2.insert(3u16, FieldValue::Bytes(vec![1, 2, 3]));
        writer.add(&mut blob, &doc2).unwrap();

        let index_bytes = writer.finish();
        let reader = DocStoreReader::parse(
            ArcInputStream::from_bytes(std::sync::Arc::new(index_bytes)),
            ArcInputStream::from_bytes(std::sync::Arc::new(blob)),
        )
        .unwrap();

        assert_eq!(reader.doc_count(), 3);
        assert_eq!(
            reader.stored_fields(0).unwrap().get(&0),
            Some(&FieldValue::Text("Miss Mary".to_string()))
        );
        assert_eq!(reader.stored_fields(0).unwrap().get(&1), Some(&FieldValue::Numeric(42.0)));
        assert!(reader.stored_fields(1).unwrap().is_empty());
        assert_eq!(reader.stored_fields(2).unwrap().get(&2), Some(&FieldValue::Bool(true)));
        assert_eq!(
            reader.stored_fields(2).unwrap().get(&3),
            Some(&FieldValue::Bytes(vec![1, 2, 3]))
        );
    }

    #[test]
    fn out_of_range_doc_id_errors() {
        let writer = DocStoreWriter::new();
        let index_bytes = writer.finish();
        let reader = DocStoreReader::parse(
            ArcInputStream::from_bytes(std::sync::Arc::new(index_bytes)),
            ArcInputStream::from_bytes(std::sync::Arc::new(Vec::new())),
        )
        .unwrap();
        assert!(matches!(reader.stored_fields(0), Err(Error::OutOfRange)));
    }
}
