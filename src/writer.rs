//! Ties `Schema` + `Pool` + `Storage` together for indexing, and `Storage` +
//! `TermTableReader` + `searching::Searcher` together for opening an index
//! to search. Grounded on Whoosh's `writing.py` (`IndexWriter.add_document`/
//! `.commit` building one new segment and a fresh TOC generation) and
//! `index.py` (`FileIndex.reader`/`.searcher` opening every live segment).

use crate::config::WriterConfig;
use crate::docstore::{DocStoreReader, DocStoreWriter};
use crate::pool::{Pool, PoolWorker};
use crate::schema::{FieldValue, Schema};
use crate::searching::{SegmentReader, Searcher};
use crate::storage::{Storage, Toc, DEFAULT_INDEX_NAME};
use crate::termtable::TermTableReader;
use crate::Error;
use std::collections::BTreeMap;
use std::io::Write;

/// Assigns every declared schema field (static names alphabetically, then
/// dynamic glob patterns in declaration order) a stable, deterministic id,
/// following `Schema::field_names`'s iteration order. Shared by the writer
/// (to build a segment's postings/term-table) and the reader (to decode them
/// back), so both sides of a round trip agree on field numbering without
/// persisting it separately. A concrete field name matching only a dynamic
/// pattern (e.g. `"attr_color"` against a declared `"attr_*"`) has no entry
/// of its own here; it resolves through `Schema::dynamic_pattern_for` to the
/// pattern's id instead (see `Pool::field_id_for`, `SegmentReader::field_id`).
fn assign_field_ids(schema: &Schema) -> BTreeMap<String, u16> {
    schema.field_names().enumerate().map(|(i, name)| (name.clone(), i as u16)).collect()
}

/// Builds one new segment: accumulates added documents through a `Pool`,
/// then on `commit` flushes the segment's postings/term table and publishes
/// a new TOC generation that appends it to the index's segment list.
pub struct Writer<'s, S: Storage> {
    storage: &'s S,
    indexname: String,
    schema: Schema,
    base_toc: Toc,
    segment_name: String,
    field_ids: BTreeMap<String, u16>,
    pool: Pool,
    next_doc_id: u32,
    /// One entry per added document, holding only its `stored` field values;
    /// kept resident (unlike the pool, which spills) since stored blobs are
    /// typically small relative to the posting data they come bundled with.
    stored: Vec<BTreeMap<u16, FieldValue>>,
}

impl<'s, S: Storage> Writer<'s, S> {
    /// Creates a brand new, empty index and a writer for its first segment.
    pub fn create(storage: &'s S, schema: Schema, indexname: &str, config: WriterConfig) -> Result<Self, Error> {
        let toc = storage.create_index(schema, indexname)?;
        Self::from_toc(storage, indexname, config, toc)
    }

    /// Opens an existing index for a new segment, appended on `commit`.
    pub fn open(storage: &'s S, indexname: &str, config: WriterConfig) -> Result<Self, Error> {
        let toc = storage.open_index(indexname)?;
        Self::from_toc(storage, indexname, config, toc)
    }

    fn from_toc(storage: &'s S, indexname: &str, config: WriterConfig, toc: Toc) -> Result<Self, Error> {
        std::fs::create_dir_all(&config.pool.run_dir)?;
        let field_ids = assign_field_ids(&toc.schema);
        let segment_name = format!("seg{:06}", toc.segments.len());
        let pool = Pool::new(config.pool, field_ids.clone());
        Ok(Self {
            storage,
            indexname: indexname.to_string(),
            schema: toc.schema.clone(),
            base_toc: toc,
            segment_name,
            field_ids,
            pool,
            next_doc_id: 0,
            stored: Vec::new(),
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Adds one document's field values, assigning it the next sequential
    /// segment-local doc-id.
    pub fn add_document(&mut self, fields: Vec<(String, FieldValue)>) -> Result<(), Error> {
        for (name, _) in &fields {
            if !self.schema.contains(name) {
                return Err(Error::FieldConfiguration(format!("unknown field {:?}", name)));
            }
        }
        let doc_id = self.next_doc_id;
        self.next_doc_id += 1;

        let mut stored = BTreeMap::new();
        for (name, value) in &fields {
            let field = self.schema.get(name).expect("checked above");
            if field.is_stored() {
                let field_id = self
                    .field_ids
                    .get(name)
                    .copied()
                    .or_else(|| self.schema.dynamic_pattern_for(name).and_then(|p| self.field_ids.get(p).copied()))
                    .expect("checked above: field resolves via schema, so it has a static or dynamic-pattern id");
                stored.insert(field_id, value.clone());
            }
        }
        self.stored.push(stored);

        self.pool.add_document(doc_id, &self.schema, &fields)
    }

    /// Flushes the pool into a new segment and publishes a new TOC
    /// generation listing it alongside every prior segment.
    pub fn commit(self) -> Result<(), Error> {
        if self.next_doc_id == 0 {
            return Ok(());
        }
        let stats = {
            let mut postings_out = self.storage.create_segment_writer(&self.indexname, &self.segment_name, "post")?;
            let mut term_table_out = self.storage.create_segment_writer(&self.indexname, &self.segment_name, "tt")?;
            let stats = Box::new(self.pool).finish(&mut postings_out, &mut term_table_out)?;
            postings_out.flush()?;
            term_table_out.flush()?;
            stats
        };

        {
            let mut docs_out = self.storage.create_segment_writer(&self.indexname, &self.segment_name, "docs")?;
            let mut doc_store = DocStoreWriter::new();
            for doc in &self.stored {
                doc_store.add(&mut docs_out, doc)?;
            }
            docs_out.flush()?;
            let mut doci_out = self.storage.create_segment_writer(&self.indexname, &self.segment_name, "doci")?;
            doci_out.write_all(&doc_store.finish())?;
            doci_out.flush()?;
        }

        let mut segments = self.base_toc.segments.clone();
        segments.push(crate::storage::SegmentMeta {
            name: self.segment_name,
            doc_count: stats.document_count,
            field_stats: stats.field_stats,
        });
        let next_toc = self.base_toc.next_generation(segments);
        let session = self.storage.open(&self.indexname, true)?;
        self.storage.save_toc(&session, &next_toc)
    }
}

/// A read-only handle on an index's current TOC generation, used to open a
/// [`Searcher`] over every live segment.
pub struct Index<'s, S: Storage> {
    storage: &'s S,
    indexname: String,
    toc: Toc,
}

impl<'s, S: Storage> Index<'s, S> {
    pub fn open(storage: &'s S, indexname: &str) -> Result<Self, Error> {
        let toc = storage.open_index(indexname)?;
        Ok(Self { storage, indexname: indexname.to_string(), toc })
    }

    pub fn open_default(storage: &'s S) -> Result<Self, Error> {
        Self::open(storage, DEFAULT_INDEX_NAME)
    }

    pub fn schema(&self) -> &Schema {
        &self.toc.schema
    }

    pub fn doc_count(&self) -> u32 {
        self.toc.segments.iter().map(|s| s.doc_count).sum()
    }

    pub fn segment_count(&self) -> usize {
        self.toc.segments.len()
    }

    /// Opens every live segment's term table and postings, and returns a
    /// [`Searcher`] over all of them.
    pub fn searcher(&self) -> Result<Searcher, Error> {
        let field_ids = assign_field_ids(&self.toc.schema);
        let mut segments = Vec::with_capacity(self.toc.segments.len());
        for meta in &self.toc.segments {
            let postings = self.storage.open_segment(&self.indexname, &meta.name, "post")?;
            let term_table_bytes = self.storage.open_segment(&self.indexname, &meta.name, "tt")?;
            let term_table = TermTableReader::parse(term_table_bytes)?;
            let docs = self.storage.open_segment(&self.indexname, &meta.name, "docs")?;
            let doci = self.storage.open_segment(&self.indexname, &meta.name, "doci")?;
            let docstore = Some(DocStoreReader::parse(doci, docs)?);
            segments.push(SegmentReader::new(
                meta.clone(),
                self.toc.schema.clone(),
                field_ids.clone(),
                term_table,
                postings,
                docstore,
            ));
        }
        Ok(Searcher::new(self.toc.schema.clone(), segments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Query;
    use crate::schema::Field;
    use crate::searching::SearchContext;
    use crate::storage::RamStorage;

    fn schema() -> Schema {
        let mut s = Schema::new();
        s.add("title", Field::text(false).stored()).unwrap();
        s.add("body", Field::text(true)).unwrap();
        s
    }

    #[test]
    fn commit_then_search_finds_added_documents() {
        let storage = RamStorage::new();
        let dir = tempfile::tempdir().unwrap();
        let config = WriterConfig::new(dir.path());

        let mut writer = Writer::create(&storage, schema(), DEFAULT_INDEX_NAME, config).unwrap();
        writer
            .add_document(vec![
                ("title".into(), FieldValue::Text("mary had a lamb".into())),
                ("body".into(), FieldValue::Text("its fleece was white as snow".into())),
            ])
            .unwrap();
        writer
            .add_document(vec![
                ("title".into(), FieldValue::Text("jack and jill".into())),
                ("body".into(), FieldValue::Text("went up the hill".into())),
            ])
            .unwrap();
        writer.commit().unwrap();

        let index = Index::open_default(&storage).unwrap();
        assert_eq!(index.doc_count(), 2);
        assert_eq!(index.segment_count(), 1);

        let searcher = index.searcher().unwrap();
        let q = Query::Term { field: "body".into(), term: b"white".to_vec() };
        let results = searcher.search(&q, &SearchContext::default()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results.hits[0].doc.0, 0);

        let stored = searcher.stored_fields(results.hits[0].doc).unwrap();
        assert_eq!(stored.get("title"), Some(&FieldValue::Text("mary had a lamb".into())));
        assert!(stored.get("body").is_none(), "body was not marked stored");
    }

    #[test]
    fn second_writer_appends_a_second_segment() {
        let storage = RamStorage::new();
        let dir = tempfile::tempdir().unwrap();

        let mut w1 = Writer::create(&storage, schema(), DEFAULT_INDEX_NAME, WriterConfig::new(dir.path())).unwrap();
        w1.add_document(vec![("title".into(), FieldValue::Text("alpha".into()))]).unwrap();
        w1.commit().unwrap();

        let mut w2 = Writer::open(&storage, DEFAULT_INDEX_NAME, WriterConfig::new(dir.path())).unwrap();
        w2.add_document(vec![("title".into(), FieldValue::Text("beta".into()))]).unwrap();
        w2.commit().unwrap();

        let index = Index::open_default(&storage).unwrap();
        assert_eq!(index.segment_count(), 2);
        assert_eq!(index.doc_count(), 2);

        let searcher = index.searcher().unwrap();
        let q = Query::Term { field: "title".into(), term: b"beta".to_vec() };
        let results = searcher.search(&q, &SearchContext::default()).unwrap();
        assert_eq!(results.len(), 1);
        // second segment's doc 0 is offset by the first segment's one document.
        assert_eq!(results.hits[0].doc.0, 1);
    }

    #[test]
    fn pagination_orders_hits_by_term_frequency() {
        let mut s = Schema::new();
        s.add("id", Field::id().stored()).unwrap();
        s.add("c", Field::text(false)).unwrap();

        let storage = RamStorage::new();
        let dir = tempfile::tempdir().unwrap();
        let mut writer = Writer::create(&storage, s, DEFAULT_INDEX_NAME, WriterConfig::new(dir.path())).unwrap();
        for (id, count) in [("1", 6usize), ("2", 5), ("3", 4), ("4", 3), ("5", 2), ("6", 1)] {
            let content = vec!["alfa"; count].join(" ");
            writer
                .add_document(vec![
                    ("id".into(), FieldValue::Text(id.into())),
                    ("c".into(), FieldValue::Text(content)),
                ])
                .unwrap();
        }
        writer.commit().unwrap();

        let index = Index::open_default(&storage).unwrap();
        let searcher = index.searcher().unwrap();
        let q = Query::Term { field: "c".into(), term: b"alfa".to_vec() };

        let stored_id = |doc| searcher.stored_fields(doc).unwrap().get("id").unwrap().as_text().unwrap().to_string();

        let results = searcher.search(&q, &SearchContext::default().with_limit(None)).unwrap();
        let ids: Vec<String> = results.hits.iter().map(|h| stored_id(h.doc)).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4", "5", "6"]);

        let page = searcher.search_page(&q, 2, 2).unwrap();
        let page_ids: Vec<String> = page.items.iter().map(|h| stored_id(h.doc)).collect();
        assert_eq!(page_ids, vec!["3", "4"]);
        assert_eq!(page.pagecount, 3);
    }

    #[test]
    fn include_filter_restricts_hits_without_disturbing_base_order() {
        let mut s = Schema::new();
        s.add("id", Field::id().stored()).unwrap();
        s.add("type", Field::id()).unwrap();
        s.add("c", Field::text(false)).unwrap();

        let storage = RamStorage::new();
        let dir = tempfile::tempdir().unwrap();
        let mut writer = Writer::create(&storage, s, DEFAULT_INDEX_NAME, WriterConfig::new(dir.path())).unwrap();
        let docs = [
            ("1", "odd", 6usize),
            ("2", "even", 5),
            ("3", "odd", 4),
            ("4", "even", 3),
            ("5", "odd", 2),
            ("6", "even", 1),
        ];
        for (id, ty, count) in docs {
            let content = vec!["alfa"; count].join(" ");
            writer
                .add_document(vec![
                    ("id".into(), FieldValue::Text(id.into())),
                    ("type".into(), FieldValue::Text(ty.into())),
                    ("c".into(), FieldValue::Text(content)),
                ])
                .unwrap();
        }
        writer.commit().unwrap();

        let index = Index::open_default(&storage).unwrap();
        let searcher = index.searcher().unwrap();

        let base = Query::Term { field: "c".into(), term: b"alfa".to_vec() };
        let filter_query = Query::Term { field: "type".into(), term: b"even".to_vec() };
        let filter_hits = searcher
            .search(&filter_query, &SearchContext::boolean().with_limit(None))
            .unwrap();
        let even: std::collections::HashSet<u32> = filter_hits.hits.iter().map(|h| h.doc.0).collect();
        assert_eq!(even, [1u32, 3, 5].into_iter().collect());

        let ctx = SearchContext::default().with_limit(None).with_include(even);
        let results = searcher.search(&base, &ctx).unwrap();

        let ids: Vec<String> = results
            .hits
            .iter()
            .map(|h| searcher.stored_fields(h.doc).unwrap().get("id").unwrap().as_text().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["2", "4", "6"], "filter keeps the base query's relative order");
    }

    #[test]
    fn numeric_range_query_matches_exact_value_set() {
        let mut s = Schema::new();
        s.add("n", Field::numeric(32, true, 4).stored()).unwrap();

        let storage = RamStorage::new();
        let dir = tempfile::tempdir().unwrap();
        let mut writer = Writer::create(&storage, s, DEFAULT_INDEX_NAME, WriterConfig::new(dir.path())).unwrap();
        for v in [0.0, 10.0, 100.0, 1000.0, 5925.0, 10000.0] {
            writer.add_document(vec![("n".into(), FieldValue::Numeric(v))]).unwrap();
        }
        writer.commit().unwrap();

        let index = Index::open_default(&storage).unwrap();
        let searcher = index.searcher().unwrap();

        let q = Query::NumericRange {
            field: "n".into(),
            start: Some(10.0),
            end: Some(5925.0),
            start_excl: false,
            end_excl: false,
            constant_score: false,
        };
        let simplified = q.simplify(searcher.schema()).unwrap();
        assert!(matches!(simplified, Query::Or(_) | Query::Term { .. } | Query::TermRange { .. }));

        let results = searcher.search(&q, &SearchContext::default().with_limit(None)).unwrap();
        let mut values: Vec<i64> = results
            .hits
            .iter()
            .map(|h| searcher.stored_fields(h.doc).unwrap().get("n").unwrap().as_f64().unwrap() as i64)
            .collect();
        values.sort_unstable();
        assert_eq!(values, vec![10, 100, 1000, 5925]);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let storage = RamStorage::new();
        let dir = tempfile::tempdir().unwrap();
        let mut writer = Writer::create(&storage, schema(), DEFAULT_INDEX_NAME, WriterConfig::new(dir.path())).unwrap();
        let err = writer.add_document(vec![("nope".into(), FieldValue::Text("x".into()))]).unwrap_err();
        assert!(matches!(err, Error::FieldConfiguration(_)));
    }
}
