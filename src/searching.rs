//! Query execution: compile a (simplified) `Query` into a `Matcher` tree
//! over one segment's term table and postings, collect top-k hits across
//! every segment in an index, and paginate the result.
//!
//! Grounded on Whoosh's `searching.py` (`SearchContext`, `setup_weighting`
//! defaulting to BM25F, `SearcherType`/`Searcher` multi-segment delegation
//! by doc-offset) for the orchestration shape; the per-segment matcher
//! compilation walks the same `Query` tags the teacher's own `lang.rs`
//! `QExpr` evaluator walks, built from this crate's `matching.rs` types.

use crate::codec::BlockReader;
use crate::docstore::DocStoreReader;
use crate::heap::{ScoreDoc, ScoringHeap};
use crate::io_helper::ArcInputStream;
use crate::matching::{
    AllDocsMatcher, AndMaybeMatcher, BoostMatcher, ConstantScoreMatcher, FilterMatcher, IntersectionMatcher, Matcher,
    PhraseMatcher, TermMatcher, UnionMatcher,
};
use crate::query::Query;
use crate::schema::{FieldValue, Schema};
use crate::scoring::{Bm25F, FieldStats, WeightingModel};
use crate::storage::SegmentMeta;
use crate::termtable::{TermEntry, TermTableReader};
use crate::DocId;
use crate::Error;
use std::collections::BTreeMap;
use std::collections::HashSet;

/// How a search should be scored and windowed. A `None` weighting means
/// boolean (unscored) matching, where every hit scores `1.0`.
pub struct SearchContext {
    pub weighting: Option<Box<dyn WeightingModel>>,
    pub offset: usize,
    pub limit: Option<usize>,
    pub include: Option<HashSet<u32>>,
    pub exclude: Option<HashSet<u32>>,
}

impl Default for SearchContext {
    fn default() -> Self {
        Self {
            weighting: Some(Box::new(Bm25F::default())),
            offset: 0,
            limit: Some(10),
            include: None,
            exclude: None,
        }
    }
}

impl SearchContext {
    /// Unscored matching: every hit carries a score of `1.0`.
    pub fn boolean() -> Self {
        Self { weighting: None, ..Self::default() }
    }

    pub fn scored(&self) -> bool {
        self.weighting.is_some()
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
    pub fn with_include(mut self, include: HashSet<u32>) -> Self {
        self.include = Some(include);
        self
    }
    pub fn with_exclude(mut self, exclude: HashSet<u32>) -> Self {
        self.exclude = Some(exclude);
        self
    }
}

/// One flushed segment, opened read-only: its term table, posting bytes, and
/// the per-field corpus statistics a weighting model needs.
pub struct SegmentReader {
    meta: SegmentMeta,
    schema: Schema,
    field_ids: BTreeMap<String, u16>,
    id_to_name: BTreeMap<u16, String>,
    term_table: TermTableReader,
    postings: ArcInputStream,
    docstore: Option<DocStoreReader>,
}

impl SegmentReader {
    pub fn new(
        meta: SegmentMeta,
        schema: Schema,
        field_ids: BTreeMap<String, u16>,
        term_table: TermTableReader,
        postings: ArcInputStream,
        docstore: Option<DocStoreReader>,
    ) -> Self {
        let id_to_name = field_ids.iter().map(|(name, id)| (*id, name.clone())).collect();
        Self { meta, schema, field_ids, id_to_name, term_table, postings, docstore }
    }

    pub fn doc_count(&self) -> u32 {
        self.meta.doc_count
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// This segment's stored field values for one of its own (segment-local)
    /// doc-ids, keyed back by field name. Empty if the segment carries no
    /// document store (e.g. nothing in the schema was marked `stored`).
    pub fn stored_fields(&self, doc_id: u32) -> Result<BTreeMap<String, FieldValue>, Error> {
        let store = match &self.docstore {
            Some(s) => s,
            None => return Ok(BTreeMap::new()),
        };
        let by_id = store.stored_fields(doc_id)?;
        Ok(by_id
            .into_iter()
            .filter_map(|(id, value)| self.id_to_name.get(&id).map(|name| (name.clone(), value)))
            .collect())
    }

    fn field_stats(&self, field_id: u16) -> FieldStats {
        self.meta.field_stats.get(&field_id).copied().unwrap_or_default()
    }

    /// Resolves a field name to its id: a direct hit, or (for a concrete
    /// name that only matches a dynamic pattern, e.g. `"attr_color"` against
    /// a declared `"attr_*"`) the id assigned to that pattern.
    fn field_id(&self, name: &str) -> Option<u16> {
        self.field_ids
            .get(name)
            .copied()
            .or_else(|| self.schema.dynamic_pattern_for(name).and_then(|p| self.field_ids.get(p).copied()))
    }

    fn decode_block<'w>(
        &self,
        field_id: u16,
        entry: &TermEntry,
        weighting: &'w dyn WeightingModel,
    ) -> Result<Box<dyn Matcher + 'w>, Error> {
        let start = entry.postings_offset as usize;
        let end = start + entry.postings_len as usize;
        let slice = self.postings.slice(start, end);
        let bytes = slice.as_bytes().to_vec();
        let block = BlockReader::parse(&bytes)?;
        let n = block.len();
        let ids = block.all_ids()?;
        let mut freqs = Vec::with_capacity(n);
        let mut lengths = Vec::with_capacity(n);
        let mut positions = Vec::with_capacity(n);
        for i in 0..n {
            freqs.push(block.weight(i)?.unwrap_or(1.0));
            lengths.push(block.length(i)?.unwrap_or(1));
            positions.push(block.positions(i)?);
        }
        Ok(Box::new(TermMatcher::new(ids, freqs, lengths, positions, self.field_stats(field_id), weighting)))
    }

    /// A single term's matcher, or `None` if the term (or field) is absent
    /// from this segment.
    pub fn term_matcher<'w>(
        &self,
        field: &str,
        term: &[u8],
        weighting: &'w dyn WeightingModel,
    ) -> Result<Option<Box<dyn Matcher + 'w>>, Error> {
        let field_id = match self.field_id(field) {
            Some(id) => id,
            None => return Ok(None),
        };
        match self.term_table.get(field_id, term)? {
            Some(entry) => Ok(Some(self.decode_block(field_id, &entry, weighting)?)),
            None => Ok(None),
        }
    }

    fn terms_in_range(
        &self,
        field_id: u16,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        start_excl: bool,
        end_excl: bool,
    ) -> Result<Vec<(Vec<u8>, TermEntry)>, Error> {
        let mut out = Vec::new();
        for decoded in self.term_table.iter() {
            let decoded = decoded?;
            if decoded.field_id != field_id {
                continue;
            }
            if let Some(s) = start {
                let ord = decoded.term.as_slice().cmp(s);
                if ord == std::cmp::Ordering::Less || (start_excl && ord == std::cmp::Ordering::Equal) {
                    continue;
                }
            }
            if let Some(e) = end {
                let ord = decoded.term.as_slice().cmp(e);
                if ord == std::cmp::Ordering::Greater || (end_excl && ord == std::cmp::Ordering::Equal) {
                    continue;
                }
            }
            out.push((decoded.term, decoded.entry));
        }
        Ok(out)
    }

    /// Compiles an already-[`Query::simplify`]d query into a matcher over
    /// this segment alone; doc-ids in the result are segment-local.
    pub fn build_matcher<'w>(
        &self,
        query: &Query,
        weighting: &'w dyn WeightingModel,
    ) -> Result<Option<Box<dyn Matcher + 'w>>, Error> {
        match query {
            Query::Term { field, term } => self.term_matcher(field, term, weighting),
            Query::TermRange { field, start, end, start_excl, end_excl } => {
                let field_id = match self.field_id(field) {
                    Some(id) => id,
                    None => return Ok(None),
                };
                let terms =
                    self.terms_in_range(field_id, start.as_deref(), end.as_deref(), *start_excl, *end_excl)?;
                let mut children = Vec::with_capacity(terms.len());
                for (_, entry) in &terms {
                    children.push(self.decode_block(field_id, entry, weighting)?);
                }
                if children.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(UnionMatcher::new(children)))
                }
            }
            Query::NumericRange { .. } => Err(Error::QueryParser(
                "NumericRange must be simplified before matching".into(),
            )),
            Query::Every { field } => {
                if let Some(field) = field {
                    if self.field_id(field).is_none() {
                        return Ok(None);
                    }
                }
                Ok(Some(AllDocsMatcher::new(self.doc_count())))
            }
            Query::And(children) => {
                let mut built = Vec::with_capacity(children.len());
                for c in children {
                    match self.build_matcher(c, weighting)? {
                        Some(m) => built.push(m),
                        None => return Ok(None),
                    }
                }
                Ok(Some(IntersectionMatcher::new(built)))
            }
            Query::Or(children) => {
                let mut built = Vec::new();
                for c in children {
                    if let Some(m) = self.build_matcher(c, weighting)? {
                        built.push(m);
                    }
                }
                if built.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(UnionMatcher::new(built)))
                }
            }
            Query::Not(inner) => {
                let excluded = match self.build_matcher(inner, weighting)? {
                    Some(m) => collect_ids(m),
                    None => HashSet::default(),
                };
                Ok(Some(FilterMatcher::new(AllDocsMatcher::new(self.doc_count()), None, Some(excluded))))
            }
            Query::AndNot(a, b) => {
                let a_matcher = match self.build_matcher(a, weighting)? {
                    Some(m) => m,
                    None => return Ok(None),
                };
                let excluded = match self.build_matcher(b, weighting)? {
                    Some(m) => collect_ids(m),
                    None => HashSet::default(),
                };
                Ok(Some(FilterMatcher::new(a_matcher, None, Some(excluded))))
            }
            Query::AndMaybe(a, b) => {
                let a_matcher = match self.build_matcher(a, weighting)? {
                    Some(m) => m,
                    None => return Ok(None),
                };
                match self.build_matcher(b, weighting)? {
                    Some(b_matcher) => Ok(Some(AndMaybeMatcher::new(a_matcher, b_matcher))),
                    None => Ok(Some(a_matcher)),
                }
            }
            Query::Phrase { field, terms, slop } => {
                let mut children = Vec::with_capacity(terms.len());
                for t in terms {
                    match self.term_matcher(field, t, weighting)? {
                        Some(m) => children.push(m),
                        None => return Ok(None),
                    }
                }
                Ok(Some(PhraseMatcher::new(children, *slop)))
            }
            Query::ConstantScore(inner) => Ok(self.build_matcher(inner, weighting)?.map(ConstantScoreMatcher::wrap)),
            Query::Boost(inner, boost) => {
                Ok(self.build_matcher(inner, weighting)?.map(|m| BoostMatcher::wrap(m, *boost)))
            }
            Query::Null => Ok(None),
            Query::Error { message, .. } => Err(Error::QueryParser(message.clone())),
        }
    }
}

/// Materialises a matcher's remaining doc-ids, for query nodes (`Not`,
/// `AndNot`) that need to know the full exclusion set up front rather than
/// walking it lazily alongside another matcher.
fn collect_ids(mut m: Box<dyn Matcher + '_>) -> HashSet<u32> {
    let mut out = HashSet::default();
    if !m.is_done() {
        out.insert(m.doc().0);
        while m.next() {
            out.insert(m.doc().0);
        }
    }
    out
}

/// One ranked hit: a segment-independent (globally offset) doc-id and score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub doc: DocId,
    pub score: f32,
}

/// Ranked hits from a completed search, in descending-score order.
pub struct Results {
    pub hits: Vec<Hit>,
    /// Total number of matching docs seen, even when `hits` was capped by a limit.
    pub total: usize,
}

impl Results {
    pub fn len(&self) -> usize {
        self.hits.len()
    }
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
    pub fn scored_length(&self) -> usize {
        self.hits.len()
    }

    /// One-indexed page of `pagelen` hits.
    pub fn page(&self, pagenum: usize, pagelen: usize) -> ResultsPage {
        if pagelen == 0 {
            return ResultsPage { items: vec![], pagenum, pagelen, pagecount: 0, total: self.total };
        }
        let start = pagenum.saturating_sub(1) * pagelen;
        let items = if start < self.hits.len() {
            let end = (start + pagelen).min(self.hits.len());
            self.hits[start..end].to_vec()
        } else {
            vec![]
        };
        let pagecount = (self.hits.len() + pagelen - 1) / pagelen;
        ResultsPage { items, pagenum, pagelen, pagecount, total: self.total }
    }
}

#[derive(Debug, Clone)]
pub struct ResultsPage {
    pub items: Vec<Hit>,
    pub pagenum: usize,
    pub pagelen: usize,
    pub pagecount: usize,
    pub total: usize,
}

/// A multi-segment, read-only view of an index: the schema plus every
/// segment's reader, each assigned a doc-id offset so a query's hits can be
/// reported against one global doc-id space.
pub struct Searcher {
    schema: Schema,
    segments: Vec<(SegmentReader, u32)>,
}

impl Searcher {
    pub fn new(schema: Schema, segments: Vec<SegmentReader>) -> Self {
        let mut offset = 0u32;
        let segments = segments
            .into_iter()
            .map(|s| {
                let doc_offset = offset;
                offset += s.doc_count();
                (s, doc_offset)
            })
            .collect();
        Self { schema, segments }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn doc_count(&self) -> u32 {
        self.segments.iter().map(|(s, _)| s.doc_count()).sum()
    }

    /// Looks up the owning segment for a globally-offset doc-id and returns
    /// its stored field values, keyed by field name.
    pub fn stored_fields(&self, doc: DocId) -> Result<BTreeMap<String, FieldValue>, Error> {
        for (segment, doc_offset) in &self.segments {
            if doc.0 >= *doc_offset && doc.0 < *doc_offset + segment.doc_count() {
                return segment.stored_fields(doc.0 - doc_offset);
            }
        }
        Err(Error::OutOfRange)
    }

    /// Runs `query` (simplified and normalized against the schema first)
    /// across every segment, returning globally-ranked hits.
    pub fn search(&self, query: &Query, ctx: &SearchContext) -> Result<Results, Error> {
        let simplified = query.simplify(&self.schema)?.normalize();
        let default_weighting = Bm25F::default();
        let weighting: &dyn WeightingModel = ctx.weighting.as_deref().unwrap_or(&default_weighting);

        // Bounded top-k when a limit is set; otherwise collect and sort
        // everything (there's no fixed window to discard against).
        let mut heap = ctx.limit.map(|limit| ScoringHeap::new(ctx.offset.saturating_add(limit).max(1)));
        let mut unbounded: Vec<ScoreDoc> = Vec::new();
        let mut total = 0usize;

        for (segment, doc_offset) in &self.segments {
            let matcher = match segment.build_matcher(&simplified, weighting)? {
                Some(m) => m,
                None => continue,
            };
            let mut matcher = FilterMatcher::new(matcher, ctx.include.clone(), ctx.exclude.clone());
            if matcher.is_done() {
                continue;
            }
            loop {
                total += 1;
                let score = if ctx.scored() { matcher.score() } else { 1.0 };
                let sd = ScoreDoc { score, doc: DocId(matcher.doc().0 + doc_offset) };
                match &mut heap {
                    Some(h) => h.offer(sd),
                    None => unbounded.push(sd),
                }
                if !matcher.next() {
                    break;
                }
            }
        }

        let mut sorted = match heap {
            Some(h) => h.into_sorted_vec(),
            None => {
                unbounded.sort();
                unbounded
            }
        };
        if ctx.offset > 0 {
            let skip = ctx.offset.min(sorted.len());
            sorted.drain(0..skip);
        }
        let hits = sorted.into_iter().map(|sd| Hit { doc: sd.doc, score: sd.score }).collect();
        Ok(Results { hits, total })
    }

    /// Convenience matching Whoosh's `search_page`: an unlimited search,
    /// windowed into one page afterward.
    pub fn search_page(&self, query: &Query, pagenum: usize, pagelen: usize) -> Result<ResultsPage, Error> {
        let ctx = SearchContext::default().with_limit(None);
        let results = self.search(query, &ctx)?;
        Ok(results.page(pagenum, pagelen))
    }
}
