//! Matchers: cursors over ascending doc-ids, composable into disjunctions,
//! conjunctions, phrases and filters, and able to score the current doc.

use crate::scoring::{FieldStats, WeightingModel};
use crate::DocId;
use std::collections::HashSet;

pub trait Matcher {
    fn doc(&self) -> DocId;
    /// Advance past the current doc. Returns `false` once exhausted.
    fn next(&mut self) -> bool;
    /// Advance to the first doc `>= target`. Returns `false` once exhausted.
    fn skip_to(&mut self, target: DocId) -> bool;
    fn is_done(&self) -> bool {
        self.doc().is_done()
    }
    fn score(&self) -> f32;
    fn positions(&self) -> Option<&[u32]> {
        None
    }
}

/// A single term's postings, already decoded from a `BlockReader`.
pub struct TermMatcher<'w> {
    ids: Vec<u32>,
    freqs: Vec<f32>,
    lengths: Vec<u8>,
    positions: Vec<Option<Vec<u32>>>,
    cursor: usize,
    idf: f32,
    field_stats: FieldStats,
    weighting: &'w dyn WeightingModel,
}

impl<'w> TermMatcher<'w> {
    pub fn new(
        ids: Vec<u32>,
        freqs: Vec<f32>,
        lengths: Vec<u8>,
        positions: Vec<Option<Vec<u32>>>,
        field_stats: FieldStats,
        weighting: &'w dyn WeightingModel,
    ) -> Self {
        let idf = weighting.idf(ids.len() as u64, &field_stats);
        Self { ids, freqs, lengths, positions, cursor: 0, idf, field_stats, weighting }
    }

    pub fn estimate_doc_freq(&self) -> u64 {
        self.ids.len() as u64
    }
}

impl<'w> Matcher for TermMatcher<'w> {
    fn doc(&self) -> DocId {
        self.ids.get(self.cursor).map(|&id| DocId(id)).unwrap_or(DocId::NO_MORE)
    }
    fn next(&mut self) -> bool {
        if self.cursor < self.ids.len() {
            self.cursor += 1;
        }
        self.cursor < self.ids.len()
    }
    fn skip_to(&mut self, target: DocId) -> bool {
        while self.cursor < self.ids.len() && self.ids[self.cursor] < target.0 {
            self.cursor += 1;
        }
        self.cursor < self.ids.len()
    }
    fn score(&self) -> f32 {
        if self.cursor >= self.ids.len() {
            return 0.0;
        }
        let tf = self.freqs[self.cursor];
        let len = *self.lengths.get(self.cursor).unwrap_or(&1) as f32;
        self.weighting.score(tf, len, self.idf, &self.field_stats)
    }
    fn positions(&self) -> Option<&[u32]> {
        self.positions.get(self.cursor).and_then(|p| p.as_deref())
    }
}

/// Min-heap-free union: `n` small child counts make an O(n) scan per
/// advance perfectly adequate and keeps the borrow checker calm.
pub struct UnionMatcher<'a> {
    children: Vec<Box<dyn Matcher + 'a>>,
    current: DocId,
}

impl<'a> UnionMatcher<'a> {
    pub fn new(children: Vec<Box<dyn Matcher + 'a>>) -> Box<dyn Matcher + 'a> {
        let mut m = UnionMatcher { children, current: DocId::NO_MORE };
        m.advance_to_min();
        Box::new(m)
    }
    fn advance_to_min(&mut self) {
        self.current = self
            .children
            .iter()
            .map(|c| c.doc())
            .filter(|d| !d.is_done())
            .min()
            .unwrap_or(DocId::NO_MORE);
    }
}

impl<'a> Matcher for UnionMatcher<'a> {
    fn doc(&self) -> DocId {
        self.current
    }
    fn next(&mut self) -> bool {
        let at = self.current;
        for c in self.children.iter_mut() {
            if c.doc() == at {
                c.next();
            }
        }
        self.advance_to_min();
        !self.current.is_done()
    }
    fn skip_to(&mut self, target: DocId) -> bool {
        for c in self.children.iter_mut() {
            if !c.doc().is_done() && c.doc() < target {
                c.skip_to(target);
            }
        }
        self.advance_to_min();
        !self.current.is_done()
    }
    fn score(&self) -> f32 {
        self.children.iter().filter(|c| c.doc() == self.current).map(|c| c.score()).sum()
    }
}

/// Leapfrog intersection: repeatedly skip the least-advanced child to the
/// most-advanced child's position until they all agree.
pub struct IntersectionMatcher<'a> {
    children: Vec<Box<dyn Matcher + 'a>>,
    current: DocId,
}

impl<'a> IntersectionMatcher<'a> {
    pub fn new(children: Vec<Box<dyn Matcher + 'a>>) -> Box<dyn Matcher + 'a> {
        let mut m = IntersectionMatcher { children, current: DocId(0) };
        m.converge();
        Box::new(m)
    }
    fn converge(&mut self) {
        if self.children.is_empty() {
            self.current = DocId::NO_MORE;
            return;
        }
        loop {
            let target = match self.children.iter().map(|c| c.doc()).max() {
                Some(t) if !t.is_done() => t,
                _ => {
                    self.current = DocId::NO_MORE;
                    return;
                }
            };
            let mut all_match = true;
            for c in self.children.iter_mut() {
                if c.doc() != target {
                    if !c.skip_to(target) || c.doc() != target {
                        all_match = false;
                    }
                }
            }
            if all_match {
                self.current = target;
                return;
            }
        }
    }
}

impl<'a> Matcher for IntersectionMatcher<'a> {
    fn doc(&self) -> DocId {
        self.current
    }
    fn next(&mut self) -> bool {
        if self.current.is_done() {
            return false;
        }
        for c in self.children.iter_mut() {
            c.next();
        }
        self.converge();
        !self.current.is_done()
    }
    fn skip_to(&mut self, target: DocId) -> bool {
        for c in self.children.iter_mut() {
            if c.doc() < target {
                c.skip_to(target);
            }
        }
        self.converge();
        !self.current.is_done()
    }
    fn score(&self) -> f32 {
        self.children.iter().map(|c| c.score()).sum()
    }
}

/// Intersects its children (each term's position list holds), then verifies
/// positional adjacency within `slop` before a doc counts as a match.
/// Term `i` must contribute a position `p + i` for some common `p`, allowing
/// up to `slop` extra or missing words in between.
pub struct PhraseMatcher<'a> {
    children: Vec<Box<dyn Matcher + 'a>>,
    current: DocId,
    slop: u32,
}

impl<'a> PhraseMatcher<'a> {
    pub fn new(children: Vec<Box<dyn Matcher + 'a>>, slop: u32) -> Box<dyn Matcher + 'a> {
        let mut m = PhraseMatcher { children, current: DocId(0), slop };
        m.seek_first_match();
        Box::new(m)
    }

    fn converge_docs(&mut self) -> bool {
        if self.children.is_empty() {
            self.current = DocId::NO_MORE;
            return false;
        }
        loop {
            let target = match self.children.iter().map(|c| c.doc()).max() {
                Some(t) if !t.is_done() => t,
                _ => {
                    self.current = DocId::NO_MORE;
                    return false;
                }
            };
            let mut all_match = true;
            for c in self.children.iter_mut() {
                if c.doc() != target && (!c.skip_to(target) || c.doc() != target) {
                    all_match = false;
                }
            }
            if all_match {
                self.current = target;
                return true;
            }
        }
    }

    fn positions_match(&self) -> bool {
        let lists: Vec<&[u32]> = match self.children.iter().map(|c| c.positions()).collect::<Option<Vec<_>>>() {
            Some(l) if !l.is_empty() => l,
            _ => return false,
        };
        // anchor on the first term's positions; check every other term has
        // some position within `slop` of `anchor + offset`.
        for &anchor in lists[0] {
            let mut ok = true;
            for (offset, positions) in lists.iter().enumerate().skip(1) {
                let expected = anchor as i64 + offset as i64;
                let found = positions.iter().any(|&p| (p as i64 - expected).unsigned_abs() as u32 <= self.slop);
                if !found {
                    ok = false;
                    break;
                }
            }
            if ok {
                return true;
            }
        }
        false
    }

    fn seek_first_match(&mut self) {
        while self.converge_docs() {
            if self.positions_match() {
                return;
            }
            self.children[0].next();
        }
    }
}

impl<'a> Matcher for PhraseMatcher<'a> {
    fn doc(&self) -> DocId {
        self.current
    }
    fn next(&mut self) -> bool {
        if self.current.is_done() {
            return false;
        }
        self.children[0].next();
        self.seek_first_match();
        !self.current.is_done()
    }
    fn skip_to(&mut self, target: DocId) -> bool {
        if self.current >= target {
            return !self.current.is_done();
        }
        for c in self.children.iter_mut() {
            c.skip_to(target);
        }
        self.seek_first_match();
        !self.current.is_done()
    }
    fn score(&self) -> f32 {
        self.children.iter().map(|c| c.score()).sum()
    }
}

/// Matches every doc-id in `[0, doc_count)`, unscored; the universe a `Not`
/// query subtracts from, and the matcher behind an unrestricted `Every`.
pub struct AllDocsMatcher {
    doc_count: u32,
    current: u32,
}

impl AllDocsMatcher {
    pub fn new(doc_count: u32) -> Box<dyn Matcher> {
        Box::new(AllDocsMatcher { doc_count, current: 0 })
    }
}

impl Matcher for AllDocsMatcher {
    fn doc(&self) -> DocId {
        if self.current < self.doc_count {
            DocId(self.current)
        } else {
            DocId::NO_MORE
        }
    }
    fn next(&mut self) -> bool {
        if self.current < self.doc_count {
            self.current += 1;
        }
        self.current < self.doc_count
    }
    fn skip_to(&mut self, target: DocId) -> bool {
        if target.0 > self.current {
            self.current = target.0;
        }
        self.current < self.doc_count
    }
    fn score(&self) -> f32 {
        1.0
    }
}

/// Advances by the required child; when the optional child also has the
/// current doc, its score is added in, but it never affects which docs match.
pub struct AndMaybeMatcher<'a> {
    required: Box<dyn Matcher + 'a>,
    optional: Box<dyn Matcher + 'a>,
}

impl<'a> AndMaybeMatcher<'a> {
    pub fn new(required: Box<dyn Matcher + 'a>, mut optional: Box<dyn Matcher + 'a>) -> Box<dyn Matcher + 'a> {
        if !required.is_done() {
            optional.skip_to(required.doc());
        }
        Box::new(AndMaybeMatcher { required, optional })
    }
}

impl<'a> Matcher for AndMaybeMatcher<'a> {
    fn doc(&self) -> DocId {
        self.required.doc()
    }
    fn next(&mut self) -> bool {
        let r = self.required.next();
        if !self.required.is_done() {
            self.optional.skip_to(self.required.doc());
        }
        r
    }
    fn skip_to(&mut self, target: DocId) -> bool {
        let r = self.required.skip_to(target);
        if !self.required.is_done() {
            self.optional.skip_to(self.required.doc());
        }
        r
    }
    fn score(&self) -> f32 {
        let base = self.required.score();
        if !self.required.is_done() && self.optional.doc() == self.required.doc() {
            base + self.optional.score()
        } else {
            base
        }
    }
}

/// Wraps a matcher so every hit scores a fixed constant, ignoring the
/// wrapped matcher's own scoring.
pub struct ConstantScoreMatcher<'a> {
    inner: Box<dyn Matcher + 'a>,
    value: f32,
}

impl<'a> ConstantScoreMatcher<'a> {
    pub fn wrap(inner: Box<dyn Matcher + 'a>) -> Box<dyn Matcher + 'a> {
        Self::wrap_with(inner, 1.0)
    }
    pub fn wrap_with(inner: Box<dyn Matcher + 'a>, value: f32) -> Box<dyn Matcher + 'a> {
        Box::new(ConstantScoreMatcher { inner, value })
    }
}

impl<'a> Matcher for ConstantScoreMatcher<'a> {
    fn doc(&self) -> DocId {
        self.inner.doc()
    }
    fn next(&mut self) -> bool {
        self.inner.next()
    }
    fn skip_to(&mut self, target: DocId) -> bool {
        self.inner.skip_to(target)
    }
    fn score(&self) -> f32 {
        self.value
    }
    fn positions(&self) -> Option<&[u32]> {
        self.inner.positions()
    }
}

/// Wraps a matcher, scaling its score by a fixed boost factor.
pub struct BoostMatcher<'a> {
    inner: Box<dyn Matcher + 'a>,
    boost: f32,
}

impl<'a> BoostMatcher<'a> {
    pub fn wrap(inner: Box<dyn Matcher + 'a>, boost: f32) -> Box<dyn Matcher + 'a> {
        Box::new(BoostMatcher { inner, boost })
    }
}

impl<'a> Matcher for BoostMatcher<'a> {
    fn doc(&self) -> DocId {
        self.inner.doc()
    }
    fn next(&mut self) -> bool {
        self.inner.next()
    }
    fn skip_to(&mut self, target: DocId) -> bool {
        self.inner.skip_to(target)
    }
    fn score(&self) -> f32 {
        self.inner.score() * self.boost
    }
    fn positions(&self) -> Option<&[u32]> {
        self.inner.positions()
    }
}

/// Wraps a matcher with an include/exclude doc-id filter.
pub struct FilterMatcher<'a> {
    inner: Box<dyn Matcher + 'a>,
    include: Option<HashSet<u32>>,
    exclude: Option<HashSet<u32>>,
}

impl<'a> FilterMatcher<'a> {
    pub fn new(
        inner: Box<dyn Matcher + 'a>,
        include: Option<HashSet<u32>>,
        exclude: Option<HashSet<u32>>,
    ) -> Box<dyn Matcher + 'a> {
        let mut m = FilterMatcher { inner, include, exclude };
        m.skip_to_allowed();
        Box::new(m)
    }
    fn allowed(&self, doc: DocId) -> bool {
        if let Some(inc) = &self.include {
            if !inc.contains(&doc.0) {
                return false;
            }
        }
        if let Some(exc) = &self.exclude {
            if exc.contains(&doc.0) {
                return false;
            }
        }
        true
    }
    fn skip_to_allowed(&mut self) {
        while !self.inner.is_done() && !self.allowed(self.inner.doc()) {
            self.inner.next();
        }
    }
}

impl<'a> Matcher for FilterMatcher<'a> {
    fn doc(&self) -> DocId {
        self.inner.doc()
    }
    fn next(&mut self) -> bool {
        let r = self.inner.next();
        self.skip_to_allowed();
        r && !self.inner.is_done()
    }
    fn skip_to(&mut self, target: DocId) -> bool {
        let r = self.inner.skip_to(target);
        self.skip_to_allowed();
        r && !self.inner.is_done()
    }
    fn score(&self) -> f32 {
        self.inner.score()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::Bm25F;

    fn term(ids: &[u32], weighting: &dyn WeightingModel) -> TermMatcher {
        let freqs = vec![1.0; ids.len()];
        let lengths = vec![10u8; ids.len()];
        let positions = vec![None; ids.len()];
        TermMatcher::new(
            ids.to_vec(),
            freqs,
            lengths,
            positions,
            FieldStats { document_count: 100, total_length: 1000 },
            weighting,
        )
    }

    fn term_with_positions(ids: &[u32], positions: Vec<Vec<u32>>, weighting: &dyn WeightingModel) -> TermMatcher {
        let freqs = vec![1.0; ids.len()];
        let lengths = vec![10u8; ids.len()];
        let positions = positions.into_iter().map(Some).collect();
        TermMatcher::new(
            ids.to_vec(),
            freqs,
            lengths,
            positions,
            FieldStats { document_count: 100, total_length: 1000 },
            weighting,
        )
    }

    #[test]
    fn union_visits_sorted_union_of_doc_ids() {
        let bm25 = Bm25F::default();
        let a = Box::new(term(&[1, 3, 5], &bm25));
        let b = Box::new(term(&[2, 3, 6], &bm25));
        let mut u = UnionMatcher::new(vec![a, b]);
        let mut seen = vec![u.doc().0];
        while u.next() {
            seen.push(u.doc().0);
        }
        assert_eq!(seen, vec![1, 2, 3, 5, 6]);
    }

    #[test]
    fn intersection_visits_only_common_doc_ids() {
        let bm25 = Bm25F::default();
        let a = Box::new(term(&[1, 3, 5, 7], &bm25));
        let b = Box::new(term(&[3, 5, 9], &bm25));
        let mut i = IntersectionMatcher::new(vec![a, b]);
        let mut seen = vec![i.doc().0];
        while i.next() {
            seen.push(i.doc().0);
        }
        assert_eq!(seen, vec![3, 5]);
    }

    #[test]
    fn phrase_matcher_requires_positional_adjacency() {
        let bm25 = Bm25F::default();
        // "quick" at 0 (doc 1) and 5 (doc 2); "fox" at 1 (doc 1, adjacent)
        // and 8 (doc 2, three words later).
        let quick = Box::new(term_with_positions(&[1, 2], vec![vec![0], vec![5]], &bm25));
        let fox = Box::new(term_with_positions(&[1, 2], vec![vec![1], vec![8]], &bm25));
        let mut exact = PhraseMatcher::new(vec![quick, fox], 0);
        let mut seen = vec![exact.doc().0];
        while exact.next() {
            seen.push(exact.doc().0);
        }
        assert_eq!(seen, vec![1]);

        let quick = Box::new(term_with_positions(&[1, 2], vec![vec![0], vec![5]], &bm25));
        let fox = Box::new(term_with_positions(&[1, 2], vec![vec![1], vec![8]], &bm25));
        let mut sloppy = PhraseMatcher::new(vec![quick, fox], 2);
        let mut seen = vec![sloppy.doc().0];
        while sloppy.next() {
            seen.push(sloppy.doc().0);
        }
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn all_docs_matcher_visits_every_id_in_range() {
        let mut m = AllDocsMatcher::new(4);
        let mut seen = vec![m.doc().0];
        while m.next() {
            seen.push(m.doc().0);
        }
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn and_maybe_matcher_boosts_when_optional_also_matches() {
        let bm25 = Bm25F::default();
        let required = Box::new(term(&[1, 2, 3], &bm25));
        let optional = Box::new(term(&[2], &bm25));
        let mut m = AndMaybeMatcher::new(required, optional);
        // doc 1: only required matches.
        assert_eq!(m.doc().0, 1);
        let base = m.score();
        m.next();
        // doc 2: both match, so the combined score should be higher.
        assert_eq!(m.doc().0, 2);
        assert!(m.score() > base);
        m.next();
        assert_eq!(m.doc().0, 3);
    }

    #[test]
    fn constant_score_matcher_ignores_inner_score() {
        let bm25 = Bm25F::default();
        let inner = Box::new(term(&[1, 2], &bm25));
        let m = ConstantScoreMatcher::wrap_with(inner, 2.5);
        assert_eq!(m.score(), 2.5);
    }

    #[test]
    fn boost_matcher_scales_inner_score() {
        let bm25 = Bm25F::default();
        let inner = Box::new(term(&[1], &bm25));
        let plain_score = term(&[1], &bm25).score();
        let boosted = BoostMatcher::wrap(inner, 3.0);
        assert_eq!(boosted.score(), plain_score * 3.0);
    }

    #[test]
    fn filter_include_restricts_results() {
        let bm25 = Bm25F::default();
        let inner = Box::new(term(&[1, 2, 3, 4], &bm25));
        let mut include = HashSet::new();
        include.insert(2);
        include.insert(4);
        let mut f = FilterMatcher::new(inner, Some(include), None);
        let mut seen = vec![f.doc().0];
        while f.next() {
            seen.push(f.doc().0);
        }
        assert_eq!(seen, vec![2, 4]);
    }
}
