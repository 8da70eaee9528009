//! The query algebra: a closed set of tagged nodes, with `normalize`
//! (remove redundancy), `simplify` (rewrite higher-order nodes into lower-
//! order ones, e.g. numeric ranges into tiered term disjunctions), and
//! `merge` (combine two ranges on the same field).

use crate::numeric::NumFormat;
use crate::schema::Schema;
use crate::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Term { field: String, term: Vec<u8> },
    TermRange {
        field: String,
        start: Option<Vec<u8>>,
        end: Option<Vec<u8>>,
        start_excl: bool,
        end_excl: bool,
    },
    NumericRange {
        field: String,
        start: Option<f64>,
        end: Option<f64>,
        start_excl: bool,
        end_excl: bool,
        constant_score: bool,
    },
    Every { field: Option<String> },
    And(Vec<Query>),
    Or(Vec<Query>),
    Not(Box<Query>),
    AndNot(Box<Query>, Box<Query>),
    AndMaybe(Box<Query>, Box<Query>),
    Phrase { field: String, terms: Vec<Vec<u8>>, slop: u32 },
    ConstantScore(Box<Query>),
    Boost(Box<Query>, f32),
    /// Matches nothing.
    Null,
    /// Carries a parse error so a caller can render it positioned in the
    /// original query string; never reaches the matcher.
    Error { message: String, start_char: u32, end_char: u32 },
}

impl Query {
    /// Remove obvious redundancy without consulting the schema: flatten
    /// nested And/Or, collapse degenerate ranges.
    pub fn normalize(&self) -> Query {
        match self {
            Query::And(children) => {
                let flat = flatten(children, |q| matches!(q, Query::And(_)), |q| match q {
                    Query::And(c) => c,
                    _ => unreachable!(),
                });
                if flat.iter().any(|q| *q == Query::Null) {
                    return Query::Null;
                }
                match flat.len() {
                    0 => Query::Every { field: None },
                    1 => flat.into_iter().next().unwrap(),
                    _ => Query::And(flat),
                }
            }
            Query::Or(children) => {
                let flat = flatten(children, |q| matches!(q, Query::Or(_)), |q| match q {
                    Query::Or(c) => c,
                    _ => unreachable!(),
                });
                let flat: Vec<Query> = flat.into_iter().filter(|q| *q != Query::Null).collect();
                match flat.len() {
                    0 => Query::Null,
                    1 => flat.into_iter().next().unwrap(),
                    _ => Query::Or(flat),
                }
            }
            Query::Not(inner) => Query::Not(Box::new(inner.normalize())),
            Query::AndNot(a, b) => Query::AndNot(Box::new(a.normalize()), Box::new(b.normalize())),
            Query::AndMaybe(a, b) => Query::AndMaybe(Box::new(a.normalize()), Box::new(b.normalize())),
            Query::ConstantScore(inner) => Query::ConstantScore(Box::new(inner.normalize())),
            Query::Boost(inner, b) => Query::Boost(Box::new(inner.normalize()), *b),
            Query::TermRange { field, start, end, start_excl, end_excl } => {
                normalize_range(field.clone(), start.clone(), end.clone(), *start_excl, *end_excl)
            }
            other => other.clone(),
        }
    }

    /// Rewrite higher-order nodes (today: `NumericRange`) into the
    /// lower-order nodes an index reader actually knows how to match.
    pub fn simplify(&self, schema: &Schema) -> Result<Query, Error> {
        match self {
            Query::NumericRange { field, start, end, start_excl, end_excl, constant_score } => {
                simplify_numeric_range(schema, field, *start, *end, *start_excl, *end_excl, *constant_score)
            }
            Query::And(children) => Ok(Query::And(
                children.iter().map(|c| c.simplify(schema)).collect::<Result<_, _>>()?,
            ).normalize()),
            Query::Or(children) => Ok(Query::Or(
                children.iter().map(|c| c.simplify(schema)).collect::<Result<_, _>>()?,
            ).normalize()),
            Query::Not(inner) => Ok(Query::Not(Box::new(inner.simplify(schema)?))),
            Query::AndNot(a, b) => Ok(Query::AndNot(Box::new(a.simplify(schema)?), Box::new(b.simplify(schema)?))),
            Query::AndMaybe(a, b) => Ok(Query::AndMaybe(Box::new(a.simplify(schema)?), Box::new(b.simplify(schema)?))),
            Query::ConstantScore(inner) => Ok(Query::ConstantScore(Box::new(inner.simplify(schema)?))),
            Query::Boost(inner, b) => Ok(Query::Boost(Box::new(inner.simplify(schema)?), *b)),
            other => Ok(other.clone()),
        }
    }
}

fn flatten(
    children: &[Query],
    is_same: impl Fn(&Query) -> bool,
    unwrap: impl Fn(Query) -> Vec<Query>,
) -> Vec<Query> {
    let mut out = Vec::new();
    for c in children {
        if is_same(c) {
            out.extend(unwrap(c.clone()));
        } else {
            out.push(c.normalize());
        }
    }
    out
}

fn normalize_range(
    field: String,
    start: Option<Vec<u8>>,
    end: Option<Vec<u8>>,
    start_excl: bool,
    end_excl: bool,
) -> Query {
    match (&start, &end) {
        (None, None) => Query::Every { field: Some(field) },
        (Some(s), Some(e)) if s == e => {
            if start_excl || end_excl {
                Query::Null
            } else {
                Query::Term { field, term: s.clone() }
            }
        }
        _ => Query::TermRange { field, start, end, start_excl, end_excl },
    }
}

/// `Range.merge`: combine two `TermRange`s on the same field. `intersect`
/// selects AND-style tightening (tighter bounds win) versus OR-style
/// loosening (looser bounds win, any unbounded side makes the result
/// unbounded on that side).
pub fn merge(a: &Query, b: &Query, intersect: bool) -> Option<Query> {
    let (fa, sa, ea, sxa, exa) = as_term_range(a)?;
    let (fb, sb, eb, sxb, exb) = as_term_range(b)?;
    if fa != fb {
        return None;
    }
    // Lower bound: intersect wants the larger (tighter); union wants the
    // smaller, and unbounded beats any bound.
    let (start, start_excl) = pick_bound(sa, sxa, sb, sxb, intersect, true);
    // Upper bound: intersect wants the smaller (tighter); union wants the
    // larger, and unbounded beats any bound.
    let (end, end_excl) = pick_bound(ea, exa, eb, exb, intersect, false);
    Some(normalize_range(fa.to_string(), start, end, start_excl, end_excl))
}

fn as_term_range(q: &Query) -> Option<(&str, Option<&Vec<u8>>, Option<&Vec<u8>>, bool, bool)> {
    match q {
        Query::TermRange { field, start, end, start_excl, end_excl } => {
            Some((field.as_str(), start.as_ref(), end.as_ref(), *start_excl, *end_excl))
        }
        _ => None,
    }
}

/// `want_larger` says whether the *tighter* choice, when both sides are
/// bounded, is the larger of the two values (true for a lower bound under
/// intersection, false for an upper bound under intersection — and flipped
/// for union).
fn pick_bound(
    a: Option<&Vec<u8>>,
    a_excl: bool,
    b: Option<&Vec<u8>>,
    b_excl: bool,
    intersect: bool,
    is_lower_bound: bool,
) -> (Option<Vec<u8>>, bool) {
    let want_larger = intersect == is_lower_bound;
    match (a, b) {
        (None, None) => (None, false),
        (None, Some(v)) | (Some(v), None) => {
            if intersect {
                // the bounded side is tighter than no bound at all.
                let excl = if a.is_none() { b_excl } else { a_excl };
                (Some(v.clone()), excl)
            } else {
                (None, false)
            }
        }
        (Some(av), Some(bv)) => {
            if av == bv {
                let excl = if intersect { a_excl || b_excl } else { a_excl && b_excl };
                (Some(av.clone()), excl)
            } else if (av > bv) == want_larger {
                (Some(av.clone()), a_excl)
            } else {
                (Some(bv.clone()), b_excl)
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn simplify_numeric_range(
    schema: &Schema,
    field: &str,
    start: Option<f64>,
    end: Option<f64>,
    start_excl: bool,
    end_excl: bool,
    constant_score: bool,
) -> Result<Query, Error> {
    let f = schema
        .get(field)
        .ok_or_else(|| Error::FieldConfiguration(format!("unknown field {:?}", field)))?;
    let fmt = numeric_format(f)
        .ok_or_else(|| Error::FieldConfiguration(format!("{:?} is not a numeric field", field)))?;

    if start.is_none() && end.is_none() {
        return Ok(Query::Every { field: Some(field.to_string()) });
    }

    let lo_sortable = start.map(|s| fmt.to_sortable(s as i64, s));
    let hi_sortable = end.map(|e| fmt.to_sortable(e as i64, e));

    let mut lo = lo_sortable.unwrap_or(0);
    let mut hi = hi_sortable.unwrap_or(std::u64::MAX);
    if start_excl && lo_sortable.is_some() {
        lo = lo.saturating_add(1);
    }
    if end_excl && hi_sortable.is_some() {
        if hi == 0 {
            // would underflow past representable range: empty.
            return Ok(Query::Null);
        }
        hi -= 1;
    }
    if lo > hi {
        // matches Whoosh's NumericRange.simplify: an exclusive-endpoint
        // adjustment that crosses the other bound yields nothing, not an
        // empty disjunction.
        return Ok(Query::Null);
    }

    let tiers = fmt.split_ranges(lo, hi);
    let mut disjuncts = Vec::with_capacity(tiers.len());
    for (l, h, shift) in tiers {
        if l == h {
            disjuncts.push(Query::Term { field: field.to_string(), term: fmt.sortable_bytes(l, shift) });
        } else {
            disjuncts.push(Query::TermRange {
                field: field.to_string(),
                start: Some(fmt.sortable_bytes(l, shift)),
                end: Some(fmt.sortable_bytes(h, shift)),
                start_excl: false,
                end_excl: false,
            });
        }
    }
    let combined = Query::Or(disjuncts).normalize();
    Ok(if constant_score {
        Query::ConstantScore(Box::new(combined))
    } else {
        combined
    })
}

fn numeric_format(field: &crate::schema::Field) -> Option<NumFormat> {
    use crate::schema::Field;
    match field {
        Field::Numeric { signed, bits, shift_step, .. } => Some(if *signed {
            NumFormat::signed(*bits, *shift_step)
        } else {
            NumFormat::unsigned(*bits, *shift_step)
        }),
        Field::DateTime { shift_step, .. } => Some(NumFormat::unsigned(64, *shift_step)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, Schema};

    fn schema_with_numeric() -> Schema {
        let mut s = Schema::new();
        s.add("n", Field::numeric(32, false, 4)).unwrap();
        s
    }

    #[test]
    fn every_field_normalizes_from_unbounded_range() {
        let q = Query::TermRange { field: "f".into(), start: None, end: None, start_excl: false, end_excl: false };
        assert_eq!(q.normalize(), Query::Every { field: Some("f".into()) });
    }

    #[test]
    fn single_point_exclusive_is_null() {
        let q = Query::TermRange {
            field: "f".into(),
            start: Some(vec![1]),
            end: Some(vec![1]),
            start_excl: true,
            end_excl: false,
        };
        assert_eq!(q.normalize(), Query::Null);
    }

    #[test]
    fn single_point_inclusive_is_term() {
        let q = Query::TermRange {
            field: "f".into(),
            start: Some(vec![1]),
            end: Some(vec![1]),
            start_excl: false,
            end_excl: false,
        };
        assert_eq!(q.normalize(), Query::Term { field: "f".into(), term: vec![1] });
    }

    #[test]
    fn numeric_range_simplifies_to_or_of_terms() {
        let schema = schema_with_numeric();
        let q = Query::NumericRange {
            field: "n".into(),
            start: Some(10.0),
            end: Some(5925.0),
            start_excl: false,
            end_excl: false,
            constant_score: false,
        };
        let simplified = q.simplify(&schema).unwrap();
        match simplified {
            Query::Or(_) | Query::Term { .. } | Query::TermRange { .. } => {}
            other => panic!("expected a disjunction of terms, got {:?}", other),
        }
    }

    #[test]
    fn numeric_range_empty_after_exclusive_adjust_is_null() {
        let schema = schema_with_numeric();
        let q = Query::NumericRange {
            field: "n".into(),
            start: Some(5.0),
            end: Some(5.0),
            start_excl: true,
            end_excl: false,
            constant_score: false,
        };
        assert_eq!(q.simplify(&schema).unwrap(), Query::Null);
    }

    #[test]
    fn and_of_one_normalizes_to_child() {
        let inner = Query::Term { field: "f".into(), term: vec![1] };
        let q = Query::And(vec![inner.clone()]);
        assert_eq!(q.normalize(), inner);
    }

    #[test]
    fn nested_and_flattens() {
        let a = Query::Term { field: "f".into(), term: vec![1] };
        let b = Query::Term { field: "f".into(), term: vec![2] };
        let c = Query::Term { field: "f".into(), term: vec![3] };
        let q = Query::And(vec![Query::And(vec![a.clone(), b.clone()]), c.clone()]);
        assert_eq!(q.normalize(), Query::And(vec![a, b, c]));
    }

    #[test]
    fn merge_intersection_takes_tighter_bounds() {
        let a = Query::TermRange { field: "f".into(), start: Some(vec![1]), end: Some(vec![10]), start_excl: false, end_excl: false };
        let b = Query::TermRange { field: "f".into(), start: Some(vec![5]), end: Some(vec![20]), start_excl: false, end_excl: false };
        let m = merge(&a, &b, true).unwrap();
        assert_eq!(m, Query::TermRange { field: "f".into(), start: Some(vec![5]), end: Some(vec![10]), start_excl: false, end_excl: false });
    }
}
