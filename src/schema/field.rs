//! The closed set of field kinds and their `value -> postings` behaviour.

use crate::analysis::{Analyzer, IdAnalyzer, KeywordAnalyzer, WhitespaceAnalyzer};
use crate::codec::PostTuple;
use crate::numeric::NumFormat;
use crate::query::Query;
use crate::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Numeric(f64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Numeric(n) => Some(*n),
            _ => None,
        }
    }
}

/// One document's contribution to a single term: the bytes identifying the
/// term, plus the posting to file under it.
pub struct TermPosting {
    pub term: Vec<u8>,
    pub posting: PostTuple,
}

/// The closed set of field kinds a `Schema` can hold.
#[derive(Clone, Serialize, Deserialize)]
pub enum Field {
    /// Stored only; never indexed, never searchable.
    Unindexed { stored: bool },
    /// Tokenised prose; optionally tracks positions for phrase queries.
    Text { stored: bool, positions: bool },
    /// A single atomic token, e.g. a primary key.
    Id { stored: bool, lowercase: bool },
    /// Comma/space separated atomic tokens, e.g. tags.
    Keyword { stored: bool, lowercase: bool, vector: bool },
    /// `n`-gram'd atomic token, used for fuzzy/substring matching.
    Ngram { stored: bool, min_gram: u8, max_gram: u8 },
    Boolean { stored: bool },
    Numeric {
        stored: bool,
        signed: bool,
        bits: u8,
        shift_step: u8,
        decimal_places: u8,
    },
    DateTime { stored: bool, shift_step: u8 },
    /// Ranges + payloads only, no positions — annotation layers over text.
    Annotation { stored: bool },
}

impl Field {
    pub fn text(positions: bool) -> Self {
        Field::Text { stored: false, positions }
    }
    pub fn stored(mut self) -> Self {
        match &mut self {
            Field::Unindexed { stored }
            | Field::Text { stored, .. }
            | Field::Id { stored, .. }
            | Field::Keyword { stored, .. }
            | Field::Ngram { stored, .. }
            | Field::Boolean { stored }
            | Field::Numeric { stored, .. }
            | Field::DateTime { stored, .. }
            | Field::Annotation { stored } => *stored = true,
        }
        self
    }
    pub fn is_stored(&self) -> bool {
        match self {
            Field::Unindexed { stored }
            | Field::Text { stored, .. }
            | Field::Id { stored, .. }
            | Field::Keyword { stored, .. }
            | Field::Ngram { stored, .. }
            | Field::Boolean { stored }
            | Field::Numeric { stored, .. }
            | Field::DateTime { stored, .. }
            | Field::Annotation { stored } => *stored,
        }
    }
    pub fn is_indexed(&self) -> bool {
        !matches!(self, Field::Unindexed { .. })
    }
    pub fn numeric(bits: u8, signed: bool, shift_step: u8) -> Self {
        Field::Numeric { stored: false, signed, bits, shift_step, decimal_places: 0 }
    }
    pub fn id() -> Self {
        Field::Id { stored: false, lowercase: true }
    }
    pub fn keyword() -> Self {
        Field::Keyword { stored: false, lowercase: true, vector: false }
    }

    fn num_format(&self) -> Option<NumFormat> {
        match self {
            Field::Numeric { signed, bits, shift_step, .. } => Some(if *signed {
                NumFormat::signed(*bits, *shift_step)
            } else {
                NumFormat::unsigned(*bits, *shift_step)
            }),
            Field::DateTime { shift_step, .. } => Some(NumFormat::unsigned(64, *shift_step)),
            _ => None,
        }
    }

    /// Turn one document's value for this field into `(field_length, postings)`.
    /// `doc_id` is stamped onto every emitted posting's `doc_id`.
    pub fn index(&self, doc_id: u32, value: &FieldValue) -> Result<(u32, Vec<TermPosting>), Error> {
        match self {
            Field::Unindexed { .. } => Ok((0, vec![])),
            Field::Text { positions, .. } => {
                let text = value.as_text().ok_or_else(|| {
                    Error::FieldConfiguration("Text field requires a text value".into())
                })?;
                let tokens = WhitespaceAnalyzer.analyze(text);
                index_tokens(doc_id, &tokens, *positions)
            }
            Field::Id { lowercase, .. } => {
                let text = value.as_text().ok_or_else(|| {
                    Error::FieldConfiguration("Id field requires a text value".into())
                })?;
                let tokens = IdAnalyzer { lowercase: *lowercase }.analyze(text);
                index_tokens(doc_id, &tokens, false)
            }
            Field::Keyword { lowercase, .. } => {
                let text = value.as_text().ok_or_else(|| {
                    Error::FieldConfiguration("Keyword field requires a text value".into())
                })?;
                let tokens = KeywordAnalyzer { lowercase: *lowercase }.analyze(text);
                index_tokens(doc_id, &tokens, false)
            }
            Field::Ngram { min_gram, max_gram, .. } => {
                let text = value.as_text().ok_or_else(|| {
                    Error::FieldConfiguration("Ngram field requires a text value".into())
                })?;
                let grams = ngrams(&text.to_lowercase(), *min_gram, *max_gram);
                let tokens: Vec<_> = grams
                    .into_iter()
                    .enumerate()
                    .map(|(i, g)| crate::analysis::Token {
                        text: g,
                        position: i as u32,
                        start_char: 0,
                        end_char: 0,
                    })
                    .collect();
                index_tokens(doc_id, &tokens, false)
            }
            Field::Boolean { .. } => {
                let b = match value {
                    FieldValue::Bool(b) => *b,
                    _ => return Err(Error::FieldConfiguration("Boolean field requires a bool value".into())),
                };
                let term = vec![if b { 1u8 } else { 0u8 }];
                Ok((1, vec![TermPosting { term, posting: PostTuple::new(doc_id).with_length(1).with_weight(1.0) }]))
            }
            Field::Numeric { .. } | Field::DateTime { .. } => {
                let fmt = self.num_format().unwrap();
                let x = value.as_f64().ok_or_else(|| {
                    Error::FieldConfiguration("Numeric field requires a numeric value".into())
                })?;
                let sortable = match self {
                    Field::Numeric { .. } => fmt.to_sortable(x as i64, 0.0),
                    _ => fmt.to_sortable(0, x),
                };
                let mut out = Vec::new();
                let mut shift = 0u8;
                loop {
                    let term = fmt.sortable_bytes(sortable, shift);
                    out.push(TermPosting {
                        term,
                        posting: PostTuple::new(doc_id).with_length(1).with_weight(1.0),
                    });
                    if shift + fmt.shift_step >= fmt.bits {
                        break;
                    }
                    shift += fmt.shift_step;
                }
                Ok((1, out))
            }
            Field::Annotation { .. } => {
                // Annotation fields are populated by a higher-level indexing
                // step that already knows the ranges/payloads; indexing a
                // bare FieldValue produces no postings of its own.
                Ok((0, vec![]))
            }
        }
    }

    pub fn to_bytes(&self, value: &FieldValue) -> Result<Vec<u8>, Error> {
        match value {
            FieldValue::Text(s) => Ok(s.as_bytes().to_vec()),
            FieldValue::Bytes(b) => Ok(b.clone()),
            FieldValue::Bool(b) => Ok(vec![*b as u8]),
            FieldValue::Numeric(n) => {
                let fmt = self.num_format().ok_or_else(|| {
                    Error::FieldConfiguration("to_bytes on a non-numeric field".into())
                })?;
                let sortable = fmt.to_sortable(*n as i64, *n);
                Ok(fmt.sortable_bytes(sortable, 0))
            }
        }
    }

    pub fn from_bytes(&self, bytes: &[u8]) -> Result<FieldValue, Error> {
        match self {
            Field::Numeric { .. } | Field::DateTime { .. } => {
                let fmt = self.num_format().unwrap();
                let (_, sortable) = fmt.decode_sortable_bytes(bytes)?;
                let (i, f) = fmt.from_sortable(sortable);
                Ok(FieldValue::Numeric(if matches!(self, Field::Numeric { .. }) {
                    i as f64
                } else {
                    f
                }))
            }
            Field::Boolean { .. } => Ok(FieldValue::Bool(bytes.first().copied().unwrap_or(0) != 0)),
            _ => Ok(FieldValue::Text(String::from_utf8_lossy(bytes).into_owned())),
        }
    }

    pub fn self_parsing(&self) -> bool {
        matches!(self, Field::Numeric { .. } | Field::DateTime { .. })
    }

    /// Parse a leading query-string token for this field, if it's self-parsing.
    pub fn parse_text(&self, field_name: &str, qstring: &str) -> Option<Query> {
        match self {
            Field::Numeric { .. } => {
                if qstring.trim() == "*" {
                    return Some(Query::Every { field: Some(field_name.to_string()) });
                }
                qstring.trim().parse::<f64>().ok().map(|n| Query::NumericRange {
                    field: field_name.to_string(),
                    start: Some(n),
                    end: Some(n),
                    start_excl: false,
                    end_excl: false,
                    constant_score: false,
                })
            }
            _ => None,
        }
    }
}

fn index_tokens(
    doc_id: u32,
    tokens: &[crate::analysis::Token],
    track_positions: bool,
) -> Result<(u32, Vec<TermPosting>), Error> {
    use crate::HashMap;
    let mut by_term: HashMap<String, (u32, Vec<u32>)> = HashMap::default();
    for t in tokens {
        let entry = by_term.entry(t.text.clone()).or_insert((0, vec![]));
        entry.0 += 1;
        entry.1.push(t.position);
    }
    let length = tokens.len() as u32;
    let quantized = quantize_length(length);
    let mut out = Vec::with_capacity(by_term.len());
    for (term, (freq, positions)) in by_term {
        let mut posting = PostTuple::new(doc_id).with_length(quantized).with_weight(freq as f32);
        if track_positions {
            posting = posting.with_positions(positions);
        }
        out.push(TermPosting { term: term.into_bytes(), posting });
    }
    out.sort_by(|a, b| a.term.cmp(&b.term));
    Ok((length, out))
}

/// Non-linear length quantisation into a single byte, Lucene/Whoosh-style:
/// exact below 16, then progressively coarser.
fn quantize_length(n: u32) -> u8 {
    if n < 16 {
        n as u8
    } else {
        let mut n = n - 16;
        let mut bits = 0u32;
        while n >= 16 {
            n >>= 1;
            bits += 1;
        }
        (16 + (bits << 4) + n as u32).min(255) as u8
    }
}

fn ngrams(text: &str, min_gram: u8, max_gram: u8) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    for gram_len in min_gram..=max_gram {
        let gram_len = gram_len as usize;
        if gram_len == 0 || gram_len > chars.len() {
            continue;
        }
        for start in 0..=(chars.len() - gram_len) {
            out.push(chars[start..start + gram_len].iter().collect());
        }
    }
    out
}
