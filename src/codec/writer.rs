//! Encode a block of postings (one term's doc-list, or one document's
//! term-vector) into the on-disk byte format described in `format.rs`.

use super::format::*;
use super::ptuple::{Features, PostTuple};
use crate::Error;
use std::io::{self, Write};

const MAX_FAST_PATH_POSTS: usize = 32;

/// Encode a doc-list block: postings must be sorted by strictly increasing
/// `doc_id` and share one feature set (whichever of length/weight/positions/
/// ranges/payloads is `Some` on the first posting is assumed true of all).
pub fn encode_doc_block(postings: &[PostTuple]) -> Result<Vec<u8>, Error> {
    if postings.is_empty() {
        return Err(Error::EmptyBlock);
    }
    check_sorted(postings)?;

    let features = features_of(&postings[0]);
    if features == Features::EMPTY && postings.len() <= MAX_FAST_PATH_POSTS {
        return Ok(encode_fast_path(postings));
    }
    encode_full_doc_block(postings, features)
}

fn features_of(p: &PostTuple) -> Features {
    let mut f = Features::EMPTY;
    if p.length.is_some() {
        f.insert(Features::LENGTHS);
    }
    if p.weight.is_some() {
        f.insert(Features::WEIGHTS);
    }
    if p.positions.is_some() {
        f.insert(Features::POSITIONS);
    }
    if p.ranges.is_some() {
        f.insert(Features::RANGES);
    }
    if p.payloads.is_some() {
        f.insert(Features::PAYLOADS);
    }
    f
}

fn check_sorted(postings: &[PostTuple]) -> Result<(), Error> {
    let mut prev: Option<u32> = None;
    for p in postings {
        if let Some(prev_id) = prev {
            if p.doc_id <= prev_id {
                return Err(Error::OutOfOrder);
            }
        }
        prev = Some(p.doc_id);
    }
    Ok(())
}

fn typecode_index(tc: u8) -> u8 {
    match tc {
        TC_U8 => 0,
        TC_U16 => 1,
        TC_U32 => 2,
        _ => 3,
    }
}

fn typecode_from_index(idx: u8) -> u8 {
    match idx {
        0 => TC_U8,
        1 => TC_U16,
        2 => TC_U32,
        _ => TC_U64,
    }
}

fn encode_fast_path(postings: &[PostTuple]) -> Vec<u8> {
    let ids: Vec<u64> = postings.iter().map(|p| p.doc_id as u64).collect();
    let max_id = *ids.iter().max().unwrap();
    let tc = smallest_typecode(max_id);
    let idx = typecode_index(tc);
    let count = postings.len() as u8;
    let flags = Features::FAST_PATH.bits() | (idx << 5) | (count - 1);

    let mut out = vec![flags];
    write_typed_array(&ids, tc, &mut out).expect("writing to Vec<u8> cannot fail");
    out
}

fn encode_full_doc_block(postings: &[PostTuple], features: Features) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    let deltas: Vec<u64> = {
        let mut prev = 0u64;
        postings
            .iter()
            .map(|p| {
                let d = p.doc_id as u64 - prev;
                prev = p.doc_id as u64;
                d
            })
            .collect()
    };
    let ids_tc = smallest_typecode(*deltas.iter().max().unwrap_or(&0));

    let (weights_tc, weights_ints, weights_floats) = classify_weights(postings)?;

    let lengths: Option<Vec<u8>> = if features.contains(Features::LENGTHS) {
        Some(
            postings
                .iter()
                .map(|p| p.length.ok_or(Error::FormatMismatch("missing length".into())))
                .collect::<Result<Vec<u8>, Error>>()?,
        )
    } else {
        None
    };
    let (min_len, max_len): (i32, i32) = match &lengths {
        Some(ls) => (
            *ls.iter().min().unwrap() as i32,
            *ls.iter().max().unwrap() as i32,
        ),
        None => (-1, -1),
    };

    let positions_blob = if features.contains(Features::POSITIONS) {
        Some(encode_chunk_list(
            postings
                .iter()
                .map(|p| encode_positions_chunk(p.positions.as_ref().unwrap()))
                .collect(),
        ))
    } else {
        None
    };
    let ranges_blob = if features.contains(Features::RANGES) {
        Some(encode_chunk_list(
            postings
                .iter()
                .map(|p| encode_ranges_chunk(p.ranges.as_ref().unwrap()))
                .collect(),
        ))
    } else {
        None
    };
    let payloads_blob = if features.contains(Features::PAYLOADS) {
        Some(encode_chunk_list(
            postings
                .iter()
                .map(|p| p.payloads.as_ref().unwrap().concat())
                .collect(),
        ))
    } else {
        None
    };

    out.push(features.bits());
    out.write_all(&(postings.len() as u16).to_le_bytes())?;
    out.push(ids_tc);
    out.push(weights_tc);
    out.write_all(&min_len.to_le_bytes())?;
    out.write_all(&max_len.to_le_bytes())?;
    out.write_all(&len_or_neg1(&positions_blob).to_le_bytes())?;
    out.write_all(&len_or_neg1(&ranges_blob).to_le_bytes())?;
    out.write_all(&len_or_neg1(&payloads_blob).to_le_bytes())?;

    write_typed_array(&deltas, ids_tc, &mut out)?;
    if let Some(ls) = &lengths {
        out.write_all(ls)?;
    }
    match weights_tc {
        TC_ABSENT | TC_ALL_ONES => {}
        TC_F32 => write_f32_array(&weights_floats.unwrap(), &mut out)?,
        tc => write_typed_array(&weights_ints.unwrap(), tc, &mut out)?,
    }
    if let Some(b) = positions_blob {
        out.write_all(&b)?;
    }
    if let Some(b) = ranges_blob {
        out.write_all(&b)?;
    }
    if let Some(b) = payloads_blob {
        out.write_all(&b)?;
    }

    Ok(out)
}

fn len_or_neg1(blob: &Option<Vec<u8>>) -> i32 {
    blob.as_ref().map(|b| b.len() as i32).unwrap_or(-1)
}

fn classify_weights(
    postings: &[PostTuple],
) -> Result<(u8, Option<Vec<u64>>, Option<Vec<f32>>), Error> {
    if postings[0].weight.is_none() {
        return Ok((TC_ABSENT, None, None));
    }
    let weights: Vec<f32> = postings
        .iter()
        .map(|p| p.weight.ok_or(Error::FormatMismatch("missing weight".into())))
        .collect::<Result<_, _>>()?;
    if weights.iter().all(|&w| w == 1.0) {
        return Ok((TC_ALL_ONES, None, None));
    }
    if weights.iter().all(|&w| w.fract() == 0.0 && w >= 0.0) {
        let ints: Vec<u64> = weights.iter().map(|&w| w as u64).collect();
        let tc = smallest_typecode(*ints.iter().max().unwrap());
        return Ok((tc, Some(ints), None));
    }
    Ok((TC_F32, None, Some(weights)))
}

fn encode_positions_chunk(positions: &[u32]) -> Vec<u8> {
    let deltas: Vec<u64> = {
        let mut prev = 0u64;
        positions
            .iter()
            .map(|&p| {
                let d = p as u64 - prev;
                prev = p as u64;
                d
            })
            .collect()
    };
    let tc = smallest_typecode(*deltas.iter().max().unwrap_or(&0));
    let mut out = vec![tc];
    write_typed_array(&deltas, tc, &mut out).unwrap();
    out
}

fn encode_ranges_chunk(ranges: &[super::ptuple::Range]) -> Vec<u8> {
    let mut flat = Vec::with_capacity(ranges.len() * 2);
    let mut prev_end = 0u64;
    for r in ranges {
        let start_delta = r.start as u64 - prev_end;
        flat.push(start_delta);
        flat.push(r.span as u64);
        prev_end = r.start as u64 + r.span as u64;
    }
    let tc = smallest_typecode(*flat.iter().max().unwrap_or(&0));
    let mut out = vec![tc];
    write_typed_array(&flat, tc, &mut out).unwrap();
    out
}

/// `(offsets_typecode, lengths_typecode, count) ++ offsets[] ++ lengths[] ++ blob`
fn encode_chunk_list(chunks: Vec<Vec<u8>>) -> Vec<u8> {
    let mut offsets = Vec::with_capacity(chunks.len());
    let mut lengths = Vec::with_capacity(chunks.len());
    let mut running = 0u64;
    for c in &chunks {
        offsets.push(running);
        lengths.push(c.len() as u64);
        running += c.len() as u64;
    }
    let offsets_tc = smallest_typecode(*offsets.iter().max().unwrap_or(&0));
    let lengths_tc = smallest_typecode(*lengths.iter().max().unwrap_or(&0));

    let mut out = Vec::new();
    out.push(offsets_tc);
    out.push(lengths_tc);
    out.extend_from_slice(&(chunks.len() as u32).to_le_bytes());
    write_typed_array(&offsets, offsets_tc, &mut out).unwrap();
    write_typed_array(&lengths, lengths_tc, &mut out).unwrap();
    for c in chunks {
        out.extend_from_slice(&c);
    }
    out
}

/// Encode a vector block: one document's per-term statistics (weight,
/// optionally positions), plus the terms themselves so a vector reader can
/// resolve a term to its ordinal without outside help. `terms` must already
/// be sorted and strictly increasing, aligned 1:1 with `postings`; each
/// posting's own `doc_id` is ignored and replaced by its index into `terms`.
///
/// Layout: the ordinary doc-block encoding of the remapped postings
/// (ordinal standing in for doc-id), followed by the terms section —
/// a length typecode byte, a typed array of per-term byte lengths, then
/// the concatenated term bytes — read back by `BlockReader::termbytes`.
pub fn encode_vector_block(terms: &[Vec<u8>], postings: &[PostTuple]) -> Result<Vec<u8>, Error> {
    if terms.len() != postings.len() {
        return Err(Error::FormatMismatch("term/posting count mismatch".into()));
    }
    if terms.windows(2).any(|w| w[0] >= w[1]) {
        return Err(Error::OutOfOrder);
    }
    let remapped: Vec<PostTuple> = postings
        .iter()
        .enumerate()
        .map(|(ord, p)| {
            let mut p2 = p.clone();
            p2.doc_id = ord as u32;
            p2
        })
        .collect();
    let mut out = encode_doc_block(&remapped)?;

    let lengths: Vec<u64> = terms.iter().map(|t| t.len() as u64).collect();
    let tc = smallest_typecode(*lengths.iter().max().unwrap_or(&0));
    out.push(tc);
    write_typed_array(&lengths, tc, &mut out).expect("writing to Vec<u8> cannot fail");
    for t in terms {
        out.extend_from_slice(t);
    }
    Ok(out)
}
