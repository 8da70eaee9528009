//! The in-memory posting tuple the rest of the crate deals in; the codec's
//! job is to turn a sequence of these into bytes and back.

/// A non-overlapping, non-decreasing `[start, start+span)` annotation span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: u32,
    pub span: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostTuple {
    pub doc_id: u32,
    /// Quantised field length in `[0, 255]`, present iff the field tracks lengths.
    pub length: Option<u8>,
    /// Term weight (frequency or boosted frequency); `None` means "all ones".
    pub weight: Option<f32>,
    pub positions: Option<Vec<u32>>,
    pub ranges: Option<Vec<Range>>,
    pub payloads: Option<Vec<Vec<u8>>>,
}

impl PostTuple {
    pub fn new(doc_id: u32) -> Self {
        Self {
            doc_id,
            length: None,
            weight: None,
            positions: None,
            ranges: None,
            payloads: None,
        }
    }

    pub fn with_length(mut self, length: u8) -> Self {
        self.length = Some(length);
        self
    }
    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = Some(weight);
        self
    }
    pub fn with_positions(mut self, positions: Vec<u32>) -> Self {
        self.positions = Some(positions);
        self
    }
    pub fn with_ranges(mut self, ranges: Vec<Range>) -> Self {
        self.ranges = Some(ranges);
        self
    }
    pub fn with_payloads(mut self, payloads: Vec<Vec<u8>>) -> Self {
        self.payloads = Some(payloads);
        self
    }

    /// Rough resident-memory cost, used by the indexing pool to decide when
    /// to spill; doesn't need to be exact, just proportional.
    pub fn approx_size(&self) -> usize {
        let mut n = std::mem::size_of::<PostTuple>();
        n += self.positions.as_ref().map(|v| v.len() * 4).unwrap_or(0);
        n += self.ranges.as_ref().map(|v| v.len() * 8).unwrap_or(0);
        n += self.payloads.as_ref().map(|v| v.iter().map(|p| p.len() + 8).sum()).unwrap_or(0);
        n
    }
}

/// Which optional components a block carries. Not a generic bitflags crate
/// since the codec only ever needs this one 8-bit set.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Features(pub u8);

impl Features {
    pub const EMPTY: Features = Features(0);
    pub const LENGTHS: Features = Features(0b0000_0001);
    pub const WEIGHTS: Features = Features(0b0000_0010);
    pub const POSITIONS: Features = Features(0b0000_0100);
    pub const RANGES: Features = Features(0b0000_1000);
    pub const PAYLOADS: Features = Features(0b0001_0000);
    pub const FAST_PATH: Features = Features(0b1000_0000);

    pub fn contains(&self, other: Features) -> bool {
        (self.0 & other.0) == other.0
    }
    pub fn insert(&mut self, other: Features) {
        self.0 |= other.0;
    }
    pub fn bits(&self) -> u8 {
        self.0
    }
    pub fn from_bits(v: u8) -> Self {
        Features(v)
    }
}

impl std::ops::BitOr for Features {
    type Output = Features;
    fn bitor(self, rhs: Features) -> Features {
        Features(self.0 | rhs.0)
    }
}
